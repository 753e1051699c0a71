// src/backend/cpu/mem.rs
//! Lane scratchpad memory
//!
//! One contiguous region per CPU worker, split into one slice per lane. On
//! Linux the region is first requested from the huge page pool; when that
//! fails (no pages reserved, no permission) it silently falls back to a
//! regular heap allocation.
#![allow(unsafe_code)]

use crate::utils::error::MinerError;

/// Huge page size assumed when rounding mapped regions
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Footprint of a scratchpad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    /// Bytes reserved
    pub size: usize,
    /// 2 MiB pages covering `size`
    pub pages: usize,
    /// Pages actually backed by huge pages
    pub huge_pages: usize,
}

enum Region {
    Heap(Vec<u8>),
    #[cfg(target_os = "linux")]
    Mapped { ptr: std::ptr::NonNull<u8>, len: usize },
}

/// Exclusive working memory of one CPU worker
pub struct Scratchpad {
    region: Region,
    lane_size: usize,
    lanes: usize,
}

// The mapped region is owned exclusively by the scratchpad.
unsafe impl Send for Scratchpad {}

impl Scratchpad {
    /// Reserves `lanes` slices of `lane_size` bytes
    ///
    /// # Arguments
    /// * `lane_size` - Bytes per lane, the algorithm's scratchpad size
    /// * `lanes` - Number of lanes sharing the region
    /// * `huge_pages` - Try the huge page pool first
    ///
    /// # Returns
    /// - `Ok(Scratchpad)` on success
    /// - `Err(MinerError::AllocationError)` if even the heap fallback fails
    pub fn allocate(lane_size: usize, lanes: usize, huge_pages: bool) -> Result<Self, MinerError> {
        let lanes = lanes.max(1);
        let size = lane_size
            .checked_mul(lanes)
            .ok_or_else(|| MinerError::AllocationError(format!("{} x {} bytes overflows", lanes, lane_size)))?;

        if huge_pages {
            if let Some(region) = map_huge(size) {
                return Ok(Scratchpad { region, lane_size, lanes });
            }
            log::debug!("huge pages unavailable for {} bytes, using regular memory", size);
        }

        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|e| MinerError::AllocationError(format!("{} bytes: {}", size, e)))?;
        memory.resize(size, 0);

        Ok(Scratchpad {
            region: Region::Heap(memory),
            lane_size,
            lanes,
        })
    }

    /// Slice owned by `lane`
    pub fn lane_mut(&mut self, lane: usize) -> &mut [u8] {
        let start = lane * self.lane_size;
        let end = start + self.lane_size;
        &mut self.as_mut_slice()[start..end]
    }

    /// Number of lanes
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Size, page count and huge page coverage
    pub fn info(&self) -> MemInfo {
        let size = self.lane_size * self.lanes;
        let pages = size.div_ceil(HUGE_PAGE_SIZE);
        let huge_pages = match &self.region {
            Region::Heap(_) => 0,
            #[cfg(target_os = "linux")]
            Region::Mapped { .. } => pages,
        };
        MemInfo { size, pages, huge_pages }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.region {
            Region::Heap(memory) => memory.as_mut_slice(),
            #[cfg(target_os = "linux")]
            Region::Mapped { ptr, len } => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) },
        }
    }
}

impl Drop for Scratchpad {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        if let Region::Mapped { ptr, len } = &self.region {
            unsafe {
                libc::munmap(ptr.as_ptr().cast(), *len);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn map_huge(size: usize) -> Option<Region> {
    let len = size.div_ceil(HUGE_PAGE_SIZE).max(1) * HUGE_PAGE_SIZE;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB | libc::MAP_POPULATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    std::ptr::NonNull::new(ptr.cast::<u8>()).map(|ptr| Region::Mapped { ptr, len })
}

#[cfg(not(target_os = "linux"))]
fn map_huge(_size: usize) -> Option<Region> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_are_disjoint_slices() {
        let mut pad = Scratchpad::allocate(64, 3, false).unwrap();
        pad.lane_mut(0).fill(1);
        pad.lane_mut(2).fill(3);
        assert!(pad.lane_mut(1).iter().all(|b| *b == 0));
        assert!(pad.lane_mut(2).iter().all(|b| *b == 3));
        assert_eq!(pad.lane_mut(1).len(), 64);
    }

    #[test]
    fn heap_memory_reports_no_huge_pages() {
        let pad = Scratchpad::allocate(HUGE_PAGE_SIZE, 2, false).unwrap();
        assert_eq!(
            pad.info(),
            MemInfo {
                size: 2 * HUGE_PAGE_SIZE,
                pages: 2,
                huge_pages: 0
            }
        );
    }

    #[test]
    fn huge_page_request_always_yields_memory() {
        // falls back to the heap on hosts without reserved pages
        let mut pad = Scratchpad::allocate(4096, 2, true).unwrap();
        pad.lane_mut(1)[4095] = 7;
        assert_eq!(pad.lane_mut(1)[4095], 7);
        assert_eq!(pad.info().size, 8192);
    }
}
