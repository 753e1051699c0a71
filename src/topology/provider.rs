// src/topology/provider.rs
//! Topology sources
//!
//! [`BasicTopology`] asks the running system: thread and core counts from
//! `num_cpus`, the model name from `sysinfo` and, on Linux, cache domains
//! from sysfs. [`TopologyFile`] loads a hand-written description instead,
//! which is how unusual machines (or exclusive L3 caches, which sysfs does
//! not report) are described.

use crate::topology::{CacheDomain, Core, CpuTopology};
use crate::utils::error::MinerError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;

/// Anything that can describe the CPU
pub trait TopologyProvider {
    /// Reads the topology
    fn topology(&self) -> Result<CpuTopology, MinerError>;
}

/// Live system topology
#[derive(Debug, Clone)]
pub struct BasicTopology {
    sysfs: PathBuf,
}

impl Default for BasicTopology {
    fn default() -> Self {
        BasicTopology {
            sysfs: PathBuf::from("/sys/devices/system/cpu"),
        }
    }
}

impl TopologyProvider for BasicTopology {
    fn topology(&self) -> Result<CpuTopology, MinerError> {
        let mut system = System::new();
        system.refresh_cpu_all();
        let brand = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        let mut topology = CpuTopology::flat(brand, num_cpus::get(), num_cpus::get_physical());
        match read_caches(&self.sysfs) {
            Some(caches) => topology.caches = caches,
            None => log::debug!("no cache information under {}", self.sysfs.display()),
        }
        Ok(topology)
    }
}

/// Topology described in a TOML file
#[derive(Debug, Clone)]
pub struct TopologyFile {
    path: PathBuf,
}

impl TopologyFile {
    /// Provider for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TopologyFile { path: path.into() }
    }
}

impl TopologyProvider for TopologyFile {
    fn topology(&self) -> Result<CpuTopology, MinerError> {
        let content = fs::read_to_string(&self.path)?;
        let topology: CpuTopology = toml::from_str(&content)?;
        if topology.threads == 0 {
            return Err(MinerError::TopologyError(format!(
                "{}: threads must be at least 1",
                self.path.display()
            )));
        }
        for cache in &topology.caches {
            if !(2..=3).contains(&cache.level) {
                return Err(MinerError::TopologyError(format!(
                    "{}: unsupported cache level {}",
                    self.path.display(),
                    cache.level
                )));
            }
        }
        Ok(topology)
    }
}

/// Topology from the file if given, otherwise from the running system
pub fn detect(file: Option<&Path>) -> Result<CpuTopology, MinerError> {
    match file {
        Some(path) => TopologyFile::new(path).topology(),
        None => BasicTopology::default().topology(),
    }
}

struct CacheEntry {
    level: u8,
    size: usize,
    cpus: Vec<usize>,
}

/// Top-level unified caches from a sysfs cpu directory
fn read_caches(root: &Path) -> Option<Vec<CacheDomain>> {
    let mut core_of: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    let mut entries: BTreeMap<(u8, Vec<usize>), CacheEntry> = BTreeMap::new();

    for dir in fs::read_dir(root).ok()?.flatten() {
        let name = dir.file_name();
        let Some(cpu) = name.to_str().and_then(|n| n.strip_prefix("cpu")).and_then(|n| n.parse().ok()) else {
            continue;
        };
        let path = dir.path();

        let package = read_number(&path.join("topology/physical_package_id")).unwrap_or(0);
        let core = read_number(&path.join("topology/core_id")).unwrap_or(cpu);
        core_of.insert(cpu, (package, core));

        let Ok(caches) = fs::read_dir(path.join("cache")) else {
            continue;
        };
        for index in caches.flatten() {
            let index = index.path();
            if read_string(&index.join("type")).as_deref() == Some("Instruction") {
                continue;
            }
            let (Some(level), Some(size), Some(cpus)) = (
                read_number(&index.join("level")),
                read_string(&index.join("size")).and_then(|s| parse_size(&s)),
                read_string(&index.join("shared_cpu_list")).and_then(|s| parse_cpu_list(&s)),
            ) else {
                continue;
            };
            let level = level as u8;
            entries
                .entry((level, cpus.clone()))
                .or_insert(CacheEntry { level, size, cpus });
        }
    }

    let top = entries.values().map(|entry| entry.level).filter(|level| *level >= 2).max()?;
    let l2: Vec<&CacheEntry> = entries.values().filter(|entry| entry.level == 2).collect();

    let domains = entries
        .values()
        .filter(|entry| entry.level == top)
        .map(|entry| {
            let mut cores: Vec<((usize, usize), Core)> = Vec::new();
            for cpu in &entry.cpus {
                let key = core_of.get(cpu).copied().unwrap_or((0, *cpu));
                match cores.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, core)) => core.pus.push(*cpu),
                    None => cores.push((key, Core { pus: vec![*cpu] })),
                }
            }

            let l2 = if top == 3 {
                l2.iter()
                    .filter(|cache| cache.cpus.iter().all(|cpu| entry.cpus.contains(cpu)))
                    .map(|cache| cache.size)
                    .collect()
            } else {
                Vec::new()
            };

            CacheDomain {
                level: top,
                size: entry.size,
                exclusive: false,
                l2,
                cores: cores.into_iter().map(|(_, core)| core).collect(),
            }
        })
        .collect::<Vec<_>>();

    (!domains.is_empty()).then_some(domains)
}

fn read_string(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<usize> {
    read_string(path)?.parse().ok()
}

/// Parses sysfs sizes such as `32K`, `8192K` or `8M`
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => value.split_at(i),
        None => (value, ""),
    };
    let number: usize = digits.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

/// Parses cpu lists such as `0-3,8,10-11`
fn parse_cpu_list(value: &str) -> Option<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in value.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end): (usize, usize) = (start.parse().ok()?, end.parse().ok()?);
                if end < start {
                    return None;
                }
                cpus.extend(start..=end);
            }
            None => cpus.push(part.parse().ok()?),
        }
    }
    (!cpus.is_empty()).then_some(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSysfs {
        root: PathBuf,
    }

    impl FakeSysfs {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!("nonce-engine-sysfs-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            FakeSysfs { root }
        }

        fn cpu(&self, cpu: usize, core: usize, caches: &[(u8, &str, &str, &str)]) {
            let dir = self.root.join(format!("cpu{}", cpu));
            fs::create_dir_all(dir.join("topology")).unwrap();
            fs::write(dir.join("topology/physical_package_id"), "0\n").unwrap();
            fs::write(dir.join("topology/core_id"), format!("{}\n", core)).unwrap();
            for (i, (level, kind, size, shared)) in caches.iter().enumerate() {
                let index = dir.join(format!("cache/index{}", i));
                fs::create_dir_all(&index).unwrap();
                fs::write(index.join("level"), format!("{}\n", level)).unwrap();
                fs::write(index.join("type"), format!("{}\n", kind)).unwrap();
                fs::write(index.join("size"), format!("{}\n", size)).unwrap();
                fs::write(index.join("shared_cpu_list"), format!("{}\n", shared)).unwrap();
            }
        }
    }

    impl Drop for FakeSysfs {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn parses_sizes_and_lists() {
        assert_eq!(parse_size("32K"), Some(32 * 1024));
        assert_eq!(parse_size("8M"), Some(8 * 1024 * 1024));
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("12Q"), None);
        assert_eq!(parse_cpu_list("0-3,8,10-11"), Some(vec![0, 1, 2, 3, 8, 10, 11]));
        assert_eq!(parse_cpu_list("3-1"), None);
        assert_eq!(parse_cpu_list(""), None);
    }

    #[test]
    fn reads_top_level_domains_from_sysfs() {
        let sysfs = FakeSysfs::new("l3");
        // two cores with two threads each, private L2 per core, one shared L3
        for (cpu, core) in [(0, 0), (1, 1), (2, 0), (3, 1)] {
            let l2_shared = if core == 0 { "0,2" } else { "1,3" };
            sysfs.cpu(
                cpu,
                core,
                &[
                    (1, "Data", "32K", l2_shared),
                    (1, "Instruction", "32K", l2_shared),
                    (2, "Unified", "1024K", l2_shared),
                    (3, "Unified", "8M", "0-3"),
                ],
            );
        }

        let caches = read_caches(&sysfs.root).unwrap();
        assert_eq!(caches.len(), 1);
        let l3 = &caches[0];
        assert_eq!((l3.level, l3.size), (3, 8 * 1024 * 1024));
        assert_eq!(l3.l2, vec![1024 * 1024, 1024 * 1024]);
        assert_eq!(l3.cores, vec![Core { pus: vec![0, 2] }, Core { pus: vec![1, 3] }]);
    }

    #[test]
    fn missing_sysfs_yields_no_caches() {
        assert!(read_caches(Path::new("/nonexistent/cpu")).is_none());
    }

    #[test]
    fn topology_file_round_trip() {
        let path = std::env::temp_dir().join(format!("nonce-engine-topology-{}.toml", std::process::id()));
        fs::write(
            &path,
            r#"
brand = "Example 4c"
threads = 4
cores = 4

[[caches]]
level = 3
size = 4194304
exclusive = true
l2 = [2097152, 2097152]
cores = [{ pus = [0] }, { pus = [1] }, { pus = [2] }, { pus = [3] }]
"#,
        )
        .unwrap();

        let topology = TopologyFile::new(&path).topology().unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(topology.threads, 4);
        assert_eq!(topology.nodes, 1);
        assert!(topology.caches[0].exclusive);
        assert_eq!(topology.caches[0].pu_count(), 4);
    }

    #[test]
    fn topology_file_rejects_zero_threads() {
        let path = std::env::temp_dir().join(format!("nonce-engine-topology-zero-{}.toml", std::process::id()));
        fs::write(&path, "threads = 0\n").unwrap();
        let result = TopologyFile::new(&path).topology();
        fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(MinerError::TopologyError(_))));
    }
}
