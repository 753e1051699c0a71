// src/miner/job.rs
//! Mining job and result types
//!
//! A [`Job`] is an immutable snapshot of one unit of work as delivered by
//! the pool layer. Workers never share a `Job` mutably: each lane-group keeps
//! its own copy and writes nonces into its own blob replicas.

use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;

/// Capacity of the blob buffer; decoded blobs must be strictly smaller
pub const MAX_BLOB_SIZE: usize = 128;

/// Smallest blob a pool may send
pub const MIN_BLOB_SIZE: usize = 76;

/// Byte offset of the 32-bit little-endian nonce field inside the blob
pub const NONCE_OFFSET: usize = 39;

/// Byte length of the nonce field
pub const NONCE_SIZE: usize = 4;

const MAX_ID_SIZE: usize = 64;

/// Pool id marking "no active pool"
pub const PAUSED_POOL_ID: i32 = -1;

/// Reads the top 64 bits of a digest (bytes 24..32, little-endian)
pub fn top64(digest: &[u8; 32]) -> u64 {
    let mut high = [0u8; 8];
    high.copy_from_slice(&digest[24..32]);
    u64::from_le_bytes(high)
}

/// Difficulty corresponding to a 64-bit target
pub fn target_to_difficulty(target: u64) -> u64 {
    if target == 0 { 0 } else { u64::MAX / target }
}

/// Represents a mining job received from the pool layer
#[derive(Clone)]
pub struct Job {
    algorithm: AlgorithmType,
    blob: [u8; MAX_BLOB_SIZE],
    size: usize,
    target: u64,
    difficulty: u64,
    pool_id: i32,
    id: String,
    nicehash: bool,
}

impl Job {
    /// Creates an empty job shell; blob and target are filled by the setters
    pub fn new(pool_id: i32, id: &str, algorithm: AlgorithmType, nicehash: bool) -> Result<Self, MinerError> {
        let mut job = Job::paused();
        job.pool_id = pool_id;
        job.algorithm = algorithm;
        job.nicehash = nicehash;
        job.set_id(id)?;
        Ok(job)
    }

    /// Builds a complete job from the hex fields a pool sends
    pub fn from_hex(
        pool_id: i32,
        id: &str,
        algorithm: AlgorithmType,
        blob: &str,
        target: &str,
        nicehash: bool,
    ) -> Result<Self, MinerError> {
        let mut job = Job::new(pool_id, id, algorithm, nicehash)?;
        job.set_blob(blob)?;
        job.set_target(target)?;
        Ok(job)
    }

    /// The "no pool" job handed to workers when the pool layer pauses
    pub fn paused() -> Self {
        Job {
            algorithm: AlgorithmType::CnV0,
            blob: [0u8; MAX_BLOB_SIZE],
            size: 0,
            target: 0,
            difficulty: 0,
            pool_id: PAUSED_POOL_ID,
            id: String::new(),
            nicehash: false,
        }
    }

    /// Decodes and stores the hex blob
    ///
    /// The decoded length must be in `[MIN_BLOB_SIZE, MAX_BLOB_SIZE)`. A blob
    /// that already carries a non-zero nonce marks the job as nicehash.
    pub fn set_blob(&mut self, blob: &str) -> Result<(), MinerError> {
        if blob.len() % 2 != 0 {
            return Err(MinerError::InvalidJob(format!(
                "blob has odd hex length {}",
                blob.len()
            )));
        }

        let size = blob.len() / 2;
        if !(MIN_BLOB_SIZE..MAX_BLOB_SIZE).contains(&size) {
            return Err(MinerError::InvalidJob(format!(
                "blob size {} outside [{}, {})",
                size, MIN_BLOB_SIZE, MAX_BLOB_SIZE
            )));
        }

        let bytes = hex::decode(blob)
            .map_err(|e| MinerError::InvalidJob(format!("blob is not hex: {}", e)))?;

        self.blob = [0u8; MAX_BLOB_SIZE];
        self.blob[..size].copy_from_slice(&bytes);
        self.size = size;

        if self.nonce() != 0 && !self.nicehash {
            self.nicehash = true;
        }

        Ok(())
    }

    /// Decodes the hex target
    ///
    /// Up to 8 hex chars is a 32-bit little-endian target, rescaled to 64 bits
    /// as `u64::MAX / (u32::MAX / target32)`. Up to 16 chars is a 64-bit
    /// little-endian target. Shorter inputs are right-padded with `0`.
    pub fn set_target(&mut self, target: &str) -> Result<(), MinerError> {
        let value = match target.len() {
            0 => return Err(MinerError::InvalidJob("empty target".into())),
            1..=8 => {
                let bytes = decode_target(target, 8)?;
                let short = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if short == 0 {
                    return Err(MinerError::InvalidJob("zero target".into()));
                }
                u64::MAX / (u64::from(u32::MAX) / u64::from(short))
            }
            9..=16 => {
                let bytes = decode_target(target, 16)?;
                let mut full = [0u8; 8];
                full.copy_from_slice(&bytes);
                u64::from_le_bytes(full)
            }
            len => {
                return Err(MinerError::InvalidJob(format!(
                    "target too long ({} hex chars)",
                    len
                )));
            }
        };

        if value == 0 {
            return Err(MinerError::InvalidJob("zero target".into()));
        }

        self.target = value;
        self.difficulty = target_to_difficulty(value);
        Ok(())
    }

    fn set_id(&mut self, id: &str) -> Result<(), MinerError> {
        if id.len() >= MAX_ID_SIZE {
            return Err(MinerError::InvalidJob(format!("job id too long ({} bytes)", id.len())));
        }
        self.id = id.to_string();
        Ok(())
    }

    /// A job is hashable when it has a blob, a target and a pool
    pub fn is_valid(&self) -> bool {
        self.size > 0 && self.difficulty > 0 && !self.id.is_empty()
    }

    /// `false` for the pause job
    pub fn is_active(&self) -> bool {
        self.pool_id != PAUSED_POOL_ID
    }

    /// Algorithm this job must be hashed with
    pub fn algorithm(&self) -> AlgorithmType {
        self.algorithm
    }

    /// Decoded blob bytes
    pub fn blob(&self) -> &[u8] {
        &self.blob[..self.size]
    }

    /// Decoded blob length
    pub fn size(&self) -> usize {
        self.size
    }

    /// 64-bit share target
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Difficulty derived from the target
    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    /// Originating pool connection, `-1` when paused
    pub fn pool_id(&self) -> i32 {
        self.pool_id
    }

    /// Opaque pool job id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the pool reserves the nonce's top byte
    pub fn is_nicehash(&self) -> bool {
        self.nicehash
    }

    /// Nonce currently stored in the blob
    pub fn nonce(&self) -> u32 {
        read_nonce(&self.blob)
    }
}

/// Jobs are equal when id, blob and target are; re-delivery of an equal job
/// must not reset any lane.
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.target == other.target && self.blob() == other.blob()
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("pool_id", &self.pool_id)
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("size", &self.size)
            .field("target", &format_args!("{:016x}", self.target))
            .field("difficulty", &self.difficulty)
            .field("nicehash", &self.nicehash)
            .finish()
    }
}

fn decode_target(target: &str, width: usize) -> Result<Vec<u8>, MinerError> {
    let padded = format!("{:0<width$}", target, width = width);
    hex::decode(padded).map_err(|e| MinerError::InvalidJob(format!("target is not hex: {}", e)))
}

/// Reads the nonce field of a blob buffer
pub fn read_nonce(blob: &[u8]) -> u32 {
    let mut bytes = [0u8; NONCE_SIZE];
    bytes.copy_from_slice(&blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);
    u32::from_le_bytes(bytes)
}

/// Writes the nonce field of a blob buffer
pub fn write_nonce(blob: &mut [u8], nonce: u32) {
    blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE].copy_from_slice(&nonce.to_le_bytes());
}

/// Stratum-style job notification as received from the pool layer
#[derive(Debug, Clone, Deserialize)]
pub struct JobNotification {
    /// Pool job identifier
    pub job_id: String,
    /// Hex-encoded blob
    pub blob: String,
    /// Hex-encoded target
    pub target: String,
    /// Algorithm name, falls back to the configured algorithm
    #[serde(default)]
    pub algo: Option<String>,
    /// Pool reserves the nonce's top byte
    #[serde(default)]
    pub nicehash: bool,
    /// Originating pool connection
    #[serde(default)]
    pub pool_id: i32,
}

impl JobNotification {
    /// Validates the notification and turns it into a [`Job`]
    pub fn into_job(self, default_algorithm: AlgorithmType) -> Result<Job, MinerError> {
        let algorithm = match self.algo.as_deref() {
            Some(name) => name.parse::<AlgorithmType>().map_err(MinerError::InvalidJob)?,
            None => default_algorithm,
        };

        if self.pool_id < 0 {
            return Err(MinerError::InvalidJob(format!("negative pool id {}", self.pool_id)));
        }
        if self.job_id.is_empty() {
            return Err(MinerError::InvalidJob("empty job id".into()));
        }

        Job::from_hex(
            self.pool_id,
            &self.job_id,
            algorithm,
            &self.blob,
            &self.target,
            self.nicehash,
        )
    }
}

/// Represents a digest that met its job's target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Pool connection the job came from
    pub pool_id: i32,
    /// Job id this result belongs to
    pub job_id: String,
    /// Nonce that produced the digest
    pub nonce: u32,
    /// Resulting digest
    pub digest: [u8; 32],
    /// Job difficulty at the time of hashing
    pub difficulty: u64,
    /// Algorithm used
    pub algorithm: AlgorithmType,
}

impl JobResult {
    /// Creates a result for `job`
    pub fn new(job: &Job, nonce: u32, digest: [u8; 32]) -> Self {
        JobResult {
            pool_id: job.pool_id(),
            job_id: job.id().to_string(),
            nonce,
            digest,
            difficulty: job.difficulty(),
            algorithm: job.algorithm(),
        }
    }

    /// Difficulty the digest actually reached
    pub fn actual_diff(&self) -> u64 {
        target_to_difficulty(top64(&self.digest))
    }

    /// Submission parameters in the form pools expect
    pub fn to_submit_json(&self) -> Value {
        json!({
            "pool_id": self.pool_id,
            "job_id": self.job_id,
            "nonce": hex::encode(self.nonce.to_le_bytes()),
            "result": hex::encode(self.digest),
            "algo": self.algorithm.to_string(),
        })
    }
}
