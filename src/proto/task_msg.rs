//! Task message (czar -> worker), spec.md §6.2.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScanTableInfo {
    pub db: String,
    pub table: String,
    pub scan_rating: i32,
    pub lock_in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Fragment {
    pub queries: Vec<String>,
    pub subchunk_ids: Option<Vec<i32>>,
    pub result_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMsg {
    pub session_id: u64,
    pub chunk_id: i32,
    pub db: String,
    pub scan_priority: Option<i32>,
    pub scan_tables: Vec<ScanTableInfo>,
    pub fragments: Vec<Fragment>,
}

impl TaskMsg {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let cfg = bincode::config::standard();
        Ok(bincode::serde::encode_to_vec(self, cfg)?)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let cfg = bincode::config::standard();
        let (msg, _consumed): (TaskMsg, usize) = bincode::serde::decode_from_slice(buf, cfg)?;
        Ok(msg)
    }

    /// Stable digest over the serialized bytes. Two tasks with identical
    /// digest are deduplicable (spec.md §6.2).
    pub fn task_hash(&self) -> u64 {
        let encoded = self.encode().expect("TaskMsg always encodes");
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        encoded.hash(&mut hasher);
        hasher.finish()
    }
}
