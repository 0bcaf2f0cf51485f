use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Worker-side configuration: scheduler bands, memory budget, thread pool
/// size. Loading from a file/service is out of scope (spec.md §1); a TOML
/// blob can be handed to [`WorkerConfig::from_toml_str`] when that
/// collaborator exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Total size of the fixed thread pool (spec.md §4.5). BlendScheduler
    /// needs at least `num_sub_schedulers + 1` to make progress.
    pub pool_size: usize,
    /// Memory manager's locked-bytes budget.
    pub memory_budget_bytes: u64,
    /// Group scheduler's max coalesced run length.
    pub group_max_group_size: usize,
    /// Group scheduler's max concurrently in-flight tasks.
    pub group_max_in_flight: usize,
    /// Group scheduler's desired thread reserve.
    pub group_max_reserve: usize,
    /// Per-scan-class configuration, ordered fast -> medium -> slow.
    pub scan_classes: Vec<ScanClassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanClassConfig {
    pub name: String,
    pub min_rating: i32,
    pub max_rating: i32,
    pub max_in_flight: usize,
    pub max_reserve: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            memory_budget_bytes: 4 * 1024 * 1024 * 1024,
            group_max_group_size: 4,
            group_max_in_flight: 4,
            group_max_reserve: 2,
            scan_classes: vec![
                ScanClassConfig {
                    name: "fast".to_string(),
                    min_rating: 0,
                    max_rating: 9,
                    max_in_flight: 4,
                    max_reserve: 2,
                },
                ScanClassConfig {
                    name: "medium".to_string(),
                    min_rating: 10,
                    max_rating: 19,
                    max_in_flight: 3,
                    max_reserve: 2,
                },
                ScanClassConfig {
                    name: "slow".to_string(),
                    min_rating: 20,
                    max_rating: i32::MAX,
                    max_in_flight: 2,
                    max_reserve: 2,
                },
            ],
        }
    }
}

impl WorkerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml_lite::parse(s).map_err(|e| FabricError::Config(e.to_string()))
    }
}

/// Czar-side configuration: retry ceiling, per-query deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CzarConfig {
    /// Retry ceiling; spec.md §9(b) defers policy, a small positive integer.
    pub max_retries: u32,
    /// User-query-level deadline in seconds; 0 disables the deadline.
    pub query_deadline_secs: u64,
}

impl Default for CzarConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            query_deadline_secs: 300,
        }
    }
}

/// Minimal hand-rolled TOML reader covering the flat `key = value` shape our
/// configs need. Full TOML parsing is a config-loading concern and is out of
/// scope (spec.md §1); this just keeps `from_toml_str` honest without
/// pulling in a dependency the rest of the crate never otherwise needs.
mod toml_lite {
    use super::WorkerConfig;

    pub fn parse(s: &str) -> std::result::Result<WorkerConfig, String> {
        let mut cfg = WorkerConfig::default();
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "pool_size" => {
                    cfg.pool_size = value
                        .parse()
                        .map_err(|_| format!("invalid pool_size: {value}"))?
                }
                "memory_budget_bytes" => {
                    cfg.memory_budget_bytes = value
                        .parse()
                        .map_err(|_| format!("invalid memory_budget_bytes: {value}"))?
                }
                "group_max_group_size" => {
                    cfg.group_max_group_size = value
                        .parse()
                        .map_err(|_| format!("invalid group_max_group_size: {value}"))?
                }
                _ => {}
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_config_has_three_scan_classes() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.scan_classes.len(), 3);
    }

    #[test]
    fn from_toml_str_overrides_pool_size() {
        let cfg = WorkerConfig::from_toml_str("pool_size = 16\n").unwrap();
        assert_eq!(cfg.pool_size, 16);
    }
}
