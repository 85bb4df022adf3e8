// crates/partid-daemon/src/config.rs
//
// Runtime configuration for the PartID daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use partid_engine::EngineConfig;
use partid_rpc::middleware::RateLimitConfig;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Directory for local data storage (RocksDB catalog and weight state).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Host address for the RPC server.
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    /// Port for the RPC server.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between maintenance passes (prune, then rebuild if due).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Rebuild once delta plus tombstones exceed this share of the index.
    #[serde(default = "default_rebuild_delta_ratio")]
    pub rebuild_delta_ratio: f64,

    /// Rebuild an index older than this if it has any churn.
    #[serde(default = "default_max_index_age_secs")]
    pub max_index_age_secs: i64,

    /// JSON file of catalog entries upserted at startup.
    #[serde(default)]
    pub catalog_seed: Option<String>,

    /// Keep everything in memory instead of opening RocksDB.
    #[serde(default)]
    pub in_memory: bool,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_data_dir() -> String {
    "~/.partid/data".to_string()
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    50061
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_maintenance_interval_secs() -> u64 {
    300
}

fn default_rebuild_delta_ratio() -> f64 {
    0.2
}

fn default_max_index_age_secs() -> i64 {
    3600
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            log_level: default_log_level(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            rebuild_delta_ratio: default_rebuild_delta_ratio(),
            max_index_age_secs: default_max_index_age_secs(),
            catalog_seed: None,
            in_memory: false,
            rate_limit: RateLimitConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: DaemonConfig = toml::from_str(contents)?;
        config.engine.validate()?;
        if !(0.0..=1.0).contains(&config.rebuild_delta_ratio) {
            return Err(format!(
                "rebuild_delta_ratio {} outside [0, 1]",
                config.rebuild_delta_ratio
            )
            .into());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config.rpc_port, 50061);
        assert_eq!(config.maintenance_interval_secs, 300);
        assert_eq!(config.engine.dimension, 512);
        assert!(config.catalog_seed.is_none());
    }

    #[test]
    fn test_nested_engine_table() {
        let config = DaemonConfig::from_toml(
            r#"
            rpc_port = 7000
            in_memory = true

            [engine]
            dimension = 128

            [engine.matcher]
            k1 = 20

            [rate_limit]
            max_rps = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.rpc_port, 7000);
        assert!(config.in_memory);
        assert_eq!(config.engine.dimension, 128);
        assert_eq!(config.engine.matcher.k1, 20);
        assert_eq!(config.engine.matcher.k2, 5);
        assert_eq!(config.rate_limit.max_rps, 5);
        assert_eq!(config.rate_limit.burst_size, 200);
    }

    #[test]
    fn test_bad_ratio_rejected() {
        assert!(DaemonConfig::from_toml("rebuild_delta_ratio = 1.5").is_err());
    }
}
