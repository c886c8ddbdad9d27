//! Server-wide configuration, parsed from the command line via `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for a single `whiplru-server` process.
#[derive(Debug, Clone, Parser)]
#[command(name = "whiplru-server", about = "WHIP-LRU caching asset server")]
pub struct ServerConfig {
    /// Address to bind the listener to.
    #[arg(long, env = "WHIPLRU_LISTEN_ADDRESS", default_value = "0.0.0.0")]
    pub listen_address: String,

    /// Port to bind the listener to.
    #[arg(long, env = "WHIPLRU_LISTEN_PORT", default_value_t = 9001)]
    pub listen_port: u16,

    /// TCP accept backlog.
    #[arg(long, env = "WHIPLRU_LISTEN_BACKLOG", default_value_t = 1024)]
    pub listen_backlog: u32,

    /// Shared secret clients must answer the auth challenge with.
    #[arg(long, env = "WHIPLRU_PASSWORD")]
    pub password: String,

    /// Root directory partitions are stored under.
    #[arg(long, env = "WHIPLRU_STORAGE_ROOT", default_value = "./whiplru-data")]
    pub local_storage_root: PathBuf,

    /// Total byte budget across all local partitions.
    #[arg(long, env = "WHIPLRU_STORAGE_MAX_BYTES", default_value_t = 10 * 1024 * 1024 * 1024)]
    pub local_storage_max_bytes: u64,

    /// Path to the write-forward log's backing file.
    #[arg(long, env = "WHIPLRU_WRITE_CACHE_PATH", default_value = "./whiplru-data/write-forward.log")]
    pub write_cache_path: PathBuf,

    /// Number of fixed slots in the write-forward log.
    #[arg(long, env = "WHIPLRU_WRITE_CACHE_SLOTS", default_value_t = 4096)]
    pub write_cache_slot_count: usize,

    /// Seconds between automatic partition rotations.
    #[arg(long, env = "WHIPLRU_PARTITION_INTERVAL_SECONDS", default_value_t = 3600)]
    pub partition_interval_seconds: u64,

    /// Sliding TTL, in seconds, for the negative cache. Zero disables it.
    #[arg(long, env = "WHIPLRU_NEGATIVE_CACHE_TTL_SECONDS", default_value_t = 30)]
    pub negative_cache_ttl_seconds: u64,

    /// Maximum simultaneous connections before new accepts are load-shed.
    #[arg(long, env = "WHIPLRU_MAX_CONNECTIONS", default_value_t = 4096)]
    pub max_connections: usize,

    /// Per-request timeout, in seconds.
    #[arg(long, env = "WHIPLRU_REQUEST_TIMEOUT_SECONDS", default_value_t = 30)]
    pub request_timeout_seconds: u64,
}

impl ServerConfig {
    #[must_use]
    pub fn partition_interval(&self) -> Duration {
        Duration::from_secs(self.partition_interval_seconds)
    }

    #[must_use]
    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_password_from_args() {
        let config = ServerConfig::parse_from(["whiplru-server", "--password", "hunter2"]);
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.listen_port, 9001);
        assert_eq!(config.negative_cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_apply() {
        let config = ServerConfig::parse_from([
            "whiplru-server",
            "--password",
            "hunter2",
            "--listen-port",
            "9100",
            "--partition-interval-seconds",
            "120",
        ]);
        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.partition_interval(), Duration::from_secs(120));
    }
}
