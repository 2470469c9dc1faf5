use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level configuration for the sharded persistence core, assembled from
/// the environment the same way the rest of the embedding application reads
/// its own configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sharding: ShardingConfig,
    pub pool: PoolConfig,
    pub encryption: EncryptionConfig,
    pub thresholds: ThresholdConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    Hash,
    Range,
    Directory,
    /// An unrecognized strategy name reached config; the router falls back
    /// to `shard_00` for every routing decision (§4.1 failure modes).
    Unknown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfig {
    pub app_data_path: PathBuf,
    pub shard_count: u32,
    pub strategy: RoutingStrategy,
    pub consistent_hashing: bool,
    pub virtual_nodes: u32,
    pub auto_rebalance: bool,
    pub rebalance_interval_ms: u64,
    pub health_check_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub migration_batch_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub enable_wal: bool,
    pub busy_timeout_ms: u64,
    pub cache_size: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub algorithm: String,
    pub kdf: String,
    pub iterations: u32,
    pub key_length: usize,
    pub iv_length: usize,
    pub salt_length: usize,
    pub tag_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub max_records_per_shard: u64,
    pub max_disk_usage_per_shard: u64,
    pub max_connections_per_shard: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            app_data_path: PathBuf::from(env_or_string("CORE_APP_DATA_PATH", "data")),
            shard_count: env_or("CORE_SHARD_COUNT", 4),
            strategy: match env_or_string("CORE_ROUTING_STRATEGY", "hash").as_str() {
                "hash" => RoutingStrategy::Hash,
                "range" => RoutingStrategy::Range,
                "directory" => RoutingStrategy::Directory,
                other => RoutingStrategy::Unknown(other.to_string()),
            },
            consistent_hashing: env_or("CORE_CONSISTENT_HASHING", true),
            virtual_nodes: env_or("CORE_VIRTUAL_NODES", 150),
            auto_rebalance: env_or("CORE_AUTO_REBALANCE", true),
            rebalance_interval_ms: env_or("CORE_REBALANCE_INTERVAL_MS", 3_600_000),
            health_check_interval_ms: env_or("CORE_HEALTH_CHECK_INTERVAL_MS", 300_000),
            metrics_interval_ms: env_or("CORE_METRICS_INTERVAL_MS", 60_000),
            migration_batch_size: env_or("CORE_MIGRATION_BATCH_SIZE", 1_000),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: env_or("CORE_POOL_MAX_CONNECTIONS", 10),
            min_connections: env_or("CORE_POOL_MIN_CONNECTIONS", 2),
            acquire_timeout_ms: env_or("CORE_POOL_ACQUIRE_TIMEOUT_MS", 30_000),
            idle_timeout_ms: env_or("CORE_POOL_IDLE_TIMEOUT_MS", 300_000),
            enable_wal: env_or("CORE_POOL_ENABLE_WAL", true),
            busy_timeout_ms: env_or("CORE_POOL_BUSY_TIMEOUT_MS", 30_000),
            cache_size: env_or("CORE_POOL_CACHE_SIZE", 2_000),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: env_or_string("CORE_ENCRYPTION_ALGORITHM", "AES-256-GCM"),
            kdf: env_or_string("CORE_ENCRYPTION_KDF", "PBKDF2"),
            iterations: env_or("CORE_ENCRYPTION_ITERATIONS", 100_000),
            key_length: env_or("CORE_ENCRYPTION_KEY_LENGTH", 32),
            iv_length: env_or("CORE_ENCRYPTION_IV_LENGTH", 12),
            salt_length: env_or("CORE_ENCRYPTION_SALT_LENGTH", 32),
            tag_length: env_or("CORE_ENCRYPTION_TAG_LENGTH", 16),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_records_per_shard: env_or("CORE_MAX_RECORDS_PER_SHARD", 1_000_000),
            max_disk_usage_per_shard: env_or("CORE_MAX_DISK_USAGE_PER_SHARD", 1 << 30),
            max_connections_per_shard: env_or("CORE_MAX_CONNECTIONS_PER_SHARD", 10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sharding: ShardingConfig::default(),
            pool: PoolConfig::default(),
            encryption: EncryptionConfig::default(),
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.sharding.app_data_path.join("shards")
    }

    pub fn security_dir(&self) -> PathBuf {
        self.sharding.app_data_path.join("security")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.sharding.app_data_path.join("logs")
    }
}
