use std::path::Path;

use shard_core::config::{Config, EncryptionConfig, PoolConfig, RoutingStrategy, ShardingConfig, ThresholdConfig};

/// A config with low PBKDF2 iterations and small pools, tuned for fast tests
/// rather than production security margins.
pub fn test_config(data_dir: &Path, shard_count: u32) -> Config {
    Config {
        sharding: ShardingConfig {
            app_data_path: data_dir.to_path_buf(),
            shard_count,
            strategy: RoutingStrategy::Hash,
            consistent_hashing: true,
            virtual_nodes: 50,
            auto_rebalance: false,
            rebalance_interval_ms: 3_600_000,
            health_check_interval_ms: 300_000,
            metrics_interval_ms: 60_000,
            migration_batch_size: 1_000,
        },
        pool: PoolConfig {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_ms: 2_000,
            idle_timeout_ms: 300_000,
            enable_wal: true,
            busy_timeout_ms: 5_000,
            cache_size: 500,
        },
        encryption: EncryptionConfig {
            algorithm: "AES-256-GCM".to_string(),
            kdf: "PBKDF2".to_string(),
            iterations: 1_000,
            key_length: 32,
            iv_length: 12,
            salt_length: 32,
            tag_length: 16,
        },
        thresholds: ThresholdConfig {
            max_records_per_shard: 1_000_000,
            max_disk_usage_per_shard: 1 << 30,
            max_connections_per_shard: 10,
        },
    }
}
