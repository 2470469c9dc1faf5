use thiserror::Error;

use crate::sharding::ShardId;

/// The full error taxonomy for the sharded persistence core.
///
/// Every fallible boundary (route, acquire, migrate, encrypt, decrypt,
/// classify, audit) returns one of these variants rather than a single
/// stringly-typed error.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no active shards are available to route to")]
    ShardUnavailable,

    #[error("shard '{0}' is not known to the shard manager")]
    ShardMissing(ShardId),

    #[error("shard '{0}' already exists")]
    ShardExists(ShardId),

    #[error("shard '{0}' is not empty and cannot be removed ({record_count} records)")]
    ShardNotEmpty { shard: ShardId, record_count: u64 },

    #[error("timed out waiting {waited_ms}ms to acquire a connection for shard '{shard}'")]
    AcquireTimeout { shard: ShardId, waited_ms: u64 },

    #[error("connection pool for shard '{0}' is closed")]
    PoolClosed(ShardId),

    #[error("sql error on shard '{shard}' ({category}): {source}")]
    SqlError {
        shard: ShardId,
        category: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("platform secret store is unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("authentication tag mismatch; ciphertext is tampered or corrupt")]
    IntegrityViolation,

    #[error("encryption algorithm '{0}' is not supported")]
    AlgorithmUnsupported(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("migration from '{src}' to '{dst}' was interrupted after {migrated} of {planned} rows")]
    MigrationPartialFailure {
        src: ShardId,
        dst: ShardId,
        migrated: u64,
        planned: u64,
    },

    #[error("passphrase verification failed; master key was not rotated")]
    PassphraseMismatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Wrap a raw `rusqlite` error with shard context, the way §7 requires
    /// SQL failures to be tagged with shard id and a coarse category.
    pub fn sql(shard: impl Into<ShardId>, source: rusqlite::Error) -> Self {
        let category = match &source {
            rusqlite::Error::QueryReturnedNoRows => "no_rows",
            rusqlite::Error::SqliteFailure(..) => "sqlite_failure",
            rusqlite::Error::InvalidParameterName(_) => "invalid_parameter",
            rusqlite::Error::InvalidColumnType(..) => "invalid_column_type",
            _ => "other",
        }
        .to_string();
        CoreError::SqlError {
            shard: shard.into(),
            category,
            source,
        }
    }
}
