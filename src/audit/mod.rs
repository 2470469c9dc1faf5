//! C9 — bounded in-memory audit tail plus an append-only on-disk log in a
//! shard-independent file (§4.9).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::PoolConfig;
use crate::error::CoreResult;
use crate::models::{AuditEntry, ShardId};
use crate::sharding::pool::ConnectionPool;
use crate::sharding::schema::AUDIT_SCHEMA;

const MEMORY_CAP: usize = 1_000;
const DECIMATE_TO: usize = 500;

/// Append-only audit trail. The in-memory tail is a bounded ring buffer
/// (decimated on overflow); persistence to disk is best-effort and never
/// blocks the caller's view of the tail.
pub struct AuditLog {
    buffer: RwLock<VecDeque<AuditEntry>>,
    pool: Option<Arc<ConnectionPool>>,
}

impl AuditLog {
    pub async fn initialize(file_path: PathBuf, pool_config: PoolConfig) -> CoreResult<Arc<Self>> {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = ConnectionPool::new(ShardId::from("audit"), file_path, pool_config);
        pool.warm_up().await?;
        let mut guard = pool.acquire().await?;
        guard.with(|conn| conn.execute_batch(AUDIT_SCHEMA)).await?;
        drop(guard);
        Ok(Arc::new(Self {
            buffer: RwLock::new(VecDeque::new()),
            pool: Some(pool),
        }))
    }

    /// An audit log with no disk-backed counterpart, for tests and for
    /// embedders that don't want a separate audit file.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            buffer: RwLock::new(VecDeque::new()),
            pool: None,
        })
    }

    pub async fn record(&self, entry: AuditEntry) {
        {
            let mut buffer = self.buffer.write().await;
            buffer.push_back(entry.clone());
            if buffer.len() > MEMORY_CAP {
                let overflow = buffer.len() - DECIMATE_TO;
                for _ in 0..overflow {
                    buffer.pop_front();
                }
            }
        }
        if let Some(pool) = &self.pool {
            if let Err(e) = persist(pool, &entry).await {
                tracing::warn!(error = %e, "failed to persist audit entry to disk");
            }
        }
    }

    pub async fn tail(&self) -> Vec<AuditEntry> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

async fn persist(pool: &Arc<ConnectionPool>, entry: &AuditEntry) -> CoreResult<()> {
    let mut guard = pool.acquire().await?;
    let id = entry.id.to_string();
    let ts = entry.timestamp.to_rfc3339();
    let kind = entry.action.clone();
    let severity = format!("{:?}", entry.severity).to_lowercase();
    let description = format!("{} {} by {}", entry.action, entry.resource, entry.actor);
    let details = serde_json::to_string(&entry.details).unwrap_or_default();

    guard
        .with(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (id, ts, type, severity, description, details) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, ts, kind, severity, description, details],
            )
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditOutcome;
    use serde_json::json;

    #[tokio::test]
    async fn ring_buffer_decimates_on_overflow() {
        let log = AuditLog::in_memory();
        for i in 0..(MEMORY_CAP + 10) {
            log.record(AuditEntry::new("test", "actor", format!("res-{i}"), AuditOutcome::Success, json!({})))
                .await;
        }
        let tail = log.tail().await;
        assert_eq!(tail.len(), DECIMATE_TO);
        assert_eq!(tail.last().unwrap().resource, format!("res-{}", MEMORY_CAP + 9));
    }
}
