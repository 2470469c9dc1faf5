use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};

use crate::config::PoolConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::ShardId;

/// A loaned SQLite handle with usage metadata (§3). Exclusively owned by the
/// pool; loaned to at most one operation at a time.
pub struct PooledConnection {
    pub id: u64,
    conn: Option<Connection>,
    created_at: Instant,
    last_used: Instant,
    query_count: u64,
}

struct PoolState {
    available: VecDeque<PooledConnection>,
    in_use_count: u32,
    total_count: u32,
    closed: bool,
}

/// Increments a waiting-requests counter for its lifetime. Runs the
/// decrement on `Drop` so a cancelled `acquire` (the future dropped mid
/// `tokio::select!`) never leaks the count (§5).
struct WaitingGuard<'a> {
    counter: &'a AtomicU32,
}

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
    pub waiting_for_connection: u32,
    pub connection_wait_time_ms: f64,
    pub connection_creation_failures: u64,
}

/// C2 — a bounded, reusable pool of DB handles for one shard file (§4.2).
pub struct ConnectionPool {
    shard_id: ShardId,
    file_path: PathBuf,
    config: PoolConfig,
    state: Mutex<PoolState>,
    notify: Notify,
    next_conn_id: AtomicU64,
    waiting_count: AtomicU32,
    creation_failures: AtomicU64,
    wait_time_total_ms: AtomicU64,
    wait_count: AtomicU64,
}

impl ConnectionPool {
    pub fn new(shard_id: ShardId, file_path: PathBuf, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            shard_id,
            file_path,
            config,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                in_use_count: 0,
                total_count: 0,
                closed: false,
            }),
            notify: Notify::new(),
            next_conn_id: AtomicU64::new(1),
            waiting_count: AtomicU32::new(0),
            creation_failures: AtomicU64::new(0),
            wait_time_total_ms: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        })
    }

    /// Opens enough connections to satisfy `minConnections` up front.
    pub async fn warm_up(self: &Arc<Self>) -> CoreResult<()> {
        loop {
            let need_more = {
                let state = self.state.lock().await;
                state.total_count < self.config.min_connections
            };
            if !need_more {
                return Ok(());
            }
            let conn = self.open_connection().await?;
            let mut state = self.state.lock().await;
            state.total_count += 1;
            state.available.push_back(conn);
        }
    }

    async fn open_connection(&self) -> CoreResult<PooledConnection> {
        let path = self.file_path.clone();
        let config = self.config.clone();
        let shard_id = self.shard_id.clone();
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let result = tokio::task::spawn_blocking(move || -> CoreResult<PooledConnection> {
            let conn = Connection::open(&path).map_err(|e| CoreError::sql(shard_id.clone(), e))?;
            if config.enable_wal {
                conn.pragma_update(None, "journal_mode", "WAL")
                    .map_err(|e| CoreError::sql(shard_id.clone(), e))?;
            }
            conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms as i64)
                .map_err(|e| CoreError::sql(shard_id.clone(), e))?;
            conn.pragma_update(None, "cache_size", config.cache_size)
                .map_err(|e| CoreError::sql(shard_id.clone(), e))?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .map_err(|e| CoreError::sql(shard_id.clone(), e))?;

            let now = Instant::now();
            Ok(PooledConnection {
                id,
                conn: Some(conn),
                created_at: now,
                last_used: now,
                query_count: 0,
            })
        })
        .await
        .map_err(|e| CoreError::Internal(anyhow::anyhow!(e)))?;

        if result.is_err() {
            self.creation_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Acquire algorithm (§4.2): pop an available connection, else construct
    /// one under the cap, else park until release or timeout.
    pub async fn acquire(self: &Arc<Self>) -> CoreResult<ConnectionGuard> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);

        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(CoreError::PoolClosed(self.shard_id.clone()));
                }
                if let Some(mut conn) = state.available.pop_front() {
                    conn.query_count += 1;
                    conn.last_used = Instant::now();
                    state.in_use_count += 1;
                    return Ok(ConnectionGuard::new(self.clone(), conn));
                }
                if state.total_count < self.config.max_connections {
                    state.total_count += 1;
                    drop(state);

                    return match self.open_connection().await {
                        Ok(conn) => {
                            let mut state = self.state.lock().await;
                            state.in_use_count += 1;
                            Ok(ConnectionGuard::new(self.clone(), conn))
                        }
                        Err(e) => {
                            let mut state = self.state.lock().await;
                            state.total_count -= 1;
                            Err(e)
                        }
                    };
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::AcquireTimeout {
                    shard: self.shard_id.clone(),
                    waited_ms: self.config.acquire_timeout_ms,
                });
            }

            let _waiting = WaitingGuard::new(&self.waiting_count);
            let wait_started = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            let poll_slice = remaining.min(Duration::from_millis(50));

            let notified = self.notify.notified();
            tokio::pin!(notified);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_slice) => {}
            }
            drop(_waiting);
            self.wait_time_total_ms
                .fetch_add(wait_started.elapsed().as_millis() as u64, Ordering::Relaxed);
            self.wait_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn release(&self, mut conn: PooledConnection) {
        conn.last_used = Instant::now();
        let mut state = self.state.lock().await;
        state.in_use_count = state.in_use_count.saturating_sub(1);
        if state.closed {
            state.total_count = state.total_count.saturating_sub(1);
            drop(state);
        } else {
            state.available.push_back(conn);
            drop(state);
        }
        self.notify.notify_one();
    }

    /// Health check (§4.2): drop idle-expired available connections, then
    /// top up to `minConnections`. Never touches in-use connections.
    pub async fn health_check(&self) {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let mut dropped = 0u32;
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(state.available.len());
            while let Some(conn) = state.available.pop_front() {
                if now.duration_since(conn.last_used) > idle_timeout {
                    dropped += 1;
                } else {
                    kept.push_back(conn);
                }
            }
            state.available = kept;
            state.total_count = state.total_count.saturating_sub(dropped);
        }

        loop {
            let need_more = {
                let state = self.state.lock().await;
                (state.available.len() as u32 + state.in_use_count) < self.config.min_connections
            };
            if !need_more {
                break;
            }
            match self.open_connection().await {
                Ok(conn) => {
                    let mut state = self.state.lock().await;
                    state.total_count += 1;
                    state.available.push_back(conn);
                }
                Err(_) => break,
            }
        }
    }

    /// Shutdown (§4.2): close available connections, log still-in-use ones,
    /// clear state, refuse further operations with `PoolClosed`.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if state.in_use_count > 0 {
            tracing::warn!(
                shard = %self.shard_id,
                in_use = state.in_use_count,
                "shutting down pool with connections still in use"
            );
        }
        state.available.clear();
        state.total_count = 0;
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let wait_count = self.wait_count.load(Ordering::Relaxed);
        let avg_wait_ms = if wait_count > 0 {
            self.wait_time_total_ms.load(Ordering::Relaxed) as f64 / wait_count as f64
        } else {
            0.0
        };
        PoolStats {
            total_connections: state.total_count,
            active_connections: state.in_use_count,
            idle_connections: state.available.len() as u32,
            waiting_for_connection: self.waiting_count.load(Ordering::Relaxed),
            connection_wait_time_ms: avg_wait_ms,
            connection_creation_failures: self.creation_failures.load(Ordering::Relaxed),
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }
}

/// RAII loan of a [`PooledConnection`]. SQL calls execute on the blocking
/// pool via [`ConnectionGuard::with`]; dropping the guard returns the
/// connection to the pool even if the holding task is cancelled mid-await
/// (§5).
pub struct ConnectionGuard {
    pool: Arc<ConnectionPool>,
    conn: Option<PooledConnection>,
}

impl ConnectionGuard {
    fn new(pool: Arc<ConnectionPool>, conn: PooledConnection) -> Self {
        Self { pool, conn: Some(conn) }
    }

    pub async fn with<F, R>(&mut self, f: F) -> CoreResult<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut conn = self.conn.take().expect("connection guard used after release");
        let shard = self.pool.shard_id().clone();
        let (result, conn) = tokio::task::spawn_blocking(move || {
            let r = f(conn.conn.as_ref().expect("connection handle missing"));
            (r, conn)
        })
        .await
        .map_err(|e| CoreError::Internal(anyhow::anyhow!(e)))?;
        self.conn = Some(conn);
        result.map_err(|e| CoreError::sql(shard, e))
    }

    pub fn query_count(&self) -> u64 {
        self.conn.as_ref().map(|c| c.query_count).unwrap_or(0)
    }

    pub fn created_at(&self) -> Instant {
        self.conn.as_ref().map(|c| c.created_at).unwrap_or_else(Instant::now)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(conn).await;
            });
        }
    }
}
