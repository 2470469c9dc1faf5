use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::CoreResult;
use crate::models::ShardId;
use crate::sharding::manager::{AggregateMetrics, ShardManager};

/// Events emitted on the service's broadcast bus (§4.7).
#[derive(Debug, Clone, Serialize)]
pub enum ShardEvent {
    ShardCreated { shard: ShardId },
    ShardRemoved { shard: ShardId },
    RebalanceStarted { shard_count: u32 },
    RebalanceCompleted { migrated_count: u64 },
    ShardHealthChanged { shard: ShardId, healthy: bool },
    MigrationStarted { source: ShardId, target: ShardId },
    MigrationCompleted { source: ShardId, target: ShardId, count: u64 },
    MetricsUpdated { metrics: AggregateMetrics },
    Error { message: String },
}

/// C7 — wraps [`ShardManager`] with periodic rebalance/health/metrics timers
/// and publishes their outcomes on a broadcast bus (§4.7).
pub struct ShardingService {
    manager: Arc<ShardManager>,
    config: Config,
    events: broadcast::Sender<ShardEvent>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ShardingService {
    pub fn new(config: Config) -> Arc<Self> {
        let manager = ShardManager::new(config.clone());
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            manager,
            config,
            events,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn manager(&self) -> &Arc<ShardManager> {
        &self.manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.events.subscribe()
    }

    pub async fn initialize(self: &Arc<Self>) -> CoreResult<()> {
        self.manager.initialize().await?;

        if self.config.sharding.auto_rebalance {
            self.spawn_timer(self.config.sharding.rebalance_interval_ms, {
                let this = self.clone();
                move || {
                    let this = this.clone();
                    async move { this.run_rebalance().await }
                }
            });
        }

        self.spawn_timer(self.config.sharding.health_check_interval_ms, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_health_check().await }
            }
        });

        self.spawn_timer(self.config.sharding.metrics_interval_ms, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_metrics().await }
            }
        });

        Ok(())
    }

    fn spawn_timer<F, Fut>(self: &Arc<Self>, interval_ms: u64, mut make_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                make_tick().await;
            }
        });
        self.tasks.lock().expect("tasks mutex poisoned").push(handle);
    }

    async fn run_rebalance(self: &Arc<Self>) {
        let shard_count = self.manager.active_shard_ids().await.len() as u32;
        let _ = self.events.send(ShardEvent::RebalanceStarted { shard_count });
        match self.manager.rebalance().await {
            Ok(outcomes) => {
                for outcome in &outcomes {
                    let _ = self.events.send(ShardEvent::MigrationCompleted {
                        source: outcome.source.clone(),
                        target: outcome.target.clone(),
                        count: outcome.migrated,
                    });
                }
                let migrated_count = outcomes.iter().map(|o| o.migrated).sum();
                let _ = self.events.send(ShardEvent::RebalanceCompleted { migrated_count });
            }
            Err(e) => {
                let _ = self.events.send(ShardEvent::Error { message: e.to_string() });
            }
        }
    }

    async fn run_health_check(self: &Arc<Self>) {
        let before = self.manager.list_shards().await;
        if let Err(e) = self.manager.health_check().await {
            let _ = self.events.send(ShardEvent::Error { message: e.to_string() });
            return;
        }
        let after = self.manager.list_shards().await;
        for prev in &before {
            if let Some(now) = after.iter().find(|s| s.shard_id == prev.shard_id) {
                if now.is_active() != prev.is_active() {
                    let _ = self.events.send(ShardEvent::ShardHealthChanged {
                        shard: now.shard_id.clone(),
                        healthy: now.is_active(),
                    });
                }
            }
        }
    }

    async fn run_metrics(self: &Arc<Self>) {
        match self.manager.metrics().await {
            Ok(metrics) => {
                let _ = self.events.send(ShardEvent::MetricsUpdated { metrics });
            }
            Err(e) => {
                let _ = self.events.send(ShardEvent::Error { message: e.to_string() });
            }
        }
    }

    pub async fn create_shard(self: &Arc<Self>, shard_id: ShardId) -> CoreResult<()> {
        self.manager.create_shard(shard_id.clone()).await?;
        let _ = self.events.send(ShardEvent::ShardCreated { shard: shard_id });
        Ok(())
    }

    pub async fn remove_shard(self: &Arc<Self>, shard_id: &ShardId) -> CoreResult<()> {
        self.manager.remove_shard(shard_id).await?;
        let _ = self.events.send(ShardEvent::ShardRemoved { shard: shard_id.clone() });
        Ok(())
    }

    pub fn update_config(&mut self, config: Config) {
        self.config = config;
    }

    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().expect("tasks mutex poisoned").drain(..) {
            handle.abort();
        }
        self.manager.shutdown().await;
    }
}
