use std::collections::BTreeMap;

use md5::{Digest as _, Md5};
use sha2::{Digest as _, Sha256};
use tokio::sync::RwLock;

use crate::config::RoutingStrategy;
use crate::error::{CoreError, CoreResult};
use crate::models::ShardId;

fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn md5_index(key: &str, shard_count: u32) -> u32 {
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest[0..4]);
    u32::from_be_bytes(prefix) % shard_count.max(1)
}

fn zero_padded_width(shard_count: u32) -> usize {
    let highest_index = shard_count.saturating_sub(1);
    highest_index.to_string().len().max(2)
}

/// Virtual-node hash ring. Treated as an immutable snapshot swapped
/// atomically on rebuild (§9) so routing lookups never block on a writer.
#[derive(Debug, Clone, Default)]
pub struct ConsistentHashRing {
    points: BTreeMap<[u8; 32], ShardId>,
}

impl ConsistentHashRing {
    pub fn build(active_shards: &[ShardId], virtual_nodes: u32) -> Self {
        let mut points = BTreeMap::new();
        for shard in active_shards {
            for i in 0..virtual_nodes {
                let virtual_key = format!("{}:{}", shard.as_str(), i);
                points.insert(sha256_digest(virtual_key.as_bytes()), shard.clone());
            }
        }
        Self { points }
    }

    pub fn route(&self, routing_key: &str) -> Option<ShardId> {
        if self.points.is_empty() {
            return None;
        }
        let key_hash = sha256_digest(routing_key.as_bytes());
        self.points
            .range(key_hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, shard)| shard.clone())
    }

    pub fn virtual_node_count(&self) -> usize {
        self.points.len()
    }
}

struct RouterSnapshot {
    ring: ConsistentHashRing,
    total_shard_count: u32,
    width: usize,
}

/// C1 — maps `(entityType, entityId, parentId)` to a shard id. A pure
/// function of the current active shard set and the inputs (§4.1).
pub struct ShardRouter {
    strategy: RoutingStrategy,
    consistent_hashing: bool,
    virtual_nodes: u32,
    snapshot: RwLock<RouterSnapshot>,
}

impl ShardRouter {
    pub fn new(strategy: RoutingStrategy, consistent_hashing: bool, virtual_nodes: u32) -> Self {
        Self {
            strategy,
            consistent_hashing,
            virtual_nodes,
            snapshot: RwLock::new(RouterSnapshot {
                ring: ConsistentHashRing::default(),
                total_shard_count: 0,
                width: 2,
            }),
        }
    }

    /// Rebuilds the ring. `all_shards` is every known shard id (used for the
    /// plain-hash/directory index space); `active_shards` is the subset the
    /// consistent-hash ring routes to. Triggered on createShard, removeShard,
    /// or a shard's active/inactive transition (§4.1).
    pub async fn rebuild(&self, all_shards: &[ShardId], active_shards: &[ShardId]) {
        let ring = ConsistentHashRing::build(active_shards, self.virtual_nodes);
        let total_shard_count = all_shards.len() as u32;
        let width = zero_padded_width(total_shard_count);
        let mut snapshot = self.snapshot.write().await;
        *snapshot = RouterSnapshot {
            ring,
            total_shard_count,
            width,
        };
    }

    pub async fn shard_for(
        &self,
        _entity_type: &str,
        entity_id: &str,
        parent_id: Option<&str>,
    ) -> CoreResult<ShardId> {
        let snapshot = self.snapshot.read().await;

        match &self.strategy {
            RoutingStrategy::Unknown(_) => Ok(ShardId::fallback()),
            RoutingStrategy::Hash => {
                if self.consistent_hashing {
                    let routing_key = match parent_id {
                        Some(parent) => format!("{}:{}", parent, entity_id),
                        None => entity_id.to_string(),
                    };
                    snapshot.ring.route(&routing_key).ok_or(CoreError::ShardUnavailable)
                } else {
                    let index = md5_index(entity_id, snapshot.total_shard_count);
                    Ok(ShardId::new(index, snapshot.width))
                }
            }
            // If a parent is supplied, hash the parent id so children land
            // where their owner lives. With no parent, the entity is its own
            // owner (e.g. a persona): hash its own id rather than collapsing
            // every top-level entity onto shard 0, which is what keeps
            // `shardFor("memory", m.id, p.id) == shardFor("persona", p.id)`
            // true (§8). Shard 0 is reserved for the degenerate case of an
            // entirely empty routing key.
            RoutingStrategy::Directory => {
                let routing_key = parent_id.unwrap_or(entity_id);
                if routing_key.is_empty() {
                    Ok(ShardId::new(0, snapshot.width))
                } else {
                    let index = md5_index(routing_key, snapshot.total_shard_count);
                    Ok(ShardId::new(index, snapshot.width))
                }
            }
            // No range-bound semantics are specified for this strategy; fall
            // back to the plain-hash index space over the entity id.
            RoutingStrategy::Range => {
                let index = md5_index(entity_id, snapshot.total_shard_count);
                Ok(ShardId::new(index, snapshot.width))
            }
        }
    }

    pub async fn virtual_node_count(&self) -> usize {
        self.snapshot.read().await.ring.virtual_node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_ids(n: u32) -> Vec<ShardId> {
        (0..n).map(|i| ShardId::new(i, 2)).collect()
    }

    #[tokio::test]
    async fn routing_is_deterministic() {
        let router = ShardRouter::new(RoutingStrategy::Hash, true, 150);
        let shards = shard_ids(4);
        router.rebuild(&shards, &shards).await;

        let a = router.shard_for("persona", "abc-123", None).await.unwrap();
        let b = router.shard_for("persona", "abc-123", None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn no_active_shards_is_unavailable() {
        let router = ShardRouter::new(RoutingStrategy::Hash, true, 150);
        router.rebuild(&[], &[]).await;
        let result = router.shard_for("persona", "abc-123", None).await;
        assert!(matches!(result, Err(CoreError::ShardUnavailable)));
    }

    #[tokio::test]
    async fn directory_strategy_colocates_children_with_parent() {
        let router = ShardRouter::new(RoutingStrategy::Directory, false, 150);
        let shards = shard_ids(4);
        router.rebuild(&shards, &shards).await;

        let parent = router.shard_for("persona", "persona-1", None).await.unwrap();
        let child = router.shard_for("memory", "memory-1", Some("persona-1")).await.unwrap();
        assert_eq!(parent, child);
    }

    #[tokio::test]
    async fn directory_strategy_empty_key_falls_back_to_shard_zero() {
        let router = ShardRouter::new(RoutingStrategy::Directory, false, 150);
        let shards = shard_ids(4);
        router.rebuild(&shards, &shards).await;
        let result = router.shard_for("persona", "", None).await.unwrap();
        assert_eq!(result, ShardId::new(0, 2));
    }

    #[tokio::test]
    async fn unknown_strategy_falls_back_to_shard_00() {
        let router = ShardRouter::new(RoutingStrategy::Unknown("bogus".to_string()), true, 150);
        let shards = shard_ids(4);
        router.rebuild(&shards, &shards).await;
        let result = router.shard_for("persona", "abc-123", None).await.unwrap();
        assert_eq!(result, ShardId::fallback());
    }

    #[tokio::test]
    async fn distribution_is_reasonably_uniform() {
        let router = ShardRouter::new(RoutingStrategy::Hash, true, 150);
        let shards = shard_ids(5);
        router.rebuild(&shards, &shards).await;

        let mut counts = std::collections::HashMap::new();
        for i in 0..1000 {
            let key = format!("entity-{}", i);
            let shard = router.shard_for("memory", &key, None).await.unwrap();
            *counts.entry(shard).or_insert(0u32) += 1;
        }

        for (shard, count) in counts {
            assert!(count < 600, "shard {} got too many keys: {}", shard, count);
        }
    }
}
