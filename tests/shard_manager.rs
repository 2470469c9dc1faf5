mod common;

use shard_core::models::ShardId;
use shard_core::sharding::ShardManager;
use shard_core::CoreError;
use tempfile::TempDir;

#[tokio::test]
async fn initializes_configured_shard_count() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 4));
    manager.initialize().await.unwrap();

    let shards = manager.list_shards().await;
    assert_eq!(shards.len(), 4);
    for shard in &shards {
        assert!(shard.is_active());
        assert!(shard.file_path.exists());
    }
    manager.shutdown().await;
}

#[tokio::test]
async fn create_and_remove_empty_shard() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();

    let new_shard = ShardId::new(2, 2);
    manager.create_shard(new_shard.clone()).await.unwrap();
    assert!(manager.list_shards().await.iter().any(|s| s.shard_id == new_shard));

    manager.remove_shard(&new_shard).await.unwrap();
    assert!(!manager.list_shards().await.iter().any(|s| s.shard_id == new_shard));
    manager.shutdown().await;
}

#[tokio::test]
async fn creating_existing_shard_fails() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();

    let result = manager.create_shard(ShardId::new(0, 2)).await;
    assert!(matches!(result, Err(CoreError::ShardExists(_))));
    manager.shutdown().await;
}

#[tokio::test]
async fn removing_nonexistent_shard_fails() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();

    let result = manager.remove_shard(&ShardId::new(9, 2)).await;
    assert!(matches!(result, Err(CoreError::ShardMissing(_))));
    manager.shutdown().await;
}

#[tokio::test]
async fn health_check_probes_every_shard_without_error() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 3));
    manager.initialize().await.unwrap();

    manager.health_check().await.unwrap();
    let shards = manager.list_shards().await;
    assert!(shards.iter().all(|s| s.is_active()));
    manager.shutdown().await;
}

#[tokio::test]
async fn metrics_reflect_empty_shards() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 3));
    manager.initialize().await.unwrap();

    let metrics = manager.metrics().await.unwrap();
    assert_eq!(metrics.total_shards, 3);
    assert_eq!(metrics.active_shards, 3);
    assert_eq!(metrics.total_records, 0);
    manager.shutdown().await;
}
