mod common;

use shard_core::audit::AuditLog;
use shard_core::crypto::key_store::{KeyMaterial, MasterKeyStore};
use shard_core::crypto::{Aes256GcmEncryptionService, EncryptionService};
use shard_core::models::{MemoryEntity, MemoryTier, MemoryType, Persona};
use shard_core::protection::DataProtectionManager;
use shard_core::repositories::{MemoryRepository, PersonaRepository};
use shard_core::sharding::ShardManager;
use std::sync::Arc;
use tempfile::TempDir;

async fn build_protection(dir: &std::path::Path) -> Arc<DataProtectionManager> {
    let config = common::test_config(dir, 1).encryption;
    let store = MasterKeyStore::new(dir);
    let encryption: Arc<dyn EncryptionService> =
        Aes256GcmEncryptionService::from_key_material(config, store, KeyMaterial::random(32), vec![0u8; 32]);
    DataProtectionManager::new(encryption, AuditLog::in_memory())
}

#[tokio::test]
async fn persona_round_trips_through_its_shard() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 3));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let personas = PersonaRepository::new(manager.clone(), protection, audit);

    let persona = Persona::new("nova", "a helpful assistant persona");
    personas.create(&persona).await.unwrap();

    let loaded = personas.get_by_id(persona.id).await.unwrap().expect("persona exists");
    assert_eq!(loaded.name, "nova");
    assert_eq!(loaded.personality.temperament, persona.personality.temperament);

    manager.shutdown().await;
}

#[tokio::test]
async fn activate_clears_every_other_persona() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 3));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let personas = PersonaRepository::new(manager.clone(), protection, audit);

    let mut first = Persona::new("first", "");
    first.is_active = true;
    let mut second = Persona::new("second", "");
    second.is_active = false;
    personas.create(&first).await.unwrap();
    personas.create(&second).await.unwrap();

    personas.activate(second.id).await.unwrap();

    let active = personas.get_active().await.unwrap().expect("one active persona");
    assert_eq!(active.id, second.id);

    let all = personas.get_all().await.unwrap();
    assert_eq!(all.iter().filter(|p| p.is_active).count(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn memory_is_colocated_with_its_persona() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 4));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let personas = PersonaRepository::new(manager.clone(), protection.clone(), audit.clone());
    let memories = MemoryRepository::new(manager.clone(), protection, audit);

    let persona = Persona::new("keeper", "");
    let persona_shard = personas.create(&persona).await.unwrap();

    let memory = MemoryEntity::new(persona.id, MemoryType::Text, "the user prefers dark mode");
    let memory_shard = memories.create(&memory).await.unwrap();

    assert_eq!(persona_shard, memory_shard);

    let loaded = memories.get_by_id(memory.id, Some(persona.id)).await.unwrap().expect("memory exists");
    assert_eq!(loaded.content, "the user prefers dark mode");

    manager.shutdown().await;
}

#[tokio::test]
async fn soft_deleted_memory_is_invisible_to_listing() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let memories = MemoryRepository::new(manager.clone(), protection, audit);

    let persona_id = uuid::Uuid::new_v4();
    let memory = MemoryEntity::new(persona_id, MemoryType::Text, "a memory to delete");
    memories.create(&memory).await.unwrap();

    memories.delete(memory.id, persona_id).await.unwrap();

    let loaded = memories.get_by_id(memory.id, Some(persona_id)).await.unwrap();
    assert!(loaded.is_none());

    let all_active = memories.get_all_active().await.unwrap();
    assert!(all_active.iter().all(|m| m.id != memory.id));

    manager.shutdown().await;
}

#[tokio::test]
async fn search_across_shards_matches_substrings() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 4));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let memories = MemoryRepository::new(manager.clone(), protection, audit);

    let persona_id = uuid::Uuid::new_v4();
    for i in 0..8 {
        let content = if i % 2 == 0 {
            format!("memory about hiking trip {i}")
        } else {
            format!("memory about cooking dinner {i}")
        };
        let memory = MemoryEntity::new(persona_id, MemoryType::Text, content);
        memories.create(&memory).await.unwrap();
    }

    let hiking = memories.search_across_shards("hiking", Some(persona_id)).await.unwrap();
    assert_eq!(hiking.len(), 4);
    assert!(hiking.iter().all(|m| m.content.contains("hiking")));

    manager.shutdown().await;
}

#[tokio::test]
async fn mark_accessed_bumps_access_count() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let memories = MemoryRepository::new(manager.clone(), protection, audit);

    let persona_id = uuid::Uuid::new_v4();
    let memory = MemoryEntity::new(persona_id, MemoryType::Text, "remember this");
    memories.create(&memory).await.unwrap();

    memories.mark_accessed(memory.id, persona_id).await.unwrap();
    let loaded = memories.get_by_id(memory.id, Some(persona_id)).await.unwrap().unwrap();
    assert_eq!(loaded.access_count, 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn update_tier_persists_across_reads() {
    let dir = TempDir::new().unwrap();
    let manager = ShardManager::new(common::test_config(dir.path(), 2));
    manager.initialize().await.unwrap();
    let protection = build_protection(dir.path()).await;
    let audit = AuditLog::in_memory();
    let memories = MemoryRepository::new(manager.clone(), protection, audit);

    let persona_id = uuid::Uuid::new_v4();
    let memory = MemoryEntity::new(persona_id, MemoryType::Text, "cold storage candidate");
    memories.create(&memory).await.unwrap();

    memories.update_tier(memory.id, persona_id, MemoryTier::Cold).await.unwrap();
    let loaded = memories.get_by_id(memory.id, Some(persona_id)).await.unwrap().unwrap();
    assert_eq!(loaded.tier, MemoryTier::Cold);

    manager.shutdown().await;
}
