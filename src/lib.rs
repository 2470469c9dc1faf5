//! A sharded persistence core for a local, single-user AI assistant: request
//! routing (C1), pooled SQLite connections (C2), shard lifecycle (C3),
//! at-rest encryption (C4), data protection (C5), persona/memory
//! repositories (C6), the background sharding service (C7), storage layout
//! (C8), and the audit log (C9). See `SPEC_FULL.md`.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod protection;
pub mod repositories;
pub mod sharding;

pub use config::Config;
pub use error::{CoreError, CoreResult};

use std::sync::Arc;

use crypto::{Aes256GcmEncryptionService, EncryptionService};

/// Wires every component together the way an embedding application would:
/// one [`sharding::ShardingService`], one [`protection::DataProtectionManager`]
/// backed by it, and the two repositories built on top.
pub struct ShardCore {
    pub config: Config,
    pub sharding: Arc<sharding::ShardingService>,
    pub protection: Arc<protection::DataProtectionManager>,
    pub audit: Arc<audit::AuditLog>,
    pub personas: repositories::PersonaRepository,
    pub memories: repositories::MemoryRepository,
}

impl ShardCore {
    pub async fn initialize(config: Config, passphrase: Option<&str>) -> CoreResult<Arc<Self>> {
        std::fs::create_dir_all(config.security_dir())?;
        std::fs::create_dir_all(config.logs_dir())?;

        let encryption: Arc<dyn EncryptionService> =
            Aes256GcmEncryptionService::initialize(config.encryption.clone(), &config.security_dir(), passphrase)?;

        let audit = audit::AuditLog::initialize(config.logs_dir().join("audit.db"), config.pool.clone()).await?;
        let protection = protection::DataProtectionManager::new(encryption, audit.clone());

        let sharding = sharding::ShardingService::new(config.clone());
        sharding.initialize().await?;

        let personas = repositories::PersonaRepository::new(sharding.manager().clone(), protection.clone(), audit.clone());
        let memories = repositories::MemoryRepository::new(sharding.manager().clone(), protection.clone(), audit.clone());

        Ok(Arc::new(Self {
            config,
            sharding,
            protection,
            audit,
            personas,
            memories,
        }))
    }

    pub async fn shutdown(&self) {
        self.sharding.shutdown().await;
        self.audit.shutdown().await;
    }
}
