//! Exercises the sharded persistence core end-to-end for local development.
//! This core has no CLI or server of its own; embedding applications link
//! against the library and drive it directly.

use shard_core::config::Config;
use shard_core::models::{MemoryType, Persona};
use shard_core::ShardCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let core = ShardCore::initialize(config, None).await?;

    let mut persona = Persona::new("assistant", "default local persona");
    persona.is_active = true;
    let shard = core.personas.create(&persona).await?;
    tracing::info!(shard = %shard, persona = %persona.id, "created persona");

    let memory = shard_core::models::MemoryEntity::new(persona.id, MemoryType::Text, "met the user for the first time");
    core.memories.create(&memory).await?;

    let metrics = core.sharding.manager().metrics().await?;
    tracing::info!(?metrics, "shard metrics after seeding");

    core.shutdown().await;
    Ok(())
}
