// src/cli/serve.rs
// Wires the database pool, embedding client, memory store, session indexer,
// flush manager, and durable-stream server together and runs until ctrl-c.

use hive::config::EnvConfig;
use hive::db::pool::DatabasePool;
use hive::embeddings::EmbeddingClient;
use hive::error::{HiveError, Result};
use hive::indexer::SessionIndexer;
use hive::memory::MemoryStore;
use hive::sync::{self, FlushManager};
use hive::web::server::Server;
use hive::web::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(config: EnvConfig, port_override: Option<u16>) -> Result<()> {
    let validation = config.validate();
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if !validation.is_valid() {
        return Err(HiveError::Config(validation.report()));
    }

    let pool = Arc::new(DatabasePool::open(&config.db_path).await.map_err(HiveError::Anyhow)?);
    let health = pool.check_wal_health().await.map_err(HiveError::Anyhow)?;
    if !health.healthy {
        warn!("{}", health.message);
    }

    let embedder = Arc::new(EmbeddingClient::new(&config.embedding));
    let memory = Arc::new(MemoryStore::new(pool.clone(), embedder.clone()));
    let project_key = super::default_project_key();

    let indexer = Arc::new(SessionIndexer::new(
        config.indexer.clone(),
        pool.clone(),
        memory.clone(),
        embedder.clone(),
        config.embedding.concurrency,
    ));
    let indexer_handle = tokio::spawn(indexer.run());

    let mut flush_manager = FlushManager::spawn(pool.clone(), config.sync.clone(), project_key.clone());

    let state = AppState::new(pool.clone());
    let port = port_override.unwrap_or(config.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let mut server = Server::bind(addr, state).await?;
    info!(addr = %server.local_addr(), "hive serving");

    tokio::signal::ctrl_c().await.map_err(HiveError::Io)?;
    info!("shutdown requested");

    server.stop().await;
    flush_manager.stop().await;
    indexer_handle.abort();

    Ok(())
}

pub async fn migrate(config: EnvConfig) -> Result<()> {
    let pool = DatabasePool::open(&config.db_path).await.map_err(HiveError::Anyhow)?;
    let health = pool.check_wal_health().await.map_err(HiveError::Anyhow)?;
    info!("migrations applied; {}", health.message);
    Ok(())
}

pub async fn export(config: EnvConfig, project_key: String) -> Result<()> {
    let pool = DatabasePool::open(&config.db_path).await.map_err(HiveError::Anyhow)?;
    let count = sync::export_project(&pool, &config.sync, &project_key).await?;
    info!(count, path = %config.sync.issues_path().display(), "exported");
    Ok(())
}

pub async fn import(config: EnvConfig, project_key: String) -> Result<()> {
    let pool = DatabasePool::open(&config.db_path).await.map_err(HiveError::Anyhow)?;
    let count = sync::import_project(&pool, &config.sync, &project_key).await?;
    info!(count, path = %config.sync.issues_path().display(), "imported");
    Ok(())
}
