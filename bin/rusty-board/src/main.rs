//! # Rusty-Board Binary
//!
//! Assembles the content store, cache projection and their backends based
//! on configuration and compile-time features, fills the cache, and keeps
//! it reconciled until shutdown.

mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rb_cache::{CacheProjection, Forum, MemoryCache};
use rb_content::{ContentStore, MemoryBlobStore, MemoryRecordStore};
use rb_core::{BlobStore, CacheBackend, RecordStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{CacheKind, Settings, MEMORY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = config::load().context("loading configuration")?;
    telemetry::init(&settings.log)?;

    let records = open_records(&settings.database_url).await?;
    let blobs = open_blobs(&settings.media_root)?;
    let backend = open_cache(&settings).await?;

    let store = Arc::new(ContentStore::new(records, blobs));
    if store.seed_site_config(&settings.site).await? {
        info!(title = %settings.site.title, "site configuration seeded");
    }
    let forum = Forum::new(store, Arc::new(CacheProjection::new(backend)));

    if settings.rebuild.on_start {
        // A failed rebuild leaves a partial cache; reads degrade until the
        // next one.
        if let Err(err) = forum.rebuild().await {
            warn!(error = %err, "initial cache rebuild failed");
        }
    }
    let reconciler = settings
        .rebuild
        .interval()
        .map(|every| spawn_reconciler(forum.clone(), every));

    info!(
        database = %settings.database_url,
        media = %settings.media_root,
        cache = ?settings.cache.backend,
        "rusty-board ready"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    if let Some(task) = reconciler {
        task.abort();
    }
    info!("rusty-board stopped");
    Ok(())
}

/// Periodic full rebuild; heals drift left by failed incremental updates.
fn spawn_reconciler(forum: Forum, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and the startup rebuild covers it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = forum.rebuild().await {
                warn!(error = %err, "scheduled cache rebuild failed");
            }
        }
    })
}

async fn open_records(url: &str) -> anyhow::Result<Arc<dyn RecordStore>> {
    if url == MEMORY {
        warn!("using in-memory record store; content is lost on exit");
        return Ok(Arc::new(MemoryRecordStore::new()));
    }
    if url.starts_with("sqlite:") {
        return open_sqlite(url).await;
    }
    anyhow::bail!("unsupported database_url `{url}`")
}

#[cfg(feature = "db-sqlite")]
async fn open_sqlite(url: &str) -> anyhow::Result<Arc<dyn RecordStore>> {
    let store = rb_db_sqlite::SqliteRecordStore::connect(url)
        .await
        .with_context(|| format!("opening {url}"))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "db-sqlite"))]
async fn open_sqlite(_url: &str) -> anyhow::Result<Arc<dyn RecordStore>> {
    anyhow::bail!("built without the db-sqlite feature")
}

fn open_blobs(root: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
    if root == MEMORY {
        return Ok(Arc::new(MemoryBlobStore::new()));
    }
    open_local(root)
}

#[cfg(feature = "storage-local")]
fn open_local(root: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
    Ok(Arc::new(rb_storage_local::LocalBlobStore::new(root)))
}

#[cfg(not(feature = "storage-local"))]
fn open_local(_root: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
    anyhow::bail!("built without the storage-local feature")
}

/// An unreachable cache backend stops startup.
async fn open_cache(settings: &Settings) -> anyhow::Result<Arc<dyn CacheBackend>> {
    match settings.cache.backend {
        CacheKind::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheKind::Redis => open_redis(settings).await,
    }
}

#[cfg(feature = "redis")]
async fn open_redis(settings: &Settings) -> anyhow::Result<Arc<dyn CacheBackend>> {
    use secrecy::ExposeSecret;

    let url = settings
        .cache
        .redis_url
        .as_ref()
        .context("cache.redis_url is not set")?;
    let cache = rb_cache_redis::RedisCache::connect(url.expose_secret())
        .await
        .context("connecting to redis")?;
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
async fn open_redis(_settings: &Settings) -> anyhow::Result<Arc<dyn CacheBackend>> {
    anyhow::bail!("built without the redis feature")
}
