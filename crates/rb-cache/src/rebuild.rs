//! Full cache rebuild.
//!
//! Flushes the projection and repopulates it from the content store while
//! the gate is blocked, so readers see either the old snapshot or the new
//! one.

use std::time::Instant;

use rb_content::ContentStore;
use rb_core::retention::RECENT_RING_CAPACITY;
use rb_core::{Image, RecentPost, Result};
use tracing::{error, info};

use crate::keys::{CacheKey, Counter};
use crate::projection::CacheProjection;

/// What a rebuild wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub boards: usize,
    pub threads: usize,
    pub images: usize,
    pub news: usize,
    pub recent: usize,
}

/// `Start(); flush; repopulate; Close()`. The gate is reopened even when
/// repopulation fails; the cache is then partial until the next rebuild.
pub async fn rebuild(store: &ContentStore, cache: &CacheProjection) -> Result<RebuildReport> {
    let _turn = cache.rebuild_turn().await;
    let started = Instant::now();

    cache.blocker().start().await;
    let outcome = repopulate(store, cache).await;
    cache.blocker().close().await;

    match &outcome {
        Ok(report) => info!(
            boards = report.boards,
            threads = report.threads,
            images = report.images,
            news = report.news,
            recent = report.recent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache rebuilt"
        ),
        Err(err) => error!(error = %err, "cache rebuild failed"),
    }
    outcome
}

async fn repopulate(store: &ContentStore, cache: &CacheProjection) -> Result<RebuildReport> {
    cache.flush().await?;
    let mut report = RebuildReport::default();
    let mut recent = Vec::new();

    for board in store.list_boards().await? {
        cache.try_store(&CacheKey::board(&board.id), &board).await?;
        report.boards += 1;

        for thread in store.load_threads(&board.id).await? {
            for image in thread.posts.iter().filter_map(Image::from_post) {
                let key = CacheKey::image(&board.id, thread.id, &image.id);
                cache.try_store(&key, &image).await?;
                report.images += 1;
            }
            if board.flags.show_latest {
                if let Some(op) = thread.first_post() {
                    recent.push(RecentPost::from_post(op));
                }
            }
            cache
                .try_store(&CacheKey::thread(&board.id, thread.id), &thread)
                .await?;
            report.threads += 1;
        }
    }

    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(RECENT_RING_CAPACITY);
    for entry in &recent {
        let key = CacheKey::recent(&entry.board_id, entry.thread_id);
        cache.try_store(&key, entry).await?;
    }
    report.recent = recent.len();

    for news in store.list_news().await? {
        cache.try_store(&CacheKey::News(news.id), &news).await?;
        report.news += 1;
    }

    let counters = [
        (Counter::Posts, store.global_post_count().await?),
        (Counter::Users, store.user_count().await?),
        (Counter::Size, store.storage_size().await?),
    ];
    for (counter, value) in counters {
        cache.try_store(&CacheKey::Counter(counter), &value).await?;
    }
    cache
        .try_store(&CacheKey::Config, &store.site_config().await?)
        .await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rb_content::{MemoryBlobStore, MemoryRecordStore};
    use rb_core::{Board, MockCacheBackend, NewPost, StoreError};

    use crate::backend::MemoryCache;

    async fn seeded_store() -> ContentStore {
        let store = ContentStore::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        store.create_board(Board::new("b", "Random")).await.unwrap();
        store
            .create_thread(
                "b",
                NewPost::new("op").with_attachment(vec![1u8, 2, 3], "image/png"),
            )
            .await
            .unwrap();
        store.post_news("Welcome", "hello", "admin").await.unwrap();
        store
    }

    #[tokio::test]
    async fn rebuild_replaces_stale_entries() {
        let store = seeded_store().await;
        let backend = Arc::new(MemoryCache::new());
        let cache = CacheProjection::new(backend.clone());
        cache.put_board(&Board::new("gone", "Deleted")).await;

        let report = rebuild(&store, &cache).await.unwrap();
        assert_eq!(
            report,
            RebuildReport {
                boards: 1,
                threads: 1,
                images: 1,
                news: 1,
                recent: 0,
            }
        );
        let boards = cache.list_boards().await;
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].id, "b");
        assert_eq!(cache.get_counter(Counter::Posts).await, 1);
        assert_eq!(cache.get_counter(Counter::Size).await, 3);
        assert_eq!(cache.get_config().await, store.site_config().await.unwrap());
        assert!(!cache.blocker().is_blocked());
    }

    #[tokio::test]
    async fn failed_rebuild_still_reopens_the_gate() {
        let store = seeded_store().await;
        let mut backend = MockCacheBackend::new();
        backend.expect_flush_all().returning(|| Ok(()));
        backend
            .expect_set()
            .returning(|_, _| Err(StoreError::Backend("connection reset".into())));
        let cache = CacheProjection::new(Arc::new(backend));

        assert!(rebuild(&store, &cache).await.is_err());
        assert!(!cache.blocker().is_blocked());
    }
}
