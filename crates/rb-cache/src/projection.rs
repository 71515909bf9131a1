//! # Cache Projection
//!
//! Denormalized, read-optimized mirror of the content store. Entries are
//! serialized snapshots under [`CacheKey`]s; last write wins.
//!
//! Reads never fail: a miss or an undecodable entry yields the zero value
//! and a log line. Incremental updates are best effort; the content store
//! stays authoritative and a full rebuild heals any drift.

use std::sync::Arc;

use rb_core::markup::sanitize_content;
use rb_core::retention;
use rb_core::{
    AppError, Board, CacheBackend, Image, News, Post, PostId, RecentPost, SiteConfig, Thread,
    ThreadId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::blocker::Blocker;
use crate::keys::{prefix, CacheKey, Counter};
use crate::redact::redact_for_viewer;

pub struct CacheProjection {
    backend: Arc<dyn CacheBackend>,
    blocker: Blocker,
    /// Serializes read-modify-write edits (cached threads, recent ring).
    edits: Mutex<()>,
    /// One full rebuild at a time.
    rebuilds: Mutex<()>,
}

impl CacheProjection {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            blocker: Blocker::new(),
            edits: Mutex::new(()),
            rebuilds: Mutex::new(()),
        }
    }

    pub fn blocker(&self) -> &Blocker {
        &self.blocker
    }

    // ========================================================================
    // Boards
    // ========================================================================

    pub async fn put_board(&self, board: &Board) {
        let _open = self.blocker.enter().await;
        self.store(&CacheKey::board(&board.id), board).await;
    }

    pub async fn get_board(&self, board_id: &str) -> Board {
        let _open = self.blocker.enter().await;
        self.fetch(&CacheKey::board(board_id).to_string()).await
    }

    /// Sorted by display name.
    pub async fn list_boards(&self) -> Vec<Board> {
        let _open = self.blocker.enter().await;
        let mut boards: Vec<Board> = self.fetch_prefix(prefix::BOARDS).await;
        boards.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        boards
    }

    /// Drops the board with its threads, images and recent-ring entries.
    pub async fn remove_board(&self, board_id: &str) {
        let _sole = self.blocker.exclusive().await;
        self.remove(&CacheKey::board(board_id).to_string()).await;
        self.remove_prefix(&prefix::threads(board_id)).await;
        self.remove_prefix(&prefix::images(board_id)).await;
        self.remove_prefix(&prefix::recent(board_id)).await;
    }

    // ========================================================================
    // Threads
    // ========================================================================

    pub async fn put_thread(&self, thread: &Thread) {
        let _open = self.blocker.enter().await;
        self.store(&CacheKey::thread(&thread.board_id, thread.id), thread)
            .await;
    }

    pub async fn get_thread(&self, board_id: &str, thread_id: ThreadId) -> Thread {
        let _open = self.blocker.enter().await;
        self.fetch(&CacheKey::thread(board_id, thread_id).to_string())
            .await
    }

    /// Sticky threads first, then newest activity first.
    pub async fn list_threads(&self, board_id: &str) -> Vec<Thread> {
        let _open = self.blocker.enter().await;
        let mut threads: Vec<Thread> = self.fetch_prefix(&prefix::threads(board_id)).await;
        sort_threads(&mut threads);
        threads
    }

    pub async fn get_thread_for_viewer(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        is_privileged: bool,
    ) -> Thread {
        redact_for_viewer(self.get_thread(board_id, thread_id).await, is_privileged)
    }

    pub async fn list_threads_for_viewer(&self, board_id: &str, is_privileged: bool) -> Vec<Thread> {
        self.list_threads(board_id)
            .await
            .into_iter()
            .map(|t| redact_for_viewer(t, is_privileged))
            .collect()
    }

    /// Drops a thread, its images and its recent-ring entry.
    pub async fn remove_thread(&self, board_id: &str, thread_id: ThreadId) {
        let _sole = self.blocker.exclusive().await;
        self.remove(&CacheKey::thread(board_id, thread_id).to_string())
            .await;
        self.remove_prefix(&prefix::thread_images(board_id, thread_id))
            .await;
        self.remove(&CacheKey::recent(board_id, thread_id).to_string())
            .await;
    }

    /// Adds a reply to the cached copy of a thread. A cold miss is left
    /// alone: the entry is not reconstructed here and the next rebuild
    /// fills it.
    ///
    /// Appends can land late and out of order, so the post goes in at its
    /// id position. Post ids are global and increasing, which makes id
    /// order the store's arrival order. A post already present (a rebuild
    /// got there first) or older than the cached first post (the ordinal
    /// was evicted and reused) is dropped.
    pub async fn append_post_to_cached_thread(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post: &Post,
    ) -> bool {
        let _open = self.blocker.enter().await;
        let _edit = self.edits.lock().await;
        let key = CacheKey::thread(board_id, thread_id).to_string();
        let Some(mut thread) = self.fetch_opt::<Thread>(&key).await else {
            info!(key = %key, post = post.id, "cached thread absent; append skipped");
            return false;
        };
        if thread.first_post().is_some_and(|op| post.id < op.id) {
            debug!(key = %key, post = post.id, "reply predates cached thread; append skipped");
            return false;
        }
        let Err(at) = thread.posts.binary_search_by_key(&post.id, |p| p.id) else {
            debug!(key = %key, post = post.id, "post already cached");
            return false;
        };
        thread.posts.insert(at, post.clone());
        self.store_raw(&key, &thread).await
    }

    /// Refreshes one post inside its cached thread after a vote.
    ///
    /// Vote counts only grow, so the higher of the cached and incoming
    /// counts is kept; a stale snapshot arriving late cannot roll them back.
    pub async fn update_cached_post(&self, post: &Post) -> bool {
        let _open = self.blocker.enter().await;
        let _edit = self.edits.lock().await;
        let key = CacheKey::thread(&post.board_id, post.thread_id).to_string();
        let Some(mut thread) = self.fetch_opt::<Thread>(&key).await else {
            info!(key = %key, post = post.id, "cached thread absent; update skipped");
            return false;
        };
        let Some(slot) = thread.posts.iter_mut().find(|p| p.id == post.id) else {
            info!(key = %key, post = post.id, "post absent from cached thread");
            return false;
        };
        let upvotes = slot.upvotes.max(post.upvotes);
        let downvotes = slot.downvotes.max(post.downvotes);
        *slot = Post {
            upvotes,
            downvotes,
            ..post.clone()
        };
        self.store_raw(&key, &thread).await
    }

    /// Removes one reply from its cached thread, with its image entry.
    pub async fn remove_cached_post(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post_id: PostId,
    ) -> bool {
        let _sole = self.blocker.exclusive().await;
        let key = CacheKey::thread(board_id, thread_id).to_string();
        let Some(mut thread) = self.fetch_opt::<Thread>(&key).await else {
            return false;
        };
        let Some(idx) = thread.posts.iter().position(|p| p.id == post_id) else {
            return false;
        };
        let removed = thread.posts.remove(idx);
        if let Some(image) = removed.image {
            self.remove(&CacheKey::image(board_id, thread_id, &image.id).to_string())
                .await;
        }
        self.store_raw(&key, &thread).await
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub async fn put_image(&self, image: &Image) {
        let _open = self.blocker.enter().await;
        let key = CacheKey::image(&image.board_id, image.thread_id, &image.id);
        self.store(&key, image).await;
    }

    /// Looks an image up by board and id; the thread segment of the key is
    /// resolved by enumeration.
    pub async fn get_image(&self, board_id: &str, image_id: &str) -> Image {
        let _open = self.blocker.enter().await;
        let suffix = format!(":{image_id}");
        let keys = match self.backend.keys(&prefix::images(board_id)).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(board = %board_id, error = %err, "image key enumeration failed");
                return Image::default();
            }
        };
        match keys.iter().find(|k| k.ends_with(&suffix)) {
            Some(key) => self.fetch(key).await,
            None => {
                debug!(board = %board_id, image = %image_id, "image cache miss");
                Image::default()
            }
        }
    }

    pub async fn list_images(&self, board_id: &str) -> Vec<Image> {
        let _open = self.blocker.enter().await;
        self.fetch_prefix(&prefix::images(board_id)).await
    }

    // ========================================================================
    // News, counters, configuration
    // ========================================================================

    pub async fn put_news(&self, news: &News) {
        let _open = self.blocker.enter().await;
        self.store(&CacheKey::News(news.id), news).await;
    }

    pub async fn get_news(&self, id: u64) -> News {
        let _open = self.blocker.enter().await;
        self.fetch(&CacheKey::News(id).to_string()).await
    }

    /// Newest first.
    pub async fn list_news(&self) -> Vec<News> {
        let _open = self.blocker.enter().await;
        let mut news: Vec<News> = self.fetch_prefix(prefix::NEWS).await;
        news.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        news
    }

    pub async fn remove_news(&self, id: u64) {
        let _open = self.blocker.enter().await;
        self.remove(&CacheKey::News(id).to_string()).await;
    }

    pub async fn set_counter(&self, counter: Counter, value: u64) {
        let _open = self.blocker.enter().await;
        self.store(&CacheKey::Counter(counter), &value).await;
    }

    pub async fn get_counter(&self, counter: Counter) -> u64 {
        let _open = self.blocker.enter().await;
        self.fetch(&CacheKey::Counter(counter).to_string()).await
    }

    pub async fn put_config(&self, config: &SiteConfig) {
        let _open = self.blocker.enter().await;
        self.store(&CacheKey::Config, config).await;
    }

    pub async fn get_config(&self) -> SiteConfig {
        let _open = self.blocker.enter().await;
        self.fetch(&CacheKey::Config.to_string()).await
    }

    // ========================================================================
    // Recent ring
    // ========================================================================

    /// Pushes a thread digest, evicting the oldest entry at capacity.
    pub async fn push_recent(&self, incoming: RecentPost) {
        let _open = self.blocker.enter().await;
        let _edit = self.edits.lock().await;
        let mut ring: Vec<RecentPost> = self.fetch_prefix(prefix::RECENT).await;
        // A reused thread id overwrites its old entry rather than adding one.
        ring.retain(|r| !(r.board_id == incoming.board_id && r.thread_id == incoming.thread_id));

        let key = CacheKey::recent(&incoming.board_id, incoming.thread_id);
        if let Some(evicted) = retention::recent_ring_evict(&mut ring, incoming.clone()) {
            debug!(board = %evicted.board_id, thread = evicted.thread_id, "recent ring eviction");
            self.remove(&CacheKey::recent(&evicted.board_id, evicted.thread_id).to_string())
                .await;
        }
        self.store_raw(&key.to_string(), &incoming).await;
    }

    /// Newest first.
    pub async fn recent_posts(&self) -> Vec<RecentPost> {
        let _open = self.blocker.enter().await;
        let mut ring: Vec<RecentPost> = self.fetch_prefix(prefix::RECENT).await;
        ring.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        ring
    }

    // ========================================================================
    // Duplicate detection
    // ========================================================================

    /// Double-submit guard: true when the cached thread already has a post
    /// with this content. A cache miss detects nothing.
    pub async fn has_duplicate_post_content(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        text: &str,
    ) -> bool {
        let content = sanitize_content(text);
        self.get_thread(board_id, thread_id)
            .await
            .posts
            .iter()
            .any(|p| p.content == content)
    }

    /// Thread-level equivalent: compares against every cached first post.
    pub async fn has_duplicate_thread_content(&self, board_id: &str, text: &str) -> bool {
        let content = sanitize_content(text);
        self.list_threads(board_id)
            .await
            .iter()
            .filter_map(Thread::first_post)
            .any(|op| op.content == content)
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Flushes every entry under the gate.
    pub async fn clear(&self) {
        let _turn = self.rebuild_turn().await;
        self.blocker.start().await;
        if let Err(err) = self.flush().await {
            warn!(error = %err, "cache flush failed");
        }
        self.blocker.close().await;
    }

    pub(crate) async fn rebuild_turn(&self) -> MutexGuard<'_, ()> {
        self.rebuilds.lock().await
    }

    /// Ungated; callers hold the gate.
    pub(crate) async fn flush(&self) -> Result<(), AppError> {
        self.backend.flush_all().await?;
        Ok(())
    }

    /// Ungated, failing write used by the rebuild.
    pub(crate) async fn try_store<T>(&self, key: &CacheKey, value: &T) -> Result<(), AppError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(&key.to_string(), bytes).await?;
        Ok(())
    }

    // ========================================================================
    // Internals (callers hold the gate)
    // ========================================================================

    async fn store<T>(&self, key: &CacheKey, value: &T)
    where
        T: Serialize + Sync + ?Sized,
    {
        self.store_raw(&key.to_string(), value).await;
    }

    async fn store_raw<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key, error = %err, "cache entry encode failed");
                return false;
            }
        };
        match self.backend.set(key, bytes).await {
            Ok(()) => true,
            Err(err) => {
                warn!(key = %key, error = %err, "cache write failed");
                false
            }
        }
    }

    async fn fetch<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.fetch_opt(key).await.unwrap_or_default()
    }

    async fn fetch_opt<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self.backend.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key = %key, error = %err, "cache entry decode failed");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "cache miss");
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn fetch_prefix<T>(&self, prefix: &str) -> Vec<T>
    where
        T: DeserializeOwned + Send,
    {
        let keys = match self.backend.keys(prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(prefix = %prefix, error = %err, "cache key enumeration failed");
                return Vec::new();
            }
        };
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.fetch_opt(&key).await {
                values.push(value);
            }
        }
        values
    }

    async fn remove(&self, key: &str) {
        if let Err(err) = self.backend.delete(key).await {
            warn!(key = %key, error = %err, "cache delete failed");
        }
    }

    async fn remove_prefix(&self, prefix: &str) {
        match self.backend.keys(prefix).await {
            Ok(keys) => {
                for key in keys {
                    self.remove(&key).await;
                }
            }
            Err(err) => warn!(prefix = %prefix, error = %err, "cache key enumeration failed"),
        }
    }
}

/// Sticky threads first (stable), then by last post timestamp, newest first.
pub fn sort_threads(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        b.sticky
            .cmp(&a.sticky)
            .then_with(|| b.last_activity().cmp(&a.last_activity()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryCache;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn thread(id: ThreadId, sticky: bool, stamps: &[i64]) -> Thread {
        let posts = stamps
            .iter()
            .enumerate()
            .map(|(n, secs)| Post {
                board_id: "b".into(),
                thread_id: id,
                id: id * 100 + n as u64,
                content: format!("post {n}"),
                sticky: n == 0 && sticky,
                timestamp: at(*secs),
                ..Post::default()
            })
            .collect();
        Thread::from_posts("b", id, posts)
    }

    fn projection() -> (CacheProjection, Arc<MemoryCache>) {
        let backend = Arc::new(MemoryCache::new());
        (CacheProjection::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn threads_sort_sticky_then_latest_activity() {
        let (cache, _) = projection();
        cache.put_thread(&thread(1, false, &[0, 50])).await;
        cache.put_thread(&thread(2, false, &[10])).await;
        cache.put_thread(&thread(3, true, &[-10])).await;
        cache.put_thread(&thread(4, false, &[20, 30])).await;

        let order: Vec<ThreadId> = cache.list_threads("b").await.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![3, 1, 4, 2]);
    }

    #[tokio::test]
    async fn boards_sort_by_name() {
        let (cache, _) = projection();
        for (id, name) in [("z", "Anime"), ("a", "Technology"), ("m", "Music")] {
            cache.put_board(&Board::new(id, name)).await;
        }
        let names: Vec<String> = cache.list_boards().await.into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["Anime", "Music", "Technology"]);
    }

    #[tokio::test]
    async fn misses_and_garbage_read_as_zero_values() {
        let (cache, backend) = projection();
        assert_eq!(cache.get_board("nope").await, Board::default());
        assert!(cache.get_thread("b", 1).await.is_empty());

        backend
            .set("thread:b:1", b"\xff\xfe not json".to_vec())
            .await
            .unwrap();
        assert!(cache.get_thread("b", 1).await.is_empty());
        assert!(cache.list_threads("b").await.is_empty());
        assert_eq!(cache.get_counter(Counter::Posts).await, 0);
    }

    #[tokio::test]
    async fn append_to_cold_thread_is_a_no_op() {
        let (cache, backend) = projection();
        let post = thread(1, false, &[0]).posts[0].clone();
        assert!(!cache.append_post_to_cached_thread("b", 1, &post).await);
        assert!(!backend.exists("thread:b:1").await.unwrap());

        cache.put_thread(&thread(1, false, &[0])).await;
        let reply = Post {
            id: 999,
            ..post
        };
        assert!(cache.append_post_to_cached_thread("b", 1, &reply).await);
        assert_eq!(cache.get_thread("b", 1).await.posts.len(), 2);
    }

    #[tokio::test]
    async fn image_lookup_resolves_thread_segment() {
        let (cache, _) = projection();
        let image = Image {
            board_id: "b".into(),
            thread_id: 4,
            post_id: 9,
            id: "abc".into(),
            content_type: "image/png".into(),
            size: 10,
            ..Image::default()
        };
        cache.put_image(&image).await;
        assert_eq!(cache.get_image("b", "abc").await, image);
        assert_eq!(cache.get_image("b", "zzz").await, Image::default());

        cache.remove_thread("b", 4).await;
        assert!(cache.list_images("b").await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_checks_compare_sanitized_content() {
        let (cache, _) = projection();
        let mut t = thread(1, false, &[0]);
        t.posts[0].content = sanitize_content("<b>same</b>");
        cache.put_thread(&t).await;

        assert!(cache.has_duplicate_post_content("b", 1, "<b>same</b>").await);
        assert!(!cache.has_duplicate_post_content("b", 1, "different").await);
        assert!(cache.has_duplicate_thread_content("b", "<b>same</b>").await);
        // Nothing cached for board c, so nothing is detected.
        assert!(!cache.has_duplicate_thread_content("c", "<b>same</b>").await);
    }

    #[tokio::test]
    async fn clear_empties_the_backend_and_reopens() {
        let (cache, backend) = projection();
        cache.put_board(&Board::new("b", "Random")).await;
        cache.set_counter(Counter::Users, 4).await;
        cache.clear().await;
        assert!(backend.is_empty());
        assert!(!cache.blocker().is_blocked());
        assert!(cache.list_boards().await.is_empty());
    }

    #[tokio::test]
    async fn cached_post_updates_and_removals() {
        let (cache, _) = projection();
        cache.put_thread(&thread(1, false, &[0, 5, 10])).await;

        let mut voted = cache.get_thread("b", 1).await.posts[1].clone();
        voted.upvotes = 3;
        assert!(cache.update_cached_post(&voted).await);
        assert_eq!(cache.get_thread("b", 1).await.posts[1].upvotes, 3);

        assert!(cache.remove_cached_post("b", 1, voted.id).await);
        let ids: Vec<PostId> = cache.get_thread("b", 1).await.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![100, 102]);
    }

    #[tokio::test]
    async fn late_appends_land_in_id_order_once() {
        let (cache, _) = projection();
        cache.put_thread(&thread(1, false, &[0])).await;
        let op = cache.get_thread("b", 1).await.posts[0].clone();
        let reply = |id: PostId| Post {
            id,
            content: format!("reply {id}"),
            ..op.clone()
        };

        assert!(cache.append_post_to_cached_thread("b", 1, &reply(103)).await);
        assert!(cache.append_post_to_cached_thread("b", 1, &reply(101)).await);
        assert!(cache.append_post_to_cached_thread("b", 1, &reply(102)).await);
        assert!(!cache.append_post_to_cached_thread("b", 1, &reply(102)).await);
        // Older than the cached opening post: belongs to an evicted thread.
        assert!(!cache.append_post_to_cached_thread("b", 1, &reply(7)).await);

        let ids: Vec<PostId> = cache.get_thread("b", 1).await.posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![100, 101, 102, 103]);
    }

    #[tokio::test]
    async fn stale_vote_snapshot_does_not_roll_back_counts() {
        let (cache, _) = projection();
        cache.put_thread(&thread(1, false, &[0, 5])).await;
        let post = cache.get_thread("b", 1).await.posts[1].clone();
        let snapshot = |up: u64, down: u64| Post {
            upvotes: up,
            downvotes: down,
            ..post.clone()
        };

        // The newer snapshot finishes first.
        assert!(cache.update_cached_post(&snapshot(2, 1)).await);
        assert!(cache.update_cached_post(&snapshot(1, 1)).await);
        assert!(cache.update_cached_post(&snapshot(1, 0)).await);

        let cached = &cache.get_thread("b", 1).await.posts[1];
        assert_eq!((cached.upvotes, cached.downvotes), (2, 1));
    }
}
