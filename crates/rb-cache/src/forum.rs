//! Write-through service used by request handlers.
//!
//! Writes go to the content store first; the matching cache update follows
//! and is best effort. Reads are served from the cache only.

use std::sync::Arc;

use rb_content::{ContentStore, PostRemoval};
use rb_core::{
    AppError, Board, BoardFlags, Image, NewPost, News, Post, PostId, RecentPost, Result,
    SiteConfig, Thread, ThreadId, Vote,
};
use tracing::warn;

use crate::keys::Counter;
use crate::projection::CacheProjection;
use crate::rebuild::{rebuild, RebuildReport};

#[derive(Clone)]
pub struct Forum {
    store: Arc<ContentStore>,
    cache: Arc<CacheProjection>,
}

impl Forum {
    pub fn new(store: Arc<ContentStore>, cache: Arc<CacheProjection>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheProjection {
        &self.cache
    }

    /// Full rebuild of the projection from the store.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        rebuild(&self.store, &self.cache).await
    }

    // --- Boards ---

    pub async fn create_board(&self, board: Board) -> Result<Board> {
        let board = self.store.create_board(board).await?;
        self.cache.put_board(&board).await;
        Ok(board)
    }

    pub async fn update_board_flags(&self, board_id: &str, flags: BoardFlags) -> Result<Board> {
        let board = self.store.update_board_flags(board_id, flags).await?;
        self.cache.put_board(&board).await;
        Ok(board)
    }

    pub async fn delete_board(&self, board_id: &str) -> Result<bool> {
        let deleted = self.store.delete_board(board_id).await?;
        if deleted {
            self.cache.remove_board(board_id).await;
            self.sync_size().await;
        }
        Ok(deleted)
    }

    pub async fn boards(&self) -> Vec<Board> {
        self.cache.list_boards().await
    }

    pub async fn board(&self, board_id: &str) -> Board {
        self.cache.get_board(board_id).await
    }

    // --- Threads and posts ---

    pub async fn create_thread(&self, board_id: &str, post: NewPost) -> Result<Thread> {
        let created = self.store.create_thread(board_id, post).await?;
        if let Some(evicted) = created.evicted {
            self.cache.remove_thread(board_id, evicted).await;
        }

        let thread = created.thread;
        self.cache.put_thread(&thread).await;
        self.project_images(&thread.posts).await;
        let board = self.sync_board(board_id).await;
        self.sync_post_count().await;
        self.sync_size().await;

        if board.is_some_and(|b| b.flags.show_latest) {
            if let Some(op) = thread.first_post() {
                self.cache.push_recent(RecentPost::from_post(op)).await;
            }
        }
        Ok(thread)
    }

    pub async fn append_post(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post: NewPost,
    ) -> Result<Post> {
        let post = self.store.append_post(board_id, thread_id, post).await?;
        self.cache
            .append_post_to_cached_thread(board_id, thread_id, &post)
            .await;
        self.project_images(std::slice::from_ref(&post)).await;
        self.sync_board(board_id).await;
        self.sync_post_count().await;
        self.sync_size().await;
        Ok(post)
    }

    pub async fn thread(&self, board_id: &str, thread_id: ThreadId, is_privileged: bool) -> Thread {
        self.cache
            .get_thread_for_viewer(board_id, thread_id, is_privileged)
            .await
    }

    pub async fn threads(&self, board_id: &str, is_privileged: bool) -> Vec<Thread> {
        self.cache
            .list_threads_for_viewer(board_id, is_privileged)
            .await
    }

    pub async fn image(&self, board_id: &str, image_id: &str) -> Image {
        self.cache.get_image(board_id, image_id).await
    }

    pub async fn recent_posts(&self) -> Vec<RecentPost> {
        self.cache.recent_posts().await
    }

    pub async fn is_duplicate_post(&self, board_id: &str, thread_id: ThreadId, text: &str) -> bool {
        self.cache
            .has_duplicate_post_content(board_id, thread_id, text)
            .await
    }

    pub async fn is_duplicate_thread(&self, board_id: &str, text: &str) -> bool {
        self.cache.has_duplicate_thread_content(board_id, text).await
    }

    // --- Moderation ---

    pub async fn delete_thread(&self, board_id: &str, thread_id: ThreadId) -> Result<bool> {
        let deleted = self.store.delete_thread(board_id, thread_id).await?;
        if deleted {
            self.cache.remove_thread(board_id, thread_id).await;
            self.sync_size().await;
        }
        Ok(deleted)
    }

    pub async fn delete_post(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post_id: PostId,
    ) -> Result<PostRemoval> {
        let removal = self.store.delete_post(board_id, thread_id, post_id).await?;
        match &removal {
            PostRemoval::Post(post) => {
                self.cache
                    .remove_cached_post(board_id, thread_id, post.id)
                    .await;
            }
            PostRemoval::Thread(id) => self.cache.remove_thread(board_id, *id).await,
            PostRemoval::NotFound => return Ok(removal),
        }
        self.sync_size().await;
        Ok(removal)
    }

    pub async fn set_thread_flags(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        sticky: Option<bool>,
        locked: Option<bool>,
    ) -> Result<Thread> {
        let thread = self
            .store
            .set_thread_flags(board_id, thread_id, sticky, locked)
            .await?;
        self.cache.put_thread(&thread).await;
        Ok(thread)
    }

    pub async fn vote(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post_id: PostId,
        vote: Vote,
    ) -> Result<Post> {
        let post = self.store.vote(board_id, thread_id, post_id, vote).await?;
        self.cache.update_cached_post(&post).await;
        Ok(post)
    }

    // --- News, counters, configuration ---

    pub async fn post_news(&self, title: &str, body: &str, author: &str) -> Result<News> {
        let news = self.store.post_news(title, body, author).await?;
        self.cache.put_news(&news).await;
        Ok(news)
    }

    pub async fn delete_news(&self, id: u64) -> Result<bool> {
        let deleted = self.store.delete_news(id).await?;
        if deleted {
            self.cache.remove_news(id).await;
        }
        Ok(deleted)
    }

    pub async fn news(&self) -> Vec<News> {
        self.cache.list_news().await
    }

    /// Called by the account layer when a user signs up.
    pub async fn register_user(&self) -> Result<u64> {
        let users = self.store.increment_user_count().await?;
        self.cache.set_counter(Counter::Users, users).await;
        Ok(users)
    }

    pub async fn counter(&self, counter: Counter) -> u64 {
        self.cache.get_counter(counter).await
    }

    pub async fn put_site_config(&self, config: &SiteConfig) -> Result<()> {
        if config.title.trim().is_empty() {
            return Err(AppError::Validation("site title must not be empty".into()));
        }
        self.store.put_site_config(config).await?;
        self.cache.put_config(config).await;
        Ok(())
    }

    pub async fn site_config(&self) -> SiteConfig {
        self.cache.get_config().await
    }

    // --- Cache sync helpers (best effort) ---

    async fn project_images(&self, posts: &[Post]) {
        for image in posts.iter().filter_map(Image::from_post) {
            self.cache.put_image(&image).await;
        }
    }

    async fn sync_board(&self, board_id: &str) -> Option<Board> {
        match self.store.get_board(board_id).await {
            Ok(Some(board)) => {
                self.cache.put_board(&board).await;
                Some(board)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(board = %board_id, error = %err, "board resync skipped");
                None
            }
        }
    }

    async fn sync_post_count(&self) {
        match self.store.global_post_count().await {
            Ok(count) => self.cache.set_counter(Counter::Posts, count).await,
            Err(err) => warn!(error = %err, "post counter resync skipped"),
        }
    }

    async fn sync_size(&self) {
        match self.store.storage_size().await {
            Ok(size) => self.cache.set_counter(Counter::Size, size).await,
            Err(err) => warn!(error = %err, "storage size resync skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rb_content::{MemoryBlobStore, MemoryRecordStore};
    use rb_core::retention::MAX_LIVE_THREADS;

    use crate::backend::MemoryCache;

    async fn forum() -> Forum {
        let store = Arc::new(ContentStore::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryBlobStore::new()),
        ));
        let cache = Arc::new(CacheProjection::new(Arc::new(MemoryCache::new())));
        let forum = Forum::new(store, cache);
        forum.create_board(Board::new("b", "Random")).await.unwrap();
        forum
    }

    #[tokio::test]
    async fn writes_are_visible_through_the_cache() {
        let forum = forum().await;
        let thread = forum.create_thread("b", NewPost::new("op")).await.unwrap();
        let reply = forum
            .append_post("b", thread.id, NewPost::new("reply"))
            .await
            .unwrap();

        let cached = forum.thread("b", thread.id, true).await;
        assert_eq!(cached.posts.len(), 2);
        assert_eq!(cached.posts[1], reply);
        assert_eq!(forum.board("b").await.post_count, 2);
        assert_eq!(forum.counter(Counter::Posts).await, 2);
    }

    #[tokio::test]
    async fn moderation_updates_the_cache() {
        let forum = forum().await;
        let thread = forum.create_thread("b", NewPost::new("op")).await.unwrap();
        let reply = forum
            .append_post("b", thread.id, NewPost::new("spam"))
            .await
            .unwrap();

        forum.vote("b", thread.id, reply.id, Vote::Up).await.unwrap();
        assert_eq!(forum.thread("b", thread.id, true).await.posts[1].upvotes, 1);

        forum.delete_post("b", thread.id, reply.id).await.unwrap();
        assert_eq!(forum.thread("b", thread.id, true).await.posts.len(), 1);

        forum
            .set_thread_flags("b", thread.id, Some(true), None)
            .await
            .unwrap();
        assert!(forum.threads("b", false).await[0].sticky);

        assert!(forum.delete_thread("b", thread.id).await.unwrap());
        assert!(forum.thread("b", thread.id, true).await.is_empty());
        assert!(!forum.delete_thread("b", thread.id).await.unwrap());
    }

    #[tokio::test]
    async fn eviction_is_reflected_in_the_cache() {
        let forum = forum().await;
        for n in 0..=MAX_LIVE_THREADS {
            forum
                .create_thread("b", NewPost::new(format!("thread {n}")))
                .await
                .unwrap();
        }
        let threads = forum.threads("b", true).await;
        assert_eq!(threads.len(), MAX_LIVE_THREADS);
        assert!(threads.iter().all(|t| t.posts[0].content != "thread 0"));
    }

    #[tokio::test]
    async fn policy_violations_leave_the_cache_untouched() {
        let forum = forum().await;
        let locked = BoardFlags {
            locked: true,
            ..BoardFlags::default()
        };
        forum.update_board_flags("b", locked).await.unwrap();
        assert!(forum.board("b").await.flags.locked);

        let err = forum
            .create_thread("b", NewPost::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_policy_violation());
        assert!(forum.threads("b", true).await.is_empty());
    }

    #[tokio::test]
    async fn news_users_and_config() {
        let forum = forum().await;
        let news = forum.post_news("Hi", "first", "admin").await.unwrap();
        assert_eq!(forum.news().await, vec![news.clone()]);
        assert!(forum.delete_news(news.id).await.unwrap());
        assert!(forum.news().await.is_empty());

        assert_eq!(forum.register_user().await.unwrap(), 1);
        assert_eq!(forum.counter(Counter::Users).await, 1);

        let config = SiteConfig {
            title: "Rust Chan".into(),
            ..SiteConfig::default()
        };
        forum.put_site_config(&config).await.unwrap();
        assert_eq!(forum.site_config().await, config);
        let blank = SiteConfig {
            title: " ".into(),
            ..SiteConfig::default()
        };
        assert!(matches!(
            forum.put_site_config(&blank).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn board_deletion_drops_cached_threads() {
        let forum = forum().await;
        forum.create_thread("b", NewPost::new("op")).await.unwrap();
        assert!(forum.delete_board("b").await.unwrap());
        assert!(forum.boards().await.is_empty());
        assert!(forum.threads("b", true).await.is_empty());
    }
}
