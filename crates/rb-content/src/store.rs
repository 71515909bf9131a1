//! # Content Store
//!
//! Owns the authoritative board/thread/post records. Every write runs the
//! retention policy, assigns post numbers from store-level atomic counters,
//! and persists whole post lists so a thread record is either fully updated
//! or left untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use rb_core::markup::sanitize_content;
use rb_core::retention;
use rb_core::{
    counters, AppError, BlobStore, Board, BoardFlags, ImageRef, NewPost, News, Post, PostId,
    RecordStore, Result, SiteConfig, Thread, ThreadId, Vote,
};
use tracing::{debug, error, info, warn};

use crate::locks::LockRegistry;

/// Outcome of [`ContentStore::create_thread`].
#[derive(Debug, Clone)]
pub struct ThreadCreated {
    pub thread: Thread,
    /// Thread removed by the retention policy to make room, if any.
    pub evicted: Option<ThreadId>,
}

/// Outcome of [`ContentStore::delete_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostRemoval {
    Post(Post),
    /// The post opened its thread, so the whole thread went with it.
    Thread(ThreadId),
    NotFound,
}

pub struct ContentStore {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    /// Serializes thread creation and eviction per board.
    board_locks: LockRegistry<String>,
    /// Serializes read-then-write on a single thread record.
    thread_locks: LockRegistry<(String, ThreadId)>,
}

impl ContentStore {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            records,
            blobs,
            board_locks: LockRegistry::new(),
            thread_locks: LockRegistry::new(),
        }
    }

    // ------------------------------------------------------------------
    // Boards
    // ------------------------------------------------------------------

    pub async fn create_board(&self, mut board: Board) -> Result<Board> {
        if board.id.is_empty()
            || !board
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(AppError::Validation(format!(
                "board id `{}` must be lowercase alphanumeric",
                board.id
            )));
        }
        board.post_count = 0;
        if !self.records.insert_board(&board).await? {
            return Err(AppError::Conflict(format!("board /{}/ already exists", board.id)));
        }
        info!(board = %board.id, "board created");
        Ok(board)
    }

    pub async fn get_board(&self, board_id: &str) -> Result<Option<Board>> {
        Ok(self.records.get_board(board_id).await?)
    }

    pub async fn list_boards(&self) -> Result<Vec<Board>> {
        Ok(self.records.list_boards().await?)
    }

    pub async fn update_board_flags(&self, board_id: &str, flags: BoardFlags) -> Result<Board> {
        self.require_board(board_id).await?;
        self.records.update_board_flags(board_id, flags).await?;
        info!(board = %board_id, ?flags, "board flags updated");
        self.require_board(board_id).await
    }

    /// Removes the board with every thread record and image it holds.
    pub async fn delete_board(&self, board_id: &str) -> Result<bool> {
        let _board_guard = self.board_locks.lock(&board_id.to_string()).await;
        if self.records.get_board(board_id).await?.is_none() {
            return Ok(false);
        }
        for thread in self.load_threads(board_id).await? {
            self.discard_images(board_id, &thread.posts).await;
        }
        self.records.delete_board(board_id).await?;
        info!(board = %board_id, "board deleted");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Threads and posts
    // ------------------------------------------------------------------

    /// Opens a new thread, evicting the oldest one first when the board is
    /// at capacity.
    ///
    /// The new thread takes the lowest ordinal not held by a live record, so
    /// an evicted thread's id can come back. Ids are unique among live
    /// threads only.
    pub async fn create_thread(&self, board_id: &str, new_post: NewPost) -> Result<ThreadCreated> {
        let board = self.writable_board(board_id).await?;
        if board.flags.image_only && new_post.attachment.is_none() {
            return Err(AppError::ImageRequired(board_id.to_string()));
        }

        let _board_guard = self.board_locks.lock(&board_id.to_string()).await;
        let records = self.records.list_thread_records(board_id).await?;

        let evicted = if retention::should_evict_oldest_thread(records.len() + 1) {
            let live = decode_threads(board_id, &records);
            self.evict_oldest(board_id, &live).await?
        } else {
            None
        };

        let thread_id = lowest_free_ordinal(
            records
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| Some(*id) != evicted),
        );

        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let post = self.ingest(board_id, thread_id, new_post).await?;
        let posts = vec![post];
        if let Err(err) = self.put_posts(board_id, thread_id, &posts).await {
            self.discard_images(board_id, &posts).await;
            return Err(err);
        }

        info!(board = %board_id, thread = thread_id, post = posts[0].id, ?evicted, "thread created");
        Ok(ThreadCreated {
            thread: Thread::from_posts(board_id, thread_id, posts),
            evicted,
        })
    }

    /// Appends a reply. A full thread rejects the post; nothing is evicted.
    pub async fn append_post(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        new_post: NewPost,
    ) -> Result<Post> {
        self.writable_board(board_id).await?;

        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let mut posts = self.load_posts(board_id, thread_id).await?;

        if posts[0].locked {
            return Err(AppError::ThreadLocked {
                board: board_id.to_string(),
                thread: thread_id,
            });
        }
        if retention::is_thread_full(posts.len()) {
            return Err(AppError::ThreadFull {
                board: board_id.to_string(),
                thread: thread_id,
            });
        }

        let post = self.ingest(board_id, thread_id, new_post).await?;
        posts.push(post.clone());
        if let Err(err) = self.put_posts(board_id, thread_id, &posts).await {
            self.discard_images(board_id, std::slice::from_ref(&post)).await;
            return Err(err);
        }

        debug!(board = %board_id, thread = thread_id, post = post.id, "post appended");
        Ok(post)
    }

    /// Reads a thread, degrading to an empty sentinel when the record is
    /// missing, corrupt or unreadable.
    pub async fn get_thread(&self, board_id: &str, thread_id: ThreadId) -> Thread {
        match self.records.get_thread_record(board_id, thread_id).await {
            Ok(Some(bytes)) => match decode_posts(&bytes) {
                Ok(posts) => Thread::from_posts(board_id, thread_id, posts),
                Err(err) => {
                    warn!(board = %board_id, thread = thread_id, error = %err, "corrupt thread record");
                    Thread::default()
                }
            },
            Ok(None) => Thread::default(),
            Err(err) => {
                error!(board = %board_id, thread = thread_id, error = %err, "thread read failed");
                Thread::default()
            }
        }
    }

    /// One entry per live thread holding only its first post. Corrupt and
    /// empty records are skipped.
    pub async fn get_threads_summary(&self, board_id: &str) -> Vec<Thread> {
        match self.records.list_thread_records(board_id).await {
            Ok(records) => decode_threads(board_id, &records)
                .into_iter()
                .map(|t| t.summary())
                .collect(),
            Err(err) => {
                error!(board = %board_id, error = %err, "thread listing failed");
                Vec::new()
            }
        }
    }

    /// Every decodable thread on a board with all posts. Unlike the read
    /// paths above, store failures propagate.
    pub async fn load_threads(&self, board_id: &str) -> Result<Vec<Thread>> {
        let records = self.records.list_thread_records(board_id).await?;
        Ok(decode_threads(board_id, &records))
    }

    /// Removes the thread whose first post is oldest. No-op when no thread
    /// qualifies.
    pub async fn delete_oldest_thread(&self, board_id: &str) -> Result<Option<ThreadId>> {
        let _board_guard = self.board_locks.lock(&board_id.to_string()).await;
        let live = self.load_threads(board_id).await?;
        self.evict_oldest(board_id, &live).await
    }

    pub async fn delete_thread(&self, board_id: &str, thread_id: ThreadId) -> Result<bool> {
        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let Some(bytes) = self.records.get_thread_record(board_id, thread_id).await? else {
            return Ok(false);
        };
        self.records.delete_thread_record(board_id, thread_id).await?;
        match decode_posts(&bytes) {
            Ok(posts) => self.discard_images(board_id, &posts).await,
            Err(err) => warn!(board = %board_id, thread = thread_id, error = %err, "deleted corrupt thread record; images left behind"),
        }
        info!(board = %board_id, thread = thread_id, "thread deleted");
        Ok(true)
    }

    /// Moderation removal of a single post.
    pub async fn delete_post(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post_id: PostId,
    ) -> Result<PostRemoval> {
        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let mut posts = self.load_posts(board_id, thread_id).await?;
        let Some(idx) = posts.iter().position(|p| p.id == post_id) else {
            return Ok(PostRemoval::NotFound);
        };

        if idx == 0 {
            self.records.delete_thread_record(board_id, thread_id).await?;
            self.discard_images(board_id, &posts).await;
            info!(board = %board_id, thread = thread_id, "thread deleted with its first post");
            return Ok(PostRemoval::Thread(thread_id));
        }

        let removed = posts.remove(idx);
        self.put_posts(board_id, thread_id, &posts).await?;
        self.discard_images(board_id, std::slice::from_ref(&removed)).await;
        info!(board = %board_id, thread = thread_id, post = post_id, "post deleted");
        Ok(PostRemoval::Post(removed))
    }

    /// Updates sticky/locked, which live on the thread's first post.
    pub async fn set_thread_flags(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        sticky: Option<bool>,
        locked: Option<bool>,
    ) -> Result<Thread> {
        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let mut posts = self.load_posts(board_id, thread_id).await?;
        if let Some(sticky) = sticky {
            posts[0].sticky = sticky;
        }
        if let Some(locked) = locked {
            posts[0].locked = locked;
        }
        self.put_posts(board_id, thread_id, &posts).await?;
        Ok(Thread::from_posts(board_id, thread_id, posts))
    }

    pub async fn vote(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        post_id: PostId,
        vote: Vote,
    ) -> Result<Post> {
        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), thread_id)).await;
        let mut posts = self.load_posts(board_id, thread_id).await?;
        let post = posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| AppError::NotFound("post".to_string(), post_id.to_string()))?;
        match vote {
            Vote::Up => post.upvotes += 1,
            Vote::Down => post.downvotes += 1,
        }
        let voted = post.clone();
        self.put_posts(board_id, thread_id, &posts).await?;
        Ok(voted)
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub async fn increment_global_post_count(&self) -> Result<u64> {
        Ok(self.records.increment_counter(counters::GLOBAL_POSTS).await?)
    }

    pub async fn increment_board_post_count(&self, board_id: &str) -> Result<u64> {
        Ok(self.records.increment_board_post_count(board_id).await?)
    }

    pub async fn global_post_count(&self) -> Result<u64> {
        Ok(self.records.get_counter(counters::GLOBAL_POSTS).await?)
    }

    pub async fn increment_user_count(&self) -> Result<u64> {
        Ok(self.records.increment_counter(counters::USERS).await?)
    }

    pub async fn user_count(&self) -> Result<u64> {
        Ok(self.records.get_counter(counters::USERS).await?)
    }

    /// Total bytes of stored uploads.
    pub async fn storage_size(&self) -> Result<u64> {
        Ok(self.blobs.total_size().await?)
    }

    // ------------------------------------------------------------------
    // News and site configuration
    // ------------------------------------------------------------------

    pub async fn post_news(&self, title: &str, body: &str, author: &str) -> Result<News> {
        let news = News {
            id: self.records.increment_counter(counters::NEWS_SEQ).await?,
            title: sanitize_content(title),
            body: sanitize_content(body),
            author: author.to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.records.put_news(&news).await?;
        Ok(news)
    }

    /// Newest first.
    pub async fn list_news(&self) -> Result<Vec<News>> {
        let mut news = self.records.list_news().await?;
        news.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(news)
    }

    pub async fn delete_news(&self, id: u64) -> Result<bool> {
        Ok(self.records.delete_news(id).await?)
    }

    pub async fn site_config(&self) -> Result<SiteConfig> {
        Ok(self.records.get_site_config().await?.unwrap_or_default())
    }

    pub async fn put_site_config(&self, config: &SiteConfig) -> Result<()> {
        Ok(self.records.put_site_config(config).await?)
    }

    /// Stores `config` only when no site configuration exists yet.
    pub async fn seed_site_config(&self, config: &SiteConfig) -> Result<bool> {
        if self.records.get_site_config().await?.is_some() {
            return Ok(false);
        }
        self.records.put_site_config(config).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn require_board(&self, board_id: &str) -> Result<Board> {
        self.records
            .get_board(board_id)
            .await?
            .ok_or_else(|| AppError::NotFound("board".to_string(), board_id.to_string()))
    }

    async fn writable_board(&self, board_id: &str) -> Result<Board> {
        let board = self.require_board(board_id).await?;
        if board.flags.archived {
            return Err(AppError::BoardArchived(board_id.to_string()));
        }
        if board.flags.locked {
            return Err(AppError::BoardLocked(board_id.to_string()));
        }
        Ok(board)
    }

    /// Loads a thread for modification. Missing or empty records are
    /// `ThreadNotFound`; a corrupt record fails the write.
    async fn load_posts(&self, board_id: &str, thread_id: ThreadId) -> Result<Vec<Post>> {
        let not_found = || AppError::ThreadNotFound {
            board: board_id.to_string(),
            thread: thread_id,
        };
        let bytes = self
            .records
            .get_thread_record(board_id, thread_id)
            .await?
            .ok_or_else(not_found)?;
        let posts = decode_posts(&bytes)?;
        if posts.is_empty() {
            return Err(not_found());
        }
        Ok(posts)
    }

    async fn put_posts(&self, board_id: &str, thread_id: ThreadId, posts: &[Post]) -> Result<()> {
        let bytes = serde_json::to_vec(posts)?;
        self.records
            .put_thread_record(board_id, thread_id, bytes)
            .await?;
        Ok(())
    }

    /// Stores the attachment and numbers the post. The blob is removed again
    /// if numbering fails.
    ///
    /// Numbering bumps the global and board counters up front. A post whose
    /// record write fails afterwards still consumes its id, so post ids can
    /// have gaps but are never reused.
    async fn ingest(&self, board_id: &str, thread_id: ThreadId, new_post: NewPost) -> Result<Post> {
        let image = match new_post.attachment {
            Some(attachment) => Some(
                self.blobs
                    .save(board_id, attachment.data, &attachment.content_type)
                    .await?,
            ),
            None => None,
        };

        let id = match self.assign_post_id(board_id).await {
            Ok(id) => id,
            Err(err) => {
                self.discard_image(board_id, image.as_ref()).await;
                return Err(err);
            }
        };

        Ok(Post {
            board_id: board_id.to_string(),
            thread_id,
            id,
            content: sanitize_content(&new_post.content),
            image,
            author: new_post.author,
            identity: new_post.identity,
            origin: new_post.origin,
            timestamp: new_post.timestamp,
            sticky: new_post.sticky,
            locked: false,
            upvotes: 0,
            downvotes: 0,
        })
    }

    async fn assign_post_id(&self, board_id: &str) -> Result<PostId> {
        let id = self.increment_global_post_count().await?;
        self.increment_board_post_count(board_id).await?;
        Ok(id)
    }

    /// Caller holds the board lock.
    async fn evict_oldest(&self, board_id: &str, live: &[Thread]) -> Result<Option<ThreadId>> {
        let Some(target) = retention::select_eviction_target(live) else {
            return Ok(None);
        };
        let _thread_guard = self.thread_locks.lock(&(board_id.to_string(), target)).await;
        self.records.delete_thread_record(board_id, target).await?;
        if let Some(thread) = live.iter().find(|t| t.id == target) {
            self.discard_images(board_id, &thread.posts).await;
        }
        info!(board = %board_id, thread = target, "evicted oldest thread");
        Ok(Some(target))
    }

    async fn discard_images(&self, board_id: &str, posts: &[Post]) {
        for post in posts {
            self.discard_image(board_id, post.image.as_ref()).await;
        }
    }

    /// Blob removal is best effort: the record change it follows has
    /// already happened.
    async fn discard_image(&self, board_id: &str, image: Option<&ImageRef>) {
        let Some(image) = image else { return };
        if let Err(err) = self.blobs.delete(board_id, &image.id).await {
            warn!(board = %board_id, image = %image.id, error = %err, "failed to delete image");
        }
    }
}

fn decode_posts(bytes: &[u8]) -> serde_json::Result<Vec<Post>> {
    serde_json::from_slice(bytes)
}

/// Decodes thread records, skipping corrupt and empty ones.
fn decode_threads(board_id: &str, records: &[(ThreadId, Vec<u8>)]) -> Vec<Thread> {
    records
        .iter()
        .filter_map(|(id, bytes)| match decode_posts(bytes) {
            Ok(posts) if !posts.is_empty() => Some(Thread::from_posts(board_id, *id, posts)),
            Ok(_) => None,
            Err(err) => {
                warn!(board = %board_id, thread = id, error = %err, "skipping corrupt thread record");
                None
            }
        })
        .collect()
}

fn lowest_free_ordinal(taken: impl IntoIterator<Item = ThreadId>) -> ThreadId {
    let taken: BTreeSet<ThreadId> = taken.into_iter().collect();
    (1..).find(|id| !taken.contains(id)).unwrap_or(1)
}
