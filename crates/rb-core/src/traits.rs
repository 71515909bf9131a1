//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::models::{Board, BoardFlags, ImageRef, News, SiteConfig, ThreadId};

/// Authoritative persistence for boards, thread records, news and counters.
///
/// Thread records are opaque serialized post lists; decoding them is the
/// content store's concern so that a corrupt record can degrade on read.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Board Operations
    async fn insert_board(&self, board: &Board) -> Result<bool, StoreError>;
    async fn get_board(&self, id: &str) -> Result<Option<Board>, StoreError>;
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError>;
    async fn update_board_flags(&self, id: &str, flags: BoardFlags) -> Result<(), StoreError>;
    async fn delete_board(&self, id: &str) -> Result<(), StoreError>;

    // Thread records
    async fn put_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        record: Vec<u8>,
    ) -> Result<(), StoreError>;
    async fn get_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<Option<Vec<u8>>, StoreError>;
    /// Every thread record on a board, ordered by thread id.
    async fn list_thread_records(
        &self,
        board_id: &str,
    ) -> Result<Vec<(ThreadId, Vec<u8>)>, StoreError>;
    async fn delete_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<(), StoreError>;

    // Counters. Increments must be atomic in the backend.
    async fn increment_counter(&self, name: &str) -> Result<u64, StoreError>;
    async fn get_counter(&self, name: &str) -> Result<u64, StoreError>;
    async fn increment_board_post_count(&self, board_id: &str) -> Result<u64, StoreError>;

    // News
    async fn put_news(&self, news: &News) -> Result<(), StoreError>;
    async fn list_news(&self) -> Result<Vec<News>, StoreError>;
    async fn delete_news(&self, id: u64) -> Result<bool, StoreError>;

    // Site configuration
    async fn get_site_config(&self) -> Result<Option<SiteConfig>, StoreError>;
    async fn put_site_config(&self, config: &SiteConfig) -> Result<(), StoreError>;
}

/// Media storage contract for uploads, namespaced per board.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Saves raw bytes and returns the reference recorded on the post.
    async fn save(
        &self,
        board_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ImageRef, StoreError>;
    /// Removes a blob. Missing blobs are not an error.
    async fn delete(&self, board_id: &str, id: &str) -> Result<(), StoreError>;
    /// Total bytes held across every namespace.
    async fn total_size(&self) -> Result<u64, StoreError>;
}

/// Key-value backend behind the cache projection.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    /// Every key beginning with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
    async fn flush_all(&self) -> Result<(), StoreError>;
}
