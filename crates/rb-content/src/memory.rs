//! In-process record and blob stores.
//!
//! Used when no database or media root is configured, and by tests.
//! Counter increments happen under a DashMap shard lock, which makes them
//! atomic with respect to each other.

use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rb_core::{
    Board, BoardFlags, BlobStore, ImageRef, News, RecordStore, SiteConfig, StoreError, ThreadId,
};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryRecordStore {
    boards: DashMap<String, Board>,
    threads: DashMap<(String, ThreadId), Vec<u8>>,
    counters: DashMap<String, u64>,
    news: DashMap<u64, News>,
    site_config: RwLock<Option<SiteConfig>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("site config lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_board(&self, board: &Board) -> Result<bool, StoreError> {
        match self.boards.entry(board.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(board.clone());
                Ok(true)
            }
        }
    }

    async fn get_board(&self, id: &str) -> Result<Option<Board>, StoreError> {
        Ok(self.boards.get(id).map(|b| b.clone()))
    }

    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        Ok(self.boards.iter().map(|b| b.value().clone()).collect())
    }

    async fn update_board_flags(&self, id: &str, flags: BoardFlags) -> Result<(), StoreError> {
        let mut board = self
            .boards
            .get_mut(id)
            .ok_or_else(|| StoreError::Missing(format!("board {id}")))?;
        board.flags = flags;
        Ok(())
    }

    async fn delete_board(&self, id: &str) -> Result<(), StoreError> {
        self.boards.remove(id);
        self.threads.retain(|(board, _), _| board != id);
        Ok(())
    }

    async fn put_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        record: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.threads.insert((board_id.to_string(), thread_id), record);
        Ok(())
    }

    async fn get_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .threads
            .get(&(board_id.to_string(), thread_id))
            .map(|r| r.clone()))
    }

    async fn list_thread_records(
        &self,
        board_id: &str,
    ) -> Result<Vec<(ThreadId, Vec<u8>)>, StoreError> {
        let mut records: Vec<_> = self
            .threads
            .iter()
            .filter(|entry| entry.key().0 == board_id)
            .map(|entry| (entry.key().1, entry.value().clone()))
            .collect();
        records.sort_by_key(|(id, _)| *id);
        Ok(records)
    }

    async fn delete_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<(), StoreError> {
        self.threads.remove(&(board_id.to_string(), thread_id));
        Ok(())
    }

    async fn increment_counter(&self, name: &str) -> Result<u64, StoreError> {
        let mut value = self.counters.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_counter(&self, name: &str) -> Result<u64, StoreError> {
        Ok(self.counters.get(name).map_or(0, |v| *v))
    }

    async fn increment_board_post_count(&self, board_id: &str) -> Result<u64, StoreError> {
        let mut board = self
            .boards
            .get_mut(board_id)
            .ok_or_else(|| StoreError::Missing(format!("board {board_id}")))?;
        board.post_count += 1;
        Ok(board.post_count)
    }

    async fn put_news(&self, news: &News) -> Result<(), StoreError> {
        self.news.insert(news.id, news.clone());
        Ok(())
    }

    async fn list_news(&self) -> Result<Vec<News>, StoreError> {
        Ok(self.news.iter().map(|n| n.value().clone()).collect())
    }

    async fn delete_news(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.news.remove(&id).is_some())
    }

    async fn get_site_config(&self) -> Result<Option<SiteConfig>, StoreError> {
        Ok(self.site_config.read().map_err(poisoned)?.clone())
    }

    async fn put_site_config(&self, config: &SiteConfig) -> Result<(), StoreError> {
        *self.site_config.write().map_err(poisoned)? = Some(config.clone());
        Ok(())
    }
}

/// Blob store keeping uploads in memory, keyed by board and a random id.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<(String, String), Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, board_id: &str, id: &str) -> bool {
        self.blobs
            .contains_key(&(board_id.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(
        &self,
        board_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ImageRef, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let size = data.len() as u64;
        self.blobs.insert((board_id.to_string(), id.clone()), data);
        Ok(ImageRef {
            id,
            content_type: content_type.to_string(),
            size,
            thumbnail: None,
        })
    }

    async fn delete(&self, board_id: &str, id: &str) -> Result<(), StoreError> {
        self.blobs.remove(&(board_id.to_string(), id.to_string()));
        Ok(())
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.blobs.iter().map(|b| b.value().len() as u64).sum())
    }
}
