//! # rb-storage-local
//! rusty-board/crates/rb-plugins/rb-storage-local/src/lib.rs
//! Local filesystem implementation of `BlobStore`.
//! Features: content-addressable storage, per-board namespaces, directory sharding.
//!
//! Identical uploads on one board share a file. A small `.refs` sidecar
//! counts the posts pointing at it so deleting one post keeps the others'
//! image intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use rb_core::{BlobStore, ImageRef, StoreError};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const REFS_SUFFIX: &str = "refs";

pub struct LocalBlobStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Serializes reference-count updates.
    refs: Mutex<()>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            refs: Mutex::new(()),
        }
    }

    /// Generates a sharded path: "{board}/ab/cd/abcdef...hash"
    fn sharded_path(&self, board_id: &str, hash: &str) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push(board_id);
        path.push(&hash[0..2]);
        path.push(&hash[2..4]);
        path.push(hash);
        path
    }

    fn refs_path(blob: &Path) -> PathBuf {
        blob.with_extension(REFS_SUFFIX)
    }

    async fn read_refs(path: &Path) -> Result<u64, StoreError> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(text.trim().parse().unwrap_or(1)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

fn check_namespace(board_id: &str) -> Result<(), StoreError> {
    if board_id.is_empty() || !board_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::Backend(format!(
            "invalid blob namespace `{board_id}`"
        )));
    }
    Ok(())
}

fn is_blob_id(id: &str) -> bool {
    id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    /// Saves an upload using its SHA-256 hash as the filename.
    async fn save(
        &self,
        board_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ImageRef, StoreError> {
        check_namespace(board_id)?;
        let hash = hex::encode(Sha256::digest(&data));
        let target = self.sharded_path(board_id, &hash);
        let refs_path = Self::refs_path(&target);

        let _refs = self.refs.lock().await;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let refs = Self::read_refs(&refs_path).await?;
        if refs == 0 || !fs::try_exists(&target).await? {
            fs::write(&target, &data).await?;
        }
        fs::write(&refs_path, (refs + 1).to_string()).await?;
        debug!(board = %board_id, blob = %hash, refs = refs + 1, "blob stored");

        Ok(ImageRef {
            id: hash,
            content_type: content_type.to_string(),
            size: data.len() as u64,
            thumbnail: None,
        })
    }

    async fn delete(&self, board_id: &str, id: &str) -> Result<(), StoreError> {
        check_namespace(board_id)?;
        if !is_blob_id(id) {
            debug!(board = %board_id, blob = %id, "not a stored blob id");
            return Ok(());
        }
        let target = self.sharded_path(board_id, id);
        let refs_path = Self::refs_path(&target);

        let _refs = self.refs.lock().await;
        let refs = Self::read_refs(&refs_path).await?;
        if refs > 1 {
            fs::write(&refs_path, (refs - 1).to_string()).await?;
            return Ok(());
        }
        for path in [&target, &refs_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn total_size(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        let mut pending = vec![self.root_path.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else if entry.path().extension().is_none() {
                    total += meta.len();
                }
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_are_sharded_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let image = store
            .save("b", Bytes::from_static(b"png bytes"), "image/png")
            .await
            .unwrap();
        assert!(is_blob_id(&image.id));
        assert_eq!(image.size, 9);
        let path = dir
            .path()
            .join("b")
            .join(&image.id[0..2])
            .join(&image.id[2..4])
            .join(&image.id);
        assert_eq!(std::fs::read(path).unwrap(), b"png bytes");
        assert_eq!(store.total_size().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn shared_blob_survives_until_last_reference_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let data = Bytes::from_static(b"same picture");

        let first = store.save("b", data.clone(), "image/jpeg").await.unwrap();
        let second = store.save("b", data, "image/jpeg").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.total_size().await.unwrap(), 12);

        store.delete("b", &first.id).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 12);
        store.delete("b", &second.id).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 0);

        // Deleting again, or deleting garbage, is not an error.
        store.delete("b", &first.id).await.unwrap();
        store.delete("b", "../../etc/passwd").await.unwrap();
    }

    #[tokio::test]
    async fn namespaces_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let data = Bytes::from_static(b"cross posted");

        let on_b = store.save("b", data.clone(), "image/png").await.unwrap();
        store.save("g", data, "image/png").await.unwrap();
        store.delete("b", &on_b.id).await.unwrap();
        assert_eq!(store.total_size().await.unwrap(), 12);

        assert!(store
            .save("../x", Bytes::from_static(b"x"), "image/png")
            .await
            .is_err());
    }
}
