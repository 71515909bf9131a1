//! # rb-db-sqlite Implementation
//!
//! Authoritative record store over SQLite. Thread records are stored as
//! opaque blobs keyed by board and ordinal; counters are bumped with
//! single-statement upserts so concurrent writers never lose an increment.

use std::str::FromStr;

use async_trait::async_trait;
use rb_core::{Board, BoardFlags, News, RecordStore, SiteConfig, StoreError, ThreadId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS boards (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        post_count INTEGER NOT NULL DEFAULT 0,
        image_only INTEGER NOT NULL DEFAULT 0,
        locked INTEGER NOT NULL DEFAULT 0,
        archived INTEGER NOT NULL DEFAULT 0,
        show_latest INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        board_id TEXT NOT NULL,
        thread_id INTEGER NOT NULL,
        body BLOB NOT NULL,
        PRIMARY KEY (board_id, thread_id)
    )",
    "CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS news (
        id INTEGER PRIMARY KEY,
        body TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

const SITE_CONFIG_KEY: &str = "site_config";

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn corrupt(err: serde_json::Error) -> StoreError {
    StoreError::Backend(format!("undecodable row: {err}"))
}

impl SqliteRecordStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .min_connections(if in_memory { 1 } else { 0 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(backend)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(backend)?;
        }
        info!(url = %url, "sqlite record store ready");
        Ok(Self { pool })
    }
}

fn board_from_row(row: &SqliteRow) -> Result<Board, sqlx::Error> {
    Ok(Board {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        post_count: row.try_get::<i64, _>("post_count")? as u64,
        flags: BoardFlags {
            image_only: row.try_get("image_only")?,
            locked: row.try_get("locked")?,
            archived: row.try_get("archived")?,
            show_latest: row.try_get("show_latest")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_board(&self, board: &Board) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO boards (id, name, description, post_count, image_only, locked, archived, show_latest, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&board.id)
        .bind(&board.name)
        .bind(&board.description)
        .bind(board.post_count as i64)
        .bind(board.flags.image_only)
        .bind(board.flags.locked)
        .bind(board.flags.archived)
        .bind(board.flags.show_latest)
        .bind(board.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_board(&self, id: &str) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query("SELECT * FROM boards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(board_from_row).transpose().map_err(backend)
    }

    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        let rows = sqlx::query("SELECT * FROM boards ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(board_from_row)
            .collect::<Result<_, _>>()
            .map_err(backend)
    }

    async fn update_board_flags(&self, id: &str, flags: BoardFlags) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE boards SET image_only = ?, locked = ?, archived = ?, show_latest = ? WHERE id = ?",
        )
        .bind(flags.image_only)
        .bind(flags.locked)
        .bind(flags.archived)
        .bind(flags.show_latest)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("board {id}")));
        }
        Ok(())
    }

    /// Board row and thread records go in one transaction.
    async fn delete_board(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM threads WHERE board_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM boards WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn put_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
        record: Vec<u8>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO threads (board_id, thread_id, body) VALUES (?, ?, ?)
             ON CONFLICT(board_id, thread_id) DO UPDATE SET body = excluded.body",
        )
        .bind(board_id)
        .bind(thread_id as i64)
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        sqlx::query_scalar("SELECT body FROM threads WHERE board_id = ? AND thread_id = ?")
            .bind(board_id)
            .bind(thread_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn list_thread_records(
        &self,
        board_id: &str,
    ) -> Result<Vec<(ThreadId, Vec<u8>)>, StoreError> {
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(
            "SELECT thread_id, body FROM threads WHERE board_id = ? ORDER BY thread_id",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|(id, body)| (id as ThreadId, body))
            .collect())
    }

    async fn delete_thread_record(
        &self,
        board_id: &str,
        thread_id: ThreadId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM threads WHERE board_id = ? AND thread_id = ?")
            .bind(board_id)
            .bind(thread_id as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn increment_counter(&self, name: &str) -> Result<u64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO counters (name, value) VALUES (?, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(value as u64)
    }

    async fn get_counter(&self, name: &str) -> Result<u64, StoreError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(value.unwrap_or(0) as u64)
    }

    async fn increment_board_post_count(&self, board_id: &str) -> Result<u64, StoreError> {
        let value: Option<i64> = sqlx::query_scalar(
            "UPDATE boards SET post_count = post_count + 1 WHERE id = ? RETURNING post_count",
        )
        .bind(board_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        value
            .map(|v| v as u64)
            .ok_or_else(|| StoreError::Missing(format!("board {board_id}")))
    }

    async fn put_news(&self, news: &News) -> Result<(), StoreError> {
        let body = serde_json::to_string(news).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO news (id, body) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
        )
        .bind(news.id as i64)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn list_news(&self) -> Result<Vec<News>, StoreError> {
        let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM news ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(corrupt))
            .collect()
    }

    async fn delete_news(&self, id: u64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM news WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_site_config(&self) -> Result<Option<SiteConfig>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(SITE_CONFIG_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        value
            .map(|v| serde_json::from_str(&v).map_err(corrupt))
            .transpose()
    }

    async fn put_site_config(&self, config: &SiteConfig) -> Result<(), StoreError> {
        let value = serde_json::to_string(config).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SITE_CONFIG_KEY)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rb_content::{ContentStore, MemoryBlobStore};
    use rb_core::NewPost;

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::connect("sqlite::memory:")
            .await
            .expect("in-memory database")
    }

    #[tokio::test]
    async fn boards_round_trip_and_conflict() {
        let db = store().await;
        let mut board = Board::new("b", "Random");
        board.flags.show_latest = true;
        board.created_at = chrono::TimeZone::timestamp_opt(&chrono::Utc, 1_700_000_000, 0).unwrap();

        assert!(db.insert_board(&board).await.unwrap());
        assert!(!db.insert_board(&board).await.unwrap());
        assert_eq!(db.get_board("b").await.unwrap(), Some(board.clone()));

        let flags = BoardFlags {
            locked: true,
            ..BoardFlags::default()
        };
        db.update_board_flags("b", flags).await.unwrap();
        assert_eq!(db.get_board("b").await.unwrap().unwrap().flags, flags);
        assert!(matches!(
            db.update_board_flags("zz", flags).await,
            Err(StoreError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn counters_increment_atomically() {
        let db = Arc::new(store().await);
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    db.increment_counter("global:postcount").await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(db.get_counter("global:postcount").await.unwrap(), 100);
        assert_eq!(db.get_counter("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn thread_records_upsert_and_list_in_order() {
        let db = store().await;
        db.put_thread_record("b", 2, b"two".to_vec()).await.unwrap();
        db.put_thread_record("b", 1, b"one".to_vec()).await.unwrap();
        db.put_thread_record("b", 1, b"uno".to_vec()).await.unwrap();
        db.put_thread_record("c", 1, b"other".to_vec()).await.unwrap();

        let records = db.list_thread_records("b").await.unwrap();
        assert_eq!(records, vec![(1, b"uno".to_vec()), (2, b"two".to_vec())]);

        db.delete_thread_record("b", 1).await.unwrap();
        assert_eq!(db.get_thread_record("b", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn content_store_runs_on_sqlite() {
        let db = Arc::new(store().await);
        let content = ContentStore::new(db.clone(), Arc::new(MemoryBlobStore::new()));
        content.create_board(Board::new("b", "Random")).await.unwrap();

        let created = content.create_thread("b", NewPost::new("op")).await.unwrap();
        let reply = content
            .append_post("b", created.thread.id, NewPost::new("reply"))
            .await
            .unwrap();
        assert_eq!(reply.id, created.thread.posts[0].id + 1);
        assert_eq!(content.get_thread("b", 1).await.posts.len(), 2);
        assert_eq!(db.get_board("b").await.unwrap().unwrap().post_count, 2);

        content.post_news("Hi", "there", "admin").await.unwrap();
        assert_eq!(content.list_news().await.unwrap().len(), 1);

        assert!(content.delete_board("b").await.unwrap());
        assert!(db.list_thread_records("b").await.unwrap().is_empty());
    }
}
