//! Database abstraction over SQLite via sqlx.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{Sqlite, Transaction};

use crate::error::StoreError;

/// Central index handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path`.
    /// Runs all pending migrations automatically.
    ///
    /// WAL journal mode and foreign-key enforcement are configured at
    /// connection time here — NOT inside a migration, because SQLite forbids
    /// changing `journal_mode` inside a transaction and sqlx wraps every
    /// migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Begin a transaction — the scope handle the box engine composes
    /// multi-table writes within.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Drain the pool. Subsequent queries fail; used by core shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::Store;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[tokio::test]
    async fn migrations_apply_and_schema_is_usable() {
        let db_path = PathBuf::from(format!("/tmp/sb-store-test-{}.db", Uuid::new_v4()));
        let store = Store::open(&db_path).await.expect("open store");

        sqlx::query(
            "INSERT INTO boxes (box_id, name, owner, created_at, is_public, kdf_salt, wrapped_dek) \
             VALUES (?, ?, ?, datetime('now'), 0, ?, ?)",
        )
        .bind("box-1")
        .bind("photos")
        .bind("alice")
        .bind(vec![0u8; 16])
        .bind(vec![0u8; 60])
        .execute(&store.pool)
        .await
        .expect("insert box");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boxes")
            .fetch_one(&store.pool)
            .await
            .expect("count boxes");
        assert_eq!(count, 1);

        // FTS virtual table exists and accepts rows.
        sqlx::query("INSERT INTO files_fts (file_id, name, description, tags) VALUES (?, ?, ?, ?)")
            .bind("f1")
            .bind("vacation photos")
            .bind("")
            .bind("beach summer")
            .execute(&store.pool)
            .await
            .expect("insert fts row");

        store.close().await;
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn live_name_uniqueness_frees_after_soft_delete() {
        let db_path = PathBuf::from(format!("/tmp/sb-store-test-{}.db", Uuid::new_v4()));
        let store = Store::open(&db_path).await.expect("open store");

        sqlx::query(
            "INSERT INTO boxes (box_id, name, owner, created_at, is_public, kdf_salt, wrapped_dek) \
             VALUES ('b', 'x', 'o', datetime('now'), 0, x'00', x'00')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let insert_file = |id: &'static str, deleted: i64| {
            let pool = store.pool.clone();
            async move {
                sqlx::query(
                    "INSERT INTO files (file_id, box_id, name, created_at, updated_at, soft_deleted) \
                     VALUES (?, 'b', 'a.txt', datetime('now'), datetime('now'), ?)",
                )
                .bind(id)
                .bind(deleted)
                .execute(&pool)
                .await
            }
        };

        insert_file("f1", 0).await.expect("first live insert");
        assert!(insert_file("f2", 0).await.is_err(), "duplicate live name");

        sqlx::query("UPDATE files SET soft_deleted = 1 WHERE file_id = 'f1'")
            .execute(&store.pool)
            .await
            .unwrap();
        insert_file("f3", 0).await.expect("name freed by soft delete");

        store.close().await;
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }
}
