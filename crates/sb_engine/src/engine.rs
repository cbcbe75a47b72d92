//! The box engine — ShadowBox's single write path.
//!
//! Every mutation of the metadata index or the blob store goes through
//! here, inside one transaction per operation. Within a box, writes are
//! serialized by a per-box lock (reads share it); across boxes, operations
//! are independent.
//!
//! Failure contract: the engine recovers nothing — errors surface to the
//! caller — but the store is always left consistent: transactional index
//! writes, and any blob file written by an aborted `add_file` is reaped
//! before the error returns.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sb_crypto::{aead, hash, kdf, CryptoError};
use sb_store::models::{BlobRow, BoxRow, BoxStats, FileRow, VersionRow};
use sb_store::{search, BlobStore, Store, StoreError};

use crate::error::EngineError;
use crate::session::SessionManager;

/// A file plus its current version and tag set — the manifest shape.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub file: FileRow,
    pub current: VersionRow,
    pub tags: Vec<String>,
}

pub struct BoxEngine {
    store: Store,
    blobs: BlobStore,
    sessions: SessionManager,
    max_file_size: u64,
    locks: Mutex<HashMap<Uuid, Arc<RwLock<()>>>>,
}

impl BoxEngine {
    pub fn new(
        store: Store,
        blobs: BlobStore,
        sessions: SessionManager,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            blobs,
            sessions,
            max_file_size,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    async fn box_lock(&self, box_id: Uuid) -> Arc<RwLock<()>> {
        let mut guard = self.locks.lock().await;
        guard.entry(box_id).or_default().clone()
    }

    // ── Boxes ────────────────────────────────────────────────────────────────

    /// Create a box: fresh salt + DEK, DEK wrapped under the password-derived
    /// key hierarchy. The new box is left unlocked for its creator.
    pub async fn create_box(
        &self,
        owner: &str,
        name: &str,
        password: &str,
        is_public: bool,
    ) -> Result<Uuid, EngineError> {
        let salt = kdf::generate_salt();
        let dek = kdf::generate_dek();

        let password = password.as_bytes().to_vec();
        let master = tokio::task::spawn_blocking(move || kdf::derive_master_key(&password, &salt))
            .await
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;
        let wrap = kdf::wrap_subkey(&master)?;
        let wrapped_dek = aead::wrap_dek(&wrap, &dek)?;

        let box_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO boxes (box_id, name, owner, created_at, is_public, kdf_salt, wrapped_dek, soft_deleted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(box_id.to_string())
        .bind(name)
        .bind(owner)
        .bind(Utc::now())
        .bind(is_public)
        .bind(&salt[..])
        .bind(&wrapped_dek)
        .execute(&self.store.pool)
        .await?;

        self.sessions.insert(box_id, dek).await;
        tracing::info!(%box_id, name, "box created");
        Ok(box_id)
    }

    pub async fn get_box(&self, box_id: Uuid) -> Result<BoxRow, EngineError> {
        let row: Option<BoxRow> =
            sqlx::query_as("SELECT * FROM boxes WHERE box_id = ? AND soft_deleted = 0")
                .bind(box_id.to_string())
                .fetch_optional(&self.store.pool)
                .await?;
        row.ok_or_else(|| EngineError::NotFound(format!("box {box_id}")))
    }

    pub async fn list_boxes(&self, owner: &str) -> Result<Vec<BoxRow>, EngineError> {
        Ok(sqlx::query_as(
            "SELECT * FROM boxes WHERE owner = ? AND soft_deleted = 0 ORDER BY created_at",
        )
        .bind(owner)
        .fetch_all(&self.store.pool)
        .await?)
    }

    pub async fn open_box(&self, box_id: Uuid, password: &str) -> Result<(), EngineError> {
        self.sessions.unlock(&self.store, box_id, password).await
    }

    pub async fn close_box(&self, box_id: Uuid) {
        self.sessions.lock(box_id).await;
    }

    /// Flag a box as deleted and drop its session. Blobs stay on disk until
    /// files are hard-deleted.
    pub async fn soft_delete_box(&self, box_id: Uuid) -> Result<(), EngineError> {
        let n = sqlx::query("UPDATE boxes SET soft_deleted = 1 WHERE box_id = ? AND soft_deleted = 0")
            .bind(box_id.to_string())
            .execute(&self.store.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(EngineError::NotFound(format!("box {box_id}")));
        }
        self.sessions.lock(box_id).await;
        Ok(())
    }

    // ── Files: write path ────────────────────────────────────────────────────

    /// Ingest content into a box.
    ///
    /// Same plaintext twice in one box deduplicates to a single blob; the
    /// same name twice accretes a new version. All index writes happen in
    /// one transaction; a blob file written for an aborted attempt is
    /// unlinked before the error is returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_file(
        &self,
        box_id: Uuid,
        name: &str,
        bytes: &[u8],
        mime: &str,
        description: &str,
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<Uuid, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if bytes.len() as u64 > self.max_file_size {
            return Err(EngineError::QuotaExceeded {
                max: self.max_file_size,
            });
        }

        let lock = self.box_lock(box_id).await;
        let _guard = lock.write().await;

        self.get_box(box_id).await?;
        // Fail closed before touching disk — a dedup hit skips encryption
        // but still requires an unlocked box. Also refreshes the idle clock.
        self.sessions.dek_for(box_id).await?;
        let blob_hash = hash::sha256_hex(bytes);

        let mut wrote_blob = false;
        let result = self
            .add_file_tx(box_id, name, bytes, mime, description, tags, &blob_hash, cancel, &mut wrote_blob)
            .await;

        if result.is_err() && wrote_blob {
            if let Err(e) = self.blobs.delete(&box_id.to_string(), &blob_hash).await {
                tracing::warn!(%box_id, blob_hash, error = %e, "failed to reap blob after aborted add");
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn add_file_tx(
        &self,
        box_id: Uuid,
        name: &str,
        bytes: &[u8],
        mime: &str,
        description: &str,
        tags: &[String],
        blob_hash: &str,
        cancel: &CancellationToken,
        wrote_blob: &mut bool,
    ) -> Result<Uuid, EngineError> {
        let bid = box_id.to_string();
        let mut tx = self.store.begin().await?;

        let existing_blob: Option<BlobRow> =
            sqlx::query_as("SELECT * FROM blobs WHERE box_id = ? AND blob_hash = ?")
                .bind(&bid)
                .bind(blob_hash)
                .fetch_optional(&mut *tx)
                .await?;

        match existing_blob {
            Some(_) => {
                // Dedup hit: same plaintext already in this box.
                sqlx::query(
                    "UPDATE blobs SET ref_count = ref_count + 1 WHERE box_id = ? AND blob_hash = ?",
                )
                .bind(&bid)
                .bind(blob_hash)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                let dek = self.sessions.dek_for(box_id).await?;
                let (nonce, ciphertext, tag) = aead::encrypt_detached(&dek, bytes)?;
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }

                let path = self.blobs.put(&bid, blob_hash, &ciphertext).await?;
                *wrote_blob = true;

                sqlx::query(
                    "INSERT INTO blobs (blob_hash, box_id, ref_count, nonce, tag, ct_size, path_on_disk) \
                     VALUES (?, ?, 1, ?, ?, ?, ?)",
                )
                .bind(blob_hash)
                .bind(&bid)
                .bind(&nonce[..])
                .bind(&tag[..])
                .bind(ciphertext.len() as i64)
                .bind(path.to_string_lossy().into_owned())
                .execute(&mut *tx)
                .await?;
            }
        }

        let now = Utc::now();
        let existing_file: Option<FileRow> = sqlx::query_as(
            "SELECT * FROM files WHERE box_id = ? AND name = ? AND soft_deleted = 0",
        )
        .bind(&bid)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let (file_id, seq) = match &existing_file {
            Some(file) => {
                let max_seq: i64 =
                    sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM versions WHERE file_id = ?")
                        .bind(&file.file_id)
                        .fetch_one(&mut *tx)
                        .await?;
                (file.file_id.clone(), max_seq + 1)
            }
            None => {
                let file_id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO files (file_id, box_id, name, description, current_version_id, created_at, updated_at, soft_deleted) \
                     VALUES (?, ?, ?, ?, NULL, ?, ?, 0)",
                )
                .bind(&file_id)
                .bind(&bid)
                .bind(name)
                .bind(description)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                (file_id, 1)
            }
        };

        let version_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO versions (version_id, file_id, blob_hash, size, mime, created_at, seq) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version_id)
        .bind(&file_id)
        .bind(blob_hash)
        .bind(bytes.len() as i64)
        .bind(mime)
        .bind(now)
        .bind(seq)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE files SET current_version_id = ?, description = ?, updated_at = ? WHERE file_id = ?",
        )
        .bind(&version_id)
        .bind(description)
        .bind(now)
        .bind(&file_id)
        .execute(&mut *tx)
        .await?;

        let tags = normalize_tags(tags);
        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        for tag in &tags {
            sqlx::query("INSERT INTO file_tags (file_id, tag) VALUES (?, ?)")
                .bind(&file_id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM files_fts WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO files_fts (file_id, name, description, tags) VALUES (?, ?, ?, ?)")
            .bind(&file_id)
            .bind(name)
            .bind(description)
            .bind(tags.join(" "))
            .execute(&mut *tx)
            .await?;

        if cancel.is_cancelled() {
            // Dropping the transaction rolls everything back.
            return Err(EngineError::Cancelled);
        }
        tx.commit().await?;

        tracing::debug!(%box_id, name, seq, "file ingested");
        Uuid::parse_str(&file_id)
            .map_err(|_| EngineError::IntegrityFailure("malformed file id".into()))
    }

    // ── Files: read path ─────────────────────────────────────────────────────

    /// Decrypt and return a file's content, verifying the plaintext hash
    /// against the blob's address. Defaults to the current version.
    pub async fn read_file(
        &self,
        box_id: Uuid,
        file_id: Uuid,
        version: Option<Uuid>,
    ) -> Result<Vec<u8>, EngineError> {
        let lock = self.box_lock(box_id).await;
        let _guard = lock.read().await;

        let bid = box_id.to_string();
        let file = self.get_file(box_id, file_id).await?;

        let version_id = match version {
            Some(v) => v.to_string(),
            None => file
                .current_version_id
                .clone()
                .ok_or_else(|| EngineError::NotFound(format!("file {file_id} has no versions")))?,
        };
        let version_row: Option<VersionRow> =
            sqlx::query_as("SELECT * FROM versions WHERE version_id = ? AND file_id = ?")
                .bind(&version_id)
                .bind(&file.file_id)
                .fetch_optional(&self.store.pool)
                .await?;
        let version_row =
            version_row.ok_or_else(|| EngineError::NotFound(format!("version {version_id}")))?;

        let blob: Option<BlobRow> =
            sqlx::query_as("SELECT * FROM blobs WHERE box_id = ? AND blob_hash = ?")
                .bind(&bid)
                .bind(&version_row.blob_hash)
                .fetch_optional(&self.store.pool)
                .await?;
        let blob = blob.ok_or_else(|| {
            EngineError::IntegrityFailure(format!(
                "version {version_id} references missing blob {}",
                version_row.blob_hash
            ))
        })?;

        let nonce: [u8; aead::NONCE_LEN] = blob
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::IntegrityFailure("blob nonce has wrong length".into()))?;
        let tag: [u8; aead::TAG_LEN] = blob
            .tag
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::IntegrityFailure("blob tag has wrong length".into()))?;

        let dek = self.sessions.dek_for(box_id).await?;
        let ciphertext = self
            .blobs
            .get(&bid, &blob.blob_hash, blob.ct_size as u64)
            .await
            .map_err(|e| match e {
                StoreError::Corrupt(msg) => EngineError::IntegrityFailure(msg),
                other => EngineError::Store(other),
            })?;

        let plaintext = aead::decrypt_detached(&dek, &nonce, &ciphertext, &tag).map_err(|e| {
            match e {
                CryptoError::AeadDecrypt => {
                    EngineError::IntegrityFailure("AEAD tag mismatch on read".into())
                }
                other => EngineError::Crypto(other),
            }
        })?;

        if hash::sha256_hex(&plaintext) != blob.blob_hash {
            return Err(EngineError::IntegrityFailure(
                "plaintext hash does not match blob address".into(),
            ));
        }
        Ok(plaintext.to_vec())
    }

    // ── Files: metadata ──────────────────────────────────────────────────────

    pub async fn get_file(&self, box_id: Uuid, file_id: Uuid) -> Result<FileRow, EngineError> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT * FROM files WHERE file_id = ? AND box_id = ? AND soft_deleted = 0",
        )
        .bind(file_id.to_string())
        .bind(box_id.to_string())
        .fetch_optional(&self.store.pool)
        .await?;
        row.ok_or_else(|| EngineError::NotFound(format!("file {file_id}")))
    }

    /// Live files of a box, most recently touched first.
    pub async fn list_files(&self, box_id: Uuid) -> Result<Vec<FileRow>, EngineError> {
        Ok(sqlx::query_as(
            "SELECT * FROM files WHERE box_id = ? AND soft_deleted = 0 \
             ORDER BY updated_at DESC, name ASC",
        )
        .bind(box_id.to_string())
        .fetch_all(&self.store.pool)
        .await?)
    }

    /// Files joined with their current version and tags — what a share
    /// manifest is built from. Files without a version are skipped.
    pub async fn list_files_with_current(
        &self,
        box_id: Uuid,
    ) -> Result<Vec<FileEntry>, EngineError> {
        let files = self.list_files(box_id).await?;
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let Some(current_id) = file.current_version_id.clone() else {
                continue;
            };
            let current: Option<VersionRow> =
                sqlx::query_as("SELECT * FROM versions WHERE version_id = ?")
                    .bind(&current_id)
                    .fetch_optional(&self.store.pool)
                    .await?;
            let Some(current) = current else { continue };
            let tags = self.tags_for(&file.file_id).await?;
            out.push(FileEntry {
                file,
                current,
                tags,
            });
        }
        Ok(out)
    }

    async fn tags_for(&self, file_id: &str) -> Result<Vec<String>, EngineError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT tag FROM file_tags WHERE file_id = ? ORDER BY tag")
                .bind(file_id)
                .fetch_all(&self.store.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Newest version first.
    pub async fn list_versions(
        &self,
        box_id: Uuid,
        file_id: Uuid,
    ) -> Result<Vec<VersionRow>, EngineError> {
        let file = self.get_file(box_id, file_id).await?;
        Ok(
            sqlx::query_as("SELECT * FROM versions WHERE file_id = ? ORDER BY seq DESC")
                .bind(&file.file_id)
                .fetch_all(&self.store.pool)
                .await?,
        )
    }

    /// Point the file back at an older version. No new version is created.
    pub async fn restore_version(
        &self,
        box_id: Uuid,
        file_id: Uuid,
        version_id: Uuid,
    ) -> Result<(), EngineError> {
        let lock = self.box_lock(box_id).await;
        let _guard = lock.write().await;

        let file = self.get_file(box_id, file_id).await?;
        let version: Option<(String,)> =
            sqlx::query_as("SELECT version_id FROM versions WHERE version_id = ? AND file_id = ?")
                .bind(version_id.to_string())
                .bind(&file.file_id)
                .fetch_optional(&self.store.pool)
                .await?;
        let (version_id,) =
            version.ok_or_else(|| EngineError::NotFound(format!("version {version_id}")))?;

        sqlx::query("UPDATE files SET current_version_id = ?, updated_at = ? WHERE file_id = ?")
            .bind(&version_id)
            .bind(Utc::now())
            .bind(&file.file_id)
            .execute(&self.store.pool)
            .await?;
        Ok(())
    }

    // ── Files: deletion ──────────────────────────────────────────────────────

    /// Flag a file as deleted; blobs and versions are untouched.
    pub async fn soft_delete_file(&self, box_id: Uuid, file_id: Uuid) -> Result<(), EngineError> {
        let lock = self.box_lock(box_id).await;
        let _guard = lock.write().await;

        let file = self.get_file(box_id, file_id).await?;
        sqlx::query("UPDATE files SET soft_deleted = 1, updated_at = ? WHERE file_id = ?")
            .bind(Utc::now())
            .bind(&file.file_id)
            .execute(&self.store.pool)
            .await?;
        Ok(())
    }

    /// Remove a file and its versions; blobs whose refcount reaches zero are
    /// dropped from the index and unlinked from disk (in that order).
    pub async fn hard_delete_file(&self, box_id: Uuid, file_id: Uuid) -> Result<(), EngineError> {
        let lock = self.box_lock(box_id).await;
        let _guard = lock.write().await;

        let bid = box_id.to_string();
        let fid = file_id.to_string();

        let file: Option<FileRow> =
            sqlx::query_as("SELECT * FROM files WHERE file_id = ? AND box_id = ?")
                .bind(&fid)
                .bind(&bid)
                .fetch_optional(&self.store.pool)
                .await?;
        let file = file.ok_or_else(|| EngineError::NotFound(format!("file {file_id}")))?;

        let mut tx = self.store.begin().await?;

        let versions: Vec<VersionRow> =
            sqlx::query_as("SELECT * FROM versions WHERE file_id = ?")
                .bind(&file.file_id)
                .fetch_all(&mut *tx)
                .await?;

        for version in &versions {
            sqlx::query(
                "UPDATE blobs SET ref_count = ref_count - 1 WHERE box_id = ? AND blob_hash = ?",
            )
            .bind(&bid)
            .bind(&version.blob_hash)
            .execute(&mut *tx)
            .await?;
        }

        let hashes: BTreeSet<String> =
            versions.into_iter().map(|v| v.blob_hash).collect();
        let mut to_unlink = Vec::new();
        for hash in hashes {
            let refs: Option<(i64,)> = sqlx::query_as(
                "SELECT ref_count FROM blobs WHERE box_id = ? AND blob_hash = ?",
            )
            .bind(&bid)
            .bind(&hash)
            .fetch_optional(&mut *tx)
            .await?;
            if matches!(refs, Some((n,)) if n <= 0) {
                sqlx::query("DELETE FROM blobs WHERE box_id = ? AND blob_hash = ?")
                    .bind(&bid)
                    .bind(&hash)
                    .execute(&mut *tx)
                    .await?;
                to_unlink.push(hash);
            }
        }

        sqlx::query("DELETE FROM versions WHERE file_id = ?")
            .bind(&file.file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(&file.file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files_fts WHERE file_id = ?")
            .bind(&file.file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE file_id = ?")
            .bind(&file.file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Unlink only after the rows are gone for good.
        for hash in to_unlink {
            self.blobs.delete(&bid, &hash).await?;
        }
        Ok(())
    }

    // ── Search & tags ────────────────────────────────────────────────────────

    /// Ranked full-text search over name/description/tags, soft-deleted
    /// files excluded.
    pub async fn search(&self, box_id: Uuid, query: &str) -> Result<Vec<FileRow>, EngineError> {
        let ids = search::search(&self.store.pool, &box_id.to_string(), query).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Sqlite> =
            sqlx::QueryBuilder::new("SELECT * FROM files WHERE file_id IN (");
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let rows: Vec<FileRow> = builder.build_query_as().fetch_all(&self.store.pool).await?;

        // Preserve relevance order.
        let by_id: HashMap<&str, FileRow> = rows
            .iter()
            .map(|r| (r.file_id.as_str(), r.clone()))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).cloned())
            .collect())
    }

    /// Files carrying `tag` (case-insensitive).
    pub async fn filter_by_tag(
        &self,
        box_id: Uuid,
        tag: &str,
    ) -> Result<Vec<FileRow>, EngineError> {
        Ok(sqlx::query_as(
            "SELECT f.* FROM files f \
             JOIN file_tags t ON t.file_id = f.file_id \
             WHERE f.box_id = ? AND t.tag = ? AND f.soft_deleted = 0 \
             ORDER BY f.updated_at DESC, f.name ASC",
        )
        .bind(box_id.to_string())
        .bind(tag.trim().to_lowercase())
        .fetch_all(&self.store.pool)
        .await?)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    pub async fn box_stats(&self, box_id: Uuid) -> Result<BoxStats, EngineError> {
        self.get_box(box_id).await?;
        let (file_count, total_size): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(f.file_id), COALESCE(SUM(v.size), 0) \
             FROM files f LEFT JOIN versions v ON v.version_id = f.current_version_id \
             WHERE f.box_id = ? AND f.soft_deleted = 0",
        )
        .bind(box_id.to_string())
        .fetch_one(&self.store.pool)
        .await?;
        Ok(BoxStats {
            file_count,
            total_size,
        })
    }

    /// Crash-recovery pass: unlink on-disk blobs with no index row and drop
    /// index rows with no remaining references. Run at startup.
    pub async fn reap_orphans(&self) -> Result<usize, EngineError> {
        let mut removed = 0;

        for (bid, blob_hash) in self.blobs.scan().await? {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM blobs WHERE box_id = ? AND blob_hash = ?")
                    .bind(&bid)
                    .bind(&blob_hash)
                    .fetch_optional(&self.store.pool)
                    .await?;
            if row.is_none() {
                tracing::warn!(box_id = %bid, blob_hash, "reaping orphaned blob file");
                self.blobs.delete(&bid, &blob_hash).await?;
                removed += 1;
            }
        }

        let dead: Vec<(String, String)> =
            sqlx::query_as("SELECT box_id, blob_hash FROM blobs WHERE ref_count <= 0")
                .fetch_all(&self.store.pool)
                .await?;
        for (bid, blob_hash) in dead {
            tracing::warn!(box_id = %bid, blob_hash, "reaping unreferenced blob row");
            sqlx::query("DELETE FROM blobs WHERE box_id = ? AND blob_hash = ?")
                .bind(&bid)
                .bind(&blob_hash)
                .execute(&self.store.pool)
                .await?;
            self.blobs.delete(&bid, &blob_hash).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Lowercase, trim, drop empties, dedupe.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests;
