//! Content-addressed blob store.
//!
//! Ciphertext files live at `root/<box_id>/<hh>/<rest-of-hash>` where `hh`
//! is the first two hex chars of the plaintext SHA-256. The two-level
//! fan-out keeps any one directory under a few thousand entries for typical
//! box sizes.
//!
//! Writes are atomic: bytes land in a `.tmp-` sibling first and are renamed
//! into place. A crash can leave tmp files or orphaned blobs behind; the
//! engine's reaper pass (`scan`) cleans those up against the index.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if missing.
    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// On-disk location for a blob. The hash must be 64 hex chars.
    pub fn blob_path(&self, box_id: &str, blob_hash: &str) -> PathBuf {
        self.root
            .join(box_id)
            .join(&blob_hash[..2])
            .join(&blob_hash[2..])
    }

    /// Write a ciphertext atomically (temp file + rename).
    ///
    /// Idempotent: if the target already exists with the same size, the
    /// write is skipped. Returns the final path.
    pub async fn put(
        &self,
        box_id: &str,
        blob_hash: &str,
        ciphertext: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let path = self.blob_path(box_id, blob_hash);

        if let Ok(meta) = fs::metadata(&path).await {
            if meta.len() == ciphertext.len() as u64 {
                return Ok(path);
            }
        }

        let parent = path
            .parent()
            .ok_or_else(|| StoreError::Corrupt(format!("bad blob path {}", path.display())))?;
        fs::create_dir_all(parent).await?;

        // Tmp file in the same directory so the rename never crosses
        // filesystems.
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(ciphertext).await?;
        f.sync_all().await?;
        drop(f);

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(path)
    }

    /// Read a ciphertext back, validating the on-disk size against the
    /// `ct_size` recorded in the index.
    pub async fn get(
        &self,
        box_id: &str,
        blob_hash: &str,
        expected_ct_size: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(box_id, blob_hash);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("blob {blob_hash}")));
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.len() as u64 != expected_ct_size {
            return Err(StoreError::Corrupt(format!(
                "blob {blob_hash}: on-disk size {} != recorded {expected_ct_size}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Unlink a blob file. Callers must remove the index row first, in the
    /// same transaction that decided the blob is dead.
    pub async fn delete(&self, box_id: &str, blob_hash: &str) -> Result<(), StoreError> {
        let path = self.blob_path(box_id, blob_hash);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Prune the fan-out dir when it empties out.
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }

    /// Enumerate every `(box_id, blob_hash)` present on disk, deleting stray
    /// tmp files on the way. Used by the crash-recovery reaper.
    pub async fn scan(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut found = Vec::new();
        let mut boxes = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(box_entry) = boxes.next_entry().await? {
            if !box_entry.file_type().await?.is_dir() {
                continue;
            }
            let box_id = box_entry.file_name().to_string_lossy().into_owned();
            let mut prefixes = fs::read_dir(box_entry.path()).await?;
            while let Some(prefix_entry) = prefixes.next_entry().await? {
                if !prefix_entry.file_type().await?.is_dir() {
                    continue;
                }
                let prefix = prefix_entry.file_name().to_string_lossy().into_owned();
                let mut files = fs::read_dir(prefix_entry.path()).await?;
                while let Some(file_entry) = files.next_entry().await? {
                    let name = file_entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with(".tmp-") {
                        let _ = fs::remove_file(file_entry.path()).await;
                        continue;
                    }
                    found.push((box_id.clone(), format!("{prefix}{name}")));
                }
            }
        }
        Ok(found)
    }
}
