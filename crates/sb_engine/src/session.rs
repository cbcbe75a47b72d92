//! Session manager: per-box unlocked DEKs with auto-lock.
//!
//! Holds the only in-memory copies of unwrapped data-encryption keys.
//! When a box is locked (explicitly or by the auto-lock scanner) its DEK is
//! zeroized before the entry is dropped. No other component stores keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use uuid::Uuid;
use zeroize::Zeroizing;

use sb_crypto::{aead, kdf, CryptoError, Dek};
use sb_store::{models::BoxRow, Store};

use crate::error::EngineError;

struct BoxSession {
    dek: Dek,
    unlocked_at: Instant,
    last_access: Instant,
}

/// Thread-safe session handle.  Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<HashMap<Uuid, BoxSession>>>,
    auto_lock: Arc<RwLock<Duration>>,
}

impl SessionManager {
    pub fn new(auto_lock: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            auto_lock: Arc::new(RwLock::new(auto_lock)),
        }
    }

    /// Unlock a box with its owner's password: fetch salt + wrapped DEK,
    /// derive the master key, unwrap. A tag mismatch (wrong password or a
    /// tampered row) surfaces as `AuthFailure`.
    pub async fn unlock(
        &self,
        store: &Store,
        box_id: Uuid,
        password: &str,
    ) -> Result<(), EngineError> {
        let row: Option<BoxRow> =
            sqlx::query_as("SELECT * FROM boxes WHERE box_id = ? AND soft_deleted = 0")
                .bind(box_id.to_string())
                .fetch_optional(&store.pool)
                .await?;
        let row = row.ok_or_else(|| EngineError::NotFound(format!("box {box_id}")))?;

        let salt: [u8; 16] = row
            .kdf_salt
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::IntegrityFailure("box salt has wrong length".into()))?;

        // Argon2id at 64 MiB is too heavy for the async executor.
        let password = password.as_bytes().to_vec();
        let master = tokio::task::spawn_blocking(move || kdf::derive_master_key(&password, &salt))
            .await
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;

        let wrap = kdf::wrap_subkey(&master)?;
        let dek = aead::unwrap_dek(&wrap, &row.wrapped_dek).map_err(|e| match e {
            CryptoError::AeadDecrypt => EngineError::AuthFailure,
            other => EngineError::Crypto(other),
        })?;

        self.insert(box_id, dek).await;
        tracing::debug!(%box_id, "box unlocked");
        Ok(())
    }

    /// Seed a session with an already-unwrapped DEK (box creation).
    pub(crate) async fn insert(&self, box_id: Uuid, dek: Dek) {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        guard.insert(
            box_id,
            BoxSession {
                dek,
                unlocked_at: now,
                last_access: now,
            },
        );
    }

    /// Copy of the cached DEK, or `Locked`. The copy zeroizes on drop;
    /// callers should hold it only for the duration of one crypto operation.
    /// Touches the activity timer.
    pub async fn dek_for(&self, box_id: Uuid) -> Result<Zeroizing<[u8; 32]>, EngineError> {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&box_id) {
            Some(session) => {
                session.last_access = Instant::now();
                Ok(Zeroizing::new(*session.dek.as_bytes()))
            }
            None => Err(EngineError::Locked),
        }
    }

    /// Record activity (resets the idle clock).
    pub async fn touch(&self, box_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(session) = guard.get_mut(&box_id) {
            session.last_access = Instant::now();
        }
    }

    pub async fn is_unlocked(&self, box_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&box_id)
    }

    /// Lock one box — the DEK is zeroized as the entry drops.
    pub async fn lock(&self, box_id: Uuid) {
        let removed = self.inner.write().await.remove(&box_id);
        if removed.is_some() {
            tracing::debug!(%box_id, "box locked");
        }
    }

    /// Lock every box.
    pub async fn lock_all(&self) {
        let mut guard = self.inner.write().await;
        let n = guard.len();
        guard.clear();
        if n > 0 {
            tracing::info!(count = n, "all boxes locked");
        }
    }

    /// Change the idle timeout. Zero disables auto-lock.
    pub async fn set_auto_lock(&self, timeout: Duration) {
        *self.auto_lock.write().await = timeout;
    }

    /// Seconds a box has been unlocked, if it is.
    pub async fn unlocked_for(&self, box_id: Uuid) -> Option<Duration> {
        self.inner
            .read()
            .await
            .get(&box_id)
            .map(|s| s.unlocked_at.elapsed())
    }

    /// Lock every box idle longer than the configured timeout.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let timeout = *self.auto_lock.read().await;
        if timeout.is_zero() {
            return 0;
        }
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|box_id, session| {
            let keep = session.last_access.elapsed() <= timeout;
            if !keep {
                tracing::info!(%box_id, "auto-lock: evicting idle box");
            }
            keep
        });
        before - guard.len()
    }
}

// ── Auto-lock scanner ─────────────────────────────────────────────────────────

/// Handle returned to the caller so it can shut the scanner down.
pub struct AutoLockHandle {
    pub shutdown_tx: watch::Sender<bool>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl AutoLockHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the periodic idle scan as a tokio task. The scanner logs and
/// continues on every tick; it never takes the process down.
pub fn spawn_auto_lock(sessions: SessionManager, scan_every: Duration) -> AutoLockHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        tracing::debug!(every_secs = scan_every.as_secs(), "auto-lock scanner started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(scan_every) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("auto-lock scanner shutting down");
                        return;
                    }
                }
            }
            sessions.evict_idle().await;
        }
    });

    AutoLockHandle {
        shutdown_tx,
        handle,
    }
}
