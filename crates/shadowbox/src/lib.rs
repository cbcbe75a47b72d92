//! shadowbox — the core facade
//!
//! Frontends (TUI, importer) talk to one `Core` value: explicit
//! `init(config)` / `shutdown()` lifecycle, no globals. The core wires the
//! metadata index, blob store, session manager, box engine and discovery
//! together, and owns the hosting registry (one share server per active
//! rendezvous code).
//!
//! Discovery opens its mDNS sockets lazily, on the first hosting / browse /
//! pull call — a core that never shares never touches the network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sb_engine::{spawn_auto_lock, AutoLockHandle, BoxEngine, SessionManager};
use sb_net::{Discovery, PullOptions, ShareServer, ShareServerConfig};
use sb_store::{BlobStore, Store};

pub use sb_engine::{Config, EngineError, FileEntry};
pub use sb_net::{DiscoveryEvent, NetError, ShareInfo};
pub use sb_store::models::{BoxRow, BoxStats, FileRow, VersionRow};
pub use sb_store::StoreError;

/// How often the auto-lock scanner wakes up.
const AUTO_LOCK_SCAN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Box is locked — unlock with password first")]
    Locked,

    #[error("Core has been shut down")]
    ShutDown,
}

pub struct Core {
    config: Config,
    store: Store,
    engine: Arc<BoxEngine>,
    sessions: SessionManager,
    discovery: OnceCell<Discovery>,
    hosts: Mutex<HashMap<String, ShareServer>>,
    auto_lock: Mutex<Option<AutoLockHandle>>,
    root_cancel: CancellationToken,
    shut_down: AtomicBool,
}

impl Core {
    /// Open the index, prepare blob storage, run the crash-recovery reaper
    /// and start the auto-lock scanner.
    pub async fn init(config: Config) -> Result<Self, CoreError> {
        let store = Store::open(&config.db_path).await?;
        let blobs = BlobStore::new(&config.storage_root);
        blobs.init().await?;

        let sessions =
            SessionManager::new(Duration::from_secs(config.auto_lock_minutes * 60));
        let engine = Arc::new(BoxEngine::new(
            store.clone(),
            blobs,
            sessions.clone(),
            config.max_file_size,
        ));

        let reaped = engine.reap_orphans().await?;
        if reaped > 0 {
            tracing::info!(reaped, "crash-recovery reaper cleaned up orphans");
        }

        let auto_lock = spawn_auto_lock(sessions.clone(), AUTO_LOCK_SCAN);

        Ok(Self {
            config,
            store,
            engine,
            sessions,
            discovery: OnceCell::new(),
            hosts: Mutex::new(HashMap::new()),
            auto_lock: Mutex::new(Some(auto_lock)),
            root_cancel: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The box engine, for everything §-file-level: add, read, versions,
    /// search, tags, deletes.
    pub fn engine(&self) -> &Arc<BoxEngine> {
        &self.engine
    }

    fn check_running(&self) -> Result<(), CoreError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutDown);
        }
        Ok(())
    }

    // ── Box lifecycle ────────────────────────────────────────────────────────

    pub async fn create_box(
        &self,
        owner: &str,
        name: &str,
        password: &str,
        public: bool,
    ) -> Result<Uuid, CoreError> {
        self.check_running()?;
        Ok(self.engine.create_box(owner, name, password, public).await?)
    }

    pub async fn open_box(&self, box_id: Uuid, password: &str) -> Result<(), CoreError> {
        self.check_running()?;
        Ok(self.engine.open_box(box_id, password).await?)
    }

    pub async fn close_box(&self, box_id: Uuid) {
        self.engine.close_box(box_id).await;
    }

    pub async fn list_boxes(&self, owner: &str) -> Result<Vec<BoxRow>, CoreError> {
        self.check_running()?;
        Ok(self.engine.list_boxes(owner).await?)
    }

    pub async fn set_auto_lock(&self, minutes: u64) {
        self.sessions
            .set_auto_lock(Duration::from_secs(minutes * 60))
            .await;
    }

    pub async fn lock_all(&self) {
        self.sessions.lock_all().await;
    }

    // ── Sharing ──────────────────────────────────────────────────────────────

    async fn discovery(&self) -> Result<&Discovery, CoreError> {
        Ok(self
            .discovery
            .get_or_try_init(|| async { Discovery::start() })
            .await?)
    }

    /// Advertise an unlocked box on the LAN. Returns the rendezvous code
    /// (for private boxes, the shared secret to hand to the peer).
    pub async fn start_hosting(&self, box_id: Uuid, public: bool) -> Result<String, CoreError> {
        self.check_running()?;
        if !self.sessions.is_unlocked(box_id).await {
            return Err(CoreError::Locked);
        }
        let box_row = self.engine.get_box(box_id).await?;

        let discovery = self.discovery().await?;
        let code = discovery.reserve_code().await;

        let server = match ShareServer::bind(
            self.engine.clone(),
            ShareServerConfig {
                box_id,
                box_name: box_row.name.clone(),
                code: code.clone(),
                is_public: public,
            },
            self.config.share_port,
            self.root_cancel.child_token(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                let _ = discovery.withdraw(&code).await;
                return Err(e.into());
            }
        };

        if let Err(e) = discovery
            .publish(
                &code,
                box_id,
                &box_row.owner,
                &box_row.name,
                server.port(),
                public,
            )
            .await
        {
            server.shutdown().await;
            let _ = discovery.withdraw(&code).await;
            return Err(e.into());
        }

        self.hosts.lock().await.insert(code.clone(), server);
        tracing::info!(%box_id, code, public, "hosting started");
        Ok(code)
    }

    /// Withdraw the advertisement and stop the server behind `code`.
    pub async fn stop_hosting(&self, code: &str) -> Result<(), CoreError> {
        let server = self
            .hosts
            .lock()
            .await
            .remove(code)
            .ok_or_else(|| CoreError::NotFound(format!("hosting {code}")))?;
        if let Some(discovery) = self.discovery.get() {
            let _ = discovery.withdraw(code).await;
        }
        server.shutdown().await;
        Ok(())
    }

    /// Live stream of LAN advertisements.
    pub async fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, CoreError> {
        self.check_running()?;
        Ok(self.discovery().await?.browse()?)
    }

    /// Resolve a peer's code and pull the selected files (by name; `None`
    /// pulls everything) into a local box.
    pub async fn pull(
        &self,
        code: &str,
        into_box: Uuid,
        selection: Option<&[String]>,
    ) -> Result<Vec<Uuid>, CoreError> {
        self.check_running()?;
        let options = PullOptions {
            per_file_timeout: Duration::from_secs(self.config.pull_file_timeout_secs),
            ..PullOptions::default()
        };
        let cancel = self.root_cancel.child_token();
        Ok(sb_net::pull(
            self.discovery().await?,
            &self.engine,
            code,
            into_box,
            selection,
            &options,
            &cancel,
        )
        .await?)
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Withdraw advertisements, stop serving, cancel active pulls, lock all
    /// boxes (zeroizing keys) and close the index. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("core shutting down");
        self.root_cancel.cancel();

        let hosts: Vec<(String, ShareServer)> =
            self.hosts.lock().await.drain().collect();
        for (code, server) in hosts {
            if let Some(discovery) = self.discovery.get() {
                let _ = discovery.withdraw(&code).await;
            }
            server.shutdown().await;
        }
        if let Some(discovery) = self.discovery.get() {
            discovery.stop().await;
        }

        if let Some(auto_lock) = self.auto_lock.lock().await.take() {
            auto_lock.shutdown().await;
        }

        self.sessions.lock_all().await;
        self.store.close().await;
    }
}
