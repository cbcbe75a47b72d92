use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use sb_store::{BlobStore, Store};

use crate::engine::BoxEngine;
use crate::error::EngineError;
use crate::session::SessionManager;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

struct TestEnv {
    engine: BoxEngine,
    store: Store,
    blobs: BlobStore,
    db_path: PathBuf,
    blob_root: PathBuf,
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(self.db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(self.db_path.with_extension("db-shm"));
        let _ = std::fs::remove_dir_all(&self.blob_root);
    }
}

async fn env_with_max(max_file_size: u64) -> TestEnv {
    let id = Uuid::new_v4();
    let db_path = PathBuf::from(format!("/tmp/sb-engine-test-{id}.db"));
    let blob_root = PathBuf::from(format!("/tmp/sb-engine-blobs-{id}"));

    let store = Store::open(&db_path).await.expect("open store");
    let blobs = BlobStore::new(&blob_root);
    blobs.init().await.expect("init blob store");
    let sessions = SessionManager::new(Duration::from_secs(900));
    let engine = BoxEngine::new(store.clone(), blobs.clone(), sessions, max_file_size);

    TestEnv {
        engine,
        store,
        blobs,
        db_path,
        blob_root,
    }
}

async fn env() -> TestEnv {
    env_with_max(100 * 1024 * 1024).await
}

fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

async fn blob_refcount(store: &Store, box_id: Uuid, hash: &str) -> Option<i64> {
    sqlx::query_scalar("SELECT ref_count FROM blobs WHERE box_id = ? AND blob_hash = ?")
        .bind(box_id.to_string())
        .bind(hash)
        .fetch_optional(&store.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn create_add_read_roundtrip() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "photos", "p@ss", false)
        .await
        .unwrap();

    let file_id = env
        .engine
        .add_file(box_id, "a.txt", b"hello", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    let back = env.engine.read_file(box_id, file_id, None).await.unwrap();
    assert_eq!(back, b"hello");

    let versions = env.engine.list_versions(box_id, file_id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].blob_hash, HELLO_SHA256);
    assert_eq!(versions[0].size, 5);
}

#[tokio::test]
async fn same_content_twice_dedups_to_one_blob() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    let f1 = env
        .engine
        .add_file(box_id, "a.txt", b"X", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    let f2 = env
        .engine
        .add_file(box_id, "a.txt", b"X", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    assert_eq!(f1, f2, "same name resolves to the same file");

    let versions = env.engine.list_versions(box_id, f1).await.unwrap();
    let seqs: Vec<i64> = versions.iter().map(|v| v.seq).collect();
    assert_eq!(seqs, vec![2, 1]);

    let hash = &versions[0].blob_hash;
    assert_eq!(blob_refcount(&env.store, box_id, hash).await, Some(2));

    // Exactly one physical file on disk.
    assert_eq!(env.blobs.scan().await.unwrap().len(), 1);
}

#[tokio::test]
async fn version_seqs_are_gapless_and_timestamps_monotonic() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    for content in [&b"one"[..], b"two", b"three"] {
        env.engine
            .add_file(box_id, "f", content, "text/plain", "", &[], &no_cancel())
            .await
            .unwrap();
    }

    let file_id = {
        let files = env.engine.list_files(box_id).await.unwrap();
        Uuid::parse_str(&files[0].file_id).unwrap()
    };
    let mut versions = env.engine.list_versions(box_id, file_id).await.unwrap();
    versions.reverse(); // oldest first
    for (i, v) in versions.iter().enumerate() {
        assert_eq!(v.seq, i as i64 + 1);
    }
    for pair in versions.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

#[tokio::test]
async fn restore_flips_current_without_new_version() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    let file_id = env
        .engine
        .add_file(box_id, "f", b"A", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    env.engine
        .add_file(box_id, "f", b"B", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    let versions = env.engine.list_versions(box_id, file_id).await.unwrap();
    let v1 = versions.iter().find(|v| v.seq == 1).unwrap();
    let v1_id = Uuid::parse_str(&v1.version_id).unwrap();

    env.engine
        .restore_version(box_id, file_id, v1_id)
        .await
        .unwrap();

    let back = env.engine.read_file(box_id, file_id, None).await.unwrap();
    assert_eq!(back, b"A");
    assert_eq!(
        env.engine.list_versions(box_id, file_id).await.unwrap().len(),
        2,
        "restore must not create a version"
    );
}

#[tokio::test]
async fn same_plaintext_in_two_boxes_is_isolated() {
    let env = env().await;
    let b1 = env
        .engine
        .create_box("alice", "one", "pw1", false)
        .await
        .unwrap();
    let b2 = env
        .engine
        .create_box("alice", "two", "pw2", false)
        .await
        .unwrap();

    let f1 = env
        .engine
        .add_file(b1, "f", b"shared", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    let f2 = env
        .engine
        .add_file(b2, "f", b"shared", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    assert_eq!(env.engine.read_file(b1, f1, None).await.unwrap(), b"shared");
    assert_eq!(env.engine.read_file(b2, f2, None).await.unwrap(), b"shared");

    // Two distinct ciphertexts under two DEKs.
    let hash = sb_crypto::hash::sha256_hex(b"shared");
    let ct1 = std::fs::read(env.blobs.blob_path(&b1.to_string(), &hash)).unwrap();
    let ct2 = std::fs::read(env.blobs.blob_path(&b2.to_string(), &hash)).unwrap();
    assert_ne!(ct1, ct2);
}

#[tokio::test]
async fn locked_box_rejects_reads_and_writes() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();
    let file_id = env
        .engine
        .add_file(box_id, "f", b"data", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    env.engine.close_box(box_id).await;

    assert!(matches!(
        env.engine.read_file(box_id, file_id, None).await,
        Err(EngineError::Locked)
    ));
    assert!(matches!(
        env.engine
            .add_file(box_id, "g", b"x", "text/plain", "", &[], &no_cancel())
            .await,
        Err(EngineError::Locked)
    ));

    // Unlocking with the right password brings it back.
    env.engine.open_box(box_id, "pw").await.unwrap();
    assert_eq!(
        env.engine.read_file(box_id, file_id, None).await.unwrap(),
        b"data"
    );
}

#[tokio::test]
async fn wrong_password_is_auth_failure() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "correct", false)
        .await
        .unwrap();
    env.engine.close_box(box_id).await;

    assert!(matches!(
        env.engine.open_box(box_id, "wrong").await,
        Err(EngineError::AuthFailure)
    ));
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let env = env_with_max(4).await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();
    assert!(matches!(
        env.engine
            .add_file(box_id, "f", b"12345", "text/plain", "", &[], &no_cancel())
            .await,
        Err(EngineError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn tampered_blob_is_detected_and_recoverable() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();
    let file_id = env
        .engine
        .add_file(box_id, "f", b"ROUND", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    let hash = sb_crypto::hash::sha256_hex(b"ROUND");
    let path = env.blobs.blob_path(&box_id.to_string(), &hash);
    let original = std::fs::read(&path).unwrap();

    let mut corrupted = original.clone();
    corrupted[0] ^= 0xFF;
    std::fs::write(&path, &corrupted).unwrap();

    assert!(matches!(
        env.engine.read_file(box_id, file_id, None).await,
        Err(EngineError::IntegrityFailure(_))
    ));
    // The file row survives the failed read.
    assert!(env.engine.get_file(box_id, file_id).await.is_ok());

    // Restoring the original bytes makes the read succeed again.
    std::fs::write(&path, &original).unwrap();
    assert_eq!(
        env.engine.read_file(box_id, file_id, None).await.unwrap(),
        b"ROUND"
    );
}

#[tokio::test]
async fn hard_delete_reclaims_blobs_at_zero_refs() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    // Two files sharing one blob.
    let f1 = env
        .engine
        .add_file(box_id, "one", b"shared", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    let f2 = env
        .engine
        .add_file(box_id, "two", b"shared", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    let hash = sb_crypto::hash::sha256_hex(b"shared");
    assert_eq!(blob_refcount(&env.store, box_id, &hash).await, Some(2));

    env.engine.hard_delete_file(box_id, f1).await.unwrap();
    assert_eq!(blob_refcount(&env.store, box_id, &hash).await, Some(1));
    assert!(env.blobs.blob_path(&box_id.to_string(), &hash).exists());

    env.engine.hard_delete_file(box_id, f2).await.unwrap();
    assert_eq!(blob_refcount(&env.store, box_id, &hash).await, None);
    assert!(!env.blobs.blob_path(&box_id.to_string(), &hash).exists());
    assert!(env.engine.list_files(box_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn soft_delete_hides_file_and_frees_its_name() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();
    let file_id = env
        .engine
        .add_file(box_id, "doc", b"v1", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    env.engine.soft_delete_file(box_id, file_id).await.unwrap();
    assert!(env.engine.list_files(box_id).await.unwrap().is_empty());
    assert!(env.engine.search(box_id, "doc").await.unwrap().is_empty());
    assert!(matches!(
        env.engine.read_file(box_id, file_id, None).await,
        Err(EngineError::NotFound(_))
    ));

    // Name is reusable; the new file starts its own history.
    let replacement = env
        .engine
        .add_file(box_id, "doc", b"v2", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    assert_ne!(replacement, file_id);
    assert_eq!(
        env.engine
            .read_file(box_id, replacement, None)
            .await
            .unwrap(),
        b"v2"
    );
}

#[tokio::test]
async fn search_matches_prefixes_and_tags() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    env.engine
        .add_file(
            box_id,
            "vacation.jpg",
            b"1",
            "image/jpeg",
            "summer trip",
            &["Beach".to_string(), "travel".to_string()],
            &no_cancel(),
        )
        .await
        .unwrap();
    env.engine
        .add_file(
            box_id,
            "taxes.pdf",
            b"2",
            "application/pdf",
            "2025 returns",
            &[],
            &no_cancel(),
        )
        .await
        .unwrap();

    let hits = env.engine.search(box_id, "vaca").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "vacation.jpg");

    let hits = env.engine.search(box_id, "summer").await.unwrap();
    assert_eq!(hits.len(), 1);

    // Tag comparisons are case-insensitive.
    let tagged = env.engine.filter_by_tag(box_id, "BEACH").await.unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].name, "vacation.jpg");

    assert!(env.engine.search(box_id, "nonsense").await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_add_leaves_no_trace() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();

    assert!(matches!(
        env.engine
            .add_file(box_id, "f", b"data", "text/plain", "", &[], &cancelled)
            .await,
        Err(EngineError::Cancelled)
    ));
    assert!(env.engine.list_files(box_id).await.unwrap().is_empty());
    assert!(env.blobs.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn reaper_removes_orphaned_blob_files() {
    let env = env().await;
    let box_id = env
        .engine
        .create_box("alice", "b", "pw", false)
        .await
        .unwrap();
    env.engine
        .add_file(box_id, "keep", b"kept", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    // Simulate a crash that left a blob file with no row.
    let stray = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    env.blobs
        .put(&box_id.to_string(), stray, b"garbage")
        .await
        .unwrap();

    let removed = env.engine.reap_orphans().await.unwrap();
    assert_eq!(removed, 1);
    assert!(!env.blobs.blob_path(&box_id.to_string(), stray).exists());

    // The legitimate blob is untouched.
    let kept_hash = sb_crypto::hash::sha256_hex(b"kept");
    assert!(env
        .blobs
        .blob_path(&box_id.to_string(), &kept_hash)
        .exists());
}

#[tokio::test]
async fn list_boxes_and_stats() {
    let env = env().await;
    let b1 = env
        .engine
        .create_box("alice", "first", "pw", false)
        .await
        .unwrap();
    env.engine
        .create_box("bob", "other", "pw", false)
        .await
        .unwrap();

    let alices = env.engine.list_boxes("alice").await.unwrap();
    assert_eq!(alices.len(), 1);
    assert_eq!(alices[0].name, "first");

    env.engine
        .add_file(b1, "f1", b"12345", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();
    env.engine
        .add_file(b1, "f2", b"123", "text/plain", "", &[], &no_cancel())
        .await
        .unwrap();

    let stats = env.engine.box_stats(b1).await.unwrap();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.total_size, 8);
}
