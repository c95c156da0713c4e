//! Integration tests: the OpenDAL-backed stores behave like the in-memory
//! ones, over both the memory service and a temporary directory.

use bytes::Bytes;
use ctfs_core::config::StorageConfig;
use ctfs_core::{ContentHash, CtfsError, Location, MapKey, PublicKeyHash};
use ctfs_crypto::SigningIdentity;
use ctfs_storage::{build_operator, BlockStore, OpendalBlockStore, OpendalPointerStore, PointerStore};
use opendal::Operator;
use tempfile::TempDir;

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn fs_operator(dir: &TempDir) -> Operator {
    build_operator(&StorageConfig {
        backend: "fs".into(),
        root: dir.path().to_path_buf(),
        retry_max_times: 1,
    })
    .expect("fs operator")
}

async fn exercise_blocks(store: OpendalBlockStore) {
    let owner = PublicKeyHash::random();
    let tid = store.start_transaction(&owner).await.unwrap();

    let data = Bytes::from(vec![42u8; 10_000]);
    let hash = store.put(&tid, data.clone()).await.unwrap();
    assert_eq!(store.put(&tid, data.clone()).await.unwrap(), hash);
    assert_eq!(store.get(&hash).await.unwrap(), Some(data));
    assert!(store.get(&ContentHash::random()).await.unwrap().is_none());

    store.close_transaction(&tid).await.unwrap();
    let err = store
        .put(&tid, Bytes::from_static(b"after close"))
        .await
        .unwrap_err();
    assert!(matches!(err, CtfsError::Storage(_)));
}

async fn exercise_pointers(store: OpendalPointerStore) {
    let signer = SigningIdentity::generate();
    let loc = Location::new(
        PublicKeyHash::random(),
        signer.public_key_hash(),
        MapKey::random(),
    );
    let (a, b) = (ContentHash::random(), ContentHash::random());

    assert!(store.get(&loc).await.unwrap().is_none());
    store.cas(&loc, None, a, &signer).await.unwrap();
    assert!(store
        .cas(&loc, None, b, &signer)
        .await
        .unwrap_err()
        .is_retryable());
    store.cas(&loc, Some(a), b, &signer).await.unwrap();
    assert_eq!(store.get(&loc).await.unwrap(), Some(b));

    let other = SigningIdentity::generate();
    assert!(matches!(
        store.cas(&loc, Some(b), a, &other).await,
        Err(CtfsError::NotWritable(_))
    ));

    store.remove(&loc, b, &signer).await.unwrap();
    assert!(store.get(&loc).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_service_blocks() {
    exercise_blocks(OpendalBlockStore::new(memory_operator())).await;
}

#[tokio::test]
async fn memory_service_pointers() {
    exercise_pointers(OpendalPointerStore::new(memory_operator())).await;
}

#[tokio::test]
async fn fs_service_blocks() {
    let dir = TempDir::new().unwrap();
    exercise_blocks(OpendalBlockStore::new(fs_operator(&dir))).await;
}

#[tokio::test]
async fn fs_service_pointers() {
    let dir = TempDir::new().unwrap();
    exercise_pointers(OpendalPointerStore::new(fs_operator(&dir))).await;
}

#[tokio::test]
async fn concurrent_cas_has_one_winner() {
    let store = OpendalPointerStore::new(memory_operator());
    let signer = SigningIdentity::generate();
    let loc = Location::new(
        PublicKeyHash::random(),
        signer.public_key_hash(),
        MapKey::random(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let signer = signer.clone();
        handles.push(tokio::spawn(async move {
            store.cas(&loc, None, ContentHash::random(), &signer).await
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}
