//! Fixtures shared by unit tests across the crate.

use crate::{
    dav::collection::collection_metadata,
    models::object::{CustomMetadata, HttpMetadata, StoredObject},
    services::{
        database,
        object_store::{ObjectStore, body_from_bytes, empty_body},
        storage_service::StorageService,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// A migrated private in-memory database.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let db = database::connect_in_memory().await.unwrap();
    database::run_migrations(&db).await.unwrap();
    Arc::new(db)
}

/// A `StorageService` over a fresh database and temp directory. Keep the
/// `TempDir` alive for the duration of the test.
pub async fn storage() -> (StorageService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (StorageService::new(memory_pool().await, dir.path()), dir)
}

pub async fn put_text(store: &dyn ObjectStore, key: &str, text: &'static str) -> StoredObject {
    store
        .put(
            key,
            body_from_bytes(text),
            HttpMetadata::default(),
            CustomMetadata::new(),
        )
        .await
        .unwrap()
}

pub async fn put_collection(store: &dyn ObjectStore, key: &str) -> StoredObject {
    store
        .put(
            key,
            empty_body(),
            HttpMetadata::default(),
            collection_metadata(),
        )
        .await
        .unwrap()
}
