use crate::{
    config::Credentials,
    dav::lock::LockManager,
    services::{lock_store::LockStore, object_store::ObjectStore},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub locks: LockManager,
    /// `None` disables authentication.
    pub credentials: Option<Credentials>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        lock_store: Arc<dyn LockStore>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            store,
            locks: LockManager::new(lock_store),
            credentials,
        }
    }
}
