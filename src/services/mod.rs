//! Storage backends: the object store the gateway serves and the expiring
//! key/value store that holds locks.

pub mod database;
pub mod lock_store;
pub mod object_store;
pub mod storage_service;

#[cfg(test)]
pub(crate) mod testing;
