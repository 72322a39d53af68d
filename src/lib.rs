//! bucket-dav: a WebDAV gateway over a flat, key-addressed object store.
//!
//! Collections are emulated with marker objects, locks live in a separate
//! expiring key/value store, and both stores default to SQLite plus local
//! disk. `routes::routes::routes` builds the complete axum application.

pub mod config;
pub mod dav;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
