//! HTTP handlers: the WebDAV method dispatcher and the health checks.

pub mod dav_handlers;
pub mod health_handlers;
