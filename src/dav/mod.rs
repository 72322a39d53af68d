//! The WebDAV layer: how a flat object store is presented as a tree of
//! collections and documents, plus locking and the XML bodies DAV clients
//! exchange.

pub mod collection;
pub mod lock;
pub mod path;
pub mod props;
pub mod transfer;
pub mod xml;

use axum::http::{HeaderName, HeaderValue};

/// Methods answered by the gateway, as advertised in `Allow`.
pub const SUPPORTED_METHODS: [&str; 12] = [
    "OPTIONS", "PROPFIND", "MKCOL", "GET", "HEAD", "PUT", "COPY", "MOVE", "PROPPATCH", "DELETE",
    "UNLOCK", "LOCK",
];

/// Compliance class advertised in the `DAV` header.
pub const DAV_CLASS: &str = "1";

pub const DAV: HeaderName = HeaderName::from_static("dav");
pub const DEPTH: HeaderName = HeaderName::from_static("depth");
pub const DESTINATION: HeaderName = HeaderName::from_static("destination");
pub const OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
pub const LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");

pub fn allow_header() -> HeaderValue {
    HeaderValue::from_static(
        "OPTIONS, PROPFIND, MKCOL, GET, HEAD, PUT, COPY, MOVE, PROPPATCH, DELETE, UNLOCK, LOCK",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_header_lists_supported_methods() {
        assert_eq!(allow_header(), SUPPORTED_METHODS.join(", ").as_str());
    }
}
