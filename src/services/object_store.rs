//! The flat object store the gateway is layered on.
//!
//! The store knows nothing about directories, locks or properties: it offers
//! list / head / get / put / delete over flat string keys. `StorageService`
//! is the bundled implementation; anything else satisfying `ObjectStore` can be
//! plugged into `AppState`.

use crate::models::object::{CustomMetadata, HttpMetadata, StoredObject};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use std::io;
use thiserror::Error;

/// Streaming object payload.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("range not satisfiable for an object of {size} bytes")]
    RangeNotSatisfiable { size: u64 },
    #[error("invalid list cursor")]
    InvalidCursor,
    #[error("metadata encoding: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One `list` call.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Only keys starting with this string are returned.
    pub prefix: String,
    /// When set, keys with the delimiter after the prefix are rolled up.
    pub delimiter: Option<String>,
    /// Opaque cursor from a previous truncated page.
    pub cursor: Option<String>,
    /// Maximum rows per page.
    pub limit: usize,
}

/// One page of list results.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<StoredObject>,
    pub delimited_prefixes: Vec<String>,
    pub truncated: bool,
    pub cursor: Option<String>,
}

/// A byte range as requested by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=offset-` or `bytes=offset-last`
    From { offset: u64, length: Option<u64> },
    /// `bytes=-n`
    Suffix(u64),
}

/// A range resolved against an object's size; `end` is inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    pub offset: u64,
    pub end: u64,
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.offset + 1
    }

    /// `Content-Range` header value.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.offset, self.end, size)
    }
}

impl ByteRange {
    /// Parse a single-range `Range` header. Multi-range requests and other
    /// units yield `None`, in which case the full object is served.
    pub fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }

        let offset: u64 = start.parse().ok()?;
        if end.is_empty() {
            return Some(ByteRange::From {
                offset,
                length: None,
            });
        }
        let last: u64 = end.parse().ok()?;
        if last < offset {
            return None;
        }
        Some(ByteRange::From {
            offset,
            length: Some(last - offset + 1),
        })
    }

    /// Clamp the range to an object of `size` bytes. `None` means unsatisfiable.
    pub fn resolve(&self, size: u64) -> Option<ResolvedRange> {
        if size == 0 {
            return None;
        }
        match *self {
            ByteRange::From { offset, length } => {
                if offset >= size {
                    return None;
                }
                let end = match length {
                    Some(0) => return None,
                    Some(length) => offset.saturating_add(length - 1).min(size - 1),
                    None => size - 1,
                };
                Some(ResolvedRange { offset, end })
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(n) => Some(ResolvedRange {
                offset: size.saturating_sub(n),
                end: size - 1,
            }),
        }
    }
}

/// Conditional request headers, evaluated by the store against the stored
/// object before any payload is read.
#[derive(Clone, Debug, Default)]
pub struct Conditional {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Conditional {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let date = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|d| d.with_timezone(&Utc))
        };

        Self {
            if_match: text(header::IF_MATCH),
            if_none_match: text(header::IF_NONE_MATCH),
            if_modified_since: date(header::IF_MODIFIED_SINCE),
            if_unmodified_since: date(header::IF_UNMODIFIED_SINCE),
        }
    }

    /// Whether the payload should be served. Follows the RFC 7232 evaluation
    /// order; dates compare at whole-second precision.
    pub fn permits(&self, object: &StoredObject) -> bool {
        let uploaded = object.uploaded.timestamp();

        if let Some(list) = &self.if_match {
            if !etag_list_contains(list, &object.etag) {
                return false;
            }
        } else if let Some(since) = &self.if_unmodified_since {
            if uploaded > since.timestamp() {
                return false;
            }
        }

        if let Some(list) = &self.if_none_match {
            if etag_list_contains(list, &object.etag) {
                return false;
            }
        } else if let Some(since) = &self.if_modified_since {
            if uploaded <= since.timestamp() {
                return false;
            }
        }

        true
    }
}

fn etag_list_contains(list: &str, etag: &str) -> bool {
    list.split(',').map(str::trim).any(|candidate| {
        candidate == "*"
            || candidate
                .trim_start_matches("W/")
                .trim_matches('"')
                .eq(etag)
    })
}

#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    pub conditional: Conditional,
    pub range: Option<ByteRange>,
}

/// A readable object: metadata, the served range, and the payload stream.
pub struct ObjectContent {
    pub object: StoredObject,
    pub range: Option<ResolvedRange>,
    pub body: ObjectBody,
}

pub enum GetOutcome {
    Body(ObjectContent),
    /// The conditional headers ruled the payload out.
    NotModified(StoredObject),
}

/// A payload made of a single in-memory chunk.
pub fn body_from_bytes(bytes: impl Into<Bytes>) -> ObjectBody {
    let bytes = bytes.into();
    futures::stream::once(async move { Ok(bytes) }).boxed()
}

pub fn empty_body() -> ObjectBody {
    futures::stream::empty().boxed()
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// One page of objects under `options.prefix`, ordered by key.
    async fn list(&self, options: ListOptions) -> StorageResult<ListPage>;

    async fn head(&self, key: &str) -> StorageResult<Option<StoredObject>>;

    async fn get(&self, key: &str, options: GetOptions) -> StorageResult<Option<GetOutcome>>;

    /// Store `body` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &str,
        body: ObjectBody,
        http_metadata: HttpMetadata,
        custom_metadata: CustomMetadata,
    ) -> StorageResult<StoredObject>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}
