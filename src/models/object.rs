//! Represents an object stored under a flat key.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Free-form string metadata attached to an object by the gateway itself.
///
/// The only entry the gateway relies on is the collection marker.
pub type CustomMetadata = BTreeMap<String, String>;

/// HTTP-style metadata captured from the upload request and replayed on reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpMetadata {
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
}

impl HttpMetadata {
    /// Capture the metadata headers of an incoming request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            content_type: read(header::CONTENT_TYPE),
            content_language: read(header::CONTENT_LANGUAGE),
            content_disposition: read(header::CONTENT_DISPOSITION),
            content_encoding: read(header::CONTENT_ENCODING),
            cache_control: read(header::CACHE_CONTROL),
        }
    }

    /// Write every present field back as a response header.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let fields = [
            (header::CONTENT_TYPE, &self.content_type),
            (header::CONTENT_LANGUAGE, &self.content_language),
            (header::CONTENT_DISPOSITION, &self.content_disposition),
            (header::CONTENT_ENCODING, &self.content_encoding),
            (header::CACHE_CONTROL, &self.cache_control),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.insert(name, header_value);
                }
            }
        }
    }
}

/// Metadata of a single stored object (the payload itself lives elsewhere).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Flat key, no leading or trailing slash.
    pub key: String,

    /// Payload size in bytes.
    pub size: u64,

    /// Hex MD5 of the payload, unquoted.
    pub etag: String,

    pub http_metadata: HttpMetadata,

    pub custom_metadata: CustomMetadata,

    /// When this version of the object was written.
    pub uploaded: DateTime<Utc>,
}

impl StoredObject {
    /// The ETag in its quoted HTTP form.
    pub fn http_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

/// Row shape of the `objects` table.
#[derive(FromRow, Debug)]
pub struct ObjectRow {
    pub key: String,
    pub size_bytes: i64,
    pub etag: String,
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    /// JSON-encoded `CustomMetadata`.
    pub custom_metadata: String,
    pub uploaded_at: DateTime<Utc>,
}

impl TryFrom<ObjectRow> for StoredObject {
    type Error = serde_json::Error;

    fn try_from(row: ObjectRow) -> Result<Self, Self::Error> {
        let custom_metadata = if row.custom_metadata.is_empty() {
            CustomMetadata::new()
        } else {
            serde_json::from_str(&row.custom_metadata)?
        };

        Ok(Self {
            key: row.key,
            size: row.size_bytes.max(0) as u64,
            etag: row.etag,
            http_metadata: HttpMetadata {
                content_type: row.content_type,
                content_language: row.content_language,
                content_disposition: row.content_disposition,
                content_encoding: row.content_encoding,
                cache_control: row.cache_control,
            },
            custom_metadata,
            uploaded: row.uploaded_at,
        })
    }
}
