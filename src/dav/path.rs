//! Request paths to resource keys and back.
//!
//! A key has no leading and no trailing slash; the root collection is `""`.
//! Percent-decoding is the only normalization applied: `.` and `..` segments
//! are kept verbatim, which is harmless here because keys never touch the
//! filesystem directly.

use std::borrow::Cow;
use url::Url;

/// A resolved request target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePath {
    pub key: String,
    /// The request path ended in `/`, asking for collection semantics.
    pub trailing_slash: bool,
}

impl ResourcePath {
    pub fn from_uri_path(path: &str) -> Self {
        let decoded = urlencoding::decode(path)
            .unwrap_or_else(|_| Cow::Borrowed(path))
            .into_owned();
        let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);
        let trailing_slash = decoded.ends_with('/');
        let key = trimmed.strip_suffix('/').unwrap_or(trimmed).to_string();
        Self {
            key,
            trailing_slash,
        }
    }

    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }
}

/// Key of the collection containing `key`; `""` for top-level keys.
pub fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Last segment of `key`.
pub fn child_name(key: &str) -> &str {
    key.rsplit_once('/').map_or(key, |(_, name)| name)
}

/// Resolve a `Destination` header. Absolute URLs are reduced to their path;
/// absolute paths are accepted as-is. Anything else is `None`.
pub fn destination_key(header: &str) -> Option<ResourcePath> {
    match Url::parse(header) {
        Ok(url) if url.has_host() => Some(ResourcePath::from_uri_path(url.path())),
        Ok(_) => None,
        Err(_) if header.starts_with('/') => {
            let path = header.split(['?', '#']).next().unwrap_or(header);
            Some(ResourcePath::from_uri_path(path))
        }
        Err(_) => None,
    }
}

/// The `href` a client should use for `key`: each segment percent-encoded,
/// collections (other than the root) carrying a trailing slash.
pub fn href_for(key: &str, collection: bool) -> String {
    if key.is_empty() {
        return "/".to_string();
    }
    let mut href = String::with_capacity(key.len() + 2);
    for segment in key.split('/') {
        href.push('/');
        href.push_str(&urlencoding::encode(segment));
    }
    if collection {
        href.push('/');
    }
    href
}
