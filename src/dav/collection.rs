//! Collections over a flat key space.
//!
//! A collection is a zero-length object whose custom metadata carries the
//! `resourcetype` marker. Everything "inside" collection `a` has a key starting
//! with `a/`; the root is virtual and contains every key.

use crate::{
    dav::path::parent_key,
    models::object::{CustomMetadata, StoredObject},
    services::object_store::{ListOptions, ObjectStore, StorageResult},
};
use std::collections::VecDeque;

pub const RESOURCETYPE_KEY: &str = "resourcetype";
pub const COLLECTION_MARKER: &str = "<collection />";
pub const DEFAULT_PAGE_SIZE: usize = 1000;

pub fn is_collection(object: &StoredObject) -> bool {
    object
        .custom_metadata
        .get(RESOURCETYPE_KEY)
        .is_some_and(|value| value == COLLECTION_MARKER)
}

/// Custom metadata that marks an object as a collection.
pub fn collection_metadata() -> CustomMetadata {
    CustomMetadata::from([(RESOURCETYPE_KEY.to_string(), COLLECTION_MARKER.to_string())])
}

/// Whether `key` may be created: its parent is the root or a stored collection.
pub async fn parent_is_collection(store: &dyn ObjectStore, key: &str) -> StorageResult<bool> {
    let parent = parent_key(key);
    if parent.is_empty() {
        return Ok(true);
    }
    Ok(store
        .head(parent)
        .await?
        .is_some_and(|object| is_collection(&object)))
}

/// Where a `Listing` stands. Cloneable so a walk can be checkpointed and
/// picked up again later with `Listing::resume`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListingState {
    /// No page fetched yet.
    Start,
    /// More pages follow; the store cursor for the next one.
    Next(String),
    /// The last page has been fetched.
    Exhausted,
}

/// Page-by-page walk over the members of a collection, either its immediate
/// children or its whole subtree.
pub struct Listing {
    prefix: String,
    skip: Option<String>,
    delimiter: Option<String>,
    page_size: usize,
    state: ListingState,
    buffer: VecDeque<StoredObject>,
}

impl Listing {
    /// Immediate children of `key`.
    pub fn children(key: &str) -> Self {
        Self::under(key, false)
    }

    /// Every descendant of `key`, at any depth.
    pub fn subtree(key: &str) -> Self {
        Self::under(key, true)
    }

    pub fn under(key: &str, recursive: bool) -> Self {
        let (prefix, skip) = if key.is_empty() {
            (String::new(), None)
        } else {
            (format!("{key}/"), Some(key.to_string()))
        };
        Self {
            prefix,
            skip,
            delimiter: (!recursive).then(|| "/".to_string()),
            page_size: DEFAULT_PAGE_SIZE,
            state: ListingState::Start,
            buffer: VecDeque::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Checkpoint. Objects already fetched but not yet handed out by
    /// `next_object` are not covered, so take it between pages.
    pub fn state(&self) -> &ListingState {
        &self.state
    }

    /// Continue from a checkpoint taken on an identically built listing.
    pub fn resume(mut self, state: ListingState) -> Self {
        self.state = state;
        self.buffer.clear();
        self
    }

    /// Fetch the next page. `None` once the walk is exhausted; a page may be
    /// empty when everything on it was rolled up under the delimiter.
    pub async fn next_page(
        &mut self,
        store: &dyn ObjectStore,
    ) -> StorageResult<Option<Vec<StoredObject>>> {
        let cursor = match &self.state {
            ListingState::Exhausted => return Ok(None),
            ListingState::Start => None,
            ListingState::Next(cursor) => Some(cursor.clone()),
        };

        let page = store
            .list(ListOptions {
                prefix: self.prefix.clone(),
                delimiter: self.delimiter.clone(),
                cursor,
                limit: self.page_size,
            })
            .await?;

        self.state = match page.cursor {
            Some(cursor) if page.truncated => ListingState::Next(cursor),
            _ => ListingState::Exhausted,
        };

        let skip = self.skip.as_deref();
        Ok(Some(
            page.objects
                .into_iter()
                .filter(|object| Some(object.key.as_str()) != skip)
                .collect(),
        ))
    }

    pub async fn next_object(
        &mut self,
        store: &dyn ObjectStore,
    ) -> StorageResult<Option<StoredObject>> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                return Ok(Some(object));
            }
            match self.next_page(store).await? {
                Some(page) => self.buffer.extend(page),
                None => return Ok(None),
            }
        }
    }

    /// Drain the remaining walk into memory.
    pub async fn collect(mut self, store: &dyn ObjectStore) -> StorageResult<Vec<StoredObject>> {
        let mut objects: Vec<StoredObject> = self.buffer.drain(..).collect();
        while let Some(page) = self.next_page(store).await? {
            objects.extend(page);
        }
        Ok(objects)
    }
}

/// Delete `key` and, for a collection, everything beneath it. The root
/// deletes every stored key. Returns `false` when `key` does not exist.
pub async fn remove_tree(store: &dyn ObjectStore, key: &str) -> StorageResult<bool> {
    if !key.is_empty() {
        let Some(object) = store.head(key).await? else {
            return Ok(false);
        };
        store.delete(key).await?;
        if !is_collection(&object) {
            return Ok(true);
        }
    }

    let mut listing = Listing::subtree(key);
    while let Some(page) = listing.next_page(store).await? {
        let keys: Vec<String> = page.into_iter().map(|object| object.key).collect();
        if !keys.is_empty() {
            tracing::debug!("deleting {} keys under `{}`", keys.len(), key);
            store.delete_many(&keys).await?;
        }
    }
    Ok(true)
}

/// The `Depth` request header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    /// A missing header means infinity; unrecognized values yield `None`.
    pub fn from_header(value: Option<&str>) -> Option<Depth> {
        match value.map(str::trim) {
            None => Some(Depth::Infinity),
            Some("0") => Some(Depth::Zero),
            Some("1") => Some(Depth::One),
            Some(value) if value.eq_ignore_ascii_case("infinity") => Some(Depth::Infinity),
            Some(_) => None,
        }
    }
}
