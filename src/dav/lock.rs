//! Exclusive write locks kept in the expiring lock store.
//!
//! Locks are advisory: holding one only makes a second LOCK on the same path
//! fail. Nothing here gates reads, writes, or descendants of the locked path,
//! and `release` does not check the caller's token.

use crate::{
    dav::{path::href_for, props::xml_escape, xml::XmlValue},
    services::lock_store::LockStore,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

pub const LOCK_TIMEOUT: Duration = Duration::from_secs(600);
const LOCK_KEY_PREFIX: &str = "lock_";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("resource is already locked")]
    AlreadyLocked,
    #[error("incomplete lock request: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl LockScope {
    fn as_str(self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }
}

/// The parts of a `<lockinfo>` body the gateway uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    pub scope: LockScope,
    pub owner_href: String,
}

impl LockInfo {
    /// Read a folded `{lockinfo: {...}}` mapping (prefixes already dropped).
    pub fn from_value(value: &XmlValue) -> Result<Self, LockError> {
        let info = value
            .get("lockinfo")
            .ok_or(LockError::Malformed("missing lockinfo"))?;

        match info.get("locktype").and_then(XmlValue::as_text) {
            Some("write") => {}
            Some(_) => return Err(LockError::Malformed("unsupported locktype")),
            None => return Err(LockError::Malformed("missing locktype")),
        }

        let scope = match info.get("lockscope").and_then(XmlValue::as_text) {
            Some("exclusive") => LockScope::Exclusive,
            Some("shared") => LockScope::Shared,
            Some(_) => return Err(LockError::Malformed("unsupported lockscope")),
            None => return Err(LockError::Malformed("missing lockscope")),
        };

        let owner_href = info
            .get("owner")
            .and_then(|owner| owner.get("href"))
            .and_then(XmlValue::as_text)
            .ok_or(LockError::Malformed("missing owner href"))?;

        Ok(Self {
            scope,
            owner_href: owner_href.to_string(),
        })
    }
}

/// A granted lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveLock {
    pub token: String,
    pub path: String,
    pub scope: LockScope,
    pub owner_href: String,
    pub timeout: Duration,
}

impl ActiveLock {
    fn new(path: &str, info: LockInfo, timeout: Duration) -> Self {
        Self {
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            path: path.to_string(),
            scope: info.scope,
            owner_href: info.owner_href,
            timeout,
        }
    }

    /// `Lock-Token` response header value.
    pub fn token_header(&self) -> String {
        format!("<{}>", self.token)
    }

    /// The `<lockdiscovery>` fragment stored with the lock and embedded in
    /// PROPFIND and LOCK responses.
    pub fn discovery_xml(&self) -> String {
        format!(
            "<lockdiscovery><activelock>\
<locktype><write/></locktype>\
<lockscope><{scope}/></lockscope>\
<locktoken><href>{token}</href></locktoken>\
<lockroot><href>{root}</href></lockroot>\
<depth>infinity</depth>\
<owner><a:href xmlns:a=\"DAV:\">{owner}</a:href></owner>\
<timeout>Second-{timeout}</timeout>\
</activelock></lockdiscovery>",
            scope = self.scope.as_str(),
            token = xml_escape(&self.token),
            root = xml_escape(&href_for(&self.path, false)),
            owner = xml_escape(&self.owner_href),
            timeout = self.timeout.as_secs(),
        )
    }
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_ttl(store, LOCK_TIMEOUT)
    }

    pub fn with_ttl(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn store_key(path: &str) -> String {
        format!("{LOCK_KEY_PREFIX}{path}")
    }

    /// A lock that is granted but never recorded. Used for the root, which
    /// cannot be locked as an ordinary resource.
    pub fn issue(&self, path: &str, body: &XmlValue) -> Result<ActiveLock, LockError> {
        let info = LockInfo::from_value(body)?;
        Ok(ActiveLock::new(path, info, self.ttl))
    }

    /// Lock `path` unless a lock is already held.
    ///
    /// The early lookup only decides which error a locked path with a bad
    /// body gets; exclusivity comes from the conditional insert.
    pub async fn acquire(&self, path: &str, body: &XmlValue) -> Result<ActiveLock, LockError> {
        if self.lookup(path).await?.is_some() {
            return Err(LockError::AlreadyLocked);
        }
        let lock = self.issue(path, body)?;
        let stored = self
            .store
            .put_if_absent(&Self::store_key(path), &lock.discovery_xml(), self.ttl)
            .await?;
        if !stored {
            return Err(LockError::AlreadyLocked);
        }
        tracing::debug!("locked `{}` as {}", path, lock.token);
        Ok(lock)
    }

    /// Drop any lock on `path`.
    pub async fn release(&self, path: &str) -> Result<(), LockError> {
        self.store.delete(&Self::store_key(path)).await?;
        Ok(())
    }

    /// The stored discovery fragment of the lock on `path`, if any.
    pub async fn lookup(&self, path: &str) -> Result<Option<String>, LockError> {
        Ok(self.store.get(&Self::store_key(path)).await?)
    }
}
