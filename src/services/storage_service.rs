//! src/services/storage_service.rs
//!
//! StorageService: the flat object store backed by SQLite for metadata and
//! local disk for payloads. Payload files are sharded beneath
//! `base_path/{shard}/{shard}/{md5(key)}` so that keys which look like nested
//! paths never collide with each other on disk.

use crate::models::object::{CustomMetadata, HttpMetadata, ObjectRow, StoredObject};
use crate::services::object_store::{
    GetOptions, GetOutcome, ListOptions, ListPage, ObjectBody, ObjectContent, ObjectStore,
    StorageError, StorageResult,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// StorageService provides the object store operations the WebDAV layer needs:
/// - Put an object (streams bytes to disk and upserts metadata into SQLite)
/// - Get / head an object (metadata from SQLite, payload from disk)
/// - List objects by prefix, optionally rolled up on a delimiter
/// - Delete objects (metadata row and payload file)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_LIST_LIMIT: usize = 1000;
const OBJECT_COLUMNS: &str = "key, size_bytes, etag, content_type, content_language, \
     content_disposition, content_encoding, cache_control, custom_metadata, uploaded_at";

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Keys are flat: no leading or trailing slash, no control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.ends_with('/')
            || key.bytes().any(|b| b.is_ascii_control());
        if invalid {
            return Err(StorageError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Construct the payload path for a key.
    ///
    /// Combines base_path/{shard}/{shard}/{md5(key)}; the first two digest
    /// bytes pick the shard directories. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        let mut path = self.base_path.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    /// Fetch an object's metadata row, if any.
    async fn fetch_object(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;

        row.map(StoredObject::try_from)
            .transpose()
            .map_err(StorageError::from)
    }

    /// Stream a payload into a temp file next to its final location, then
    /// rename it into place. Returns the size and hex MD5 of what was written.
    ///
    /// Ensures durable writes (fsync) and cleans up temp files on errors.
    async fn write_payload(
        &self,
        file_path: &Path,
        mut body: ObjectBody,
    ) -> StorageResult<(i64, String)> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Open the payload of `object`, positioned at `range` when given.
    ///
    /// Returns `None` when the metadata row exists but the file is gone.
    async fn open_payload(
        &self,
        object: &StoredObject,
        range: Option<(u64, u64)>,
    ) -> StorageResult<Option<ObjectBody>> {
        let file_path = self.object_path(&object.key);
        let mut file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "payload for `{}` missing at {}",
                    object.key,
                    file_path.display()
                );
                return Ok(None);
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        let body = match range {
            Some((offset, len)) => {
                file.seek(SeekFrom::Start(offset)).await?;
                ReaderStream::new(file.take(len)).boxed()
            }
            None => ReaderStream::new(file).boxed(),
        };
        Ok(Some(body))
    }

    /// Recursively remove empty shard directories up to the base path.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let stop = self.base_path.as_path();
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    /// List objects ordered by key.
    ///
    /// Supports:
    /// - prefix filtering (exact byte prefix, no LIKE wildcards)
    /// - delimiter roll-up into `delimited_prefixes`
    /// - opaque base64 continuation cursors
    async fn list(&self, options: ListOptions) -> StorageResult<ListPage> {
        let limit = options.limit.clamp(1, MAX_LIST_LIMIT);
        let fetch_limit = limit + 1;
        let after = options
            .cursor
            .as_deref()
            .map(decode_cursor)
            .transpose()?;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE substr(key, 1, length("
        ));
        builder.push_bind(options.prefix.clone());
        builder.push(")) = ");
        builder.push_bind(options.prefix.clone());

        if let Some(after) = after {
            builder.push(" AND key > ");
            builder.push_bind(after);
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let truncated = rows.len() > limit;
        rows.truncate(limit);
        let cursor = if truncated {
            rows.last().map(|row| encode_cursor(&row.key))
        } else {
            None
        };

        let mut objects = Vec::new();
        let mut delimited_prefixes = BTreeSet::new();
        for row in rows {
            if let Some(delim) = &options.delimiter {
                if let Some(prefix) = compute_common_prefix(&row.key, &options.prefix, delim) {
                    delimited_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(StoredObject::try_from(row)?);
        }

        Ok(ListPage {
            objects,
            delimited_prefixes: delimited_prefixes.into_iter().collect(),
            truncated,
            cursor,
        })
    }

    async fn head(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        self.ensure_key_safe(key)?;
        self.fetch_object(key).await
    }

    /// Fetch an object for reading.
    ///
    /// Conditional headers are evaluated before the payload is opened; a
    /// failed condition yields `NotModified` with the metadata only.
    async fn get(&self, key: &str, options: GetOptions) -> StorageResult<Option<GetOutcome>> {
        self.ensure_key_safe(key)?;
        let Some(object) = self.fetch_object(key).await? else {
            return Ok(None);
        };

        if !options.conditional.permits(&object) {
            return Ok(Some(GetOutcome::NotModified(object)));
        }

        let range = match options.range {
            Some(requested) => Some(
                requested
                    .resolve(object.size)
                    .ok_or(StorageError::RangeNotSatisfiable { size: object.size })?,
            ),
            None => None,
        };

        let body = self
            .open_payload(&object, range.map(|r| (r.offset, r.len())))
            .await?;
        Ok(body.map(|body| {
            GetOutcome::Body(ObjectContent {
                object,
                range,
                body,
            })
        }))
    }

    /// Stream-upload an object to disk and upsert its metadata
    /// (overwrite semantics).
    async fn put(
        &self,
        key: &str,
        body: ObjectBody,
        http_metadata: HttpMetadata,
        custom_metadata: CustomMetadata,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let (size_bytes, etag) = self.write_payload(&file_path, body).await?;
        let custom_json = serde_json::to_string(&custom_metadata)?;

        let insert_result = sqlx::query_as::<_, ObjectRow>(&format!(
            r#"
            INSERT INTO objects (
                key, size_bytes, etag, content_type, content_language,
                content_disposition, content_encoding, cache_control,
                custom_metadata, uploaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                content_type = excluded.content_type,
                content_language = excluded.content_language,
                content_disposition = excluded.content_disposition,
                content_encoding = excluded.content_encoding,
                cache_control = excluded.cache_control,
                custom_metadata = excluded.custom_metadata,
                uploaded_at = excluded.uploaded_at
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(key)
        .bind(size_bytes)
        .bind(&etag)
        .bind(http_metadata.content_type)
        .bind(http_metadata.content_language)
        .bind(http_metadata.content_disposition)
        .bind(http_metadata.content_encoding)
        .bind(http_metadata.cache_control)
        .bind(custom_json)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(row) => {
                debug!("stored `{}` ({} bytes, etag {})", key, size_bytes, etag);
                Ok(StoredObject::try_from(row)?)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Remove the metadata row and the payload file, then prune empty shard
    /// directories. Idempotent.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }
}

/// Compute the rolled-up prefix for delimiter listings.
///
/// Returns Some(prefix) if the key has the delimiter somewhere after the
/// requested prefix, otherwise None.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    after_prefix.find(delimiter).map(|pos| {
        let mut combined = String::from(requested_prefix);
        combined.push_str(&after_prefix[..pos + delimiter.len()]);
        combined
    })
}

fn encode_cursor(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_cursor(cursor: &str) -> StorageResult<String> {
    general_purpose::STANDARD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(StorageError::InvalidCursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::object_store::{ByteRange, Conditional, body_from_bytes, empty_body};
    use crate::services::testing::{put_text, storage as service};
    use futures::TryStreamExt;

    async fn read_all(outcome: Option<GetOutcome>) -> Vec<u8> {
        match outcome {
            Some(GetOutcome::Body(content)) => {
                let chunks: Vec<_> = content.body.try_collect().await.unwrap();
                chunks.concat()
            }
            _ => panic!("expected a body"),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (service, _dir) = service().await;
        let mut custom = CustomMetadata::new();
        custom.insert("resourcetype".into(), "<collection />".into());
        let http = HttpMetadata {
            content_type: Some("text/plain".into()),
            ..HttpMetadata::default()
        };

        let stored = service
            .put("a/b.txt", body_from_bytes("hello"), http.clone(), custom.clone())
            .await
            .unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"hello")));

        let head = service.head("a/b.txt").await.unwrap().unwrap();
        assert_eq!(head.http_metadata, http);
        assert_eq!(head.custom_metadata, custom);

        let outcome = service.get("a/b.txt", GetOptions::default()).await.unwrap();
        assert_eq!(read_all(outcome).await, b"hello");
    }

    #[tokio::test]
    async fn get_serves_ranges() {
        let (service, _dir) = service().await;
        put_text(&service, "doc", "0123456789").await;

        let options = GetOptions {
            range: ByteRange::parse("bytes=2-4"),
            ..GetOptions::default()
        };
        let outcome = service.get("doc", options).await.unwrap();
        assert_eq!(read_all(outcome).await, b"234");

        let options = GetOptions {
            range: ByteRange::parse("bytes=20-"),
            ..GetOptions::default()
        };
        let err = service.get("doc", options).await.err().unwrap();
        assert!(matches!(err, StorageError::RangeNotSatisfiable { size: 10 }));
    }

    #[tokio::test]
    async fn get_reports_not_modified() {
        let (service, _dir) = service().await;
        let stored = put_text(&service, "doc", "payload").await;

        let options = GetOptions {
            conditional: Conditional {
                if_none_match: Some(stored.http_etag()),
                ..Conditional::default()
            },
            range: None,
        };
        let outcome = service.get("doc", options).await.unwrap();
        assert!(matches!(outcome, Some(GetOutcome::NotModified(_))));
    }

    #[tokio::test]
    async fn missing_objects_are_none() {
        let (service, _dir) = service().await;
        assert!(service.head("nope").await.unwrap().is_none());
        assert!(
            service
                .get("nope", GetOptions::default())
                .await
                .unwrap()
                .is_none()
        );
        service.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unsafe_keys() {
        let (service, _dir) = service().await;
        for key in ["", "/abs", "dir/", "bad\u{7}key"] {
            let err = service.put(key, empty_body(), HttpMetadata::default(), CustomMetadata::new());
            assert!(matches!(err.await, Err(StorageError::InvalidObjectKey(_))));
        }
    }

    #[tokio::test]
    async fn list_rolls_up_on_delimiter() {
        let (service, _dir) = service().await;
        for key in ["a", "a/b.txt", "a/c", "a/c/d.txt", "ab.txt", "z"] {
            put_text(&service, key, "x").await;
        }

        let page = service
            .list(ListOptions {
                prefix: "a/".into(),
                delimiter: Some("/".into()),
                cursor: None,
                limit: 100,
            })
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["a/b.txt", "a/c"]);
        assert_eq!(page.delimited_prefixes, ["a/c/"]);
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn list_pages_with_cursor() {
        let (service, _dir) = service().await;
        for key in ["k1", "k2", "k3", "k4", "k5"] {
            put_text(&service, key, "x").await;
        }

        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let page = service
                .list(ListOptions {
                    prefix: "k".into(),
                    delimiter: None,
                    cursor: cursor.clone(),
                    limit: 2,
                })
                .await
                .unwrap();
            seen.extend(page.objects.into_iter().map(|o| o.key));
            if !page.truncated {
                break;
            }
            cursor = page.cursor;
        }
        assert_eq!(seen, ["k1", "k2", "k3", "k4", "k5"]);
    }

    #[tokio::test]
    async fn prefix_is_literal() {
        let (service, _dir) = service().await;
        put_text(&service, "100%_done", "x").await;
        put_text(&service, "100xydone", "x").await;

        let page = service
            .list(ListOptions {
                prefix: "100%_".into(),
                limit: 10,
                ..ListOptions::default()
            })
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "100%_done");
    }

    #[tokio::test]
    async fn delete_removes_row_and_payload() {
        let (service, dir) = service().await;
        put_text(&service, "gone.txt", "bye").await;
        let path = service.object_path("gone.txt");
        assert!(path.exists());

        service.delete("gone.txt").await.unwrap();
        assert!(service.head("gone.txt").await.unwrap().is_none());
        assert!(!path.exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn rejects_garbage_cursor() {
        let (service, _dir) = service().await;
        let err = service
            .list(ListOptions {
                cursor: Some("!!!".into()),
                limit: 10,
                ..ListOptions::default()
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::InvalidCursor));
    }
}
