//! COPY and MOVE of single objects and whole collections.
//!
//! A collection transfer spawns one task per object of the subtree (the marker
//! included) into a `JoinSet`. The first failure aborts whatever is still in
//! flight and fails the transfer; completed transfers are not rolled back.

use crate::{
    dav::collection::Listing,
    models::object::StoredObject,
    services::object_store::{GetOptions, GetOutcome, ObjectStore, StorageError, StorageResult},
};
use std::{io, sync::Arc};
use tokio::task::JoinSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
}

/// Where `key` lands when the tree rooted at `source_root` moves to
/// `dest_root`.
pub fn target_key(key: &str, source_root: &str, dest_root: &str) -> String {
    match key.strip_prefix(source_root) {
        Some(rest) if !rest.is_empty() => format!("{dest_root}{rest}"),
        _ => dest_root.to_string(),
    }
}

/// Copy one object to `dest` with its HTTP and custom metadata, deleting the
/// source afterwards for a move. A source that vanished meanwhile is skipped.
pub async fn transfer_object(
    store: &dyn ObjectStore,
    source: &str,
    dest: &str,
    mode: TransferMode,
) -> StorageResult<()> {
    let content = match store.get(source, GetOptions::default()).await? {
        Some(GetOutcome::Body(content)) => content,
        Some(GetOutcome::NotModified(_)) | None => {
            tracing::debug!("transfer source `{}` vanished, skipping", source);
            return Ok(());
        }
    };

    let object = content.object;
    store
        .put(
            dest,
            content.body,
            object.http_metadata,
            object.custom_metadata,
        )
        .await?;

    if mode == TransferMode::Move {
        store.delete(source).await?;
    }
    Ok(())
}

/// Transfer the collection `root` and its entire subtree to `dest`.
pub async fn transfer_tree(
    store: Arc<dyn ObjectStore>,
    root: &StoredObject,
    dest: &str,
    mode: TransferMode,
) -> StorageResult<()> {
    let mut tasks: JoinSet<StorageResult<()>> = JoinSet::new();
    let spawn = |tasks: &mut JoinSet<StorageResult<()>>, source: String| {
        let store = store.clone();
        let target = target_key(&source, &root.key, dest);
        tasks.spawn(async move { transfer_object(store.as_ref(), &source, &target, mode).await });
    };

    spawn(&mut tasks, root.key.clone());

    let mut listing = Listing::subtree(&root.key);
    loop {
        let page = match listing.next_page(store.as_ref()).await {
            Ok(Some(page)) => page,
            Ok(None) => break,
            Err(err) => {
                tasks.abort_all();
                return Err(err);
            }
        };
        for object in page {
            spawn(&mut tasks, object.key);
        }
    }

    let total = tasks.len();
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|err| StorageError::Io(io::Error::other(err)));
        if let Err(err) = result.and_then(|inner| inner) {
            tracing::error!(
                "{:?} of `{}` to `{}` failed: {}",
                mode,
                root.key,
                dest,
                err
            );
            tasks.abort_all();
            return Err(err);
        }
    }

    tracing::debug!("{:?} of `{}` to `{}`: {} objects", mode, root.key, dest, total);
    Ok(())
}
