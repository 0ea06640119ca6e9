//! Reordering items by a file attribute.
//!
//! Sorting a large folder stats every file, so [`sort_async`] runs it on the
//! blocking pool against an owned snapshot. The result is a plain value; the
//! owner commits it with [`crate::ItemStore::reconcile_order`], which rejects
//! it if items were added or removed in the meantime.

use crate::error::Img2PdfError;
use crate::store::SourceItem;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

/// Attribute to sort by. Every key sorts ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    /// Case-insensitive file name.
    #[default]
    Name,
    ModifiedTime,
    CreatedTime,
    Size,
}

/// Sort `items` by `key`, stably.
///
/// Items whose attribute cannot be read (file vanished) go last, keeping
/// their relative order. On filesystems without a birth time, `CreatedTime`
/// uses the modification time instead.
pub fn sort_items(items: Vec<SourceItem>, key: SortKey) -> Vec<SourceItem> {
    match key {
        SortKey::Name => sort_by_optional_key(items, |item| {
            item.path()
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
        }),
        SortKey::ModifiedTime => sort_by_optional_key(items, |item| {
            fs::metadata(item.path()).and_then(|m| m.modified()).ok()
        }),
        SortKey::CreatedTime => sort_by_optional_key(items, |item| created_key(item.path())),
        SortKey::Size => {
            sort_by_optional_key(items, |item| fs::metadata(item.path()).map(|m| m.len()).ok())
        }
    }
}

/// Creation time, or the modification time where the filesystem records no
/// birth time.
fn created_key(path: &Path) -> Option<SystemTime> {
    let meta = fs::metadata(path).ok()?;
    match meta.created() {
        Ok(t) => Some(t),
        Err(e) => {
            debug!("No creation time for {}: {}; using mtime", path.display(), e);
            meta.modified().ok()
        }
    }
}

/// Sort a snapshot on the blocking pool.
pub async fn sort_async(
    snapshot: Vec<SourceItem>,
    key: SortKey,
) -> Result<Vec<SourceItem>, Img2PdfError> {
    debug!("Sorting {} items by {:?}", snapshot.len(), key);
    tokio::task::spawn_blocking(move || sort_items(snapshot, key))
        .await
        .map_err(|e| Img2PdfError::Internal(format!("Sort task panicked: {}", e)))
}

/// Stable sort where `None` keys go after every `Some` key.
fn sort_by_optional_key<K, F>(items: Vec<SourceItem>, key_fn: F) -> Vec<SourceItem>
where
    K: Ord,
    F: Fn(&SourceItem) -> Option<K>,
{
    let mut keyed: Vec<(Option<K>, SourceItem)> =
        items.into_iter().map(|item| (key_fn(&item), item)).collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    keyed.into_iter().map(|(_, item)| item).collect()
}
