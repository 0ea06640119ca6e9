//! Ordered collection of source items: the single source of truth for
//! conversion order.
//!
//! [`ItemStore`] is owned by one context (the interactive one). Background
//! work — sorting, previews — runs on a [`ItemStore::snapshot`] and hands
//! its result back through [`ItemStore::reconcile_order`], which refuses a
//! candidate order that no longer matches the live contents.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Extensions treated as raster images (lower-case, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tiff", "webp"];

/// Extensions treated as HTML documents (lower-case, no dot).
pub const HTML_EXTENSIONS: &[&str] = &["html", "htm"];

/// What kind of conversion a source item needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceKind {
    Image,
    Html,
}

impl SourceKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceKind::Image)
        } else if HTML_EXTENSIONS.contains(&ext.as_str()) {
            Some(SourceKind::Html)
        } else {
            None
        }
    }
}

/// One user-added source document. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SourceItem {
    Image { path: PathBuf },
    Html { path: PathBuf },
}

impl SourceItem {
    /// Build an item from a path, or None for unsupported extensions.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        match SourceKind::from_path(&path)? {
            SourceKind::Image => Some(SourceItem::Image { path }),
            SourceKind::Html => Some(SourceItem::Html { path }),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SourceItem::Image { path } | SourceItem::Html { path } => path,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceItem::Image { .. } => SourceKind::Image,
            SourceItem::Html { .. } => SourceKind::Html,
        }
    }

    /// Display label: the file name, or the full path if it has none.
    pub fn label(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    /// File stem used to name one-by-one outputs.
    pub fn stem(&self) -> String {
        self.path()
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Why an externally produced ordering was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("candidate order has {got} items but the store has {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("candidate order does not contain the same items as the store")]
    MembershipMismatch,
}

/// Ordered, duplicate-free list of [`SourceItem`]s.
#[derive(Debug, Clone, Default)]
pub struct ItemStore {
    items: Vec<SourceItem>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&SourceItem> {
        self.items.get(index)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.items.iter().any(|i| i.path() == path)
    }

    /// Owned copy of the current order, for background work and run plans.
    pub fn snapshot(&self) -> Vec<SourceItem> {
        self.items.clone()
    }

    /// Append every path not already present, in the given order.
    ///
    /// Paths with unsupported extensions and duplicates (including repeats
    /// inside `paths`) are skipped. Returns how many items were added.
    pub fn add<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut seen: HashSet<PathBuf> =
            self.items.iter().map(|i| i.path().to_path_buf()).collect();
        let mut added = 0;

        for path in paths {
            let path = path.into();
            if seen.contains(&path) {
                debug!("Skipping duplicate: {}", path.display());
                continue;
            }
            match SourceItem::from_path(path.clone()) {
                Some(item) => {
                    seen.insert(path);
                    self.items.push(item);
                    added += 1;
                }
                None => debug!("Skipping unsupported file: {}", path.display()),
            }
        }

        added
    }

    /// Add every supported file directly inside `dir` (not recursive),
    /// in file-name order. Returns how many items were added.
    pub fn add_folder(&mut self, dir: impl AsRef<Path>) -> std::io::Result<usize> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && SourceKind::from_path(p).is_some())
            .collect();
        files.sort_by_key(|p| p.file_name().map(|n| n.to_ascii_lowercase()));
        Ok(self.add(files))
    }

    /// Remove the items at `indices`, all resolved against the current state.
    ///
    /// Out-of-range and repeated indices are ignored.
    pub fn remove(&mut self, indices: &[usize]) {
        let mut sorted: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.items.len())
            .collect();
        sorted.sort_unstable();
        sorted.dedup();
        for &i in sorted.iter().rev() {
            self.items.remove(i);
        }
    }

    /// Move one item so that it ends up at position `to`.
    ///
    /// No-op when `from == to` or either index is out of range.
    pub fn move_item(&mut self, from: usize, to: usize) {
        if from == to || from >= self.items.len() || to >= self.items.len() {
            return;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
    }

    /// Replace the order with `candidate` if it holds exactly the same items.
    ///
    /// On rejection the store is left unchanged.
    pub fn reconcile_order(&mut self, candidate: Vec<SourceItem>) -> Result<(), ReconcileError> {
        if candidate.len() != self.items.len() {
            let err = ReconcileError::LengthMismatch {
                expected: self.items.len(),
                got: candidate.len(),
            };
            warn!("Rejected reorder: {}", err);
            return Err(err);
        }

        let current: HashSet<&Path> = self.items.iter().map(|i| i.path()).collect();
        let proposed: HashSet<&Path> = candidate.iter().map(|i| i.path()).collect();
        if current != proposed || proposed.len() != candidate.len() {
            warn!("Rejected reorder: {}", ReconcileError::MembershipMismatch);
            return Err(ReconcileError::MembershipMismatch);
        }

        self.items = candidate;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(store: &ItemStore) -> Vec<String> {
        store.items().iter().map(|i| i.label()).collect()
    }

    #[test]
    fn classifies_by_extension() {
        assert_eq!(SourceKind::from_path(Path::new("a.PNG")), Some(SourceKind::Image));
        assert_eq!(SourceKind::from_path(Path::new("a.jpeg")), Some(SourceKind::Image));
        assert_eq!(SourceKind::from_path(Path::new("b.Htm")), Some(SourceKind::Html));
        assert_eq!(SourceKind::from_path(Path::new("c.pdf")), None);
        assert_eq!(SourceKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn add_is_idempotent_for_duplicates() {
        let mut store = ItemStore::new();
        assert_eq!(store.add(["/x/a.png", "/x/b.html"]), 2);
        assert_eq!(store.add(["/x/a.png"]), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn add_skips_repeats_and_unsupported_in_one_call() {
        let mut store = ItemStore::new();
        assert_eq!(store.add(["a.png", "a.png", "notes.txt", "c.jpg"]), 2);
        assert_eq!(paths(&store), vec!["a.png", "c.jpg"]);
        assert_eq!(store.get(0).map(|i| i.kind()), Some(SourceKind::Image));
    }

    #[test]
    fn remove_resolves_indices_against_original_state() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.png", "c.png", "d.png"]);
        store.remove(&[0, 2, 2, 9]);
        assert_eq!(paths(&store), vec!["b.png", "d.png"]);
    }

    #[test]
    fn move_item_repositions() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.png", "c.png"]);
        store.move_item(0, 2);
        assert_eq!(paths(&store), vec!["b.png", "c.png", "a.png"]);
        store.move_item(2, 0);
        assert_eq!(paths(&store), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn move_item_out_of_range_is_noop() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.png"]);
        store.move_item(0, 5);
        store.move_item(7, 0);
        store.move_item(1, 1);
        assert_eq!(paths(&store), vec!["a.png", "b.png"]);
    }

    #[test]
    fn reconcile_rejects_length_mismatch() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.png", "c.png"]);
        let candidate = vec![
            SourceItem::from_path("c.png").unwrap(),
            SourceItem::from_path("a.png").unwrap(),
        ];
        let err = store.reconcile_order(candidate).unwrap_err();
        assert_eq!(err, ReconcileError::LengthMismatch { expected: 3, got: 2 });
        assert_eq!(paths(&store), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn reconcile_rejects_different_members() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.png"]);
        let candidate = vec![
            SourceItem::from_path("a.png").unwrap(),
            SourceItem::from_path("z.png").unwrap(),
        ];
        assert_eq!(
            store.reconcile_order(candidate),
            Err(ReconcileError::MembershipMismatch)
        );
        let dupes = vec![
            SourceItem::from_path("a.png").unwrap(),
            SourceItem::from_path("a.png").unwrap(),
        ];
        assert!(store.reconcile_order(dupes).is_err());
        assert_eq!(paths(&store), vec!["a.png", "b.png"]);
    }

    #[test]
    fn reconcile_applies_permutation() {
        let mut store = ItemStore::new();
        store.add(["a.png", "b.html", "c.jpg"]);
        let mut candidate = store.snapshot();
        candidate.reverse();
        store.reconcile_order(candidate).unwrap();
        assert_eq!(paths(&store), vec!["c.jpg", "b.html", "a.png"]);
    }

    #[test]
    fn add_folder_filters_and_orders_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.html", "notes.txt", "c.webp"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let mut store = ItemStore::new();
        assert_eq!(store.add_folder(dir.path()).unwrap(), 3);
        assert_eq!(paths(&store), vec!["a.html", "b.PNG", "c.webp"]);
        assert_eq!(store.add_folder(dir.path()).unwrap(), 0);
    }

    #[test]
    fn clear_empties() {
        let mut store = ItemStore::new();
        store.add(["a.png"]);
        store.clear();
        assert!(store.is_empty());
    }
}
