//! The frozen, ordered run plan.
//!
//! Built once, after the HTML pre-render pass, from the session's order
//! snapshot. Each entry says what the background phase must do with the
//! item at that position.

use crate::error::ItemError;
use crate::store::SourceItem;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What the background phase does with one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    /// A PDF artifact already exists (rendered HTML).
    UseArtifact(PathBuf),
    /// Decode and normalise the image, then encode it.
    Normalize,
    /// Nothing to do; the item already failed.
    Skip(ItemError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// 0-based position in the run order.
    pub position: usize,
    pub item: SourceItem,
    pub action: PlanAction,
}

impl PlanEntry {
    /// 1-based index used in progress events.
    pub fn ordinal(&self) -> usize {
        self.position + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionPlan {
    entries: Vec<PlanEntry>,
}

impl ConversionPlan {
    /// Build the plan for `items`.
    ///
    /// `html_results` holds the pre-render outcome keyed by position. An
    /// HTML item without an outcome is skipped.
    pub fn build(
        items: &[SourceItem],
        html_results: &BTreeMap<usize, Result<PathBuf, ItemError>>,
    ) -> Self {
        let entries = items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let action = match item {
                    SourceItem::Image { .. } => PlanAction::Normalize,
                    SourceItem::Html { path } => match html_results.get(&position) {
                        Some(Ok(artifact)) => PlanAction::UseArtifact(artifact.clone()),
                        Some(Err(e)) => PlanAction::Skip(e.clone()),
                        None => PlanAction::Skip(ItemError::RenderFailed {
                            path: path.clone(),
                            detail: "not rendered".into(),
                        }),
                    },
                };
                PlanEntry {
                    position,
                    item: item.clone(),
                    action,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that still have work to do.
    pub fn runnable(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.action, PlanAction::Skip(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(p: &str) -> SourceItem {
        SourceItem::from_path(p).unwrap()
    }

    #[test]
    fn plan_follows_snapshot_order() {
        let items = vec![item("a.png"), item("b.html"), item("c.jpg"), item("d.htm")];
        let mut html = BTreeMap::new();
        html.insert(1, Ok(PathBuf::from("/tmp/0001-b.pdf")));
        html.insert(
            3,
            Err(ItemError::RenderFailed {
                path: PathBuf::from("d.htm"),
                detail: "timeout".into(),
            }),
        );

        let plan = ConversionPlan::build(&items, &html);
        assert_eq!(plan.len(), 4);
        let actions: Vec<_> = plan.entries().iter().map(|e| &e.action).collect();
        assert_eq!(actions[0], &PlanAction::Normalize);
        assert_eq!(
            actions[1],
            &PlanAction::UseArtifact(PathBuf::from("/tmp/0001-b.pdf"))
        );
        assert_eq!(actions[2], &PlanAction::Normalize);
        assert!(matches!(actions[3], PlanAction::Skip(_)));
        assert_eq!(plan.runnable().count(), 3);
        assert_eq!(plan.entries()[2].ordinal(), 3);
    }

    #[test]
    fn unrendered_html_is_skipped() {
        let plan = ConversionPlan::build(&[item("x.html")], &BTreeMap::new());
        assert!(matches!(
            plan.entries()[0].action,
            PlanAction::Skip(ItemError::RenderFailed { .. })
        ));
        assert_eq!(plan.runnable().count(), 0);
    }
}
