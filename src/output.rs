//! Output types for a conversion run.

use crate::error::ItemError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Output was written. Some items may still have failed; see
    /// [`ConversionOutput::failures`].
    Completed(ConversionOutput),

    /// The run was canceled.
    ///
    /// AllInOne never leaves a partial file, so `written` is empty. In
    /// OneByOne mode it lists the per-item files that were fully written
    /// before the cancel was observed; they are valid and left in place.
    Canceled { written: Vec<PathBuf> },
}

impl RunOutcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, RunOutcome::Canceled { .. })
    }

    /// The output, if the run completed.
    pub fn completed(self) -> Option<ConversionOutput> {
        match self {
            RunOutcome::Completed(out) => Some(out),
            RunOutcome::Canceled { .. } => None,
        }
    }
}

/// Report of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Files written: the merged PDF, or one PDF per successful item.
    pub outputs: Vec<PathBuf>,

    /// Aggregated statistics.
    pub stats: ConversionStats,

    /// Items that failed or were skipped, in run order.
    pub failures: Vec<ItemFailure>,
}

/// Statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Items in the run snapshot.
    pub total_items: usize,

    /// Items that contributed to the output.
    pub succeeded: usize,

    /// Items that failed or were skipped.
    pub failed: usize,

    /// HTML documents rendered successfully.
    pub html_rendered: usize,

    /// Pages written across all outputs.
    pub pages_written: usize,

    /// Wall-clock time for HTML pre-rendering.
    pub render_duration_ms: u64,

    /// Wall-clock time for the whole run.
    pub total_duration_ms: u64,
}

/// One item that did not make it into the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// 1-based position in the run order.
    pub index: usize,
    pub path: PathBuf,
    pub error: ItemError,
}
