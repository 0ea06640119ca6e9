//! Ordered event stream reporting the progress of a conversion run.
//!
//! A session publishes [`ConversionEvent`]s into an [`EventSink`]; the caller
//! holds the matching receiver and drains it on whatever context it likes
//! (terminal progress bar, UI thread, log file). Events are immutable values,
//! so workers never touch caller-owned state directly.
//!
//! # Example
//!
//! ```rust
//! use img2pdf::{ConversionEvent, EventSink};
//!
//! let (sink, mut rx) = EventSink::channel();
//! sink.emit(ConversionEvent::Started { total: 2 });
//! drop(sink);
//!
//! let mut seen = 0;
//! while let Ok(event) = rx.try_recv() {
//!     if let ConversionEvent::Started { total } = event {
//!         assert_eq!(total, 2);
//!     }
//!     seen += 1;
//! }
//! assert_eq!(seen, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Where an item is in its processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStage {
    Started,
    Succeeded,
    Failed,
}

/// One entry in the run's event stream.
///
/// Every run that emits `Started` ends with exactly one of `Completed`,
/// `Failed` or `Canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionEvent {
    /// The run was admitted and will process `total` items.
    Started { total: usize },

    /// Per-item progress. `index` is 1-based position in the run plan.
    ItemProgress {
        index: usize,
        total: usize,
        label: String,
        stage: ItemStage,
    },

    /// Human-readable diagnostic (skipped item, overwritten file, …).
    Log { message: String },

    /// Output file(s) written. One path for AllInOne, one per item otherwise.
    Completed { outputs: Vec<PathBuf> },

    /// The run failed as a whole.
    Failed { reason: String },

    /// The run was canceled by the caller.
    Canceled,
}

impl ConversionEvent {
    /// `true` for `Completed`, `Failed` and `Canceled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionEvent::Completed { .. }
                | ConversionEvent::Failed { .. }
                | ConversionEvent::Canceled
        )
    }
}

/// Callback invoked synchronously for every event, on the emitting thread.
pub type EventObserver = Arc<dyn Fn(&ConversionEvent) + Send + Sync>;

/// Sending half of the event stream.
///
/// Cheap to clone. A dropped receiver never fails a run; events are simply
/// discarded. [`EventSink::disabled`] discards everything.
///
/// An observer added with [`EventSink::with_observer`] sees each event
/// before it is queued, from the worker that produced it. It must be quick.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ConversionEvent>>,
    observer: Option<EventObserver>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("connected", &self.tx.is_some())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

impl EventSink {
    /// Create a connected sink/receiver pair.
    pub fn channel() -> (Self, UnboundedReceiver<ConversionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                observer: None,
            },
            rx,
        )
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Also call `observer` for every event.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ConversionEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn emit(&self, event: ConversionEvent) {
        if let Some(ref observer) = self.observer {
            observer(&event);
        }
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(ConversionEvent::Log {
            message: message.into(),
        });
    }

    pub fn item(&self, index: usize, total: usize, label: &str, stage: ItemStage) {
        self.emit(ConversionEvent::ItemProgress {
            index,
            total,
            label: label.to_string(),
            stage,
        });
    }
}
