//! Event types for the iform event system
//!
//! Provides the import event definitions and the EventBus the orchestrator
//! reports through. Hosts (console, web bridge, tests) subscribe and render.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Import event types
///
/// Every observable side effect of the import orchestrator is one of these:
/// progress bar value, log panel lines, match tables, the enabled state of
/// the "next step" control and the terminal summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// Orchestrator moved to a new stage
    StageChanged {
        /// Server-assigned data file token, once known
        data_file: Option<String>,
        /// Stage label before the change
        old_stage: String,
        /// Stage label after the change
        new_stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress bar update
    Progress {
        stage: String,
        /// Percentage complete (0.0 - 100.0)
        progress: f64,
        rows_processed: u64,
        total_rows: u64,
        errors_count: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Line appended to the log panel
    LogMessage {
        stage: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A source column needs its values matched by the user
    MatchTableShown {
        /// Source column token the matches are saved against
        source_field: String,
        /// Human readable column label
        column_label: String,
        /// "customAttribute", "otherFk", "taxon" or "location"
        lookup_type: String,
        /// Distinct raw values awaiting a match
        values: Vec<String>,
        /// Selectable targets (id, caption) for term lookups
        options: Vec<(String, String)>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The server rejected a save; exactly these rows are unmatched
    UnmatchedValuesFlagged {
        source_field: String,
        values: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Matches for a column were accepted; its save control is disabled
    LookupMatchesSaved {
        source_field: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// "Next step" control enabled or disabled
    NextStepEnabled {
        stage: String,
        enabled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Template name collision, user decision required
    ConflictRaised {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Stage halted; shown as a blocking dialog
    StageFailed {
        stage: String,
        message: String,
        error_file_url: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Import (or precheck) finished
    ImportCompleted {
        data_file: String,
        rows_processed: u64,
        total_rows: u64,
        errors_count: u64,
        error_file_url: Option<String>,
        /// True when the run stopped after a precheck that found errors
        precheck_only: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use iform_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }
}
