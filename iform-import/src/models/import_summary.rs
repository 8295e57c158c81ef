//! Terminal results of an import run

use serde::{Deserialize, Serialize};

use super::import_session::ImportStage;

/// Row-level outcome of a finished precheck or import pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub data_file: String,
    pub rows_processed: u64,
    pub total_rows: u64,
    /// Rows rejected; details are in the error file
    pub errors_count: u64,
    /// Download link for the error file, when there are errors
    pub error_file_url: Option<String>,
    /// The run stopped after a precheck that found errors
    pub precheck_only: bool,
}

impl ImportSummary {
    pub fn has_errors(&self) -> bool {
        self.errors_count > 0
    }
}

/// Why a stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Request failed in transport (no response, bad HTTP status)
    Transport,
    /// Warehouse reported `status: error`
    Server,
    /// Precheck found row-level errors; nothing was committed
    RowErrors,
    /// Response did not fit the stage it answered
    UnexpectedResponse,
    /// User declined to resolve a conflict
    Cancelled,
}

/// A halted stage; the user must restart it explicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: ImportStage,
    pub kind: FailureKind,
    pub message: String,
    /// Rows with errors; an error file can be downloaded when non-zero
    pub errors_count: u64,
}

impl StageFailure {
    pub fn new(stage: ImportStage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            errors_count: 0,
        }
    }

    pub fn with_errors(mut self, errors_count: u64) -> Self {
        self.errors_count = errors_count;
        self
    }

    pub fn offers_error_file(&self) -> bool {
        self.errors_count > 0
    }
}
