//! Import session state machine
//!
//! A session progresses through:
//! FILE_SELECT → GLOBAL_VALUES → MAPPINGS → LOOKUP_MATCHING → PREPROCESS →
//! PRECHECK → IMPORT → COMPLETED
//!
//! GLOBAL_VALUES is skipped when the import has no global values to ask for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::column_mapping::ColumnMapping;
use super::lookup_match::LookupMatchSet;

/// Pass of the final import stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportPhase {
    /// Dry run validating every row without committing
    Precheck,
    /// The real, committing pass
    Import,
}

/// Import workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStage {
    /// Upload, transfer to warehouse, extract, init config, load temp table
    FileSelect,
    /// User supplies defaults for fields not in the file
    GlobalValues,
    /// User maps source columns to destination fields
    Mappings,
    /// Resolve raw lookup values to warehouse ids
    LookupMatching,
    /// Server-side checks, one step per request
    Preprocess,
    /// Chunked precheck then import
    DoImport(ImportPhase),
    /// Import finished
    Completed,
}

impl ImportStage {
    /// Label used in events and logs
    pub fn label(&self) -> &'static str {
        match self {
            ImportStage::FileSelect => "FILE_SELECT",
            ImportStage::GlobalValues => "GLOBAL_VALUES",
            ImportStage::Mappings => "MAPPINGS",
            ImportStage::LookupMatching => "LOOKUP_MATCHING",
            ImportStage::Preprocess => "PREPROCESS",
            ImportStage::DoImport(ImportPhase::Precheck) => "PRECHECK",
            ImportStage::DoImport(ImportPhase::Import) => "IMPORT",
            ImportStage::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_stage: ImportStage,
    pub new_stage: ImportStage,
    pub transitioned_at: DateTime<Utc>,
}

/// Import session (in-memory state)
///
/// Owned by the orchestrator; mutated only by its own continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    /// Client-side identifier, used in logs only
    pub session_id: Uuid,

    pub stage: ImportStage,

    /// Name of the file as the user selected it
    pub original_name: Option<String>,

    /// Server-assigned data file token, sent on every call after upload
    pub data_file: Option<String>,

    /// Saved template the import was started from
    pub import_template_id: Option<u32>,

    /// Percentage complete of the current stage (0.0 - 100.0)
    pub progress: f64,
    pub rows_processed: u64,
    pub total_rows: u64,
    pub errors_count: u64,

    /// Next preprocess step to request
    pub preprocess_index: u32,

    /// Next lookup field to request
    pub lookup_index: u32,

    /// Global values entered by the user: field token → value
    pub global_values: BTreeMap<String, String>,

    pub mapping: ColumnMapping,

    /// Match sets built so far, in scan order
    pub match_sets: Vec<LookupMatchSet>,

    /// Description / template title already submitted once
    pub one_off_fields_sent: bool,

    /// Next import chunk request carries `restart: true`
    pub restart_pending: bool,

    /// Sequence number of the last request issued
    pub request_seq: u64,

    /// Sequence number of the last response applied
    pub applied_seq: u64,

    /// Log panel lines
    pub log: Vec<String>,

    pub started_at: DateTime<Utc>,

    /// Set when the session completes
    pub ended_at: Option<DateTime<Utc>>,
}

impl ImportSession {
    /// Create new import session
    pub fn new(import_template_id: Option<u32>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            stage: ImportStage::FileSelect,
            original_name: None,
            data_file: None,
            import_template_id,
            progress: 0.0,
            rows_processed: 0,
            total_rows: 0,
            errors_count: 0,
            preprocess_index: 0,
            lookup_index: 0,
            global_values: BTreeMap::new(),
            mapping: ColumnMapping::default(),
            match_sets: Vec::new(),
            one_off_fields_sent: false,
            restart_pending: false,
            request_seq: 0,
            applied_seq: 0,
            log: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new stage
    pub fn transition_to(&mut self, new_stage: ImportStage) -> StateTransition {
        let transition = StateTransition {
            session_id: self.session_id,
            old_stage: self.stage,
            new_stage,
            transitioned_at: Utc::now(),
        };
        self.stage = new_stage;

        if new_stage == ImportStage::Completed {
            self.ended_at = Some(Utc::now());
        }

        transition
    }

    /// Allocate the sequence number for the next outgoing request
    pub fn next_request_seq(&mut self) -> u64 {
        self.request_seq += 1;
        self.request_seq
    }

    /// Record that the response to `seq` is being applied
    ///
    /// Returns false when that response (or a later one) was already
    /// applied, so a replayed payload cannot advance the session twice.
    pub fn mark_applied(&mut self, seq: u64) -> bool {
        if seq <= self.applied_seq || seq > self.request_seq {
            return false;
        }
        self.applied_seq = seq;
        true
    }

    /// Update progress counters from a server response
    pub fn update_progress(&mut self, progress: f64, rows_processed: u64, total_rows: u64, errors_count: u64) {
        self.progress = progress.clamp(0.0, 100.0);
        self.rows_processed = rows_processed;
        self.total_rows = total_rows;
        self.errors_count = errors_count;
    }

    /// Zero the progress counters before a new pass
    pub fn reset_progress(&mut self) {
        self.update_progress(0.0, 0, 0, 0);
    }

    pub fn append_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Match set for a source field
    pub fn match_set_mut(&mut self, source_field: &str) -> Option<&mut LookupMatchSet> {
        self.match_sets
            .iter_mut()
            .find(|s| s.source_field == source_field)
    }

    /// Every rendered match table has been saved
    pub fn all_matches_saved(&self) -> bool {
        self.match_sets.iter().all(|s| s.saved)
    }

    /// Data file token, or an error when the upload has not completed
    pub fn require_data_file(&self) -> crate::error::ImportResult<&str> {
        self.data_file.as_deref().ok_or_else(|| {
            crate::error::ImportError::InvalidState("No data file uploaded yet".to_string())
        })
    }

    /// Check if session is terminal (finished)
    pub fn is_terminal(&self) -> bool {
        self.stage == ImportStage::Completed
    }
}
