//! Stage transition function
//!
//! `next_step` decides what follows a warehouse response without touching
//! the network, the session or the UI. The orchestrator applies the side
//! effects; this module only answers "repeat, wait, advance or halt".

use crate::models::{
    ChunkStatus, FailureKind, ImportChunkResponse, ImportPhase, ImportStage, LoadChunkResponse,
    LookupMatchingResponse, LookupType, PreprocessResponse, StageFailure,
};

/// A warehouse response to a stage-advance request
#[derive(Debug, Clone, PartialEq)]
pub enum StageResponse {
    TempTableLoad(LoadChunkResponse),
    LookupMatching(LookupMatchingResponse),
    Preprocess(PreprocessResponse),
    ImportChunk(ImportChunkResponse),
}

/// Something only the user can provide
#[derive(Debug, Clone, PartialEq)]
pub enum Pause {
    /// Defaults for fields not present in the file
    GlobalValues { fields: Vec<String> },
    /// Column mapping; blocked while required fields are outstanding
    Mappings { outstanding: Vec<String>, duplicates: Vec<String> },
    /// Values of one column need matching to warehouse ids
    LookupMatches {
        source_field: String,
        column_label: String,
        lookup_type: LookupType,
        values: Vec<String>,
    },
    /// All lookups resolved; the "next step" control is enabled
    ReadyForNextStep { next_stage: ImportStage },
    /// Template name collision on import
    TemplateConflict { message: String },
}

/// What the orchestrator does after applying a response
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Issue exactly one more request for the same stage
    Continue,
    /// Stop and wait for the user
    AwaitUser(Pause),
    /// Stage finished; move to the given stage
    Advance(ImportStage),
    /// Stage failed; nothing more is sent until the user restarts it
    Halt(StageFailure),
}

fn server_failure(stage: ImportStage, msg: Option<&str>, fallback: &str) -> Step {
    Step::Halt(StageFailure::new(
        stage,
        FailureKind::Server,
        msg.filter(|m| !m.is_empty()).unwrap_or(fallback),
    ))
}

/// Decide the next step for `stage` given `response`
pub fn next_step(stage: &ImportStage, response: &StageResponse) -> Step {
    match (stage, response) {
        (ImportStage::FileSelect, StageResponse::TempTableLoad(r)) => temp_table_step(*stage, r),
        (ImportStage::LookupMatching, StageResponse::LookupMatching(r)) => lookup_step(*stage, r),
        (ImportStage::Preprocess, StageResponse::Preprocess(r)) => preprocess_step(*stage, r),
        (ImportStage::DoImport(phase), StageResponse::ImportChunk(r)) => {
            import_chunk_step(*stage, *phase, r)
        }
        _ => Step::Halt(StageFailure::new(
            *stage,
            FailureKind::UnexpectedResponse,
            format!("Unexpected response for stage {}", stage),
        )),
    }
}

fn temp_table_step(stage: ImportStage, r: &LoadChunkResponse) -> Step {
    if r.status == "error" {
        return server_failure(stage, r.msg.as_deref(), "Loading the file failed");
    }
    match r.progress {
        Some(p) if p >= 100.0 => Step::Advance(ImportStage::GlobalValues),
        _ => Step::Continue,
    }
}

fn lookup_step(stage: ImportStage, r: &LookupMatchingResponse) -> Step {
    if r.status == "error" {
        return server_failure(stage, r.msg.as_deref(), "Lookup matching failed");
    }
    if let Some(info) = r.unmatched_info.as_ref().filter(|i| !i.values.is_empty()) {
        let column_label = r
            .column_label
            .clone()
            .or_else(|| r.col_title.clone())
            .unwrap_or_default();
        let source_field = r
            .col_title
            .clone()
            .unwrap_or_else(|| column_label.clone());
        return Step::AwaitUser(Pause::LookupMatches {
            source_field,
            column_label,
            lookup_type: info.lookup_type,
            values: info.values.clone(),
        });
    }
    if r.is_scan_done() {
        return Step::AwaitUser(Pause::ReadyForNextStep {
            next_stage: ImportStage::Preprocess,
        });
    }
    Step::Continue
}

fn preprocess_step(stage: ImportStage, r: &PreprocessResponse) -> Step {
    if let Some(error) = &r.error {
        return Step::Halt(
            StageFailure::new(stage, FailureKind::Server, error.clone())
                .with_errors(r.error_count.unwrap_or(0)),
        );
    }
    if r.next_step {
        Step::Continue
    } else {
        Step::Advance(ImportStage::DoImport(ImportPhase::Precheck))
    }
}

fn import_chunk_step(stage: ImportStage, phase: ImportPhase, r: &ImportChunkResponse) -> Step {
    match &r.status {
        ChunkStatus::Error => server_failure(stage, r.msg.as_deref(), "Import failed"),
        ChunkStatus::Conflict => Step::AwaitUser(Pause::TemplateConflict {
            message: r
                .msg
                .clone()
                .unwrap_or_else(|| "An import template with this name already exists".to_string()),
        }),
        ChunkStatus::Progressing(_) => Step::Continue,
        ChunkStatus::Done => match phase {
            ImportPhase::Precheck if r.errors_count > 0 => Step::Halt(
                StageFailure::new(
                    stage,
                    FailureKind::RowErrors,
                    format!(
                        "The precheck found problems in {} row(s); nothing was imported",
                        r.errors_count
                    ),
                )
                .with_errors(r.errors_count),
            ),
            ImportPhase::Precheck => Step::Advance(ImportStage::DoImport(ImportPhase::Import)),
            ImportPhase::Import => Step::Advance(ImportStage::Completed),
        },
    }
}
