//! Stage 6: PRECHECK then IMPORT
//!
//! Both passes post one chunk request at a time. The description and
//! template title go out once per session, on the first chunk request.
//! A template name collision pauses the pass until the user resolves it.

use chrono::Utc;
use iform_common::events::ImportEvent;
use serde::{Deserialize, Serialize};

use super::{ImportOrchestrator, Outcome, Pause};
use crate::error::{ImportError, ImportResult};
use crate::models::{
    ChunkStatus, FailureKind, ImportChunkRequest, ImportChunkResponse, ImportPhase, ImportStage,
    StageFailure,
};
use crate::services::warehouse_client::WarehouseApi;

/// User's answer to a template name conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Replace the existing template
    Overwrite,
    /// Save under a different title
    Rename(String),
    /// Import without saving a template
    SkipTemplate,
    /// Abandon the import
    Cancel,
}

impl<W: WarehouseApi> ImportOrchestrator<W> {
    /// Body of the next chunk request for `phase`
    pub(super) fn build_chunk_request(&mut self, phase: ImportPhase) -> ImportChunkRequest {
        let mut request = std::mem::take(&mut self.next_chunk_extras);

        if !self.session.one_off_fields_sent {
            if request.description.is_none() {
                request.description = self.options.description.clone();
            }
            if request.import_template_title.is_none() {
                request.import_template_title = self.options.template_title.clone();
            }
        }
        if phase == ImportPhase::Precheck {
            request.precheck = Some(true);
        }
        if self.session.restart_pending {
            request.restart = Some(true);
            self.session.restart_pending = false;
        }

        request
    }

    pub(super) fn apply_import_chunk(&mut self, response: &ImportChunkResponse) {
        if response.status == ChunkStatus::Conflict {
            let message = response.msg.clone().unwrap_or_default();
            tracing::warn!(stage = %self.session.stage, "Template conflict: {}", message);
            self.event_bus.emit_lossy(ImportEvent::ConflictRaised {
                message,
                timestamp: Utc::now(),
            });
            return;
        }

        self.session.update_progress(
            response.progress,
            response.rows_processed,
            response.total_rows,
            response.errors_count,
        );
        self.emit_progress();

        tracing::debug!(
            stage = %self.session.stage,
            progress = self.session.progress,
            rows_processed = self.session.rows_processed,
            total_rows = self.session.total_rows,
            errors_count = self.session.errors_count,
            "Chunk processed"
        );

        if response.status == ChunkStatus::Done {
            let verb = match self.session.stage {
                ImportStage::DoImport(ImportPhase::Precheck) => "checked",
                _ => "imported",
            };
            self.log(format!(
                "{} of {} row(s) {}, {} with errors",
                self.session.rows_processed, self.session.total_rows, verb, self.session.errors_count
            ));
        }
    }

    /// Answer a template conflict and carry on with the paused pass
    pub async fn resolve_conflict(&mut self, resolution: ConflictResolution) -> ImportResult<Outcome> {
        if !matches!(self.session.stage, ImportStage::DoImport(_))
            || !matches!(self.pending, Some(Pause::TemplateConflict { .. }))
        {
            return Err(ImportError::InvalidState(
                "No template conflict to resolve".to_string(),
            ));
        }

        if let ConflictResolution::Rename(title) = &resolution {
            if title.trim().is_empty() {
                return Err(ImportError::InvalidInput(
                    "Template title cannot be empty".to_string(),
                ));
            }
        }

        tracing::info!(session_id = %self.session.session_id, ?resolution, "Template conflict resolved");
        self.pending = None;

        match resolution {
            ConflictResolution::Overwrite => {
                self.log("Overwriting the existing import template");
                self.next_chunk_extras.force_template_overwrite = Some(true);
            }
            ConflictResolution::Rename(title) => {
                let title = title.trim().to_string();
                self.log(format!("Saving the import template as '{}'", title));
                self.next_chunk_extras.import_template_title = Some(title);
            }
            ConflictResolution::SkipTemplate => {
                self.log("Importing without saving a template");
                self.next_chunk_extras.import_template_title = Some(String::new());
            }
            ConflictResolution::Cancel => {
                let failure = StageFailure::new(
                    self.session.stage,
                    FailureKind::Cancelled,
                    "Import cancelled at template conflict",
                );
                return Ok(self.halt(failure));
            }
        }

        self.drive().await
    }
}
