//! Import workflow orchestrator
//!
//! Drives one import session through its stages against the warehouse.
//!
//! # Stage Progression
//! FILE_SELECT → GLOBAL_VALUES → MAPPINGS → LOOKUP_MATCHING → PREPROCESS →
//! PRECHECK → IMPORT → COMPLETED
//!
//! # Architecture
//! The host calls one method per user action (`start`, `submit_mappings`,
//! `save_lookup_matches`, ...). Each call runs the polling loop until the
//! session needs the user again, halts, or completes, and returns that as an
//! [`Outcome`]. At most one warehouse request is outstanding; the next is
//! only issued after the previous response was applied. Observable effects
//! go out on the [`EventBus`].
//!
//! Stage handling lives in the `phase_*` modules:
//!
//! - **FILE_SELECT**: upload, transfer, extract, init config, load temp table
//! - **GLOBAL_VALUES / MAPPINGS**: user input and the required-fields check
//! - **LOOKUP_MATCHING**: per-column match tables
//! - **PREPROCESS**: indexed server-side steps
//! - **PRECHECK / IMPORT**: chunked import, template conflicts, restart

use chrono::Utc;
use iform_common::events::{EventBus, ImportEvent};

use crate::error::{ImportError, ImportResult};
use crate::models::{
    AvailableField, FailureKind, ImportChunkRequest, ImportSession, ImportStage, ImportSummary,
    StageFailure,
};
use crate::services::warehouse_client::WarehouseApi;

mod phase_import;
mod phase_lookup_matching;
mod phase_mappings;
mod phase_preprocess;
mod phase_upload;
pub mod transition;

pub use phase_import::ConflictResolution;
pub use transition::{next_step, Pause, StageResponse, Step};

/// Per-import settings supplied by the host
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Destination fields that must be mapped or given a global value
    pub required_fields: Vec<String>,
    /// Fields offered on the global values screen; empty skips that stage
    pub global_value_fields: Vec<String>,
    /// Destination fields offered in the mapping drop-downs
    pub available_fields: Vec<AvailableField>,
    /// Source column titles, when they cannot be read from the file itself
    pub columns: Option<Vec<String>>,
    /// Import description, sent once per session
    pub description: Option<String>,
    /// Title to save the import settings under, sent once per session
    pub template_title: Option<String>,
    /// Saved template to start from
    pub import_template_id: Option<u32>,
}

/// Where a host call left the session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Waiting for the user
    AwaitingInput(Pause),
    /// Stage failed; call `restart` to retry it
    Halted(StageFailure),
    /// Import committed
    Completed(ImportSummary),
}

/// Import workflow orchestrator
pub struct ImportOrchestrator<W: WarehouseApi> {
    api: W,
    event_bus: EventBus,
    options: ImportOptions,
    session: ImportSession,
    /// What the session is waiting for, if anything
    pending: Option<Pause>,
    /// Set while a stage is halted
    failure: Option<StageFailure>,
    /// File handed to `start`, kept so an upload can be restarted
    source_path: Option<std::path::PathBuf>,
    /// Flags the user's conflict answer adds to the next chunk request
    next_chunk_extras: ImportChunkRequest,
}

impl<W: WarehouseApi> ImportOrchestrator<W> {
    /// Create new orchestrator
    ///
    /// # Arguments
    /// * `api` - Warehouse the import runs against
    /// * `event_bus` - Event bus the host renders from
    /// * `options` - Required fields, offered fields and one-off values
    pub fn new(api: W, event_bus: EventBus, options: ImportOptions) -> Self {
        let session = ImportSession::new(options.import_template_id);
        Self {
            api,
            event_bus,
            options,
            session,
            pending: None,
            failure: None,
            source_path: None,
            next_chunk_extras: ImportChunkRequest::default(),
        }
    }

    pub fn session(&self) -> &ImportSession {
        &self.session
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn api(&self) -> &W {
        &self.api
    }

    /// What the session is currently waiting for
    pub fn pending(&self) -> Option<&Pause> {
        self.pending.as_ref()
    }

    /// The halted stage, if any
    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// Apply one stage-advance response
    ///
    /// `seq` is the sequence number the request was issued under. A response
    /// that was already applied (or was never requested) is ignored and
    /// `None` returned, so a replayed payload cannot advance the session
    /// twice.
    pub fn apply_response(&mut self, seq: u64, response: &StageResponse) -> Option<Step> {
        if !self.session.mark_applied(seq) {
            tracing::warn!(
                session_id = %self.session.session_id,
                seq,
                applied = self.session.applied_seq,
                "Ignoring stale or replayed response"
            );
            return None;
        }

        let step = next_step(&self.session.stage, response);

        match response {
            StageResponse::TempTableLoad(r) => self.apply_temp_table_load(r),
            StageResponse::LookupMatching(r) => self.apply_lookup_matching(r, &step),
            StageResponse::Preprocess(r) => self.apply_preprocess(r, &step),
            StageResponse::ImportChunk(r) => self.apply_import_chunk(r),
        }

        Some(step)
    }

    /// Issue the current stage's request, apply the answer, repeat
    ///
    /// Returns once the session needs the user, halts or completes.
    async fn drive(&mut self) -> ImportResult<Outcome> {
        loop {
            let seq = self.session.next_request_seq();
            let response = match self.request_for_stage().await {
                Ok(response) => response,
                Err(e) => return self.halt_on_error(e),
            };

            let Some(step) = self.apply_response(seq, &response) else {
                return Err(ImportError::InvalidState(format!(
                    "Response {} was not applied",
                    seq
                )));
            };

            match step {
                Step::Continue => continue,
                Step::AwaitUser(pause) => return Ok(self.await_user(pause)),
                Step::Halt(failure) => return Ok(self.halt(failure)),
                Step::Advance(stage) => {
                    if let Some(outcome) = self.enter_stage(stage)? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// The one request the current stage issues per loop iteration
    async fn request_for_stage(&mut self) -> ImportResult<StageResponse> {
        let data_file = self.session.require_data_file()?.to_string();

        match self.session.stage {
            ImportStage::FileSelect => Ok(StageResponse::TempTableLoad(
                self.api.load_chunk_to_temp_table(&data_file).await?,
            )),
            ImportStage::LookupMatching => Ok(StageResponse::LookupMatching(
                self.api
                    .process_lookup_matching(&data_file, self.session.lookup_index)
                    .await?,
            )),
            ImportStage::Preprocess => Ok(StageResponse::Preprocess(
                self.api
                    .preprocess(&data_file, self.session.preprocess_index)
                    .await?,
            )),
            ImportStage::DoImport(phase) => {
                let request = self.build_chunk_request(phase);
                let response = match self.api.import_chunk(&data_file, &request).await {
                    Ok(response) => response,
                    Err(e) => {
                        // Unsent conflict choices go out with the next attempt
                        self.next_chunk_extras = ImportChunkRequest {
                            import_template_title: request.import_template_title,
                            force_template_overwrite: request.force_template_overwrite,
                            ..Default::default()
                        };
                        return Err(e);
                    }
                };
                if request.description.is_some() || request.import_template_title.is_some() {
                    self.session.one_off_fields_sent = true;
                }
                Ok(StageResponse::ImportChunk(response))
            }
            stage => Err(ImportError::InvalidState(format!(
                "Stage {} does not poll the warehouse",
                stage
            ))),
        }
    }

    /// Move to `stage` and either keep driving (`None`) or stop with an outcome
    fn enter_stage(&mut self, stage: ImportStage) -> ImportResult<Option<Outcome>> {
        self.transition(stage);

        match stage {
            ImportStage::GlobalValues => {
                if self.options.global_value_fields.is_empty() {
                    tracing::debug!("No global values to ask for, skipping stage");
                    return self.enter_stage(ImportStage::Mappings);
                }
                let pause = Pause::GlobalValues {
                    fields: self.options.global_value_fields.clone(),
                };
                Ok(Some(self.await_user(pause)))
            }
            ImportStage::Mappings => {
                let pause = self.prepare_mappings();
                Ok(Some(self.await_user(pause)))
            }
            ImportStage::LookupMatching => {
                self.session.lookup_index = 0;
                self.session.match_sets.clear();
                self.notify_next_step(false);
                Ok(None)
            }
            ImportStage::Preprocess => {
                self.session.preprocess_index = 0;
                Ok(None)
            }
            ImportStage::DoImport(_) => {
                self.session.reset_progress();
                self.emit_progress();
                Ok(None)
            }
            ImportStage::Completed => {
                let summary = self.summary(false);
                self.emit_completed(&summary);
                tracing::info!(
                    session_id = %self.session.session_id,
                    rows_processed = summary.rows_processed,
                    errors_count = summary.errors_count,
                    "Import completed"
                );
                Ok(Some(Outcome::Completed(summary)))
            }
            ImportStage::FileSelect => Ok(None),
        }
    }

    fn transition(&mut self, stage: ImportStage) {
        let transition = self.session.transition_to(stage);
        tracing::info!(
            session_id = %self.session.session_id,
            old_stage = %transition.old_stage,
            new_stage = %transition.new_stage,
            "Stage changed"
        );
        self.event_bus.emit_lossy(ImportEvent::StageChanged {
            data_file: self.session.data_file.clone(),
            old_stage: transition.old_stage.to_string(),
            new_stage: transition.new_stage.to_string(),
            timestamp: transition.transitioned_at,
        });
    }

    fn await_user(&mut self, pause: Pause) -> Outcome {
        tracing::debug!(stage = %self.session.stage, ?pause, "Waiting for user");
        self.pending = Some(pause.clone());
        Outcome::AwaitingInput(pause)
    }

    /// Record a halted stage; nothing is sent until `restart`
    fn halt(&mut self, failure: StageFailure) -> Outcome {
        let error_file_url = self.error_file_url_for(failure.errors_count);

        tracing::error!(
            session_id = %self.session.session_id,
            stage = %failure.stage,
            kind = ?failure.kind,
            errors_count = failure.errors_count,
            "Stage halted: {}",
            failure.message
        );

        self.session.append_log(failure.message.clone());
        self.event_bus.emit_lossy(ImportEvent::StageFailed {
            stage: failure.stage.to_string(),
            message: failure.message.clone(),
            error_file_url: error_file_url.clone(),
            timestamp: Utc::now(),
        });

        if failure.kind == FailureKind::RowErrors {
            let summary = self.summary(true);
            self.emit_completed(&summary);
        }

        self.pending = None;
        self.failure = Some(failure.clone());
        Outcome::Halted(failure)
    }

    /// Transport and decode errors halt the stage; anything else is misuse
    fn halt_on_error(&mut self, error: ImportError) -> ImportResult<Outcome> {
        let kind = match &error {
            e if e.is_transport() => FailureKind::Transport,
            ImportError::Parse(_) => FailureKind::UnexpectedResponse,
            _ => return Err(error),
        };
        let failure = StageFailure::new(self.session.stage, kind, error.to_string());
        Ok(self.halt(failure))
    }

    /// Restart the halted stage from its first request
    ///
    /// An interrupted precheck or import resumes with `restart: true` on its
    /// first chunk request so the warehouse discards the partial pass.
    pub async fn restart(&mut self) -> ImportResult<Outcome> {
        let Some(failure) = self.failure.take() else {
            return Err(ImportError::InvalidState(
                "Nothing to restart: no stage has failed".to_string(),
            ));
        };

        tracing::info!(
            session_id = %self.session.session_id,
            stage = %failure.stage,
            "Restarting stage"
        );
        self.log(format!("Restarting {}", failure.stage));

        match failure.stage {
            ImportStage::FileSelect => {
                let Some(path) = self.source_path.clone() else {
                    self.failure = Some(failure);
                    return Err(ImportError::InvalidState("No file to re-upload".to_string()));
                };
                self.session = ImportSession::new(self.options.import_template_id);
                self.start(&path).await
            }
            ImportStage::GlobalValues | ImportStage::Mappings => {
                // Failed while saving the config; let the user resubmit
                let pause = self.prepare_mappings();
                Ok(self.await_user(pause))
            }
            ImportStage::LookupMatching => {
                self.session.lookup_index = 0;
                self.session.match_sets.clear();
                self.drive().await
            }
            ImportStage::Preprocess => {
                self.session.preprocess_index = 0;
                self.drive().await
            }
            ImportStage::DoImport(_) => {
                self.session.restart_pending = true;
                self.session.reset_progress();
                self.emit_progress();
                self.drive().await
            }
            ImportStage::Completed => {
                self.failure = Some(failure);
                Err(ImportError::InvalidState(
                    "A completed import cannot be restarted".to_string(),
                ))
            }
        }
    }

    /// Start over with a fresh session after completion or a failure
    pub fn import_another(&mut self) -> ImportResult<()> {
        if !self.session.is_terminal() && self.failure.is_none() {
            return Err(ImportError::InvalidState(format!(
                "Import still in progress at {}",
                self.session.stage
            )));
        }

        let old_stage = self.session.stage;
        self.session = ImportSession::new(self.options.import_template_id);
        self.pending = None;
        self.failure = None;
        self.source_path = None;
        self.next_chunk_extras = ImportChunkRequest::default();

        tracing::info!(session_id = %self.session.session_id, "New import session");
        self.event_bus.emit_lossy(ImportEvent::StageChanged {
            data_file: None,
            old_stage: old_stage.to_string(),
            new_stage: ImportStage::FileSelect.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Error if the session is not waiting at `stage`
    fn ensure_stage(&self, stage: ImportStage) -> ImportResult<()> {
        if let Some(failure) = &self.failure {
            return Err(ImportError::InvalidState(format!(
                "Stage {} has failed; restart it first",
                failure.stage
            )));
        }
        if self.session.stage != stage {
            return Err(ImportError::InvalidState(format!(
                "Expected stage {}, session is at {}",
                stage, self.session.stage
            )));
        }
        Ok(())
    }

    fn error_file_url_for(&self, errors_count: u64) -> Option<String> {
        if errors_count == 0 {
            return None;
        }
        self.session
            .data_file
            .as_deref()
            .map(|data_file| self.api.error_file_url(data_file))
    }

    fn summary(&self, precheck_only: bool) -> ImportSummary {
        ImportSummary {
            data_file: self.session.data_file.clone().unwrap_or_default(),
            rows_processed: self.session.rows_processed,
            total_rows: self.session.total_rows,
            errors_count: self.session.errors_count,
            error_file_url: self.error_file_url_for(self.session.errors_count),
            precheck_only,
        }
    }

    /// Append to the log panel
    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(stage = %self.session.stage, "{}", message);
        self.session.append_log(message.clone());
        self.event_bus.emit_lossy(ImportEvent::LogMessage {
            stage: self.session.stage.to_string(),
            message,
            timestamp: Utc::now(),
        });
    }

    fn emit_progress(&self) {
        self.event_bus.emit_lossy(ImportEvent::Progress {
            stage: self.session.stage.to_string(),
            progress: self.session.progress,
            rows_processed: self.session.rows_processed,
            total_rows: self.session.total_rows,
            errors_count: self.session.errors_count,
            timestamp: Utc::now(),
        });
    }

    fn notify_next_step(&self, enabled: bool) {
        self.event_bus.emit_lossy(ImportEvent::NextStepEnabled {
            stage: self.session.stage.to_string(),
            enabled,
            timestamp: Utc::now(),
        });
    }

    fn emit_completed(&self, summary: &ImportSummary) {
        self.event_bus.emit_lossy(ImportEvent::ImportCompleted {
            data_file: summary.data_file.clone(),
            rows_processed: summary.rows_processed,
            total_rows: summary.total_rows,
            errors_count: summary.errors_count,
            error_file_url: summary.error_file_url.clone(),
            precheck_only: summary.precheck_only,
            timestamp: Utc::now(),
        });
    }
}
