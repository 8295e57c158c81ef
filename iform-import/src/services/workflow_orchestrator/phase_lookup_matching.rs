//! Stage 4: LOOKUP_MATCHING
//!
//! The warehouse is asked about one lookup column per request (`index`).
//! A column with unresolved values pauses the scan behind a match table;
//! once its matches are saved the scan resumes at the next index.

use chrono::Utc;
use iform_common::events::ImportEvent;

use super::{ImportOrchestrator, Outcome, Pause, Step};
use crate::error::{ImportError, ImportResult};
use crate::models::{
    ImportStage, LookupMatchSet, LookupMatchingResponse, MatchSetState, SaveStatus,
};
use crate::services::warehouse_client::WarehouseApi;

impl<W: WarehouseApi> ImportOrchestrator<W> {
    pub(super) fn apply_lookup_matching(&mut self, response: &LookupMatchingResponse, step: &Step) {
        if let Some(msg) = response.msg.as_ref().filter(|m| !m.is_empty()) {
            self.log(msg.clone());
        }

        match step {
            Step::Continue => {
                if let Some(label) = &response.column_label {
                    tracing::debug!(index = self.session.lookup_index, column = %label, "Lookup column matched");
                }
                self.session.lookup_index += 1;
            }
            Step::AwaitUser(Pause::LookupMatches {
                source_field,
                column_label,
                ..
            }) => {
                let Some(info) = response.unmatched_info.as_ref() else {
                    return;
                };
                let set = LookupMatchSet::new(source_field.clone(), column_label.clone(), info);

                tracing::info!(
                    source_field = %set.source_field,
                    lookup_type = set.lookup_type.as_str(),
                    unmatched = set.matches.len(),
                    "Values need matching"
                );
                self.event_bus.emit_lossy(ImportEvent::MatchTableShown {
                    source_field: set.source_field.clone(),
                    column_label: set.column_label.clone(),
                    lookup_type: set.lookup_type.as_str().to_string(),
                    values: set.values(),
                    options: set
                        .options
                        .iter()
                        .map(|(id, caption)| (id.clone(), caption.clone()))
                        .collect(),
                    timestamp: Utc::now(),
                });

                self.session.match_sets.retain(|s| s.source_field != set.source_field);
                self.session.match_sets.push(set);
                self.session.lookup_index += 1;
                self.notify_next_step(false);
            }
            Step::AwaitUser(Pause::ReadyForNextStep { .. }) => {
                self.log("All lookup values are matched");
                self.notify_next_step(self.session.all_matches_saved());
            }
            _ => {}
        }
    }

    /// Choose the warehouse id `target_id` for raw `value` of a column
    pub fn choose_match(
        &mut self,
        source_field: &str,
        value: &str,
        target_id: &str,
    ) -> ImportResult<()> {
        self.ensure_stage(ImportStage::LookupMatching)?;

        let set = self.session.match_set_mut(source_field).ok_or_else(|| {
            ImportError::InvalidInput(format!("No match table for '{}'", source_field))
        })?;
        set.choose(value, target_id)
    }

    /// Save the matches for the column the scan is paused on
    ///
    /// An incomplete set is not sent; its unresolved rows are flagged. When
    /// the warehouse itself reports values unresolved, exactly those rows are
    /// flagged and the scan stays paused.
    pub async fn save_lookup_matches(&mut self, source_field: &str) -> ImportResult<Outcome> {
        self.ensure_stage(ImportStage::LookupMatching)?;

        let pause = match &self.pending {
            Some(pause @ Pause::LookupMatches { source_field: f, .. }) if f == source_field => {
                pause.clone()
            }
            _ => {
                return Err(ImportError::InvalidState(format!(
                    "Not waiting for matches for '{}'",
                    source_field
                )))
            }
        };

        let (state, payload) = match self.session.match_set_mut(source_field) {
            Some(set) => (set.state(), set.values_payload()),
            None => {
                return Err(ImportError::InvalidState(format!(
                    "No match table for '{}'",
                    source_field
                )))
            }
        };

        if let MatchSetState::Incomplete(unresolved) = state {
            self.flag_unmatched(source_field, unresolved);
            return Ok(self.await_user(pause));
        }

        let data_file = self.session.require_data_file()?.to_string();
        let response = match self
            .api
            .save_lookup_matches(&data_file, source_field, &payload)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.halt_on_error(e),
        };

        match response.status {
            SaveStatus::Incomplete => {
                if let Some(set) = self.session.match_set_mut(source_field) {
                    set.flag_unmatched(&response.unmatched);
                }
                if let Some(msg) = response.msg {
                    self.log(msg);
                }
                self.flag_unmatched(source_field, response.unmatched);
                Ok(self.await_user(pause))
            }
            SaveStatus::Ok => {
                if let Some(set) = self.session.match_set_mut(source_field) {
                    set.saved = true;
                }
                self.event_bus.emit_lossy(ImportEvent::LookupMatchesSaved {
                    source_field: source_field.to_string(),
                    timestamp: Utc::now(),
                });
                self.log(format!("Matches saved for {}", source_field));
                self.pending = None;
                self.drive().await
            }
        }
    }

    /// Stage 4 → 5: the user pressed "next step" after all matches saved
    pub async fn proceed(&mut self) -> ImportResult<Outcome> {
        self.ensure_stage(ImportStage::LookupMatching)?;

        if !matches!(self.pending, Some(Pause::ReadyForNextStep { .. })) {
            return Err(ImportError::InvalidState(
                "Lookup matching has not finished".to_string(),
            ));
        }
        if !self.session.all_matches_saved() {
            return Err(ImportError::InvalidState(
                "Some match tables have not been saved".to_string(),
            ));
        }

        self.pending = None;
        match self.enter_stage(ImportStage::Preprocess)? {
            Some(outcome) => Ok(outcome),
            None => self.drive().await,
        }
    }

    fn flag_unmatched(&mut self, source_field: &str, values: Vec<String>) {
        tracing::info!(source_field, unmatched = values.len(), "Matches incomplete");
        self.notify_next_step(false);
        self.event_bus.emit_lossy(ImportEvent::UnmatchedValuesFlagged {
            source_field: source_field.to_string(),
            values,
            timestamp: Utc::now(),
        });
    }
}
