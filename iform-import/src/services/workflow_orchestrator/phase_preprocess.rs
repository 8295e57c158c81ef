//! Stage 5: PREPROCESS
//!
//! Server-side validation steps, requested by index until the warehouse
//! stops asking for a next step.

use super::{ImportOrchestrator, Step};
use crate::models::PreprocessResponse;
use crate::services::warehouse_client::WarehouseApi;

impl<W: WarehouseApi> ImportOrchestrator<W> {
    pub(super) fn apply_preprocess(&mut self, response: &PreprocessResponse, step: &Step) {
        if let Some(description) = response.description.as_ref().filter(|d| !d.is_empty()) {
            self.log(description.clone());
        }
        for message in response.message.iter().filter(|m| !m.is_empty()) {
            self.log(message.clone());
        }

        if let Step::Continue = step {
            self.session.preprocess_index += 1;
            if let Some(next) = &response.next_description {
                tracing::debug!(index = self.session.preprocess_index, next = %next, "Next preprocessing step");
            }
        }
    }
}
