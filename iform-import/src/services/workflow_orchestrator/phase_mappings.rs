//! Stages 2-3: GLOBAL_VALUES and MAPPINGS
//!
//! Both are pure user input. The required-fields check runs after every
//! mapping change and gates the "next step" control.

use std::collections::BTreeMap;

use super::{ImportOrchestrator, Outcome, Pause};
use crate::error::{ImportError, ImportResult};
use crate::models::{FieldToken, ImportStage};
use crate::services::required_fields::{check_required_fields, RequiredFieldsReport};
use crate::services::warehouse_client::WarehouseApi;

impl<W: WarehouseApi> ImportOrchestrator<W> {
    /// Stage 2: GLOBAL_VALUES - store defaults and move on to mapping
    ///
    /// Blank values are dropped. Keys must be among the offered fields.
    pub async fn submit_global_values(
        &mut self,
        values: BTreeMap<String, String>,
    ) -> ImportResult<Outcome> {
        self.ensure_stage(ImportStage::GlobalValues)?;

        for field in values.keys() {
            if !self.options.global_value_fields.contains(field) {
                return Err(ImportError::InvalidInput(format!(
                    "'{}' is not a global value field",
                    field
                )));
            }
        }

        self.session.global_values = values
            .into_iter()
            .map(|(field, value)| (field, value.trim().to_string()))
            .filter(|(_, value)| !value.is_empty())
            .collect();

        tracing::info!(
            session_id = %self.session.session_id,
            count = self.session.global_values.len(),
            "Global values set"
        );

        match self.enter_stage(ImportStage::Mappings)? {
            Some(outcome) => Ok(outcome),
            None => Err(ImportError::InvalidState(
                "Mappings stage did not wait for input".to_string(),
            )),
        }
    }

    /// Map `column` to `field`, or leave it unmapped with `None`
    ///
    /// Returns the required-fields report after the change.
    pub fn update_mapping(
        &mut self,
        column: &str,
        field: Option<&str>,
    ) -> ImportResult<RequiredFieldsReport> {
        self.ensure_stage(ImportStage::Mappings)?;

        match field {
            Some(field) => {
                let token: FieldToken = field.parse()?;
                self.session.mapping.set(column, token)?;
            }
            None => self.session.mapping.clear(column),
        }

        let report = self.check_mappings();
        self.pending = Some(self.mappings_pause(&report));
        Ok(report)
    }

    /// Run the required-fields check and update the next-step control
    pub fn check_mappings(&self) -> RequiredFieldsReport {
        let report = check_required_fields(
            &self.options.required_fields,
            &self.session.global_values,
            &self.session.mapping,
        );
        let duplicates = self.session.mapping.duplicate_targets();
        self.notify_next_step(report.is_complete() && duplicates.is_empty());
        report
    }

    /// Stage 3: MAPPINGS - save the config and start lookup matching
    ///
    /// While required fields are outstanding, or a field is mapped from two
    /// columns, nothing is sent and the mapping pause is returned again.
    pub async fn submit_mappings(&mut self) -> ImportResult<Outcome> {
        self.ensure_stage(ImportStage::Mappings)?;

        let report = self.check_mappings();
        let pause = self.mappings_pause(&report);
        if let Pause::Mappings {
            outstanding,
            duplicates,
        } = &pause
        {
            if !outstanding.is_empty() {
                self.log(format!(
                    "Required fields are not yet provided: {}",
                    outstanding.join(", ")
                ));
                return Ok(self.await_user(pause));
            }
            if !duplicates.is_empty() {
                self.log(format!(
                    "Fields mapped from more than one column: {}",
                    duplicates.join(", ")
                ));
                return Ok(self.await_user(pause));
            }
        }

        let data_file = self.session.require_data_file()?.to_string();
        if let Err(e) = self
            .api
            .save_import_config(&data_file, &self.session.global_values, &self.session.mapping)
            .await
        {
            return self.halt_on_error(e);
        }
        self.log(format!(
            "Saved mappings for {} column(s)",
            self.session.mapping.mappings.len()
        ));
        self.pending = None;

        match self.enter_stage(ImportStage::LookupMatching)? {
            Some(outcome) => Ok(outcome),
            None => self.drive().await,
        }
    }

    /// Suggest mappings on first entry and report what is outstanding
    pub(super) fn prepare_mappings(&mut self) -> Pause {
        if self.session.mapping.mappings.is_empty() {
            let mapped = self
                .session
                .mapping
                .auto_map(&self.options.available_fields);
            if mapped > 0 {
                self.log(format!("{} column(s) mapped automatically", mapped));
            }
        }
        let report = self.check_mappings();
        self.mappings_pause(&report)
    }

    fn mappings_pause(&self, report: &RequiredFieldsReport) -> Pause {
        Pause::Mappings {
            outstanding: report.outstanding.clone(),
            duplicates: self.session.mapping.duplicate_targets(),
        }
    }
}
