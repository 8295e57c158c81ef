//! Stage 1: FILE_SELECT
//!
//! Upload → send to warehouse → extract (zip only) → init server config →
//! load the temp table chunk by chunk until progress reaches 100.

use std::collections::BTreeSet;
use std::path::Path;

use super::{ImportOrchestrator, Outcome};
use crate::error::{ImportError, ImportResult};
use crate::models::{
    ColumnMapping, FailureKind, ImportStage, LoadChunkResponse, StageFailure,
};
use crate::services::warehouse_client::WarehouseApi;

/// Column titles from the first row of a CSV file
pub fn read_csv_headers(path: &Path) -> ImportResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ImportError::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))?;
    let headers = reader
        .headers()
        .map_err(|e| ImportError::InvalidInput(format!("Cannot read headers of {}: {}", path.display(), e)))?;

    Ok(headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .filter(|h| !h.is_empty())
        .collect())
}

fn is_zip(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".zip")
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

impl<W: WarehouseApi> ImportOrchestrator<W> {
    /// Stage 1: FILE_SELECT - upload `path` and load it into the temp table
    ///
    /// Column titles come from `ImportOptions::columns` when given, else
    /// from the CSV header row. Other formats need them supplied.
    pub async fn start(&mut self, path: &Path) -> ImportResult<Outcome> {
        self.ensure_stage(ImportStage::FileSelect)?;

        let columns = match &self.options.columns {
            Some(columns) => columns.clone(),
            None if is_csv(path) => read_csv_headers(path)?,
            None => {
                return Err(ImportError::InvalidInput(format!(
                    "Column titles must be supplied for {}",
                    path.display()
                )))
            }
        };
        if columns.is_empty() {
            return Err(ImportError::InvalidInput(format!(
                "{} has no column titles",
                path.display()
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(repeated) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(ImportError::InvalidInput(format!(
                "Column title '{}' appears more than once in {}",
                repeated,
                path.display()
            )));
        }

        self.source_path = Some(path.to_path_buf());
        self.session.mapping = ColumnMapping::new(columns);

        tracing::info!(
            session_id = %self.session.session_id,
            file = %path.display(),
            columns = self.session.mapping.columns.len(),
            "Starting import"
        );

        // Upload
        let upload = match self.api.upload_file(path).await {
            Ok(upload) => upload,
            Err(e) => return self.halt_on_error(e),
        };
        self.session.original_name = Some(upload.original_name.clone());
        self.log(format!("Uploaded {}", upload.original_name));

        // Transfer to the warehouse
        let sent = match self.api.send_file_to_warehouse(&upload.interim_file).await {
            Ok(sent) => sent,
            Err(e) => return self.halt_on_error(e),
        };
        let uploaded_file = match (sent.status.as_str(), sent.uploaded_file) {
            ("ok", Some(uploaded_file)) => uploaded_file,
            (_, _) => {
                return Ok(self.server_failure(
                    sent.msg,
                    "The file could not be sent to the warehouse",
                ))
            }
        };
        self.log("File sent to the warehouse");

        // Zip archives hold the real data file
        let data_file = if is_zip(&upload.original_name) {
            let extracted = match self.api.extract_file(&uploaded_file).await {
                Ok(extracted) => extracted,
                Err(e) => return self.halt_on_error(e),
            };
            match (extracted.status.as_str(), extracted.data_file) {
                ("ok", Some(data_file)) => {
                    self.log("File extracted");
                    data_file
                }
                (_, _) => {
                    return Ok(
                        self.server_failure(extracted.msg, "The zip file could not be extracted")
                    )
                }
            }
        } else {
            uploaded_file
        };
        self.session.data_file = Some(data_file.clone());

        if let Err(e) = self
            .api
            .init_server_config(&data_file, self.session.import_template_id)
            .await
        {
            return self.halt_on_error(e);
        }
        self.log("Import configuration initialised");

        self.session.reset_progress();
        self.drive().await
    }

    /// Temp table chunk: move the progress bar
    pub(super) fn apply_temp_table_load(&mut self, response: &LoadChunkResponse) {
        if let Some(progress) = response.progress {
            self.session.progress = progress.clamp(0.0, 100.0);
            self.emit_progress();
        }
        if let Some(msg) = response.msg.as_ref().filter(|_| response.status != "error") {
            self.log(msg.clone());
        }
        tracing::debug!(
            progress = ?response.progress,
            msg_key = ?response.msg_key,
            "Temp table chunk loaded"
        );
    }

    fn server_failure(&mut self, msg: Option<String>, fallback: &str) -> Outcome {
        let message = msg.filter(|m| !m.is_empty()).unwrap_or_else(|| fallback.to_string());
        let failure = StageFailure::new(self.session.stage, FailureKind::Server, message);
        self.halt(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_csv_headers_strips_bom_and_blanks() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "\u{feff}Species, Grid ref ,,Date").unwrap();
        writeln!(file, "Bellis perennis,SU1234,,2024-05-01").unwrap();

        let headers = read_csv_headers(file.path()).unwrap();
        assert_eq!(headers, vec!["Species", "Grid ref", "Date"]);
    }

    #[test]
    fn test_file_kind_detection() {
        assert!(is_zip("records.ZIP"));
        assert!(!is_zip("records.csv"));
        assert!(is_csv(Path::new("/tmp/records.CSV")));
        assert!(!is_csv(Path::new("/tmp/records.xlsx")));
    }
}
