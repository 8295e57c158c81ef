//! Warehouse import service request/response contracts
//!
//! Field names follow the warehouse JSON (camelCase). Optional fields are
//! optional on the wire too; the warehouse omits rather than nulls them.

use serde::{Deserialize, Deserializer, Serialize};

use super::lookup_match::UnmatchedInfo;

/// Lookup matching is finished when the warehouse answers with this key
pub const FIND_LOOKUP_FIELDS_DONE: &str = "findLookupFieldsDone";

/// JS-style truthiness: `true`, a non-empty string or a non-zero number
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(_) => true,
    })
}

/// Either a single message or a list of them
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Multipart upload of the source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub interim_file: String,
    pub original_name: String,
}

/// Transfer of the interim file onto the warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileResponse {
    pub status: String,
    pub uploaded_file: Option<String>,
    pub msg: Option<String>,
}

/// Extraction of a zipped upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    pub status: String,
    pub data_file: Option<String>,
    pub msg: Option<String>,
}

/// One chunk of the file loaded into the warehouse temp table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadChunkResponse {
    pub status: String,
    pub msg_key: Option<String>,
    pub progress: Option<f64>,
    pub msg: Option<String>,
}

/// One step of the lookup-field scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupMatchingResponse {
    pub status: String,
    pub msg_key: Option<String>,
    pub column_label: Option<String>,
    pub unmatched_info: Option<UnmatchedInfo>,
    pub col_title: Option<String>,
    pub msg: Option<String>,
}

impl LookupMatchingResponse {
    pub fn is_scan_done(&self) -> bool {
        self.msg_key.as_deref() == Some(FIND_LOOKUP_FIELDS_DONE)
    }
}

/// Verdict on a lookup match save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Ok,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveLookupMatchesResponse {
    pub status: SaveStatus,
    #[serde(default)]
    pub unmatched: Vec<String>,
    pub msg: Option<String>,
}

/// One preprocessing step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessResponse {
    pub description: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub message: Vec<String>,
    pub error: Option<String>,
    pub error_count: Option<u64>,
    #[serde(default, deserialize_with = "truthy")]
    pub next_step: bool,
    pub next_description: Option<String>,
}

/// Status of an import chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChunkStatus {
    Error,
    Conflict,
    Done,
    /// Any other status means more chunks remain
    Progressing(String),
}

impl From<String> for ChunkStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "error" => ChunkStatus::Error,
            "conflict" => ChunkStatus::Conflict,
            "done" => ChunkStatus::Done,
            _ => ChunkStatus::Progressing(value),
        }
    }
}

impl From<ChunkStatus> for String {
    fn from(status: ChunkStatus) -> Self {
        match status {
            ChunkStatus::Error => "error".to_string(),
            ChunkStatus::Conflict => "conflict".to_string(),
            ChunkStatus::Done => "done".to_string(),
            ChunkStatus::Progressing(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportChunkResponse {
    pub status: ChunkStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub rows_processed: u64,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub errors_count: u64,
    pub msg: Option<String>,
}

/// Form body of an import chunk request
///
/// Only fields that are set go on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportChunkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_template_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precheck: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_template_overwrite: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preprocess_next_step_truthiness() {
        let r: PreprocessResponse = serde_json::from_value(json!({"nextStep": "checkRecords"})).unwrap();
        assert!(r.next_step);
        let r: PreprocessResponse = serde_json::from_value(json!({"nextStep": false})).unwrap();
        assert!(!r.next_step);
        let r: PreprocessResponse = serde_json::from_value(json!({"nextStep": ""})).unwrap();
        assert!(!r.next_step);
        let r: PreprocessResponse = serde_json::from_value(json!({})).unwrap();
        assert!(!r.next_step);
        assert!(r.message.is_empty());
    }

    #[test]
    fn test_preprocess_message_one_or_many() {
        let r: PreprocessResponse =
            serde_json::from_value(json!({"message": "3 rows checked"})).unwrap();
        assert_eq!(r.message, vec!["3 rows checked".to_string()]);
        let r: PreprocessResponse =
            serde_json::from_value(json!({"message": ["a", "b"], "error": "Bad date", "errorCount": 2}))
                .unwrap();
        assert_eq!(r.message.len(), 2);
        assert_eq!(r.error.as_deref(), Some("Bad date"));
        assert_eq!(r.error_count, Some(2));
    }

    #[test]
    fn test_chunk_status_mapping() {
        let r: ImportChunkResponse = serde_json::from_value(json!({
            "status": "importing", "progress": 50.0, "rowsProcessed": 100, "totalRows": 200, "errorsCount": 0
        }))
        .unwrap();
        assert_eq!(r.status, ChunkStatus::Progressing("importing".to_string()));
        assert_eq!(r.rows_processed, 100);

        let r: ImportChunkResponse =
            serde_json::from_value(json!({"status": "conflict", "msg": "Template exists"})).unwrap();
        assert_eq!(r.status, ChunkStatus::Conflict);
        assert_eq!(r.progress, 0.0);
    }

    #[test]
    fn test_chunk_request_skips_unset_fields() {
        let request = ImportChunkRequest {
            force_template_overwrite: Some(true),
            ..Default::default()
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"forceTemplateOverwrite": true}));
    }

    #[test]
    fn test_lookup_scan_done() {
        let r: LookupMatchingResponse = serde_json::from_value(json!({
            "status": "ok", "msgKey": "findLookupFieldsDone"
        }))
        .unwrap();
        assert!(r.is_scan_done());
        assert!(r.unmatched_info.is_none());
    }
}
