//! Test Helper Utilities
//!
//! Scripted warehouse for driving the orchestrator without a network.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iform_common::events::{EventBus, ImportEvent};
use iform_import::error::{ImportError, ImportResult};
use iform_import::models::{
    AvailableField, ColumnMapping, ExtractResponse, ImportChunkRequest, ImportChunkResponse,
    LoadChunkResponse, LookupMatchingResponse, PreprocessResponse, SaveLookupMatchesResponse,
    SendFileResponse, UploadResponse,
};
use iform_import::services::{ImportOptions, ImportOrchestrator, WarehouseApi};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Endpoints a test can script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Upload,
    SendFile,
    Extract,
    InitConfig,
    LoadChunk,
    SaveConfig,
    LookupMatching,
    SaveMatches,
    Preprocess,
    ImportChunk,
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    /// Request fails in transport
    NetworkDown,
}

/// A request the orchestrator made, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upload(String),
    SendFile(String),
    Extract(String),
    InitConfig {
        data_file: String,
        template_id: Option<u32>,
    },
    LoadChunk(String),
    SaveConfig {
        global_values: BTreeMap<String, String>,
        mappings: Vec<(String, String)>,
    },
    LookupMatching(u32),
    SaveMatches {
        source_field: String,
        values: BTreeMap<String, String>,
    },
    Preprocess(u32),
    ImportChunk(ImportChunkRequest),
}

impl Call {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Call::Upload(_) => Endpoint::Upload,
            Call::SendFile(_) => Endpoint::SendFile,
            Call::Extract(_) => Endpoint::Extract,
            Call::InitConfig { .. } => Endpoint::InitConfig,
            Call::LoadChunk(_) => Endpoint::LoadChunk,
            Call::SaveConfig { .. } => Endpoint::SaveConfig,
            Call::LookupMatching(_) => Endpoint::LookupMatching,
            Call::SaveMatches { .. } => Endpoint::SaveMatches,
            Call::Preprocess(_) => Endpoint::Preprocess,
            Call::ImportChunk(_) => Endpoint::ImportChunk,
        }
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<Endpoint, VecDeque<Reply>>,
    calls: Vec<Call>,
}

/// Scripted `WarehouseApi`
///
/// Cloning shares the script, so a test keeps a handle to inspect calls
/// after handing a clone to the orchestrator. Upload, send, extract and
/// config calls answer with defaults when nothing is scripted; polling
/// endpoints fail in transport once their script runs out.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    script: Arc<Mutex<Script>>,
}

pub const DATA_FILE: &str = "import-data-1.csv";

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for an endpoint
    pub fn script(&self, endpoint: Endpoint, replies: Vec<Value>) -> &Self {
        let mut script = self.script.lock().unwrap();
        let queue = script.replies.entry(endpoint).or_default();
        queue.extend(replies.into_iter().map(Reply::Json));
        self
    }

    /// Queue a transport failure for an endpoint
    pub fn script_failure(&self, endpoint: Endpoint) -> &Self {
        let mut script = self.script.lock().unwrap();
        script
            .replies
            .entry(endpoint)
            .or_default()
            .push_back(Reply::NetworkDown);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint() == endpoint)
            .collect()
    }

    /// Chunk request bodies, in order
    pub fn chunk_requests(&self) -> Vec<ImportChunkRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ImportChunk(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.script.lock().unwrap().calls.push(call);
    }

    fn reply<T: DeserializeOwned>(&self, endpoint: Endpoint, default: Option<Value>) -> ImportResult<T> {
        let next = self
            .script
            .lock()
            .unwrap()
            .replies
            .get_mut(&endpoint)
            .and_then(|q| q.pop_front());

        let value = match (next, default) {
            (Some(Reply::Json(value)), _) => value,
            (Some(Reply::NetworkDown), _) => {
                return Err(ImportError::Network(format!("{:?}: connection refused", endpoint)))
            }
            (None, Some(value)) => value,
            (None, None) => {
                return Err(ImportError::Network(format!("{:?}: no scripted reply", endpoint)))
            }
        };
        serde_json::from_value(value).map_err(|e| ImportError::Parse(e.to_string()))
    }
}

#[async_trait]
impl WarehouseApi for FakeWarehouse {
    async fn upload_file(&self, path: &Path) -> ImportResult<UploadResponse> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(Call::Upload(name.clone()));
        self.reply(
            Endpoint::Upload,
            Some(json!({"interimFile": "interim-1", "originalName": name})),
        )
    }

    async fn send_file_to_warehouse(&self, interim_file: &str) -> ImportResult<SendFileResponse> {
        self.record(Call::SendFile(interim_file.to_string()));
        self.reply(
            Endpoint::SendFile,
            Some(json!({"status": "ok", "uploadedFile": DATA_FILE})),
        )
    }

    async fn extract_file(&self, uploaded_file: &str) -> ImportResult<ExtractResponse> {
        self.record(Call::Extract(uploaded_file.to_string()));
        self.reply(
            Endpoint::Extract,
            Some(json!({"status": "ok", "dataFile": "extracted-1.csv"})),
        )
    }

    async fn init_server_config(
        &self,
        data_file: &str,
        import_template_id: Option<u32>,
    ) -> ImportResult<()> {
        self.record(Call::InitConfig {
            data_file: data_file.to_string(),
            template_id: import_template_id,
        });
        let _: Value = self.reply(Endpoint::InitConfig, Some(json!({})))?;
        Ok(())
    }

    async fn load_chunk_to_temp_table(&self, data_file: &str) -> ImportResult<LoadChunkResponse> {
        self.record(Call::LoadChunk(data_file.to_string()));
        self.reply(Endpoint::LoadChunk, None)
    }

    async fn save_import_config(
        &self,
        _data_file: &str,
        global_values: &BTreeMap<String, String>,
        mapping: &ColumnMapping,
    ) -> ImportResult<()> {
        self.record(Call::SaveConfig {
            global_values: global_values.clone(),
            mappings: mapping.to_form_pairs(),
        });
        let _: Value = self.reply(Endpoint::SaveConfig, Some(json!({})))?;
        Ok(())
    }

    async fn process_lookup_matching(
        &self,
        _data_file: &str,
        index: u32,
    ) -> ImportResult<LookupMatchingResponse> {
        self.record(Call::LookupMatching(index));
        self.reply(Endpoint::LookupMatching, None)
    }

    async fn save_lookup_matches(
        &self,
        _data_file: &str,
        source_field: &str,
        values_json: &str,
    ) -> ImportResult<SaveLookupMatchesResponse> {
        self.record(Call::SaveMatches {
            source_field: source_field.to_string(),
            values: serde_json::from_str(values_json).unwrap_or_default(),
        });
        self.reply(Endpoint::SaveMatches, None)
    }

    async fn preprocess(&self, _data_file: &str, index: u32) -> ImportResult<PreprocessResponse> {
        self.record(Call::Preprocess(index));
        self.reply(Endpoint::Preprocess, None)
    }

    async fn import_chunk(
        &self,
        _data_file: &str,
        request: &ImportChunkRequest,
    ) -> ImportResult<ImportChunkResponse> {
        self.record(Call::ImportChunk(request.clone()));
        self.reply(Endpoint::ImportChunk, None)
    }

    fn error_file_url(&self, data_file: &str) -> String {
        format!("http://warehouse.test/import_2/get_errors_file?data-file={}", data_file)
    }
}

/// CSV file with the given header row and one data row
pub fn csv_file(headers: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("records")
        .suffix(".csv")
        .tempfile()
        .expect("Failed to create temp CSV");
    writeln!(file, "{}", headers.join(",")).unwrap();
    writeln!(file, "{}", vec!["x"; headers.len()].join(",")).unwrap();
    file
}

pub fn field(token: &str, caption: &str) -> AvailableField {
    AvailableField {
        token: token.parse().unwrap(),
        caption: caption.to_string(),
    }
}

/// Columns and fields shared by most scenarios
pub fn standard_options() -> ImportOptions {
    ImportOptions {
        required_fields: vec![
            "occurrence:fk_taxa_taxon_list".to_string(),
            "sample:entered_sref".to_string(),
            "sample:date".to_string(),
        ],
        available_fields: vec![
            field("occurrence:fk_taxa_taxon_list", "Species"),
            field("sample:entered_sref", "Grid ref"),
            field("sample:date", "Date"),
        ],
        description: Some("Garden survey 2024".to_string()),
        template_title: Some("Garden survey".to_string()),
        ..Default::default()
    }
}

pub const STANDARD_HEADERS: &[&str] = &["Species", "Grid ref", "Date"];

/// Temp table loads in two chunks
pub fn script_file_load(fake: &FakeWarehouse) {
    fake.script(
        Endpoint::LoadChunk,
        vec![
            json!({"status": "ok", "msgKey": "loadingRecords", "progress": 50}),
            json!({"status": "ok", "msgKey": "loadingRecords", "progress": 100}),
        ],
    );
}

/// One lookup column that matches cleanly, then done
pub fn script_clean_lookups(fake: &FakeWarehouse) {
    fake.script(
        Endpoint::LookupMatching,
        vec![
            json!({"status": "ok", "msgKey": "lookupFieldChecked", "columnLabel": "Species"}),
            json!({"status": "ok", "msgKey": "findLookupFieldsDone"}),
        ],
    );
}

/// Two preprocessing steps
pub fn script_preprocess(fake: &FakeWarehouse) {
    fake.script(
        Endpoint::Preprocess,
        vec![
            json!({"description": "Checking grid references", "message": ["42 grid refs valid"], "nextStep": true, "nextDescription": "Checking dates"}),
            json!({"description": "Checking dates", "message": "All dates valid", "nextStep": false}),
        ],
    );
}

/// Clean precheck in two chunks
pub fn script_clean_precheck(fake: &FakeWarehouse) {
    fake.script(
        Endpoint::ImportChunk,
        vec![
            json!({"status": "continuing", "progress": 50, "rowsProcessed": 5, "totalRows": 10, "errorsCount": 0}),
            json!({"status": "done", "progress": 100, "rowsProcessed": 10, "totalRows": 10, "errorsCount": 0}),
        ],
    );
}

/// Clean import in two chunks
pub fn script_clean_import(fake: &FakeWarehouse) {
    fake.script(
        Endpoint::ImportChunk,
        vec![
            json!({"status": "continuing", "progress": 50, "rowsProcessed": 5, "totalRows": 10, "errorsCount": 0}),
            json!({"status": "done", "progress": 100, "rowsProcessed": 10, "totalRows": 10, "errorsCount": 0}),
        ],
    );
}

pub fn orchestrator(
    fake: &FakeWarehouse,
    options: ImportOptions,
) -> (ImportOrchestrator<FakeWarehouse>, EventBus) {
    let event_bus = EventBus::new(1000);
    let orchestrator = ImportOrchestrator::new(fake.clone(), event_bus.clone(), options);
    (orchestrator, event_bus)
}

/// Drain everything received so far
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<ImportEvent>) -> Vec<ImportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// New-stage labels of all StageChanged events
pub fn stage_changes(events: &[ImportEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ImportEvent::StageChanged { new_stage, .. } => Some(new_stage.clone()),
            _ => None,
        })
        .collect()
}
