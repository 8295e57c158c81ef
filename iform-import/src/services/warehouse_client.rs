//! Warehouse import service client
//!
//! One method per warehouse endpoint. Every call carries the
//! `IndiciaTokens` authorization header; every call after the upload carries
//! the `data-file` token. Nothing here retries: a failed call is reported to
//! the orchestrator, which halts the stage.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::config::WarehouseConfig;
use crate::error::{ImportError, ImportResult};
use crate::models::{
    ColumnMapping, ExtractResponse, ImportChunkRequest, ImportChunkResponse, LoadChunkResponse,
    LookupMatchingResponse, PreprocessResponse, SaveLookupMatchesResponse, SendFileResponse,
    UploadResponse,
};

const USER_AGENT: &str = concat!("iform-import/", env!("CARGO_PKG_VERSION"));

/// Import service actions, relative to the services root
pub mod endpoints {
    pub const UPLOAD_FILE: &str = "import_2/upload_file";
    pub const SEND_FILE_TO_WAREHOUSE: &str = "import_2/send_file_to_warehouse";
    pub const EXTRACT_FILE: &str = "import_2/extract_file";
    pub const INIT_SERVER_CONFIG: &str = "import_2/init_server_config";
    pub const LOAD_CHUNK_TO_TEMP_TABLE: &str = "import_2/load_chunk_to_temp_table";
    pub const SAVE_IMPORT_CONFIG: &str = "import_2/save_import_config";
    pub const PROCESS_LOOKUP_MATCHING: &str = "import_2/process_lookup_matching";
    pub const SAVE_LOOKUP_MATCHES_GROUP: &str = "import_2/save_lookup_matches_group";
    pub const PREPROCESS: &str = "import_2/preprocess";
    pub const IMPORT_CHUNK: &str = "import_2/import_chunk";
    pub const GET_ERRORS_FILE: &str = "import_2/get_errors_file";
}

/// Operations the orchestrator needs from the warehouse
///
/// The orchestrator only ever has one of these calls outstanding.
#[async_trait]
pub trait WarehouseApi: Send + Sync {
    /// Multipart upload of the local file
    async fn upload_file(&self, path: &Path) -> ImportResult<UploadResponse>;

    /// Move the interim upload onto the warehouse
    async fn send_file_to_warehouse(&self, interim_file: &str) -> ImportResult<SendFileResponse>;

    /// Unzip an uploaded archive
    async fn extract_file(&self, uploaded_file: &str) -> ImportResult<ExtractResponse>;

    /// Create the server-side import config, optionally from a saved template
    async fn init_server_config(
        &self,
        data_file: &str,
        import_template_id: Option<u32>,
    ) -> ImportResult<()>;

    /// Load the next chunk of the file into the temp table
    async fn load_chunk_to_temp_table(&self, data_file: &str) -> ImportResult<LoadChunkResponse>;

    /// Store global values and column mappings in the server-side config
    async fn save_import_config(
        &self,
        data_file: &str,
        global_values: &BTreeMap<String, String>,
        mapping: &ColumnMapping,
    ) -> ImportResult<()>;

    /// Find the lookup field at `index` and any values it cannot match
    async fn process_lookup_matching(
        &self,
        data_file: &str,
        index: u32,
    ) -> ImportResult<LookupMatchingResponse>;

    /// Save the user's matches for one source column
    async fn save_lookup_matches(
        &self,
        data_file: &str,
        source_field: &str,
        values_json: &str,
    ) -> ImportResult<SaveLookupMatchesResponse>;

    /// Run preprocessing step `index`
    async fn preprocess(&self, data_file: &str, index: u32) -> ImportResult<PreprocessResponse>;

    /// Precheck or import the next chunk
    async fn import_chunk(
        &self,
        data_file: &str,
        request: &ImportChunkRequest,
    ) -> ImportResult<ImportChunkResponse>;

    /// Download link for the row error file
    fn error_file_url(&self, data_file: &str) -> String;
}

/// reqwest-backed warehouse client
pub struct WarehouseClient {
    http_client: reqwest::Client,
    config: WarehouseConfig,
}

impl WarehouseClient {
    pub fn new(config: WarehouseConfig) -> ImportResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ImportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url, endpoint)
    }

    /// Send a prepared request and decode the JSON body
    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> ImportResult<T> {
        let response = self.send(endpoint, request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ImportError::Parse(format!("{} returned unexpected body ({}): {}", endpoint, e, body))
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> ImportResult<reqwest::Response> {
        tracing::debug!(endpoint, "Calling warehouse");

        let response = request
            .header(reqwest::header::AUTHORIZATION, self.config.authorization())
            .send()
            .await
            .map_err(|e| ImportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "Warehouse call failed");
            return Err(ImportError::Api(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// Save the row error file to `dest`, returning its size in bytes
    pub async fn download_error_file(&self, data_file: &str, dest: &Path) -> ImportResult<u64> {
        let request = self
            .http_client
            .get(self.url(endpoints::GET_ERRORS_FILE))
            .query(&[("data-file", data_file)]);
        let response = self.send(endpoints::GET_ERRORS_FILE, request).await?;
        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;

        tracing::info!(data_file, dest = %dest.display(), bytes = bytes.len(), "Error file downloaded");
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl WarehouseApi for WarehouseClient {
    async fn upload_file(&self, path: &Path) -> ImportResult<UploadResponse> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ImportError::InvalidInput(format!("Not a file: {}", path.display())))?;
        let contents = tokio::fs::read(path).await?;

        let part = reqwest::multipart::Part::bytes(contents).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .http_client
            .post(self.url(endpoints::UPLOAD_FILE))
            .multipart(form);
        self.send_json(endpoints::UPLOAD_FILE, request).await
    }

    async fn send_file_to_warehouse(&self, interim_file: &str) -> ImportResult<SendFileResponse> {
        let request = self
            .http_client
            .get(self.url(endpoints::SEND_FILE_TO_WAREHOUSE))
            .query(&[("interim-file", interim_file)]);
        self.send_json(endpoints::SEND_FILE_TO_WAREHOUSE, request).await
    }

    async fn extract_file(&self, uploaded_file: &str) -> ImportResult<ExtractResponse> {
        let request = self
            .http_client
            .get(self.url(endpoints::EXTRACT_FILE))
            .query(&[("uploaded-file", uploaded_file)]);
        self.send_json(endpoints::EXTRACT_FILE, request).await
    }

    async fn init_server_config(
        &self,
        data_file: &str,
        import_template_id: Option<u32>,
    ) -> ImportResult<()> {
        let mut query = vec![("data-file", data_file.to_string())];
        if let Some(id) = import_template_id {
            query.push(("import_template_id", id.to_string()));
        }
        let request = self
            .http_client
            .get(self.url(endpoints::INIT_SERVER_CONFIG))
            .query(&query);
        // No body contract beyond a success status
        self.send(endpoints::INIT_SERVER_CONFIG, request).await?;
        Ok(())
    }

    async fn load_chunk_to_temp_table(&self, data_file: &str) -> ImportResult<LoadChunkResponse> {
        let request = self
            .http_client
            .get(self.url(endpoints::LOAD_CHUNK_TO_TEMP_TABLE))
            .query(&[("data-file", data_file)]);
        self.send_json(endpoints::LOAD_CHUNK_TO_TEMP_TABLE, request).await
    }

    async fn save_import_config(
        &self,
        data_file: &str,
        global_values: &BTreeMap<String, String>,
        mapping: &ColumnMapping,
    ) -> ImportResult<()> {
        let columns: BTreeMap<String, String> = mapping.to_form_pairs().into_iter().collect();
        let form = [
            (
                "globalValues",
                serde_json::to_string(global_values).map_err(|e| ImportError::Parse(e.to_string()))?,
            ),
            (
                "columns",
                serde_json::to_string(&columns).map_err(|e| ImportError::Parse(e.to_string()))?,
            ),
        ];
        let request = self
            .http_client
            .post(self.url(endpoints::SAVE_IMPORT_CONFIG))
            .query(&[("data-file", data_file)])
            .form(&form);
        self.send(endpoints::SAVE_IMPORT_CONFIG, request).await?;
        Ok(())
    }

    async fn process_lookup_matching(
        &self,
        data_file: &str,
        index: u32,
    ) -> ImportResult<LookupMatchingResponse> {
        let request = self
            .http_client
            .get(self.url(endpoints::PROCESS_LOOKUP_MATCHING))
            .query(&[("data-file", data_file.to_string()), ("index", index.to_string())]);
        self.send_json(endpoints::PROCESS_LOOKUP_MATCHING, request).await
    }

    async fn save_lookup_matches(
        &self,
        data_file: &str,
        source_field: &str,
        values_json: &str,
    ) -> ImportResult<SaveLookupMatchesResponse> {
        let request = self
            .http_client
            .post(self.url(endpoints::SAVE_LOOKUP_MATCHES_GROUP))
            .query(&[("data-file", data_file)])
            .form(&[("source-field", source_field), ("values", values_json)]);
        self.send_json(endpoints::SAVE_LOOKUP_MATCHES_GROUP, request).await
    }

    async fn preprocess(&self, data_file: &str, index: u32) -> ImportResult<PreprocessResponse> {
        let request = self
            .http_client
            .get(self.url(endpoints::PREPROCESS))
            .query(&[("data-file", data_file.to_string()), ("index", index.to_string())]);
        self.send_json(endpoints::PREPROCESS, request).await
    }

    async fn import_chunk(
        &self,
        data_file: &str,
        request_body: &ImportChunkRequest,
    ) -> ImportResult<ImportChunkResponse> {
        let request = self
            .http_client
            .post(self.url(endpoints::IMPORT_CHUNK))
            .query(&[("data-file", data_file)])
            .form(request_body);
        self.send_json(endpoints::IMPORT_CHUNK, request).await
    }

    fn error_file_url(&self, data_file: &str) -> String {
        format!(
            "{}?data-file={}",
            self.url(endpoints::GET_ERRORS_FILE),
            urlencoding::encode(data_file)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_and_urls() {
        let config = WarehouseConfig::new("https://warehouse.test/index.php/services/", "tok", "n1");
        let client = WarehouseClient::new(config).unwrap();
        assert_eq!(
            client.url(endpoints::PREPROCESS),
            "https://warehouse.test/index.php/services/import_2/preprocess"
        );
        assert_eq!(
            client.error_file_url("import 1.csv"),
            "https://warehouse.test/index.php/services/import_2/get_errors_file?data-file=import%201.csv"
        );
        assert_eq!(
            client.error_file_url("a&b=c/d.csv"),
            "https://warehouse.test/index.php/services/import_2/get_errors_file?data-file=a%26b%3Dc%2Fd.csv"
        );
    }

    #[test]
    fn test_authorization_header_value() {
        let config = WarehouseConfig::new("http://w", "abc123", "nonce9");
        assert_eq!(config.authorization(), "IndiciaTokens abc123|nonce9");
    }
}
