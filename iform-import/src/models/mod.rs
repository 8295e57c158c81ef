//! Data models for iform-import
//!
//! - Import session and its stage state machine
//! - Column mapping and field tokens
//! - Lookup match sets
//! - Warehouse request/response contracts

pub mod column_mapping;
pub mod import_session;
pub mod import_summary;
pub mod lookup_match;
pub mod warehouse;

pub use column_mapping::{AvailableField, ColumnMapping, FieldToken};
pub use import_session::{ImportPhase, ImportSession, ImportStage, StateTransition};
pub use import_summary::{FailureKind, ImportSummary, StageFailure};
pub use lookup_match::{LookupMatchSet, LookupType, MatchSetState, UnmatchedInfo};
pub use warehouse::{
    ChunkStatus, ExtractResponse, ImportChunkRequest, ImportChunkResponse, LoadChunkResponse,
    LookupMatchingResponse, PreprocessResponse, SaveLookupMatchesResponse, SaveStatus,
    SendFileResponse, UploadResponse, FIND_LOOKUP_FIELDS_DONE,
};
