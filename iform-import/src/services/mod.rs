//! Service modules for the import workflow
//!
//! - Warehouse client (one method per import endpoint)
//! - Required-fields checker
//! - Import orchestrator and its stage transition function

pub mod required_fields;
pub mod warehouse_client;
pub mod workflow_orchestrator;

pub use required_fields::{check_required_fields, RequiredFieldsReport, Satisfaction};
pub use warehouse_client::{WarehouseApi, WarehouseClient};
pub use workflow_orchestrator::{
    next_step, ConflictResolution, ImportOptions, ImportOrchestrator, Outcome, Pause,
    StageResponse, Step,
};
