//! Stock parameter state, its audit trail, and the service composing them.

pub mod audit;
pub mod service;
pub mod store;

pub use audit::AuditTrail;
pub use service::{LookupResults, ParameterService};
pub use store::{ParameterStore, DEFAULT_SCAN_BATCH};

/// List key holding the audit trail unless configured otherwise.
pub const DEFAULT_AUDIT_KEY: &str = "parameter_updates";
