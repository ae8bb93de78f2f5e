//! Language-server glue for the live panel.
//!
//! [`StatusHub`] turns server status and diagnostics pushed by the process
//! owner into `bridge_events` events and demand-driven resources.

pub mod types;

pub(crate) mod diagnostics;

mod hub;

pub use hub::{RefreshFut, RefreshOutcome, ServerMap, StatusHub};
pub use types::{
    Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, HubConfig, ServerConfig, ServerEvent,
    ServerState, ServerStatus,
};
