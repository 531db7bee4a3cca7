//! Core domain types for diagpull.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod ids;
mod version;

pub use diagnostic::{Diagnostic, DiagnosticSeverity, Position, Range};
pub use ids::{DocumentId, ProjectId, ProjectOrDocumentId, ResultId};
pub use version::VersionStamp;

/// Category used when a request does not name one.
pub const DEFAULT_CATEGORY: &str = "lint";
