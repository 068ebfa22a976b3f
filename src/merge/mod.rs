//! Workbook merge module: combine the sheets of many workbooks into one.
//!
//! This module provides:
//! - Folder scanning for mergeable workbooks
//! - An in-memory workbook model with per-feature validation
//! - Collision-free naming for sheets and tables
//! - Best-effort sheet copying (values, styles, merges, validations,
//!   conditional formats, tables)
//! - An optional index sheet linking to every copied sheet
//! - A merge orchestrator with log and progress channels
//! - `.xlsx` persistence

pub mod coords;
pub mod copier;
pub mod error;
pub mod index;
pub mod model;
pub mod naming;
pub mod orchestrator;
pub mod scanner;
pub mod settings;
pub mod store;
pub mod styles;
pub mod types;
pub mod xlsx;

// Re-export commonly used types and functions
pub use copier::{SheetCopyEngine, SheetCopyReport};
pub use error::MergeError;
pub use index::IndexBuilder;
pub use model::{SourceDocument, SourceSheet, TargetDocument, TargetSheet, Worksheet};
pub use naming::NameAllocator;
pub use orchestrator::{join_merge, spawn_merge, MergeEvents, MergeHandle, MergeOrchestrator, MergeOutcome};
pub use scanner::FolderScanner;
pub use settings::MergeSettings;
pub use store::{compute_checksum, WorkbookStore};
pub use types::*;
pub use xlsx::XlsxStore;
