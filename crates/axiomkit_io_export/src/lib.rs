//! `axiomkit_io_export` v1:
//! Parallel XLSX export orchestration.
//!
//! Modules:
//! - `export`  : paged/streaming orchestration and download resolution
//! - `tracker` : job completion protocol
//! - `store`   : keyed progress store seam
//! - `source`  : page/cursor data source seams
//! - `spec`    : options/progress/errors
//! - `report`  : export report model
//! - `conf`    : constants and naming helpers

pub mod conf;
pub mod export;
pub mod report;
pub mod source;
pub mod spec;
pub mod store;
pub mod tracker;

pub use export::{SpecExportTicket, XlsxExporter, calculate_page_count};
pub use report::{ReportExport, ReportExportBuilder};
pub use source::{
    BatchHook, CursorScope, CursorSource, EnumScopeEnd, MemorySource, PageSource, SpecPage,
    SpecPageRequest,
};
pub use spec::{
    EnumJobStatus, EnumPageCount, EnumPartitionOutcome, ExportError, SourceError,
    SpecExportOptions, SpecExportRequest, SpecPartitionFailure, SpecPartitionProgress, StoreError,
};
pub use store::{InMemoryProgressStore, ProgressStore};
pub use tracker::CompletionTracker;
