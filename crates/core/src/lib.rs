//! Exhibit Viewer Core Library
//!
//! Annotation model and undo history, debounced batching of store writes,
//! exhibit navigation, Bates numbering, and annotation export/import.

pub mod annotation;
pub mod annotation_store;
pub mod batch;
pub mod bates;
pub mod export;
pub mod navigation;
pub mod store;

pub use annotation::{
    Annotation, AnnotationError, AnnotationId, AnnotationKind, AnnotationPatch, AnnotationResult,
    AnnotationStyle, Color, Point,
};
pub use annotation_store::{AnnotationState, AnnotationStore, HistoryAction, HistoryEntry};
pub use batch::{
    BatchConfig, BatchError, BatchManager, BatchPriority, BatchResult, BatchTransaction,
    TransactionId, TransactionOptions, TransactionStatus,
};
pub use bates::{BatesConfig, BatesManager};
pub use export::{
    AnnotationExport, ExportImportManager, ExportSummary, ImportValidationError, EXPORT_VERSION,
};
pub use navigation::NavigationManager;
pub use store::{SetError, Settable, Subscription, Writable};
