//! Warehouse documents: Receipt, Issue, Transfer and Count.
//!
//! The [`Document`] aggregate owns header, lines, status and history for all
//! four kinds. Per-kind transition tables live in [`status`]; transfer status
//! derivation, count planning and master-data guards are pure functions next
//! to it. Nothing here talks to storage.

pub mod count;
pub mod document;
pub mod guard;
pub mod header;
pub mod history;
pub mod line;
pub mod masterdata;
pub mod movement;
pub mod status;
pub mod submit;
pub mod transfer;

pub use count::{CountSelector, generate_plan, snapshot};
pub use document::{
    CountLinesReplaced, CountRecorded, CreateDocument, Document, DocumentCommand, DocumentCreated,
    DocumentEvent, DocumentLinked, DocumentLinks, DocumentSaved, EditMode, LineDetailsUpdated,
    LinkDocument, LinkRole, RecordCount, ReplaceCountLines, SaveDocument, StatusChanged,
    SystemQtySnapshotted, TransitionDocument, UpdateLineDetails,
};
pub use guard::{ActionOutcome, Decision, GuardReport, GuardedAction};
pub use header::{
    CountScope, Counterpart, DocumentHeader, IssueMode, IssueType, KindDetail, ReceiptType,
};
pub use history::{StatusHistory, StatusHistoryEvent};
pub use line::{CountLine, Line, LineDraft, SystemQtySnapshot};
pub use masterdata::{DependencyUsage, MasterRecord, deactivation_blocker};
pub use movement::{commit_request, stock_movements};
pub use status::{DocumentKind, DocumentStatus};
pub use submit::availability_violations;
pub use transfer::{cascades_cancel, derived_status, ensure_cancellable, transfer_issue_mode};
