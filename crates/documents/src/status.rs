//! Document kinds, status values and the per-kind transition tables.
//!
//! Legal edges are plain data so they can be listed, tested and rendered
//! without reading through conditionals.

use serde::{Deserialize, Serialize};

use forgewms_core::DocumentPrefix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Receipt,
    Issue,
    Transfer,
    Count,
}

impl DocumentKind {
    pub fn prefix(self) -> DocumentPrefix {
        match self {
            DocumentKind::Receipt => DocumentPrefix::Gr,
            DocumentKind::Issue => DocumentPrefix::Gi,
            DocumentKind::Transfer => DocumentPrefix::Gt,
            DocumentKind::Count => DocumentPrefix::Ic,
        }
    }

    pub fn from_prefix(prefix: DocumentPrefix) -> Self {
        match prefix {
            DocumentPrefix::Gr => DocumentKind::Receipt,
            DocumentPrefix::Gi => DocumentKind::Issue,
            DocumentPrefix::Gt => DocumentKind::Transfer,
            DocumentPrefix::Ic => DocumentKind::Count,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Receipt => "Receipt",
            DocumentKind::Issue => "Issue",
            DocumentKind::Transfer => "Transfer",
            DocumentKind::Count => "Count",
        }
    }

    /// Status from which header and lines may still be edited in edit mode
    /// (besides Draft, which is always editable).
    pub fn initial_editable_status(self) -> DocumentStatus {
        match self {
            DocumentKind::Receipt | DocumentKind::Issue => DocumentStatus::New,
            DocumentKind::Transfer | DocumentKind::Count => DocumentStatus::Draft,
        }
    }

    /// Status in which line details are filled in (picking, receiving).
    pub fn fulfillment_status(self) -> Option<DocumentStatus> {
        match self {
            DocumentKind::Receipt => Some(DocumentStatus::Receiving),
            DocumentKind::Issue => Some(DocumentStatus::Picking),
            DocumentKind::Transfer | DocumentKind::Count => None,
        }
    }

    /// Status a document is submitted to when saved out of Draft.
    pub fn submitted_status(self) -> DocumentStatus {
        match self {
            DocumentKind::Transfer => DocumentStatus::Created,
            _ => DocumentStatus::New,
        }
    }

    /// Whether reaching `to` must move stock through the ledger.
    pub fn commits_stock(self, to: DocumentStatus) -> bool {
        matches!(
            (self, to),
            (DocumentKind::Receipt, DocumentStatus::Completed)
                | (DocumentKind::Issue, DocumentStatus::Completed)
        )
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status values across all kinds. Each kind uses the subset its table names;
/// `Exporting` only ever appears as a derived Transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    New,
    Created,
    Receiving,
    Picking,
    Exporting,
    Counting,
    Submitted,
    AdjustmentRequested,
    Completed,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "Draft",
            DocumentStatus::New => "New",
            DocumentStatus::Created => "Created",
            DocumentStatus::Receiving => "Receiving",
            DocumentStatus::Picking => "Picking",
            DocumentStatus::Exporting => "Exporting",
            DocumentStatus::Counting => "Counting",
            DocumentStatus::Submitted => "Submitted",
            DocumentStatus::AdjustmentRequested => "AdjustmentRequested",
            DocumentStatus::Completed => "Completed",
            DocumentStatus::Rejected => "Rejected",
            DocumentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Rejected | DocumentStatus::Cancelled
        )
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

use DocumentStatus::*;

const RECEIPT_TRANSITIONS: &[(DocumentStatus, DocumentStatus)] = &[
    (Draft, New),
    (New, Receiving),
    (Receiving, Submitted),
    (Submitted, Completed),
    (Submitted, Rejected),
    (Draft, Cancelled),
    (New, Cancelled),
    (Receiving, Cancelled),
    (Submitted, Cancelled),
];

const ISSUE_TRANSITIONS: &[(DocumentStatus, DocumentStatus)] = &[
    (Draft, New),
    (New, Picking),
    (Picking, Submitted),
    (Picking, AdjustmentRequested),
    (Submitted, Completed),
    (AdjustmentRequested, Completed),
    (Draft, Cancelled),
    (New, Cancelled),
    (Picking, Cancelled),
    (Submitted, Cancelled),
    (AdjustmentRequested, Cancelled),
];

const COUNT_TRANSITIONS: &[(DocumentStatus, DocumentStatus)] = &[
    (Draft, New),
    (New, Counting),
    (Counting, Submitted),
    (Submitted, Completed),
    (Draft, Cancelled),
    (New, Cancelled),
    (Counting, Cancelled),
    (Submitted, Cancelled),
];

// Stored Transfer statuses only; Exporting/Receiving are derived from the
// linked documents.
const TRANSFER_TRANSITIONS: &[(DocumentStatus, DocumentStatus)] = &[
    (Draft, Created),
    (Created, Completed),
    (Draft, Cancelled),
    (Created, Cancelled),
];

/// The legal `(from, to)` edges for a kind.
pub fn transition_table(kind: DocumentKind) -> &'static [(DocumentStatus, DocumentStatus)] {
    match kind {
        DocumentKind::Receipt => RECEIPT_TRANSITIONS,
        DocumentKind::Issue => ISSUE_TRANSITIONS,
        DocumentKind::Transfer => TRANSFER_TRANSITIONS,
        DocumentKind::Count => COUNT_TRANSITIONS,
    }
}

pub fn is_allowed(kind: DocumentKind, from: DocumentStatus, to: DocumentStatus) -> bool {
    transition_table(kind).contains(&(from, to))
}

/// Statuses reachable in one step from `from`.
pub fn next_statuses(kind: DocumentKind, from: DocumentStatus) -> Vec<DocumentStatus> {
    transition_table(kind)
        .iter()
        .filter(|(f, _)| *f == from)
        .map(|(_, t)| *t)
        .collect()
}

/// Every status that appears in a kind's table.
pub fn statuses(kind: DocumentKind) -> Vec<DocumentStatus> {
    let mut out = Vec::new();
    for (from, to) in transition_table(kind) {
        for s in [*from, *to] {
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    out
}
