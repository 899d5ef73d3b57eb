//! Two-phase guarded actions.
//!
//! `dry_run` describes what an action would do and whether it is allowed;
//! `confirm` performs it only when the caller decides to proceed.

use serde::{Deserialize, Serialize};

use forgewms_core::{ActorId, DocumentNo, DomainError};

use crate::count::CountSelector;
use crate::header::CountScope;
use crate::masterdata::MasterRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GuardedAction {
    CancelDocument {
        doc_no: DocumentNo,
        actor: ActorId,
    },
    RejectReceipt {
        doc_no: DocumentNo,
        actor: ActorId,
        reason: String,
    },
    RegenerateCountPlan {
        doc_no: DocumentNo,
        scope: CountScope,
        selector: CountSelector,
    },
    DeactivateMasterRecord {
        record: MasterRecord,
    },
}

/// Consequence description returned by a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardReport {
    pub action: GuardedAction,
    /// `Some` when the action cannot be performed at all.
    pub blocked_reason: Option<String>,
    pub consequences: Vec<String>,
    /// The action discards or cascades and should not run without a
    /// deliberate `Decision::Proceed`.
    pub requires_confirmation: bool,
}

impl GuardReport {
    pub fn allowed(action: GuardedAction, consequences: Vec<String>, requires_confirmation: bool) -> Self {
        Self {
            action,
            blocked_reason: None,
            consequences,
            requires_confirmation,
        }
    }

    pub fn blocked(action: GuardedAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            blocked_reason: Some(reason.into()),
            consequences: Vec::new(),
            requires_confirmation: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.blocked_reason.is_none()
    }

    /// The guard violation a blocked report stands for.
    pub fn ensure_allowed(&self) -> Result<(), DomainError> {
        match &self.blocked_reason {
            Some(reason) => Err(DomainError::guard(reason.clone())),
            None => Ok(()),
        }
    }
}

/// The caller's answer to a guard report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Proceed,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// The mutation happened; lists every document it touched.
    Performed { touched: Vec<DocumentNo> },
    /// The caller declined; nothing changed.
    Declined,
}

impl ActionOutcome {
    pub fn is_declined(&self) -> bool {
        matches!(self, ActionOutcome::Declined)
    }
}
