//! Transfer automation.
//!
//! A transfer never moves stock itself. Once Created it spawns an Issue at
//! the source warehouse; when that Issue completes a Receipt is spawned at
//! the destination with what was actually picked; when the Receipt
//! completes the transfer is Completed. What the transfer shows in between
//! is derived from its children.
//!
//! Each step runs after the triggering change is stored and skips whatever
//! already exists, so repeating the triggering transition finishes a step
//! that failed halfway.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgewms_core::DocumentNo;
use forgewms_documents::{
    Counterpart, Document, DocumentCommand, DocumentHeader, DocumentKind, DocumentLinks,
    DocumentStatus, EditMode, IssueType, KindDetail, Line, LineDraft, LinkRole, ReceiptType,
    UpdateLineDetails, derived_status, transfer_issue_mode,
};
use forgewms_events::{EventBus, EventEnvelope};
use forgewms_stock::StockLedger;

use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::service::DocumentService;

/// A transfer with its children resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferView {
    pub transfer: Document,
    pub issue: Option<Document>,
    pub receipt: Option<Document>,
    /// Status shown for the transfer.
    pub derived: DocumentStatus,
}

impl<S, B, L> DocumentService<S, B, L>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: StockLedger,
{
    pub fn transfer_view(&self, doc_no: &DocumentNo) -> Result<TransferView, ServiceError> {
        let transfer = self.load(doc_no)?;
        if transfer.kind() != DocumentKind::Transfer {
            return Err(ServiceError::Rejected(format!(
                "{doc_no} is a {} document, not a transfer",
                transfer.kind()
            )));
        }
        let issue = self.linked(&transfer, LinkRole::LinkedIssue)?;
        let receipt = self.linked(&transfer, LinkRole::LinkedReceipt)?;
        let derived = derived_status(
            transfer.status(),
            issue.as_ref().map(Document::status),
            receipt.as_ref().map(Document::status),
        );
        Ok(TransferView {
            transfer,
            issue,
            receipt,
            derived,
        })
    }

    pub fn derived_status(&self, doc_no: &DocumentNo) -> Result<DocumentStatus, ServiceError> {
        Ok(self.transfer_view(doc_no)?.derived)
    }

    /// Bring the documents that depend on `doc` up to date with its stored
    /// status. Every step checks what already exists, so running it again
    /// after a partial failure picks up where it stopped.
    pub(crate) fn run_automation(&self, doc: &Document) -> Result<(), ServiceError> {
        match (doc.kind(), doc.status()) {
            (DocumentKind::Transfer, DocumentStatus::Created) => self.spawn_transfer_issue(doc),
            (DocumentKind::Issue, DocumentStatus::Completed) => {
                match &doc.links().source_transfer_no {
                    Some(transfer_no) => self.spawn_transfer_receipt(doc, transfer_no),
                    None => Ok(()),
                }
            }
            (DocumentKind::Receipt, DocumentStatus::Completed) => {
                match &doc.links().source_transfer_no {
                    Some(transfer_no) => self.complete_transfer(doc, transfer_no),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    fn transfer_of(
        &self,
        child: &Document,
        transfer_no: &DocumentNo,
    ) -> Result<Document, ServiceError> {
        self.find(transfer_no)?.ok_or_else(|| {
            tracing::error!(
                doc_no = %child.doc_no(),
                transfer = %transfer_no,
                "source transfer is missing"
            );
            ServiceError::Inconsistency(format!(
                "{} references transfer {transfer_no}, which does not exist",
                child.doc_no()
            ))
        })
    }

    /// The number is reserved and linked before the issue is created, so a
    /// retry never creates a second one.
    fn spawn_transfer_issue(&self, transfer: &Document) -> Result<(), ServiceError> {
        let to_wh = destination(transfer)?;
        let header = DocumentHeader {
            warehouse_code: transfer.header().warehouse_code.clone(),
            counterpart: Some(Counterpart::Warehouse(to_wh)),
            document_date: transfer.header().document_date,
            expected_date: transfer.header().expected_date,
            reference_no: Some(transfer.doc_no().to_string()),
            note: None,
            detail: KindDetail::Issue {
                issue_type: IssueType::Transfer,
                mode: transfer_issue_mode(transfer.lines()),
            },
        };

        let issue_no = match &transfer.links().linked_gi_no {
            Some(no) => no.clone(),
            None => {
                let no = self.next_number(&header)?;
                self.link(transfer.doc_no(), LinkRole::LinkedIssue, &no)?;
                no
            }
        };

        let actor = self.system_actor();
        let issue = match self.find(&issue_no)? {
            Some(issue) => issue,
            None => {
                let lines = transfer
                    .lines()
                    .iter()
                    .map(|l| LineDraft {
                        line_no: None,
                        model_code: l.model_code.clone(),
                        tracking_type: l.tracking_type,
                        qty_planned: l.qty_planned,
                        location_code: l.location_code.clone(),
                    })
                    .collect();
                let links = DocumentLinks {
                    source_transfer_no: Some(transfer.doc_no().clone()),
                    ..DocumentLinks::default()
                };
                let issue = self.create_numbered(issue_no.clone(), header, lines, links, &actor, None)?;
                tracing::info!(
                    transfer = %transfer.doc_no(),
                    issue = %issue_no,
                    "transfer issue created"
                );
                issue
            }
        };

        if issue.status() == DocumentStatus::Draft {
            self.transition(&issue_no, DocumentStatus::New, &actor, None)?;
        }
        Ok(())
    }

    fn spawn_transfer_receipt(
        &self,
        issue: &Document,
        transfer_no: &DocumentNo,
    ) -> Result<(), ServiceError> {
        let transfer = self.transfer_of(issue, transfer_no)?;
        let to_wh = destination(&transfer)?;
        let staging = self.settings().automation.receiving_location.clone();
        let actor = self.system_actor();

        let header = DocumentHeader {
            warehouse_code: to_wh,
            counterpart: Some(Counterpart::Warehouse(issue.header().warehouse_code.clone())),
            document_date: Utc::now().date_naive(),
            expected_date: None,
            reference_no: Some(transfer_no.to_string()),
            note: None,
            detail: KindDetail::Receipt {
                receipt_type: ReceiptType::Transfer,
            },
        };
        let picked: Vec<_> = issue
            .lines()
            .iter()
            .filter(|l| l.fulfilled_qty() > 0)
            .collect();

        let receipt_no = match &transfer.links().linked_gr_no {
            Some(no) => no.clone(),
            None => {
                let no = self.next_number(&header)?;
                self.link(transfer_no, LinkRole::LinkedReceipt, &no)?;
                no
            }
        };

        let receipt = match self.find(&receipt_no)? {
            Some(receipt) => receipt,
            None => {
                let lines = picked
                    .iter()
                    .map(|l| LineDraft {
                        line_no: None,
                        model_code: l.model_code.clone(),
                        tracking_type: l.tracking_type,
                        qty_planned: l.fulfilled_qty(),
                        location_code: Some(staging.clone()),
                    })
                    .collect();
                let links = DocumentLinks {
                    source_transfer_no: Some(transfer_no.clone()),
                    ..DocumentLinks::default()
                };
                let receipt =
                    self.create_numbered(receipt_no.clone(), header, lines, links, &actor, None)?;
                tracing::info!(
                    transfer = %transfer_no,
                    issue = %issue.doc_no(),
                    receipt = %receipt_no,
                    "transfer receipt created"
                );
                receipt
            }
        };

        if receipt.status() == DocumentStatus::Draft {
            if receipt.lines().iter().all(|l| l.fulfilled_qty() == 0) {
                self.stage_picked(&receipt, &picked, &staging)?;
            }
            self.transition(&receipt_no, DocumentStatus::New, &actor, None)?;
        }
        if issue.links().linked_gr_no.is_none() {
            self.link(issue.doc_no(), LinkRole::LinkedReceipt, &receipt_no)?;
        }
        Ok(())
    }

    /// Carry the picked lots/serials over, staged at the receiving location.
    fn stage_picked(
        &self,
        receipt: &Document,
        picked: &[&Line],
        staging: &str,
    ) -> Result<(), ServiceError> {
        let loaded = self.load_existing(receipt.doc_no())?;
        let commands = receipt
            .lines()
            .iter()
            .zip(picked.iter())
            .map(|(line, source)| {
                DocumentCommand::UpdateLineDetails(UpdateLineDetails {
                    doc_no: receipt.doc_no().clone(),
                    line_no: line.line_no,
                    location_code: Some(staging.to_string()),
                    details: source.details.relocated(staging),
                    mode: EditMode::Create,
                    occurred_at: Utc::now(),
                })
            })
            .collect();
        let events = Self::decide_all(&loaded.aggregate, commands)?;
        self.persist(loaded, events, None)?;
        Ok(())
    }

    fn complete_transfer(
        &self,
        receipt: &Document,
        transfer_no: &DocumentNo,
    ) -> Result<(), ServiceError> {
        let transfer = self.transfer_of(receipt, transfer_no)?;
        if transfer.status() != DocumentStatus::Created {
            return Ok(());
        }
        let loaded = self.load_existing(transfer_no)?;
        self.apply_transition(loaded, DocumentStatus::Completed, &self.system_actor(), None)?;
        Ok(())
    }
}

fn destination(transfer: &Document) -> Result<String, ServiceError> {
    match &transfer.header().detail {
        KindDetail::Transfer { to_warehouse_code } => Ok(to_warehouse_code.clone()),
        _ => Err(ServiceError::Inconsistency(format!(
            "{} is not a transfer",
            transfer.doc_no()
        ))),
    }
}
