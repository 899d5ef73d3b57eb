use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgewms_core::{ActorId, Aggregate, AggregateRoot, DocumentNo, DomainError};
use forgewms_events::Event;
use forgewms_stock::{AllocationEngine, LineDetails};

use crate::header::{CountScope, DocumentHeader, IssueMode, IssueType, KindDetail, ReceiptType};
use crate::history::{StatusHistory, StatusHistoryEvent};
use crate::line::{CountLine, Line, LineDraft, SystemQtySnapshot};
use crate::status::{self, DocumentKind, DocumentStatus};

/// How the caller opened the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditMode {
    Create,
    Edit,
    View,
}

/// String-keyed cross references between documents, resolved through a
/// store lookup at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLinks {
    /// Transfer that spawned this Issue/Receipt.
    pub source_transfer_no: Option<DocumentNo>,
    pub linked_gi_no: Option<DocumentNo>,
    pub linked_gr_no: Option<DocumentNo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    SourceTransfer,
    LinkedIssue,
    LinkedReceipt,
}

/// Aggregate root: a warehouse document (Receipt, Issue, Transfer or Count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    doc_no: DocumentNo,
    kind: DocumentKind,
    header: DocumentHeader,
    status: DocumentStatus,
    lines: Vec<Line>,
    count_lines: Vec<CountLine>,
    links: DocumentLinks,
    history: StatusHistory,
    version: u64,
    created: bool,
}

impl Document {
    /// Create an empty, not-yet-created document for `doc_no`; the kind
    /// follows the number's prefix.
    pub fn empty(doc_no: DocumentNo) -> Self {
        let kind = DocumentKind::from_prefix(doc_no.prefix());
        Self {
            doc_no,
            kind,
            header: placeholder_header(kind),
            status: DocumentStatus::Draft,
            lines: Vec::new(),
            count_lines: Vec::new(),
            links: DocumentLinks::default(),
            history: StatusHistory::new(),
            version: 0,
            created: false,
        }
    }

    pub fn doc_no(&self) -> &DocumentNo {
        &self.doc_no
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&Line> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn count_lines(&self) -> &[CountLine] {
        &self.count_lines
    }

    pub fn links(&self) -> &DocumentLinks {
        &self.links
    }

    pub fn history(&self) -> &StatusHistory {
        &self.history
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Lines of whichever shape this kind carries.
    pub fn line_count(&self) -> usize {
        match self.kind {
            DocumentKind::Count => self.count_lines.len(),
            _ => self.lines.len(),
        }
    }

    /// Header and lines may be changed: always in Draft, and in the kind's
    /// initial editable status when opened in edit mode.
    pub fn is_editable(&self, mode: EditMode) -> bool {
        self.status == DocumentStatus::Draft
            || (mode == EditMode::Edit && self.status == self.kind.initial_editable_status())
    }

    /// Line details may be entered: while editable, or during picking/receiving.
    pub fn details_open(&self, mode: EditMode) -> bool {
        mode != EditMode::View
            && (self.is_editable(mode) || self.kind.fulfillment_status() == Some(self.status))
    }
}

fn placeholder_header(kind: DocumentKind) -> DocumentHeader {
    let detail = match kind {
        DocumentKind::Receipt => KindDetail::Receipt {
            receipt_type: ReceiptType::Other,
        },
        DocumentKind::Issue => KindDetail::Issue {
            issue_type: IssueType::Internal,
            mode: IssueMode::Summary,
        },
        DocumentKind::Transfer => KindDetail::Transfer {
            to_warehouse_code: String::new(),
        },
        DocumentKind::Count => KindDetail::Count {
            scope: CountScope::Full,
        },
    };
    DocumentHeader {
        warehouse_code: String::new(),
        counterpart: None,
        document_date: NaiveDate::MIN,
        expected_date: None,
        reference_no: None,
        note: None,
        detail,
    }
}

impl AggregateRoot for Document {
    type Id = DocumentNo;

    fn id(&self) -> &Self::Id {
        &self.doc_no
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateDocument (starts in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDocument {
    pub doc_no: DocumentNo,
    pub header: DocumentHeader,
    pub lines: Vec<LineDraft>,
    pub links: DocumentLinks,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SaveDocument (replace header and lines while editable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDocument {
    pub doc_no: DocumentNo,
    pub header: DocumentHeader,
    pub lines: Vec<LineDraft>,
    pub mode: EditMode,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLineDetails (result of an allocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLineDetails {
    pub doc_no: DocumentNo,
    pub line_no: u32,
    pub location_code: Option<String>,
    pub details: LineDetails,
    pub mode: EditMode,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionDocument.
///
/// `snapshot` carries the ledger's on-hand per count line and is required
/// when a count leaves Draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDocument {
    pub doc_no: DocumentNo,
    pub target: DocumentStatus,
    pub actor: ActorId,
    pub note: Option<String>,
    pub snapshot: Vec<SystemQtySnapshot>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDocument {
    pub doc_no: DocumentNo,
    pub role: LinkRole,
    pub linked_no: DocumentNo,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReplaceCountLines (generated count plan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceCountLines {
    pub doc_no: DocumentNo,
    pub lines: Vec<CountLine>,
    pub mode: EditMode,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCount {
    pub doc_no: DocumentNo,
    pub line_no: u32,
    pub counted_qty: i64,
    pub recount: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    CreateDocument(CreateDocument),
    SaveDocument(SaveDocument),
    UpdateLineDetails(UpdateLineDetails),
    TransitionDocument(TransitionDocument),
    LinkDocument(LinkDocument),
    ReplaceCountLines(ReplaceCountLines),
    RecordCount(RecordCount),
}

/// Event: DocumentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCreated {
    pub doc_no: DocumentNo,
    pub kind: DocumentKind,
    pub header: DocumentHeader,
    pub lines: Vec<Line>,
    pub links: DocumentLinks,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentSaved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSaved {
    pub doc_no: DocumentNo,
    pub header: DocumentHeader,
    pub lines: Vec<Line>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineDetailsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDetailsUpdated {
    pub doc_no: DocumentNo,
    pub line_no: u32,
    pub location_code: Option<String>,
    pub details: LineDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged. `occurred_at` is already ordered after the
/// previous history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub doc_no: DocumentNo,
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub actor: ActorId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SystemQtySnapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemQtySnapshotted {
    pub doc_no: DocumentNo,
    pub snapshot: Vec<SystemQtySnapshot>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentLinked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLinked {
    pub doc_no: DocumentNo,
    pub role: LinkRole,
    pub linked_no: DocumentNo,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountLinesReplaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLinesReplaced {
    pub doc_no: DocumentNo,
    pub lines: Vec<CountLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CountRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecorded {
    pub doc_no: DocumentNo,
    pub line_no: u32,
    pub counted_qty: i64,
    pub is_recounted: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    DocumentCreated(DocumentCreated),
    DocumentSaved(DocumentSaved),
    LineDetailsUpdated(LineDetailsUpdated),
    StatusChanged(StatusChanged),
    SystemQtySnapshotted(SystemQtySnapshotted),
    DocumentLinked(DocumentLinked),
    CountLinesReplaced(CountLinesReplaced),
    CountRecorded(CountRecorded),
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::DocumentCreated(_) => "warehouse.document.created",
            DocumentEvent::DocumentSaved(_) => "warehouse.document.lines_saved",
            DocumentEvent::LineDetailsUpdated(_) => "warehouse.document.line_details_updated",
            DocumentEvent::StatusChanged(_) => "warehouse.document.status_changed",
            DocumentEvent::SystemQtySnapshotted(_) => "warehouse.document.system_qty_snapshotted",
            DocumentEvent::DocumentLinked(_) => "warehouse.document.linked",
            DocumentEvent::CountLinesReplaced(_) => "warehouse.document.count_lines_replaced",
            DocumentEvent::CountRecorded(_) => "warehouse.document.count_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::DocumentCreated(e) => e.occurred_at,
            DocumentEvent::DocumentSaved(e) => e.occurred_at,
            DocumentEvent::LineDetailsUpdated(e) => e.occurred_at,
            DocumentEvent::StatusChanged(e) => e.occurred_at,
            DocumentEvent::SystemQtySnapshotted(e) => e.occurred_at,
            DocumentEvent::DocumentLinked(e) => e.occurred_at,
            DocumentEvent::CountLinesReplaced(e) => e.occurred_at,
            DocumentEvent::CountRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Document {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::DocumentCreated(e) => {
                self.doc_no = e.doc_no.clone();
                self.kind = e.kind;
                self.header = e.header.clone();
                self.status = DocumentStatus::Draft;
                self.lines = e.lines.clone();
                self.count_lines.clear();
                self.links = e.links.clone();
                self.history.append(StatusHistoryEvent {
                    status: DocumentStatus::Draft,
                    actor: e.actor.clone(),
                    at: e.occurred_at,
                    note: None,
                });
                self.created = true;
            }
            DocumentEvent::DocumentSaved(e) => {
                self.header = e.header.clone();
                self.lines = e.lines.clone();
            }
            DocumentEvent::LineDetailsUpdated(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.location_code = e.location_code.clone();
                    line.details = e.details.clone();
                }
            }
            DocumentEvent::StatusChanged(e) => {
                self.status = e.to;
                self.history.append(StatusHistoryEvent {
                    status: e.to,
                    actor: e.actor.clone(),
                    at: e.occurred_at,
                    note: e.note.clone(),
                });
            }
            DocumentEvent::SystemQtySnapshotted(e) => {
                for snap in &e.snapshot {
                    if let Some(line) = self
                        .count_lines
                        .iter_mut()
                        .find(|l| l.line_no == snap.line_no)
                    {
                        line.system_qty = snap.system_qty;
                        line.snapshot_at = Some(e.occurred_at);
                    }
                }
            }
            DocumentEvent::DocumentLinked(e) => {
                let slot = match e.role {
                    LinkRole::SourceTransfer => &mut self.links.source_transfer_no,
                    LinkRole::LinkedIssue => &mut self.links.linked_gi_no,
                    LinkRole::LinkedReceipt => &mut self.links.linked_gr_no,
                };
                *slot = Some(e.linked_no.clone());
            }
            DocumentEvent::CountLinesReplaced(e) => {
                self.count_lines = e.lines.clone();
            }
            DocumentEvent::CountRecorded(e) => {
                if let Some(line) = self.count_lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.counted_qty = Some(e.counted_qty);
                    line.is_recounted = e.is_recounted;
                }
            }
        }

        // +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DocumentCommand::CreateDocument(cmd) => self.handle_create(cmd),
            DocumentCommand::SaveDocument(cmd) => self.handle_save(cmd),
            DocumentCommand::UpdateLineDetails(cmd) => self.handle_update_details(cmd),
            DocumentCommand::TransitionDocument(cmd) => self.handle_transition(cmd),
            DocumentCommand::LinkDocument(cmd) => self.handle_link(cmd),
            DocumentCommand::ReplaceCountLines(cmd) => self.handle_replace_count_lines(cmd),
            DocumentCommand::RecordCount(cmd) => self.handle_record_count(cmd),
        }
    }
}

impl Document {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_doc_no(&self, doc_no: &DocumentNo) -> Result<(), DomainError> {
        if &self.doc_no != doc_no {
            return Err(DomainError::invariant("doc_no mismatch"));
        }
        Ok(())
    }

    fn ensure_header_kind(&self, header: &DocumentHeader) -> Result<(), DomainError> {
        if header.kind() != self.kind {
            return Err(DomainError::validation(format!(
                "{} header does not fit a {} document",
                header.kind(),
                self.kind
            )));
        }
        Ok(())
    }

    fn ensure_editable(&self, mode: EditMode) -> Result<(), DomainError> {
        if !self.is_editable(mode) {
            return Err(DomainError::invariant(format!(
                "{} is read-only in status {}",
                self.doc_no, self.status
            )));
        }
        Ok(())
    }

    fn ensure_kind(&self, kind: DocumentKind) -> Result<(), DomainError> {
        if self.kind != kind {
            return Err(DomainError::invariant(format!(
                "{} is a {} document, not {}",
                self.doc_no, self.kind, kind
            )));
        }
        Ok(())
    }

    /// Merge line drafts into the current lines.
    ///
    /// Kept lines retain their details unless their location changed; new
    /// lines get the next free number and empty details.
    fn merge_lines(&self, drafts: &[LineDraft]) -> Result<Vec<Line>, DomainError> {
        if self.kind == DocumentKind::Count && !drafts.is_empty() {
            return Err(DomainError::validation(
                "count lines come from a count plan, not from line input",
            ));
        }

        let mut next_no = drafts
            .iter()
            .filter_map(|d| d.line_no)
            .chain(self.lines.iter().map(|l| l.line_no))
            .max()
            .unwrap_or(0);

        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let line = match draft.line_no {
                Some(line_no) => {
                    let existing = self.line(line_no).ok_or_else(|| {
                        DomainError::validation(format!("line {line_no} does not exist"))
                    })?;
                    if existing.tracking_type != draft.tracking_type {
                        return Err(DomainError::validation(format!(
                            "line {line_no}: tracking type is fixed at {}",
                            existing.tracking_type
                        )));
                    }
                    if existing.model_code != draft.model_code {
                        return Err(DomainError::validation(format!(
                            "line {line_no}: model cannot change, add a new line instead"
                        )));
                    }
                    let details = match draft.location_code.as_deref() {
                        Some(to) => AllocationEngine::change_location(
                            &existing.details,
                            existing.location_code.as_deref(),
                            to,
                        ),
                        None if existing.location_code.is_none() => existing.details.clone(),
                        None => LineDetails::empty(existing.tracking_type),
                    };
                    Line {
                        line_no,
                        model_code: existing.model_code.clone(),
                        tracking_type: existing.tracking_type,
                        qty_planned: draft.qty_planned,
                        location_code: draft.location_code.clone(),
                        details,
                    }
                }
                None => {
                    next_no += 1;
                    Line {
                        line_no: next_no,
                        model_code: draft.model_code.clone(),
                        tracking_type: draft.tracking_type,
                        qty_planned: draft.qty_planned,
                        location_code: draft.location_code.clone(),
                        details: LineDetails::empty(draft.tracking_type),
                    }
                }
            };
            if out.iter().any(|l: &Line| l.line_no == line.line_no) {
                return Err(DomainError::validation(format!(
                    "line {} appears twice",
                    line.line_no
                )));
            }
            out.push(line);
        }
        Ok(out)
    }

    fn handle_create(&self, cmd: &CreateDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!("{} already exists", cmd.doc_no)));
        }
        self.ensure_doc_no(&cmd.doc_no)?;
        self.ensure_header_kind(&cmd.header)?;

        let lines = self.merge_lines(&cmd.lines)?;

        Ok(vec![DocumentEvent::DocumentCreated(DocumentCreated {
            doc_no: cmd.doc_no.clone(),
            kind: self.kind,
            header: cmd.header.clone(),
            lines,
            links: cmd.links.clone(),
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_save(&self, cmd: &SaveDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;
        self.ensure_header_kind(&cmd.header)?;
        self.ensure_editable(cmd.mode)?;

        let lines = self.merge_lines(&cmd.lines)?;

        Ok(vec![DocumentEvent::DocumentSaved(DocumentSaved {
            doc_no: cmd.doc_no.clone(),
            header: cmd.header.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_details(
        &self,
        cmd: &UpdateLineDetails,
    ) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;

        if !self.details_open(cmd.mode) {
            return Err(DomainError::invariant(format!(
                "{}: line details cannot change in status {}",
                self.doc_no, self.status
            )));
        }

        let line = self.line(cmd.line_no).ok_or_else(|| {
            DomainError::validation(format!("line {} does not exist", cmd.line_no))
        })?;
        if cmd.details.tracking_type() != line.tracking_type {
            return Err(DomainError::validation(format!(
                "line {}: details must follow tracking type {}",
                cmd.line_no, line.tracking_type
            )));
        }

        Ok(vec![DocumentEvent::LineDetailsUpdated(LineDetailsUpdated {
            doc_no: cmd.doc_no.clone(),
            line_no: cmd.line_no,
            location_code: cmd.location_code.clone(),
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionDocument,
    ) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;

        let from = self.status;
        let to = cmd.target;

        // Re-sent transition by the same actor: nothing to do.
        if from == to && self.history.is_repeat(to, &cmd.actor) {
            return Ok(vec![]);
        }

        if to == DocumentStatus::Cancelled && from.is_terminal() {
            return Err(DomainError::guard(format!(
                "{} is {} and can no longer be cancelled",
                self.doc_no, from
            )));
        }

        if !status::is_allowed(self.kind, from, to) {
            return Err(DomainError::InvalidTransition {
                kind: self.kind.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if to == DocumentStatus::Rejected
            && cmd.note.as_deref().is_none_or(|n| n.trim().is_empty())
        {
            return Err(DomainError::guard("rejecting a receipt requires a reason"));
        }

        if self.submits(to) {
            self.ensure_submittable()?;
        }

        self.ensure_fulfilled_for(to)?;

        let occurred_at = self.history.next_timestamp(cmd.occurred_at);
        let mut events = vec![DocumentEvent::StatusChanged(StatusChanged {
            doc_no: cmd.doc_no.clone(),
            from,
            to,
            actor: cmd.actor.clone(),
            note: cmd.note.clone(),
            occurred_at,
        })];

        if self.kind == DocumentKind::Count
            && from == DocumentStatus::Draft
            && to != DocumentStatus::Cancelled
        {
            for line in &self.count_lines {
                if !cmd.snapshot.iter().any(|s| s.line_no == line.line_no) {
                    return Err(DomainError::invariant(format!(
                        "system quantity snapshot missing for count line {}",
                        line.line_no
                    )));
                }
            }
            events.push(DocumentEvent::SystemQtySnapshotted(SystemQtySnapshotted {
                doc_no: cmd.doc_no.clone(),
                snapshot: cmd.snapshot.clone(),
                occurred_at,
            }));
        }

        Ok(events)
    }

    /// Whether moving to `to` takes the document out of an editable status.
    /// Every such move is a submit and re-checks the submit preconditions.
    pub fn submits(&self, to: DocumentStatus) -> bool {
        let from = self.status;
        let editable = from == DocumentStatus::Draft || from == self.kind.initial_editable_status();
        editable && to != from && to != DocumentStatus::Cancelled
    }

    /// Hard preconditions for a submit: lines exist, header and lines
    /// carry their required fields.
    pub fn ensure_submittable(&self) -> Result<(), DomainError> {
        if self.line_count() == 0 {
            return Err(DomainError::validation(format!(
                "{} has no lines",
                self.doc_no
            )));
        }

        let mut violations = self.header.violations();
        for (idx, line) in self.lines.iter().enumerate() {
            violations.extend(line.violations(idx));
        }
        DomainError::from_violations(violations)
    }

    fn ensure_fulfilled_for(&self, to: DocumentStatus) -> Result<(), DomainError> {
        use forgewms_core::FieldViolation;

        match (self.kind, to) {
            (DocumentKind::Issue, DocumentStatus::Submitted) => {
                let short: Vec<FieldViolation> = self
                    .lines
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| l.fulfilled_qty() != l.qty_planned)
                    .map(|(idx, l)| {
                        FieldViolation::new(
                            format!("lines[{idx}].qty_picked"),
                            format!(
                                "picked {} of {}; request an adjustment instead",
                                l.fulfilled_qty(),
                                l.qty_planned
                            ),
                        )
                    })
                    .collect();
                DomainError::from_violations(short)
            }
            (DocumentKind::Receipt, DocumentStatus::Submitted)
            | (DocumentKind::Receipt, DocumentStatus::Completed)
            | (DocumentKind::Issue, DocumentStatus::Completed) => {
                if self.lines.iter().all(|l| l.fulfilled_qty() == 0) {
                    return Err(DomainError::validation(format!(
                        "{}: nothing has been {} yet",
                        self.doc_no,
                        if self.kind == DocumentKind::Receipt {
                            "received"
                        } else {
                            "picked"
                        }
                    )));
                }
                Ok(())
            }
            (DocumentKind::Count, DocumentStatus::Submitted) => {
                let missing: Vec<FieldViolation> = self
                    .count_lines
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| l.counted_qty.is_none())
                    .map(|(idx, _)| {
                        FieldViolation::new(
                            format!("count_lines[{idx}].counted_qty"),
                            "counted quantity is required",
                        )
                    })
                    .collect();
                DomainError::from_violations(missing)
            }
            _ => Ok(()),
        }
    }

    fn handle_link(&self, cmd: &LinkDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;

        let (slot, allowed) = match cmd.role {
            LinkRole::SourceTransfer => (
                &self.links.source_transfer_no,
                matches!(self.kind, DocumentKind::Issue | DocumentKind::Receipt),
            ),
            LinkRole::LinkedIssue => (&self.links.linked_gi_no, self.kind == DocumentKind::Transfer),
            LinkRole::LinkedReceipt => (
                &self.links.linked_gr_no,
                matches!(self.kind, DocumentKind::Transfer | DocumentKind::Issue),
            ),
        };
        if !allowed {
            return Err(DomainError::invariant(format!(
                "{} documents cannot hold a {:?} link",
                self.kind, cmd.role
            )));
        }

        match slot {
            Some(existing) if existing == &cmd.linked_no => Ok(vec![]),
            Some(existing) => Err(DomainError::conflict(format!(
                "{} is already linked to {existing}",
                self.doc_no
            ))),
            None => Ok(vec![DocumentEvent::DocumentLinked(DocumentLinked {
                doc_no: cmd.doc_no.clone(),
                role: cmd.role,
                linked_no: cmd.linked_no.clone(),
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_replace_count_lines(
        &self,
        cmd: &ReplaceCountLines,
    ) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;
        self.ensure_kind(DocumentKind::Count)?;
        self.ensure_editable(cmd.mode)?;

        let lines = cmd
            .lines
            .iter()
            .enumerate()
            .map(|(idx, l)| CountLine {
                line_no: idx as u32 + 1,
                system_qty: 0,
                snapshot_at: None,
                counted_qty: None,
                is_recounted: false,
                ..l.clone()
            })
            .collect();

        Ok(vec![DocumentEvent::CountLinesReplaced(CountLinesReplaced {
            doc_no: cmd.doc_no.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_count(&self, cmd: &RecordCount) -> Result<Vec<DocumentEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_doc_no(&cmd.doc_no)?;
        self.ensure_kind(DocumentKind::Count)?;

        if self.status != DocumentStatus::Counting {
            return Err(DomainError::invariant(format!(
                "counts can only be entered while Counting (status is {})",
                self.status
            )));
        }
        if cmd.counted_qty < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }

        let line = self
            .count_lines
            .iter()
            .find(|l| l.line_no == cmd.line_no)
            .ok_or_else(|| {
                DomainError::validation(format!("count line {} does not exist", cmd.line_no))
            })?;

        Ok(vec![DocumentEvent::CountRecorded(CountRecorded {
            doc_no: cmd.doc_no.clone(),
            line_no: cmd.line_no,
            counted_qty: cmd.counted_qty,
            is_recounted: line.is_recounted || cmd.recount || line.counted_qty.is_some(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
