//! Document service: the entry point the UI/API layer talks to.
//!
//! Every write follows the same path: rehydrate the document from its
//! stream, decide, commit to the ledger when the transition moves stock,
//! append at the version that was read, then publish. A ledger failure
//! aborts before anything is appended; a store failure after a ledger
//! commit sends the inverse commit.

use chrono::Utc;
use serde_json::Value as JsonValue;

use forgewms_core::{ActorId, Aggregate, DocumentNo, DomainError};
use forgewms_documents::status;
use forgewms_documents::{
    ActionOutcome, CountScope, CountSelector, CreateDocument, Decision, DependencyUsage, Document,
    DocumentCommand, DocumentEvent, DocumentHeader, DocumentKind, DocumentLinks, DocumentStatus,
    EditMode, GuardReport, GuardedAction, IssueMode, KindDetail, LineDraft, LinkDocument, LinkRole,
    RecordCount, ReplaceCountLines, SaveDocument, TransitionDocument, UpdateLineDetails,
    availability_violations, cascades_cancel, commit_request, deactivation_blocker,
    ensure_cancellable, generate_plan,
};
use forgewms_events::{EventBus, EventEnvelope};
use forgewms_stock::{
    AllocationEngine, AllocationInput, AllocationOutcome, CommitRequest, LocationScope,
    LocationStock, StockLedger,
};

use crate::command_dispatcher::{CommandDispatcher, Loaded};
use crate::error::ServiceError;
use crate::event_store::EventStore;
use crate::masterdata::{DocumentUsage, MasterDataRegistry};
use crate::numbering::{InMemoryNumberSequence, NumberSequence};
use crate::settings::Settings;

/// Stream type of every document stream.
pub const STREAM_TYPE: &str = "warehouse.document";

/// Input for [`DocumentService::create`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub header: DocumentHeader,
    pub lines: Vec<LineDraft>,
    /// Status to move to right after creation; `None` stays in Draft.
    pub target: Option<DocumentStatus>,
    pub actor: ActorId,
}

/// Input for [`DocumentService::save`].
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub header: DocumentHeader,
    pub lines: Vec<LineDraft>,
    pub mode: EditMode,
    pub target: Option<DocumentStatus>,
    pub actor: ActorId,
}

pub struct DocumentService<S, B, L> {
    dispatcher: CommandDispatcher<S, B>,
    ledger: L,
    numbers: Box<dyn NumberSequence>,
    master_data: MasterDataRegistry,
    settings: Settings,
}

impl<S, B, L> DocumentService<S, B, L> {
    pub fn new(store: S, bus: B, ledger: L, settings: Settings) -> Self {
        let dispatcher =
            CommandDispatcher::new(store, bus).with_publishing(settings.bus.publish_events);
        let numbers = Box::new(InMemoryNumberSequence::new(
            settings.numbering.sequence_width,
        ));
        Self {
            dispatcher,
            ledger,
            numbers,
            master_data: MasterDataRegistry::new(),
            settings,
        }
    }

    /// Replace the number sequence (a persistent one in production).
    pub fn with_numbers(mut self, numbers: impl NumberSequence + 'static) -> Self {
        self.numbers = Box::new(numbers);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn master_data(&self) -> &MasterDataRegistry {
        &self.master_data
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    pub fn bus(&self) -> &B {
        self.dispatcher.bus()
    }

    pub(crate) fn system_actor(&self) -> ActorId {
        ActorId::new(self.settings.automation.system_actor.clone())
    }
}

impl<S, B, L> DocumentService<S, B, L>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: StockLedger,
{
    // ---- reads ----

    pub fn find(&self, doc_no: &DocumentNo) -> Result<Option<Document>, ServiceError> {
        let loaded = self
            .dispatcher
            .load(doc_no.as_str(), || Document::empty(doc_no.clone()))?;
        Ok(loaded
            .aggregate
            .is_created()
            .then_some(loaded.aggregate))
    }

    pub fn load(&self, doc_no: &DocumentNo) -> Result<Document, ServiceError> {
        self.find(doc_no)?
            .ok_or_else(|| ServiceError::NotFound(doc_no.to_string()))
    }

    /// Every stored document, in stream order.
    pub fn documents(&self) -> Result<Vec<Document>, ServiceError> {
        let ids = self.dispatcher.store().stream_ids(STREAM_TYPE)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let doc_no: DocumentNo = id
                .parse()
                .map_err(|e: DomainError| ServiceError::Store(format!("stream {id}: {e}")))?;
            if let Some(doc) = self.find(&doc_no)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    pub(crate) fn load_existing(
        &self,
        doc_no: &DocumentNo,
    ) -> Result<Loaded<Document>, ServiceError> {
        let loaded = self
            .dispatcher
            .load(doc_no.as_str(), || Document::empty(doc_no.clone()))?;
        if !loaded.aggregate.is_created() {
            return Err(ServiceError::NotFound(doc_no.to_string()));
        }
        Ok(loaded)
    }

    /// Resolve a link slot. Child numbers are reserved before the child is
    /// created, so a missing child reads as absent; a missing source transfer
    /// is a data fault.
    pub(crate) fn linked(
        &self,
        doc: &Document,
        role: LinkRole,
    ) -> Result<Option<Document>, ServiceError> {
        let links = doc.links();
        let slot = match role {
            LinkRole::SourceTransfer => &links.source_transfer_no,
            LinkRole::LinkedIssue => &links.linked_gi_no,
            LinkRole::LinkedReceipt => &links.linked_gr_no,
        };
        let Some(no) = slot else {
            return Ok(None);
        };
        match self.find(no)? {
            Some(found) => Ok(Some(found)),
            None if role != LinkRole::SourceTransfer => {
                tracing::warn!(
                    doc_no = %doc.doc_no(),
                    linked = %no,
                    "linked document not created yet"
                );
                Ok(None)
            }
            None => {
                tracing::error!(
                    doc_no = %doc.doc_no(),
                    linked = %no,
                    "linked document is missing"
                );
                Err(ServiceError::Inconsistency(format!(
                    "{} references {no}, which does not exist",
                    doc.doc_no()
                )))
            }
        }
    }

    // ---- write path ----

    fn execute(
        &self,
        loaded: Loaded<Document>,
        command: DocumentCommand,
    ) -> Result<Document, ServiceError> {
        let events = loaded.aggregate.handle(&command)?;
        self.persist(loaded, events, None)
    }

    /// Append decided events, apply them locally, publish.
    ///
    /// `committed` is the ledger request already applied for these events;
    /// it is reversed if the append fails.
    pub(crate) fn persist(
        &self,
        loaded: Loaded<Document>,
        events: Vec<DocumentEvent>,
        committed: Option<&CommitRequest>,
    ) -> Result<Document, ServiceError> {
        if events.is_empty() {
            return Ok(loaded.aggregate);
        }
        let expected = loaded.expected();
        let mut doc = loaded.aggregate;

        let stored = match self
            .dispatcher
            .append(doc.doc_no().as_str(), STREAM_TYPE, expected, &events)
        {
            Ok(stored) => stored,
            Err(err) => {
                if let Some(request) = committed {
                    self.compensate(request);
                }
                return Err(err.into());
            }
        };

        for event in &events {
            doc.apply(event);
        }

        if let Err(err) = self.dispatcher.publish(&stored) {
            tracing::warn!(doc_no = %doc.doc_no(), "failed to publish document events: {err:?}");
            return Err(err.into());
        }

        Ok(doc)
    }

    fn compensate(&self, request: &CommitRequest) {
        match self.ledger.commit(&request.compensation()) {
            Ok(_) => tracing::warn!(
                doc_no = %request.doc_no,
                movements = request.movements.len(),
                "document store failed after ledger commit; commit reversed"
            ),
            Err(err) => tracing::error!(
                doc_no = %request.doc_no,
                "failed to reverse ledger commit after store failure: {err:?}"
            ),
        }
    }

    /// Decide several commands against one document as a single batch.
    pub(crate) fn decide_all(
        doc: &Document,
        commands: Vec<DocumentCommand>,
    ) -> Result<Vec<DocumentEvent>, DomainError> {
        let mut scratch = doc.clone();
        let mut out = Vec::new();
        for command in commands {
            let events = scratch.handle(&command)?;
            for event in &events {
                scratch.apply(event);
            }
            out.extend(events);
        }
        Ok(out)
    }

    // ---- create / save ----

    /// Number, create in Draft, then move to `target` if one is given.
    ///
    /// When the follow-up transition fails the Draft is kept and the error
    /// is returned.
    pub fn create(&self, request: CreateRequest) -> Result<Document, ServiceError> {
        self.create_document(
            request.header,
            request.lines,
            DocumentLinks::default(),
            &request.actor,
            request.target,
        )
    }

    pub(crate) fn create_document(
        &self,
        header: DocumentHeader,
        lines: Vec<LineDraft>,
        links: DocumentLinks,
        actor: &ActorId,
        target: Option<DocumentStatus>,
    ) -> Result<Document, ServiceError> {
        let doc_no = self.next_number(&header)?;
        self.create_numbered(doc_no, header, lines, links, actor, target)
    }

    pub(crate) fn next_number(&self, header: &DocumentHeader) -> Result<DocumentNo, ServiceError> {
        Ok(self.numbers.next(header.kind().prefix(), header.document_date)?)
    }

    /// Create under a number that was handed out earlier.
    pub(crate) fn create_numbered(
        &self,
        doc_no: DocumentNo,
        header: DocumentHeader,
        lines: Vec<LineDraft>,
        links: DocumentLinks,
        actor: &ActorId,
        target: Option<DocumentStatus>,
    ) -> Result<Document, ServiceError> {
        let kind = header.kind();
        let loaded = self
            .dispatcher
            .load(doc_no.as_str(), || Document::empty(doc_no.clone()))?;
        let command = DocumentCommand::CreateDocument(CreateDocument {
            doc_no: doc_no.clone(),
            header,
            lines,
            links,
            actor: actor.clone(),
            occurred_at: Utc::now(),
        });
        let doc = self.execute(loaded, command)?;

        tracing::info!(doc_no = %doc_no, kind = %kind, actor = %actor, "document created");

        match target {
            Some(target) if target != DocumentStatus::Draft => {
                self.transition(&doc_no, target, actor, None)
            }
            _ => Ok(doc),
        }
    }

    pub fn save(&self, doc_no: &DocumentNo, request: SaveRequest) -> Result<Document, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let command = DocumentCommand::SaveDocument(SaveDocument {
            doc_no: doc_no.clone(),
            header: request.header,
            lines: request.lines,
            mode: request.mode,
            occurred_at: Utc::now(),
        });
        let doc = self.execute(loaded, command)?;
        tracing::debug!(doc_no = %doc_no, lines = doc.line_count(), "document saved");

        match request.target {
            Some(target) if target != doc.status() => {
                self.transition(doc_no, target, &request.actor, None)
            }
            _ => Ok(doc),
        }
    }

    // ---- transitions ----

    /// Move a document to `target`. Cancellation goes through the
    /// cascading cancel rules.
    ///
    /// Follow-up automation (transfer children) runs after the change is
    /// stored. When it fails the result is [`ServiceError::Automation`] and
    /// repeating the same transition resumes it.
    pub fn transition(
        &self,
        doc_no: &DocumentNo,
        target: DocumentStatus,
        actor: &ActorId,
        note: Option<String>,
    ) -> Result<Document, ServiceError> {
        if target == DocumentStatus::Cancelled {
            self.cancel(doc_no, actor, note)?;
            return self.load(doc_no);
        }

        let loaded = self.load_existing(doc_no)?;
        let doc = self.apply_transition(loaded, target, actor, note)?;

        if let Err(err) = self.run_automation(&doc) {
            tracing::error!(
                doc_no = %doc_no,
                status = %doc.status(),
                "failed to run follow-up automation: {err:?}"
            );
            return Err(ServiceError::Automation {
                doc_no: doc_no.to_string(),
                source: Box::new(err),
            });
        }
        self.load(doc_no)
    }

    /// One guarded status change, including the ledger commit when the
    /// target moves stock.
    pub(crate) fn apply_transition(
        &self,
        loaded: Loaded<Document>,
        target: DocumentStatus,
        actor: &ActorId,
        note: Option<String>,
    ) -> Result<Document, ServiceError> {
        let doc = &loaded.aggregate;
        let from = doc.status();
        let kind = doc.kind();
        // Any move out of an editable status is a submit.
        let submits = doc.submits(target) && status::is_allowed(kind, from, target);

        if submits {
            doc.ensure_submittable()?;
            let violations = availability_violations(doc, &self.ledger)?;
            if !violations.is_empty() {
                tracing::debug!(
                    doc_no = %doc.doc_no(),
                    violations = violations.len(),
                    "submit rejected: insufficient stock"
                );
                return Err(ServiceError::InvalidFields(violations));
            }
        }

        let snapshot = if submits && from == DocumentStatus::Draft && kind == DocumentKind::Count {
            let wh = doc.header().warehouse_code.as_str();
            forgewms_documents::snapshot(doc.count_lines(), wh, &self.ledger.onhand(wh)?)
        } else {
            Vec::new()
        };

        let command = DocumentCommand::TransitionDocument(TransitionDocument {
            doc_no: doc.doc_no().clone(),
            target,
            actor: actor.clone(),
            note,
            snapshot,
            occurred_at: Utc::now(),
        });
        let events = doc.handle(&command).map_err(|err| {
            tracing::debug!(
                doc_no = %doc.doc_no(),
                from = %from,
                to = %target,
                "transition refused: {err}"
            );
            err
        })?;
        if events.is_empty() {
            return Ok(loaded.aggregate);
        }

        let commit = kind
            .commits_stock(target)
            .then(|| commit_request(doc, Utc::now().date_naive()));
        if let Some(request) = &commit {
            if let Err(err) = self.ledger.commit(request) {
                tracing::error!(
                    doc_no = %doc.doc_no(),
                    to = %target,
                    "failed to commit stock movement: {err:?}"
                );
                return Err(ServiceError::LedgerCommit {
                    doc_no: doc.doc_no().to_string(),
                    source: err,
                });
            }
        }

        let doc = self.persist(loaded, events, commit.as_ref())?;

        tracing::info!(
            doc_no = %doc.doc_no(),
            kind = %kind,
            from = %from,
            to = %target,
            actor = %actor,
            "document transitioned"
        );
        Ok(doc)
    }

    /// Cancel a document; returns every document that was cancelled.
    ///
    /// Cancelling a transfer cancels its open Issue/Receipt as well, and is
    /// refused once the issue completed. Documents spawned by a transfer are
    /// cancelled through the transfer only.
    pub fn cancel(
        &self,
        doc_no: &DocumentNo,
        actor: &ActorId,
        note: Option<String>,
    ) -> Result<Vec<DocumentNo>, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let doc = &loaded.aggregate;

        match doc.kind() {
            DocumentKind::Transfer => self.cancel_transfer(loaded, actor, note),
            DocumentKind::Issue | DocumentKind::Receipt => {
                if let Some(transfer_no) = &doc.links().source_transfer_no {
                    tracing::debug!(doc_no = %doc_no, transfer = %transfer_no, "cancel refused");
                    return Err(ServiceError::Guard(format!(
                        "{doc_no} belongs to transfer {transfer_no}; cancel the transfer instead"
                    )));
                }
                self.apply_transition(loaded, DocumentStatus::Cancelled, actor, note)?;
                Ok(vec![doc_no.clone()])
            }
            DocumentKind::Count => {
                self.apply_transition(loaded, DocumentStatus::Cancelled, actor, note)?;
                Ok(vec![doc_no.clone()])
            }
        }
    }

    fn cancel_transfer(
        &self,
        loaded: Loaded<Document>,
        actor: &ActorId,
        note: Option<String>,
    ) -> Result<Vec<DocumentNo>, ServiceError> {
        let transfer_no = loaded.aggregate.doc_no().clone();
        let issue = self.linked(&loaded.aggregate, LinkRole::LinkedIssue)?;
        let receipt = self.linked(&loaded.aggregate, LinkRole::LinkedReceipt)?;

        if let Err(err) = ensure_cancellable(issue.as_ref().map(Document::status)) {
            tracing::debug!(doc_no = %transfer_no, "cancel refused: {err}");
            return Err(err.into());
        }
        // The transfer itself must be cancellable before any child is touched.
        loaded
            .aggregate
            .handle(&DocumentCommand::TransitionDocument(TransitionDocument {
                doc_no: transfer_no.clone(),
                target: DocumentStatus::Cancelled,
                actor: actor.clone(),
                note: note.clone(),
                snapshot: Vec::new(),
                occurred_at: Utc::now(),
            }))?;

        // Children first: a failure leaves the transfer open and the cancel
        // can be repeated.
        let mut touched = vec![transfer_no.clone()];
        for child in [issue, receipt].into_iter().flatten() {
            if !cascades_cancel(child.status()) {
                continue;
            }
            let child_loaded = self.load_existing(child.doc_no())?;
            let cascade_note = Some(format!("cancelled with transfer {transfer_no}"));
            self.apply_transition(child_loaded, DocumentStatus::Cancelled, actor, cascade_note)
                .inspect_err(|err| {
                    tracing::error!(
                        doc_no = %child.doc_no(),
                        transfer = %transfer_no,
                        "failed to cancel transfer child: {err:?}"
                    )
                })?;
            touched.push(child.doc_no().clone());
        }

        self.apply_transition(loaded, DocumentStatus::Cancelled, actor, note)?;
        Ok(touched)
    }

    // ---- line details ----

    /// Apply one allocation input to a line and store the resulting details.
    ///
    /// Issues allocate against ledger stock at `location_code`; receipts
    /// are bounded by the planned quantity. Clamped input is reported in
    /// the outcome's warnings.
    pub fn allocate(
        &self,
        doc_no: &DocumentNo,
        line_no: u32,
        location_code: &str,
        input: &AllocationInput,
    ) -> Result<AllocationOutcome, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let doc = &loaded.aggregate;
        let line = doc
            .line(line_no)
            .ok_or_else(|| ServiceError::Validation(format!("line {line_no} does not exist")))?;

        let (outcome, line_location) = match doc.kind() {
            DocumentKind::Issue => {
                let scope = match doc.header().issue_mode() {
                    Some(IssueMode::Detail) => LocationScope::PerDetail,
                    _ => LocationScope::SingleLocation,
                };
                let stock = LocationStock::load(
                    &self.ledger,
                    &doc.header().warehouse_code,
                    location_code,
                    &line.model_code,
                    line.tracking_type,
                )?;
                let outcome =
                    AllocationEngine::allocate(line_no, &line.details, scope, &stock, input)?;
                let line_location = match scope {
                    LocationScope::SingleLocation => Some(location_code.to_string()),
                    LocationScope::PerDetail => line.location_code.clone(),
                };
                (outcome, line_location)
            }
            DocumentKind::Receipt => {
                let outcome = AllocationEngine::receive(
                    line_no,
                    &line.details,
                    location_code,
                    line.qty_planned,
                    input,
                )?;
                (outcome, Some(location_code.to_string()))
            }
            kind => {
                return Err(ServiceError::Rejected(format!(
                    "{kind} lines do not take stock details"
                )));
            }
        };

        let command = DocumentCommand::UpdateLineDetails(UpdateLineDetails {
            doc_no: doc_no.clone(),
            line_no,
            location_code: line_location,
            details: outcome.details.clone(),
            mode: EditMode::Edit,
            occurred_at: Utc::now(),
        });
        self.execute(loaded, command)?;

        for warning in &outcome.warnings {
            tracing::warn!(doc_no = %doc_no, "quantity clamped: {warning}");
        }
        if outcome.location_reset {
            tracing::debug!(doc_no = %doc_no, line_no, "location changed; details reset");
        }

        Ok(outcome)
    }

    // ---- counts ----

    /// Fill an empty count document from the ledger's on-hand records.
    ///
    /// Replacing existing lines is a guarded action: see
    /// [`GuardedAction::RegenerateCountPlan`].
    pub fn generate_count_plan(
        &self,
        doc_no: &DocumentNo,
        selector: &CountSelector,
    ) -> Result<Document, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let scope = count_scope(&loaded.aggregate)?;
        let existing = loaded.aggregate.count_lines().len();
        if existing > 0 {
            return Err(ServiceError::Guard(format!(
                "{doc_no} already has {existing} count line(s); regenerating discards them and must be confirmed"
            )));
        }
        self.replace_count_plan(loaded, scope, selector)
    }

    fn replace_count_plan(
        &self,
        loaded: Loaded<Document>,
        scope: CountScope,
        selector: &CountSelector,
    ) -> Result<Document, ServiceError> {
        let doc = &loaded.aggregate;
        let wh = doc.header().warehouse_code.clone();
        let lines = generate_plan(&self.ledger.onhand(&wh)?, &wh, scope, selector)?;
        let line_count = lines.len();

        let mut commands = Vec::new();
        if count_scope(doc)? != scope {
            let mut header = doc.header().clone();
            header.detail = KindDetail::Count { scope };
            commands.push(DocumentCommand::SaveDocument(SaveDocument {
                doc_no: doc.doc_no().clone(),
                header,
                lines: Vec::new(),
                mode: EditMode::Edit,
                occurred_at: Utc::now(),
            }));
        }
        commands.push(DocumentCommand::ReplaceCountLines(ReplaceCountLines {
            doc_no: doc.doc_no().clone(),
            lines,
            mode: EditMode::Edit,
            occurred_at: Utc::now(),
        }));

        let events = Self::decide_all(doc, commands)?;
        let doc = self.persist(loaded, events, None)?;
        tracing::info!(doc_no = %doc.doc_no(), lines = line_count, "count plan generated");
        Ok(doc)
    }

    pub fn record_count(
        &self,
        doc_no: &DocumentNo,
        line_no: u32,
        counted_qty: i64,
        recount: bool,
    ) -> Result<Document, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let command = DocumentCommand::RecordCount(RecordCount {
            doc_no: doc_no.clone(),
            line_no,
            counted_qty,
            recount,
            occurred_at: Utc::now(),
        });
        self.execute(loaded, command)
    }

    pub fn link(
        &self,
        doc_no: &DocumentNo,
        role: LinkRole,
        linked_no: &DocumentNo,
    ) -> Result<Document, ServiceError> {
        let loaded = self.load_existing(doc_no)?;
        let command = DocumentCommand::LinkDocument(LinkDocument {
            doc_no: doc_no.clone(),
            role,
            linked_no: linked_no.clone(),
            occurred_at: Utc::now(),
        });
        self.execute(loaded, command)
    }

    // ---- guarded actions ----

    /// Describe what `action` would do without doing it.
    pub fn dry_run_guard(&self, action: &GuardedAction) -> Result<GuardReport, ServiceError> {
        let report = match action {
            GuardedAction::CancelDocument { doc_no, .. } => {
                let doc = self.load(doc_no)?;
                self.cancel_report(action, &doc)?
            }
            GuardedAction::RejectReceipt { doc_no, reason, .. } => {
                let doc = self.load(doc_no)?;
                let status = doc.status();
                if doc.kind() != DocumentKind::Receipt {
                    GuardReport::blocked(action.clone(), format!("{doc_no} is not a receipt"))
                } else if reason.trim().is_empty() {
                    GuardReport::blocked(action.clone(), "rejecting a receipt requires a reason")
                } else if !status::is_allowed(doc.kind(), status, DocumentStatus::Rejected) {
                    GuardReport::blocked(
                        action.clone(),
                        format!("{doc_no} cannot be rejected while {status}"),
                    )
                } else {
                    GuardReport::allowed(
                        action.clone(),
                        vec![
                            format!("{doc_no} moves from {status} to Rejected"),
                            "nothing is received into stock".to_string(),
                        ],
                        true,
                    )
                }
            }
            GuardedAction::RegenerateCountPlan {
                doc_no,
                scope,
                selector,
            } => {
                let doc = self.load(doc_no)?;
                if doc.kind() != DocumentKind::Count {
                    GuardReport::blocked(action.clone(), format!("{doc_no} is not a count"))
                } else if !doc.is_editable(EditMode::Edit) {
                    GuardReport::blocked(
                        action.clone(),
                        format!("{doc_no} is read-only in status {}", doc.status()),
                    )
                } else {
                    let wh = doc.header().warehouse_code.as_str();
                    match generate_plan(&self.ledger.onhand(wh)?, wh, *scope, selector) {
                        Err(err) => GuardReport::blocked(action.clone(), reason_of(err)),
                        Ok(lines) => {
                            let existing = doc.count_lines().len();
                            let mut consequences = Vec::new();
                            if existing > 0 {
                                consequences
                                    .push(format!("{existing} existing count line(s) are discarded"));
                            }
                            consequences.push(format!("{} count line(s) are generated", lines.len()));
                            GuardReport::allowed(action.clone(), consequences, existing > 0)
                        }
                    }
                }
            }
            GuardedAction::DeactivateMasterRecord { record } => {
                if !self.master_data.is_registered(record) {
                    GuardReport::blocked(
                        action.clone(),
                        format!("{} is not registered", record.label()),
                    )
                } else if !self.master_data.is_active(record) {
                    GuardReport::blocked(
                        action.clone(),
                        format!("{} is already inactive", record.label()),
                    )
                } else {
                    let usage = self.dependency_usage()?.dependent_usage(record)?;
                    match deactivation_blocker(record, usage) {
                        Some(reason) => GuardReport::blocked(action.clone(), reason),
                        None => GuardReport::allowed(
                            action.clone(),
                            vec![format!("{} becomes inactive", record.label())],
                            true,
                        ),
                    }
                }
            }
        };

        if let Some(reason) = &report.blocked_reason {
            tracing::debug!(reason = %reason, "guarded action blocked");
        }
        Ok(report)
    }

    fn cancel_report(
        &self,
        action: &GuardedAction,
        doc: &Document,
    ) -> Result<GuardReport, ServiceError> {
        let doc_no = doc.doc_no();
        let status = doc.status();

        if status.is_terminal() {
            return Ok(GuardReport::blocked(
                action.clone(),
                format!("{doc_no} is {status} and can no longer be cancelled"),
            ));
        }
        if !status::is_allowed(doc.kind(), status, DocumentStatus::Cancelled) {
            return Ok(GuardReport::blocked(
                action.clone(),
                format!("{doc_no} cannot be cancelled while {status}"),
            ));
        }
        if let Some(transfer_no) = &doc.links().source_transfer_no {
            return Ok(GuardReport::blocked(
                action.clone(),
                format!("{doc_no} belongs to transfer {transfer_no}; cancel the transfer instead"),
            ));
        }

        let mut consequences = vec![format!("{doc_no} moves from {status} to Cancelled")];
        if doc.kind() == DocumentKind::Transfer {
            let issue = self.linked(doc, LinkRole::LinkedIssue)?;
            let receipt = self.linked(doc, LinkRole::LinkedReceipt)?;
            if let Err(err) = ensure_cancellable(issue.as_ref().map(Document::status)) {
                return Ok(GuardReport::blocked(action.clone(), reason_of(err)));
            }
            for child in [issue, receipt].into_iter().flatten() {
                if cascades_cancel(child.status()) {
                    consequences.push(format!(
                        "linked {} {} ({}) is cancelled too",
                        child.kind(),
                        child.doc_no(),
                        child.status()
                    ));
                }
            }
        }
        Ok(GuardReport::allowed(action.clone(), consequences, true))
    }

    /// Perform `action` if the caller decided to proceed and the guard
    /// still allows it.
    pub fn confirm(
        &self,
        action: &GuardedAction,
        decision: Decision,
    ) -> Result<ActionOutcome, ServiceError> {
        if decision == Decision::Decline {
            tracing::info!(action = ?action, "guarded action declined");
            return Ok(ActionOutcome::Declined);
        }

        self.dry_run_guard(action)?.ensure_allowed()?;

        let touched = match action {
            GuardedAction::CancelDocument { doc_no, actor } => self.cancel(doc_no, actor, None)?,
            GuardedAction::RejectReceipt {
                doc_no,
                actor,
                reason,
            } => {
                self.transition(doc_no, DocumentStatus::Rejected, actor, Some(reason.clone()))?;
                vec![doc_no.clone()]
            }
            GuardedAction::RegenerateCountPlan {
                doc_no,
                scope,
                selector,
            } => {
                let loaded = self.load_existing(doc_no)?;
                self.replace_count_plan(loaded, *scope, selector)?;
                vec![doc_no.clone()]
            }
            GuardedAction::DeactivateMasterRecord { record } => {
                self.master_data.deactivate(record)?;
                tracing::info!(record = %record.label(), "master record deactivated");
                Vec::new()
            }
        };

        Ok(ActionOutcome::Performed { touched })
    }

    /// Dependency usage over the ledger, the stored documents and the
    /// master-data registry.
    pub fn dependency_usage(&self) -> Result<DocumentUsage<'_, L>, ServiceError> {
        Ok(DocumentUsage {
            ledger: &self.ledger,
            registry: &self.master_data,
            documents: self.documents()?,
        })
    }
}

fn count_scope(doc: &Document) -> Result<CountScope, ServiceError> {
    match &doc.header().detail {
        KindDetail::Count { scope } => Ok(*scope),
        _ => Err(ServiceError::Rejected(format!(
            "{} is a {} document, not a count",
            doc.doc_no(),
            doc.kind()
        ))),
    }
}

fn reason_of(err: DomainError) -> String {
    match err {
        DomainError::GuardViolation(msg) | DomainError::Validation(msg) => msg,
        other => other.to_string(),
    }
}
