//! Integration tests for the document service.
//!
//! Tests: Service → Ledger → EventStore → EventBus
//!
//! Verifies:
//! - Submit checks, ledger commits and their rollback
//! - Transfer automation and derived status
//! - Count snapshots and variance
//! - Two-phase guarded actions and master-data guards

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use forgewms_core::{ActorId, DocumentNo, DocumentPrefix, DomainError};
    use forgewms_documents::{
        ActionOutcome, CountScope, CountSelector, Counterpart, Decision, Document, DocumentHeader,
        DocumentKind, DocumentStatus, EditMode, GuardedAction, IssueMode, IssueType, KindDetail,
        LineDraft, MasterRecord, ReceiptType,
    };
    use forgewms_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use forgewms_stock::{AllocationInput, InMemoryStockLedger, LineDetails, StockLedgerView, TrackingType};

    use crate::error::ServiceError;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::numbering::{InMemoryNumberSequence, NumberSequence};
    use crate::service::{CreateRequest, DocumentService, SaveRequest};
    use crate::settings::Settings;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type Service = DocumentService<Arc<InMemoryEventStore>, Bus, Arc<InMemoryStockLedger>>;

    struct Harness {
        svc: Service,
        store: Arc<InMemoryEventStore>,
        ledger: Arc<InMemoryStockLedger>,
        bus: Bus,
    }

    fn setup() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let ledger = Arc::new(InMemoryStockLedger::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let svc = DocumentService::new(store.clone(), bus.clone(), ledger.clone(), Settings::default());
        Harness {
            svc,
            store,
            ledger,
            bus,
        }
    }

    /// Number sequence that fails once for an armed prefix.
    struct FlakyNumbers {
        inner: InMemoryNumberSequence,
        fail_on: Arc<Mutex<Option<DocumentPrefix>>>,
    }

    impl NumberSequence for FlakyNumbers {
        fn next(&self, prefix: DocumentPrefix, date: NaiveDate) -> Result<DocumentNo, DomainError> {
            let mut armed = self.fail_on.lock().unwrap();
            if *armed == Some(prefix) {
                *armed = None;
                return Err(DomainError::conflict("number sequence unavailable"));
            }
            self.inner.next(prefix, date)
        }
    }

    fn setup_flaky() -> (Harness, Arc<Mutex<Option<DocumentPrefix>>>) {
        let mut h = setup();
        let fail_on = Arc::new(Mutex::new(None));
        let svc = DocumentService::new(
            h.store.clone(),
            h.bus.clone(),
            h.ledger.clone(),
            Settings::default(),
        );
        h.svc = svc.with_numbers(FlakyNumbers {
            inner: InMemoryNumberSequence::new(4),
            fail_on: fail_on.clone(),
        });
        (h, fail_on)
    }

    fn alice() -> ActorId {
        ActorId::new("alice")
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn header(detail: KindDetail, counterpart: Option<Counterpart>) -> DocumentHeader {
        DocumentHeader {
            warehouse_code: "WH1".into(),
            counterpart,
            document_date: day(),
            expected_date: None,
            reference_no: None,
            note: None,
            detail,
        }
    }

    fn issue_header(mode: IssueMode) -> DocumentHeader {
        header(
            KindDetail::Issue {
                issue_type: IssueType::Sales,
                mode,
            },
            Some(Counterpart::Partner("C001".into())),
        )
    }

    fn receipt_header() -> DocumentHeader {
        header(
            KindDetail::Receipt {
                receipt_type: ReceiptType::Purchase,
            },
            Some(Counterpart::Partner("V001".into())),
        )
    }

    fn transfer_header() -> DocumentHeader {
        header(
            KindDetail::Transfer {
                to_warehouse_code: "WH2".into(),
            },
            None,
        )
    }

    fn count_header(scope: CountScope) -> DocumentHeader {
        header(KindDetail::Count { scope }, None)
    }

    fn create(
        svc: &Service,
        header: DocumentHeader,
        lines: Vec<LineDraft>,
        target: Option<DocumentStatus>,
    ) -> Result<Document, ServiceError> {
        svc.create(CreateRequest {
            header,
            lines,
            target,
            actor: alice(),
        })
    }

    fn step(svc: &Service, doc_no: &DocumentNo, target: DocumentStatus) -> Document {
        svc.transition(doc_no, target, &alice(), None).unwrap()
    }

    fn qty(q: i64) -> AllocationInput {
        AllocationInput::Quantity { qty: q }
    }

    fn onhand(ledger: &InMemoryStockLedger, wh: &str, loc: &str, model: &str) -> i64 {
        ledger
            .onhand_at(wh, loc, model)
            .unwrap()
            .map_or(0, |r| r.onhand_qty)
    }

    /// Issue of 8 x M1 at L, picked in full and Submitted.
    fn submitted_issue(h: &Harness) -> DocumentNo {
        h.ledger.seed_untracked("WH1", "L", "M1", 10);
        let doc = create(
            &h.svc,
            issue_header(IssueMode::Summary),
            vec![LineDraft::new("M1", TrackingType::None, 8).at("L")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();
        step(&h.svc, &doc_no, DocumentStatus::Picking);
        h.svc.allocate(&doc_no, 1, "L", &qty(8)).unwrap();
        step(&h.svc, &doc_no, DocumentStatus::Submitted);
        doc_no
    }

    /// Transfer WH1 → WH2 of 5 x M1 from A-01, saved as Created.
    fn created_transfer(h: &Harness) -> Document {
        h.ledger.seed_untracked("WH1", "A-01", "M1", 10);
        create(
            &h.svc,
            transfer_header(),
            vec![LineDraft::new("M1", TrackingType::None, 5).at("A-01")],
            Some(DocumentStatus::Created),
        )
        .unwrap()
    }

    fn complete_issue(h: &Harness, issue_no: &DocumentNo, loc: &str, picked: i64) {
        step(&h.svc, issue_no, DocumentStatus::Picking);
        h.svc.allocate(issue_no, 1, loc, &qty(picked)).unwrap();
        step(&h.svc, issue_no, DocumentStatus::Submitted);
        step(&h.svc, issue_no, DocumentStatus::Completed);
    }

    #[test]
    fn summary_issue_over_availability_is_rejected() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "L", "M1", 10);

        let err = create(
            &h.svc,
            issue_header(IssueMode::Summary),
            vec![LineDraft::new("M1", TrackingType::None, 15).at("L")],
            Some(DocumentStatus::New),
        )
        .unwrap_err();

        match err {
            ServiceError::InvalidFields(v) => {
                assert_eq!(v.len(), 1);
                assert!(v[0].message.contains("location L"));
                assert!(v[0].message.contains("at most 10"));
            }
            other => panic!("expected field violations, got {other:?}"),
        }

        // The draft survives for correction.
        let docs = h.svc.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status(), DocumentStatus::Draft);
        assert_eq!(docs[0].doc_no().as_str(), "GI-202407-0001");
    }

    #[test]
    fn document_without_lines_cannot_leave_draft() {
        let h = setup();
        let err = create(&h.svc, receipt_header(), vec![], Some(DocumentStatus::New)).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("no lines")));
    }

    #[test]
    fn issue_completion_commits_stock_once() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "L", "M1", 10);
        let doc = create(
            &h.svc,
            issue_header(IssueMode::Summary),
            vec![LineDraft::new("M1", TrackingType::None, 8).at("L")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();
        step(&h.svc, &doc_no, DocumentStatus::Picking);

        let clamped = h.svc.allocate(&doc_no, 1, "L", &qty(12)).unwrap();
        assert_eq!(clamped.fulfilled_qty, 10);
        assert_eq!(clamped.warnings.len(), 1);
        assert_eq!(clamped.warnings[0].max_usable, 10);

        let exact = h.svc.allocate(&doc_no, 1, "L", &qty(8)).unwrap();
        assert_eq!(exact.fulfilled_qty, 8);
        assert!(exact.warnings.is_empty());

        step(&h.svc, &doc_no, DocumentStatus::Submitted);
        let done = step(&h.svc, &doc_no, DocumentStatus::Completed);

        assert_eq!(done.status(), DocumentStatus::Completed);
        assert_eq!(done.history().len(), 5);
        assert_eq!(onhand(&h.ledger, "WH1", "L", "M1"), 2);
        assert_eq!(h.ledger.committed().len(), 1);
    }

    #[test]
    fn ledger_failure_leaves_status_unchanged() {
        let h = setup();
        let doc_no = submitted_issue(&h);

        h.ledger.fail_next_commit("ledger busy");
        let err = h
            .svc
            .transition(&doc_no, DocumentStatus::Completed, &alice(), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::LedgerCommit { .. }));
        assert!(!err.is_rejection());

        assert_eq!(h.svc.load(&doc_no).unwrap().status(), DocumentStatus::Submitted);
        assert_eq!(onhand(&h.ledger, "WH1", "L", "M1"), 10);

        // A retry goes through.
        step(&h.svc, &doc_no, DocumentStatus::Completed);
        assert_eq!(onhand(&h.ledger, "WH1", "L", "M1"), 2);
    }

    #[test]
    fn store_failure_after_commit_reverses_the_ledger() {
        let h = setup();
        let doc_no = submitted_issue(&h);

        h.store.fail_next_append("disk full");
        let err = h
            .svc
            .transition(&doc_no, DocumentStatus::Completed, &alice(), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));

        assert_eq!(h.svc.load(&doc_no).unwrap().status(), DocumentStatus::Submitted);
        assert_eq!(onhand(&h.ledger, "WH1", "L", "M1"), 10);
        // Commit plus its compensation.
        assert_eq!(h.ledger.committed().len(), 2);
    }

    #[test]
    fn repeated_transition_appends_nothing() {
        let h = setup();
        let doc = create(
            &h.svc,
            receipt_header(),
            vec![LineDraft::new("M1", TrackingType::None, 1).at("R-01")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let before = h.store.load_stream(doc.doc_no().as_str()).unwrap().len();

        let again = step(&h.svc, doc.doc_no(), DocumentStatus::New);

        assert_eq!(again.status(), DocumentStatus::New);
        assert_eq!(h.store.load_stream(doc.doc_no().as_str()).unwrap().len(), before);
    }

    #[test]
    fn numbers_follow_prefix_and_month() {
        let h = setup();
        let a = create(&h.svc, receipt_header(), vec![], None).unwrap();
        let b = create(&h.svc, receipt_header(), vec![], None).unwrap();
        let c = create(&h.svc, issue_header(IssueMode::Detail), vec![], None).unwrap();

        assert_eq!(a.doc_no().as_str(), "GR-202407-0001");
        assert_eq!(b.doc_no().as_str(), "GR-202407-0002");
        assert_eq!(c.doc_no().as_str(), "GI-202407-0001");
    }

    #[test]
    fn detail_mode_issue_picks_lots_across_locations() {
        let h = setup();
        h.ledger.seed_lot("WH1", "A-01", "M1", "LOT-A", 3, None);
        h.ledger.seed_lot("WH1", "B-01", "M1", "LOT-B", 4, None);
        let doc = create(
            &h.svc,
            issue_header(IssueMode::Detail),
            vec![LineDraft::new("M1", TrackingType::Lot, 6)],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();
        step(&h.svc, &doc_no, DocumentStatus::Picking);

        let lot = |code: &str, q: i64| AllocationInput::LotQuantity {
            lot_code: code.into(),
            qty: q,
            expiry_date: None,
        };
        h.svc.allocate(&doc_no, 1, "A-01", &lot("LOT-A", 3)).unwrap();
        let over = h.svc.allocate(&doc_no, 1, "B-01", &lot("LOT-B", 5)).unwrap();
        assert_eq!(over.fulfilled_qty, 7);
        assert_eq!(over.warnings[0].lot_code.as_deref(), Some("LOT-B"));
        let fixed = h.svc.allocate(&doc_no, 1, "B-01", &lot("LOT-B", 3)).unwrap();
        assert_eq!(fixed.fulfilled_qty, 6);
        assert_eq!(fixed.details.locations(), vec!["A-01", "B-01"]);

        step(&h.svc, &doc_no, DocumentStatus::Submitted);
        step(&h.svc, &doc_no, DocumentStatus::Completed);

        assert_eq!(onhand(&h.ledger, "WH1", "A-01", "M1"), 0);
        let left = h.ledger.lots("WH1", "B-01", "M1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].onhand_qty, 1);
    }

    #[test]
    fn transfer_created_spawns_issue_and_derives_status() {
        let h = setup();
        let transfer = created_transfer(&h);
        assert_eq!(transfer.status(), DocumentStatus::Created);

        let issue_no = transfer.links().linked_gi_no.clone().unwrap();
        let issue = h.svc.load(&issue_no).unwrap();
        assert_eq!(issue.status(), DocumentStatus::New);
        assert_eq!(issue.links().source_transfer_no.as_ref(), Some(transfer.doc_no()));
        assert_eq!(
            issue.header().detail,
            KindDetail::Issue {
                issue_type: IssueType::Transfer,
                mode: IssueMode::Summary,
            }
        );
        assert_eq!(
            issue.header().counterpart,
            Some(Counterpart::Warehouse("WH2".into()))
        );
        assert_eq!(h.svc.derived_status(transfer.doc_no()).unwrap(), DocumentStatus::Created);

        step(&h.svc, &issue_no, DocumentStatus::Picking);
        assert_eq!(h.svc.derived_status(transfer.doc_no()).unwrap(), DocumentStatus::Exporting);
    }

    #[test]
    fn transfer_child_is_cancelled_through_the_transfer_only() {
        let h = setup();
        let transfer = created_transfer(&h);
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();

        let err = h.svc.cancel(&issue_no, &alice(), None).unwrap_err();
        assert!(matches!(err, ServiceError::Guard(msg) if msg.contains("cancel the transfer")));

        let touched = h.svc.cancel(transfer.doc_no(), &alice(), None).unwrap();
        assert_eq!(touched, vec![transfer.doc_no().clone(), issue_no.clone()]);
        assert_eq!(h.svc.load(transfer.doc_no()).unwrap().status(), DocumentStatus::Cancelled);
        let issue = h.svc.load(&issue_no).unwrap();
        assert_eq!(issue.status(), DocumentStatus::Cancelled);
        assert!(issue.history().last().unwrap().note.as_deref().unwrap().contains("transfer"));
    }

    #[test]
    fn emptying_a_new_issue_blocks_the_next_submit() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "L", "M1", 10);
        let doc = create(
            &h.svc,
            issue_header(IssueMode::Summary),
            vec![LineDraft::new("M1", TrackingType::None, 5).at("L")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();

        let err = h
            .svc
            .save(
                &doc_no,
                SaveRequest {
                    header: issue_header(IssueMode::Summary),
                    lines: vec![],
                    mode: EditMode::Edit,
                    target: Some(DocumentStatus::Picking),
                    actor: alice(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("no lines")));
        assert_eq!(h.svc.load(&doc_no).unwrap().status(), DocumentStatus::New);
    }

    #[test]
    fn raising_qty_on_a_new_issue_rechecks_availability() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "L", "M1", 10);
        let doc = create(
            &h.svc,
            issue_header(IssueMode::Summary),
            vec![LineDraft::new("M1", TrackingType::None, 5).at("L")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();

        let err = h
            .svc
            .save(
                &doc_no,
                SaveRequest {
                    header: issue_header(IssueMode::Summary),
                    lines: vec![LineDraft {
                        line_no: Some(1),
                        ..LineDraft::new("M1", TrackingType::None, 500).at("L")
                    }],
                    mode: EditMode::Edit,
                    target: Some(DocumentStatus::Picking),
                    actor: alice(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidFields(_)));
        let doc = h.svc.load(&doc_no).unwrap();
        assert_eq!(doc.status(), DocumentStatus::New);
        assert_eq!(doc.lines()[0].qty_planned, 500);
    }

    #[test]
    fn failed_issue_spawn_resumes_on_repeated_transition() {
        let (h, fail_on) = setup_flaky();
        h.ledger.seed_untracked("WH1", "A-01", "M1", 10);
        *fail_on.lock().unwrap() = Some(DocumentPrefix::Gi);

        let err = create(
            &h.svc,
            transfer_header(),
            vec![LineDraft::new("M1", TrackingType::None, 5).at("A-01")],
            Some(DocumentStatus::Created),
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Automation { .. }));

        let transfer = h.svc.documents().unwrap().remove(0);
        assert_eq!(transfer.status(), DocumentStatus::Created);
        assert!(transfer.links().linked_gi_no.is_none());

        let transfer = step(&h.svc, transfer.doc_no(), DocumentStatus::Created);
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();
        let issue = h.svc.load(&issue_no).unwrap();
        assert_eq!(issue.status(), DocumentStatus::New);
        assert_eq!(issue.links().source_transfer_no.as_ref(), Some(transfer.doc_no()));
        assert_eq!(h.svc.documents().unwrap().len(), 2);

        // Already complete: nothing more is created.
        step(&h.svc, transfer.doc_no(), DocumentStatus::Created);
        assert_eq!(h.svc.documents().unwrap().len(), 2);
    }

    #[test]
    fn failed_receipt_spawn_resumes_without_a_second_commit() {
        let (h, fail_on) = setup_flaky();
        let transfer = created_transfer(&h);
        let transfer_no = transfer.doc_no().clone();
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();

        step(&h.svc, &issue_no, DocumentStatus::Picking);
        h.svc.allocate(&issue_no, 1, "A-01", &qty(5)).unwrap();
        step(&h.svc, &issue_no, DocumentStatus::Submitted);
        *fail_on.lock().unwrap() = Some(DocumentPrefix::Gr);

        let err = h
            .svc
            .transition(&issue_no, DocumentStatus::Completed, &alice(), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Automation { .. }));
        assert_eq!(h.svc.load(&issue_no).unwrap().status(), DocumentStatus::Completed);
        assert_eq!(onhand(&h.ledger, "WH1", "A-01", "M1"), 5);
        assert_eq!(h.svc.derived_status(&transfer_no).unwrap(), DocumentStatus::Receiving);
        assert!(h.svc.transfer_view(&transfer_no).unwrap().receipt.is_none());

        step(&h.svc, &issue_no, DocumentStatus::Completed);
        let view = h.svc.transfer_view(&transfer_no).unwrap();
        let receipt = view.receipt.unwrap();
        assert_eq!(receipt.status(), DocumentStatus::New);
        assert_eq!(receipt.lines()[0].qty_planned, 5);
        assert_eq!(receipt.lines()[0].fulfilled_qty(), 5);
        assert_eq!(
            view.issue.unwrap().links().linked_gr_no.as_ref(),
            Some(receipt.doc_no())
        );
        assert_eq!(h.ledger.committed().len(), 1);
    }

    #[test]
    fn failed_transfer_cancel_leaves_transfer_and_issue_open() {
        let h = setup();
        let transfer = created_transfer(&h);
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();

        h.store.fail_next_append("disk full");
        let err = h.svc.cancel(transfer.doc_no(), &alice(), None).unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
        assert_eq!(h.svc.load(transfer.doc_no()).unwrap().status(), DocumentStatus::Created);
        assert_eq!(h.svc.load(&issue_no).unwrap().status(), DocumentStatus::New);

        let touched = h.svc.cancel(transfer.doc_no(), &alice(), None).unwrap();
        assert_eq!(touched, vec![transfer.doc_no().clone(), issue_no.clone()]);
        assert_eq!(h.svc.load(&issue_no).unwrap().status(), DocumentStatus::Cancelled);
    }

    #[test]
    fn cancelling_transfer_after_issue_completed_is_refused() {
        let h = setup();
        let transfer = created_transfer(&h);
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();
        complete_issue(&h, &issue_no, "A-01", 5);

        let err = h
            .svc
            .transition(transfer.doc_no(), DocumentStatus::Cancelled, &alice(), None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Guard(_)));
        assert_eq!(h.svc.load(transfer.doc_no()).unwrap().status(), DocumentStatus::Created);

        let report = h
            .svc
            .dry_run_guard(&GuardedAction::CancelDocument {
                doc_no: transfer.doc_no().clone(),
                actor: alice(),
            })
            .unwrap();
        assert!(!report.is_allowed());
    }

    #[test]
    fn transfer_moves_stock_between_warehouses() {
        let h = setup();
        let transfer = created_transfer(&h);
        let transfer_no = transfer.doc_no().clone();
        let issue_no = transfer.links().linked_gi_no.clone().unwrap();

        complete_issue(&h, &issue_no, "A-01", 5);
        assert_eq!(onhand(&h.ledger, "WH1", "A-01", "M1"), 5);

        let view = h.svc.transfer_view(&transfer_no).unwrap();
        assert_eq!(view.derived, DocumentStatus::Receiving);
        let receipt = view.receipt.unwrap();
        assert_eq!(receipt.kind(), DocumentKind::Receipt);
        assert_eq!(receipt.status(), DocumentStatus::New);
        assert_eq!(receipt.header().warehouse_code, "WH2");
        assert_eq!(receipt.lines()[0].qty_planned, 5);
        assert_eq!(receipt.lines()[0].location_code.as_deref(), Some("RECEIVING"));
        assert_eq!(receipt.lines()[0].fulfilled_qty(), 5);
        assert_eq!(
            view.issue.unwrap().links().linked_gr_no.as_ref(),
            Some(receipt.doc_no())
        );

        let receipt_no = receipt.doc_no().clone();
        step(&h.svc, &receipt_no, DocumentStatus::Receiving);
        step(&h.svc, &receipt_no, DocumentStatus::Submitted);
        step(&h.svc, &receipt_no, DocumentStatus::Completed);

        assert_eq!(onhand(&h.ledger, "WH2", "RECEIVING", "M1"), 5);
        let transfer = h.svc.load(&transfer_no).unwrap();
        assert_eq!(transfer.status(), DocumentStatus::Completed);
        assert_eq!(transfer.history().last().unwrap().actor.as_str(), "system");
        assert_eq!(h.svc.derived_status(&transfer_no).unwrap(), DocumentStatus::Completed);
    }

    #[test]
    fn count_freezes_system_qty_at_submit() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "A-01", "M1", 10);
        h.ledger.seed_untracked("WH1", "A-02", "M2", 4);

        let doc = create(&h.svc, count_header(CountScope::Full), vec![], None).unwrap();
        let doc_no = doc.doc_no().clone();
        let planned = h.svc.generate_count_plan(&doc_no, &CountSelector::default()).unwrap();
        assert_eq!(planned.count_lines().len(), 2);

        step(&h.svc, &doc_no, DocumentStatus::New);
        h.ledger.seed_untracked("WH1", "A-01", "M1", 5);
        step(&h.svc, &doc_no, DocumentStatus::Counting);

        h.svc.record_count(&doc_no, 1, 12, false).unwrap();
        let doc = h.svc.record_count(&doc_no, 2, 4, false).unwrap();
        assert_eq!(doc.count_lines()[0].system_qty, 10);
        assert_eq!(doc.count_lines()[0].variance(), Some(2));
        assert_eq!(doc.count_lines()[1].variance(), Some(0));

        let doc = h.svc.record_count(&doc_no, 1, 13, false).unwrap();
        assert!(doc.count_lines()[0].is_recounted);
        assert_eq!(doc.count_lines()[0].variance(), Some(3));

        step(&h.svc, &doc_no, DocumentStatus::Submitted);
        step(&h.svc, &doc_no, DocumentStatus::Completed);
        assert!(h.ledger.committed().is_empty());
    }

    #[test]
    fn regenerating_a_count_plan_needs_confirmation() {
        let h = setup();
        h.ledger.seed_untracked("WH1", "A-01", "M1", 10);
        h.ledger.seed_untracked("WH1", "A-02", "M2", 4);
        let doc = create(&h.svc, count_header(CountScope::Full), vec![], None).unwrap();
        let doc_no = doc.doc_no().clone();
        h.svc.generate_count_plan(&doc_no, &CountSelector::default()).unwrap();

        let err = h
            .svc
            .generate_count_plan(&doc_no, &CountSelector::default())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Guard(_)));

        let action = GuardedAction::RegenerateCountPlan {
            doc_no: doc_no.clone(),
            scope: CountScope::ByLocation,
            selector: CountSelector::locations(["A-02"]),
        };
        let report = h.svc.dry_run_guard(&action).unwrap();
        assert!(report.is_allowed());
        assert!(report.requires_confirmation);
        assert!(report.consequences[0].contains("2 existing count line(s)"));

        let declined = h.svc.confirm(&action, Decision::Decline).unwrap();
        assert!(declined.is_declined());
        assert_eq!(h.svc.load(&doc_no).unwrap().count_lines().len(), 2);

        let done = h.svc.confirm(&action, Decision::Proceed).unwrap();
        assert_eq!(done, ActionOutcome::Performed { touched: vec![doc_no.clone()] });
        let doc = h.svc.load(&doc_no).unwrap();
        assert_eq!(doc.count_lines().len(), 1);
        assert_eq!(doc.count_lines()[0].location_code, "A-02");
        assert_eq!(doc.header().detail, KindDetail::Count { scope: CountScope::ByLocation });
    }

    #[test]
    fn receipt_rejection_goes_through_a_guarded_action() {
        let h = setup();
        let doc = create(
            &h.svc,
            receipt_header(),
            vec![LineDraft::new("M1", TrackingType::None, 5).at("R-01")],
            Some(DocumentStatus::New),
        )
        .unwrap();
        let doc_no = doc.doc_no().clone();
        step(&h.svc, &doc_no, DocumentStatus::Receiving);
        let received = h.svc.allocate(&doc_no, 1, "R-01", &qty(7)).unwrap();
        assert_eq!(received.fulfilled_qty, 5);
        assert_eq!(received.warnings.len(), 1);
        step(&h.svc, &doc_no, DocumentStatus::Submitted);

        let blank = GuardedAction::RejectReceipt {
            doc_no: doc_no.clone(),
            actor: alice(),
            reason: " ".into(),
        };
        assert!(!h.svc.dry_run_guard(&blank).unwrap().is_allowed());
        assert!(matches!(
            h.svc.confirm(&blank, Decision::Proceed).unwrap_err(),
            ServiceError::Guard(_)
        ));

        let reject = GuardedAction::RejectReceipt {
            doc_no: doc_no.clone(),
            actor: alice(),
            reason: "damaged pallets".into(),
        };
        h.svc.confirm(&reject, Decision::Proceed).unwrap();

        let doc = h.svc.load(&doc_no).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Rejected);
        assert_eq!(doc.history().last().unwrap().note.as_deref(), Some("damaged pallets"));
        assert!(h.ledger.committed().is_empty());
    }

    #[test]
    fn master_record_with_stock_cannot_be_deactivated() {
        let h = setup();
        let busy = MasterRecord::Location {
            wh_code: "WH1".into(),
            loc_code: "A-01".into(),
        };
        let empty = MasterRecord::Location {
            wh_code: "WH1".into(),
            loc_code: "A-09".into(),
        };
        h.svc.master_data().register(busy.clone()).unwrap();
        h.svc.master_data().register(empty.clone()).unwrap();
        h.ledger.seed_untracked("WH1", "A-01", "M1", 3);

        let action = GuardedAction::DeactivateMasterRecord { record: busy.clone() };
        let report = h.svc.dry_run_guard(&action).unwrap();
        assert!(report.blocked_reason.unwrap().contains("3 unit(s) on hand"));
        assert!(matches!(
            h.svc.confirm(&action, Decision::Proceed).unwrap_err(),
            ServiceError::Guard(_)
        ));
        assert!(h.svc.master_data().is_active(&busy));

        let action = GuardedAction::DeactivateMasterRecord { record: empty.clone() };
        let outcome = h.svc.confirm(&action, Decision::Proceed).unwrap();
        assert!(!outcome.is_declined());
        assert!(!h.svc.master_data().is_active(&empty));

        let report = h.svc.dry_run_guard(&action).unwrap();
        assert!(report.blocked_reason.unwrap().contains("already inactive"));

        let unknown = GuardedAction::DeactivateMasterRecord {
            record: MasterRecord::Location {
                wh_code: "WH1".into(),
                loc_code: "Z-99".into(),
            },
        };
        let report = h.svc.dry_run_guard(&unknown).unwrap();
        assert!(report.blocked_reason.unwrap().contains("not registered"));
    }

    #[test]
    fn partner_with_open_documents_cannot_be_deactivated() {
        let h = setup();
        let partner = MasterRecord::Partner {
            partner_code: "C001".into(),
        };
        h.svc.master_data().register(partner.clone()).unwrap();
        create(&h.svc, issue_header(IssueMode::Summary), vec![], None).unwrap();

        let report = h
            .svc
            .dry_run_guard(&GuardedAction::DeactivateMasterRecord { record: partner })
            .unwrap();
        assert!(report.blocked_reason.unwrap().contains("1 active document(s)"));
    }

    #[test]
    fn accepted_changes_are_published() {
        let h = setup();
        let sub = h.bus.subscribe();

        let doc = create(
            &h.svc,
            receipt_header(),
            vec![LineDraft::new("M1", TrackingType::Serial, 1).at("R-01")],
            Some(DocumentStatus::New),
        )
        .unwrap();

        let envelopes = sub.drain();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec!["warehouse.document.created", "warehouse.document.status_changed"]
        );
        assert!(envelopes.iter().all(|e| e.stream_id() == doc.doc_no().as_str()));
        assert_eq!(envelopes[1].sequence_number(), 2);
        assert_eq!(doc.lines()[0].details, LineDetails::Serial(vec![]));
    }

    #[test]
    fn publishing_can_be_switched_off() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let mut settings = Settings::default();
        settings.bus.publish_events = false;
        let svc: Service = DocumentService::new(
            store.clone(),
            bus.clone(),
            Arc::new(InMemoryStockLedger::new()),
            settings,
        );
        let sub = bus.subscribe();

        let doc = create(&svc, receipt_header(), vec![], None).unwrap();

        assert!(sub.drain().is_empty());
        assert_eq!(store.load_stream(doc.doc_no().as_str()).unwrap().len(), 1);
    }
}
