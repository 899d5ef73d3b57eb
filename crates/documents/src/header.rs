use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use forgewms_core::FieldViolation;

use crate::status::DocumentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptType {
    Purchase,
    Return,
    Transfer,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    Sales,
    Return,
    Transfer,
    Internal,
}

/// Issue allocation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueMode {
    /// One location per line.
    Summary,
    /// Location resolved per detail; a line may span locations.
    Detail,
}

/// Which on-hand records a count plan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountScope {
    Full,
    ByLocation,
    ByItem,
}

/// The other party of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code")]
pub enum Counterpart {
    Partner(String),
    Warehouse(String),
}

/// Kind-specific header fields; the variant fixes the document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum KindDetail {
    Receipt { receipt_type: ReceiptType },
    Issue { issue_type: IssueType, mode: IssueMode },
    Transfer { to_warehouse_code: String },
    Count { scope: CountScope },
}

impl KindDetail {
    pub fn kind(&self) -> DocumentKind {
        match self {
            KindDetail::Receipt { .. } => DocumentKind::Receipt,
            KindDetail::Issue { .. } => DocumentKind::Issue,
            KindDetail::Transfer { .. } => DocumentKind::Transfer,
            KindDetail::Count { .. } => DocumentKind::Count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    /// Warehouse the document operates in (receiving, source or counted).
    pub warehouse_code: String,
    pub counterpart: Option<Counterpart>,
    pub document_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub reference_no: Option<String>,
    pub note: Option<String>,
    pub detail: KindDetail,
}

impl DocumentHeader {
    pub fn kind(&self) -> DocumentKind {
        self.detail.kind()
    }

    pub fn issue_mode(&self) -> Option<IssueMode> {
        match &self.detail {
            KindDetail::Issue { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    pub fn partner_code(&self) -> Option<&str> {
        match &self.counterpart {
            Some(Counterpart::Partner(code)) => Some(code),
            _ => None,
        }
    }

    /// Required-field checks applied on every submit.
    pub fn violations(&self) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        if self.warehouse_code.trim().is_empty() {
            out.push(FieldViolation::new("header.warehouse_code", "warehouse is required"));
        }

        if let Some(expected) = self.expected_date {
            if expected < self.document_date {
                out.push(FieldViolation::new(
                    "header.expected_date",
                    "expected date cannot precede the document date",
                ));
            }
        }

        match &self.detail {
            KindDetail::Receipt { receipt_type } => match receipt_type {
                ReceiptType::Purchase | ReceiptType::Return => {
                    self.require_partner(&mut out);
                }
                ReceiptType::Transfer => self.require_warehouse_counterpart(&mut out),
                ReceiptType::Other => {}
            },
            KindDetail::Issue { issue_type, .. } => match issue_type {
                IssueType::Sales | IssueType::Return => self.require_partner(&mut out),
                IssueType::Transfer => self.require_warehouse_counterpart(&mut out),
                IssueType::Internal => {}
            },
            KindDetail::Transfer { to_warehouse_code } => {
                if to_warehouse_code.trim().is_empty() {
                    out.push(FieldViolation::new(
                        "header.to_warehouse_code",
                        "destination warehouse is required",
                    ));
                } else if to_warehouse_code == &self.warehouse_code {
                    out.push(FieldViolation::new(
                        "header.to_warehouse_code",
                        "destination must differ from the source warehouse",
                    ));
                }
            }
            KindDetail::Count { .. } => {}
        }

        out
    }

    fn require_partner(&self, out: &mut Vec<FieldViolation>) {
        match &self.counterpart {
            Some(Counterpart::Partner(code)) if !code.trim().is_empty() => {}
            _ => out.push(FieldViolation::new("header.counterpart", "partner is required")),
        }
    }

    fn require_warehouse_counterpart(&self, out: &mut Vec<FieldViolation>) {
        match &self.counterpart {
            Some(Counterpart::Warehouse(code)) if !code.trim().is_empty() => {}
            _ => out.push(FieldViolation::new(
                "header.counterpart",
                "counterpart warehouse is required",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(detail: KindDetail, counterpart: Option<Counterpart>) -> DocumentHeader {
        DocumentHeader {
            warehouse_code: "WH1".into(),
            counterpart,
            document_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            expected_date: None,
            reference_no: None,
            note: None,
            detail,
        }
    }

    #[test]
    fn purchase_receipt_requires_partner() {
        let h = header(
            KindDetail::Receipt {
                receipt_type: ReceiptType::Purchase,
            },
            None,
        );
        let v = h.violations();
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field, "header.counterpart");
    }

    #[test]
    fn transfer_destination_must_differ() {
        let h = header(
            KindDetail::Transfer {
                to_warehouse_code: "WH1".into(),
            },
            None,
        );
        assert_eq!(h.violations()[0].field, "header.to_warehouse_code");
    }

    #[test]
    fn internal_issue_needs_only_warehouse() {
        let mut h = header(
            KindDetail::Issue {
                issue_type: IssueType::Internal,
                mode: IssueMode::Summary,
            },
            None,
        );
        assert!(h.violations().is_empty());
        h.warehouse_code = " ".into();
        assert_eq!(h.violations()[0].field, "header.warehouse_code");
    }
}
