//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Document number prefix, one per document kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentPrefix {
    /// Goods Receipt.
    #[serde(rename = "GR")]
    Gr,
    /// Goods Issue.
    #[serde(rename = "GI")]
    Gi,
    /// Goods Transfer.
    #[serde(rename = "GT")]
    Gt,
    /// Inventory Count.
    #[serde(rename = "IC")]
    Ic,
}

impl DocumentPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentPrefix::Gr => "GR",
            DocumentPrefix::Gi => "GI",
            DocumentPrefix::Gt => "GT",
            DocumentPrefix::Ic => "IC",
        }
    }
}

impl FromStr for DocumentPrefix {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GR" => Ok(DocumentPrefix::Gr),
            "GI" => Ok(DocumentPrefix::Gi),
            "GT" => Ok(DocumentPrefix::Gt),
            "IC" => Ok(DocumentPrefix::Ic),
            other => Err(DomainError::invalid_id(format!(
                "DocumentNo: unknown prefix {other:?}"
            ))),
        }
    }
}

impl core::fmt::Display for DocumentPrefix {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document number: `{PREFIX}-{YYYYMM}-{seq}`.
///
/// Generated once at creation time and never changed afterwards. Documents
/// reference each other only through these numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentNo(String);

impl DocumentNo {
    /// Compose a number for `prefix` in the month of `date`, zero-padding
    /// `seq` to `width` digits.
    pub fn compose(prefix: DocumentPrefix, date: NaiveDate, seq: u32, width: usize) -> Self {
        Self(format!(
            "{}-{:04}{:02}-{:0width$}",
            prefix.as_str(),
            date.year(),
            date.month(),
            seq,
            width = width
        ))
    }

    pub fn prefix(&self) -> DocumentPrefix {
        // Validated at construction.
        match &self.0[..2] {
            "GR" => DocumentPrefix::Gr,
            "GI" => DocumentPrefix::Gi,
            "GT" => DocumentPrefix::Gt,
            _ => DocumentPrefix::Ic,
        }
    }

    /// The `YYYYMM` period segment.
    pub fn period(&self) -> &str {
        &self.0[3..9]
    }

    pub fn sequence(&self) -> u32 {
        self.0[10..].parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DocumentNo {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (Some(prefix), Some(period), Some(seq)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::invalid_id(format!(
                "DocumentNo: expected PREFIX-YYYYMM-SEQ, got {s:?}"
            )));
        };

        DocumentPrefix::from_str(prefix)?;

        let month_ok = period.len() == 6
            && period.bytes().all(|b| b.is_ascii_digit())
            && matches!(period[4..].parse::<u32>(), Ok(1..=12));
        if !month_ok {
            return Err(DomainError::invalid_id(format!(
                "DocumentNo: invalid period {period:?}"
            )));
        }

        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "DocumentNo: invalid sequence {seq:?}"
            )));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for DocumentNo {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl From<DocumentNo> for String {
    fn from(value: DocumentNo) -> Self {
        value.0
    }
}

impl core::fmt::Display for DocumentNo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of whoever drives a transition (a user login or an automation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ActorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
