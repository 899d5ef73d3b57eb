//! Document number allocation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};

use forgewms_core::{DocumentNo, DocumentPrefix, DomainError};

/// Hands out `{PREFIX}-{YYYYMM}-{seq}` numbers.
pub trait NumberSequence: Send + Sync {
    fn next(&self, prefix: DocumentPrefix, date: NaiveDate) -> Result<DocumentNo, DomainError>;
}

/// Per (prefix, month) counters kept in memory; sequences restart at 1 each
/// month.
#[derive(Debug)]
pub struct InMemoryNumberSequence {
    width: usize,
    counters: Mutex<HashMap<(DocumentPrefix, i32, u32), u32>>,
}

impl InMemoryNumberSequence {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl NumberSequence for InMemoryNumberSequence {
    fn next(&self, prefix: DocumentPrefix, date: NaiveDate) -> Result<DocumentNo, DomainError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| DomainError::invariant("number sequence lock poisoned"))?;
        let seq = counters
            .entry((prefix, date.year(), date.month()))
            .or_insert(0);

        let max = 10u64.pow(self.width as u32) - 1;
        if u64::from(*seq) >= max {
            return Err(DomainError::conflict(format!(
                "{prefix} sequence for {}-{:02} is exhausted",
                date.year(),
                date.month()
            )));
        }
        *seq += 1;

        Ok(DocumentNo::compose(prefix, date, *seq, self.width))
    }
}
