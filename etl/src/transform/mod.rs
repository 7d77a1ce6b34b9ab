pub mod orders;
pub mod sales;

pub use orders::OrdersTransform;
pub use sales::SalesTransform;

use crate::schema::SchemaContract;
use arrow::record_batch::RecordBatch;
use common::Result;
use std::collections::BTreeMap;
use std::fmt;

/// Cleaned rows from one chunk of one source file.
#[derive(Debug, Clone)]
pub struct TransformedBatch {
    pub source_key: String,
    pub chunk: usize,
    pub batch: RecordBatch,
}

impl TransformedBatch {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Why a record was left out of the output. Dropping a record is a
/// data-quality decision, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscardReason {
    DuplicateRow,
    InvalidOrderId,
    InvalidEmail,
    InvalidOrderDate,
    /// An item that is not an object, or has a field of the wrong JSON type.
    InvalidItem,
    /// An order that is not an object, or whose customer or items have the
    /// wrong shape.
    MalformedOrder,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateRow => "duplicate_row",
            Self::InvalidOrderId => "invalid_order_id",
            Self::InvalidEmail => "invalid_email",
            Self::InvalidOrderDate => "invalid_order_date",
            Self::InvalidItem => "invalid_item",
            Self::MalformedOrder => "malformed_order",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscardCounts(BTreeMap<DiscardReason, usize>);

impl DiscardCounts {
    pub fn record(&mut self, reason: DiscardReason) {
        *self.0.entry(reason).or_default() += 1;
    }

    pub fn get(&self, reason: DiscardReason) -> usize {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn merge(&mut self, other: &DiscardCounts) {
        for (reason, count) in &other.0 {
            *self.0.entry(*reason).or_default() += count;
        }
    }
}

impl fmt::Display for DiscardCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(reason, count)| format!("{}={}", reason, count))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[derive(Debug, Default)]
pub struct TransformOutcome {
    pub batches: Vec<TransformedBatch>,
    pub discarded: DiscardCounts,
}

impl TransformOutcome {
    pub fn rows(&self) -> usize {
        self.batches.iter().map(TransformedBatch::num_rows).sum()
    }
}

/// Stage-specific cleaning of one source file.
///
/// Bad records are dropped and counted in `TransformOutcome::discarded`.
/// An `Err` means the file as a whole could not be read.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suffix of source keys this transform reads, e.g. `.csv`.
    fn default_suffix(&self) -> &'static str;

    fn output_contract(&self) -> &'static SchemaContract;

    fn transform(&self, key: &str, payload: &[u8]) -> Result<TransformOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_counts_merge_and_total() {
        let mut a = DiscardCounts::default();
        a.record(DiscardReason::InvalidEmail);
        a.record(DiscardReason::InvalidEmail);

        let mut b = DiscardCounts::default();
        b.record(DiscardReason::DuplicateRow);
        b.record(DiscardReason::InvalidEmail);

        a.merge(&b);
        assert_eq!(a.get(DiscardReason::InvalidEmail), 3);
        assert_eq!(a.get(DiscardReason::InvalidOrderId), 0);
        assert_eq!(a.total(), 4);
        assert_eq!(a.to_string(), "{duplicate_row=1, invalid_email=3}");
    }
}
