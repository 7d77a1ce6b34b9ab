use super::{DiscardCounts, DiscardReason, Transform, TransformOutcome, TransformedBatch};
use crate::schema::{BRONZE_SALES_V1, SILVER_SALES_V1, SchemaContract};
use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use common::{Error, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

const EXPENSIVE_ABOVE: f64 = 100.0;
const BRONZE_DATE_FORMAT: &str = "%d/%m/%Y";
const SILVER_DATE_FORMAT: &str = "%Y/%m/%d";

#[derive(Debug, Clone, Deserialize)]
struct RawSale {
    order_id: Option<String>,
    product_name: Option<String>,
    category: Option<String>,
    price: Option<f64>,
    date: Option<String>,
    source: Option<String>,
}

type SaleKey = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<u64>,
    Option<String>,
    Option<String>,
);

impl RawSale {
    fn dedup_key(&self) -> SaleKey {
        (
            self.order_id.clone(),
            self.product_name.clone(),
            self.category.clone(),
            self.price.map(f64::to_bits),
            self.date.clone(),
            self.source.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceCategory {
    Expensive,
    Affordable,
}

impl PriceCategory {
    /// Unknown prices count as affordable.
    pub fn for_price(price: Option<f64>) -> Self {
        match price {
            Some(p) if p > EXPENSIVE_ABOVE => Self::Expensive,
            _ => Self::Affordable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expensive => "Expensive",
            Self::Affordable => "Affordable",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SaleRow {
    order_id: Option<String>,
    product_name: Option<String>,
    category: Option<String>,
    price: Option<f64>,
    date: Option<String>,
    source: Option<String>,
    price_category: PriceCategory,
}

/// Bronze sales CSV to silver.
///
/// Works chunk by chunk like the upstream export tooling: duplicates and
/// category price means are resolved within a chunk, not across the file.
pub struct SalesTransform {
    chunk_size: usize,
}

impl SalesTransform {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    fn read_records(&self, key: &str, payload: &[u8]) -> Result<Vec<RawSale>> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_reader(payload);

        let headers = reader.headers()?.clone();
        BRONZE_SALES_V1
            .check_header(headers.iter())
            .map_err(|e| Error::SchemaMismatch(format!("{}: {}", key, e)))?;

        reader
            .deserialize::<RawSale>()
            .enumerate()
            .map(|(i, record)| {
                record.map_err(|e| Error::Transform(format!("{}: record {}: {}", key, i + 1, e)))
            })
            .collect()
    }
}

impl Default for SalesTransform {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Transform for SalesTransform {
    fn name(&self) -> &'static str {
        "sales"
    }

    fn default_suffix(&self) -> &'static str {
        ".csv"
    }

    fn output_contract(&self) -> &'static SchemaContract {
        &SILVER_SALES_V1
    }

    fn transform(&self, key: &str, payload: &[u8]) -> Result<TransformOutcome> {
        let records = self.read_records(key, payload)?;
        let mut outcome = TransformOutcome::default();

        for (chunk, rows) in records.chunks(self.chunk_size).enumerate() {
            let (cleaned, discarded) = clean_chunk(key, rows)?;
            debug!(
                key,
                chunk,
                rows = cleaned.len(),
                discarded = discarded.total(),
                "Cleaned sales chunk"
            );
            outcome.discarded.merge(&discarded);

            if cleaned.is_empty() {
                continue;
            }
            outcome.batches.push(TransformedBatch {
                source_key: key.to_string(),
                chunk,
                batch: to_record_batch(&cleaned)?,
            });
        }

        Ok(outcome)
    }
}

fn clean_chunk(key: &str, rows: &[RawSale]) -> Result<(Vec<SaleRow>, DiscardCounts)> {
    let mut discarded = DiscardCounts::default();
    let mut seen = HashSet::new();
    let unique: Vec<&RawSale> = rows
        .iter()
        .filter(|row| {
            let first = seen.insert(row.dedup_key());
            if !first {
                discarded.record(DiscardReason::DuplicateRow);
            }
            first
        })
        .collect();

    // Mean price per original category, over rows that have a price.
    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for row in &unique {
        if let (Some(category), Some(price)) = (row.category.as_deref(), row.price) {
            let entry = totals.entry(category).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
        }
    }

    let mut cleaned = Vec::with_capacity(unique.len());
    for row in unique {
        let price = row.price.or_else(|| {
            row.category
                .as_deref()
                .and_then(|c| totals.get(c))
                .map(|(sum, count)| sum / *count as f64)
        });

        let date = match row.date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(reformat_date(value).ok_or_else(|| {
                Error::Transform(format!(
                    "{}: order {}: date {:?} does not match DD/MM/YYYY",
                    key,
                    row.order_id.as_deref().unwrap_or("?"),
                    value
                ))
            })?),
        };

        cleaned.push(SaleRow {
            order_id: row.order_id.clone(),
            product_name: row.product_name.clone(),
            category: row
                .category
                .as_deref()
                .and_then(|c| c.split_whitespace().next())
                .map(str::to_string),
            price,
            date,
            source: row.source.clone(),
            price_category: PriceCategory::for_price(price),
        });
    }

    Ok((cleaned, discarded))
}

fn reformat_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value, BRONZE_DATE_FORMAT)
        .ok()
        .map(|d| d.format(SILVER_DATE_FORMAT).to_string())
}

fn to_record_batch(rows: &[SaleRow]) -> Result<RecordBatch> {
    let schema = Arc::new(SILVER_SALES_V1.arrow_schema());
    let columns: Vec<ArrayRef> = vec![
        Arc::new(rows.iter().map(|r| r.order_id.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.product_name.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.category.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.price).collect::<Float64Array>()),
        Arc::new(rows.iter().map(|r| r.date.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.source.as_deref()).collect::<StringArray>()),
        Arc::new(
            rows.iter()
                .map(|r| Some(r.price_category.as_str()))
                .collect::<StringArray>(),
        ),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
