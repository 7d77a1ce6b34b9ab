use super::{DiscardCounts, DiscardReason, Transform, TransformOutcome, TransformedBatch};
use crate::schema::{SILVER_ORDERS_V1, SchemaContract};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

static ORDER_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ORD\d+$").expect("Invalid order id regex"));

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+$").expect("Invalid email regex")
});

const SILVER_DATE_FORMAT: &str = "%m/%d/%Y";

/// Order document fields, kept as raw JSON so a mistyped field becomes a
/// discarded record rather than a failed file.
#[derive(Debug)]
struct RawOrder {
    id: Option<Value>,
    customer: Option<Value>,
    order_date: Option<Value>,
    items: Value,
}

impl RawOrder {
    fn from_document(document: Value) -> Option<Self> {
        let Value::Object(mut fields) = document else {
            return None;
        };
        Some(Self {
            id: fields.remove("_id"),
            customer: fields.remove("customer"),
            order_date: fields.remove("order_date"),
            items: fields.remove("items").unwrap_or(Value::Null),
        })
    }
}

#[derive(Debug)]
struct RawItem {
    product_name: Option<String>,
    quantity: Option<i64>,
    price: Option<f64>,
}

impl RawItem {
    fn from_value(item: &Value) -> Option<Self> {
        let fields = item.as_object()?;
        Some(Self {
            product_name: nullable(fields.get("product_name"), |v| v.as_str().map(str::to_string))?,
            quantity: nullable(fields.get("quantity"), Value::as_i64)?,
            price: nullable(fields.get("price"), Value::as_f64)?,
        })
    }
}

/// Missing and `null` are both absent; any other value must convert.
fn nullable<T>(value: Option<&Value>, convert: impl Fn(&Value) -> Option<T>) -> Option<Option<T>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(v) => convert(v).map(Some),
    }
}

/// Validated order-level fields, repeated on every item row.
#[derive(Debug)]
struct OrderHeader {
    order_id: String,
    customer_name: Option<String>,
    customer_email: String,
    order_date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    pub order_id: String,
    pub customer_name: Option<String>,
    pub customer_email: String,
    pub order_date: String,
    pub product_name: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<f64>,
}

type OrderKey = (
    String,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<u64>,
);

impl OrderRow {
    fn dedup_key(&self) -> OrderKey {
        (
            self.order_id.clone(),
            self.customer_name.clone(),
            self.customer_email.clone(),
            self.order_date.clone(),
            self.product_name.clone(),
            self.quantity,
            self.price.map(f64::to_bits),
        )
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

pub fn is_valid_order_id(id: &str) -> bool {
    ORDER_ID_REGEX.is_match(id)
}

/// Accepts RFC 3339 timestamps, ISO date-times without offset, and plain
/// ISO dates. Offset timestamps keep the calendar date of their own offset.
fn parse_order_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Order-level checks shared by every item of the order.
fn validate_order(order: &RawOrder) -> std::result::Result<OrderHeader, DiscardReason> {
    let order_id = order
        .id
        .as_ref()
        .and_then(Value::as_str)
        .filter(|id| is_valid_order_id(id))
        .ok_or(DiscardReason::InvalidOrderId)?;

    let customer = match &order.customer {
        None | Some(Value::Null) => None,
        Some(Value::Object(customer)) => Some(customer),
        Some(_) => return Err(DiscardReason::MalformedOrder),
    };

    let customer_email = customer
        .and_then(|c| c.get("email"))
        .and_then(Value::as_str)
        .filter(|email| is_valid_email(email))
        .ok_or(DiscardReason::InvalidEmail)?;

    let customer_name = nullable(customer.and_then(|c| c.get("name")), |v| {
        v.as_str().map(str::to_string)
    })
    .ok_or(DiscardReason::MalformedOrder)?;

    let order_date = order
        .order_date
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_order_date)
        .ok_or(DiscardReason::InvalidOrderDate)?;

    Ok(OrderHeader {
        order_id: order_id.to_string(),
        customer_name,
        customer_email: customer_email.to_string(),
        order_date: order_date.format(SILVER_DATE_FORMAT).to_string(),
    })
}

/// Bronze order documents (JSON) to one silver row per ordered item.
#[derive(Debug, Default)]
pub struct OrdersTransform;

impl OrdersTransform {
    pub fn new() -> Self {
        Self
    }

    /// Only unreadable JSON or a non-container top level fails the file.
    fn parse_orders(&self, key: &str, payload: &[u8]) -> Result<Vec<Value>> {
        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Transform(format!("{}: invalid JSON: {}", key, e)))?;

        match document {
            Value::Array(documents) => Ok(documents),
            object @ Value::Object(_) => Ok(vec![object]),
            other => Err(Error::Transform(format!(
                "{}: expected an order object or an array of orders, found {}",
                key,
                json_kind(&other)
            ))),
        }
    }

    /// Flattens and filters orders; bad records are counted, not raised.
    fn flatten(&self, documents: Vec<Value>) -> (Vec<OrderRow>, DiscardCounts) {
        let mut discarded = DiscardCounts::default();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for document in documents {
            let Some(order) = RawOrder::from_document(document) else {
                discarded.record(DiscardReason::MalformedOrder);
                continue;
            };
            let items: &[Value] = match &order.items {
                Value::Null => &[],
                Value::Array(items) => items,
                _ => {
                    discarded.record(DiscardReason::MalformedOrder);
                    continue;
                }
            };

            let header = match validate_order(&order) {
                Ok(header) => header,
                Err(reason) => {
                    for _ in items {
                        discarded.record(reason);
                    }
                    continue;
                }
            };

            for item in items {
                let Some(item) = RawItem::from_value(item) else {
                    discarded.record(DiscardReason::InvalidItem);
                    continue;
                };
                let row = OrderRow {
                    order_id: header.order_id.clone(),
                    customer_name: header.customer_name.clone(),
                    customer_email: header.customer_email.clone(),
                    order_date: header.order_date.clone(),
                    product_name: item.product_name,
                    quantity: item.quantity,
                    price: item.price,
                };
                if seen.insert(row.dedup_key()) {
                    rows.push(row);
                } else {
                    discarded.record(DiscardReason::DuplicateRow);
                }
            }
        }

        (rows, discarded)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Transform for OrdersTransform {
    fn name(&self) -> &'static str {
        "orders"
    }

    fn default_suffix(&self) -> &'static str {
        ".json"
    }

    fn output_contract(&self) -> &'static SchemaContract {
        &SILVER_ORDERS_V1
    }

    fn transform(&self, key: &str, payload: &[u8]) -> Result<TransformOutcome> {
        let orders = self.parse_orders(key, payload)?;
        let order_count = orders.len();
        let (rows, discarded) = self.flatten(orders);

        debug!(
            key,
            orders = order_count,
            rows = rows.len(),
            %discarded,
            "Flattened orders"
        );

        let mut outcome = TransformOutcome {
            batches: Vec::new(),
            discarded,
        };
        if !rows.is_empty() {
            outcome.batches.push(TransformedBatch {
                source_key: key.to_string(),
                chunk: 0,
                batch: to_record_batch(&rows)?,
            });
        }
        Ok(outcome)
    }
}

fn to_record_batch(rows: &[OrderRow]) -> Result<RecordBatch> {
    let schema = Arc::new(SILVER_ORDERS_V1.arrow_schema());
    let columns: Vec<ArrayRef> = vec![
        Arc::new(rows.iter().map(|r| Some(r.order_id.as_str())).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.customer_name.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| Some(r.customer_email.as_str())).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| Some(r.order_date.as_str())).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.product_name.as_deref()).collect::<StringArray>()),
        Arc::new(rows.iter().map(|r| r.quantity).collect::<Int64Array>()),
        Arc::new(rows.iter().map(|r| r.price).collect::<Float64Array>()),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}
