//! Storage-event notifications as delivered by S3 and MinIO.

use common::{Error, Result};
use serde::Deserialize;
use serde_json::error::Category;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3Object {
    /// URL-encoded, as sent by the storage service.
    pub key: String,
}

/// The object that triggered the event, with its key decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPayload {
    pub bucket: String,
    pub key: String,
}

impl TriggerPayload {
    /// Arguments handed to the load job.
    pub fn job_arguments(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("--input_bucket".to_string(), self.bucket.clone()),
            ("--input_key".to_string(), self.key.clone()),
        ])
    }
}

/// Object keys in notifications are form-encoded: `+` is a space.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| Error::InvalidEvent(format!("object key {:?} is not valid UTF-8: {}", raw, e)))
}

/// Only the first record is used; notifications for a single PUT carry one.
pub fn parse_event(body: &[u8]) -> Result<TriggerPayload> {
    let event: S3Event = serde_json::from_slice(body).map_err(|e| match e.classify() {
        Category::Data => Error::InvalidEvent(format!("unexpected event structure: {}", e)),
        _ => Error::InvalidEvent(format!("body is not valid JSON: {}", e)),
    })?;

    let record = event
        .records
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidEvent("event contains no records".to_string()))?;

    let bucket = record.s3.bucket.name;
    let key = decode_object_key(&record.s3.object.key)?;

    if bucket.is_empty() || key.is_empty() {
        return Err(Error::InvalidEvent(
            "bucket name and object key must not be empty".to_string(),
        ));
    }

    Ok(TriggerPayload { bucket, key })
}
