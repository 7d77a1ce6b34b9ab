use chrono::{DateTime, Utc};
use common::{Error, Result};
use url::Url;

/// Builds output object keys of the form
/// `<folder>/<stem>_<YYYYmmdd_HHMMSS>_<run>_<seq>.<ext>`.
///
/// `run` identifies one stage run, so two runs started within the same
/// second never produce the same key.
pub struct OutputPathBuilder {
    folder: String,
    stem: String,
    extension: String,
    timestamp: DateTime<Utc>,
    run_id: Option<String>,
}

impl OutputPathBuilder {
    pub fn new(folder: &str, stem: &str, extension: &str) -> Self {
        Self {
            folder: folder.trim_end_matches('/').to_string(),
            stem: stem.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            timestamp: Utc::now(),
            run_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn build_file_name(&self, seq: usize) -> String {
        let timestamp = self.timestamp.format("%Y%m%d_%H%M%S");
        match &self.run_id {
            Some(run_id) => format!(
                "{}_{}_{}_{:04}.{}",
                self.stem, timestamp, run_id, seq, self.extension
            ),
            None => format!("{}_{}_{:04}.{}", self.stem, timestamp, seq, self.extension),
        }
    }

    pub fn build_key(&self, seq: usize) -> String {
        if self.folder.is_empty() {
            self.build_file_name(seq)
        } else {
            format!("{}/{}", self.folder, self.build_file_name(seq))
        }
    }
}

/// File name without directory or extension: `a/b/sales.csv` -> `sales`.
pub fn file_stem(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key.trim_start_matches('/'))
}

/// Splits `s3://bucket/key` into bucket and key.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let parsed = Url::parse(uri)?;

    if parsed.scheme() != "s3" {
        return Err(Error::InvalidUri(format!(
            "Path '{}' is not an S3 path (expected scheme 's3')",
            uri
        )));
    }

    let bucket = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::InvalidUri(format!("S3 path '{}' has no bucket", uri)))?
        .to_string();

    let key = parsed.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(Error::InvalidUri(format!(
            "S3 path '{}' results in an empty object key",
            uri
        )));
    }

    Ok((bucket, key))
}
