//! Incremental stage runner: discover new bronze files, transform and
//! write each one, then record them in the processed log.
//!
//! The log is committed once, after every output object has been written.
//! A run that fails part way leaves the log untouched, so the next run
//! offers the same files again (at-least-once delivery of outputs).

use crate::storage::ObjectStorage;
use crate::tracker::{self, CommitMode};
use crate::transform::{DiscardCounts, Transform};
use crate::utils::paths::{OutputPathBuilder, file_stem};
use crate::writer::encode_batch;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use common::config::{OnTransformError, OutputFormat, StageSettings};
use common::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub input_prefix: String,
    pub suffix: String,
    pub output_folder: String,
    /// Fixed output name stem. `None` names outputs after the source file.
    pub output_stem: Option<String>,
    pub log_key: String,
    pub output_format: OutputFormat,
    pub on_transform_error: OnTransformError,
    pub commit_mode: CommitMode,
}

impl StageOptions {
    pub fn from_settings(settings: &StageSettings, transform: &dyn Transform) -> Self {
        Self {
            input_prefix: settings.input_prefix.clone(),
            suffix: settings
                .suffix
                .clone()
                .unwrap_or_else(|| transform.default_suffix().to_string()),
            output_folder: settings.output_folder.clone(),
            output_stem: settings.output_stem.clone(),
            log_key: settings.log_key.clone(),
            output_format: settings.output_format,
            on_transform_error: settings.on_transform_error,
            commit_mode: if settings.conditional_commit {
                CommitMode::Conditional
            } else {
                CommitMode::Overwrite
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub discovered: usize,
    pub ingested: Vec<String>,
    /// Listed but gone by the time it was fetched.
    pub skipped: Vec<String>,
    /// Transform failed; left out of the log for a later run.
    pub failed: Vec<FailedFile>,
    pub outputs: Vec<String>,
    pub rows_written: usize,
    pub rows_discarded: DiscardCounts,
    /// Entries in the processed log after the run.
    pub processed_total: usize,
}

pub struct IncrementalStage<T: Transform> {
    source: Arc<dyn ObjectStorage>,
    target: Arc<dyn ObjectStorage>,
    transform: T,
    options: StageOptions,
}

impl<T: Transform> IncrementalStage<T> {
    pub fn new(
        source: Arc<dyn ObjectStorage>,
        target: Arc<dyn ObjectStorage>,
        transform: T,
        options: StageOptions,
    ) -> Self {
        Self {
            source,
            target,
            transform,
            options,
        }
    }

    fn output_paths(
        &self,
        source_key: &str,
        started: DateTime<Utc>,
        run_id: &str,
    ) -> OutputPathBuilder {
        let stem = self
            .options
            .output_stem
            .as_deref()
            .unwrap_or_else(|| file_stem(source_key));
        OutputPathBuilder::new(
            &self.options.output_folder,
            stem,
            self.options.output_format.extension(),
        )
        .with_timestamp(started)
        .with_run_id(run_id)
    }

    async fn write_output(&self, key: &str, batch: &RecordBatch, source_key: &str) -> Result<()> {
        let bytes = encode_batch(
            batch,
            self.options.output_format,
            self.transform.output_contract(),
            source_key,
        )?;
        self.target.put_object(key, &bytes).await?;
        info!(
            bucket = self.target.bucket(),
            key,
            rows = batch.num_rows(),
            "Output written"
        );
        Ok(())
    }

    pub async fn run(&self) -> Result<RunReport> {
        let options = &self.options;
        if options.commit_mode == CommitMode::Conditional
            && !self.target.supports_conditional_update()
        {
            return Err(Error::InvalidInput(format!(
                "bucket {} does not support conditional log commits",
                self.target.bucket()
            )));
        }

        let started = Utc::now();
        let run_id = new_run_id();
        info!(
            stage = self.transform.name(),
            source = self.source.bucket(),
            target = self.target.bucket(),
            prefix = %options.input_prefix,
            run_id = %run_id,
            "Starting incremental run"
        );

        let processed = tracker::load_processed_set(self.target.as_ref(), &options.log_key).await?;
        let candidates = tracker::discover_new_files(
            self.source.as_ref(),
            &options.input_prefix,
            &processed,
            &options.suffix,
        )
        .await?;

        let mut report = RunReport {
            discovered: candidates.len(),
            processed_total: processed.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            info!(stage = self.transform.name(), "No new files to process");
            return Ok(report);
        }

        let mut newly_ingested = BTreeSet::new();
        let mut seq = 0;

        for candidate in &candidates {
            let key = candidate.key.as_str();

            let payload = match candidate.fetch(self.source.as_ref()).await {
                Ok(payload) => payload,
                Err(e) if e.is_not_found() => {
                    warn!(key, "Source file disappeared after listing, skipping");
                    report.skipped.push(key.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };

            let outcome = match self.transform.transform(key, &payload) {
                Ok(outcome) => outcome,
                Err(e) => match options.on_transform_error {
                    OnTransformError::Skip => {
                        error!(key, error = %e, "Transform failed, file left for a later run");
                        report.failed.push(FailedFile {
                            key: key.to_string(),
                            error: e.to_string(),
                        });
                        continue;
                    }
                    OnTransformError::Abort => {
                        error!(key, error = %e, "Transform failed, aborting run");
                        return Err(e);
                    }
                },
            };

            let paths = self.output_paths(key, started, &run_id);
            for batch in &outcome.batches {
                seq += 1;
                let output_key = paths.build_key(seq);
                self.write_output(&output_key, &batch.batch, key).await?;
                report.outputs.push(output_key);
                report.rows_written += batch.num_rows();
            }

            info!(
                key,
                rows = outcome.rows(),
                discarded = %outcome.discarded,
                "File processed"
            );
            report.rows_discarded.merge(&outcome.discarded);
            report.ingested.push(key.to_string());
            newly_ingested.insert(key.to_string());
        }

        if !newly_ingested.is_empty() {
            let updated = tracker::commit(
                self.target.as_ref(),
                &options.log_key,
                &processed,
                &newly_ingested,
                options.commit_mode,
            )
            .await?;
            report.processed_total = updated.len();
        }

        info!(
            stage = self.transform.name(),
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            outputs = report.outputs.len(),
            rows = report.rows_written,
            discarded = report.rows_discarded.total(),
            "Incremental run finished"
        );
        Ok(report)
    }

    /// Transforms one named source object into one output object. The
    /// processed log is neither read nor written.
    pub async fn run_single(&self, input_key: &str, output_key: Option<&str>) -> Result<RunReport> {
        info!(
            stage = self.transform.name(),
            bucket = self.source.bucket(),
            key = input_key,
            "Starting single-file run"
        );

        let payload = self.source.get_object(input_key).await?;
        let outcome = self.transform.transform(input_key, &payload)?;

        let output_key = match output_key {
            Some(key) if !key.trim().is_empty() => key.to_string(),
            Some(_) => {
                return Err(Error::InvalidInput("output key must not be empty".to_string()));
            }
            None => self
                .output_paths(input_key, Utc::now(), &new_run_id())
                .build_key(1),
        };

        let mut report = RunReport {
            discovered: 1,
            ingested: vec![input_key.to_string()],
            rows_discarded: outcome.discarded.clone(),
            ..Default::default()
        };

        let schema = Arc::new(self.transform.output_contract().arrow_schema());
        let batch = match outcome.batches.as_slice() {
            [] => {
                info!(
                    key = input_key,
                    discarded = %outcome.discarded,
                    "No valid rows, nothing written"
                );
                return Ok(report);
            }
            [single] => single.batch.clone(),
            many => concat_batches(&schema, many.iter().map(|b| &b.batch))?,
        };
        if batch.num_rows() == 0 {
            info!(key = input_key, "No valid rows, nothing written");
            return Ok(report);
        }

        self.write_output(&output_key, &batch, input_key).await?;

        report.rows_written = batch.num_rows();
        report.outputs.push(output_key);
        Ok(report)
    }
}

/// Short per-run token that keeps output names from two runs apart.
fn new_run_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
