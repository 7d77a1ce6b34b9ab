use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_glue::Client as GlueClient;
use aws_sdk_glue::config::Region;
use common::config::Settings;
use common::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Starts the downstream load job and returns its run id.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn start_job(&self, job_name: &str, arguments: &BTreeMap<String, String>)
    -> Result<String>;
}

pub struct GlueJobLauncher {
    client: GlueClient,
}

impl GlueJobLauncher {
    pub async fn new(region: &str) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: GlueClient::new(&shared),
        }
    }
}

#[async_trait]
impl JobLauncher for GlueJobLauncher {
    async fn start_job(
        &self,
        job_name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut request = self.client.start_job_run().job_name(job_name);
        for (name, value) in arguments {
            request = request.arguments(name, value);
        }

        let output = request.send().await?;
        output
            .job_run_id()
            .map(str::to_string)
            .ok_or_else(|| Error::AwsSdk(format!("StartJobRun for {} returned no run id", job_name)))
    }
}

/// Runs the warehouse load in-process on the tokio runtime. The run id is
/// returned as soon as the task is spawned; failures are only logged.
pub struct LocalJobLauncher {
    settings: Arc<Settings>,
}

impl LocalJobLauncher {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

fn required<'a>(arguments: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidInput(format!("missing job argument {}", name)))
}

#[async_trait]
impl JobLauncher for LocalJobLauncher {
    async fn start_job(
        &self,
        job_name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<String> {
        let bucket = required(arguments, "--input_bucket")?.to_string();
        let key = required(arguments, "--input_key")?.to_string();
        let job_run_id = format!("local-{}", Uuid::new_v4());

        let settings = self.settings.clone();
        let run_id = job_run_id.clone();
        let job = job_name.to_string();
        tokio::spawn(async move {
            match etl::silver_to_warehouse(&settings, &bucket, &key).await {
                Ok(receipt) => info!(
                    job = %job,
                    job_run_id = %run_id,
                    statement_id = %receipt.copy_statement_id,
                    "Local job finished"
                ),
                Err(e) => error!(job = %job, job_run_id = %run_id, error = %e, "Local job failed"),
            }
        });

        Ok(job_run_id)
    }
}
