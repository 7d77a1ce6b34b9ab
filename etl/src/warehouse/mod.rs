//! Submits silver CSV objects to the warehouse with a bulk `COPY`.
//!
//! Statements are submitted and not awaited: the receipt carries the
//! statement ids, not a load result.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_redshiftdata::Client as RedshiftDataClient;
use aws_sdk_redshiftdata::config::Region;
use crate::utils::paths::parse_s3_uri;
use common::config::WarehouseSettings;
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("Invalid identifier regex"));

/// Runs one SQL statement and returns the warehouse's statement id.
#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReceipt {
    pub table: String,
    pub source_path: String,
    pub create_statement_id: Option<String>,
    pub copy_statement_id: String,
}

fn validate_identifier(table: &str) -> Result<()> {
    if IDENTIFIER_REGEX.is_match(table) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "'{}' is not a valid table name",
            table
        )))
    }
}

fn validate_literal(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('\'') {
        return Err(Error::InvalidInput(format!(
            "{} must be non-empty and must not contain a single quote",
            name
        )));
    }
    Ok(())
}

pub fn create_table_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         order_id VARCHAR(50), \
         product_name VARCHAR(100), \
         category VARCHAR(50), \
         price FLOAT, \
         order_date DATE, \
         source VARCHAR(20), \
         price_category VARCHAR(20));",
        table
    ))
}

/// Columns are matched by position; the header row is skipped.
pub fn copy_sql(table: &str, s3_path: &str, iam_role: &str, region: &str) -> Result<String> {
    validate_identifier(table)?;
    validate_literal("source path", s3_path)?;
    parse_s3_uri(s3_path)?;
    validate_literal("IAM role", iam_role)?;
    validate_literal("region", region)?;

    Ok(format!(
        "COPY {} FROM '{}' IAM_ROLE '{}' FORMAT AS CSV DELIMITER ',' IGNOREHEADER 1 \
         REGION '{}' DATEFORMAT 'YYYY/MM/DD';",
        table, s3_path, iam_role, region
    ))
}

/// Creates the table if configured to, then submits the `COPY`.
pub async fn submit_load(
    loader: &dyn WarehouseLoader,
    settings: &WarehouseSettings,
    s3_path: &str,
) -> Result<LoadReceipt> {
    let copy = copy_sql(&settings.table_name, s3_path, &settings.iam_role, &settings.region)?;

    let create_statement_id = if settings.create_table {
        let statement_id = loader.execute(&create_table_sql(&settings.table_name)?).await?;
        info!(table = %settings.table_name, statement_id = %statement_id, "Table creation submitted");
        Some(statement_id)
    } else {
        None
    };

    let copy_statement_id = loader.execute(&copy).await?;
    info!(
        table = %settings.table_name,
        source = s3_path,
        statement_id = %copy_statement_id,
        "Load submitted"
    );

    Ok(LoadReceipt {
        table: settings.table_name.clone(),
        source_path: s3_path.to_string(),
        create_statement_id,
        copy_statement_id,
    })
}

/// `WarehouseLoader` over the Redshift Data API.
pub struct RedshiftDataLoader {
    client: RedshiftDataClient,
    cluster_id: String,
    database: String,
    db_user: String,
}

impl RedshiftDataLoader {
    pub async fn from_settings(settings: &WarehouseSettings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        Self {
            client: RedshiftDataClient::new(&shared),
            cluster_id: settings.cluster_id.clone(),
            database: settings.database.clone(),
            db_user: settings.db_user.clone(),
        }
    }
}

#[async_trait]
impl WarehouseLoader for RedshiftDataLoader {
    async fn execute(&self, sql: &str) -> Result<String> {
        let output = self
            .client
            .execute_statement()
            .cluster_identifier(&self.cluster_id)
            .database(&self.database)
            .db_user(&self.db_user)
            .sql(sql)
            .send()
            .await?;

        output
            .id()
            .map(str::to_string)
            .ok_or_else(|| Error::AwsSdk("ExecuteStatement returned no statement id".to_string()))
    }
}
