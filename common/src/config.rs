use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    pub bronze_to_silver: Option<StageSettings>,
    pub orders_to_silver: Option<StageSettings>,
    pub warehouse: Option<WarehouseSettings>,
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Custom endpoint such as a MinIO server. Unset means AWS.
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default = "default_local_root")]
    pub local_root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            endpoint: None,
            region: default_region(),
            access_key: None,
            secret_key: None,
            local_root: default_local_root(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// What a stage run does when one candidate file fails to transform.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnTransformError {
    /// Leave the file out of this run's commit and keep going.
    #[default]
    Skip,
    /// Fail the whole run before anything is committed.
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StageSettings {
    pub input_bucket: String,
    #[serde(default)]
    pub input_prefix: String,
    pub output_bucket: String,
    pub output_folder: String,
    /// Key of the processed-file log, stored in the output bucket.
    pub log_key: String,
    pub suffix: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub on_transform_error: OnTransformError,
    #[serde(default)]
    pub conditional_commit: bool,
    pub output_stem: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseSettings {
    pub cluster_id: String,
    pub database: String,
    pub db_user: String,
    pub iam_role: String,
    pub table_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_true")]
    pub create_table: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    #[default]
    Glue,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerSettings {
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default)]
    pub launcher: LauncherKind,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            launcher: LauncherKind::default(),
            region: default_region(),
            api_port: default_api_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_local_root() -> String {
    "./data".to_string()
}

fn default_chunk_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_job_name() -> String {
    "case1_S2R".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        debug!(config_path = path, backend = ?settings.storage.backend, "Loaded settings");

        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn bronze_to_silver(&self) -> crate::Result<&StageSettings> {
        self.bronze_to_silver.as_ref().ok_or_else(|| {
            crate::Error::InvalidInput("missing [bronze_to_silver] section".to_string())
        })
    }

    pub fn orders_to_silver(&self) -> crate::Result<&StageSettings> {
        self.orders_to_silver.as_ref().ok_or_else(|| {
            crate::Error::InvalidInput("missing [orders_to_silver] section".to_string())
        })
    }

    pub fn warehouse(&self) -> crate::Result<&WarehouseSettings> {
        self.warehouse
            .as_ref()
            .ok_or_else(|| crate::Error::InvalidInput("missing [warehouse] section".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [storage]
        backend = "local"
        local_root = "/tmp/lake"

        [bronze_to_silver]
        input_bucket = "case1bucket-e2e"
        input_prefix = "Raw_data/Bronze"
        output_bucket = "case1bucket-e2e"
        output_folder = "Raw_data/Silver"
        log_key = "logs/processed_files.txt"
        on_transform_error = "abort"

        [warehouse]
        cluster_id = "analytics"
        database = "dev"
        db_user = "awsuser"
        iam_role = "arn:aws:iam::123456789012:role/redshift-copy"
        table_name = "sales"
    "#;

    #[test]
    fn parses_stage_and_applies_defaults() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.storage.backend, StorageBackend::Local);
        assert_eq!(settings.storage.region, "us-east-1");

        let stage = settings.bronze_to_silver().unwrap();
        assert_eq!(stage.chunk_size, 100);
        assert_eq!(stage.output_format, OutputFormat::Csv);
        assert_eq!(stage.on_transform_error, OnTransformError::Abort);
        assert!(!stage.conditional_commit);
        assert!(stage.suffix.is_none());

        let warehouse = settings.warehouse().unwrap();
        assert!(warehouse.create_table);
        assert_eq!(settings.trigger.job_name, "case1_S2R");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_section_is_reported() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let err = settings.orders_to_silver().unwrap_err();
        assert!(err.to_string().contains("orders_to_silver"));
    }
}
