pub mod pipeline;
pub mod schema;
pub mod storage;
pub mod tracker;
pub mod transform;
pub mod utils;
pub mod warehouse;
pub mod writer;

use common::config::Settings;
use common::{Error, Result};
use pipeline::{IncrementalStage, RunReport, StageOptions};
use storage::StorageFactory;
use transform::{OrdersTransform, SalesTransform};
use utils::paths::s3_uri;
use warehouse::{LoadReceipt, RedshiftDataLoader, submit_load};

/// Incremental sales CSV stage.
pub async fn bronze_to_silver(settings: &Settings) -> Result<RunReport> {
    let stage_settings = settings.bronze_to_silver()?;
    let factory = StorageFactory::new(&settings.storage);
    let source = factory.storage(&stage_settings.input_bucket).await?;
    let target = factory.storage(&stage_settings.output_bucket).await?;

    let transform = SalesTransform::new(stage_settings.chunk_size);
    let options = StageOptions::from_settings(stage_settings, &transform);
    IncrementalStage::new(source, target, transform, options)
        .run()
        .await
}

/// Orders JSON stage. With `input_key` only that object is transformed and
/// the processed log is left alone; otherwise it runs incrementally.
pub async fn orders_to_silver(
    settings: &Settings,
    input_key: Option<&str>,
    output_key: Option<&str>,
) -> Result<RunReport> {
    let stage_settings = settings.orders_to_silver()?;
    let factory = StorageFactory::new(&settings.storage);
    let source = factory.storage(&stage_settings.input_bucket).await?;
    let target = factory.storage(&stage_settings.output_bucket).await?;

    let transform = OrdersTransform::new();
    let options = StageOptions::from_settings(stage_settings, &transform);
    let stage = IncrementalStage::new(source, target, transform, options);

    match (input_key, output_key) {
        (Some(input_key), output_key) => stage.run_single(input_key, output_key).await,
        (None, Some(_)) => Err(Error::InvalidInput(
            "--output-key requires --input-key".to_string(),
        )),
        (None, None) => stage.run().await,
    }
}

/// Submits `s3://<bucket>/<key>` to the warehouse.
pub async fn silver_to_warehouse(settings: &Settings, bucket: &str, key: &str) -> Result<LoadReceipt> {
    let warehouse = settings.warehouse()?;
    let loader = RedshiftDataLoader::from_settings(warehouse).await;
    submit_load(&loader, warehouse, &s3_uri(bucket, key)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn local_settings(root: &std::path::Path) -> Settings {
        Settings::from_toml_str(&format!(
            r#"
            [storage]
            backend = "local"
            local_root = '{}'

            [bronze_to_silver]
            input_bucket = "bronze"
            input_prefix = "Raw_data/Bronze"
            output_bucket = "silver"
            output_folder = "Raw_data/Silver"
            log_key = "logs/processed_files.txt"
            output_stem = "sales_data"

            [orders_to_silver]
            input_bucket = "bronze"
            input_prefix = "orders"
            output_bucket = "orders-silver"
            output_folder = "orders"
            log_key = "logs/processed_orders.txt"
            "#,
            root.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn bronze_to_silver_on_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let bronze = dir.path().join("bronze/Raw_data/Bronze");
        fs::create_dir_all(&bronze).unwrap();
        fs::write(
            bronze.join("sales_1.csv"),
            "order_id,product_name,category,price,date,source\n\
             1,Lamp,Home Decor,50,01/02/2024,Amazon\n",
        )
        .unwrap();

        let settings = local_settings(dir.path());
        let report = bronze_to_silver(&settings).await.unwrap();
        assert_eq!(report.ingested, vec!["Raw_data/Bronze/sales_1.csv".to_string()]);
        assert!(report.outputs[0].starts_with("Raw_data/Silver/sales_data_"));

        let log = fs::read_to_string(dir.path().join("silver/logs/processed_files.txt")).unwrap();
        assert_eq!(log, "Raw_data/Bronze/sales_1.csv");
        assert!(dir.path().join("silver").join(&report.outputs[0]).exists());

        let again = bronze_to_silver(&settings).await.unwrap();
        assert_eq!(again.discovered, 0);
    }

    #[tokio::test]
    async fn orders_output_key_needs_input_key() {
        let dir = tempfile::tempdir().unwrap();
        let settings = local_settings(dir.path());
        let err = orders_to_silver(&settings, None, Some("out.csv")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn shipped_config_keeps_orders_out_of_the_sales_bucket() {
        let text = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/../config/etl.toml")).unwrap();
        let settings = Settings::from_toml_str(&text).unwrap();
        let sales = settings.bronze_to_silver().unwrap();
        let orders = settings.orders_to_silver().unwrap();
        assert_ne!(sales.output_bucket, orders.output_bucket);
        assert_eq!(sales.output_folder, "Raw_data/Silver");
    }

    #[tokio::test]
    async fn missing_stage_section_is_an_error() {
        let settings = Settings::from_toml_str("[storage]\nbackend = \"memory\"\n").unwrap();
        let err = bronze_to_silver(&settings).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
