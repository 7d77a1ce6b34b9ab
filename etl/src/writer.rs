use crate::schema::SchemaContract;
use arrow::csv::WriterBuilder;
use arrow::record_batch::RecordBatch;
use common::Result;
use common::config::OutputFormat;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

/// Serializes one batch into the bytes of an output object.
pub fn encode_batch(
    batch: &RecordBatch,
    format: OutputFormat,
    contract: &SchemaContract,
    source_key: &str,
) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Csv => encode_csv(batch),
        OutputFormat::Parquet => encode_parquet(batch, contract, source_key),
    }
}

/// Header row first, columns in contract order. The warehouse COPY skips
/// the header and maps the rest by position.
fn encode_csv(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(batch)?;
    }
    Ok(buffer)
}

fn encode_parquet(batch: &RecordBatch, contract: &SchemaContract, source_key: &str) -> Result<Vec<u8>> {
    let properties = WriterProperties::builder()
        .set_key_value_metadata(Some(contract_metadata(contract, source_key)))
        .build();

    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(properties))?;
    writer.write(batch)?;
    writer.close()?;

    Ok(buffer)
}

fn contract_metadata(contract: &SchemaContract, source_key: &str) -> Vec<KeyValue> {
    vec![
        KeyValue {
            key: "schema_name".to_string(),
            value: Some(contract.name.to_string()),
        },
        KeyValue {
            key: "schema_version".to_string(),
            value: Some(contract.version.to_string()),
        },
        KeyValue {
            key: "source_key".to_string(),
            value: Some(source_key.to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SILVER_ORDERS_V1;
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use bytes::Bytes;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;

    fn orders_batch() -> RecordBatch {
        let text = |values: [&str; 2]| -> ArrayRef { Arc::new(StringArray::from(values.to_vec())) };
        RecordBatch::try_new(
            Arc::new(SILVER_ORDERS_V1.arrow_schema()),
            vec![
                text(["ORD1", "ORD2"]),
                text(["Ada", "Grace"]),
                text(["ada@example.com", "grace@example.com"]),
                text(["03/05/2024", "03/06/2024"]),
                text(["Pen", "Ink"]),
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Float64Array::from(vec![2.5, 7.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn csv_has_header_and_rows() {
        let bytes = encode_batch(&orders_batch(), OutputFormat::Csv, &SILVER_ORDERS_V1, "k").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("order_id,customer_name,customer_email,order_date,product_name,quantity,price")
        );
        assert!(lines.next().unwrap().starts_with("ORD1,Ada,ada@example.com,03/05/2024,Pen,1,2.5"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn parquet_carries_contract_metadata() {
        let bytes = encode_batch(
            &orders_batch(),
            OutputFormat::Parquet,
            &SILVER_ORDERS_V1,
            "Raw_data/Bronze/orders.json",
        )
        .unwrap();

        let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).unwrap();
        let kv = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .cloned()
            .unwrap_or_default();
        let lookup = |key: &str| {
            kv.iter()
                .find(|entry| entry.key == key)
                .and_then(|entry| entry.value.clone())
        };
        assert_eq!(lookup("schema_name").as_deref(), Some("silver_orders"));
        assert_eq!(lookup("source_key").as_deref(), Some("Raw_data/Bronze/orders.json"));

        let batches: Vec<RecordBatch> = builder.build().unwrap().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
    }
}
