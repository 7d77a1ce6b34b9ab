use clap::{Arg, ArgMatches, Command};
use common::config::Settings;
use std::process;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "config/etl.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

fn config_path(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG)
}

#[tokio::main]
async fn main() {
    let matches = Command::new("ETL Pipeline Manager")
        .version("1.0")
        .about("Runs the bronze, silver and warehouse stages")
        .subcommand_required(true)
        .subcommand(
            Command::new("bronze-to-silver")
                .about("Clean new bronze sales CSV files into the silver layer")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("orders-to-silver")
                .about("Flatten bronze order JSON into the silver layer")
                .arg(config_arg())
                .arg(
                    Arg::new("input-key")
                        .long("input-key")
                        .value_name("KEY")
                        .help("Process only this object, without the processed log"),
                )
                .arg(
                    Arg::new("output-key")
                        .long("output-key")
                        .value_name("KEY")
                        .requires("input-key")
                        .help("Output object key for --input-key"),
                ),
        )
        .subcommand(
            Command::new("silver-to-warehouse")
                .about("Submit a silver CSV object to the warehouse")
                .arg(config_arg())
                .arg(
                    Arg::new("input-bucket")
                        .long("input-bucket")
                        .value_name("BUCKET")
                        .required(true),
                )
                .arg(
                    Arg::new("input-key")
                        .long("input-key")
                        .value_name("KEY")
                        .required(true),
                ),
        )
        .get_matches();

    let Some((name, sub_matches)) = matches.subcommand() else {
        eprintln!("Please specify a valid subcommand");
        process::exit(1);
    };

    let path = config_path(sub_matches);
    let settings = match Settings::new(path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", path, e);
            process::exit(1);
        }
    };
    common::logging::init(&settings.logging);
    info!(command = name, config = path, "Starting");

    let result = match name {
        "bronze-to-silver" => etl::bronze_to_silver(&settings).await.map(|report| {
            info!(
                ingested = report.ingested.len(),
                failed = report.failed.len(),
                rows = report.rows_written,
                "bronze-to-silver finished"
            );
        }),
        "orders-to-silver" => {
            let input_key = sub_matches.get_one::<String>("input-key").map(String::as_str);
            let output_key = sub_matches.get_one::<String>("output-key").map(String::as_str);
            etl::orders_to_silver(&settings, input_key, output_key)
                .await
                .map(|report| {
                    info!(
                        ingested = report.ingested.len(),
                        outputs = ?report.outputs,
                        rows = report.rows_written,
                        "orders-to-silver finished"
                    );
                })
        }
        "silver-to-warehouse" => {
            let bucket = sub_matches
                .get_one::<String>("input-bucket")
                .map(String::as_str)
                .unwrap_or_default();
            let key = sub_matches
                .get_one::<String>("input-key")
                .map(String::as_str)
                .unwrap_or_default();
            etl::silver_to_warehouse(&settings, bucket, key)
                .await
                .map(|receipt| {
                    info!(
                        table = %receipt.table,
                        statement_id = %receipt.copy_statement_id,
                        "silver-to-warehouse submitted"
                    );
                })
        }
        other => {
            error!(command = other, "Unknown subcommand");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        error!(command = name, error = %e, "Pipeline failed");
        process::exit(1);
    }
}
