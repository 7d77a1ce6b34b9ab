use clap::{Arg, Command};
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("Notification Service")
        .version("1.0")
        .about("Starts the warehouse load job when a silver object lands")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config/notification.toml");

    if let Err(e) = notification::run_notification_service(config_path).await {
        tracing::error!(error = ?e, "Notification service stopped");
        eprintln!("Notification service error: {:#}", e);
        process::exit(1);
    }
}
