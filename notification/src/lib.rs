pub mod api;
pub mod event;
pub mod launcher;

use anyhow::Context;
use common::config::{LauncherKind, Settings};
use launcher::{GlueJobLauncher, JobLauncher, LocalJobLauncher};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serves the event endpoint until the process is stopped.
pub async fn run_notification_service(config_path: &str) -> anyhow::Result<()> {
    let settings = Arc::new(
        Settings::new(config_path)
            .with_context(|| format!("failed to load config {}", config_path))?,
    );
    common::logging::init(&settings.logging);

    let trigger = &settings.trigger;
    let launcher: Arc<dyn JobLauncher> = match trigger.launcher {
        LauncherKind::Glue => Arc::new(GlueJobLauncher::new(&trigger.region).await),
        LauncherKind::Local => Arc::new(LocalJobLauncher::new(settings.clone())),
    };

    let state = Arc::new(api::AppState {
        launcher,
        job_name: trigger.job_name.clone(),
    });
    let router = api::routes(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], trigger.api_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, job = %trigger.job_name, launcher = ?trigger.launcher, "Notification service listening");
    axum::serve(listener, router).await?;

    Ok(())
}
