use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::models::{ApiResponse, Health, JobStarted};
use crate::event::parse_event;
use crate::launcher::JobLauncher;

pub struct AppState {
    pub launcher: Arc<dyn JobLauncher>,
    pub job_name: String,
}

pub struct AppError(pub common::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status_code = match self.0 {
            common::Error::InvalidEvent(_) | common::Error::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ApiResponse::<()>::error(self.0.to_string()));
        (status_code, body).into_response()
    }
}

impl From<common::Error> for AppError {
    fn from(err: common::Error) -> Self {
        AppError(err)
    }
}

pub async fn handle_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ApiResponse<JobStarted>>, AppError> {
    let payload = parse_event(&body).inspect_err(|e| warn!(error = %e, "Rejected event"))?;
    info!(bucket = %payload.bucket, key = %payload.key, "Received object event");

    let job_run_id = state
        .launcher
        .start_job(&state.job_name, &payload.job_arguments())
        .await
        .inspect_err(|e| error!(job = %state.job_name, error = %e, "Failed to start job"))?;
    info!(job = %state.job_name, job_run_id = %job_run_id, "Job started");

    Ok(Json(ApiResponse::success(JobStarted {
        job_run_id,
        bucket: payload.bucket,
        key: payload.key,
    })))
}

pub async fn health() -> Json<ApiResponse<Health>> {
    Json(ApiResponse::success(Health { status: "ok" }))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(handle_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingLauncher {
        calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl JobLauncher for RecordingLauncher {
        async fn start_job(
            &self,
            job_name: &str,
            arguments: &BTreeMap<String, String>,
        ) -> common::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((job_name.to_string(), arguments.clone()));
            Ok("jr_0123".to_string())
        }
    }

    struct BrokenLauncher;

    #[async_trait]
    impl JobLauncher for BrokenLauncher {
        async fn start_job(&self, _: &str, _: &BTreeMap<String, String>) -> common::Result<String> {
            Err(common::Error::AwsSdk("ConcurrentRunsExceededException".to_string()))
        }
    }

    fn app(launcher: Arc<dyn JobLauncher>) -> Router {
        routes(Arc::new(AppState {
            launcher,
            job_name: "case1_S2R".to_string(),
        }))
    }

    async fn post_event(app: Router, body: impl Into<Body>) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn s3_event() -> String {
        json!({
            "Records": [{
                "s3": {
                    "bucket": { "name": "silver" },
                    "object": { "key": "Raw_data/Silver/sales_data_20240305_140709_1f3a9c0e_0001.csv" }
                }
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn valid_event_starts_job() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (status, body) = post_event(app(launcher.clone()), s3_event()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["job_run_id"], "jr_0123");

        let calls = launcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "case1_S2R");
        assert_eq!(calls[0].1["--input_bucket"], "silver");
        assert_eq!(
            calls[0].1["--input_key"],
            "Raw_data/Silver/sales_data_20240305_140709_1f3a9c0e_0001.csv"
        );
    }

    #[tokio::test]
    async fn invalid_event_is_bad_request() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (status, body) = post_event(app(launcher.clone()), r#"{"Records": []}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("no records"));
        assert!(launcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn launcher_failure_is_server_error() {
        let (status, body) = post_event(app(Arc::new(BrokenLauncher)), s3_event()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn health_check() {
        let response = app(Arc::new(BrokenLauncher))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
