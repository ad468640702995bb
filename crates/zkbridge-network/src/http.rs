//! HTTP request/response API.
//!
//! Plain JSON endpoints for clients that cannot hold a channel open. Every
//! body carries `success` and a `timestamp`; errors carry `detail` and
//! `message` as well.
//!
//! | Method | Path          | Outcome                                         |
//! |--------|---------------|-------------------------------------------------|
//! | GET    | `/`           | endpoint index and host identity                |
//! | GET    | `/status`     | device snapshot                                 |
//! | GET    | `/info`       | device snapshot plus server identity            |
//! | POST   | `/connect`    | 404 when no device is found                     |
//! | POST   | `/disconnect` | always succeeds                                 |
//! | POST   | `/capture`    | 400 when not connected; base64 template         |
//! | GET    | `/test`       | health probe                                    |

use crate::dispatcher::{CaptureFields, Command, CommandOutcome, Dispatcher, capture_timeout};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};
use zkbridge_core::constants::SERVICE_VERSION;
use zkbridge_core::{ApiConfig, CaptureResult, FailureKind};
use zkbridge_hardware::ConnectOutcome;

/// Error response with an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "detail": self.detail,
            "message": self.detail,
            "timestamp": timestamp(),
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Body of `POST /capture`. An empty body or `null` means no options.
#[derive(Debug, Default, Deserialize)]
struct CaptureRequest {
    timeout: Option<f64>,
}

#[derive(Serialize)]
struct CaptureResponse {
    success: bool,
    timestamp: String,
    #[serde(flatten)]
    fields: CaptureFields,
    template_data_base64: String,
    template_data_length: usize,
}

/// Start the API server and run until `shutdown` fires.
///
/// # Errors
///
/// Returns the I/O error if the listener cannot be bound or the server
/// loop fails.
pub async fn serve(
    config: &ApiConfig,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve_on(listener, dispatcher, shutdown).await
}

/// Run the API on an already-bound listener.
///
/// # Errors
///
/// Returns the I/O error raised by the server loop.
pub async fn serve_on(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let actual_addr = listener.local_addr()?;
    info!(url = %format!("http://{}", actual_addr), "HTTP API listening");

    axum::serve(listener, build_router(dispatcher))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    info!("HTTP API stopped");
    Ok(())
}

/// Build the router with every endpoint, CORS and request tracing.
pub fn build_router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status))
        .route("/info", get(device_info))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/capture", post(capture))
        .route("/test", get(test))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(dispatcher)
}

async fn index(State(dispatcher): State<Dispatcher>) -> Json<Value> {
    let server = dispatcher.server_info();
    Json(json!({
        "service": "ZK9500 Fingerprint REST API",
        "version": SERVICE_VERSION,
        "status": "running",
        "hostname": server.hostname,
        "ip": server.ip,
        "endpoints": {
            "GET /": "API information",
            "GET /status": "Get service and device status",
            "GET /info": "Get detailed device information",
            "POST /connect": "Connect to ZK9500 device",
            "POST /disconnect": "Disconnect from device",
            "POST /capture": "Capture fingerprint",
            "GET /test": "Test service connection",
        },
    }))
}

async fn status(State(dispatcher): State<Dispatcher>) -> Json<Value> {
    let device = dispatcher.service().status();
    Json(json!({
        "success": true,
        "timestamp": timestamp(),
        "service_status": "running",
        "connection_type": device.connection_type,
        "connected": device.connected,
        "last_scan_time": device.last_scan_time,
        "total_scans": device.total_scans,
        "device_info": device,
    }))
}

async fn device_info(State(dispatcher): State<Dispatcher>) -> Json<Value> {
    Json(json!({
        "success": true,
        "timestamp": timestamp(),
        "device_info": dispatcher.service().status(),
        "server_info": dispatcher.server_info(),
    }))
}

async fn connect(State(dispatcher): State<Dispatcher>) -> ApiResult {
    info!("API: Attempting to connect to ZK9500 device");
    let outcome = dispatcher
        .dispatch(Command::Connect)
        .await
        .map_err(|e| ApiError::internal(format!("Connection error: {e}")))?;

    let CommandOutcome::Connect { outcome, device } = outcome else {
        return Err(ApiError::internal("Connection error: unexpected outcome"));
    };

    match outcome {
        ConnectOutcome::Connected(_) | ConnectOutcome::AlreadyConnected(_) => Ok(Json(json!({
            "success": true,
            "timestamp": timestamp(),
            "message": "Successfully connected to ZK9500 device",
            "connection_type": device.connection_type,
            "device_info": device,
        }))),
        ConnectOutcome::NotFound => Err(ApiError::not_found(
            "ZK9500 device not found or connection failed",
        )),
        ConnectOutcome::AttemptsExhausted => Err(ApiError::not_found(outcome.message())),
    }
}

async fn disconnect(State(dispatcher): State<Dispatcher>) -> ApiResult {
    info!("API: Disconnecting from ZK9500 device");
    dispatcher
        .dispatch(Command::Disconnect)
        .await
        .map_err(|e| ApiError::internal(format!("Disconnect error: {e}")))?;

    Ok(Json(json!({
        "success": true,
        "timestamp": timestamp(),
        "message": "Successfully disconnected from ZK9500 device",
    })))
}

async fn capture(State(dispatcher): State<Dispatcher>, body: Bytes) -> ApiResult {
    if !dispatcher.service().status().connected {
        return Err(ApiError::bad_request(
            "Device not connected. Please connect to ZK9500 device first using POST /connect",
        ));
    }

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CaptureRequest::default()
    } else {
        serde_json::from_slice::<Option<CaptureRequest>>(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid capture request: {e}")))?
            .unwrap_or_default()
    };
    let timeout = capture_timeout(request.timeout).map_err(|e| ApiError::bad_request(e.to_string()))?;

    info!("API: Starting fingerprint capture");
    let outcome = dispatcher
        .dispatch(Command::Capture { timeout })
        .await
        .map_err(|e| ApiError::internal(format!("Capture error: {e}")))?;

    let CommandOutcome::Capture(result) = outcome else {
        return Err(ApiError::internal("Capture error: unexpected outcome"));
    };

    match result {
        CaptureResult::Success(capture) => {
            let response = CaptureResponse {
                success: true,
                timestamp: timestamp(),
                fields: CaptureFields::from(&capture),
                template_data_base64: STANDARD.encode(&capture.template),
                template_data_length: capture.template_len(),
            };
            let body = serde_json::to_value(response)
                .map_err(|e| ApiError::internal(format!("Capture error: {e}")))?;
            Ok(Json(body))
        }
        CaptureResult::Failure(failure) => {
            warn!(reason = %failure, "API: Fingerprint capture failed");
            match failure.kind {
                FailureKind::Internal => Err(ApiError::internal(failure.message)),
                _ => Err(ApiError::bad_request(failure.message)),
            }
        }
    }
}

async fn test(State(dispatcher): State<Dispatcher>) -> Json<Value> {
    let device = dispatcher.service().status();
    Json(json!({
        "success": true,
        "timestamp": timestamp(),
        "message": "ZK9500 HTTP API is running and healthy",
        "server_info": dispatcher.server_info(),
        "device_status": {
            "connected": device.connected,
            "connection_type": device.connection_type,
            "model": device.model,
            "total_scans": device.total_scans,
        },
    }))
}

async fn not_found() -> ApiError {
    debug!("API: Request for unknown endpoint");
    ApiError::not_found("Not Found")
}
