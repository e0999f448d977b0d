//! HTTP surface over [`SigningService`].

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::service::{RequestStatus, SigningService, Submission};

const RUNNING: &str = "Server is running";
const SIGNED: &str = "Request processed successfully!";
const ACCEPTED: &str =
    "Request received. Please check back according to the time estimate (minutes).";
const STILL_PENDING: &str =
    "Request is still being processed. Please check back according to the time estimate (minutes).";
const AT_CAPACITY: &str =
    "The request could not be processed, server is at capacity. Please try again shortly.";
const UNKNOWN_ID: &str =
    "The request id is not recognized. Please use the 'crypto/sign' endpoint to generate a new request.";

type SharedService = Arc<SigningService>;

/// JSON body shared by every response. Absent fields are omitted.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_estimate: Option<f64>,
    pub status_code: u16,
}

impl Reply {
    fn new(status: StatusCode, body: &str) -> Self {
        Self {
            body: body.to_string(),
            signature: None,
            request_id: None,
            time_estimate: None,
            status_code: status.as_u16(),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SignParams {
    #[serde(default)]
    message: String,
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/crypto/sign", get(sign))
        .route("/crypto/sign/request/:request_id", get(request_status))
        .with_state(service)
}

/// Bind `addr` and serve until the listener fails.
pub async fn serve(addr: &str, service: SharedService) -> Result<(), ServiceError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!("listening on http://{addr}");
    axum::serve(listener, router(service))
        .await
        .map_err(ServiceError::Serve)
}

async fn health() -> Reply {
    debug!("health check");
    Reply::new(StatusCode::OK, RUNNING)
}

/// GET /crypto/sign?message=..
async fn sign(State(service): State<SharedService>, Query(params): Query<SignParams>) -> Reply {
    match service.submit(params.message).await {
        Submission::Signed { signature, .. } => Reply {
            signature: Some(signature),
            ..Reply::new(StatusCode::OK, SIGNED)
        },
        Submission::Accepted { id, eta_minutes } => Reply {
            request_id: Some(id),
            time_estimate: Some(eta_minutes),
            ..Reply::new(StatusCode::ACCEPTED, ACCEPTED)
        },
        Submission::Rejected { .. } => Reply::new(StatusCode::SERVICE_UNAVAILABLE, AT_CAPACITY),
    }
}

/// GET /crypto/sign/request/{request_id}
async fn request_status(
    State(service): State<SharedService>,
    Path(request_id): Path<String>,
) -> Reply {
    match service.query(&request_id).await {
        RequestStatus::Completed { signature } => Reply {
            signature: Some(signature),
            ..Reply::new(StatusCode::OK, SIGNED)
        },
        RequestStatus::Pending { remaining_minutes } => Reply {
            request_id: Some(request_id),
            time_estimate: Some(remaining_minutes),
            ..Reply::new(StatusCode::ACCEPTED, STILL_PENDING)
        },
        RequestStatus::NotFound => Reply::new(StatusCode::NOT_FOUND, UNKNOWN_ID),
    }
}
