//! Thin operator HTTP handlers over the facade.
//!
//! These are deliberately shallow: obtain a PIN from the path, call the
//! facade, shape the result. Feature-specific data shaping (logs viewer,
//! flags table, ...) lives with the UI, not here.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use nodescope_core::{BridgeError, ErrorKind};

use crate::facade::NodeDescriptor;
use crate::server::AppState;

/// Facade error wrapped for HTTP transport.
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotAttached => StatusCode::FORBIDDEN,
            ErrorKind::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::CapacityExhausted => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::SendFailed | ErrorKind::Disconnected => StatusCode::BAD_GATEWAY,
            ErrorKind::Remote | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": {
                "kind": self.0.kind().as_str(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    /// Human-readable session name.
    pub name: String,
}

/// Response of `POST /api/sessions`.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// The freshly minted PIN.
    pub pin: String,
    /// Echoed name.
    pub name: String,
}

/// POST /api/sessions
pub async fn create_session_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let pin = state.facade.create_session(&body.name)?;
    Ok(Json(CreateSessionResponse {
        pin,
        name: body.name,
    }))
}

/// DELETE /api/sessions/{pin}
pub async fn remove_session_handler(
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.facade.remove_session(&pin)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/sessions/{pin}/nodes
pub async fn list_nodes_handler(
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Result<Json<Vec<NodeDescriptor>>, ApiError> {
    Ok(Json(state.facade.list_nodes(&pin)?))
}

/// Body of `POST /api/sessions/{pin}/nodes/{node_id}/rpc`.
#[derive(Debug, Deserialize)]
pub struct IssueBody {
    /// Method to invoke on the subject node.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// POST /api/sessions/{pin}/nodes/{node_id}/rpc — stream chunks as NDJSON.
///
/// The response ends when the terminal chunk arrives; closing the response
/// early cancels the request.
pub async fn issue_rpc_handler(
    State(state): State<AppState>,
    Path((pin, node_id)): Path<(String, String)>,
    Json(body): Json<IssueBody>,
) -> Result<Response, ApiError> {
    let stream = state.facade.issue(&pin, &node_id, &body.method, body.params)?;

    let ndjson = stream.map(|chunk| {
        let mut raw = serde_json::to_vec(&chunk).unwrap_or_else(|_| b"{}".to_vec());
        raw.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(raw))
    });

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ndjson),
    )
        .into_response())
}
