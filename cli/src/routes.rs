//! HTTP surface under `/api/v1`.
//!
//! Handlers are thin: they parse the wire shape, call [`Vouch`], and map
//! [`VouchError`] to a status code and a JSON error body. Internal detail
//! from processing, decision and storage failures never reaches the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use vouch_engine::{Vouch, VerifyRequest};
use vouch_types::{
    DecisionStatus, MediaKind, Score, SessionId, SessionStatus, VerificationResult, VouchError,
};

pub const API_PREFIX: &str = "/api/v1";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub type AppState = Arc<Vouch>;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", post(create_session))
        .route(
            "/sessions/:id/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/sessions/:id/media/complete", post(complete))
        .route("/sessions/:id/verify", post(verify))
        .route("/sessions/:id/result", get(result));

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Vouch(VouchError),
    BadRequest(String),
}

impl From<VouchError> for ApiError {
    fn from(err: VouchError) -> Self {
        Self::Vouch(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_kinds: Option<Vec<MediaKind>>,
}

fn status_for(err: &VouchError) -> StatusCode {
    match err {
        VouchError::NotFound => StatusCode::NOT_FOUND,
        VouchError::InvalidState { .. } => StatusCode::CONFLICT,
        VouchError::UnknownKind(_) => StatusCode::BAD_REQUEST,
        VouchError::UnsupportedMedia { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        VouchError::IncompleteMedia { .. } | VouchError::MediaProcessing(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        VouchError::MalformedDecision(_) | VouchError::DecisionUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        VouchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "bad_request",
                    message,
                    missing_kinds: None,
                },
            ),
            Self::Vouch(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    tracing::error!(code = err.code(), error = %err, "request failed");
                } else {
                    tracing::debug!(code = err.code(), error = %err, "request rejected");
                }
                let missing_kinds = match &err {
                    VouchError::IncompleteMedia { missing } => Some(missing.iter().copied().collect()),
                    _ => None,
                };
                (
                    status,
                    ErrorBody {
                        error: err.code(),
                        message: err.public_message(),
                        missing_kinds,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Unknown or malformed ids cannot name a session.
fn session_id(raw: &str) -> ApiResult<SessionId> {
    raw.parse().map_err(|_| ApiError::Vouch(VouchError::NotFound))
}

/// Optional JSON body: empty means all defaults.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateSessionBody {
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: SessionId,
    status: SessionStatus,
    upload_targets: BTreeMap<MediaKind, String>,
}

async fn create_session(State(vouch): State<AppState>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let body: CreateSessionBody = optional_json(&body)?;
    let session = vouch.create_session(body.callback_url, body.metadata).await?;
    let upload_targets = MediaKind::ALL
        .into_iter()
        .map(|kind| {
            (
                kind,
                format!("{API_PREFIX}/sessions/{}/upload?kind={kind}", session.id),
            )
        })
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            status: session.status,
            upload_targets,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    kind: Option<String>,
}

async fn upload(
    State(vouch): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let kind = query
        .kind
        .ok_or_else(|| ApiError::BadRequest("missing `kind` query parameter".to_string()))?;
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let artifact = vouch.upload(id, &kind, mime_type, body.to_vec()).await?;
    Ok(Json(json!({
        "status": SessionStatus::Uploading,
        "kind": artifact.kind,
    })))
}

async fn complete(State(vouch): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let session = vouch.complete(session_id(&id)?).await?;
    Ok(Json(json!({ "status": session.status })))
}

/// Flat verdict shape returned by `verify`.
#[derive(Debug, Serialize)]
struct VerifyResponse {
    status: DecisionStatus,
    score: Score,
    ocr_data: Map<String, Value>,
    face_match_score: Score,
    liveness_score: Score,
    av_sync_score: Score,
    audio_spoof_score: Score,
    explanations: Vec<String>,
}

impl From<VerificationResult> for VerifyResponse {
    fn from(result: VerificationResult) -> Self {
        let verdict = result.verdict;
        Self {
            status: verdict.status,
            score: verdict.score,
            ocr_data: verdict.ocr_data,
            face_match_score: verdict.face_match,
            liveness_score: verdict.liveness,
            av_sync_score: verdict.av_sync,
            audio_spoof_score: verdict.audio_spoof,
            explanations: verdict.explanations,
        }
    }
}

async fn verify(
    State(vouch): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<VerifyResponse>> {
    let id = session_id(&id)?;
    let request: VerifyRequest = optional_json(&body)?;
    let result = vouch.verify(id, request).await?;
    Ok(Json(result.into()))
}

async fn result(
    State(vouch): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerificationResult>> {
    Ok(Json(vouch.result(session_id(&id)?).await?))
}
