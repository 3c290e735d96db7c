//! Preview control endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use livepreview_core::compiler::ArtifactKind;
use std::sync::Arc;

use crate::{
    models::{Accepted, ArtifactResponse, ErrorResponse, PreviewStatus, SourceUpdate},
    AppState,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn send_failed(what: &str, e: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::internal(&format!("Failed to {}: {}", what, e))),
    )
}

fn accepted(state: &AppState) -> (StatusCode, Json<Accepted>) {
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            accepted: true,
            version: state.handle.state().version(),
        }),
    )
}

/// GET /status - Current preview state snapshot
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<PreviewStatus> {
    Json(state.handle.with_state(|s| PreviewStatus::from(s)))
}

/// PUT /source - Report new source text
pub async fn put_source(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SourceUpdate>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let result = if req.immediate {
        state.handle.compile_now(req.text)
    } else {
        state.handle.source_changed(req.text)
    };
    result.map_err(|e| send_failed("queue source", e))?;
    Ok(accepted(&state))
}

/// POST /refresh - Replace the sandbox with a fresh one
pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    state
        .handle
        .refresh()
        .map_err(|e| send_failed("refresh", e))?;
    Ok(accepted(&state))
}

/// POST /dismiss - Hide the error panel
pub async fn dismiss_error(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    state
        .handle
        .dismiss_error()
        .map_err(|e| send_failed("dismiss error", e))?;
    Ok(accepted(&state))
}

/// POST /artifact/toggle - Show or hide the compiled artifact
pub async fn toggle_artifact(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    state
        .handle
        .toggle_artifact()
        .map_err(|e| send_failed("toggle artifact", e))?;
    Ok(accepted(&state))
}

/// GET /artifact - Most recently compiled artifact
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ArtifactResponse>, ApiError> {
    let artifact = state.handle.with_state(|s| s.last_artifact.clone());

    match artifact {
        Some(artifact) => {
            let (kind, message) = match artifact.kind {
                ArtifactKind::Valid => ("valid", None),
                ArtifactKind::Diagnostic { message } => ("diagnostic", Some(message)),
            };
            Ok(Json(ArtifactResponse {
                id: artifact.id.as_u64(),
                kind: kind.to_string(),
                code: artifact.code,
                message,
            }))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("Nothing has been compiled yet")),
        )),
    }
}
