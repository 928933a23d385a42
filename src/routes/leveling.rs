//! Leveling routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::error::ApiError;
use crate::services::leveling;

/// POST /projects/:project_id/leveling/run
pub async fn run_leveling(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let summary = leveling::run_leveling(&state, auth.actor_id, project_id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(summary))))
}

/// GET /projects/:project_id/leveling
///
/// Snapshots from the most recent run.
pub async fn get_latest_analyses(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let analyses = leveling::latest_analyses(&state.db, project_id).await?;
    Ok(Json(DataResponse::new(analyses)))
}
