//! Sealed submission vault routes.
//!
//! Thin HTTP shims over `services::vault`; every fairness decision lives in
//! the service and the pure gates it calls.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{DataResponse, NoContent};
use crate::app::AppState;
use crate::auth::{ActorRole, RequireAuth};
use crate::domain::submissions::{
    CompleteUploadRequest, CreateSubmissionRequest, FailUploadRequest, RecordLineItemBidsRequest,
    RequestUploadSlotRequest, VendorLineItemBid, VendorSubmission,
};
use crate::error::ApiError;
use crate::money::decimal_to_cents;
use crate::services::vault::{self, SubmissionRow};

const SUBMISSION_COLUMNS: &str = "id, project_id, vendor_id, channel, state, storage_key, \
     file_name, checksum, sealed, sealed_at, upload_completed_at, opened_at, opened_by, \
     compliance_status, total_bid_amount, created_at, updated_at";

/// Apply the deadline-relative state view before handing a submission out.
async fn with_state_view(
    state: &AppState,
    mut sub: VendorSubmission,
) -> Result<VendorSubmission, ApiError> {
    let due: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT bid_due_date FROM bid_projects WHERE id = $1")
            .bind(sub.project_id)
            .fetch_one(&state.db)
            .await?;
    sub.state = sub.state_view(state.clock.now(), due);
    Ok(sub)
}

/// POST /projects/:project_id/submissions
///
/// Register a submission slot for one vendor and channel.
pub async fn create_submission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateSubmissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let vendor_id = match (auth.role, req.vendor_id) {
        (ActorRole::Vendor, Some(other)) if other != auth.actor_id => {
            return Err(ApiError::unauthorized(
                "vendors may only register their own submissions",
            ));
        }
        (ActorRole::Vendor, _) => auth.actor_id,
        (_, Some(vendor_id)) => vendor_id,
        (_, None) => {
            return Err(ApiError::bad_request("vendor_id is required for staff"));
        }
    };

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("Project not found"));
    }

    let row = sqlx::query_as::<_, SubmissionRow>(&format!(
        r#"
        INSERT INTO vendor_submissions (project_id, vendor_id, channel)
        VALUES ($1, $2, $3)
        RETURNING {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(project_id)
    .bind(vendor_id)
    .bind(req.channel.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ApiError::conflict(
            "A submission already exists for this vendor and channel",
        ),
        _ => ApiError::Database(e),
    })?;

    let sub = with_state_view(&state, row.into_submission()?).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(sub))))
}

/// GET /projects/:project_id/submissions
pub async fn list_submissions(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let due: chrono::DateTime<chrono::Utc> =
        sqlx::query_scalar("SELECT bid_due_date FROM bid_projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM vendor_submissions WHERE project_id = $1 ORDER BY created_at"
    ))
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let now = state.clock.now();
    let subs: Vec<VendorSubmission> = rows
        .into_iter()
        .map(|r| {
            r.into_submission().map(|mut s| {
                s.state = s.state_view(now, due);
                s
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(Json(DataResponse::new(subs)))
}

/// GET /submissions/:submission_id
pub async fn get_submission(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = sqlx::query_as::<_, SubmissionRow>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM vendor_submissions WHERE id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Submission not found"))?;

    let sub = row.into_submission()?;
    if !auth.role.is_staff() && auth.actor_id != sub.vendor_id {
        return Err(ApiError::unauthorized(
            "vendors may only read their own submissions",
        ));
    }

    let sub = with_state_view(&state, sub).await?;
    Ok(Json(DataResponse::new(sub)))
}

/// POST /submissions/:submission_id/upload-slot
pub async fn request_upload_slot(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<RequestUploadSlotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = vault::request_upload_slot(&state, &auth, submission_id, &req).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(slot))))
}

/// POST /uploads/:credential_id/complete
pub async fn complete_upload(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sub = vault::complete_upload(&state, &auth, credential_id, &req).await?;
    let sub = with_state_view(&state, sub).await?;
    Ok(Json(DataResponse::new(sub)))
}

/// POST /uploads/:credential_id/cancel
pub async fn cancel_upload(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    vault::cancel_upload(&state, &auth, credential_id).await?;
    Ok(NoContent)
}

/// POST /uploads/:credential_id/fail
pub async fn fail_upload(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(credential_id): Path<Uuid>,
    Json(req): Json<FailUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    vault::fail_upload(&state, &auth, credential_id, req.reason.as_deref()).await?;
    Ok(NoContent)
}

/// POST /submissions/:submission_id/access
///
/// The sole read path for sealed content.
pub async fn request_access(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let access = vault::request_access(&state, &auth, submission_id).await?;
    Ok(Json(DataResponse::new(access)))
}

/// POST /submissions/:submission_id/line-item-bids
pub async fn record_line_item_bids(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<RecordLineItemBidsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sub = vault::record_line_item_bids(&state, &auth, submission_id, &req).await?;
    let sub = with_state_view(&state, sub).await?;
    Ok(Json(DataResponse::new(sub)))
}

/// GET /submissions/:submission_id/line-item-bids
pub async fn list_line_item_bids(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    #[derive(sqlx::FromRow)]
    struct BidRow {
        id: Uuid,
        submission_id: Uuid,
        line_item_id: Uuid,
        unit_price: rust_decimal::Decimal,
        total_price: rust_decimal::Decimal,
        is_no_bid: bool,
        is_allowance: bool,
        is_alternate: bool,
        vendor_notes: Option<String>,
        created_at: chrono::DateTime<chrono::Utc>,
    }

    let rows = sqlx::query_as::<_, BidRow>(
        r#"
        SELECT b.id, b.submission_id, b.line_item_id, b.unit_price, b.total_price,
               b.is_no_bid, b.is_allowance, b.is_alternate, b.vendor_notes, b.created_at
        FROM vendor_line_item_bids b
        JOIN line_items i ON i.id = b.line_item_id
        WHERE b.submission_id = $1
        ORDER BY i.item_code
        "#,
    )
    .bind(submission_id)
    .fetch_all(&state.db)
    .await?;

    let bids: Vec<VendorLineItemBid> = rows
        .into_iter()
        .map(|r| VendorLineItemBid {
            id: r.id,
            submission_id: r.submission_id,
            line_item_id: r.line_item_id,
            unit_price: decimal_to_cents(r.unit_price),
            total_price: decimal_to_cents(r.total_price),
            is_no_bid: r.is_no_bid,
            is_allowance: r.is_allowance,
            is_alternate: r.is_alternate,
            vendor_notes: r.vendor_notes,
            created_at: r.created_at,
        })
        .collect();

    Ok(Json(DataResponse::new(bids)))
}

/// GET /submissions/:submission_id/access-log
pub async fn list_access_log(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let entries = vault::list_access_log(&state.db, submission_id).await?;
    Ok(Json(DataResponse::new(entries)))
}
