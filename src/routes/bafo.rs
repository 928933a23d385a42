//! Best-and-final-offer negotiation routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::bafo::{
    is_late, AcceptanceStatus, BafoRequest, BafoResponse, BafoStatus, CreateBafoRequest,
    LineItemAdjustment, SubmitBafoResponseRequest,
};
use crate::domain::events::DomainEvent;
use crate::error::ApiError;
use crate::money::{cents_to_decimal, decimal_to_cents};

#[derive(Debug, sqlx::FromRow)]
struct BafoRequestRow {
    id: Uuid,
    project_id: Uuid,
    vendor_ids: Vec<Uuid>,
    line_item_ids: Vec<Uuid>,
    message: Option<String>,
    response_due_date: DateTime<Utc>,
    status: String,
    created_by: Uuid,
    requested_at: DateTime<Utc>,
}

impl From<BafoRequestRow> for BafoRequest {
    fn from(row: BafoRequestRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            vendor_ids: row.vendor_ids,
            line_item_ids: row.line_item_ids,
            message: row.message,
            response_due_date: row.response_due_date,
            status: BafoStatus::parse(&row.status),
            created_by: row.created_by,
            requested_at: row.requested_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BafoResponseRow {
    id: Uuid,
    bafo_request_id: Uuid,
    vendor_id: Uuid,
    revised_total_bid: Decimal,
    line_item_adjustments: serde_json::Value,
    acceptance_status: String,
    late: bool,
    responded_at: DateTime<Utc>,
}

impl From<BafoResponseRow> for BafoResponse {
    fn from(row: BafoResponseRow) -> Self {
        let line_item_adjustments: Vec<LineItemAdjustment> =
            serde_json::from_value(row.line_item_adjustments).unwrap_or_default();
        Self {
            id: row.id,
            bafo_request_id: row.bafo_request_id,
            vendor_id: row.vendor_id,
            revised_total_bid: decimal_to_cents(row.revised_total_bid),
            line_item_adjustments,
            acceptance_status: AcceptanceStatus::parse(&row.acceptance_status),
            late: row.late,
            responded_at: row.responded_at,
        }
    }
}

const REQUEST_COLUMNS: &str = "id, project_id, vendor_ids, line_item_ids, message, \
     response_due_date, status, created_by, requested_at";

const RESPONSE_COLUMNS: &str = "id, bafo_request_id, vendor_id, revised_total_bid, \
     line_item_adjustments, acceptance_status, late, responded_at";

async fn load_request(db: &sqlx::PgPool, request_id: Uuid) -> Result<BafoRequest, ApiError> {
    let row = sqlx::query_as::<_, BafoRequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM bafo_requests WHERE id = $1"
    ))
    .bind(request_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("BAFO round not found"))?;
    Ok(row.into())
}

/// POST /projects/:project_id/bafo
///
/// Open a negotiation round. The vendor and line-item sets are snapshotted
/// here and never change afterwards.
pub async fn create_bafo_round(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateBafoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    if req.vendor_ids.is_empty() {
        return Err(ApiError::bad_request("at least one vendor must be targeted"));
    }
    let now = state.clock.now();
    if req.response_due_date <= now {
        return Err(ApiError::bad_request("response_due_date must be in the future"));
    }

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("Project not found"));
    }

    // Every targeted vendor must have an opened commercial package.
    let opened: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT vendor_id) FROM vendor_submissions
        WHERE project_id = $1 AND channel = 'commercial' AND opened_at IS NOT NULL
          AND vendor_id = ANY($2)
        "#,
    )
    .bind(project_id)
    .bind(&req.vendor_ids)
    .fetch_one(&state.db)
    .await?;
    if opened as usize != req.vendor_ids.len() {
        return Err(ApiError::bad_request(
            "every targeted vendor needs an opened commercial submission",
        ));
    }

    if !req.line_item_ids.is_empty() {
        let known: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM line_items WHERE project_id = $1 AND id = ANY($2)",
        )
        .bind(project_id)
        .bind(&req.line_item_ids)
        .fetch_one(&state.db)
        .await?;
        if known as usize != req.line_item_ids.len() {
            return Err(ApiError::bad_request(
                "one or more line items do not belong to this project",
            ));
        }
    }

    let row = sqlx::query_as::<_, BafoRequestRow>(&format!(
        r#"
        INSERT INTO bafo_requests
            (project_id, vendor_ids, line_item_ids, message, response_due_date, status, created_by, requested_at)
        VALUES ($1, $2, $3, $4, $5, 'sent', $6, $7)
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(project_id)
    .bind(&req.vendor_ids)
    .bind(&req.line_item_ids)
    .bind(&req.message)
    .bind(req.response_due_date)
    .bind(auth.actor_id)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    let mut round: BafoRequest = row.into();

    for vendor_id in &round.vendor_ids {
        state
            .events
            .publish(DomainEvent::BafoRequested {
                project_id,
                bafo_request_id: round.id,
                vendor_id: *vendor_id,
                response_due_date: round.response_due_date,
                occurred_at: now,
            })
            .await;
    }

    // Requests are out; the round now accepts responses.
    let next = round.status.transition_to(BafoStatus::ResponsesPending)?;
    sqlx::query("UPDATE bafo_requests SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(round.id)
        .bind(next.as_str())
        .bind(now)
        .execute(&state.db)
        .await?;
    round.status = next;

    tracing::info!(
        project_id = %project_id,
        bafo_request_id = %round.id,
        vendors = round.vendor_ids.len(),
        "BAFO round opened"
    );

    Ok((StatusCode::CREATED, Json(DataResponse::new(round))))
}

/// GET /projects/:project_id/bafo
pub async fn list_bafo_rounds(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let rows = sqlx::query_as::<_, BafoRequestRow>(&format!(
        "SELECT {REQUEST_COLUMNS} FROM bafo_requests WHERE project_id = $1 ORDER BY requested_at DESC"
    ))
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let rounds: Vec<BafoRequest> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(rounds)))
}

/// POST /bafo/:request_id/responses
///
/// Submit a revised offer. Responses after the due date are recorded and
/// flagged late, never silently accepted as on-time.
pub async fn submit_bafo_response(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<SubmitBafoResponseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let round = load_request(&state.db, request_id).await?;

    if !round.vendor_ids.contains(&auth.actor_id) {
        return Err(ApiError::unauthorized(
            "only vendors targeted by this round may respond",
        ));
    }
    if !round.status.accepts_responses() {
        return Err(ApiError::InvalidStateTransition(format!(
            "BAFO round is {} and does not accept responses",
            round.status.as_str()
        )));
    }
    for adjustment in &req.line_item_adjustments {
        if !round.line_item_ids.is_empty()
            && !round.line_item_ids.contains(&adjustment.line_item_id)
        {
            return Err(ApiError::bad_request(
                "adjustment references a line item outside this round",
            ));
        }
    }

    let now = state.clock.now();
    let late = is_late(now, round.response_due_date);
    let adjustments = serde_json::to_value(&req.line_item_adjustments)
        .map_err(|e| ApiError::internal(format!("Failed to encode adjustments: {e}")))?;

    let row = sqlx::query_as::<_, BafoResponseRow>(&format!(
        r#"
        INSERT INTO bafo_responses
            (bafo_request_id, vendor_id, revised_total_bid, line_item_adjustments, acceptance_status, late, responded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {RESPONSE_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(auth.actor_id)
    .bind(cents_to_decimal(req.revised_total_bid))
    .bind(&adjustments)
    .bind(req.acceptance_status.as_str())
    .bind(late)
    .bind(now)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::conflict("This vendor has already responded to the round")
        }
        _ => ApiError::Database(e),
    })?;

    if late {
        tracing::warn!(
            bafo_request_id = %request_id,
            vendor_id = %auth.actor_id,
            "Late BAFO response recorded"
        );
    }

    let response: BafoResponse = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(response))))
}

/// GET /bafo/:request_id/responses
pub async fn list_bafo_responses(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let rows = sqlx::query_as::<_, BafoResponseRow>(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM bafo_responses WHERE bafo_request_id = $1 ORDER BY responded_at"
    ))
    .bind(request_id)
    .fetch_all(&state.db)
    .await?;

    let responses: Vec<BafoResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(responses)))
}

async fn transition_round(
    state: &AppState,
    auth: &RequireAuth,
    request_id: Uuid,
    next: BafoStatus,
) -> Result<BafoRequest, ApiError> {
    auth.require_staff()?;

    let round = load_request(&state.db, request_id).await?;
    let next = round.status.transition_to(next)?;

    let row = sqlx::query_as::<_, BafoRequestRow>(&format!(
        r#"
        UPDATE bafo_requests SET status = $2, updated_at = $3
        WHERE id = $1 AND status = $4
        RETURNING {REQUEST_COLUMNS}
        "#
    ))
    .bind(request_id)
    .bind(next.as_str())
    .bind(state.clock.now())
    .bind(round.status.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("BAFO round changed concurrently; retry"))?;

    tracing::info!(
        bafo_request_id = %request_id,
        status = next.as_str(),
        actor_id = %auth.actor_id,
        "BAFO round transition"
    );

    Ok(row.into())
}

/// POST /bafo/:request_id/complete
pub async fn complete_bafo_round(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let round = transition_round(&state, &auth, request_id, BafoStatus::Completed).await?;
    Ok(Json(DataResponse::new(round)))
}

/// POST /bafo/:request_id/cancel
pub async fn cancel_bafo_round(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let round = transition_round(&state, &auth, request_id, BafoStatus::Cancelled).await?;
    Ok(Json(DataResponse::new(round)))
}
