//! Award recommendation routes.
//!
//! The recommendation is the terminal decision record for a procurement
//! event. Approval requires a second identity, flips the project to awarded,
//! and emits the award event exactly once.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::awards::{
    approve_action, check_approver, ApprovalStatus, ApproveAction, AwardRecommendation,
    CreateAwardRequest, RejectAwardRequest,
};
use crate::domain::events::DomainEvent;
use crate::domain::projects::ProjectStatus;
use crate::error::ApiError;
use crate::middleware::request_id::RequestIdExt;
use crate::money::{cents_to_decimal, decimal_to_cents};
use crate::services::leveling;
use crate::services::memo::AwardMemoPayload;

#[derive(Debug, sqlx::FromRow)]
struct AwardRow {
    id: Uuid,
    project_id: Uuid,
    recommended_vendor_id: Uuid,
    recommended_submission_id: Option<Uuid>,
    recommended_amount: Decimal,
    justification: String,
    approval_status: String,
    prepared_by: Uuid,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    supersedes: Option<Uuid>,
    contract_reference: Option<String>,
    memo_text: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AwardRow> for AwardRecommendation {
    fn from(row: AwardRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            recommended_vendor_id: row.recommended_vendor_id,
            recommended_submission_id: row.recommended_submission_id,
            recommended_amount: decimal_to_cents(row.recommended_amount),
            justification: row.justification,
            approval_status: ApprovalStatus::parse(&row.approval_status),
            prepared_by: row.prepared_by,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejection_reason: row.rejection_reason,
            supersedes: row.supersedes,
            contract_reference: row.contract_reference,
            memo_text: row.memo_text,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const AWARD_COLUMNS: &str = "id, project_id, recommended_vendor_id, recommended_submission_id, \
     recommended_amount, justification, approval_status, prepared_by, approved_by, approved_at, \
     rejection_reason, supersedes, contract_reference, memo_text, created_at, updated_at";

async fn load_award(db: &sqlx::PgPool, award_id: Uuid) -> Result<AwardRow, ApiError> {
    sqlx::query_as::<_, AwardRow>(&format!(
        "SELECT {AWARD_COLUMNS} FROM award_recommendations WHERE id = $1"
    ))
    .bind(award_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Award recommendation not found"))
}

/// POST /projects/:project_id/award
///
/// Draft a recommendation. At most one non-rejected recommendation may
/// exist per project; a reversal supersedes the rejected one explicitly.
pub async fn create_award(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateAwardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    if req.recommended_amount <= 0 {
        return Err(ApiError::bad_request("recommended_amount must be positive"));
    }
    if req.justification.trim().is_empty() {
        return Err(ApiError::bad_request("justification is required"));
    }

    let status: String = sqlx::query_scalar("SELECT status FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    if ProjectStatus::parse(&status) != ProjectStatus::Evaluation {
        return Err(ApiError::InvalidStateTransition(
            "award recommendations are prepared while the project is in evaluation".to_string(),
        ));
    }

    let vendor_exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM vendors WHERE id = $1")
        .bind(req.recommended_vendor_id)
        .fetch_optional(&state.db)
        .await?;
    if vendor_exists.is_none() {
        return Err(ApiError::bad_request("recommended vendor does not exist"));
    }

    if let Some(submission_id) = req.recommended_submission_id {
        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT vendor_id FROM vendor_submissions WHERE id = $1 AND project_id = $2",
        )
        .bind(submission_id)
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?;
        match owner {
            Some(v) if v == req.recommended_vendor_id => {}
            Some(_) => {
                return Err(ApiError::bad_request(
                    "recommended submission belongs to a different vendor",
                ))
            }
            None => return Err(ApiError::bad_request("recommended submission not found")),
        }
    }

    if let Some(prior_id) = req.supersedes {
        let prior = load_award(&state.db, prior_id).await?;
        if prior.project_id != project_id
            || ApprovalStatus::parse(&prior.approval_status) != ApprovalStatus::Rejected
        {
            return Err(ApiError::bad_request(
                "a recommendation may only supersede a rejected one on the same project",
            ));
        }
    }

    let now = state.clock.now();
    let row = sqlx::query_as::<_, AwardRow>(&format!(
        r#"
        INSERT INTO award_recommendations
            (project_id, recommended_vendor_id, recommended_submission_id, recommended_amount,
             justification, approval_status, prepared_by, supersedes, contract_reference,
             created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'draft', $6, $7, $8, $9, $9)
        RETURNING {AWARD_COLUMNS}
        "#
    ))
    .bind(project_id)
    .bind(req.recommended_vendor_id)
    .bind(req.recommended_submission_id)
    .bind(cents_to_decimal(req.recommended_amount))
    .bind(req.justification.trim())
    .bind(auth.actor_id)
    .bind(req.supersedes)
    .bind(&req.contract_reference)
    .bind(now)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::conflict("An active award recommendation already exists for this project")
        }
        _ => ApiError::Database(e),
    })?;

    tracing::info!(
        project_id = %project_id,
        recommendation_id = %row.id,
        prepared_by = %auth.actor_id,
        "Award recommendation drafted"
    );

    let award: AwardRecommendation = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(award))))
}

/// GET /projects/:project_id/award
///
/// The active (non-rejected) recommendation for a project.
pub async fn get_active_award(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let row = sqlx::query_as::<_, AwardRow>(&format!(
        r#"
        SELECT {AWARD_COLUMNS} FROM award_recommendations
        WHERE project_id = $1 AND approval_status <> 'rejected'
        "#
    ))
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("No active award recommendation for this project"))?;

    let award: AwardRecommendation = row.into();
    Ok(Json(DataResponse::new(award)))
}

/// GET /projects/:project_id/award/history
pub async fn list_award_history(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let rows = sqlx::query_as::<_, AwardRow>(&format!(
        "SELECT {AWARD_COLUMNS} FROM award_recommendations WHERE project_id = $1 ORDER BY created_at"
    ))
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let awards: Vec<AwardRecommendation> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(awards)))
}

/// POST /awards/:award_id/submit
///
/// Move a draft into review.
pub async fn submit_award_for_review(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(award_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let current = load_award(&state.db, award_id).await?;
    let status = ApprovalStatus::parse(&current.approval_status);
    let next = status.transition_to(ApprovalStatus::UnderReview)?;

    let row = sqlx::query_as::<_, AwardRow>(&format!(
        r#"
        UPDATE award_recommendations SET approval_status = $2, updated_at = $3
        WHERE id = $1 AND approval_status = $4
        RETURNING {AWARD_COLUMNS}
        "#
    ))
    .bind(award_id)
    .bind(next.as_str())
    .bind(state.clock.now())
    .bind(status.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Recommendation changed concurrently; retry"))?;

    let award: AwardRecommendation = row.into();
    Ok(Json(DataResponse::new(award)))
}

/// POST /awards/:award_id/approve
///
/// Approve a recommendation. The approver must differ from the preparer;
/// the check is enforced again in the UPDATE predicate so two racing
/// approvals cannot both land. Retrying against an already-approved
/// recommendation is accepted and completes any side effect an
/// interrupted attempt left undone.
pub async fn approve_award(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(award_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_admin()?;

    let current = load_award(&state.db, award_id).await?;
    let status = ApprovalStatus::parse(&current.approval_status);
    let now = state.clock.now();

    let row = match approve_action(status)? {
        ApproveAction::Transition => {
            check_approver(current.prepared_by, auth.actor_id)?;
            sqlx::query_as::<_, AwardRow>(&format!(
                r#"
                UPDATE award_recommendations
                SET approval_status = 'approved', approved_by = $2, approved_at = $3, updated_at = $3
                WHERE id = $1 AND approval_status = 'under_review' AND prepared_by <> $2
                RETURNING {AWARD_COLUMNS}
                "#
            ))
            .bind(award_id)
            .bind(auth.actor_id)
            .bind(now)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::conflict("Recommendation changed concurrently; retry"))?
        }
        // A retried approval. The status write already landed; fall through
        // so an attempt interrupted before the project flip or the event
        // claim can finish the job.
        ApproveAction::AlreadyApproved => current,
    };

    // Approval closes the procurement event.
    let moved = sqlx::query(
        "UPDATE bid_projects SET status = 'awarded', updated_at = $2 WHERE id = $1 AND status = 'evaluation'",
    )
    .bind(row.project_id)
    .bind(now)
    .execute(&state.db)
    .await?;
    if moved.rows_affected() == 0 && status != ApprovalStatus::Approved {
        tracing::warn!(
            project_id = %row.project_id,
            recommendation_id = %award_id,
            "Project left evaluation before award approval landed"
        );
    }

    // Flag flip and publish are separate steps; the flag guarantees at most
    // one publish attempt claims the event even if approval is retried.
    let claimed = sqlx::query(
        "UPDATE award_recommendations SET award_event_emitted = TRUE WHERE id = $1 AND award_event_emitted = FALSE",
    )
    .bind(award_id)
    .execute(&state.db)
    .await?;
    if claimed.rows_affected() > 0 {
        state
            .events
            .publish(DomainEvent::AwardIssued {
                project_id: row.project_id,
                recommendation_id: award_id,
                vendor_id: row.recommended_vendor_id,
                amount: decimal_to_cents(row.recommended_amount),
                contract_reference: row.contract_reference.clone(),
                occurred_at: row.approved_at.unwrap_or(now),
            })
            .await;
    }

    tracing::info!(
        recommendation_id = %award_id,
        project_id = %row.project_id,
        approved_by = %auth.actor_id,
        "Award recommendation approved"
    );

    let award: AwardRecommendation = row.into();
    Ok(Json(DataResponse::new(award)))
}

/// POST /awards/:award_id/reject
pub async fn reject_award(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(award_id): Path<Uuid>,
    Json(req): Json<RejectAwardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_admin()?;

    let current = load_award(&state.db, award_id).await?;
    let status = ApprovalStatus::parse(&current.approval_status);
    status.transition_to(ApprovalStatus::Rejected)?;

    let row = sqlx::query_as::<_, AwardRow>(&format!(
        r#"
        UPDATE award_recommendations
        SET approval_status = 'rejected', rejection_reason = $2, updated_at = $3
        WHERE id = $1 AND approval_status = 'under_review'
        RETURNING {AWARD_COLUMNS}
        "#
    ))
    .bind(award_id)
    .bind(&req.reason)
    .bind(state.clock.now())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Recommendation changed concurrently; retry"))?;

    tracing::info!(
        recommendation_id = %award_id,
        rejected_by = %auth.actor_id,
        "Award recommendation rejected"
    );

    let award: AwardRecommendation = row.into();
    Ok(Json(DataResponse::new(award)))
}

/// POST /awards/:award_id/memo
///
/// Generate the award memo via the memo collaborator and store the text on
/// the recommendation. Regeneration overwrites the prior text.
pub async fn generate_award_memo(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(award_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let current = load_award(&state.db, award_id).await?;
    let payload = build_memo_payload(&state, &current).await?;

    let memo = state
        .memo_client
        .generate_award_memo(&payload, headers.request_id())
        .await?;

    let row = sqlx::query_as::<_, AwardRow>(&format!(
        r#"
        UPDATE award_recommendations SET memo_text = $2, updated_at = $3
        WHERE id = $1
        RETURNING {AWARD_COLUMNS}
        "#
    ))
    .bind(award_id)
    .bind(&memo)
    .bind(state.clock.now())
    .fetch_one(&state.db)
    .await?;

    let award: AwardRecommendation = row.into();
    Ok(Json(DataResponse::new(award)))
}

async fn build_memo_payload(
    state: &AppState,
    award: &AwardRow,
) -> Result<AwardMemoPayload, ApiError> {
    #[derive(Debug, sqlx::FromRow)]
    struct ProjectSnapshot {
        name: String,
        rfp_number: String,
        status: String,
        bid_due_date: DateTime<Utc>,
        total_budget: Option<Decimal>,
    }

    let project = sqlx::query_as::<_, ProjectSnapshot>(
        "SELECT name, rfp_number, status, bid_due_date, total_budget FROM bid_projects WHERE id = $1",
    )
    .bind(award.project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let analyses = leveling::latest_analyses(&state.db, award.project_id).await?;
    let leveling_snapshots = analyses
        .iter()
        .map(|a| serde_json::to_value(a))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::internal(format!("Failed to encode leveling snapshot: {e}")))?;

    #[derive(Debug, sqlx::FromRow)]
    struct EvaluationSummaryRow {
        submissions_evaluated: i64,
        evaluations: i64,
        avg_composite: Option<Decimal>,
    }

    let eval = sqlx::query_as::<_, EvaluationSummaryRow>(
        r#"
        SELECT COUNT(DISTINCT e.submission_id) AS submissions_evaluated,
               COUNT(*) AS evaluations,
               AVG(e.composite_score) AS avg_composite
        FROM vendor_evaluations e
        JOIN vendor_submissions s ON s.id = e.submission_id
        WHERE s.project_id = $1
        "#,
    )
    .bind(award.project_id)
    .fetch_one(&state.db)
    .await?;

    #[derive(Debug, sqlx::FromRow)]
    struct ComplianceRow {
        total_submissions: i64,
        sealed: i64,
        opened: i64,
        denied_accesses: i64,
    }

    let compliance = sqlx::query_as::<_, ComplianceRow>(
        r#"
        SELECT COUNT(*) AS total_submissions,
               COUNT(*) FILTER (WHERE s.sealed_at IS NOT NULL) AS sealed,
               COUNT(*) FILTER (WHERE s.opened_at IS NOT NULL) AS opened,
               (SELECT COUNT(*) FROM access_log_entries l
                 JOIN vendor_submissions ls ON ls.id = l.submission_id
                 WHERE ls.project_id = $1 AND l.outcome = 'denied') AS denied_accesses
        FROM vendor_submissions s
        WHERE s.project_id = $1
        "#,
    )
    .bind(award.project_id)
    .fetch_one(&state.db)
    .await?;

    Ok(AwardMemoPayload {
        project: json!({
            "id": award.project_id,
            "name": project.name,
            "rfp_number": project.rfp_number,
            "status": project.status,
            "bid_due_date": project.bid_due_date,
            "total_budget": project.total_budget.map(decimal_to_cents),
            "recommended_vendor_id": award.recommended_vendor_id,
            "recommended_amount": decimal_to_cents(award.recommended_amount),
            "justification": award.justification,
        }),
        leveling_snapshots,
        evaluation_summary: json!({
            "submissions_evaluated": eval.submissions_evaluated,
            "evaluations": eval.evaluations,
            "average_composite": eval.avg_composite.map(|d| d.to_string()),
        }),
        compliance_summary: json!({
            "total_submissions": compliance.total_submissions,
            "sealed": compliance.sealed,
            "opened": compliance.opened,
            "denied_accesses": compliance.denied_accesses,
        }),
    })
}
