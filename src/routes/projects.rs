//! Bid project and line item routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::pagination::PaginationParams;
use crate::api::response::DataResponse;
use crate::api::Paginated;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::projects::{
    BidProject, CreateLineItemRequest, CreateProjectRequest, LineItem, ProjectStatus,
    TransitionProjectRequest,
};
use crate::error::ApiError;
use crate::money::{cents_to_decimal, decimal_to_cents, opt_cents_to_decimal, opt_decimal_to_cents};

/// Database row for a bid project
#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    rfp_number: String,
    description: Option<String>,
    total_budget: Option<Decimal>,
    status: String,
    bid_due_date: DateTime<Utc>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for BidProject {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            rfp_number: row.rfp_number,
            description: row.description,
            total_budget: opt_decimal_to_cents(row.total_budget),
            status: ProjectStatus::parse(&row.status),
            bid_due_date: row.bid_due_date,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineItemRow {
    id: Uuid,
    project_id: Uuid,
    item_code: String,
    description: String,
    quantity: Decimal,
    unit_of_measure: String,
    engineer_estimate: Decimal,
    created_at: DateTime<Utc>,
}

impl From<LineItemRow> for LineItem {
    fn from(row: LineItemRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            item_code: row.item_code,
            description: row.description,
            quantity: row.quantity.to_f64().unwrap_or(0.0),
            unit_of_measure: row.unit_of_measure,
            engineer_estimate: decimal_to_cents(row.engineer_estimate),
            created_at: row.created_at,
        }
    }
}

const PROJECT_COLUMNS: &str = "id, name, rfp_number, description, total_budget, status, \
     bid_due_date, created_by, created_at, updated_at";

/// POST /projects
pub async fn create_project(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    if req.name.trim().is_empty() || req.rfp_number.trim().is_empty() {
        return Err(ApiError::bad_request("name and rfp_number are required"));
    }
    if req.bid_due_date <= state.clock.now() {
        return Err(ApiError::bad_request("bid_due_date must be in the future"));
    }

    tracing::info!(
        actor_id = %auth.actor_id,
        rfp_number = %req.rfp_number,
        "Creating bid project"
    );

    let row = sqlx::query_as::<_, ProjectRow>(&format!(
        r#"
        INSERT INTO bid_projects (name, rfp_number, description, total_budget, bid_due_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {PROJECT_COLUMNS}
        "#
    ))
    .bind(&req.name)
    .bind(&req.rfp_number)
    .bind(&req.description)
    .bind(opt_cents_to_decimal(req.total_budget))
    .bind(req.bid_due_date)
    .bind(auth.actor_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::conflict("A project with this RFP number already exists")
        }
        _ => ApiError::Database(e),
    })?;

    let project: BidProject = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(project))))
}

/// GET /projects
pub async fn list_projects(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bid_projects")
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM bid_projects ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(params.limit() as i64)
    .bind(params.offset() as i64)
    .fetch_all(&state.db)
    .await?;

    let projects: Vec<BidProject> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(projects, &params, total as u64))
}

/// GET /projects/:project_id
pub async fn get_project(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let row = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM bid_projects WHERE id = $1"
    ))
    .bind(project_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let project: BidProject = row.into();
    Ok(Json(DataResponse::new(project)))
}

/// POST /projects/:project_id/transition
pub async fn transition_project(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<TransitionProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let current: String = sqlx::query_scalar("SELECT status FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let next = ProjectStatus::parse(&current).transition_to(req.status)?;

    // The status in the WHERE clause makes concurrent transitions race
    // safely: the loser sees zero rows and retries against fresh state.
    let row = sqlx::query_as::<_, ProjectRow>(&format!(
        r#"
        UPDATE bid_projects SET status = $2, updated_at = $3
        WHERE id = $1 AND status = $4
        RETURNING {PROJECT_COLUMNS}
        "#
    ))
    .bind(project_id)
    .bind(next.as_str())
    .bind(state.clock.now())
    .bind(&current)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::conflict("Project status changed concurrently; retry"))?;

    tracing::info!(
        project_id = %project_id,
        from = %current,
        to = next.as_str(),
        actor_id = %auth.actor_id,
        "Project status transition"
    );

    let project: BidProject = row.into();
    Ok(Json(DataResponse::new(project)))
}

/// POST /projects/:project_id/line-items
pub async fn create_line_item(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(req): Json<CreateLineItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let status: String = sqlx::query_scalar("SELECT status FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    // The schedule of values is frozen once bidding opens.
    if ProjectStatus::parse(&status) != ProjectStatus::Draft {
        return Err(ApiError::InvalidStateTransition(
            "line items can only be added while the project is in draft".to_string(),
        ));
    }

    if req.engineer_estimate < 0 {
        return Err(ApiError::bad_request("engineer_estimate cannot be negative"));
    }

    let row = sqlx::query_as::<_, LineItemRow>(
        r#"
        INSERT INTO line_items (project_id, item_code, description, quantity, unit_of_measure, engineer_estimate)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, project_id, item_code, description, quantity, unit_of_measure, engineer_estimate, created_at
        "#,
    )
    .bind(project_id)
    .bind(&req.item_code)
    .bind(&req.description)
    .bind(Decimal::from_f64(req.quantity).unwrap_or(Decimal::ONE))
    .bind(&req.unit_of_measure)
    .bind(cents_to_decimal(req.engineer_estimate))
    .fetch_one(&state.db)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::conflict("A line item with this code already exists on the project")
        }
        _ => ApiError::Database(e),
    })?;

    let item: LineItem = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(item))))
}

/// GET /projects/:project_id/line-items
pub async fn list_line_items(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query_as::<_, LineItemRow>(
        r#"
        SELECT id, project_id, item_code, description, quantity, unit_of_measure, engineer_estimate, created_at
        FROM line_items WHERE project_id = $1 ORDER BY item_code
        "#,
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let items: Vec<LineItem> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(items)))
}
