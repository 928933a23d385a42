//! Vendor registry routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::pagination::PaginationParams;
use crate::api::response::DataResponse;
use crate::api::Paginated;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::vendors::{CreateVendorRequest, Vendor};
use crate::error::ApiError;
use crate::money::{opt_cents_to_decimal, opt_decimal_to_cents};

#[derive(Debug, sqlx::FromRow)]
struct VendorRow {
    id: Uuid,
    name: String,
    contact_email: Option<String>,
    bonding_capacity: Option<Decimal>,
    insurance_limit: Option<Decimal>,
    certifications: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VendorRow> for Vendor {
    fn from(row: VendorRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            contact_email: row.contact_email,
            bonding_capacity: opt_decimal_to_cents(row.bonding_capacity),
            insurance_limit: opt_decimal_to_cents(row.insurance_limit),
            certifications: row.certifications,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const VENDOR_COLUMNS: &str =
    "id, name, contact_email, bonding_capacity, insurance_limit, certifications, created_at, updated_at";

/// POST /vendors
pub async fn create_vendor(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVendorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("vendor name is required"));
    }

    let row = sqlx::query_as::<_, VendorRow>(&format!(
        r#"
        INSERT INTO vendors (name, contact_email, bonding_capacity, insurance_limit, certifications)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {VENDOR_COLUMNS}
        "#
    ))
    .bind(&req.name)
    .bind(&req.contact_email)
    .bind(opt_cents_to_decimal(req.bonding_capacity))
    .bind(opt_cents_to_decimal(req.insurance_limit))
    .bind(&req.certifications)
    .fetch_one(&state.db)
    .await?;

    let vendor: Vendor = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(vendor))))
}

/// GET /vendors
pub async fn list_vendors(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors")
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, VendorRow>(&format!(
        "SELECT {VENDOR_COLUMNS} FROM vendors ORDER BY name LIMIT $1 OFFSET $2"
    ))
    .bind(params.limit() as i64)
    .bind(params.offset() as i64)
    .fetch_all(&state.db)
    .await?;

    let vendors: Vec<Vendor> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(vendors, &params, total as u64))
}

/// GET /vendors/:vendor_id
pub async fn get_vendor(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    // A vendor may read its own record; staff may read any.
    if !auth.role.is_staff() && auth.actor_id != vendor_id {
        return Err(ApiError::unauthorized("vendors may only read their own record"));
    }

    let row = sqlx::query_as::<_, VendorRow>(&format!(
        "SELECT {VENDOR_COLUMNS} FROM vendors WHERE id = $1"
    ))
    .bind(vendor_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Vendor not found"))?;

    let vendor: Vendor = row.into();
    Ok(Json(DataResponse::new(vendor)))
}
