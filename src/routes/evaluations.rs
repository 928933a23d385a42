//! Vendor evaluation and ranking routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::evaluations::{
    rank_vendors, CreateEvaluationRequest, EvaluationRecommendation, SubScores, VendorEvaluation,
    VendorStanding,
};
use crate::error::ApiError;
use crate::money::decimal_to_cents;

#[derive(Debug, sqlx::FromRow)]
struct EvaluationRow {
    id: Uuid,
    submission_id: Uuid,
    evaluator_id: Uuid,
    technical_score: Decimal,
    commercial_score: Decimal,
    compliance_score: Decimal,
    composite_score: Decimal,
    recommendation: String,
    notes: Option<String>,
    evaluated_at: DateTime<Utc>,
}

impl From<EvaluationRow> for VendorEvaluation {
    fn from(row: EvaluationRow) -> Self {
        Self {
            id: row.id,
            submission_id: row.submission_id,
            evaluator_id: row.evaluator_id,
            technical_score: row.technical_score.to_f64().unwrap_or(0.0),
            commercial_score: row.commercial_score.to_f64().unwrap_or(0.0),
            compliance_score: row.compliance_score.to_f64().unwrap_or(0.0),
            composite_score: row.composite_score.to_f64().unwrap_or(0.0),
            recommendation: EvaluationRecommendation::parse(&row.recommendation),
            notes: row.notes,
            evaluated_at: row.evaluated_at,
        }
    }
}

const EVALUATION_COLUMNS: &str = "id, submission_id, evaluator_id, technical_score, \
     commercial_score, compliance_score, composite_score, recommendation, notes, evaluated_at";

/// POST /submissions/:submission_id/evaluations
///
/// Score an opened submission. Each call inserts a fresh versioned row; a
/// partial revision carries the evaluator's prior sub-scores forward.
pub async fn create_evaluation(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<CreateEvaluationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let opened_at: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT opened_at FROM vendor_submissions WHERE id = $1")
            .bind(submission_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| ApiError::not_found("Submission not found"))?;
    if opened_at.is_none() {
        return Err(ApiError::SealedBeforeDeadline(
            "submissions can be scored only after opening".to_string(),
        ));
    }

    #[derive(Debug, sqlx::FromRow)]
    struct PriorRow {
        technical_score: Decimal,
        commercial_score: Decimal,
        compliance_score: Decimal,
    }

    let prior = sqlx::query_as::<_, PriorRow>(
        r#"
        SELECT technical_score, commercial_score, compliance_score
        FROM vendor_evaluations
        WHERE submission_id = $1 AND evaluator_id = $2
        ORDER BY evaluated_at DESC
        LIMIT 1
        "#,
    )
    .bind(submission_id)
    .bind(auth.actor_id)
    .fetch_optional(&state.db)
    .await?
    .map(|p| SubScores {
        technical: p.technical_score.to_f64().unwrap_or(0.0),
        commercial: p.commercial_score.to_f64().unwrap_or(0.0),
        compliance: p.compliance_score.to_f64().unwrap_or(0.0),
    });

    let scores = SubScores::resolve_revision(
        req.technical_score,
        req.commercial_score,
        req.compliance_score,
        prior.as_ref(),
    )?;
    scores.validate()?;

    let composite = scores.composite(&state.settings.scoring);
    let recommendation = scores.recommendation(&state.settings.scoring);

    let row = sqlx::query_as::<_, EvaluationRow>(&format!(
        r#"
        INSERT INTO vendor_evaluations
            (submission_id, evaluator_id, technical_score, commercial_score, compliance_score,
             composite_score, recommendation, notes, evaluated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {EVALUATION_COLUMNS}
        "#
    ))
    .bind(submission_id)
    .bind(auth.actor_id)
    .bind(Decimal::from_f64(scores.technical).unwrap_or_default())
    .bind(Decimal::from_f64(scores.commercial).unwrap_or_default())
    .bind(Decimal::from_f64(scores.compliance).unwrap_or_default())
    .bind(Decimal::from_f64(composite).unwrap_or_default().round_dp(2))
    .bind(recommendation.as_str())
    .bind(&req.notes)
    .bind(state.clock.now())
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        submission_id = %submission_id,
        evaluator_id = %auth.actor_id,
        composite = composite,
        recommendation = recommendation.as_str(),
        "Evaluation recorded"
    );

    let evaluation: VendorEvaluation = row.into();
    Ok((StatusCode::CREATED, Json(DataResponse::new(evaluation))))
}

/// GET /submissions/:submission_id/evaluations
pub async fn list_evaluations(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    let rows = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM vendor_evaluations WHERE submission_id = $1 ORDER BY evaluated_at"
    ))
    .bind(submission_id)
    .fetch_all(&state.db)
    .await?;

    let evaluations: Vec<VendorEvaluation> = rows.into_iter().map(Into::into).collect();
    Ok(Json(DataResponse::new(evaluations)))
}

/// GET /projects/:project_id/ranking
///
/// Deterministic leaderboard over evaluated commercial submissions. Scores
/// are the mean of each evaluator's sub-scores per submission.
pub async fn get_ranking(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    auth.require_staff()?;

    #[derive(Debug, sqlx::FromRow)]
    struct StandingRow {
        submission_id: Uuid,
        vendor_id: Uuid,
        total_bid_amount: Decimal,
        sealed_at: DateTime<Utc>,
        technical: Decimal,
        commercial: Decimal,
        compliance: Decimal,
    }

    let rows = sqlx::query_as::<_, StandingRow>(
        r#"
        SELECT s.id AS submission_id, s.vendor_id, s.total_bid_amount, s.sealed_at,
               AVG(e.technical_score) AS technical,
               AVG(e.commercial_score) AS commercial,
               AVG(e.compliance_score) AS compliance
        FROM vendor_submissions s
        JOIN vendor_evaluations e ON e.submission_id = s.id
        WHERE s.project_id = $1
          AND s.channel = 'commercial'
          AND s.opened_at IS NOT NULL
          AND s.total_bid_amount IS NOT NULL
          AND s.sealed_at IS NOT NULL
        GROUP BY s.id, s.vendor_id, s.total_bid_amount, s.sealed_at
        "#,
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let standings: Vec<VendorStanding> = rows
        .into_iter()
        .map(|r| VendorStanding {
            vendor_id: r.vendor_id,
            submission_id: r.submission_id,
            scores: SubScores {
                technical: r.technical.to_f64().unwrap_or(0.0),
                commercial: r.commercial.to_f64().unwrap_or(0.0),
                compliance: r.compliance.to_f64().unwrap_or(0.0),
            },
            total_bid_amount: decimal_to_cents(r.total_bid_amount),
            submitted_at: r.sealed_at,
        })
        .collect();

    let ranked = rank_vendors(&standings, &state.settings.scoring);
    Ok(Json(DataResponse::new(ranked)))
}
