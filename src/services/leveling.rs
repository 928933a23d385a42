//! Line-item leveling runner.
//!
//! One run covers a whole project: bids are collected from opened commercial
//! submissions only, the statistics kernel runs per line item, and every run
//! writes a fresh immutable snapshot batch keyed by `run_id`. Re-runs for
//! the same project serialize on an in-process lock; unrelated projects
//! level concurrently.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::events::DomainEvent;
use crate::domain::leveling::{
    recommendation_text, LineItemAnalysis, MarketCompetitiveness, PriceVolatility,
};
use crate::error::ApiError;
use crate::money::{decimal_to_cents, opt_cents_to_decimal};
use crate::stats::{detect_outliers, PriceSummary};

/// Registry of per-project run locks. Entries are created on demand and kept
/// for the process lifetime; the map stays small (one entry per project that
/// has ever leveled in this process).
#[derive(Clone, Default)]
pub struct LevelingLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LevelingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_project(&self, project_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(project_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Outcome of one leveling run.
#[derive(Debug, serde::Serialize)]
pub struct LevelingRunSummary {
    pub run_id: Uuid,
    pub project_id: Uuid,
    pub analysis_date: DateTime<Utc>,
    pub line_items_analyzed: u32,
    pub responding_vendors: u32,
    pub recommended_reviews: u32,
    pub analyses: Vec<LineItemAnalysis>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    engineer_estimate: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct BidRow {
    line_item_id: Uuid,
    vendor_id: Uuid,
    total_price: Decimal,
    is_no_bid: bool,
}

/// Run leveling for a project. Holds the project lock for the duration; a
/// concurrent re-run waits and then produces its own snapshot batch.
pub async fn run_leveling(
    state: &AppState,
    triggered_by: Uuid,
    project_id: Uuid,
) -> Result<LevelingRunSummary, ApiError> {
    let lock = state.leveling_locks.for_project(project_id);
    let _guard = lock.lock().await;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM bid_projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("Project not found"));
    }

    let items = sqlx::query_as::<_, ItemRow>(
        "SELECT id, engineer_estimate FROM line_items WHERE project_id = $1 ORDER BY item_code",
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    if items.is_empty() {
        return Err(ApiError::InsufficientData(
            "project has no line items to level".to_string(),
        ));
    }

    // Opened commercial packages are the only admissible source of pricing.
    let participating: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT vendor_id) FROM vendor_submissions
        WHERE project_id = $1 AND channel = 'commercial' AND opened_at IS NOT NULL
        "#,
    )
    .bind(project_id)
    .fetch_one(&state.db)
    .await?;

    let bids = sqlx::query_as::<_, BidRow>(
        r#"
        SELECT b.line_item_id, s.vendor_id, b.total_price, b.is_no_bid
        FROM vendor_line_item_bids b
        JOIN vendor_submissions s ON s.id = b.submission_id
        WHERE s.project_id = $1 AND s.channel = 'commercial' AND s.opened_at IS NOT NULL
        "#,
    )
    .bind(project_id)
    .fetch_all(&state.db)
    .await?;

    let mut by_item: HashMap<Uuid, Vec<&BidRow>> = HashMap::new();
    for bid in &bids {
        by_item.entry(bid.line_item_id).or_default().push(bid);
    }

    let responding_project_wide: HashSet<Uuid> = bids
        .iter()
        .filter(|b| !b.is_no_bid)
        .map(|b| b.vendor_id)
        .collect();
    if responding_project_wide.is_empty() {
        return Err(ApiError::InsufficientData(
            "no responding vendors across the project; nothing to level".to_string(),
        ));
    }

    let run_id = Uuid::new_v4();
    let now = state.clock.now();
    let settings = &state.settings.leveling;

    let mut analyses = Vec::with_capacity(items.len());
    let mut recommended_reviews = 0u32;

    let mut tx = state.db.begin().await?;
    for item in &items {
        let item_bids = by_item.get(&item.id).map(Vec::as_slice).unwrap_or(&[]);
        let no_bid_count = item_bids.iter().filter(|b| b.is_no_bid).count();

        let priced: Vec<&&BidRow> = item_bids.iter().filter(|b| !b.is_no_bid).collect();
        let values: Vec<f64> = priced
            .iter()
            .map(|b| decimal_to_cents(b.total_price) as f64)
            .collect();

        let summary = PriceSummary::compute(&values);
        let outliers = detect_outliers(&values, settings.outlier_method, settings.outlier_threshold);
        let outlier_vendor_ids: Vec<Uuid> =
            outliers.iter().map(|o| priced[o.index].vendor_id).collect();

        let estimate_cents = decimal_to_cents(item.engineer_estimate);
        let volatility = PriceVolatility::classify(summary.coefficient_of_variation, settings);
        let competitiveness =
            MarketCompetitiveness::classify(summary.average, estimate_cents as f64, settings);
        let avg_vs_estimate_variance = if summary.count > 0 && estimate_cents > 0 {
            Some((summary.average - estimate_cents as f64) / estimate_cents as f64)
        } else {
            None
        };

        let responding = summary.count as i32;
        let low_confidence = (responding as usize) < settings.minimum_bids_for_analysis;
        let partial_data = responding < participating as i32;
        let recommendation = recommendation_text(
            &summary,
            outliers.len(),
            volatility,
            competitiveness,
            low_confidence,
        );

        if !outliers.is_empty() || volatility == PriceVolatility::High {
            recommended_reviews += 1;
        }

        let analysis = LineItemAnalysis {
            id: Uuid::new_v4(),
            line_item_id: item.id,
            run_id,
            analysis_date: now,
            participating_vendors: participating as i32,
            responding_vendors: responding,
            no_bid_count: no_bid_count as i32,
            low_bid: (summary.count > 0).then(|| summary.low as i64),
            high_bid: (summary.count > 0).then(|| summary.high as i64),
            average_bid: (summary.count > 0).then(|| summary.average.round() as i64),
            median_bid: (summary.count > 0).then(|| summary.median.round() as i64),
            standard_deviation: summary.standard_deviation,
            coefficient_variation: summary.coefficient_of_variation,
            engineer_estimate: estimate_cents,
            avg_vs_estimate_variance,
            outlier_method: settings.outlier_method.as_str().to_string(),
            outlier_threshold: settings.outlier_threshold,
            outlier_vendor_ids,
            price_volatility: volatility,
            market_competitiveness: competitiveness,
            low_confidence,
            partial_data,
            recommendation,
        };

        sqlx::query(
            r#"
            INSERT INTO line_item_analyses
                (id, line_item_id, run_id, analysis_date, participating_vendors,
                 responding_vendors, no_bid_count, low_bid, high_bid, average_bid, median_bid,
                 standard_deviation, coefficient_variation, engineer_estimate,
                 avg_vs_estimate_variance, outlier_method, outlier_threshold, outlier_vendor_ids,
                 price_volatility, market_competitiveness, low_confidence, partial_data,
                 recommendation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(analysis.id)
        .bind(analysis.line_item_id)
        .bind(run_id)
        .bind(now)
        .bind(analysis.participating_vendors)
        .bind(analysis.responding_vendors)
        .bind(analysis.no_bid_count)
        .bind(opt_cents_to_decimal(analysis.low_bid))
        .bind(opt_cents_to_decimal(analysis.high_bid))
        .bind(opt_cents_to_decimal(analysis.average_bid))
        .bind(opt_cents_to_decimal(analysis.median_bid))
        .bind(analysis.standard_deviation)
        .bind(analysis.coefficient_variation)
        .bind(opt_cents_to_decimal(Some(analysis.engineer_estimate)))
        .bind(analysis.avg_vs_estimate_variance)
        .bind(&analysis.outlier_method)
        .bind(analysis.outlier_threshold)
        .bind(&analysis.outlier_vendor_ids)
        .bind(analysis.price_volatility.as_str())
        .bind(analysis.market_competitiveness.as_str())
        .bind(analysis.low_confidence)
        .bind(analysis.partial_data)
        .bind(&analysis.recommendation)
        .execute(&mut *tx)
        .await?;

        analyses.push(analysis);
    }
    tx.commit().await?;

    tracing::info!(
        project_id = %project_id,
        run_id = %run_id,
        triggered_by = %triggered_by,
        line_items = analyses.len(),
        responding_vendors = responding_project_wide.len(),
        recommended_reviews,
        "Leveling run completed"
    );

    state
        .events
        .publish(DomainEvent::LevelingCompleted {
            project_id,
            run_id,
            line_items_analyzed: analyses.len() as u32,
            responding_vendors: responding_project_wide.len() as u32,
            recommended_reviews,
            occurred_at: now,
        })
        .await;

    Ok(LevelingRunSummary {
        run_id,
        project_id,
        analysis_date: now,
        line_items_analyzed: analyses.len() as u32,
        responding_vendors: responding_project_wide.len() as u32,
        recommended_reviews,
        analyses,
    })
}

/// Snapshots from the most recent run for a project, newest run first.
pub async fn latest_analyses(
    db: &sqlx::PgPool,
    project_id: Uuid,
) -> Result<Vec<LineItemAnalysis>, ApiError> {
    #[derive(Debug, sqlx::FromRow)]
    struct AnalysisRow {
        id: Uuid,
        line_item_id: Uuid,
        run_id: Uuid,
        analysis_date: DateTime<Utc>,
        participating_vendors: i32,
        responding_vendors: i32,
        no_bid_count: i32,
        low_bid: Option<Decimal>,
        high_bid: Option<Decimal>,
        average_bid: Option<Decimal>,
        median_bid: Option<Decimal>,
        standard_deviation: f64,
        coefficient_variation: f64,
        engineer_estimate: Decimal,
        avg_vs_estimate_variance: Option<f64>,
        outlier_method: String,
        outlier_threshold: f64,
        outlier_vendor_ids: Vec<Uuid>,
        price_volatility: String,
        market_competitiveness: String,
        low_confidence: bool,
        partial_data: bool,
        recommendation: String,
    }

    let rows = sqlx::query_as::<_, AnalysisRow>(
        r#"
        SELECT a.id, a.line_item_id, a.run_id, a.analysis_date, a.participating_vendors,
               a.responding_vendors, a.no_bid_count, a.low_bid, a.high_bid, a.average_bid,
               a.median_bid, a.standard_deviation, a.coefficient_variation, a.engineer_estimate,
               a.avg_vs_estimate_variance, a.outlier_method, a.outlier_threshold,
               a.outlier_vendor_ids, a.price_volatility, a.market_competitiveness,
               a.low_confidence, a.partial_data, a.recommendation
        FROM line_item_analyses a
        JOIN line_items li ON li.id = a.line_item_id
        WHERE li.project_id = $1
          AND a.run_id = (
            SELECT a2.run_id FROM line_item_analyses a2
            JOIN line_items li2 ON li2.id = a2.line_item_id
            WHERE li2.project_id = $1
            ORDER BY a2.analysis_date DESC
            LIMIT 1
          )
        ORDER BY a.line_item_id
        "#,
    )
    .bind(project_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| LineItemAnalysis {
            id: r.id,
            line_item_id: r.line_item_id,
            run_id: r.run_id,
            analysis_date: r.analysis_date,
            participating_vendors: r.participating_vendors,
            responding_vendors: r.responding_vendors,
            no_bid_count: r.no_bid_count,
            low_bid: r.low_bid.map(decimal_to_cents),
            high_bid: r.high_bid.map(decimal_to_cents),
            average_bid: r.average_bid.map(decimal_to_cents),
            median_bid: r.median_bid.map(decimal_to_cents),
            standard_deviation: r.standard_deviation,
            coefficient_variation: r.coefficient_variation,
            engineer_estimate: decimal_to_cents(r.engineer_estimate),
            avg_vs_estimate_variance: r.avg_vs_estimate_variance,
            outlier_method: r.outlier_method,
            outlier_threshold: r.outlier_threshold,
            outlier_vendor_ids: r.outlier_vendor_ids,
            price_volatility: parse_volatility(&r.price_volatility),
            market_competitiveness: parse_competitiveness(&r.market_competitiveness),
            low_confidence: r.low_confidence,
            partial_data: r.partial_data,
            recommendation: r.recommendation,
        })
        .collect())
}

fn parse_volatility(s: &str) -> PriceVolatility {
    match s {
        "medium" => PriceVolatility::Medium,
        "high" => PriceVolatility::High,
        _ => PriceVolatility::Low,
    }
}

fn parse_competitiveness(s: &str) -> MarketCompetitiveness {
    match s {
        "poor" => MarketCompetitiveness::Poor,
        "good" => MarketCompetitiveness::Good,
        "excellent" => MarketCompetitiveness::Excellent,
        _ => MarketCompetitiveness::Fair,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_registry_hands_out_one_lock_per_project() {
        let locks = LevelingLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(Arc::ptr_eq(&locks.for_project(a), &locks.for_project(a)));
        assert!(!Arc::ptr_eq(&locks.for_project(a), &locks.for_project(b)));
    }

    #[tokio::test]
    async fn project_lock_serializes_runs() {
        let locks = LevelingLocks::new();
        let project = Uuid::new_v4();
        let lock = locks.for_project(project);
        let guard = lock.lock().await;
        // A second run on the same project must wait.
        assert!(locks.for_project(project).try_lock().is_err());
        drop(guard);
        assert!(locks.for_project(project).try_lock().is_ok());
        // Unrelated projects proceed independently.
        assert!(locks.for_project(Uuid::new_v4()).try_lock().is_ok());
    }
}
