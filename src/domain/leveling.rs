use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::LevelingSettings;
use crate::stats::PriceSummary;

/// Price spread classification from the coefficient of variation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceVolatility {
    Low,
    Medium,
    High,
}

impl PriceVolatility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn classify(coefficient_of_variation: f64, settings: &LevelingSettings) -> Self {
        if coefficient_of_variation < settings.volatility_low_max {
            Self::Low
        } else if coefficient_of_variation <= settings.volatility_medium_max {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// How the bid field compares to the engineer's estimate.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketCompetitiveness {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl MarketCompetitiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }

    /// Classify by the average bid's variance from the estimate:
    /// below −band is excellent, within ±band is good, above the poor
    /// threshold is poor, anything else fair.
    pub fn classify(average_bid: f64, engineer_estimate: f64, settings: &LevelingSettings) -> Self {
        if engineer_estimate <= 0.0 {
            return Self::Fair;
        }
        let variance = (average_bid - engineer_estimate) / engineer_estimate;
        if variance < -settings.competitiveness_good_band {
            Self::Excellent
        } else if variance <= settings.competitiveness_good_band {
            Self::Good
        } else if variance > settings.competitiveness_poor_min {
            Self::Poor
        } else {
            Self::Fair
        }
    }
}

/// Immutable leveling snapshot for one line item. A new row is written per
/// run; prior snapshots are never touched.
#[derive(Debug, Clone, Serialize)]
pub struct LineItemAnalysis {
    pub id: Uuid,
    pub line_item_id: Uuid,
    pub run_id: Uuid,
    pub analysis_date: DateTime<Utc>,
    pub participating_vendors: i32,
    pub responding_vendors: i32,
    pub no_bid_count: i32,
    pub low_bid: Option<i64>,
    pub high_bid: Option<i64>,
    pub average_bid: Option<i64>,
    pub median_bid: Option<i64>,
    pub standard_deviation: f64,
    pub coefficient_variation: f64,
    pub engineer_estimate: i64,
    pub avg_vs_estimate_variance: Option<f64>,
    pub outlier_method: String,
    pub outlier_threshold: f64,
    pub outlier_vendor_ids: Vec<Uuid>,
    pub price_volatility: PriceVolatility,
    pub market_competitiveness: MarketCompetitiveness,
    pub low_confidence: bool,
    pub partial_data: bool,
    pub recommendation: String,
}

/// Evaluator-facing recommendation text for one line item snapshot.
pub fn recommendation_text(
    summary: &PriceSummary,
    outlier_count: usize,
    volatility: PriceVolatility,
    competitiveness: MarketCompetitiveness,
    low_confidence: bool,
) -> String {
    let mut notes: Vec<String> = Vec::new();

    if summary.count == 0 {
        return "No responding vendors. Re-solicit or confirm scope coverage.".to_string();
    }
    if low_confidence {
        notes.push(format!(
            "Only {} responding vendor(s); treat statistics as indicative.",
            summary.count
        ));
    }
    if outlier_count > 0 {
        notes.push(format!(
            "{outlier_count} outlier bid(s) flagged for manual risk review."
        ));
    }
    match volatility {
        PriceVolatility::High => {
            notes.push("High price volatility; consider scope clarifications.".to_string())
        }
        PriceVolatility::Medium => {
            notes.push("Moderate price spread across vendors.".to_string())
        }
        PriceVolatility::Low => {}
    }
    match competitiveness {
        MarketCompetitiveness::Poor => {
            notes.push("Average bid well above estimate; validate the estimate or rebid.".to_string())
        }
        MarketCompetitiveness::Excellent => {
            notes.push("Bids come in under estimate; verify scope is fully covered.".to_string())
        }
        _ => {}
    }
    if notes.is_empty() {
        notes.push("Competitive, consistent pricing. No action required.".to_string());
    }
    notes.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LevelingSettings {
        LevelingSettings::default()
    }

    #[test]
    fn volatility_bands() {
        let s = settings();
        assert_eq!(PriceVolatility::classify(0.05, &s), PriceVolatility::Low);
        assert_eq!(PriceVolatility::classify(0.10, &s), PriceVolatility::Medium);
        assert_eq!(PriceVolatility::classify(0.25, &s), PriceVolatility::Medium);
        assert_eq!(PriceVolatility::classify(0.26, &s), PriceVolatility::High);
    }

    #[test]
    fn competitiveness_bands() {
        let s = settings();
        // within +-5% of a 100k estimate
        assert_eq!(
            MarketCompetitiveness::classify(103_000.0, 100_000.0, &s),
            MarketCompetitiveness::Good
        );
        // better than -5%
        assert_eq!(
            MarketCompetitiveness::classify(90_000.0, 100_000.0, &s),
            MarketCompetitiveness::Excellent
        );
        // worse than +15%
        assert_eq!(
            MarketCompetitiveness::classify(120_000.0, 100_000.0, &s),
            MarketCompetitiveness::Poor
        );
        // between +5% and +15%
        assert_eq!(
            MarketCompetitiveness::classify(110_000.0, 100_000.0, &s),
            MarketCompetitiveness::Fair
        );
    }

    #[test]
    fn zero_estimate_defaults_to_fair() {
        assert_eq!(
            MarketCompetitiveness::classify(50_000.0, 0.0, &settings()),
            MarketCompetitiveness::Fair
        );
    }

    #[test]
    fn recommendation_mentions_outliers_and_confidence() {
        let summary = PriceSummary::compute(&[100.0, 110.0]);
        let text = recommendation_text(
            &summary,
            1,
            PriceVolatility::Low,
            MarketCompetitiveness::Good,
            true,
        );
        assert!(text.contains("responding vendor"));
        assert!(text.contains("outlier"));
    }

    #[test]
    fn empty_field_gets_resolicit_advice() {
        let summary = PriceSummary::empty();
        let text = recommendation_text(
            &summary,
            0,
            PriceVolatility::Low,
            MarketCompetitiveness::Fair,
            true,
        );
        assert!(text.contains("No responding vendors"));
    }
}
