use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringSettings;
use crate::error::ApiError;

/// Evaluator recommendation derived from the composite score and the
/// compliance floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationRecommendation {
    Award,
    Consider,
    Reject,
}

impl EvaluationRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Award => "award",
            Self::Consider => "consider",
            Self::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "award" => Self::Award,
            "reject" => Self::Reject,
            _ => Self::Consider,
        }
    }
}

/// Sub-scores on the evaluator rubric, each 0-100.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SubScores {
    pub technical: f64,
    pub commercial: f64,
    pub compliance: f64,
}

impl SubScores {
    pub fn validate(&self) -> Result<(), ApiError> {
        for (name, score) in [
            ("technical", self.technical),
            ("commercial", self.commercial),
            ("compliance", self.compliance),
        ] {
            if !(0.0..=100.0).contains(&score) {
                return Err(ApiError::bad_request(format!(
                    "{name} score must be between 0 and 100, got {score}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a possibly partial revision against the evaluator's prior
    /// scores. A sub-score absent from the request carries forward; the
    /// first evaluation has nothing to carry from, so all three are
    /// required.
    pub fn resolve_revision(
        technical: Option<f64>,
        commercial: Option<f64>,
        compliance: Option<f64>,
        prior: Option<&SubScores>,
    ) -> Result<SubScores, ApiError> {
        let pick = |name: &str, new: Option<f64>, carried: Option<f64>| {
            new.or(carried).ok_or_else(|| {
                ApiError::bad_request(format!("{name}_score is required for a first evaluation"))
            })
        };
        Ok(SubScores {
            technical: pick("technical", technical, prior.map(|p| p.technical))?,
            commercial: pick("commercial", commercial, prior.map(|p| p.commercial))?,
            compliance: pick("compliance", compliance, prior.map(|p| p.compliance))?,
        })
    }

    /// Weighted composite. Weights are validated at startup to sum to 100.
    pub fn composite(&self, settings: &ScoringSettings) -> f64 {
        (self.technical * settings.technical_weight
            + self.commercial * settings.commercial_weight
            + self.compliance * settings.compliance_weight)
            / 100.0
    }

    /// A vendor cannot be recommended on price or technical merit alone:
    /// `award` additionally requires the compliance sub-score to clear its
    /// own stricter floor.
    pub fn recommendation(&self, settings: &ScoringSettings) -> EvaluationRecommendation {
        let composite = self.composite(settings);
        if composite >= settings.award_threshold && self.compliance >= settings.compliance_floor {
            EvaluationRecommendation::Award
        } else if composite < settings.reject_threshold {
            EvaluationRecommendation::Reject
        } else {
            EvaluationRecommendation::Consider
        }
    }
}

/// One evaluator's scoring of one submission. Versioned: a re-score inserts
/// a new row, never overwrites.
#[derive(Debug, Clone, Serialize)]
pub struct VendorEvaluation {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub evaluator_id: Uuid,
    pub technical_score: f64,
    pub commercial_score: f64,
    pub compliance_score: f64,
    pub composite_score: f64,
    pub recommendation: EvaluationRecommendation,
    pub notes: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Each sub-score is independently editable: a score left out of a
/// revision carries the evaluator's prior value forward into the new
/// versioned row. The first evaluation must supply all three.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEvaluationRequest {
    #[serde(default)]
    pub technical_score: Option<f64>,
    #[serde(default)]
    pub commercial_score: Option<f64>,
    #[serde(default)]
    pub compliance_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Aggregated scoring input for one vendor, averaged across evaluators.
#[derive(Debug, Clone)]
pub struct VendorStanding {
    pub vendor_id: Uuid,
    pub submission_id: Uuid,
    pub scores: SubScores,
    /// Total bid amount in cents; used as the first tie-breaker.
    pub total_bid_amount: i64,
    /// Seal timestamp; used as the second tie-breaker.
    pub submitted_at: DateTime<Utc>,
}

/// One row of the ranked leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct RankedVendor {
    pub rank: u32,
    pub vendor_id: Uuid,
    pub submission_id: Uuid,
    pub technical_score: f64,
    pub commercial_score: f64,
    pub compliance_score: f64,
    pub composite_score: f64,
    pub total_bid_amount: i64,
    pub submitted_at: DateTime<Utc>,
    pub recommendation: EvaluationRecommendation,
}

/// Rank vendors: composite descending, ties by lower bid amount, then by
/// earlier seal timestamp, then by vendor id. Fully deterministic; rankings
/// are legally consequential and must be reproducible.
pub fn rank_vendors(standings: &[VendorStanding], settings: &ScoringSettings) -> Vec<RankedVendor> {
    let mut rows: Vec<RankedVendor> = standings
        .iter()
        .map(|s| RankedVendor {
            rank: 0,
            vendor_id: s.vendor_id,
            submission_id: s.submission_id,
            technical_score: s.scores.technical,
            commercial_score: s.scores.commercial,
            compliance_score: s.scores.compliance,
            composite_score: s.scores.composite(settings),
            total_bid_amount: s.total_bid_amount,
            submitted_at: s.submitted_at,
            recommendation: s.scores.recommendation(settings),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.total_bid_amount.cmp(&b.total_bid_amount))
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.vendor_id.cmp(&b.vendor_id))
    });

    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = (i + 1) as u32;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> ScoringSettings {
        ScoringSettings::default()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, minute, 0).unwrap()
    }

    fn standing(
        scores: SubScores,
        total_bid_amount: i64,
        submitted_at: DateTime<Utc>,
    ) -> VendorStanding {
        VendorStanding {
            vendor_id: Uuid::new_v4(),
            submission_id: Uuid::new_v4(),
            scores,
            total_bid_amount,
            submitted_at,
        }
    }

    #[test]
    fn partial_revision_carries_prior_scores_forward() {
        let prior = SubScores {
            technical: 80.0,
            commercial: 90.0,
            compliance: 70.0,
        };
        // Revising one sub-score must not force re-entry of the others.
        let revised =
            SubScores::resolve_revision(None, Some(95.0), None, Some(&prior)).unwrap();
        assert_eq!(revised.technical, 80.0);
        assert_eq!(revised.commercial, 95.0);
        assert_eq!(revised.compliance, 70.0);

        // No prior row means nothing to carry: all three are required.
        assert!(SubScores::resolve_revision(Some(80.0), Some(90.0), None, None).is_err());
        let first =
            SubScores::resolve_revision(Some(80.0), Some(90.0), Some(70.0), None).unwrap();
        assert_eq!(first.compliance, 70.0);
    }

    #[test]
    fn composite_is_the_weighted_sum() {
        let scores = SubScores {
            technical: 80.0,
            commercial: 90.0,
            compliance: 70.0,
        };
        // 40/40/20 weights
        assert!((scores.composite(&settings()) - 82.0).abs() < 1e-9);
    }

    #[test]
    fn award_requires_the_compliance_floor() {
        let s = settings();
        let strong_but_noncompliant = SubScores {
            technical: 95.0,
            commercial: 95.0,
            compliance: 60.0,
        };
        // Composite 88, compliance below the 70 floor.
        assert_eq!(
            strong_but_noncompliant.recommendation(&s),
            EvaluationRecommendation::Consider
        );

        let compliant = SubScores {
            technical: 90.0,
            commercial: 85.0,
            compliance: 80.0,
        };
        assert_eq!(compliant.recommendation(&s), EvaluationRecommendation::Award);
    }

    #[test]
    fn weak_scores_are_rejected() {
        let weak = SubScores {
            technical: 40.0,
            commercial: 45.0,
            compliance: 50.0,
        };
        assert_eq!(weak.recommendation(&settings()), EvaluationRecommendation::Reject);
    }

    #[test]
    fn out_of_range_scores_are_invalid() {
        assert!(SubScores { technical: 101.0, commercial: 50.0, compliance: 50.0 }
            .validate()
            .is_err());
        assert!(SubScores { technical: -1.0, commercial: 50.0, compliance: 50.0 }
            .validate()
            .is_err());
        assert!(SubScores { technical: 0.0, commercial: 100.0, compliance: 50.0 }
            .validate()
            .is_ok());
    }

    #[test]
    fn equal_composites_rank_by_lower_bid() {
        let scores = SubScores {
            technical: 80.0,
            commercial: 80.0,
            compliance: 80.0,
        };
        let cheap = standing(scores, 950_000_00, at(10));
        let pricey = standing(scores, 1_000_000_00, at(5));
        let ranked = rank_vendors(&[pricey.clone(), cheap.clone()], &settings());
        assert_eq!(ranked[0].vendor_id, cheap.vendor_id);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].vendor_id, pricey.vendor_id);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn equal_bids_rank_by_earlier_submission() {
        let scores = SubScores {
            technical: 80.0,
            commercial: 80.0,
            compliance: 80.0,
        };
        let early = standing(scores, 1_000_000_00, at(1));
        let late = standing(scores, 1_000_000_00, at(30));
        let ranked = rank_vendors(&[late.clone(), early.clone()], &settings());
        assert_eq!(ranked[0].vendor_id, early.vendor_id);
    }

    #[test]
    fn ranking_is_reproducible() {
        let scores_a = SubScores { technical: 90.0, commercial: 70.0, compliance: 85.0 };
        let scores_b = SubScores { technical: 70.0, commercial: 90.0, compliance: 85.0 };
        let a = standing(scores_a, 900_000_00, at(2));
        let b = standing(scores_b, 800_000_00, at(4));
        let first = rank_vendors(&[a.clone(), b.clone()], &settings());
        let second = rank_vendors(&[b, a], &settings());
        let order_first: Vec<Uuid> = first.iter().map(|r| r.vendor_id).collect();
        let order_second: Vec<Uuid> = second.iter().map(|r| r.vendor_id).collect();
        assert_eq!(order_first, order_second);
    }
}
