//! Statistics kernel for bid leveling.
//!
//! Pure numeric functions over a slice of bid prices. No I/O, no state;
//! everything downstream (leveling snapshots, risk classification) is built
//! on the summaries computed here.

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Outlier detection method. Evaluators tune sensitivity per procurement
/// category, so all three are selectable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Iqr,
    StandardDeviation,
    ModifiedZScore,
}

impl OutlierMethod {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "iqr" => Ok(Self::Iqr),
            "standard_deviation" => Ok(Self::StandardDeviation),
            "modified_z_score" => Ok(Self::ModifiedZScore),
            other => bail!("unknown outlier method: {other}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iqr => "iqr",
            Self::StandardDeviation => "standard_deviation",
            Self::ModifiedZScore => "modified_z_score",
        }
    }

    /// Conventional cutoff for each method: 1.5x the IQR fence, |z| > 3,
    /// modified z over 3.5. The thresholds are not interchangeable across
    /// methods, so each carries its own default.
    pub fn default_threshold(&self) -> f64 {
        match self {
            Self::Iqr => 1.5,
            Self::StandardDeviation => 3.0,
            Self::ModifiedZScore => 3.5,
        }
    }
}

/// Summary statistics for one line item's responding bids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSummary {
    pub count: usize,
    pub low: f64,
    pub high: f64,
    pub range: f64,
    pub average: f64,
    pub median: f64,
    pub variance: f64,
    pub standard_deviation: f64,
    pub coefficient_of_variation: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

impl PriceSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            low: 0.0,
            high: 0.0,
            range: 0.0,
            average: 0.0,
            median: 0.0,
            variance: 0.0,
            standard_deviation: 0.0,
            coefficient_of_variation: 0.0,
            q1: 0.0,
            q3: 0.0,
            iqr: 0.0,
        }
    }

    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();

        let sum: f64 = sorted.iter().sum();
        let average = sum / n as f64;
        let low = sorted[0];
        let high = sorted[n - 1];

        let median = percentile(&sorted, 50.0);
        let q1 = percentile(&sorted, 25.0);
        let q3 = percentile(&sorted, 75.0);

        // Sample variance (N-1); a single bid has no spread by definition.
        let variance = if n >= 2 {
            sorted.iter().map(|v| (v - average).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let standard_deviation = variance.sqrt();
        let coefficient_of_variation = if average == 0.0 {
            0.0
        } else {
            standard_deviation / average
        };

        Self {
            count: n,
            low,
            high,
            range: high - low,
            average,
            median,
            variance,
            standard_deviation,
            coefficient_of_variation,
            q1,
            q3,
            iqr: q3 - q1,
        }
    }
}

/// Percentile of a pre-sorted slice via linear interpolation.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if upper >= sorted.len() {
        return sorted[sorted.len() - 1];
    }
    let weight = index - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// How far outside the peer distribution a flagged bid sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierSeverity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outlier {
    /// Index into the input slice.
    pub index: usize,
    pub value: f64,
    pub z_score: f64,
    pub severity: OutlierSeverity,
}

/// Detect outliers in `values` using `method` with sensitivity `threshold`.
///
/// Threshold meaning depends on the method: the IQR fence multiplier k for
/// `Iqr`, the |z| cutoff for `StandardDeviation`, and the modified-z cutoff
/// for `ModifiedZScore`.
pub fn detect_outliers(values: &[f64], method: OutlierMethod, threshold: f64) -> Vec<Outlier> {
    let summary = PriceSummary::compute(values);
    if summary.count < 2 {
        return Vec::new();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let is_flagged = |v: f64| -> bool {
        match method {
            OutlierMethod::Iqr => {
                let lower = summary.q1 - threshold * summary.iqr;
                let upper = summary.q3 + threshold * summary.iqr;
                v < lower || v > upper
            }
            OutlierMethod::StandardDeviation => {
                summary.standard_deviation > 0.0
                    && ((v - summary.average) / summary.standard_deviation).abs() > threshold
            }
            OutlierMethod::ModifiedZScore => {
                let mad = median_absolute_deviation(&sorted, summary.median);
                mad > 0.0 && (0.6745 * (v - summary.median) / mad).abs() > threshold
            }
        }
    };

    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| is_flagged(v))
        .map(|(index, &value)| {
            let z_score = if summary.standard_deviation > 0.0 {
                (value - summary.average) / summary.standard_deviation
            } else {
                0.0
            };
            Outlier {
                index,
                value,
                z_score,
                severity: severity_of(value, z_score, &summary),
            }
        })
        .collect()
}

fn severity_of(value: f64, z_score: f64, summary: &PriceSummary) -> OutlierSeverity {
    let severe_lower = summary.q1 - 3.0 * summary.iqr;
    let severe_upper = summary.q3 + 3.0 * summary.iqr;
    if value < severe_lower || value > severe_upper {
        OutlierSeverity::Severe
    } else if z_score.abs() > 2.5 {
        OutlierSeverity::Moderate
    } else {
        OutlierSeverity::Mild
    }
}

fn median_absolute_deviation(sorted: &[f64], median: f64) -> f64 {
    let mut deviations: Vec<f64> = sorted.iter().map(|v| (v - median).abs()).collect();
    deviations.sort_by(|a, b| a.total_cmp(b));
    percentile(&deviations, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn summary_of_known_vector() {
        // The canonical leveling example: four clustered bids and one wild one.
        let bids = [100.0, 110.0, 90.0, 105.0, 500.0];
        let s = PriceSummary::compute(&bids);

        assert_eq!(s.count, 5);
        assert!(close(s.low, 90.0));
        assert!(close(s.high, 500.0));
        assert!(close(s.median, 105.0));
        assert!(close(s.average, 181.0));
    }

    #[test]
    fn identical_bids_have_zero_deviation() {
        let s = PriceSummary::compute(&[100.0, 100.0, 100.0]);
        assert!(close(s.standard_deviation, 0.0));
        assert!(close(s.coefficient_of_variation, 0.0));
        assert!(detect_outliers(&[100.0, 100.0, 100.0], OutlierMethod::Iqr, 1.5).is_empty());
    }

    #[test]
    fn threshold_defaults_track_the_method() {
        assert!(close(OutlierMethod::Iqr.default_threshold(), 1.5));
        assert!(close(OutlierMethod::StandardDeviation.default_threshold(), 3.0));
        assert!(close(OutlierMethod::ModifiedZScore.default_threshold(), 3.5));

        // A mild spread the z method must not flag at its own cutoff, even
        // though the IQR fence multiplier 1.5 would be far too aggressive
        // if reused as a |z| cutoff.
        let bids = [100.0, 102.0, 98.0, 101.0, 99.0, 120.0];
        let method = OutlierMethod::StandardDeviation;
        assert!(detect_outliers(&bids, method, method.default_threshold()).is_empty());
        assert!(!detect_outliers(&bids, method, 1.5).is_empty());
    }

    #[test]
    fn median_of_even_count_interpolates() {
        let s = PriceSummary::compute(&[10.0, 20.0, 30.0, 40.0]);
        assert!(close(s.median, 25.0));
    }

    #[test]
    fn single_bid_is_degenerate_but_defined() {
        let s = PriceSummary::compute(&[42.0]);
        assert_eq!(s.count, 1);
        assert!(close(s.average, 42.0));
        assert!(close(s.median, 42.0));
        assert!(close(s.standard_deviation, 0.0));
    }

    #[test]
    fn zero_average_guards_cov() {
        let s = PriceSummary::compute(&[-5.0, 5.0]);
        assert!(close(s.average, 0.0));
        assert!(close(s.coefficient_of_variation, 0.0));
    }

    #[test]
    fn iqr_flags_the_wild_bid() {
        let bids = [100.0, 110.0, 90.0, 105.0, 500.0];
        let outliers = detect_outliers(&bids, OutlierMethod::Iqr, 1.5);
        assert_eq!(outliers.len(), 1);
        assert_eq!(outliers[0].index, 4);
        assert!(close(outliers[0].value, 500.0));
    }

    #[test]
    fn iqr_severity_grades_extreme_values() {
        let bids = [100.0, 110.0, 90.0, 105.0, 500.0];
        let outliers = detect_outliers(&bids, OutlierMethod::Iqr, 1.5);
        assert_eq!(outliers[0].severity, OutlierSeverity::Severe);
    }

    #[test]
    fn standard_deviation_method_respects_threshold() {
        let bids = [100.0, 102.0, 98.0, 101.0, 99.0, 160.0];
        // At |z| > 2 the 160 bid is flagged; at |z| > 3 the pull it exerts
        // on the mean keeps it under the cutoff.
        let loose = detect_outliers(&bids, OutlierMethod::StandardDeviation, 2.0);
        assert_eq!(loose.len(), 1);
        assert_eq!(loose[0].index, 5);
        let strict = detect_outliers(&bids, OutlierMethod::StandardDeviation, 3.0);
        assert!(strict.is_empty());
    }

    #[test]
    fn modified_z_score_flags_against_median() {
        let bids = [100.0, 102.0, 98.0, 101.0, 99.0, 400.0];
        let outliers = detect_outliers(&bids, OutlierMethod::ModifiedZScore, 3.5);
        assert_eq!(outliers.len(), 1);
        assert_eq!(outliers[0].index, 5);
    }

    #[test]
    fn fewer_than_two_bids_yield_no_outliers() {
        assert!(detect_outliers(&[], OutlierMethod::Iqr, 1.5).is_empty());
        assert!(detect_outliers(&[123.0], OutlierMethod::Iqr, 1.5).is_empty());
    }

    #[test]
    fn method_parsing_round_trips() {
        for m in [
            OutlierMethod::Iqr,
            OutlierMethod::StandardDeviation,
            OutlierMethod::ModifiedZScore,
        ] {
            assert_eq!(OutlierMethod::from_str(m.as_str()).unwrap(), m);
        }
        assert!(OutlierMethod::from_str("grubbs").is_err());
    }
}
