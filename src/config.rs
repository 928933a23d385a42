use anyhow::{bail, Context, Result};
use std::env;

use crate::stats::OutlierMethod;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

/// Leveling engine tunables. The documented example values are the defaults;
/// every one of them is overridable per deployment.
#[derive(Debug, Clone)]
pub struct LevelingSettings {
    pub outlier_method: OutlierMethod,
    pub outlier_threshold: f64,
    pub minimum_bids_for_analysis: usize,
    /// Coefficient-of-variation band edges (fractions, not percent).
    pub volatility_low_max: f64,
    pub volatility_medium_max: f64,
    /// Average-vs-engineer-estimate band edges (fractions).
    pub competitiveness_good_band: f64,
    pub competitiveness_poor_min: f64,
}

impl Default for LevelingSettings {
    fn default() -> Self {
        Self {
            outlier_method: OutlierMethod::Iqr,
            outlier_threshold: OutlierMethod::Iqr.default_threshold(),
            minimum_bids_for_analysis: 3,
            volatility_low_max: 0.10,
            volatility_medium_max: 0.25,
            competitiveness_good_band: 0.05,
            competitiveness_poor_min: 0.15,
        }
    }
}

/// Evaluation weights and decision thresholds. Weights must sum to 100.
#[derive(Debug, Clone)]
pub struct ScoringSettings {
    pub technical_weight: f64,
    pub commercial_weight: f64,
    pub compliance_weight: f64,
    pub award_threshold: f64,
    pub compliance_floor: f64,
    pub reject_threshold: f64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            technical_weight: 40.0,
            commercial_weight: 40.0,
            compliance_weight: 20.0,
            award_threshold: 75.0,
            compliance_floor: 70.0,
            reject_threshold: 50.0,
        }
    }
}

impl ScoringSettings {
    pub fn validate(&self) -> Result<()> {
        let sum = self.technical_weight + self.commercial_weight + self.compliance_weight;
        if (sum - 100.0).abs() > 1e-9 {
            bail!(
                "evaluation weights must sum to 100, got {} + {} + {} = {}",
                self.technical_weight,
                self.commercial_weight,
                self.compliance_weight,
                sum
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis (published-event idempotency guard)
    pub redis_url: String,
    pub event_idempotency_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,

    // Sealed submission vault
    pub storage_bucket: String,
    pub upload_url_base: String,
    pub upload_credential_ttl_seconds: i64,

    // Domain event publisher
    pub event_webhook_url: Option<String>,
    pub event_webhook_token: String,

    // Memo-generation collaborator
    pub memo_service_url: String,
    pub memo_service_token: String,
    pub memo_service_timeout_seconds: u64,

    // Engine tunables
    pub leveling: LevelingSettings,
    pub scoring: ScoringSettings,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env_kind = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = env_parsed("DATABASE_MAX_CONNECTIONS", 10);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379/0".to_string());
        let event_idempotency_ttl_seconds = env_parsed("EVENT_IDEMPOTENCY_TTL_SECONDS", 86400);

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "bidcore".to_string());
        let jwt_audience = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string());

        // Vault
        let storage_bucket = env::var("STORAGE_BUCKET").unwrap_or_else(|_| "oc-bids".to_string());
        let upload_url_base = env::var("UPLOAD_URL_BASE")
            .unwrap_or_else(|_| "https://storage.local/upload".to_string());
        url::Url::parse(&upload_url_base).context("UPLOAD_URL_BASE must be a valid URL")?;
        let upload_credential_ttl_seconds = env_parsed("UPLOAD_CREDENTIAL_TTL_SECONDS", 3600_i64);

        // Event publisher; unset URL means events are logged but not delivered
        let event_webhook_url = env::var("EVENT_WEBHOOK_URL").ok().filter(|s| !s.is_empty());
        if let Some(url) = &event_webhook_url {
            url::Url::parse(url).context("EVENT_WEBHOOK_URL must be a valid URL")?;
        }
        let event_webhook_token = env::var("EVENT_WEBHOOK_TOKEN").unwrap_or_default();

        // Memo service
        let memo_service_url = env::var("MEMO_SERVICE_URL")
            .unwrap_or_else(|_| "http://memo-service:8000".to_string());
        let memo_service_token = env::var("MEMO_SERVICE_TOKEN").unwrap_or_default();
        let memo_service_timeout_seconds = env_parsed("MEMO_SERVICE_TIMEOUT_SECONDS", 120);

        // Leveling tunables
        let defaults = LevelingSettings::default();
        let outlier_method = match env::var("OUTLIER_DETECTION_METHOD") {
            Ok(s) => OutlierMethod::from_str(&s)
                .with_context(|| format!("invalid OUTLIER_DETECTION_METHOD: {s}"))?,
            Err(_) => defaults.outlier_method,
        };
        // The threshold default depends on the chosen method; an explicit
        // OUTLIER_THRESHOLD always wins.
        let leveling = LevelingSettings {
            outlier_method,
            outlier_threshold: env_parsed("OUTLIER_THRESHOLD", outlier_method.default_threshold()),
            minimum_bids_for_analysis: env_parsed(
                "MINIMUM_BIDS_FOR_ANALYSIS",
                defaults.minimum_bids_for_analysis,
            ),
            volatility_low_max: env_parsed("VOLATILITY_LOW_MAX", defaults.volatility_low_max),
            volatility_medium_max: env_parsed(
                "VOLATILITY_MEDIUM_MAX",
                defaults.volatility_medium_max,
            ),
            competitiveness_good_band: env_parsed(
                "COMPETITIVENESS_GOOD_BAND",
                defaults.competitiveness_good_band,
            ),
            competitiveness_poor_min: env_parsed(
                "COMPETITIVENESS_POOR_MIN",
                defaults.competitiveness_poor_min,
            ),
        };

        // Scoring tunables
        let defaults = ScoringSettings::default();
        let scoring = ScoringSettings {
            technical_weight: env_parsed("TECHNICAL_WEIGHT", defaults.technical_weight),
            commercial_weight: env_parsed("COMMERCIAL_WEIGHT", defaults.commercial_weight),
            compliance_weight: env_parsed("COMPLIANCE_WEIGHT", defaults.compliance_weight),
            award_threshold: env_parsed("AWARD_THRESHOLD", defaults.award_threshold),
            compliance_floor: env_parsed("COMPLIANCE_FLOOR", defaults.compliance_floor),
            reject_threshold: env_parsed("REJECT_THRESHOLD", defaults.reject_threshold),
        };
        scoring
            .validate()
            .context("invalid evaluation weight configuration")?;

        Ok(Settings {
            env: env_kind,
            server_addr,
            database_url,
            database_max_connections,
            redis_url,
            event_idempotency_ttl_seconds,
            cors_allow_origins,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            storage_bucket,
            upload_url_base,
            upload_credential_ttl_seconds,
            event_webhook_url,
            event_webhook_token,
            memo_service_url,
            memo_service_token,
            memo_service_timeout_seconds,
            leveling,
            scoring,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_are_valid() {
        assert!(ScoringSettings::default().validate().is_ok());
    }

    #[test]
    fn misconfigured_weights_are_rejected() {
        let scoring = ScoringSettings {
            technical_weight: 50.0,
            commercial_weight: 40.0,
            compliance_weight: 20.0,
            ..ScoringSettings::default()
        };
        assert!(scoring.validate().is_err());
    }
}
