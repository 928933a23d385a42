use serde::{Deserialize, Serialize};

/// Closed set of actor roles. Role strings from tokens are mapped here so an
/// unknown role can never slip through a string comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Evaluator,
    Vendor,
}

impl ActorRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" | "bid_admin" => Some(Self::Admin),
            "evaluator" | "bid_reviewer" => Some(Self::Evaluator),
            "vendor" => Some(Self::Vendor),
            _ => None,
        }
    }

    /// Owner-side staff: may read opened submissions, run leveling, score,
    /// and drive the award workflow.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Admin | Self::Evaluator)
    }
}

/// JWT claims structure for service tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (actor ID)
    pub sub: String,

    /// Audience
    pub aud: String,

    /// Issuer
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Actor role
    pub role: String,

    /// Actor email - optional
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_strings_map_to_the_closed_set() {
        assert_eq!(ActorRole::parse("admin"), Some(ActorRole::Admin));
        assert_eq!(ActorRole::parse("BID_ADMIN"), Some(ActorRole::Admin));
        assert_eq!(ActorRole::parse("bid_reviewer"), Some(ActorRole::Evaluator));
        assert_eq!(ActorRole::parse("vendor"), Some(ActorRole::Vendor));
        assert_eq!(ActorRole::parse("superuser"), None);
    }

    #[test]
    fn staff_roles() {
        assert!(ActorRole::Admin.is_staff());
        assert!(ActorRole::Evaluator.is_staff());
        assert!(!ActorRole::Vendor.is_staff());
    }
}
