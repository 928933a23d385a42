use uuid::Uuid;

use super::{ActorRole, Claims};
use crate::error::ApiError;

/// Authenticated actor context extracted from a verified token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Actor ID (from the JWT sub claim). For vendors this is the vendor id.
    pub actor_id: Uuid,
    pub role: ActorRole,
    pub email: Option<String>,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, &'static str> {
        let actor_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid actor ID in token")?;
        let role = ActorRole::parse(&claims.role).ok_or("Unknown role in token")?;

        Ok(Self {
            actor_id,
            role,
            email: claims.email.clone(),
        })
    }

    /// Guard for operations restricted to owner-side staff.
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(ApiError::unauthorized(
                "operation requires an owner-side staff role",
            ))
        }
    }

    /// Guard for operations restricted to administrators.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == ActorRole::Admin {
            Ok(())
        } else {
            Err(ApiError::unauthorized("operation requires the admin role"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            aud: "authenticated".to_string(),
            iss: "bidcore".to_string(),
            iat: 0,
            exp: i64::MAX,
            role: role.to_string(),
            email: None,
        }
    }

    #[test]
    fn valid_claims_build_a_context() {
        let id = Uuid::new_v4();
        let ctx = AuthContext::from_claims(&claims(&id.to_string(), "vendor")).unwrap();
        assert_eq!(ctx.actor_id, id);
        assert_eq!(ctx.role, ActorRole::Vendor);
    }

    #[test]
    fn bad_subject_or_role_is_rejected() {
        assert!(AuthContext::from_claims(&claims("not-a-uuid", "vendor")).is_err());
        let id = Uuid::new_v4().to_string();
        assert!(AuthContext::from_claims(&claims(&id, "superuser")).is_err());
    }

    #[test]
    fn vendor_fails_staff_guards() {
        let id = Uuid::new_v4().to_string();
        let ctx = AuthContext::from_claims(&claims(&id, "vendor")).unwrap();
        assert!(ctx.require_staff().is_err());
        assert!(ctx.require_admin().is_err());

        let ctx = AuthContext::from_claims(&claims(&id, "evaluator")).unwrap();
        assert!(ctx.require_staff().is_ok());
        assert!(ctx.require_admin().is_err());
    }
}
