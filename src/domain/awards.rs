use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Award recommendation approval lifecycle. Single-direction: a terminal
/// recommendation is never reopened; a reversal requires a new
/// recommendation object referencing the prior one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    UnderReview,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "under_review" => Self::UnderReview,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Draft,
        }
    }

    pub fn transition_to(self, next: ApprovalStatus) -> Result<ApprovalStatus, ApiError> {
        use ApprovalStatus::*;
        let ok = matches!(
            (self, next),
            (Draft, UnderReview) | (UnderReview, Approved) | (UnderReview, Rejected)
        );
        if ok {
            Ok(next)
        } else {
            Err(ApiError::InvalidStateTransition(format!(
                "award recommendation cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// How an approval request should proceed given the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveAction {
    /// Move under_review to approved.
    Transition,
    /// Already approved. The caller must still settle the side effects
    /// (project flip, event claim) in case an earlier attempt was
    /// interrupted between the status write and the event publish.
    AlreadyApproved,
}

pub fn approve_action(current: ApprovalStatus) -> Result<ApproveAction, ApiError> {
    match current {
        ApprovalStatus::Approved => Ok(ApproveAction::AlreadyApproved),
        other => {
            other.transition_to(ApprovalStatus::Approved)?;
            Ok(ApproveAction::Transition)
        }
    }
}

/// Approval gate: the approver must be a different identity than the
/// preparer. Self-approval is an integrity violation, not a bad request.
pub fn check_approver(prepared_by: Uuid, approver: Uuid) -> Result<(), ApiError> {
    if prepared_by == approver {
        return Err(ApiError::IntegrityViolation(
            "recommendation cannot be approved by its preparer".to_string(),
        ));
    }
    Ok(())
}

/// The terminal decision record for a procurement event.
#[derive(Debug, Clone, Serialize)]
pub struct AwardRecommendation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub recommended_vendor_id: Uuid,
    pub recommended_submission_id: Option<Uuid>,
    /// Recommended contract amount in cents.
    pub recommended_amount: i64,
    pub justification: String,
    pub approval_status: ApprovalStatus,
    pub prepared_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// Prior recommendation this one reverses, if any.
    pub supersedes: Option<Uuid>,
    pub contract_reference: Option<String>,
    pub memo_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAwardRequest {
    pub recommended_vendor_id: Uuid,
    #[serde(default)]
    pub recommended_submission_id: Option<Uuid>,
    pub recommended_amount: i64,
    pub justification: String,
    #[serde(default)]
    pub supersedes: Option<Uuid>,
    #[serde(default)]
    pub contract_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectAwardRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_path_is_single_direction() {
        use ApprovalStatus::*;
        assert!(Draft.transition_to(UnderReview).is_ok());
        assert!(UnderReview.transition_to(Approved).is_ok());
        assert!(UnderReview.transition_to(Rejected).is_ok());

        // No shortcuts and no reopening.
        assert!(Draft.transition_to(Approved).is_err());
        assert!(Approved.transition_to(Draft).is_err());
        assert!(Approved.transition_to(UnderReview).is_err());
        assert!(Rejected.transition_to(Draft).is_err());
        assert!(Rejected.transition_to(Approved).is_err());
    }

    #[test]
    fn approving_an_approved_recommendation_resumes_settlement() {
        use ApprovalStatus::*;
        // A retried approval must not fail on the status check; it has to
        // reach the event claim so an interrupted attempt can finish.
        assert_eq!(approve_action(Approved).unwrap(), ApproveAction::AlreadyApproved);
        assert_eq!(approve_action(UnderReview).unwrap(), ApproveAction::Transition);
        assert!(approve_action(Draft).is_err());
        assert!(approve_action(Rejected).is_err());
    }

    #[test]
    fn self_approval_is_an_integrity_violation() {
        let preparer = Uuid::new_v4();
        let err = check_approver(preparer, preparer).unwrap_err();
        assert!(matches!(err, ApiError::IntegrityViolation(_)));
        assert!(check_approver(preparer, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn terminal_states() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(!ApprovalStatus::Draft.is_terminal());
        assert!(!ApprovalStatus::UnderReview.is_terminal());
    }
}
