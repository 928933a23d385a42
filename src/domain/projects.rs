use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Bid project lifecycle. A project is immutable once awarded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Bidding,
    Evaluation,
    Awarded,
    Cancelled,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Bidding => "bidding",
            Self::Evaluation => "evaluation",
            Self::Awarded => "awarded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "bidding" => Self::Bidding,
            "evaluation" => Self::Evaluation,
            "awarded" => Self::Awarded,
            "cancelled" => Self::Cancelled,
            _ => Self::Draft,
        }
    }

    /// Validate a status transition. Forward-only; terminal states are final.
    pub fn transition_to(self, next: ProjectStatus) -> Result<ProjectStatus, ApiError> {
        use ProjectStatus::*;
        let ok = matches!(
            (self, next),
            (Draft, Bidding)
                | (Draft, Cancelled)
                | (Bidding, Evaluation)
                | (Bidding, Cancelled)
                | (Evaluation, Awarded)
                | (Evaluation, Cancelled)
        );
        if ok {
            Ok(next)
        } else {
            Err(ApiError::InvalidStateTransition(format!(
                "project cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

/// Bid project entity: one procurement event.
#[derive(Debug, Clone, Serialize)]
pub struct BidProject {
    pub id: Uuid,
    pub name: String,
    pub rfp_number: String,
    pub description: Option<String>,
    /// Budget cap in cents.
    pub total_budget: Option<i64>,
    pub status: ProjectStatus,
    pub bid_due_date: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub rfp_number: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total_budget: Option<i64>,
    pub bid_due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionProjectRequest {
    pub status: ProjectStatus,
}

/// One priced scope unit. Frozen once the project enters `bidding`.
#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub item_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_of_measure: String,
    /// Owner's engineering estimate in cents.
    pub engineer_estimate: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLineItemRequest {
    pub item_code: String,
    pub description: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default = "default_uom")]
    pub unit_of_measure: String,
    pub engineer_estimate: i64,
}

fn default_quantity() -> f64 {
    1.0
}

fn default_uom() -> String {
    "LS".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        use ProjectStatus::*;
        assert_eq!(Draft.transition_to(Bidding).unwrap(), Bidding);
        assert_eq!(Bidding.transition_to(Evaluation).unwrap(), Evaluation);
        assert_eq!(Evaluation.transition_to(Awarded).unwrap(), Awarded);
    }

    #[test]
    fn awarded_projects_are_frozen() {
        use ProjectStatus::*;
        for next in [Draft, Bidding, Evaluation, Cancelled] {
            assert!(Awarded.transition_to(next).is_err());
        }
    }

    #[test]
    fn no_skipping_bidding() {
        use ProjectStatus::*;
        assert!(Draft.transition_to(Evaluation).is_err());
        assert!(Draft.transition_to(Awarded).is_err());
        assert!(Bidding.transition_to(Awarded).is_err());
    }
}
