use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// BAFO round lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BafoStatus {
    Sent,
    ResponsesPending,
    Completed,
    Cancelled,
}

impl BafoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::ResponsesPending => "responses_pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "responses_pending" => Self::ResponsesPending,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Sent,
        }
    }

    pub fn transition_to(self, next: BafoStatus) -> Result<BafoStatus, ApiError> {
        use BafoStatus::*;
        let ok = matches!(
            (self, next),
            (Sent, ResponsesPending)
                | (Sent, Cancelled)
                | (ResponsesPending, Completed)
                | (ResponsesPending, Cancelled)
        );
        if ok {
            Ok(next)
        } else {
            Err(ApiError::InvalidStateTransition(format!(
                "BAFO round cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }

    pub fn accepts_responses(&self) -> bool {
        matches!(self, Self::ResponsesPending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Accepted,
    Declined,
    Conditional,
}

impl AcceptanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Conditional => "conditional",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "declined" => Self::Declined,
            "conditional" => Self::Conditional,
            _ => Self::Accepted,
        }
    }
}

/// A negotiation round. The vendor and line-item sets are snapshotted at
/// creation and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct BafoRequest {
    pub id: Uuid,
    pub project_id: Uuid,
    pub vendor_ids: Vec<Uuid>,
    pub line_item_ids: Vec<Uuid>,
    pub message: Option<String>,
    pub response_due_date: DateTime<Utc>,
    pub status: BafoStatus,
    pub created_by: Uuid,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBafoRequest {
    pub vendor_ids: Vec<Uuid>,
    pub line_item_ids: Vec<Uuid>,
    #[serde(default)]
    pub message: Option<String>,
    pub response_due_date: DateTime<Utc>,
}

/// Revised pricing for one line item within a BAFO response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemAdjustment {
    pub line_item_id: Uuid,
    pub original_price: i64,
    pub revised_price: i64,
    #[serde(default)]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BafoResponse {
    pub id: Uuid,
    pub bafo_request_id: Uuid,
    pub vendor_id: Uuid,
    pub revised_total_bid: i64,
    pub line_item_adjustments: Vec<LineItemAdjustment>,
    pub acceptance_status: AcceptanceStatus,
    /// Set when the response arrived after the response due date. Late
    /// responses are recorded, never silently treated as on-time.
    pub late: bool,
    pub responded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBafoResponseRequest {
    pub revised_total_bid: i64,
    #[serde(default)]
    pub line_item_adjustments: Vec<LineItemAdjustment>,
    pub acceptance_status: AcceptanceStatus,
}

/// Whether a response arriving at `now` is late for a round due at `due`.
pub fn is_late(now: DateTime<Utc>, due: DateTime<Utc>) -> bool {
    now > due
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn round_lifecycle() {
        use BafoStatus::*;
        assert!(Sent.transition_to(ResponsesPending).is_ok());
        assert!(ResponsesPending.transition_to(Completed).is_ok());
        assert!(ResponsesPending.transition_to(Cancelled).is_ok());
        assert!(Sent.transition_to(Cancelled).is_ok());

        assert!(Completed.transition_to(ResponsesPending).is_err());
        assert!(Cancelled.transition_to(Sent).is_err());
        assert!(Sent.transition_to(Completed).is_err());
    }

    #[test]
    fn only_pending_rounds_accept_responses() {
        assert!(BafoStatus::ResponsesPending.accepts_responses());
        assert!(!BafoStatus::Sent.accepts_responses());
        assert!(!BafoStatus::Completed.accepts_responses());
        assert!(!BafoStatus::Cancelled.accepts_responses());
    }

    #[test]
    fn lateness_is_strict() {
        assert!(!is_late(t(11), t(12)));
        assert!(!is_late(t(12), t(12)));
        assert!(is_late(t(13), t(12)));
    }
}
