use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Domain events published to external collaborators. Flat records; delivery
/// is at-least-once, so subscribers key idempotency on the entity ids.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic")]
pub enum DomainEvent {
    #[serde(rename = "bid.opened")]
    BidOpened {
        project_id: Uuid,
        submission_id: Uuid,
        vendor_id: Uuid,
        opened_by: Uuid,
        occurred_at: DateTime<Utc>,
    },

    #[serde(rename = "bid.leveling.completed")]
    LevelingCompleted {
        project_id: Uuid,
        run_id: Uuid,
        line_items_analyzed: u32,
        responding_vendors: u32,
        recommended_reviews: u32,
        occurred_at: DateTime<Utc>,
    },

    #[serde(rename = "bid.bafo.requested")]
    BafoRequested {
        project_id: Uuid,
        bafo_request_id: Uuid,
        vendor_id: Uuid,
        response_due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    },

    #[serde(rename = "bid.award.issued")]
    AwardIssued {
        project_id: Uuid,
        recommendation_id: Uuid,
        vendor_id: Uuid,
        amount: i64,
        contract_reference: Option<String>,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::BidOpened { .. } => "bid.opened",
            Self::LevelingCompleted { .. } => "bid.leveling.completed",
            Self::BafoRequested { .. } => "bid.bafo.requested",
            Self::AwardIssued { .. } => "bid.award.issued",
        }
    }

    /// Stable idempotency key: topic plus the entity id that must not be
    /// acted on twice.
    pub fn idempotency_key(&self) -> String {
        match self {
            Self::BidOpened { submission_id, .. } => {
                format!("bid.opened:{submission_id}")
            }
            Self::LevelingCompleted { run_id, .. } => {
                format!("bid.leveling.completed:{run_id}")
            }
            Self::BafoRequested {
                bafo_request_id,
                vendor_id,
                ..
            } => format!("bid.bafo.requested:{bafo_request_id}:{vendor_id}"),
            Self::AwardIssued {
                recommendation_id, ..
            } => format!("bid.award.issued:{recommendation_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_as_flat_records_with_topic() {
        let event = DomainEvent::AwardIssued {
            project_id: Uuid::new_v4(),
            recommendation_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            amount: 95_000_000,
            contract_reference: Some("C-2025-014".into()),
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "bid.award.issued");
        assert_eq!(json["amount"], 95_000_000);
        assert!(json["project_id"].is_string());
    }

    #[test]
    fn award_idempotency_key_is_the_recommendation_id() {
        let rec = Uuid::new_v4();
        let event = DomainEvent::AwardIssued {
            project_id: Uuid::new_v4(),
            recommendation_id: rec,
            vendor_id: Uuid::new_v4(),
            amount: 1,
            contract_reference: None,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.idempotency_key(), format!("bid.award.issued:{rec}"));
    }
}
