use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bidding entity. Referenced by submissions, never owned by a project.
#[derive(Debug, Clone, Serialize)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub contact_email: Option<String>,
    /// Bonding capacity in cents.
    pub bonding_capacity: Option<i64>,
    /// Aggregate insurance limit in cents.
    pub insurance_limit: Option<i64>,
    pub certifications: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVendorRequest {
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub bonding_capacity: Option<i64>,
    #[serde(default)]
    pub insurance_limit: Option<i64>,
    #[serde(default)]
    pub certifications: Vec<String>,
}
