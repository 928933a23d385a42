use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ActorRole;
use crate::domain::projects::ProjectStatus;
use crate::error::ApiError;

/// Submission channel. Technical and commercial packages are sealed and
/// opened independently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionChannel {
    Technical,
    Commercial,
}

impl SubmissionChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Commercial => "commercial",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "technical" => Ok(Self::Technical),
            "commercial" => Ok(Self::Commercial),
            other => Err(ApiError::bad_request(format!(
                "invalid submission channel: {other}"
            ))),
        }
    }
}

/// Stored lifecycle state of a submission. `uploaded` means sealed; the
/// deadline-relative view (`awaiting_deadline`, `opened`) is derived at read
/// time so the store never has to race the clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    Uploading,
    Uploaded,
    AwaitingDeadline,
    Opened,
    Error,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::AwaitingDeadline => "awaiting_deadline",
            Self::Opened => "opened",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "uploading" => Self::Uploading,
            "uploaded" => Self::Uploaded,
            "awaiting_deadline" => Self::AwaitingDeadline,
            "opened" => Self::Opened,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }

    pub fn transition_to(self, next: SubmissionState) -> Result<SubmissionState, ApiError> {
        use SubmissionState::*;
        let ok = matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Uploaded)
                | (Uploading, Pending) // upload cancelled
                | (Uploading, Error)
                | (Error, Uploading) // retry with a fresh credential
                | (Uploaded, Opened)
        );
        if ok {
            Ok(next)
        } else {
            Err(ApiError::InvalidStateTransition(format!(
                "submission cannot move from {} to {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Pending,
    Compliant,
    NonCompliant,
    Conditional,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::Conditional => "conditional",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "compliant" => Self::Compliant,
            "non_compliant" => Self::NonCompliant,
            "conditional" => Self::Conditional,
            _ => Self::Pending,
        }
    }
}

/// One vendor's sealed package for one project and channel.
#[derive(Debug, Clone, Serialize)]
pub struct VendorSubmission {
    pub id: Uuid,
    pub project_id: Uuid,
    pub vendor_id: Uuid,
    pub channel: SubmissionChannel,
    pub state: SubmissionState,
    pub file_name: Option<String>,
    pub sealed: bool,
    pub sealed_at: Option<DateTime<Utc>>,
    pub upload_completed_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub opened_by: Option<Uuid>,
    pub compliance_status: ComplianceStatus,
    /// Total bid amount in cents. Null until the package is opened and the
    /// pricing schedule is recorded.
    pub total_bid_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VendorSubmission {
    /// Deadline-relative state view: a sealed package before the deadline
    /// shows as `awaiting_deadline` regardless of the stored state.
    pub fn state_view(&self, now: DateTime<Utc>, due_date: DateTime<Utc>) -> SubmissionState {
        if self.opened_at.is_some() {
            SubmissionState::Opened
        } else if self.sealed && now < due_date {
            SubmissionState::AwaitingDeadline
        } else {
            self.state
        }
    }
}

/// Why a vault gate refused the operation. Recorded verbatim in the access
/// log; repeated refusals are a security signal in their own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultDenial {
    NotSubmittingVendor,
    ProjectNotBidding,
    DeadlinePassed,
    DeadlineNotReached,
    NotSealed,
}

impl VaultDenial {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotSubmittingVendor => "actor is not the submitting vendor",
            Self::ProjectNotBidding => "project is not accepting submissions",
            Self::DeadlinePassed => "bid due date has passed",
            Self::DeadlineNotReached => "bid due date has not passed",
            Self::NotSealed => "submission is not sealed",
        }
    }
}

impl From<VaultDenial> for ApiError {
    fn from(denial: VaultDenial) -> Self {
        match denial {
            VaultDenial::NotSubmittingVendor | VaultDenial::ProjectNotBidding => {
                ApiError::unauthorized(denial.reason())
            }
            VaultDenial::DeadlinePassed => ApiError::DeadlinePassed(denial.reason().to_string()),
            VaultDenial::DeadlineNotReached | VaultDenial::NotSealed => {
                ApiError::SealedBeforeDeadline(denial.reason().to_string())
            }
        }
    }
}

/// Gate for issuing an upload credential: only the submitting vendor, only
/// while the project is in `bidding`, only before the due date.
pub fn check_upload_slot(
    actor_role: ActorRole,
    actor_id: Uuid,
    submitting_vendor_id: Uuid,
    project_status: ProjectStatus,
    now: DateTime<Utc>,
    due_date: DateTime<Utc>,
) -> Result<(), VaultDenial> {
    if actor_role != ActorRole::Vendor || actor_id != submitting_vendor_id {
        return Err(VaultDenial::NotSubmittingVendor);
    }
    if project_status != ProjectStatus::Bidding {
        return Err(VaultDenial::ProjectNotBidding);
    }
    if now >= due_date {
        return Err(VaultDenial::DeadlinePassed);
    }
    Ok(())
}

/// The sealing fairness gate: the sole read path succeeds only when the
/// deadline has passed AND the package is sealed. Every other combination is
/// refused, regardless of the actor's role.
pub fn check_access(
    now: DateTime<Utc>,
    due_date: DateTime<Utc>,
    sealed: bool,
) -> Result<(), VaultDenial> {
    if now < due_date {
        return Err(VaultDenial::DeadlineNotReached);
    }
    if !sealed {
        return Err(VaultDenial::NotSealed);
    }
    Ok(())
}

/// Storage key for a sealed package. Deterministic per submission and
/// filename so a re-issued credential points at the same object.
pub fn storage_key(
    project_id: Uuid,
    date: DateTime<Utc>,
    vendor_id: Uuid,
    channel: SubmissionChannel,
    file_name: &str,
) -> String {
    let safe_name = file_name.replace(['/', '\\'], "_");
    format!(
        "rfp/{project_id}/{}/{vendor_id}/{}/{safe_name}",
        date.format("%Y%m%d"),
        channel.as_str()
    )
}

/// True when `key` was minted for `file_name`. Keys end with the sanitized
/// name, so a credential can be checked against a later slot request.
pub fn key_matches_file_name(key: &str, file_name: &str) -> bool {
    let safe_name = file_name.replace(['/', '\\'], "_");
    key.rsplit('/').next() == Some(safe_name.as_str())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubmissionRequest {
    pub channel: SubmissionChannel,
    /// Staff may register a submission slot on a vendor's behalf; vendors
    /// always register their own.
    #[serde(default)]
    pub vendor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestUploadSlotRequest {
    pub file_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailUploadRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Completion callback. The checksum is mandatory; a package without one
/// cannot be sealed because later tamper checks would have nothing to
/// compare against.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteUploadRequest {
    pub checksum: String,
}

/// Single-use, time-boxed write credential bound to a storage key.
#[derive(Debug, Clone, Serialize)]
pub struct UploadSlot {
    pub credential_id: Uuid,
    pub submission_id: Uuid,
    pub upload_url: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// The reference handed back by the vault's sole read path.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAccess {
    pub submission_id: Uuid,
    pub storage_key: Option<String>,
    pub file_name: Option<String>,
    pub checksum: Option<String>,
    /// True when this call performed the first open.
    pub first_open: bool,
    pub opened_at: DateTime<Utc>,
    pub opened_by: Uuid,
}

/// Actions recorded in the append-only access log.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    SlotRequested,
    UploadCompleted,
    UploadCancelled,
    UploadFailed,
    Opened,
    Accessed,
    AccessDenied,
    BidsRecorded,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlotRequested => "slot_requested",
            Self::UploadCompleted => "upload_completed",
            Self::UploadCancelled => "upload_cancelled",
            Self::UploadFailed => "upload_failed",
            Self::Opened => "opened",
            Self::Accessed => "accessed",
            Self::AccessDenied => "access_denied",
            Self::BidsRecorded => "bids_recorded",
        }
    }
}

/// Append-only audit record for every read or state change on a submission.
#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// One vendor's price for one line item. Exists only after the parent
/// submission is sealed.
#[derive(Debug, Clone, Serialize)]
pub struct VendorLineItemBid {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub line_item_id: Uuid,
    pub unit_price: i64,
    pub total_price: i64,
    pub is_no_bid: bool,
    pub is_allowance: bool,
    pub is_alternate: bool,
    pub vendor_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemBidEntry {
    pub line_item_id: Uuid,
    #[serde(default)]
    pub unit_price: i64,
    #[serde(default)]
    pub total_price: i64,
    #[serde(default)]
    pub is_no_bid: bool,
    #[serde(default)]
    pub is_allowance: bool,
    #[serde(default)]
    pub is_alternate: bool,
    #[serde(default)]
    pub vendor_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordLineItemBidsRequest {
    pub bids: Vec<LineItemBidEntry>,
    #[serde(default)]
    pub total_bid_amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn upload_slot_requires_the_submitting_vendor() {
        let vendor = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(
            check_upload_slot(ActorRole::Vendor, other, vendor, ProjectStatus::Bidding, t(9), t(12)),
            Err(VaultDenial::NotSubmittingVendor)
        );
        assert_eq!(
            check_upload_slot(ActorRole::Admin, vendor, vendor, ProjectStatus::Bidding, t(9), t(12)),
            Err(VaultDenial::NotSubmittingVendor)
        );
        assert!(check_upload_slot(
            ActorRole::Vendor,
            vendor,
            vendor,
            ProjectStatus::Bidding,
            t(9),
            t(12)
        )
        .is_ok());
    }

    #[test]
    fn upload_slot_closes_at_the_deadline() {
        let vendor = Uuid::new_v4();
        assert_eq!(
            check_upload_slot(ActorRole::Vendor, vendor, vendor, ProjectStatus::Bidding, t(12), t(12)),
            Err(VaultDenial::DeadlinePassed)
        );
    }

    #[test]
    fn upload_slot_requires_bidding_status() {
        let vendor = Uuid::new_v4();
        for status in [
            ProjectStatus::Draft,
            ProjectStatus::Evaluation,
            ProjectStatus::Awarded,
            ProjectStatus::Cancelled,
        ] {
            assert_eq!(
                check_upload_slot(ActorRole::Vendor, vendor, vendor, status, t(9), t(12)),
                Err(VaultDenial::ProjectNotBidding)
            );
        }
    }

    #[test]
    fn access_requires_deadline_and_seal() {
        assert!(check_access(t(13), t(12), true).is_ok());
        assert_eq!(check_access(t(11), t(12), true), Err(VaultDenial::DeadlineNotReached));
        assert_eq!(check_access(t(13), t(12), false), Err(VaultDenial::NotSealed));
        assert_eq!(check_access(t(11), t(12), false), Err(VaultDenial::DeadlineNotReached));
        // Boundary: access opens exactly at the due date.
        assert!(check_access(t(12), t(12), true).is_ok());
    }

    proptest! {
        // Sealing fairness: for every time/seal combination the gate opens
        // iff now >= due_date and the package is sealed.
        #[test]
        fn access_gate_is_exact(now_offset in -72_i64..72, sealed in any::<bool>()) {
            let due = t(12);
            let now = due + chrono::Duration::hours(now_offset);
            let allowed = check_access(now, due, sealed).is_ok();
            prop_assert_eq!(allowed, now >= due && sealed);
        }
    }

    #[test]
    fn credential_reuse_requires_the_same_file_name() {
        let key = storage_key(
            Uuid::new_v4(),
            t(9),
            Uuid::new_v4(),
            SubmissionChannel::Commercial,
            "bid-package.pdf",
        );
        assert!(key_matches_file_name(&key, "bid-package.pdf"));
        // A corrected file name must not ride on the old credential.
        assert!(!key_matches_file_name(&key, "bid-package-v2.pdf"));
        // Sanitization applies on both sides.
        let tricky = storage_key(
            Uuid::new_v4(),
            t(9),
            Uuid::new_v4(),
            SubmissionChannel::Technical,
            "sub/dir.pdf",
        );
        assert!(key_matches_file_name(&tricky, "sub/dir.pdf"));
        assert!(key_matches_file_name(&tricky, "sub_dir.pdf"));
    }

    #[test]
    fn completion_callback_requires_a_checksum() {
        // Sealing without a checksum would leave nothing for tamper checks
        // to compare against, so the field is not optional.
        assert!(serde_json::from_str::<CompleteUploadRequest>("{}").is_err());
        let ok: CompleteUploadRequest =
            serde_json::from_str(r#"{"checksum": "sha256:abc123"}"#).unwrap();
        assert_eq!(ok.checksum, "sha256:abc123");
    }

    #[test]
    fn storage_keys_are_deterministic_and_sanitized() {
        let project = Uuid::new_v4();
        let vendor = Uuid::new_v4();
        let key = storage_key(project, t(9), vendor, SubmissionChannel::Commercial, "bid.pdf");
        assert_eq!(
            key,
            format!("rfp/{project}/20250601/{vendor}/commercial/bid.pdf")
        );
        let tricky = storage_key(project, t(9), vendor, SubmissionChannel::Technical, "../x.pdf");
        assert!(!tricky.contains("/../"));
    }

    #[test]
    fn invalid_submission_transitions_are_rejected() {
        use SubmissionState::*;
        assert!(Pending.transition_to(Uploading).is_ok());
        assert!(Uploading.transition_to(Uploaded).is_ok());
        assert!(Uploading.transition_to(Pending).is_ok());
        assert!(Uploading.transition_to(Error).is_ok());
        assert!(Error.transition_to(Uploading).is_ok());
        assert!(Uploaded.transition_to(Opened).is_ok());

        assert!(Pending.transition_to(Opened).is_err());
        assert!(Uploaded.transition_to(Pending).is_err());
        assert!(Opened.transition_to(Uploaded).is_err());
        assert!(Opened.transition_to(Pending).is_err());
    }

    #[test]
    fn state_view_tracks_the_deadline() {
        let base = VendorSubmission {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            channel: SubmissionChannel::Commercial,
            state: SubmissionState::Uploaded,
            file_name: Some("bid.pdf".into()),
            sealed: true,
            sealed_at: Some(t(10)),
            upload_completed_at: Some(t(10)),
            opened_at: None,
            opened_by: None,
            compliance_status: ComplianceStatus::Pending,
            total_bid_amount: None,
            created_at: t(8),
            updated_at: t(10),
        };

        assert_eq!(base.state_view(t(11), t(12)), SubmissionState::AwaitingDeadline);
        assert_eq!(base.state_view(t(13), t(12)), SubmissionState::Uploaded);

        let opened = VendorSubmission {
            opened_at: Some(t(13)),
            opened_by: Some(Uuid::new_v4()),
            ..base
        };
        assert_eq!(opened.state_view(t(14), t(12)), SubmissionState::Opened);
    }
}
