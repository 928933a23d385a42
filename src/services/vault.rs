//! Sealed submission vault.
//!
//! All reads and writes on vendor packages flow through here. The two gates
//! (`check_upload_slot`, `check_access`) are pure functions in
//! `domain::submissions`; this module wires them to the database, the
//! server clock, and the append-only access log. Every operation, granted or
//! denied, leaves a log entry.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::domain::events::DomainEvent;
use crate::domain::projects::ProjectStatus;
use crate::domain::submissions::{
    check_access, check_upload_slot, key_matches_file_name, storage_key, AccessAction,
    AccessLogEntry, ComplianceStatus,
    CompleteUploadRequest, RecordLineItemBidsRequest, RequestUploadSlotRequest, SubmissionAccess,
    SubmissionChannel, SubmissionState, UploadSlot, VaultDenial, VendorSubmission,
};
use crate::error::ApiError;
use crate::money::{cents_to_decimal, opt_cents_to_decimal, opt_decimal_to_cents};

/// Database row for a vendor submission. Carries the storage fields the
/// public entity deliberately omits.
#[derive(Debug, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub vendor_id: Uuid,
    pub channel: String,
    pub state: String,
    pub storage_key: Option<String>,
    pub file_name: Option<String>,
    pub checksum: Option<String>,
    pub sealed: bool,
    pub sealed_at: Option<DateTime<Utc>>,
    pub upload_completed_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub opened_by: Option<Uuid>,
    pub compliance_status: String,
    pub total_bid_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SUBMISSION_COLUMNS: &str = "id, project_id, vendor_id, channel, state, storage_key, \
     file_name, checksum, sealed, sealed_at, upload_completed_at, opened_at, opened_by, \
     compliance_status, total_bid_amount, created_at, updated_at";

impl SubmissionRow {
    pub fn into_submission(self) -> Result<VendorSubmission, ApiError> {
        Ok(VendorSubmission {
            id: self.id,
            project_id: self.project_id,
            vendor_id: self.vendor_id,
            channel: SubmissionChannel::parse(&self.channel)?,
            state: SubmissionState::parse(&self.state),
            file_name: self.file_name,
            sealed: self.sealed,
            sealed_at: self.sealed_at,
            upload_completed_at: self.upload_completed_at,
            opened_at: self.opened_at,
            opened_by: self.opened_by,
            compliance_status: ComplianceStatus::parse(&self.compliance_status),
            total_bid_amount: opt_decimal_to_cents(self.total_bid_amount),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    submission_id: Uuid,
    vendor_id: Uuid,
    storage_key: String,
    upload_url: String,
    expires_at: DateTime<Utc>,
    used: bool,
    cancelled: bool,
}

/// Append an entry to the access log. The log is the audit trail of the
/// vault; a failed append fails the operation that produced it.
pub async fn append_access_log(
    db: &PgPool,
    submission_id: Uuid,
    actor_id: Option<Uuid>,
    action: AccessAction,
    outcome: &str,
    reason: Option<&str>,
    metadata: serde_json::Value,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        INSERT INTO access_log_entries (submission_id, actor_id, action, outcome, reason, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(submission_id)
    .bind(actor_id)
    .bind(action.as_str())
    .bind(outcome)
    .bind(reason)
    .bind(&metadata)
    .execute(db)
    .await?;
    Ok(())
}

/// Record a refusal. Log failures are reported but never mask the denial the
/// caller is about to receive.
async fn log_denial(
    db: &PgPool,
    submission_id: Uuid,
    actor_id: Uuid,
    action: AccessAction,
    denial: VaultDenial,
) {
    if let Err(e) = append_access_log(
        db,
        submission_id,
        Some(actor_id),
        action,
        "denied",
        Some(denial.reason()),
        serde_json::json!({}),
    )
    .await
    {
        tracing::error!(error = %e, submission_id = %submission_id, "Failed to log vault denial");
    }
    tracing::warn!(
        submission_id = %submission_id,
        actor_id = %actor_id,
        action = action.as_str(),
        reason = denial.reason(),
        "Vault operation denied"
    );
}

async fn load_submission(
    db: &PgPool,
    submission_id: Uuid,
) -> Result<(SubmissionRow, ProjectStatus, DateTime<Utc>), ApiError> {
    #[derive(sqlx::FromRow)]
    struct ProjectBits {
        status: String,
        bid_due_date: DateTime<Utc>,
    }

    let row = sqlx::query_as::<_, SubmissionRow>(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM vendor_submissions WHERE id = $1"
    ))
    .bind(submission_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Submission not found"))?;

    let project = sqlx::query_as::<_, ProjectBits>(
        "SELECT status, bid_due_date FROM bid_projects WHERE id = $1",
    )
    .bind(row.project_id)
    .fetch_one(db)
    .await?;

    Ok((row, ProjectStatus::parse(&project.status), project.bid_due_date))
}

/// Issue (or re-issue) a single-use upload credential for a submission.
pub async fn request_upload_slot(
    state: &AppState,
    auth: &AuthContext,
    submission_id: Uuid,
    req: &RequestUploadSlotRequest,
) -> Result<UploadSlot, ApiError> {
    let (sub, project_status, due_date) = load_submission(&state.db, submission_id).await?;
    let now = state.clock.now();

    if let Err(denial) = check_upload_slot(
        auth.role,
        auth.actor_id,
        sub.vendor_id,
        project_status,
        now,
        due_date,
    ) {
        log_denial(&state.db, sub.id, auth.actor_id, AccessAction::SlotRequested, denial).await;
        return Err(denial.into());
    }

    let current = SubmissionState::parse(&sub.state);
    if current == SubmissionState::Uploaded || current == SubmissionState::Opened {
        return Err(ApiError::InvalidStateTransition(
            "submission is already sealed".to_string(),
        ));
    }

    // An unexpired, unused credential is re-issued rather than minted again.
    let existing = sqlx::query_as::<_, CredentialRow>(
        r#"
        SELECT id, submission_id, vendor_id, storage_key, upload_url, expires_at, used, cancelled
        FROM upload_credentials
        WHERE submission_id = $1 AND used = FALSE AND cancelled = FALSE AND expires_at > $2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(sub.id)
    .bind(now)
    .fetch_optional(&state.db)
    .await?;

    if let Some(cred) = existing {
        if key_matches_file_name(&cred.storage_key, &req.file_name) {
            append_access_log(
                &state.db,
                sub.id,
                Some(auth.actor_id),
                AccessAction::SlotRequested,
                "granted",
                Some("existing credential re-issued"),
                serde_json::json!({ "credential_id": cred.id }),
            )
            .await?;

            return Ok(UploadSlot {
                credential_id: cred.id,
                submission_id: sub.id,
                upload_url: cred.upload_url,
                storage_key: cred.storage_key,
                expires_at: cred.expires_at,
            });
        }

        // The file name changed since the slot was issued. The old
        // credential is bound to the stale storage key, so void it and
        // mint a fresh one below.
        sqlx::query(
            "UPDATE upload_credentials SET cancelled = TRUE WHERE id = $1 AND used = FALSE",
        )
        .bind(cred.id)
        .execute(&state.db)
        .await?;
        append_access_log(
            &state.db,
            sub.id,
            Some(auth.actor_id),
            AccessAction::SlotRequested,
            "granted",
            Some("credential voided after file name change"),
            serde_json::json!({ "credential_id": cred.id, "file_name": req.file_name }),
        )
        .await?;
    }

    let channel = SubmissionChannel::parse(&sub.channel)?;
    let key = storage_key(sub.project_id, now, sub.vendor_id, channel, &req.file_name);
    let credential_id = Uuid::new_v4();
    let upload_url = format!(
        "{}/{}/{}?credential={}",
        state.settings.upload_url_base.trim_end_matches('/'),
        state.settings.storage_bucket,
        key,
        credential_id
    );
    let expires_at = now + Duration::seconds(state.settings.upload_credential_ttl_seconds);

    sqlx::query(
        r#"
        INSERT INTO upload_credentials (id, submission_id, vendor_id, storage_key, upload_url, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(credential_id)
    .bind(sub.id)
    .bind(sub.vendor_id)
    .bind(&key)
    .bind(&upload_url)
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    if current != SubmissionState::Uploading {
        current.transition_to(SubmissionState::Uploading)?;
        sqlx::query(
            "UPDATE vendor_submissions SET state = 'uploading', file_name = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(sub.id)
        .bind(&req.file_name)
        .bind(now)
        .execute(&state.db)
        .await?;
    }

    append_access_log(
        &state.db,
        sub.id,
        Some(auth.actor_id),
        AccessAction::SlotRequested,
        "granted",
        None,
        serde_json::json!({ "credential_id": credential_id, "storage_key": key }),
    )
    .await?;

    Ok(UploadSlot {
        credential_id,
        submission_id: sub.id,
        upload_url,
        storage_key: key,
        expires_at,
    })
}

async fn load_credential(db: &PgPool, credential_id: Uuid) -> Result<CredentialRow, ApiError> {
    sqlx::query_as::<_, CredentialRow>(
        r#"
        SELECT id, submission_id, vendor_id, storage_key, upload_url, expires_at, used, cancelled
        FROM upload_credentials
        WHERE id = $1
        "#,
    )
    .bind(credential_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Upload credential not found"))
}

/// Seal the package: consume the credential (compare-and-set), transition to
/// `uploaded`, stamp `sealed_at` from the server clock. Replays are
/// idempotent and return the already-sealed submission.
pub async fn complete_upload(
    state: &AppState,
    auth: &AuthContext,
    credential_id: Uuid,
    req: &CompleteUploadRequest,
) -> Result<VendorSubmission, ApiError> {
    if req.checksum.trim().is_empty() {
        return Err(ApiError::bad_request(
            "checksum is required to seal a submission",
        ));
    }

    let cred = load_credential(&state.db, credential_id).await?;
    let now = state.clock.now();

    if auth.actor_id != cred.vendor_id {
        log_denial(
            &state.db,
            cred.submission_id,
            auth.actor_id,
            AccessAction::UploadCompleted,
            VaultDenial::NotSubmittingVendor,
        )
        .await;
        return Err(VaultDenial::NotSubmittingVendor.into());
    }

    if cred.cancelled {
        return Err(ApiError::conflict("Upload credential was cancelled"));
    }

    if cred.used {
        // Idempotent replay of a completed upload.
        let (sub, _, _) = load_submission(&state.db, cred.submission_id).await?;
        if sub.sealed {
            return sub.into_submission();
        }
        return Err(ApiError::conflict("Upload credential already consumed"));
    }

    if cred.expires_at <= now {
        append_access_log(
            &state.db,
            cred.submission_id,
            Some(auth.actor_id),
            AccessAction::UploadFailed,
            "denied",
            Some("upload credential expired"),
            serde_json::json!({ "credential_id": credential_id }),
        )
        .await?;
        return Err(ApiError::UploadFailed(
            "upload credential expired; request a new slot".to_string(),
        ));
    }

    // The CAS on `used` is what makes concurrent completions safe: exactly
    // one caller flips it, everyone else replays.
    let consumed = sqlx::query(
        "UPDATE upload_credentials SET used = TRUE, used_at = $2 WHERE id = $1 AND used = FALSE AND cancelled = FALSE",
    )
    .bind(credential_id)
    .bind(now)
    .execute(&state.db)
    .await?;

    if consumed.rows_affected() == 0 {
        let (sub, _, _) = load_submission(&state.db, cred.submission_id).await?;
        if sub.sealed {
            return sub.into_submission();
        }
        return Err(ApiError::conflict("Upload credential already consumed"));
    }

    let (sub, _, _) = load_submission(&state.db, cred.submission_id).await?;
    SubmissionState::parse(&sub.state).transition_to(SubmissionState::Uploaded)?;

    let sealed = sqlx::query_as::<_, SubmissionRow>(&format!(
        r#"
        UPDATE vendor_submissions
        SET state = 'uploaded', sealed = TRUE, sealed_at = $2, upload_completed_at = $2,
            storage_key = $3, checksum = $4, updated_at = $2
        WHERE id = $1
        RETURNING {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(cred.submission_id)
    .bind(now)
    .bind(&cred.storage_key)
    .bind(&req.checksum)
    .fetch_one(&state.db)
    .await?;

    append_access_log(
        &state.db,
        cred.submission_id,
        Some(auth.actor_id),
        AccessAction::UploadCompleted,
        "granted",
        None,
        serde_json::json!({ "credential_id": credential_id, "checksum": req.checksum }),
    )
    .await?;

    tracing::info!(
        submission_id = %cred.submission_id,
        vendor_id = %cred.vendor_id,
        "Submission sealed"
    );

    sealed.into_submission()
}

/// Cancel an in-flight upload: void the credential, return to `pending`.
pub async fn cancel_upload(
    state: &AppState,
    auth: &AuthContext,
    credential_id: Uuid,
) -> Result<(), ApiError> {
    let cred = load_credential(&state.db, credential_id).await?;
    let now = state.clock.now();

    if auth.actor_id != cred.vendor_id {
        log_denial(
            &state.db,
            cred.submission_id,
            auth.actor_id,
            AccessAction::UploadCancelled,
            VaultDenial::NotSubmittingVendor,
        )
        .await;
        return Err(VaultDenial::NotSubmittingVendor.into());
    }

    let voided = sqlx::query(
        "UPDATE upload_credentials SET cancelled = TRUE WHERE id = $1 AND used = FALSE AND cancelled = FALSE",
    )
    .bind(credential_id)
    .execute(&state.db)
    .await?;

    if voided.rows_affected() == 0 {
        return Err(ApiError::conflict("Upload credential already used or cancelled"));
    }

    let (sub, _, _) = load_submission(&state.db, cred.submission_id).await?;
    let current = SubmissionState::parse(&sub.state);
    if current == SubmissionState::Uploading {
        current.transition_to(SubmissionState::Pending)?;
        sqlx::query(
            "UPDATE vendor_submissions SET state = 'pending', file_name = NULL, updated_at = $2 WHERE id = $1",
        )
        .bind(cred.submission_id)
        .bind(now)
        .execute(&state.db)
        .await?;
    }

    append_access_log(
        &state.db,
        cred.submission_id,
        Some(auth.actor_id),
        AccessAction::UploadCancelled,
        "granted",
        None,
        serde_json::json!({ "credential_id": credential_id }),
    )
    .await?;

    Ok(())
}

/// Mark an in-flight upload as failed (transport error reported by the
/// uploader). The submission moves to `error`; a fresh slot request retries.
pub async fn fail_upload(
    state: &AppState,
    auth: &AuthContext,
    credential_id: Uuid,
    reason: Option<&str>,
) -> Result<(), ApiError> {
    let cred = load_credential(&state.db, credential_id).await?;
    let now = state.clock.now();

    if auth.actor_id != cred.vendor_id {
        log_denial(
            &state.db,
            cred.submission_id,
            auth.actor_id,
            AccessAction::UploadFailed,
            VaultDenial::NotSubmittingVendor,
        )
        .await;
        return Err(VaultDenial::NotSubmittingVendor.into());
    }

    sqlx::query(
        "UPDATE upload_credentials SET cancelled = TRUE WHERE id = $1 AND used = FALSE",
    )
    .bind(credential_id)
    .execute(&state.db)
    .await?;

    let (sub, _, _) = load_submission(&state.db, cred.submission_id).await?;
    let current = SubmissionState::parse(&sub.state);
    if current == SubmissionState::Uploading {
        current.transition_to(SubmissionState::Error)?;
        sqlx::query("UPDATE vendor_submissions SET state = 'error', updated_at = $2 WHERE id = $1")
            .bind(cred.submission_id)
            .bind(now)
            .execute(&state.db)
            .await?;
    }

    append_access_log(
        &state.db,
        cred.submission_id,
        Some(auth.actor_id),
        AccessAction::UploadFailed,
        "recorded",
        reason,
        serde_json::json!({ "credential_id": credential_id }),
    )
    .await?;

    Ok(())
}

/// The sole read path for sealed content. Staff only, and only once
/// `now >= bid_due_date` with the package sealed. The first successful call
/// sets the opener exactly once (CAS on `opened_at IS NULL`) and emits
/// `bid.opened`.
pub async fn request_access(
    state: &AppState,
    auth: &AuthContext,
    submission_id: Uuid,
) -> Result<SubmissionAccess, ApiError> {
    let (sub, _project_status, due_date) = load_submission(&state.db, submission_id).await?;
    let now = state.clock.now();

    if !auth.role.is_staff() {
        log_denial(
            &state.db,
            sub.id,
            auth.actor_id,
            AccessAction::AccessDenied,
            VaultDenial::NotSubmittingVendor,
        )
        .await;
        return Err(ApiError::unauthorized(
            "sealed submissions are readable by owner-side staff only",
        ));
    }

    if let Err(denial) = check_access(now, due_date, sub.sealed) {
        log_denial(&state.db, sub.id, auth.actor_id, AccessAction::AccessDenied, denial).await;
        return Err(denial.into());
    }

    // First open wins; every later caller observes the original opener.
    let first_open = sqlx::query(
        r#"
        UPDATE vendor_submissions
        SET opened_at = $2, opened_by = $3, state = 'opened', updated_at = $2
        WHERE id = $1 AND opened_at IS NULL
        "#,
    )
    .bind(sub.id)
    .bind(now)
    .bind(auth.actor_id)
    .execute(&state.db)
    .await?
    .rows_affected()
        > 0;

    let (opened, _, _) = load_submission(&state.db, submission_id).await?;
    let opened_at = opened
        .opened_at
        .ok_or_else(|| ApiError::internal("submission open timestamp missing after open"))?;
    let opened_by = opened
        .opened_by
        .ok_or_else(|| ApiError::internal("submission opener missing after open"))?;

    // Audit before reference: the log entry lands before the caller sees
    // the storage key.
    append_access_log(
        &state.db,
        sub.id,
        Some(auth.actor_id),
        if first_open { AccessAction::Opened } else { AccessAction::Accessed },
        "granted",
        None,
        serde_json::json!({ "first_open": first_open }),
    )
    .await?;

    if first_open {
        state
            .events
            .publish(DomainEvent::BidOpened {
                project_id: opened.project_id,
                submission_id: opened.id,
                vendor_id: opened.vendor_id,
                opened_by,
                occurred_at: now,
            })
            .await;
    }

    Ok(SubmissionAccess {
        submission_id: opened.id,
        storage_key: opened.storage_key,
        file_name: opened.file_name,
        checksum: opened.checksum,
        first_open,
        opened_at,
        opened_by,
    })
}

/// Record the pricing schedule extracted from an opened package.
pub async fn record_line_item_bids(
    state: &AppState,
    auth: &AuthContext,
    submission_id: Uuid,
    req: &RecordLineItemBidsRequest,
) -> Result<VendorSubmission, ApiError> {
    auth.require_staff()?;

    let (sub, _, _) = load_submission(&state.db, submission_id).await?;
    if sub.opened_at.is_none() {
        return Err(ApiError::SealedBeforeDeadline(
            "pricing can be recorded only after the package is opened".to_string(),
        ));
    }

    let item_ids: Vec<Uuid> = req.bids.iter().map(|b| b.line_item_id).collect();
    let known: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM line_items WHERE project_id = $1 AND id = ANY($2)",
    )
    .bind(sub.project_id)
    .bind(&item_ids)
    .fetch_one(&state.db)
    .await?;
    if known as usize != item_ids.len() {
        return Err(ApiError::bad_request(
            "one or more line items do not belong to this project",
        ));
    }

    let now = state.clock.now();
    let mut tx = state.db.begin().await?;
    for bid in &req.bids {
        sqlx::query(
            r#"
            INSERT INTO vendor_line_item_bids
                (submission_id, line_item_id, unit_price, total_price, is_no_bid, is_allowance, is_alternate, vendor_notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (submission_id, line_item_id) DO UPDATE SET
                unit_price = EXCLUDED.unit_price,
                total_price = EXCLUDED.total_price,
                is_no_bid = EXCLUDED.is_no_bid,
                is_allowance = EXCLUDED.is_allowance,
                is_alternate = EXCLUDED.is_alternate,
                vendor_notes = EXCLUDED.vendor_notes
            "#,
        )
        .bind(submission_id)
        .bind(bid.line_item_id)
        .bind(cents_to_decimal(bid.unit_price))
        .bind(cents_to_decimal(bid.total_price))
        .bind(bid.is_no_bid)
        .bind(bid.is_allowance)
        .bind(bid.is_alternate)
        .bind(&bid.vendor_notes)
        .execute(&mut *tx)
        .await?;
    }

    let total = match req.total_bid_amount {
        Some(cents) => Some(cents),
        None => {
            let sum: i64 = req
                .bids
                .iter()
                .filter(|b| !b.is_no_bid && !b.is_alternate)
                .map(|b| b.total_price)
                .sum();
            Some(sum)
        }
    };

    let updated = sqlx::query_as::<_, SubmissionRow>(&format!(
        r#"
        UPDATE vendor_submissions SET total_bid_amount = $2, updated_at = $3
        WHERE id = $1
        RETURNING {SUBMISSION_COLUMNS}
        "#
    ))
    .bind(submission_id)
    .bind(opt_cents_to_decimal(total))
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    append_access_log(
        &state.db,
        submission_id,
        Some(auth.actor_id),
        AccessAction::BidsRecorded,
        "granted",
        None,
        serde_json::json!({ "line_items": req.bids.len(), "total_bid_amount": total }),
    )
    .await?;

    updated.into_submission()
}

/// Full access history for a submission, oldest first.
pub async fn list_access_log(
    db: &PgPool,
    submission_id: Uuid,
) -> Result<Vec<AccessLogEntry>, ApiError> {
    #[derive(sqlx::FromRow)]
    struct LogRow {
        id: Uuid,
        submission_id: Uuid,
        actor_id: Option<Uuid>,
        action: String,
        outcome: String,
        reason: Option<String>,
        metadata: serde_json::Value,
        occurred_at: DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT id, submission_id, actor_id, action, outcome, reason, metadata, occurred_at
        FROM access_log_entries
        WHERE submission_id = $1
        ORDER BY occurred_at ASC
        "#,
    )
    .bind(submission_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| AccessLogEntry {
            id: r.id,
            submission_id: r.submission_id,
            actor_id: r.actor_id,
            action: r.action,
            outcome: r.outcome,
            reason: r.reason,
            metadata: r.metadata,
            occurred_at: r.occurred_at,
        })
        .collect())
}
