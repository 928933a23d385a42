pub mod awards;
pub mod bafo;
pub mod evaluations;
pub mod health;
pub mod leveling;
pub mod projects;
pub mod submissions;
pub mod vendors;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        // Projects
        .route("/projects", post(projects::create_project))
        .route("/projects", get(projects::list_projects))
        .route("/projects/:project_id", get(projects::get_project))
        .route(
            "/projects/:project_id/transition",
            post(projects::transition_project),
        )
        // Schedule of values (nested under projects)
        .route(
            "/projects/:project_id/line-items",
            post(projects::create_line_item),
        )
        .route(
            "/projects/:project_id/line-items",
            get(projects::list_line_items),
        )
        // Vendors
        .route("/vendors", post(vendors::create_vendor))
        .route("/vendors", get(vendors::list_vendors))
        .route("/vendors/:vendor_id", get(vendors::get_vendor))
        // Sealed submissions (nested under projects)
        .route(
            "/projects/:project_id/submissions",
            post(submissions::create_submission),
        )
        .route(
            "/projects/:project_id/submissions",
            get(submissions::list_submissions),
        )
        .route(
            "/submissions/:submission_id",
            get(submissions::get_submission),
        )
        .route(
            "/submissions/:submission_id/upload-slot",
            post(submissions::request_upload_slot),
        )
        .route(
            "/uploads/:credential_id/complete",
            post(submissions::complete_upload),
        )
        .route(
            "/uploads/:credential_id/cancel",
            post(submissions::cancel_upload),
        )
        .route(
            "/uploads/:credential_id/fail",
            post(submissions::fail_upload),
        )
        .route(
            "/submissions/:submission_id/access",
            post(submissions::request_access),
        )
        .route(
            "/submissions/:submission_id/line-item-bids",
            post(submissions::record_line_item_bids),
        )
        .route(
            "/submissions/:submission_id/line-item-bids",
            get(submissions::list_line_item_bids),
        )
        .route(
            "/submissions/:submission_id/access-log",
            get(submissions::list_access_log),
        )
        // Leveling (nested under projects)
        .route(
            "/projects/:project_id/leveling/run",
            post(leveling::run_leveling),
        )
        .route(
            "/projects/:project_id/leveling",
            get(leveling::get_latest_analyses),
        )
        // Evaluations and ranking
        .route(
            "/submissions/:submission_id/evaluations",
            post(evaluations::create_evaluation),
        )
        .route(
            "/submissions/:submission_id/evaluations",
            get(evaluations::list_evaluations),
        )
        .route(
            "/projects/:project_id/ranking",
            get(evaluations::get_ranking),
        )
        // BAFO rounds
        .route("/projects/:project_id/bafo", post(bafo::create_bafo_round))
        .route("/projects/:project_id/bafo", get(bafo::list_bafo_rounds))
        .route(
            "/bafo/:request_id/responses",
            post(bafo::submit_bafo_response),
        )
        .route(
            "/bafo/:request_id/responses",
            get(bafo::list_bafo_responses),
        )
        .route("/bafo/:request_id/complete", post(bafo::complete_bafo_round))
        .route("/bafo/:request_id/cancel", post(bafo::cancel_bafo_round))
        // Award recommendations
        .route("/projects/:project_id/award", post(awards::create_award))
        .route("/projects/:project_id/award", get(awards::get_active_award))
        .route(
            "/projects/:project_id/award/history",
            get(awards::list_award_history),
        )
        .route(
            "/awards/:award_id/submit",
            post(awards::submit_award_for_review),
        )
        .route("/awards/:award_id/approve", post(awards::approve_award))
        .route("/awards/:award_id/reject", post(awards::reject_award))
        .route("/awards/:award_id/memo", post(awards::generate_award_memo))
}
