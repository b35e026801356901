//! Admin-only issuance surface: trigger the daily or recovery run out of
//! schedule, issue a pack to one user, and inspect counters.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use atelier_db::issuance::IssuanceOutcome;
use atelier_types::api::ClaimDailyPackResponse;

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn run_issuance(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let batch = state.issuance_batch;
    let report = blocking(move || state.db.run_daily_issuance(batch)).await?;
    Ok(Json(report))
}

pub async fn run_recovery(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let batch = state.issuance_batch;
    let report = blocking(move || state.db.run_recovery_issuance(batch)).await?;
    Ok(Json(report))
}

pub async fn issue_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(move || state.db.issue_daily_for_user(user_id)).await?;
    Ok(Json(match outcome {
        IssuanceOutcome::Issued(pack) => ClaimDailyPackResponse {
            already_received: false,
            pack: Some(pack.into()),
        },
        IssuanceOutcome::AlreadyIssued => ClaimDailyPackResponse {
            already_received: true,
            pack: None,
        },
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(move || state.db.issuance_stats()).await?;
    Ok(Json(stats))
}
