use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use atelier_db::issuance::IssuanceOutcome;
use atelier_types::api::{
    Claims, ClaimDailyPackResponse, GrantedArtwork, NextDailyPackResponse, OpenPackResponse,
    UnopenedPacksResponse, UserPackResponse,
};

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn open(
    State(state): State<AppState>,
    Path(user_pack_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = claims.sub;
    let (granted, shortfall) =
        blocking(move || state.db.open_pack(user_pack_id, actor)).await?;

    Ok(Json(OpenPackResponse {
        artworks_received: granted
            .into_iter()
            .map(|art| GrantedArtwork {
                artwork_id: art.artwork_id,
                title: art.title,
                rarity: art.rarity,
            })
            .collect(),
        shortfall,
    }))
}

pub async fn list_unopened(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let packs = blocking(move || state.db.list_unopened_packs(user)).await?;
    Ok(Json(UnopenedPacksResponse {
        packs: packs
            .into_iter()
            .map(|entry| UserPackResponse {
                id: entry.pack.id,
                pack_type_id: entry.pack.pack_type_id,
                pack_type_name: entry.pack_type_name,
                acquired_at: entry.pack.acquired_at,
            })
            .collect(),
    }))
}

pub async fn claim_daily(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let outcome = blocking(move || state.db.issue_daily_for_user(user)).await?;
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

pub async fn next_daily(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let next_pack_at = blocking(move || state.db.next_daily_pack_time(user)).await?;
    Ok(Json(NextDailyPackResponse { next_pack_at }))
}
