use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use atelier_db::trades::{ProposeTrade, TradeDirection};
use atelier_types::api::{
    Claims, ProposeTradeRequest, TradeListQuery, TradeListResponse, TradeResponse,
};

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn propose(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProposeTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let initiator = claims.sub;
    let trade = blocking(move || {
        state.db.propose_trade(
            initiator,
            ProposeTrade {
                recipient_id: req.recipient_id,
                offered_artwork_id: req.offered_artwork_id,
                requested_artwork_id: req.requested_artwork_id,
                message: req.message,
            },
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(TradeResponse::from(trade))))
}

pub async fn accept(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = claims.sub;
    let trade = blocking(move || state.db.accept_trade(trade_id, actor)).await?;
    Ok(Json(TradeResponse::from(trade)))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = claims.sub;
    let trade = blocking(move || state.db.reject_trade(trade_id, actor)).await?;
    Ok(Json(TradeResponse::from(trade)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = claims.sub;
    let trade = blocking(move || state.db.cancel_trade(trade_id, actor)).await?;
    Ok(Json(TradeResponse::from(trade)))
}

pub async fn list_sent(
    State(state): State<AppState>,
    Query(query): Query<TradeListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    list(state, claims.sub, TradeDirection::Sent, query).await
}

pub async fn list_received(
    State(state): State<AppState>,
    Query(query): Query<TradeListQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    list(state, claims.sub, TradeDirection::Received, query).await
}

async fn list(
    state: AppState,
    user: Uuid,
    direction: TradeDirection,
    query: TradeListQuery,
) -> Result<Json<TradeListResponse>, ApiError> {
    let trades = blocking(move || state.db.list_trades(user, direction, query.status)).await?;
    Ok(Json(TradeListResponse {
        trades: trades.into_iter().map(TradeResponse::from).collect(),
    }))
}

pub async fn get(
    State(state): State<AppState>,
    Path(trade_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = claims.sub;
    let trade = blocking(move || state.db.get_trade(trade_id, actor)).await?;
    Ok(Json(TradeResponse::from(trade)))
}
