use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use atelier_db::error::{PackError, TradeError};

/// API-facing error: every rejected operation carries a specific reason in
/// the response body, never a bare status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub reason: String,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        ApiError {
            status,
            reason: reason.into(),
        }
    }

    pub fn internal() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "an internal error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.reason }))).into_response()
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        let status = match &err {
            TradeError::NotFound => StatusCode::NOT_FOUND,
            TradeError::SelfTrade => StatusCode::BAD_REQUEST,
            TradeError::NotMutualFollow
            | TradeError::NotOwned { .. }
            | TradeError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            TradeError::DuplicateTrade
            | TradeError::InvalidState { .. }
            | TradeError::OwnershipChanged => StatusCode::CONFLICT,
            TradeError::Db(e) => {
                error!("trade operation failed: {e}");
                return ApiError::internal();
            }
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<PackError> for ApiError {
    fn from(err: PackError) -> Self {
        let status = match &err {
            PackError::NotFound | PackError::UserNotFound => StatusCode::NOT_FOUND,
            PackError::NotOwner => StatusCode::FORBIDDEN,
            PackError::AlreadyOpened | PackError::NoEligibleArtworks => StatusCode::CONFLICT,
            PackError::BadRecipe(e) => {
                error!("pack type misconfigured: {e}");
                return ApiError::internal();
            }
            PackError::Ownership(e) => {
                error!("pack grant conflicted with the ledger: {e}");
                return ApiError::internal();
            }
            PackError::Db(e) => {
                error!("pack operation failed: {e}");
                return ApiError::internal();
            }
        };
        ApiError::new(status, err.to_string())
    }
}

/// Run blocking database work off the async runtime.
pub async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {e}");
            ApiError::internal()
        })?
        .map_err(Into::into)
}
