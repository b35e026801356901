use thiserror::Error;
use uuid::Uuid;

use atelier_types::error::RecipeError;
use atelier_types::models::TradeStatus;

/// Errors from the ownership ledger. Ownership is always re-checked inside
/// the write transaction, so these reflect committed state at call time.
#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("user {user_id} does not own artwork {artwork_id}")]
    NotOwned { user_id: Uuid, artwork_id: Uuid },

    #[error("artwork {artwork_id} is already owned")]
    AlreadyOwned { artwork_id: Uuid },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Errors from the trade state machine.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("trade not found")]
    NotFound,

    #[error("cannot trade with yourself")]
    SelfTrade,

    #[error("users must follow each other to trade")]
    NotMutualFollow,

    #[error("user {user_id} does not own artwork {artwork_id}")]
    NotOwned { user_id: Uuid, artwork_id: Uuid },

    #[error("an equivalent trade is already pending")]
    DuplicateTrade,

    #[error("only the {role} can {action} this trade")]
    NotAuthorized {
        role: &'static str,
        action: &'static str,
    },

    #[error("trade is {status}, not PENDING")]
    InvalidState { status: TradeStatus },

    #[error("trade auto-rejected: one or both artworks changed hands since the offer")]
    OwnershipChanged,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl From<OwnershipError> for TradeError {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::NotOwned {
                user_id,
                artwork_id,
            } => TradeError::NotOwned {
                user_id,
                artwork_id,
            },
            // A failed swap inside the settlement transaction means the
            // pre-verified ownership drifted out from under us.
            OwnershipError::AlreadyOwned { .. } => TradeError::OwnershipChanged,
            OwnershipError::Db(e) => TradeError::Db(e),
        }
    }
}

/// Errors from pack issuance and unboxing.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("pack not found")]
    NotFound,

    #[error("you do not own this pack")]
    NotOwner,

    #[error("pack already opened")]
    AlreadyOpened,

    #[error("no eligible artworks available for this pack")]
    NoEligibleArtworks,

    #[error("pack type misconfigured: {0}")]
    BadRecipe(#[from] RecipeError),

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}
