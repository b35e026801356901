use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Rarity, Trade, TradeStatus, UserPack};

// -- JWT Claims --

/// JWT claims supplied by the identity layer. The core trusts `sub` as the
/// authenticated actor for every operation; `role` gates the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

// -- Trades --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposeTradeRequest {
    pub recipient_id: Uuid,
    pub offered_artwork_id: Uuid,
    pub requested_artwork_id: Uuid,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub recipient_id: Uuid,
    pub offered_artwork_id: Uuid,
    pub requested_artwork_id: Uuid,
    pub message: Option<String>,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Trade> for TradeResponse {
    fn from(trade: Trade) -> Self {
        TradeResponse {
            id: trade.id,
            initiator_id: trade.initiator_id,
            recipient_id: trade.recipient_id,
            offered_artwork_id: trade.offered_artwork_id,
            requested_artwork_id: trade.requested_artwork_id,
            message: trade.message,
            status: trade.status,
            created_at: trade.created_at,
            updated_at: trade.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TradeListResponse {
    pub trades: Vec<TradeResponse>,
}

#[derive(Debug, Deserialize)]
pub struct TradeListQuery {
    pub status: Option<TradeStatus>,
}

// -- Packs --

#[derive(Debug, Serialize)]
pub struct UserPackResponse {
    pub id: Uuid,
    pub pack_type_id: Uuid,
    pub pack_type_name: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnopenedPacksResponse {
    pub packs: Vec<UserPackResponse>,
}

#[derive(Debug, Serialize)]
pub struct GrantedArtwork {
    pub artwork_id: Uuid,
    pub title: String,
    pub rarity: Rarity,
}

#[derive(Debug, Serialize)]
pub struct OpenPackResponse {
    pub artworks_received: Vec<GrantedArtwork>,
    /// Items the recipe promised but the catalog could not supply.
    pub shortfall: u32,
}

#[derive(Debug, Serialize)]
pub struct ClaimDailyPackResponse {
    pub already_received: bool,
    pub pack: Option<ClaimedPack>,
}

#[derive(Debug, Serialize)]
pub struct ClaimedPack {
    pub user_pack_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

impl From<UserPack> for ClaimedPack {
    fn from(pack: UserPack) -> Self {
        ClaimedPack {
            user_pack_id: pack.id,
            acquired_at: pack.acquired_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NextDailyPackResponse {
    /// Midnight UTC after the most recent daily pack; `null` means a pack is
    /// available now (or the user has never received one).
    pub next_pack_at: Option<DateTime<Utc>>,
}

// -- Admin issuance --

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IssuanceReport {
    pub issued: u64,
    pub skipped: u64,
    pub batches: u64,
}

#[derive(Debug, Serialize)]
pub struct IssuanceStats {
    pub active_users: u64,
    pub total_packs: u64,
    pub unopened_packs: u64,
    pub users_issued_today: u64,
}
