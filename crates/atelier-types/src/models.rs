use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::recipe::Recipe;

/// Rarity tiers for artworks. Ordered from most to least common.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "common" => Ok(Rarity::Common),
            "uncommon" => Ok(Rarity::Uncommon),
            "rare" => Ok(Rarity::Rare),
            "epic" => Ok(Rarity::Epic),
            "legendary" => Ok(Rarity::Legendary),
            other => Err(format!("unknown rarity: {other}")),
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four canonical trade states. PENDING is the only non-terminal state;
/// no transition ever leaves ACCEPTED, REJECTED, or CANCELED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Accepted,
    Rejected,
    Canceled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Accepted => "ACCEPTED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TradeStatus::Pending),
            "ACCEPTED" => Ok(TradeStatus::Accepted),
            "REJECTED" => Ok(TradeStatus::Rejected),
            "CANCELED" => Ok(TradeStatus::Canceled),
            other => Err(format!("unknown trade status: {other}")),
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 1-for-1 barter offer between two users. Kept forever as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub recipe: Recipe,
    pub created_at: DateTime<Utc>,
}

/// A pack instance held by a user. `opened_at` is null until the pack is
/// opened, then set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPack {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pack_type_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
}
