//! Database row types and text-column helpers. Ids are UUIDs stored as TEXT,
//! timestamps are RFC 3339 TEXT in UTC. Row structs stay string-typed so the
//! SQL layer is independent of the domain types in atelier-types.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use atelier_types::models::{Trade, TradeStatus, UserPack};

/// Timestamp format written by this crate.
pub fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_db_time() -> String {
    to_db_time(Utc::now())
}

/// Parse a stored timestamp. Falls back to SQLite's `datetime('now')` format
/// ("YYYY-MM-DD HH:MM:SS", no timezone) for rows created by column defaults.
pub fn parse_db_time(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(conversion_err)
}

pub fn parse_db_id(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(conversion_err)
}

fn conversion_err<E>(e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
}

pub struct TradeRow {
    pub id: String,
    pub initiator_id: String,
    pub recipient_id: String,
    pub offered_artwork_id: String,
    pub requested_artwork_id: String,
    pub message: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl TradeRow {
    pub const COLUMNS: &'static str = "id, initiator_id, recipient_id, offered_artwork_id, \
         requested_artwork_id, message, status, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(TradeRow {
            id: row.get(0)?,
            initiator_id: row.get(1)?,
            recipient_id: row.get(2)?,
            offered_artwork_id: row.get(3)?,
            requested_artwork_id: row.get(4)?,
            message: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn into_trade(self) -> rusqlite::Result<Trade> {
        let status: TradeStatus = self.status.parse().map_err(|s: String| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, s.into())
        })?;
        Ok(Trade {
            id: parse_db_id(&self.id)?,
            initiator_id: parse_db_id(&self.initiator_id)?,
            recipient_id: parse_db_id(&self.recipient_id)?,
            offered_artwork_id: parse_db_id(&self.offered_artwork_id)?,
            requested_artwork_id: parse_db_id(&self.requested_artwork_id)?,
            message: self.message,
            status,
            created_at: parse_db_time(&self.created_at)?,
            updated_at: self
                .updated_at
                .as_deref()
                .map(parse_db_time)
                .transpose()?,
        })
    }
}

pub struct UserPackRow {
    pub id: String,
    pub user_id: String,
    pub pack_type_id: String,
    pub acquired_at: String,
    pub opened_at: Option<String>,
}

impl UserPackRow {
    pub const COLUMNS: &'static str = "id, user_id, pack_type_id, acquired_at, opened_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserPackRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            pack_type_id: row.get(2)?,
            acquired_at: row.get(3)?,
            opened_at: row.get(4)?,
        })
    }

    pub fn into_user_pack(self) -> rusqlite::Result<UserPack> {
        Ok(UserPack {
            id: parse_db_id(&self.id)?,
            user_id: parse_db_id(&self.user_id)?,
            pack_type_id: parse_db_id(&self.pack_type_id)?,
            acquired_at: parse_db_time(&self.acquired_at)?,
            opened_at: self.opened_at.as_deref().map(parse_db_time).transpose()?,
        })
    }
}

pub struct PackTypeRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub recipe: String,
    pub created_at: String,
}

impl PackTypeRow {
    pub const COLUMNS: &'static str = "id, name, description, recipe, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(PackTypeRow {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            recipe: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}
