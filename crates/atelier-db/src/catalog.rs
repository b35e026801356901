//! Read-side collaborator queries: the user directory, the social graph, and
//! the artwork catalog. The surrounding CRUD service owns these tables; the
//! core only enumerates users and checks mutual follows.
//! The insert functions exist for seeding and tests.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use atelier_types::models::Rarity;

use crate::Database;
use crate::models::now_db_time;

impl Database {
    pub fn insert_user(&self, id: Uuid, username: &str, role: &str) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, role, now_db_time()],
            )?;
            Ok(())
        })
    }

    /// All user ids eligible for daily issuance, in a stable order so batch
    /// runs walk the directory deterministically.
    pub fn active_user_ids(&self) -> rusqlite::Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users ORDER BY created_at, id")?;
            let ids = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    crate::models::parse_db_id(&id)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    pub fn user_exists(&self, id: Uuid) -> rusqlite::Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn insert_follow(&self, follower: Uuid, followed: Uuid) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_follows (follower_id, followed_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![follower.to_string(), followed.to_string(), now_db_time()],
            )?;
            Ok(())
        })
    }

    pub fn insert_artwork(&self, id: Uuid, title: &str, rarity: Rarity) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO artworks (id, title, rarity, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), title, rarity.as_str(), now_db_time()],
            )?;
            Ok(())
        })
    }
}

/// Mutual-follow precondition for proposing a trade.
pub fn mutual_follow(conn: &Connection, a: Uuid, b: Uuid) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_follows
         WHERE (follower_id = ?1 AND followed_id = ?2)
            OR (follower_id = ?2 AND followed_id = ?1)",
        params![a.to_string(), b.to_string()],
        |row| row.get(0),
    )?;
    Ok(count == 2)
}
