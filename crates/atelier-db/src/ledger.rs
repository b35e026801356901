//! The ownership ledger: the single source of truth for which user owns
//! which artwork. All other modules mutate ownership through `grant` and
//! `transfer`, never by touching `collections` rows directly, so the
//! one-owner-per-artwork invariant holds under concurrent settlement.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashSet;
use uuid::Uuid;

use crate::Database;
use crate::error::OwnershipError;
use crate::models::now_db_time;

impl Database {
    pub fn owns(&self, user_id: Uuid, artwork_id: Uuid) -> rusqlite::Result<bool> {
        self.with_conn(|conn| owns(conn, user_id, artwork_id))
    }

    pub fn owner_of(&self, artwork_id: Uuid) -> rusqlite::Result<Option<Uuid>> {
        self.with_conn(|conn| owner_of(conn, artwork_id))
    }

    pub fn owned_artwork_ids(&self, user_id: Uuid) -> rusqlite::Result<HashSet<Uuid>> {
        self.with_conn(|conn| owned_artwork_ids(conn, user_id))
    }

    /// Give an unowned artwork to a user. Fails with `AlreadyOwned` if any
    /// user holds it, checked inside the write transaction.
    pub fn grant(
        &self,
        user_id: Uuid,
        artwork_id: Uuid,
        transaction_ref: Option<&str>,
    ) -> Result<(), OwnershipError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            grant(&tx, user_id, artwork_id, transaction_ref)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Move an artwork between users. Fails with `NotOwned` if `from` is not
    /// the current owner, re-checked under the lock rather than trusted from
    /// an earlier read.
    pub fn transfer(
        &self,
        artwork_id: Uuid,
        from: Uuid,
        to: Uuid,
        transaction_ref: Option<&str>,
    ) -> Result<(), OwnershipError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            transfer(&tx, artwork_id, from, to, transaction_ref)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Remove a ledger entry, making the artwork available again.
    pub fn release(&self, user_id: Uuid, artwork_id: Uuid) -> Result<(), OwnershipError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let deleted = tx.execute(
                "DELETE FROM collections WHERE artwork_id = ?1 AND owner_id = ?2",
                params![artwork_id.to_string(), user_id.to_string()],
            )?;
            if deleted == 0 {
                return Err(OwnershipError::NotOwned {
                    user_id,
                    artwork_id,
                });
            }
            tx.commit()?;
            Ok(())
        })
    }
}

// Connection-level operations, shared with the larger settlement and
// unboxing transactions in trades.rs and packs.rs.

pub(crate) fn owns(conn: &Connection, user_id: Uuid, artwork_id: Uuid) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM collections WHERE artwork_id = ?1 AND owner_id = ?2",
            params![artwork_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn owner_of(conn: &Connection, artwork_id: Uuid) -> rusqlite::Result<Option<Uuid>> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT owner_id FROM collections WHERE artwork_id = ?1",
            [artwork_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    owner.as_deref().map(crate::models::parse_db_id).transpose()
}

pub(crate) fn owned_artwork_ids(
    conn: &Connection,
    user_id: Uuid,
) -> rusqlite::Result<HashSet<Uuid>> {
    let mut stmt = conn.prepare("SELECT artwork_id FROM collections WHERE owner_id = ?1")?;
    let ids = stmt
        .query_map([user_id.to_string()], |row| {
            let id: String = row.get(0)?;
            crate::models::parse_db_id(&id)
        })?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(ids)
}

pub(crate) fn grant(
    conn: &Connection,
    user_id: Uuid,
    artwork_id: Uuid,
    transaction_ref: Option<&str>,
) -> Result<(), OwnershipError> {
    if owner_of(conn, artwork_id)?.is_some() {
        return Err(OwnershipError::AlreadyOwned { artwork_id });
    }
    conn.execute(
        "INSERT INTO collections (artwork_id, owner_id, acquired_at, transaction_ref)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            artwork_id.to_string(),
            user_id.to_string(),
            now_db_time(),
            transaction_ref,
        ],
    )?;
    Ok(())
}

pub(crate) fn transfer(
    conn: &Connection,
    artwork_id: Uuid,
    from: Uuid,
    to: Uuid,
    transaction_ref: Option<&str>,
) -> Result<(), OwnershipError> {
    let updated = conn.execute(
        "UPDATE collections
         SET owner_id = ?1, acquired_at = ?2, transaction_ref = ?3
         WHERE artwork_id = ?4 AND owner_id = ?5",
        params![
            to.to_string(),
            now_db_time(),
            transaction_ref,
            artwork_id.to_string(),
            from.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(OwnershipError::NotOwned {
            user_id: from,
            artwork_id,
        });
    }
    Ok(())
}
