//! Daily pack issuance: one "Daily Pack" per active user per UTC day.
//! The primary run walks the user directory in bounded batches with one
//! transaction per batch, so a mid-run failure loses at most the current
//! batch. A recovery pass catches users whose latest daily pack is older
//! than 24 hours (or missing) without ever duplicating today's pack — the
//! already-issued-today check runs inside each batch transaction, which
//! makes both passes idempotent per (user, UTC day).

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{info, warn};
use uuid::Uuid;

use atelier_types::api::{IssuanceReport, IssuanceStats};
use atelier_types::models::{PackType, Rarity, UserPack};
use atelier_types::recipe::{Recipe, RecipeEntry};

use crate::Database;
use crate::error::PackError;
use crate::models::parse_db_time;
use crate::packs::insert_user_pack;

pub const DAILY_PACK_NAME: &str = "Daily Pack";
pub const DAILY_PACK_DESCRIPTION: &str = "A free pack given daily to active users";

/// 3 commons, 1 uncommon, 20% chance of a rare.
pub fn daily_pack_recipe() -> Recipe {
    Recipe::new([
        (Rarity::Common, RecipeEntry::Fixed { count: 3 }),
        (Rarity::Uncommon, RecipeEntry::Fixed { count: 1 }),
        (Rarity::Rare, RecipeEntry::Chance { chance: 0.2 }),
    ])
}

/// Result of issuing a daily pack to one user. "Already received today" is
/// a successful outcome, not an error: idempotence requires the no-op.
#[derive(Debug)]
pub enum IssuanceOutcome {
    Issued(UserPack),
    AlreadyIssued,
}

impl Database {
    /// Find or create the Daily Pack type.
    pub fn ensure_daily_pack_type(&self) -> Result<PackType, PackError> {
        if let Some(existing) = self.pack_type_by_name(DAILY_PACK_NAME)? {
            return Ok(existing);
        }
        let created = self.create_pack_type(
            DAILY_PACK_NAME,
            Some(DAILY_PACK_DESCRIPTION),
            &daily_pack_recipe(),
        )?;
        info!(pack_type_id = %created.id, "created Daily Pack type");
        Ok(created)
    }

    /// Primary daily run: issue today's pack to every active user who does
    /// not already have one. Idempotent per UTC day.
    pub fn run_daily_issuance(&self, batch_size: usize) -> Result<IssuanceReport, PackError> {
        self.issuance_pass(batch_size, "daily", |conn, user, daily, now| {
            if issued_on_day(conn, user, daily, now.date_naive())? {
                Ok(None)
            } else {
                insert_user_pack(conn, user, daily).map(Some)
            }
        })
    }

    /// Recovery pass: catch up users whose most recent daily pack is older
    /// than 24 hours, or who have never received one. A pack issued earlier
    /// today is by definition less than 24 hours old, so the pass never
    /// duplicates the primary run.
    pub fn run_recovery_issuance(&self, batch_size: usize) -> Result<IssuanceReport, PackError> {
        self.issuance_pass(batch_size, "recovery", |conn, user, daily, now| {
            match latest_daily_acquired_at(conn, user, daily)? {
                Some(latest) if now - latest < Duration::hours(24) => Ok(None),
                _ => insert_user_pack(conn, user, daily).map(Some),
            }
        })
    }

    fn issuance_pass<F>(
        &self,
        batch_size: usize,
        pass: &'static str,
        issue_one: F,
    ) -> Result<IssuanceReport, PackError>
    where
        F: Fn(&Connection, Uuid, Uuid, DateTime<Utc>) -> Result<Option<UserPack>, PackError>,
    {
        let daily = self.ensure_daily_pack_type()?.id;
        let users = self.active_user_ids().map_err(PackError::Db)?;
        let batch_size = batch_size.max(1);

        let mut report = IssuanceReport::default();
        for chunk in users.chunks(batch_size) {
            // One transaction per batch: a failure here loses only this
            // chunk's progress.
            let result: Result<(u64, u64), PackError> = self.with_conn_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = Utc::now();
                let (mut issued, mut skipped) = (0, 0);
                for &user in chunk {
                    match issue_one(&tx, user, daily, now)? {
                        Some(_) => issued += 1,
                        None => skipped += 1,
                    }
                }
                tx.commit().map_err(PackError::Db)?;
                Ok((issued, skipped))
            });
            match result {
                Ok((issued, skipped)) => {
                    report.issued += issued;
                    report.skipped += skipped;
                    report.batches += 1;
                }
                Err(e) => {
                    warn!(pass, error = %e, "issuance batch failed; continuing with next batch");
                }
            }
        }

        info!(
            pass,
            issued = report.issued,
            skipped = report.skipped,
            batches = report.batches,
            "issuance run complete"
        );
        Ok(report)
    }

    /// Issue today's daily pack to a single user (claim endpoint and admin
    /// tooling). Same per-day dedup as the batch run.
    pub fn issue_daily_for_user(&self, user_id: Uuid) -> Result<IssuanceOutcome, PackError> {
        if !self.user_exists(user_id).map_err(PackError::Db)? {
            return Err(PackError::UserNotFound);
        }
        let daily = self.ensure_daily_pack_type()?.id;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if issued_on_day(&tx, user_id, daily, Utc::now().date_naive())? {
                return Ok(IssuanceOutcome::AlreadyIssued);
            }
            let pack = insert_user_pack(&tx, user_id, daily)?;
            tx.commit().map_err(PackError::Db)?;
            Ok(IssuanceOutcome::Issued(pack))
        })
    }

    /// When the user's next daily pack becomes available: midnight UTC after
    /// their most recent one. `None` means a pack is available now (or they
    /// have never received one).
    pub fn next_daily_pack_time(
        &self,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, PackError> {
        let Some(daily) = self.pack_type_by_name(DAILY_PACK_NAME)? else {
            return Ok(None);
        };
        let latest = self.with_conn(|conn| latest_daily_acquired_at(conn, user_id, daily.id))?;
        let Some(latest) = latest else {
            return Ok(None);
        };

        let next_day = latest.date_naive() + Duration::days(1);
        let next_time = next_day
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(Utc::now);
        if next_time <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(next_time))
    }

    pub fn issuance_stats(&self) -> Result<IssuanceStats, PackError> {
        let daily = self.ensure_daily_pack_type()?.id;
        self.with_conn(|conn| {
            let count = |sql: &str, sql_params: &[&dyn rusqlite::types::ToSql]| {
                conn.query_row(sql, sql_params, |row| row.get::<_, u64>(0))
                    .map_err(PackError::Db)
            };
            Ok(IssuanceStats {
                active_users: count("SELECT COUNT(*) FROM users", &[])?,
                total_packs: count("SELECT COUNT(*) FROM user_packs", &[])?,
                unopened_packs: count(
                    "SELECT COUNT(*) FROM user_packs WHERE opened_at IS NULL",
                    &[],
                )?,
                users_issued_today: count(
                    "SELECT COUNT(DISTINCT user_id) FROM user_packs
                     WHERE pack_type_id = ?1 AND date(acquired_at) = ?2",
                    &[
                        &daily.to_string(),
                        &Utc::now().date_naive().to_string(),
                    ],
                )?,
            })
        })
    }
}

fn issued_on_day(
    conn: &Connection,
    user_id: Uuid,
    pack_type_id: Uuid,
    day: chrono::NaiveDate,
) -> Result<bool, PackError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM user_packs
             WHERE user_id = ?1 AND pack_type_id = ?2 AND date(acquired_at) = ?3
             LIMIT 1",
            params![
                user_id.to_string(),
                pack_type_id.to_string(),
                day.to_string(),
            ],
            |row| row.get(0),
        )
        .optional()
        .map_err(PackError::Db)?;
    Ok(found.is_some())
}

fn latest_daily_acquired_at(
    conn: &Connection,
    user_id: Uuid,
    pack_type_id: Uuid,
) -> Result<Option<DateTime<Utc>>, PackError> {
    let latest: Option<String> = conn
        .query_row(
            "SELECT acquired_at FROM user_packs
             WHERE user_id = ?1 AND pack_type_id = ?2
             ORDER BY acquired_at DESC
             LIMIT 1",
            params![user_id.to_string(), pack_type_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(PackError::Db)?;
    latest
        .as_deref()
        .map(|s| parse_db_time(s).map_err(PackError::Db))
        .transpose()
}
