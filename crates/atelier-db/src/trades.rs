//! The trade state machine. A trade is created PENDING and moves exactly
//! once, to ACCEPTED, REJECTED, or CANCELED. Settlement (`accept_trade`)
//! swaps ownership of both artworks and cancels every other pending trade
//! touching them, all in one immediate transaction under the connection
//! mutex, so two racing accepts are linearized: one commits, the other
//! observes `InvalidState` or `OwnershipChanged`.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use atelier_types::models::{Trade, TradeStatus};

use crate::Database;
use crate::error::TradeError;
use crate::models::{TradeRow, now_db_time};
use crate::{catalog, ledger};

/// Which side of a trade a listing is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Sent,
    Received,
}

#[derive(Debug)]
pub struct ProposeTrade {
    pub recipient_id: Uuid,
    pub offered_artwork_id: Uuid,
    pub requested_artwork_id: Uuid,
    pub message: Option<String>,
}

impl Database {
    /// Create a PENDING trade offer. Validates that the initiator is not the
    /// recipient, that both users follow each other, that each side owns
    /// their artwork right now, and that no equivalent trade (same users and
    /// artworks, in either orientation) is already pending.
    pub fn propose_trade(
        &self,
        initiator_id: Uuid,
        proposal: ProposeTrade,
    ) -> Result<Trade, TradeError> {
        if initiator_id == proposal.recipient_id {
            return Err(TradeError::SelfTrade);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !catalog::mutual_follow(&tx, initiator_id, proposal.recipient_id)? {
                return Err(TradeError::NotMutualFollow);
            }
            if !ledger::owns(&tx, initiator_id, proposal.offered_artwork_id)? {
                return Err(TradeError::NotOwned {
                    user_id: initiator_id,
                    artwork_id: proposal.offered_artwork_id,
                });
            }
            if !ledger::owns(&tx, proposal.recipient_id, proposal.requested_artwork_id)? {
                return Err(TradeError::NotOwned {
                    user_id: proposal.recipient_id,
                    artwork_id: proposal.requested_artwork_id,
                });
            }
            if pending_equivalent_exists(
                &tx,
                initiator_id,
                proposal.recipient_id,
                proposal.offered_artwork_id,
                proposal.requested_artwork_id,
            )? {
                return Err(TradeError::DuplicateTrade);
            }

            let trade_id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO trades (id, initiator_id, recipient_id, offered_artwork_id,
                     requested_artwork_id, message, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7)",
                params![
                    trade_id.to_string(),
                    initiator_id.to_string(),
                    proposal.recipient_id.to_string(),
                    proposal.offered_artwork_id.to_string(),
                    proposal.requested_artwork_id.to_string(),
                    proposal.message,
                    now_db_time(),
                ],
            )?;

            let trade = load_trade(&tx, trade_id)?.ok_or(TradeError::NotFound)?;
            tx.commit()?;
            Ok(trade)
        })
    }

    /// Settle a trade: the critical operation.
    ///
    /// Inside one immediate transaction: verify the trade is PENDING and the
    /// actor is its recipient, re-verify both ownerships, swap both artworks
    /// through the ledger, mark the trade ACCEPTED, and cancel every other
    /// PENDING trade that references either artwork. If an ownership check
    /// fails the trade is auto-REJECTED (committed) and the caller sees
    /// `OwnershipChanged`.
    pub fn accept_trade(&self, trade_id: Uuid, actor: Uuid) -> Result<Trade, TradeError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let trade = load_trade(&tx, trade_id)?.ok_or(TradeError::NotFound)?;
            if actor != trade.recipient_id {
                return Err(TradeError::NotAuthorized {
                    role: "recipient",
                    action: "accept",
                });
            }
            if trade.status != TradeStatus::Pending {
                return Err(TradeError::InvalidState {
                    status: trade.status,
                });
            }

            // Ownership may have drifted since the proposal: re-verify under
            // the lock, not from any earlier read.
            let initiator_still_owns =
                ledger::owns(&tx, trade.initiator_id, trade.offered_artwork_id)?;
            let recipient_still_owns =
                ledger::owns(&tx, trade.recipient_id, trade.requested_artwork_id)?;
            if !initiator_still_owns || !recipient_still_owns {
                // The trade became unsatisfiable through no action of either
                // party: auto-reject rather than cancel, and commit that.
                set_status(&tx, trade_id, TradeStatus::Rejected)?;
                tx.commit()?;
                return Err(TradeError::OwnershipChanged);
            }

            let txn_ref = format!("trade:{trade_id}");
            ledger::transfer(
                &tx,
                trade.offered_artwork_id,
                trade.initiator_id,
                trade.recipient_id,
                Some(&txn_ref),
            )?;
            ledger::transfer(
                &tx,
                trade.requested_artwork_id,
                trade.recipient_id,
                trade.initiator_id,
                Some(&txn_ref),
            )?;

            set_status(&tx, trade_id, TradeStatus::Accepted)?;
            let canceled = cancel_conflicting(
                &tx,
                trade_id,
                trade.offered_artwork_id,
                trade.requested_artwork_id,
            )?;

            let settled = load_trade(&tx, trade_id)?.ok_or(TradeError::NotFound)?;
            tx.commit()?;

            if canceled > 0 {
                tracing::info!(
                    trade_id = %trade_id,
                    canceled_conflicts = canceled,
                    "trade settled; conflicting offers canceled"
                );
            }
            Ok(settled)
        })
    }

    /// Recipient turns down a pending offer.
    pub fn reject_trade(&self, trade_id: Uuid, actor: Uuid) -> Result<Trade, TradeError> {
        self.close_trade(trade_id, actor, TradeStatus::Rejected)
    }

    /// Initiator withdraws their own pending offer.
    pub fn cancel_trade(&self, trade_id: Uuid, actor: Uuid) -> Result<Trade, TradeError> {
        self.close_trade(trade_id, actor, TradeStatus::Canceled)
    }

    fn close_trade(
        &self,
        trade_id: Uuid,
        actor: Uuid,
        target: TradeStatus,
    ) -> Result<Trade, TradeError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let trade = load_trade(&tx, trade_id)?.ok_or(TradeError::NotFound)?;
            let authorized = match target {
                TradeStatus::Rejected => actor == trade.recipient_id,
                TradeStatus::Canceled => actor == trade.initiator_id,
                _ => false,
            };
            if !authorized {
                return Err(TradeError::NotAuthorized {
                    role: if target == TradeStatus::Rejected {
                        "recipient"
                    } else {
                        "initiator"
                    },
                    action: if target == TradeStatus::Rejected {
                        "reject"
                    } else {
                        "cancel"
                    },
                });
            }
            if trade.status != TradeStatus::Pending {
                return Err(TradeError::InvalidState {
                    status: trade.status,
                });
            }

            set_status(&tx, trade_id, target)?;
            let closed = load_trade(&tx, trade_id)?.ok_or(TradeError::NotFound)?;
            tx.commit()?;
            Ok(closed)
        })
    }

    /// A trade is visible only to its two parties.
    pub fn get_trade(&self, trade_id: Uuid, actor: Uuid) -> Result<Trade, TradeError> {
        self.with_conn(|conn| {
            let trade = load_trade(conn, trade_id)?.ok_or(TradeError::NotFound)?;
            if actor != trade.initiator_id && actor != trade.recipient_id {
                return Err(TradeError::NotAuthorized {
                    role: "participant",
                    action: "view",
                });
            }
            Ok(trade)
        })
    }

    /// Trades sent or received by a user, newest first, optionally filtered
    /// by status.
    pub fn list_trades(
        &self,
        user_id: Uuid,
        direction: TradeDirection,
        status: Option<TradeStatus>,
    ) -> Result<Vec<Trade>, TradeError> {
        self.with_conn(|conn| {
            let column = match direction {
                TradeDirection::Sent => "initiator_id",
                TradeDirection::Received => "recipient_id",
            };
            let sql = match status {
                Some(_) => format!(
                    "SELECT {} FROM trades WHERE {column} = ?1 AND status = ?2
                     ORDER BY created_at DESC",
                    TradeRow::COLUMNS
                ),
                None => format!(
                    "SELECT {} FROM trades WHERE {column} = ?1 ORDER BY created_at DESC",
                    TradeRow::COLUMNS
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = match status {
                Some(status) => stmt
                    .query_map(
                        params![user_id.to_string(), status.as_str()],
                        TradeRow::from_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map([user_id.to_string()], TradeRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            rows.into_iter()
                .map(|row| row.into_trade().map_err(TradeError::Db))
                .collect()
        })
    }
}

fn load_trade(conn: &Connection, trade_id: Uuid) -> Result<Option<Trade>, TradeError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM trades WHERE id = ?1", TradeRow::COLUMNS),
            [trade_id.to_string()],
            TradeRow::from_row,
        )
        .optional()?;
    row.map(|r| r.into_trade().map_err(TradeError::Db)).transpose()
}

fn set_status(conn: &Connection, trade_id: Uuid, status: TradeStatus) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE trades SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now_db_time(), trade_id.to_string()],
    )?;
    Ok(())
}

/// Duplicate check for proposals: an equivalent pending trade exists with the
/// same users and artworks, regardless of which side initiated.
fn pending_equivalent_exists(
    conn: &Connection,
    initiator: Uuid,
    recipient: Uuid,
    offered: Uuid,
    requested: Uuid,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM trades
         WHERE status = 'PENDING'
           AND ((initiator_id = ?1 AND recipient_id = ?2
                 AND offered_artwork_id = ?3 AND requested_artwork_id = ?4)
             OR (initiator_id = ?2 AND recipient_id = ?1
                 AND offered_artwork_id = ?4 AND requested_artwork_id = ?3))",
        params![
            initiator.to_string(),
            recipient.to_string(),
            offered.to_string(),
            requested.to_string(),
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// After a settlement, every other pending trade touching either artwork is
/// no longer satisfiable: cancel them all. Returns how many were canceled.
fn cancel_conflicting(
    conn: &Connection,
    settled_trade_id: Uuid,
    artwork_a: Uuid,
    artwork_b: Uuid,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE trades SET status = 'CANCELED', updated_at = ?1
         WHERE status = 'PENDING'
           AND id <> ?2
           AND (offered_artwork_id IN (?3, ?4) OR requested_artwork_id IN (?3, ?4))",
        params![
            now_db_time(),
            settled_trade_id.to_string(),
            artwork_a.to_string(),
            artwork_b.to_string(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::models::Rarity;

    struct Fixture {
        db: Database,
        alice: Uuid,
        bob: Uuid,
        art1: Uuid,
        art2: Uuid,
    }

    /// Alice owns art1, Bob owns art2, they mutually follow.
    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let art1 = Uuid::new_v4();
        let art2 = Uuid::new_v4();
        db.insert_user(alice, "alice", "member").unwrap();
        db.insert_user(bob, "bob", "member").unwrap();
        db.insert_artwork(art1, "Umber Study", Rarity::Common).unwrap();
        db.insert_artwork(art2, "Cobalt Field", Rarity::Rare).unwrap();
        db.insert_follow(alice, bob).unwrap();
        db.insert_follow(bob, alice).unwrap();
        db.grant(alice, art1, None).unwrap();
        db.grant(bob, art2, None).unwrap();
        Fixture {
            db,
            alice,
            bob,
            art1,
            art2,
        }
    }

    fn proposal(f: &Fixture) -> ProposeTrade {
        ProposeTrade {
            recipient_id: f.bob,
            offered_artwork_id: f.art1,
            requested_artwork_id: f.art2,
            message: Some("swap?".into()),
        }
    }

    #[test]
    fn propose_creates_pending_trade() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.initiator_id, f.alice);
        assert_eq!(trade.recipient_id, f.bob);
        assert_eq!(trade.message.as_deref(), Some("swap?"));
    }

    #[test]
    fn propose_rejects_self_trade() {
        let f = fixture();
        let err = f
            .db
            .propose_trade(
                f.alice,
                ProposeTrade {
                    recipient_id: f.alice,
                    offered_artwork_id: f.art1,
                    requested_artwork_id: f.art2,
                    message: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TradeError::SelfTrade));
    }

    #[test]
    fn propose_requires_mutual_follow() {
        let f = fixture();
        let carol = Uuid::new_v4();
        let art3 = Uuid::new_v4();
        f.db.insert_user(carol, "carol", "member").unwrap();
        f.db.insert_artwork(art3, "Verdigris", Rarity::Common).unwrap();
        f.db.grant(carol, art3, None).unwrap();
        // Carol follows Alice but not vice versa
        f.db.insert_follow(carol, f.alice).unwrap();

        let err = f
            .db
            .propose_trade(
                f.alice,
                ProposeTrade {
                    recipient_id: carol,
                    offered_artwork_id: f.art1,
                    requested_artwork_id: art3,
                    message: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TradeError::NotMutualFollow));
    }

    #[test]
    fn propose_requires_current_ownership_on_both_sides() {
        let f = fixture();
        let unowned = Uuid::new_v4();
        f.db.insert_artwork(unowned, "Blank", Rarity::Common).unwrap();

        let err = f
            .db
            .propose_trade(
                f.alice,
                ProposeTrade {
                    recipient_id: f.bob,
                    offered_artwork_id: unowned,
                    requested_artwork_id: f.art2,
                    message: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TradeError::NotOwned { .. }));

        let err = f
            .db
            .propose_trade(
                f.alice,
                ProposeTrade {
                    recipient_id: f.bob,
                    offered_artwork_id: f.art1,
                    requested_artwork_id: unowned,
                    message: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TradeError::NotOwned { .. }));
    }

    #[test]
    fn duplicate_pending_trade_rejected_in_either_orientation() {
        let f = fixture();
        f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        // Same orientation
        let err = f.db.propose_trade(f.alice, proposal(&f)).unwrap_err();
        assert!(matches!(err, TradeError::DuplicateTrade));

        // Mirrored: Bob offers art2 for art1
        let err = f
            .db
            .propose_trade(
                f.bob,
                ProposeTrade {
                    recipient_id: f.alice,
                    offered_artwork_id: f.art2,
                    requested_artwork_id: f.art1,
                    message: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TradeError::DuplicateTrade));
    }

    #[test]
    fn accept_swaps_ownership_and_settles() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        let settled = f.db.accept_trade(trade.id, f.bob).unwrap();
        assert_eq!(settled.status, TradeStatus::Accepted);
        assert!(settled.updated_at.is_some());

        assert_eq!(f.db.owner_of(f.art1).unwrap(), Some(f.bob));
        assert_eq!(f.db.owner_of(f.art2).unwrap(), Some(f.alice));
    }

    #[test]
    fn accept_requires_recipient() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        let err = f.db.accept_trade(trade.id, f.alice).unwrap_err();
        assert!(matches!(err, TradeError::NotAuthorized { .. }));
        // Nothing moved
        assert_eq!(f.db.owner_of(f.art1).unwrap(), Some(f.alice));
    }

    #[test]
    fn double_accept_fails_with_invalid_state() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();
        f.db.accept_trade(trade.id, f.bob).unwrap();

        let err = f.db.accept_trade(trade.id, f.bob).unwrap_err();
        assert!(matches!(
            err,
            TradeError::InvalidState {
                status: TradeStatus::Accepted
            }
        ));
        // Ownership unchanged by the failed second accept
        assert_eq!(f.db.owner_of(f.art1).unwrap(), Some(f.bob));
        assert_eq!(f.db.owner_of(f.art2).unwrap(), Some(f.alice));
    }

    #[test]
    fn accept_auto_rejects_when_ownership_drifted() {
        let f = fixture();
        let carol = Uuid::new_v4();
        f.db.insert_user(carol, "carol", "member").unwrap();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        // Alice's offered artwork changes hands before Bob accepts.
        f.db.transfer(f.art1, f.alice, carol, None).unwrap();

        let err = f.db.accept_trade(trade.id, f.bob).unwrap_err();
        assert!(matches!(err, TradeError::OwnershipChanged));

        // Auto-reject, not cancel, and it is committed.
        let reloaded = f.db.get_trade(trade.id, f.bob).unwrap();
        assert_eq!(reloaded.status, TradeStatus::Rejected);
        // No partial swap
        assert_eq!(f.db.owner_of(f.art1).unwrap(), Some(carol));
        assert_eq!(f.db.owner_of(f.art2).unwrap(), Some(f.bob));
    }

    #[test]
    fn accept_cancels_conflicting_pending_trades() {
        let f = fixture();
        let carol = Uuid::new_v4();
        let art3 = Uuid::new_v4();
        f.db.insert_user(carol, "carol", "member").unwrap();
        f.db.insert_artwork(art3, "Ochre Gate", Rarity::Uncommon).unwrap();
        f.db.grant(carol, art3, None).unwrap();
        f.db.insert_follow(carol, f.bob).unwrap();
        f.db.insert_follow(f.bob, carol).unwrap();

        // T1: Alice offers art1 for Bob's art2.
        let t1 = f.db.propose_trade(f.alice, proposal(&f)).unwrap();
        // T2: Carol offers art3 for Bob's art2 — touches the same artwork.
        let t2 = f
            .db
            .propose_trade(
                carol,
                ProposeTrade {
                    recipient_id: f.bob,
                    offered_artwork_id: art3,
                    requested_artwork_id: f.art2,
                    message: None,
                },
            )
            .unwrap();

        f.db.accept_trade(t1.id, f.bob).unwrap();

        let t2_after = f.db.get_trade(t2.id, carol).unwrap();
        assert_eq!(t2_after.status, TradeStatus::Canceled);

        // The canceled trade can no longer be accepted.
        let err = f.db.accept_trade(t2.id, f.bob).unwrap_err();
        assert!(matches!(err, TradeError::InvalidState { .. }));
    }

    #[test]
    fn reject_and_cancel_are_guarded() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        // Wrong actors
        assert!(matches!(
            f.db.reject_trade(trade.id, f.alice).unwrap_err(),
            TradeError::NotAuthorized { .. }
        ));
        assert!(matches!(
            f.db.cancel_trade(trade.id, f.bob).unwrap_err(),
            TradeError::NotAuthorized { .. }
        ));

        // Recipient rejects
        let rejected = f.db.reject_trade(trade.id, f.bob).unwrap();
        assert_eq!(rejected.status, TradeStatus::Rejected);

        // Terminal: neither cancel nor accept can follow
        assert!(matches!(
            f.db.cancel_trade(trade.id, f.alice).unwrap_err(),
            TradeError::InvalidState { .. }
        ));
        assert!(matches!(
            f.db.accept_trade(trade.id, f.bob).unwrap_err(),
            TradeError::InvalidState { .. }
        ));
    }

    #[test]
    fn cancel_by_initiator() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();
        let canceled = f.db.cancel_trade(trade.id, f.alice).unwrap();
        assert_eq!(canceled.status, TradeStatus::Canceled);
    }

    #[test]
    fn list_trades_filters_by_direction_and_status() {
        let f = fixture();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        let sent = f
            .db
            .list_trades(f.alice, TradeDirection::Sent, None)
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, trade.id);

        let received = f
            .db
            .list_trades(f.bob, TradeDirection::Received, Some(TradeStatus::Pending))
            .unwrap();
        assert_eq!(received.len(), 1);

        assert!(f
            .db
            .list_trades(f.bob, TradeDirection::Sent, None)
            .unwrap()
            .is_empty());

        f.db.reject_trade(trade.id, f.bob).unwrap();
        assert!(f
            .db
            .list_trades(f.bob, TradeDirection::Received, Some(TradeStatus::Pending))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn get_trade_visible_only_to_parties() {
        let f = fixture();
        let carol = Uuid::new_v4();
        f.db.insert_user(carol, "carol", "member").unwrap();
        let trade = f.db.propose_trade(f.alice, proposal(&f)).unwrap();

        assert!(f.db.get_trade(trade.id, f.alice).is_ok());
        assert!(f.db.get_trade(trade.id, f.bob).is_ok());
        assert!(matches!(
            f.db.get_trade(trade.id, carol).unwrap_err(),
            TradeError::NotAuthorized { .. }
        ));
        assert!(matches!(
            f.db.get_trade(Uuid::new_v4(), f.alice).unwrap_err(),
            TradeError::NotFound
        ));
    }
}
