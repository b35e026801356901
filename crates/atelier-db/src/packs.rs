//! Pack recipes and unboxing. Opening a pack resolves its recipe into
//! concrete unowned artworks and grants them through the ledger, then stamps
//! `opened_at`, all in one transaction: a pack is consumed exactly once, and
//! a pack that yields nothing is left unopened for a later retry.

use rand::Rng;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use atelier_types::models::{PackType, Rarity, UserPack};
use atelier_types::recipe::{Recipe, RecipeEntry};

use crate::Database;
use crate::error::PackError;
use crate::ledger;
use crate::models::{PackTypeRow, UserPackRow, now_db_time, parse_db_id, parse_db_time};

/// One artwork picked by the resolver.
#[derive(Debug, Clone)]
pub struct ResolvedArtwork {
    pub artwork_id: Uuid,
    pub title: String,
    pub rarity: Rarity,
}

/// Outcome of resolving a recipe: the concrete picks, plus how many items
/// the recipe asked for that the catalog could not supply.
#[derive(Debug)]
pub struct Resolution {
    pub artworks: Vec<ResolvedArtwork>,
    pub shortfall: u32,
}

/// An unopened pack with its type name, for listing.
#[derive(Debug)]
pub struct UnopenedPack {
    pub pack: UserPack,
    pub pack_type_name: String,
}

impl Database {
    pub fn create_pack_type(
        &self,
        name: &str,
        description: Option<&str>,
        recipe: &Recipe,
    ) -> Result<PackType, PackError> {
        recipe.validate()?;
        let id = Uuid::new_v4();
        let recipe_json = recipe.to_json()?;
        let now = now_db_time();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pack_types (id, name, description, recipe, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), name, description, recipe_json, now],
            )?;
            Ok(())
        })
        .map_err(PackError::Db)?;
        Ok(PackType {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            recipe: recipe.clone(),
            created_at: parse_db_time(&now).map_err(PackError::Db)?,
        })
    }

    pub fn pack_type_by_name(&self, name: &str) -> Result<Option<PackType>, PackError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM pack_types WHERE name = ?1",
                        PackTypeRow::COLUMNS
                    ),
                    [name],
                    PackTypeRow::from_row,
                )
                .optional()
                .map_err(PackError::Db)?;
            row.map(pack_type_from_row).transpose()
        })
    }

    /// Hand a user an unopened pack instance of the given type.
    pub fn grant_pack(&self, user_id: Uuid, pack_type_id: Uuid) -> Result<UserPack, PackError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let pack = insert_user_pack(&tx, user_id, pack_type_id)?;
            tx.commit().map_err(PackError::Db)?;
            Ok(pack)
        })
    }

    /// Open a pack: resolve its recipe against the owner's current
    /// collection and grant every pick. All-or-nothing; on
    /// `NoEligibleArtworks` the pack stays unopened and nothing is granted.
    pub fn open_pack(
        &self,
        user_pack_id: Uuid,
        actor: Uuid,
    ) -> Result<(Vec<ResolvedArtwork>, u32), PackError> {
        self.open_pack_with_rng(user_pack_id, actor, &mut rand::rng())
    }

    pub fn open_pack_with_rng<R: Rng>(
        &self,
        user_pack_id: Uuid,
        actor: Uuid,
        rng: &mut R,
    ) -> Result<(Vec<ResolvedArtwork>, u32), PackError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let pack = load_user_pack(&tx, user_pack_id)?.ok_or(PackError::NotFound)?;
            if pack.user_id != actor {
                return Err(PackError::NotOwner);
            }
            if pack.opened_at.is_some() {
                return Err(PackError::AlreadyOpened);
            }

            let row = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM pack_types WHERE id = ?1",
                        PackTypeRow::COLUMNS
                    ),
                    [pack.pack_type_id.to_string()],
                    PackTypeRow::from_row,
                )
                .optional()
                .map_err(PackError::Db)?
                .ok_or(PackError::NotFound)?;
            let recipe = Recipe::parse(&row.recipe)?;

            let resolution = resolve_recipe(&tx, &recipe, rng)?;
            if resolution.artworks.is_empty() {
                // Dropping the transaction rolls back; the pack remains
                // unopened so a retry can succeed once more artworks exist.
                return Err(PackError::NoEligibleArtworks);
            }

            let txn_ref = format!("pack:{user_pack_id}");
            for art in &resolution.artworks {
                ledger::grant(&tx, actor, art.artwork_id, Some(&txn_ref))?;
            }
            tx.execute(
                "UPDATE user_packs SET opened_at = ?1 WHERE id = ?2",
                params![now_db_time(), user_pack_id.to_string()],
            )
            .map_err(PackError::Db)?;

            tx.commit().map_err(PackError::Db)?;

            if resolution.shortfall > 0 {
                tracing::warn!(
                    user_pack_id = %user_pack_id,
                    shortfall = resolution.shortfall,
                    "pack opened with fewer artworks than its recipe promised"
                );
            }
            Ok((resolution.artworks, resolution.shortfall))
        })
    }

    pub fn list_unopened_packs(&self, user_id: Uuid) -> Result<Vec<UnopenedPack>, PackError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT p.id, p.user_id, p.pack_type_id, p.acquired_at, p.opened_at, t.name
                     FROM user_packs p
                     JOIN pack_types t ON p.pack_type_id = t.id
                     WHERE p.user_id = ?1 AND p.opened_at IS NULL
                     ORDER BY p.acquired_at DESC",
                )
                .map_err(PackError::Db)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    let pack_row = UserPackRow::from_row(row)?;
                    let name: String = row.get(5)?;
                    Ok((pack_row, name))
                })
                .map_err(PackError::Db)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(PackError::Db)?;
            rows.into_iter()
                .map(|(pack_row, pack_type_name)| {
                    Ok(UnopenedPack {
                        pack: pack_row.into_user_pack().map_err(PackError::Db)?,
                        pack_type_name,
                    })
                })
                .collect()
        })
    }
}

/// Select concrete artworks for a recipe: per tier, draw the desired count
/// uniformly at random from artworks of that rarity with no ledger entry. A
/// `Chance` tier gets a single weighted coin-flip for one bonus item. Tiers
/// that come up short contribute what they have; the deficit is reported as
/// `shortfall` rather than failing the whole resolution.
pub fn resolve_recipe<R: Rng>(
    conn: &Connection,
    recipe: &Recipe,
    rng: &mut R,
) -> Result<Resolution, PackError> {
    let mut artworks = Vec::new();
    let mut shortfall = 0u32;

    for (rarity, entry) in recipe.iter() {
        let desired = match entry {
            RecipeEntry::Fixed { count } => *count,
            RecipeEntry::Chance { chance } => {
                if rng.random_bool(*chance) {
                    1
                } else {
                    0
                }
            }
        };
        if desired == 0 {
            continue;
        }

        let picks = unowned_of_rarity(conn, *rarity, desired)?;
        shortfall += desired - picks.len() as u32;
        artworks.extend(picks);
    }

    Ok(Resolution {
        artworks,
        shortfall,
    })
}

fn unowned_of_rarity(
    conn: &Connection,
    rarity: Rarity,
    limit: u32,
) -> Result<Vec<ResolvedArtwork>, PackError> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.title, a.rarity FROM artworks a
             WHERE a.rarity = ?1
               AND a.id NOT IN (SELECT artwork_id FROM collections)
             ORDER BY RANDOM()
             LIMIT ?2",
        )
        .map_err(PackError::Db)?;
    let rows = stmt
        .query_map(params![rarity.as_str(), limit], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let rarity_str: String = row.get(2)?;
            let rarity = rarity_str.parse::<Rarity>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
            })?;
            Ok(ResolvedArtwork {
                artwork_id: parse_db_id(&id)?,
                title,
                rarity,
            })
        })
        .map_err(PackError::Db)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(PackError::Db)?;
    Ok(rows)
}

pub(crate) fn load_user_pack(
    conn: &Connection,
    user_pack_id: Uuid,
) -> Result<Option<UserPack>, PackError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM user_packs WHERE id = ?1",
                UserPackRow::COLUMNS
            ),
            [user_pack_id.to_string()],
            UserPackRow::from_row,
        )
        .optional()
        .map_err(PackError::Db)?;
    row.map(|r| r.into_user_pack().map_err(PackError::Db))
        .transpose()
}

pub(crate) fn insert_user_pack(
    conn: &Connection,
    user_id: Uuid,
    pack_type_id: Uuid,
) -> Result<UserPack, PackError> {
    let id = Uuid::new_v4();
    let now = now_db_time();
    conn.execute(
        "INSERT INTO user_packs (id, user_id, pack_type_id, acquired_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id.to_string(),
            user_id.to_string(),
            pack_type_id.to_string(),
            now,
        ],
    )
    .map_err(PackError::Db)?;
    Ok(UserPack {
        id,
        user_id,
        pack_type_id,
        acquired_at: parse_db_time(&now).map_err(PackError::Db)?,
        opened_at: None,
    })
}

fn pack_type_from_row(row: PackTypeRow) -> Result<PackType, PackError> {
    let recipe = Recipe::parse(&row.recipe)?;
    Ok(PackType {
        id: parse_db_id(&row.id).map_err(PackError::Db)?,
        name: row.name,
        description: row.description,
        recipe,
        created_at: parse_db_time(&row.created_at).map_err(PackError::Db)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn db_with_user() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        db.insert_user(user, "collector", "member").unwrap();
        (db, user)
    }

    fn seed_artworks(db: &Database, rarity: Rarity, n: usize) -> Vec<Uuid> {
        (0..n)
            .map(|i| {
                let id = Uuid::new_v4();
                db.insert_artwork(id, &format!("{rarity} #{i}"), rarity)
                    .unwrap();
                id
            })
            .collect()
    }

    fn fixed(count: u32) -> RecipeEntry {
        RecipeEntry::Fixed { count }
    }

    #[test]
    fn resolver_fills_fixed_counts_from_unowned_artworks() {
        let (db, _user) = db_with_user();
        seed_artworks(&db, Rarity::Common, 5);
        seed_artworks(&db, Rarity::Uncommon, 2);

        let recipe = Recipe::new([
            (Rarity::Common, fixed(3)),
            (Rarity::Uncommon, fixed(1)),
        ]);
        let resolution = db
            .with_conn(|conn| resolve_recipe(conn, &recipe, &mut StdRng::seed_from_u64(7)))
            .unwrap();
        assert_eq!(resolution.artworks.len(), 4);
        assert_eq!(resolution.shortfall, 0);

        // No duplicate picks within one resolution
        let mut ids: Vec<_> = resolution.artworks.iter().map(|a| a.artwork_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn resolver_excludes_owned_artworks_and_reports_shortfall() {
        let (db, user) = db_with_user();
        let commons = seed_artworks(&db, Rarity::Common, 4);
        // User already owns all but one common
        for id in &commons[..3] {
            db.grant(user, *id, None).unwrap();
        }

        let recipe = Recipe::new([(Rarity::Common, fixed(3))]);
        let resolution = db
            .with_conn(|conn| resolve_recipe(conn, &recipe, &mut StdRng::seed_from_u64(7)))
            .unwrap();
        assert_eq!(resolution.artworks.len(), 1);
        assert_eq!(resolution.artworks[0].artwork_id, commons[3]);
        assert_eq!(resolution.shortfall, 2);
    }

    #[test]
    fn chance_entry_is_a_single_weighted_flip() {
        let (db, _user) = db_with_user();
        seed_artworks(&db, Rarity::Rare, 3);
        let recipe = Recipe::new([(
            Rarity::Rare,
            RecipeEntry::Chance { chance: 0.5 },
        )]);

        // Across many seeded draws the flip must yield both outcomes, and
        // never more than one item.
        let mut saw_zero = false;
        let mut saw_one = false;
        for seed in 0..64 {
            let resolution = db
                .with_conn(|conn| {
                    resolve_recipe(conn, &recipe, &mut StdRng::seed_from_u64(seed))
                })
                .unwrap();
            match resolution.artworks.len() {
                0 => saw_zero = true,
                1 => saw_one = true,
                n => panic!("chance tier yielded {n} items"),
            }
        }
        assert!(saw_zero && saw_one);
    }

    #[test]
    fn open_pack_grants_and_consumes_once() {
        let (db, user) = db_with_user();
        seed_artworks(&db, Rarity::Common, 5);
        let recipe = Recipe::new([(Rarity::Common, fixed(2))]);
        let pack_type = db.create_pack_type("Starter", None, &recipe).unwrap();
        let pack = db.grant_pack(user, pack_type.id).unwrap();

        let (granted, shortfall) = db.open_pack(pack.id, user).unwrap();
        assert_eq!(granted.len(), 2);
        assert_eq!(shortfall, 0);
        for art in &granted {
            assert!(db.owns(user, art.artwork_id).unwrap());
        }

        // Second open fails and changes nothing.
        let owned_before = db.owned_artwork_ids(user).unwrap();
        let err = db.open_pack(pack.id, user).unwrap_err();
        assert!(matches!(err, PackError::AlreadyOpened));
        assert_eq!(db.owned_artwork_ids(user).unwrap(), owned_before);
    }

    #[test]
    fn open_pack_checks_existence_and_ownership() {
        let (db, user) = db_with_user();
        let stranger = Uuid::new_v4();
        db.insert_user(stranger, "stranger", "member").unwrap();
        seed_artworks(&db, Rarity::Common, 1);
        let recipe = Recipe::new([(Rarity::Common, fixed(1))]);
        let pack_type = db.create_pack_type("Starter", None, &recipe).unwrap();
        let pack = db.grant_pack(user, pack_type.id).unwrap();

        assert!(matches!(
            db.open_pack(Uuid::new_v4(), user).unwrap_err(),
            PackError::NotFound
        ));
        assert!(matches!(
            db.open_pack(pack.id, stranger).unwrap_err(),
            PackError::NotOwner
        ));
    }

    #[test]
    fn empty_resolution_leaves_pack_unopened() {
        let (db, user) = db_with_user();
        // Catalog has artworks, but the user owns them all.
        let commons = seed_artworks(&db, Rarity::Common, 2);
        for id in &commons {
            db.grant(user, *id, None).unwrap();
        }
        let recipe = Recipe::new([(Rarity::Common, fixed(3))]);
        let pack_type = db.create_pack_type("Starter", None, &recipe).unwrap();
        let pack = db.grant_pack(user, pack_type.id).unwrap();

        let err = db.open_pack(pack.id, user).unwrap_err();
        assert!(matches!(err, PackError::NoEligibleArtworks));

        // Pack is retryable: still listed as unopened.
        let unopened = db.list_unopened_packs(user).unwrap();
        assert_eq!(unopened.len(), 1);
        assert_eq!(unopened[0].pack.id, pack.id);

        // Once a new artwork appears, the retry succeeds.
        seed_artworks(&db, Rarity::Common, 1);
        let (granted, shortfall) = db.open_pack(pack.id, user).unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(shortfall, 2);
        assert!(db.list_unopened_packs(user).unwrap().is_empty());
    }

    #[test]
    fn resolver_never_picks_artworks_owned_by_anyone() {
        let (db, user) = db_with_user();
        let rival = Uuid::new_v4();
        db.insert_user(rival, "rival", "member").unwrap();
        let commons = seed_artworks(&db, Rarity::Common, 3);
        // A different user owns two of them: still ineligible, ownership is
        // exclusive across the whole ledger.
        db.grant(rival, commons[0], None).unwrap();
        db.grant(rival, commons[1], None).unwrap();

        let recipe = Recipe::new([(Rarity::Common, fixed(3))]);
        let pack_type = db.create_pack_type("Starter", None, &recipe).unwrap();
        let pack = db.grant_pack(user, pack_type.id).unwrap();

        let (granted, shortfall) = db.open_pack(pack.id, user).unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].artwork_id, commons[2]);
        assert_eq!(shortfall, 2);
        // Rival's ownership is untouched.
        assert!(db.owns(rival, commons[0]).unwrap());
    }
}
