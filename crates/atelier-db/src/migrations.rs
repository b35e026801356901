use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            role        TEXT NOT NULL DEFAULT 'member',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_follows (
            follower_id TEXT NOT NULL REFERENCES users(id),
            followed_id TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (follower_id, followed_id)
        );

        CREATE TABLE IF NOT EXISTS artworks (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            rarity      TEXT NOT NULL CHECK (rarity IN
                            ('common','uncommon','rare','epic','legendary')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_artworks_rarity
            ON artworks(rarity);

        -- The ownership ledger. artwork_id as primary key makes single
        -- ownership a schema invariant: a second owner is unrepresentable.
        CREATE TABLE IF NOT EXISTS collections (
            artwork_id      TEXT PRIMARY KEY REFERENCES artworks(id),
            owner_id        TEXT NOT NULL REFERENCES users(id),
            acquired_at     TEXT NOT NULL,
            transaction_ref TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_collections_owner
            ON collections(owner_id);

        CREATE TABLE IF NOT EXISTS trades (
            id                   TEXT PRIMARY KEY,
            initiator_id         TEXT NOT NULL REFERENCES users(id),
            recipient_id         TEXT NOT NULL REFERENCES users(id),
            offered_artwork_id   TEXT NOT NULL REFERENCES artworks(id),
            requested_artwork_id TEXT NOT NULL REFERENCES artworks(id),
            message              TEXT,
            status               TEXT NOT NULL CHECK (status IN
                                     ('PENDING','ACCEPTED','REJECTED','CANCELED')),
            created_at           TEXT NOT NULL,
            updated_at           TEXT,
            CHECK (initiator_id <> recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_trades_initiator
            ON trades(initiator_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_trades_recipient
            ON trades(recipient_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_trades_status
            ON trades(status);

        CREATE TABLE IF NOT EXISTS pack_types (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            recipe      TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_packs (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id),
            pack_type_id TEXT NOT NULL REFERENCES pack_types(id),
            acquired_at  TEXT NOT NULL,
            opened_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_user_packs_user
            ON user_packs(user_id, pack_type_id, acquired_at);
        -- Quick lookup of unopened packs for a user
        CREATE INDEX IF NOT EXISTS idx_user_packs_user_opened
            ON user_packs(user_id, opened_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
