pub mod admin;
pub mod error;
pub mod middleware;
pub mod packs;
pub mod trades;

use std::sync::Arc;

use atelier_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    /// Users per issuance batch transaction.
    pub issuance_batch: usize,
}
