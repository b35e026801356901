mod scheduler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use atelier_api::middleware::{require_admin, require_auth};
use atelier_api::{AppState, AppStateInner, admin, packs, trades};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("ATELIER_DB_PATH").unwrap_or_else(|_| "atelier.db".into());
    let host = std::env::var("ATELIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ATELIER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let issuance_batch: usize = std::env::var("ATELIER_ISSUANCE_BATCH")
        .unwrap_or_else(|_| "100".into())
        .parse()?;

    // Init database
    let db = atelier_db::Database::open(&PathBuf::from(&db_path))?;
    db.ensure_daily_pack_type()?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner { db, issuance_batch });

    // Background issuance: primary run at midnight UTC, recovery at midday.
    scheduler::spawn(state.clone());

    // Routes
    let trade_routes = Router::new()
        .route("/trades", post(trades::propose))
        .route("/trades/sent", get(trades::list_sent))
        .route("/trades/received", get(trades::list_received))
        .route("/trades/{trade_id}", get(trades::get))
        .route("/trades/{trade_id}/accept", post(trades::accept))
        .route("/trades/{trade_id}/reject", post(trades::reject))
        .route("/trades/{trade_id}/cancel", post(trades::cancel));

    let pack_routes = Router::new()
        .route("/user-packs", get(packs::list_unopened))
        .route("/user-packs/{user_pack_id}/open", post(packs::open))
        .route("/packs/daily/claim", post(packs::claim_daily))
        .route("/packs/daily/next", get(packs::next_daily));

    let protected_routes = Router::new()
        .merge(trade_routes)
        .merge(pack_routes)
        .layer(middleware::from_fn(require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/issuance/run", post(admin::run_issuance))
        .route("/admin/issuance/recover", post(admin::run_recovery))
        .route("/admin/issuance/users/{user_id}", post(admin::issue_for_user))
        .route("/admin/issuance/stats", get(admin::stats))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn(require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Atelier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
