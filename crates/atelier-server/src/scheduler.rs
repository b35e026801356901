//! Background issuance loops. The primary run fires at 00:00 UTC, the
//! recovery pass at 12:00 UTC. Both are idempotent per (user, UTC day), so
//! a restart that replays a run is harmless; a failed run is logged and
//! retried at the next tick.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use atelier_api::AppState;

const RECOVERY_HOUR: u32 = 12;

pub fn spawn(state: AppState) {
    tokio::spawn(issuance_loop(state.clone(), 0, "daily"));
    tokio::spawn(issuance_loop(state, RECOVERY_HOUR, "recovery"));
}

async fn issuance_loop(state: AppState, hour_utc: u32, pass: &'static str) {
    loop {
        tokio::time::sleep(until_next_utc_hour(hour_utc)).await;

        let s = state.clone();
        let result = tokio::task::spawn_blocking(move || {
            if pass == "daily" {
                s.db.run_daily_issuance(s.issuance_batch)
            } else {
                s.db.run_recovery_issuance(s.issuance_batch)
            }
        })
        .await;

        match result {
            Ok(Ok(report)) => {
                info!(
                    pass,
                    issued = report.issued,
                    skipped = report.skipped,
                    "scheduled issuance finished"
                );
            }
            Ok(Err(e)) => error!(pass, "scheduled issuance failed: {e}"),
            Err(e) => error!(pass, "issuance task panicked: {e}"),
        }
    }
}

/// Time until the next occurrence of `hour:00:00` UTC, never zero so a loop
/// that wakes exactly on the boundary does not double-fire.
fn until_next_utc_hour(hour: u32) -> Duration {
    let now = Utc::now();
    let today_at = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    let next = if today_at > now {
        today_at
    } else {
        today_at + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(1)).max(Duration::from_secs(1))
}
