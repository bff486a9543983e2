//! Periodic cleanup: expired connect codes, overdue install sessions (and
//! their PENDING apps), and dead key-value entries.

use std::time::Duration;

use crate::AppState;

pub fn spawn_cleanup(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.cleanup_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let db = state.db.clone();
            let kv = state.kv.clone();
            let pass = tokio::task::spawn_blocking(move || {
                let stats = gatehouse_auth::pairing::cleanup(&db)?;
                let swept = kv.sweep_expired()?;
                Ok::<_, anyhow::Error>((stats, swept))
            })
            .await;

            match pass {
                Ok(Ok((stats, swept))) => {
                    if stats.purged_codes > 0 || stats.expired_sessions > 0 || swept > 0 {
                        tracing::debug!(
                            purged_codes = stats.purged_codes,
                            expired_sessions = stats.expired_sessions,
                            swept_kv = swept,
                            "cleanup pass"
                        );
                    }
                }
                Ok(Err(error)) => tracing::warn!(%error, "cleanup pass failed"),
                Err(error) => tracing::warn!(%error, "cleanup task panicked"),
            }
        }
    })
}
