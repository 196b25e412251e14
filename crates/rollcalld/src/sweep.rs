//! Periodic reconciliation of sessions that ended without an explicit close.

use rollcall_engine::Rollcall;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub async fn run(rollcall: Arc<Rollcall>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let engine = rollcall.clone();
        // SQLite calls block; keep them off the runtime workers.
        match tokio::task::spawn_blocking(move || engine.absentees.reconcile_due()).await {
            Ok(Ok(reports)) if reports.is_empty() => tracing::debug!("sweep: nothing due"),
            Ok(Ok(reports)) => {
                let absences: usize = reports.iter().map(|r| r.absences_created.len()).sum();
                tracing::info!(sessions = reports.len(), absences, "sweep reconciled sessions");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "sweep failed"),
            Err(e) => tracing::error!(error = %e, "sweep task panicked"),
        }
    }
}
