//! Background job: refresh access tokens before they expire.
//!
//! Each cycle lists every installation and refreshes those expiring within
//! the sweep horizon, a few at a time. Failures are logged and counted; they
//! never stop the loop. Refreshes go through the token manager, so a sweep
//! racing a request for the same installation still makes one upstream call.

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::installation::Installation;
use crate::oauth::TokenManager;

pub const DEFAULT_SWEEP_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub refreshed: usize,
    /// No refresh token stored; these need a reinstall, not a refresh.
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Fresh,
    Refreshed,
    Skipped,
    Failed,
}

/// Spawn the sweeper. The first cycle runs immediately.
pub fn spawn(
    tokens: TokenManager,
    interval: Duration,
    horizon: chrono::Duration,
    concurrency: usize,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = sweep_once(&tokens, horizon, concurrency).await;
            if report.refreshed > 0 || report.failed > 0 {
                tracing::info!(
                    checked = report.checked,
                    refreshed = report.refreshed,
                    skipped = report.skipped,
                    failed = report.failed,
                    "token sweep finished"
                );
            } else {
                tracing::debug!(checked = report.checked, "token sweep found nothing to refresh");
            }
        }
        tracing::info!("token sweeper stopped");
    })
}

/// Run one sweep cycle.
pub async fn sweep_once(
    tokens: &TokenManager,
    horizon: chrono::Duration,
    concurrency: usize,
) -> SweepReport {
    let installations = match tokens.store().list().await {
        Ok(list) => list,
        Err(e) => {
            tracing::error!("token sweep could not list installations: {}", e);
            return SweepReport::default();
        }
    };

    let outcomes: Vec<Outcome> = stream::iter(installations)
        .map(|inst| sweep_one(tokens, inst, horizon))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    outcomes
        .into_iter()
        .fold(SweepReport::default(), |mut report, outcome| {
            report.checked += 1;
            match outcome {
                Outcome::Fresh => {}
                Outcome::Refreshed => report.refreshed += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
            report
        })
}

async fn sweep_one(tokens: &TokenManager, inst: Installation, horizon: chrono::Duration) -> Outcome {
    if inst.refresh_token.is_none() {
        return Outcome::Skipped;
    }
    if !inst.needs_refresh_within(horizon, Utc::now()) {
        return Outcome::Fresh;
    }

    match tokens.ensure_fresh_within(&inst.id, horizon).await {
        Ok(_) => Outcome::Refreshed,
        Err(e) => {
            tracing::warn!(installation_id = %inst.id, "scheduled refresh failed: {}", e);
            Outcome::Failed
        }
    }
}
