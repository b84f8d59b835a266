//! Expiry sweep for opportunities past their deadline.
//!
//! One sweep marks overdue pending/approved opportunities `expired`,
//! ends ads whose window closed, deletes expired opportunities older than
//! the retention window and purges expired sessions. It runs on an interval and on demand through
//! `POST /functions/expire-opportunities`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::errors::AppError;
use crate::models::format_timestamp;
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub expired: usize,
    pub ads_ended: usize,
    pub deleted: usize,
    pub sessions_purged: u64,
}

/// Run one expiry sweep as of `now`.
pub async fn run_expiry_sweep(state: &AppState, now: DateTime<Utc>) -> Result<SweepResult, AppError> {
    let now_ts = format_timestamp(now);
    let cutoff = chrono::TimeDelta::try_days(state.config.expired_retention_days)
        .and_then(|retention| now.checked_sub_signed(retention))
        .map(format_timestamp)
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Retention of {} days is out of range",
                state.config.expired_retention_days
            ))
        })?;

    let expired = state.repo.expire_due_opportunities(&now_ts).await?;
    for opportunity in &expired {
        state.feed.publish(ChangeEvent::update(
            Table::Opportunities,
            opportunity,
            Some(&opportunity.created_by),
        ));
        if let Err(e) = state.search.index_opportunity(opportunity).await {
            tracing::warn!("Failed to re-index expired opportunity {}: {}", opportunity.id, e);
        }
    }

    let ads_ended = state.repo.end_elapsed_ads(&now_ts).await?;
    for ad in &ads_ended {
        state
            .feed
            .publish(ChangeEvent::update(Table::Ads, ad, Some(&ad.advertiser_id)));
    }

    let deleted = state.repo.delete_expired_before(&cutoff).await?;
    for opportunity in &deleted {
        state.feed.publish(ChangeEvent::delete(
            Table::Opportunities,
            opportunity,
            Some(&opportunity.created_by),
        ));
    }
    let deleted_ids: Vec<&str> = deleted.iter().map(|o| o.id.as_str()).collect();
    if let Err(e) = state.search.remove_opportunities(&deleted_ids).await {
        tracing::warn!("Failed to remove deleted opportunities from index: {}", e);
    }

    let sessions_purged = state.repo.purge_expired_sessions(&now_ts).await?;

    let result = SweepResult {
        expired: expired.len(),
        ads_ended: ads_ended.len(),
        deleted: deleted.len(),
        sessions_purged,
    };
    if result.expired > 0 || result.ads_ended > 0 || result.deleted > 0 {
        tracing::info!(
            expired = result.expired,
            ads_ended = result.ads_ended,
            deleted = result.deleted,
            sessions_purged = result.sessions_purged,
            "Expiry sweep finished"
        );
    }
    Ok(result)
}

/// Run the sweep every `period` until shutdown is signalled.
pub fn spawn_scheduler(
    state: AppState,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Expiry sweep scheduled every {:?}", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = run_expiry_sweep(&state, Utc::now()).await {
                        tracing::error!("Expiry sweep failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Expiry scheduler stopped");
                    break;
                }
            }
        }
    })
}
