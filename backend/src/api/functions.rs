//! Service-key function endpoints: expiry sweep and bulk email senders.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

use super::{success, ApiResponse, ApiResult};
use crate::email::{BulkSender, Mailer};
use crate::errors::AppError;
use crate::expiry::{run_expiry_sweep, SweepResult};
use crate::models::{BulkEmailRequest, CampaignStatus};
use crate::AppState;

/// Answer of a campaign started in the background.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStarted {
    pub campaign_id: String,
    pub status: CampaignStatus,
    pub total: i64,
}

/// POST /functions/expire-opportunities - Run one expiry sweep now.
pub async fn expire_opportunities(
    State(state): State<AppState>,
) -> ApiResult<SweepResult> {
    success(run_expiry_sweep(&state, Utc::now()).await?)
}

/// POST /functions/send-bulk-email - Bulk send through the Gmail transport.
pub async fn send_bulk_email(
    State(state): State<AppState>,
    Json(request): Json<BulkEmailRequest>,
) -> Result<Response, AppError> {
    let mailer = state.mailers.gmail.clone();
    run_campaign(&state, mailer, request).await
}

/// POST /functions/send-smtp-email - Bulk send through the SMTP-relay transport.
pub async fn send_smtp_email(
    State(state): State<AppState>,
    Json(request): Json<BulkEmailRequest>,
) -> Result<Response, AppError> {
    let mailer = state.mailers.relay.clone();
    run_campaign(&state, mailer, request).await
}

async fn run_campaign(
    state: &AppState,
    mailer: Arc<dyn Mailer>,
    request: BulkEmailRequest,
) -> Result<Response, AppError> {
    let sender = BulkSender::new(
        state.repo.clone(),
        state.feed.clone(),
        mailer,
        state.config.email.clone(),
    );
    if !request.background {
        let summary = sender.send(&request).await?;
        return Ok(ApiResponse::new(summary).into_response());
    }

    let prepared = sender.prepare(&request).await?;

    let started = CampaignStarted {
        campaign_id: prepared.campaign.id.clone(),
        status: prepared.campaign.status,
        total: prepared.campaign.total_recipients,
    };
    tokio::spawn(async move {
        let campaign_id = prepared.campaign.id.clone();
        if let Err(e) = sender.run(prepared).await {
            tracing::error!(campaign_id = %campaign_id, "Background campaign failed: {}", e);
        }
    });

    Ok(ApiResponse::accepted(started).into_response())
}
