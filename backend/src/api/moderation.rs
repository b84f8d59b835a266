//! Moderation queue endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::opportunities::{publish_update, reindex};
use super::{clamp_limit, success, ApiResult};
use crate::auth::AuthUser;
use crate::models::{
    FeatureOpportunityRequest, NewNotification, NotificationKind, Opportunity, OpportunityStatus,
    RejectOpportunityRequest,
};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

const MAX_QUEUE_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ModerationQuery {
    #[serde(default)]
    pub status: Option<OpportunityStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/moderation/opportunities - Opportunities in one status, oldest first.
pub async fn list_moderation_queue(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ModerationQuery>,
) -> ApiResult<Vec<Opportunity>> {
    user.require_moderator()?;
    let opportunities = state
        .repo
        .list_opportunities_by_status(
            query.status.unwrap_or(OpportunityStatus::Pending),
            clamp_limit(query.limit, MAX_QUEUE_LIMIT),
            query.offset.max(0),
        )
        .await?;
    success(opportunities)
}

/// POST /api/moderation/opportunities/:id/approve - Publish an opportunity.
pub async fn approve_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Opportunity> {
    user.require_moderator()?;
    let opportunity = state
        .repo
        .set_opportunity_status(&id, OpportunityStatus::Approved, Some(&user.user_id), None)
        .await?;
    tracing::info!(opportunity_id = %id, moderator = %user.user_id, "Opportunity approved");

    reindex(&state, &opportunity).await;
    publish_update(&state, &opportunity);
    notify_creator(
        &state,
        &opportunity,
        NewNotification {
            title: "Opportunity approved".to_string(),
            message: format!("\"{}\" is now live.", opportunity.title),
            kind: NotificationKind::Success,
            link: Some(format!("/opportunities/{}", opportunity.id)),
        },
    )
    .await;

    success(opportunity)
}

/// POST /api/moderation/opportunities/:id/reject - Reject with an optional reason.
pub async fn reject_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<RejectOpportunityRequest>,
) -> ApiResult<Opportunity> {
    user.require_moderator()?;
    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let opportunity = state
        .repo
        .set_opportunity_status(&id, OpportunityStatus::Rejected, Some(&user.user_id), reason)
        .await?;
    tracing::info!(opportunity_id = %id, moderator = %user.user_id, "Opportunity rejected");

    reindex(&state, &opportunity).await;
    publish_update(&state, &opportunity);

    let message = match reason {
        Some(reason) => format!("\"{}\" was not approved: {}", opportunity.title, reason),
        None => format!("\"{}\" was not approved.", opportunity.title),
    };
    notify_creator(
        &state,
        &opportunity,
        NewNotification {
            title: "Opportunity rejected".to_string(),
            message,
            kind: NotificationKind::Warning,
            link: Some("/dashboard".to_string()),
        },
    )
    .await;

    success(opportunity)
}

/// PUT /api/moderation/opportunities/:id/feature - Feature or un-feature.
pub async fn feature_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<FeatureOpportunityRequest>,
) -> ApiResult<Opportunity> {
    user.require_moderator()?;
    let opportunity = state
        .repo
        .set_opportunity_featured(&id, request.featured)
        .await?;
    publish_update(&state, &opportunity);
    success(opportunity)
}

/// Send the creator an in-app notification; failures are only logged.
async fn notify_creator(state: &AppState, opportunity: &Opportunity, content: NewNotification) {
    match state
        .repo
        .create_notification(&opportunity.created_by, &content)
        .await
    {
        Ok(notification) => {
            state.feed.publish(ChangeEvent::insert(
                Table::Notifications,
                &notification,
                Some(&notification.user_id),
            ));
        }
        Err(e) => {
            tracing::warn!(
                "Failed to notify creator of opportunity {}: {}",
                opportunity.id,
                e
            );
        }
    }
}
