//! Administrator endpoints: users, roles, ad review, broadcasts and campaigns.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ads::publish_ad;
use super::{clamp_limit, require_text, success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{
    Ad, AdStatus, BroadcastNotificationRequest, CampaignChannel, CampaignDetail, CampaignStatus,
    EmailCampaign, EmailProvider, NewNotification, NotificationKind, OpportunityStats, Profile,
    Role, UpdateRolesRequest,
};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

const MAX_CAMPAIGN_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub total_users: i64,
    pub opportunities: OpportunityStats,
    pub ads_by_status: BTreeMap<&'static str, i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdminAdsQuery {
    #[serde(default)]
    pub status: Option<AdStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    #[serde(default = "default_campaign_limit")]
    pub limit: i64,
}

fn default_campaign_limit() -> i64 {
    50
}

/// GET /api/admin/users - Every profile with its roles.
pub async fn list_users(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<Profile>> {
    user.require_admin()?;
    success(state.repo.list_profiles().await?)
}

/// PUT /api/admin/users/:id/roles - Grant and revoke roles.
pub async fn update_user_roles(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateRolesRequest>,
) -> ApiResult<Profile> {
    user.require_admin()?;
    if id == user.user_id && request.revoke.contains(&Role::Admin) {
        return Err(AppError::Conflict(
            "Administrators cannot revoke their own admin role".to_string(),
        ));
    }
    if state.repo.get_profile(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("User {} not found", id)));
    }

    for role in &request.grant {
        state.repo.grant_role(&id, *role).await?;
    }
    for role in &request.revoke {
        state.repo.revoke_role(&id, *role).await?;
    }

    let profile = state
        .repo
        .get_profile(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
    tracing::info!(
        user_id = %id,
        admin = %user.user_id,
        roles = ?profile.roles,
        "User roles updated"
    );
    state.feed.publish(ChangeEvent::update(
        Table::UserRoles,
        &json!({ "userId": id, "roles": profile.roles }),
        Some(&id),
    ));

    success(profile)
}

/// DELETE /api/admin/users/:id - Delete an account and everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    user.require_admin()?;
    if id == user.user_id {
        return Err(AppError::Conflict(
            "Administrators cannot delete their own account".to_string(),
        ));
    }
    let profile = state
        .repo
        .get_profile(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

    // Owned opportunities cascade; drop them from the index first.
    let owned = state.repo.list_opportunities_by_creator(&id).await?;
    state.repo.delete_profile(&id).await?;
    tracing::info!(user_id = %id, admin = %user.user_id, "User deleted");

    let owned_ids: Vec<&str> = owned.iter().map(|o| o.id.as_str()).collect();
    if let Err(e) = state.search.remove_opportunities(&owned_ids).await {
        tracing::warn!("Failed to remove deleted user's opportunities from index: {}", e);
    }
    state
        .feed
        .publish(ChangeEvent::delete(Table::Profiles, &profile, Some(&id)));

    success(())
}

/// GET /api/admin/stats - Dashboard counters.
pub async fn admin_stats(State(state): State<AppState>, user: AuthUser) -> ApiResult<AdminStats> {
    user.require_admin()?;
    let ads_by_status = state
        .repo
        .count_ads_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| (status.as_str(), count))
        .collect();

    success(AdminStats {
        total_users: state.repo.count_profiles().await?,
        opportunities: state.repo.opportunity_stats().await?,
        ads_by_status,
    })
}

/// GET /api/admin/ads - Every ad, optionally in one status.
pub async fn list_all_ads(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AdminAdsQuery>,
) -> ApiResult<Vec<Ad>> {
    user.require_admin()?;
    success(state.repo.list_all_ads(query.status).await?)
}

/// POST /api/admin/ads/:id/approve - Start delivering a pending ad.
pub async fn approve_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Ad> {
    review_ad(&state, &user, &id, AdStatus::Active).await
}

/// POST /api/admin/ads/:id/reject - Refuse a pending or live ad.
pub async fn reject_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Ad> {
    review_ad(&state, &user, &id, AdStatus::Rejected).await
}

async fn review_ad(state: &AppState, user: &AuthUser, id: &str, to: AdStatus) -> ApiResult<Ad> {
    user.require_admin()?;
    let existing = state
        .repo
        .get_ad(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ad {} not found", id)))?;

    let allowed = match to {
        AdStatus::Active => existing.status == AdStatus::Pending,
        _ => matches!(existing.status, AdStatus::Pending | AdStatus::Active | AdStatus::Paused),
    };
    if !allowed {
        return Err(AppError::Conflict(format!(
            "Ad is {} and cannot become {}",
            existing.status, to
        )));
    }

    let ad = state.repo.set_ad_status(id, to).await?;
    publish_ad(state, &ad);

    let (title, kind) = match to {
        AdStatus::Active => ("Ad approved", NotificationKind::Success),
        _ => ("Ad rejected", NotificationKind::Warning),
    };
    let content = NewNotification {
        title: title.to_string(),
        message: format!("Your ad \"{}\" is now {}.", ad.title, ad.status),
        kind,
        link: Some("/advertiser".to_string()),
    };
    match state.repo.create_notification(&ad.advertiser_id, &content).await {
        Ok(notification) => {
            state.feed.publish(ChangeEvent::insert(
                Table::Notifications,
                &notification,
                Some(&notification.user_id),
            ));
        }
        Err(e) => tracing::warn!("Failed to notify advertiser of ad {}: {}", ad.id, e),
    }

    success(ad)
}

/// POST /api/admin/notifications/broadcast - In-app message to everyone or one role.
pub async fn broadcast_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<BroadcastNotificationRequest>,
) -> ApiResult<EmailCampaign> {
    user.require_admin()?;
    require_text(&request.title, "title")?;
    require_text(&request.message, "message")?;

    let user_ids = state.repo.list_profile_ids(request.role).await?;
    let campaign = state
        .repo
        .create_campaign(
            request.title.trim(),
            request.message.trim(),
            CampaignChannel::InApp,
            EmailProvider::InApp,
            user_ids.len() as i64,
            Some(&user.user_id),
        )
        .await?;

    let content = NewNotification {
        title: request.title.trim().to_string(),
        message: request.message.trim().to_string(),
        kind: request.kind.unwrap_or(NotificationKind::System),
        link: request.link.clone(),
    };
    let notifications = state
        .repo
        .create_notifications_bulk(&user_ids, &content)
        .await?;
    for notification in &notifications {
        state.feed.publish(ChangeEvent::insert(
            Table::Notifications,
            notification,
            Some(&notification.user_id),
        ));
    }

    let delivered = notifications.len() as i64;
    let campaign = state
        .repo
        .finish_campaign(
            &campaign.id,
            delivered,
            0,
            CampaignStatus::from_counts(delivered, 0),
        )
        .await?;
    state
        .feed
        .publish(ChangeEvent::insert(Table::EmailCampaigns, &campaign, None));
    tracing::info!(campaign_id = %campaign.id, recipients = delivered, "In-app broadcast sent");

    success(campaign)
}

/// GET /api/admin/campaigns - Recent campaigns, newest first.
pub async fn list_campaigns(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CampaignListQuery>,
) -> ApiResult<Vec<EmailCampaign>> {
    user.require_admin()?;
    success(
        state
            .repo
            .list_campaigns(clamp_limit(query.limit, MAX_CAMPAIGN_LIMIT))
            .await?,
    )
}

/// GET /api/admin/campaigns/:id - A campaign with its per-recipient records.
pub async fn get_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<CampaignDetail> {
    user.require_admin()?;
    let campaign = state
        .repo
        .get_campaign(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))?;
    let emails = state.repo.list_campaign_emails(&id).await?;
    success(CampaignDetail { campaign, emails })
}
