//! Advertiser and ad-delivery endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use super::{normalize_instant, require_text, success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{
    now_timestamp, ActiveAdsQuery, Ad, AdMetrics, AdStatus, CreateAdRequest, UpdateAdRequest,
};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickResponse {
    pub target_url: String,
}

pub(super) fn publish_ad(state: &AppState, ad: &Ad) {
    state
        .feed
        .publish(ChangeEvent::update(Table::Ads, ad, Some(&ad.advertiser_id)));
}

fn validate_target_url(url: &str) -> Result<(), AppError> {
    require_text(url, "targetUrl")?;
    let url = url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(AppError::Validation(
            "targetUrl must be an http(s) URL".to_string(),
        ));
    }
    Ok(())
}

fn validate_budget(budget_cents: i64) -> Result<(), AppError> {
    if budget_cents < 0 {
        return Err(AppError::Validation(
            "budgetCents must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_window(starts_at: Option<&str>, ends_at: Option<&str>) -> Result<(), AppError> {
    if let (Some(starts_at), Some(ends_at)) = (starts_at, ends_at) {
        if ends_at <= starts_at {
            return Err(AppError::Validation(
                "endsAt must be after startsAt".to_string(),
            ));
        }
    }
    Ok(())
}

/// Load an ad the caller owns (or any ad, for admins).
async fn load_owned(state: &AppState, user: &AuthUser, id: &str) -> Result<Ad, AppError> {
    user.require_advertiser()?;
    let ad = state
        .repo
        .get_ad(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ad {} not found", id)))?;
    if ad.advertiser_id != user.user_id && !user.is_admin() {
        return Err(AppError::NotFound(format!("Ad {} not found", id)));
    }
    Ok(ad)
}

/// GET /api/ads - The caller's ads.
pub async fn list_my_ads(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<Ad>> {
    user.require_advertiser()?;
    success(state.repo.list_ads_by_advertiser(&user.user_id).await?)
}

/// POST /api/ads - Create an ad; it waits for admin review.
pub async fn create_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateAdRequest>,
) -> ApiResult<Ad> {
    user.require_advertiser()?;
    require_text(&request.title, "title")?;
    validate_target_url(&request.target_url)?;
    validate_budget(request.budget_cents)?;
    let starts_at = normalize_instant(request.starts_at.as_deref(), "startsAt")?;
    let ends_at = normalize_instant(request.ends_at.as_deref(), "endsAt")?;
    validate_window(starts_at.as_deref(), ends_at.as_deref())?;

    let ad = state
        .repo
        .create_ad(&user.user_id, &request, starts_at, ends_at)
        .await?;
    state
        .feed
        .publish(ChangeEvent::insert(Table::Ads, &ad, Some(&ad.advertiser_id)));

    success(ad)
}

/// PUT /api/ads/:id - Edit an ad. An advertiser's edit of a live or
/// rejected ad sends it back to review.
pub async fn update_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(mut request): Json<UpdateAdRequest>,
) -> ApiResult<Ad> {
    let existing = load_owned(&state, &user, &id).await?;

    if let Some(title) = &request.title {
        require_text(title, "title")?;
    }
    if let Some(target_url) = &request.target_url {
        validate_target_url(target_url)?;
    }
    if let Some(budget_cents) = request.budget_cents {
        validate_budget(budget_cents)?;
    }
    request.starts_at = normalize_instant(request.starts_at.as_deref(), "startsAt")?;
    request.ends_at = normalize_instant(request.ends_at.as_deref(), "endsAt")?;
    validate_window(
        request.starts_at.as_deref().or(existing.starts_at.as_deref()),
        request.ends_at.as_deref().or(existing.ends_at.as_deref()),
    )?;

    let mut ad = state.repo.update_ad(&id, &request).await?;
    if !user.is_admin() && matches!(existing.status, AdStatus::Active | AdStatus::Rejected) {
        ad = state.repo.set_ad_status(&id, AdStatus::Pending).await?;
    }
    publish_ad(&state, &ad);

    success(ad)
}

/// DELETE /api/ads/:id - Delete an ad.
pub async fn delete_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let existing = load_owned(&state, &user, &id).await?;
    state.repo.delete_ad(&id).await?;
    state.feed.publish(ChangeEvent::delete(
        Table::Ads,
        &existing,
        Some(&existing.advertiser_id),
    ));
    success(())
}

/// GET /api/ads/:id/metrics - Impressions, clicks and click-through rate.
pub async fn ad_metrics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<AdMetrics> {
    let ad = load_owned(&state, &user, &id).await?;
    success(AdMetrics::from(&ad))
}

/// POST /api/ads/:id/pause - Stop delivering an active ad.
pub async fn pause_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Ad> {
    transition_owned(&state, &user, &id, AdStatus::Active, AdStatus::Paused).await
}

/// POST /api/ads/:id/resume - Resume delivering a paused ad.
pub async fn resume_ad(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Ad> {
    transition_owned(&state, &user, &id, AdStatus::Paused, AdStatus::Active).await
}

async fn transition_owned(
    state: &AppState,
    user: &AuthUser,
    id: &str,
    from: AdStatus,
    to: AdStatus,
) -> ApiResult<Ad> {
    let existing = load_owned(state, user, id).await?;
    if existing.status != from {
        return Err(AppError::Conflict(format!(
            "Ad is {}; only {} ads can become {}",
            existing.status, from, to
        )));
    }
    let ad = state.repo.set_ad_status(id, to).await?;
    publish_ad(state, &ad);
    success(ad)
}

/// GET /api/ads/active - Ads eligible for display now.
pub async fn list_active_ads(
    State(state): State<AppState>,
    Query(query): Query<ActiveAdsQuery>,
) -> ApiResult<Vec<Ad>> {
    success(
        state
            .repo
            .list_active_ads(query.placement, &now_timestamp())
            .await?,
    )
}

/// POST /api/ads/:id/impression - Count one impression.
pub async fn record_impression(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.repo.record_impression(&id, &now_timestamp()).await?;
    success(())
}

/// POST /api/ads/:id/click - Count one click and return the landing URL.
pub async fn record_click(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClickResponse> {
    let ad = state.repo.record_click(&id, &now_timestamp()).await?;
    success(ClickResponse {
        target_url: ad.target_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_must_be_ordered() {
        assert!(validate_window(Some("2030-01-02T00:00:00Z"), Some("2030-01-01T00:00:00Z")).is_err());
        assert!(validate_window(Some("2030-01-01T00:00:00Z"), Some("2030-01-01T00:00:00Z")).is_err());
        assert!(validate_window(Some("2030-01-01T00:00:00Z"), Some("2030-01-02T00:00:00Z")).is_ok());
        assert!(validate_window(None, Some("2030-01-02T00:00:00Z")).is_ok());
    }

    #[test]
    fn test_target_url_and_budget() {
        assert!(validate_target_url("https://example.com").is_ok());
        assert!(validate_target_url("ftp://example.com").is_err());
        assert!(validate_target_url(" ").is_err());
        assert!(validate_budget(-1).is_err());
        assert!(validate_budget(0).is_ok());
    }
}
