//! Opportunity API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use super::{clamp_limit, normalize_deadline, require_text, success, ApiResult};
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::errors::AppError;
use crate::models::{
    now_timestamp, ApplyResponse, CreateOpportunityRequest, Opportunity, OpportunityFilter,
    OpportunityStatus, UpdateOpportunityRequest,
};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

/// Maximum page size of the public listing.
const MAX_LIST_LIMIT: i64 = 100;

/// Index hits examined for one full-text listing page.
const MAX_SEARCH_CANDIDATES: usize = 500;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub views_count: i64,
}

/// Refresh the search document of an opportunity.
pub(super) async fn reindex(state: &AppState, opportunity: &Opportunity) {
    if let Err(e) = state.search.index_opportunity(opportunity).await {
        tracing::warn!("Failed to index opportunity {}: {}", opportunity.id, e);
    }
}

/// Publish an opportunity change, scoped to its creator.
pub(super) fn publish_update(state: &AppState, opportunity: &Opportunity) {
    state.feed.publish(ChangeEvent::update(
        Table::Opportunities,
        opportunity,
        Some(&opportunity.created_by),
    ));
}

/// Load an opportunity the caller may see; hidden ones read as missing.
async fn load_visible(
    state: &AppState,
    viewer: Option<&AuthUser>,
    id: &str,
) -> Result<Opportunity, AppError> {
    let not_found = || AppError::NotFound(format!("Opportunity {} not found", id));
    let opportunity = state.repo.get_opportunity(id).await?.ok_or_else(not_found)?;

    let visible = opportunity.is_public_at(&now_timestamp())
        || viewer.is_some_and(|user| user.can_manage(&opportunity.created_by));
    if visible {
        Ok(opportunity)
    } else {
        Err(not_found())
    }
}

/// GET /api/opportunities - Public listing with filters and full-text search.
pub async fn list_opportunities(
    State(state): State<AppState>,
    Query(mut filter): Query<OpportunityFilter>,
) -> ApiResult<Vec<Opportunity>> {
    filter.limit = clamp_limit(filter.limit, MAX_LIST_LIMIT);
    filter.offset = filter.offset.max(0);
    let now = now_timestamp();

    let query = filter.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return success(state.repo.list_public_opportunities(&filter, &now).await?);
    }

    // Hits arrive by relevance; visibility and filters come from the database.
    let hits = state.search.search(query, MAX_SEARCH_CANDIDATES, 0)?;
    let mut matches = Vec::new();
    for hit in hits {
        let Some(opportunity) = state.repo.get_opportunity(&hit.opportunity_id).await? else {
            continue;
        };
        if opportunity.is_public_at(&now) && matches_filter(&opportunity, &filter) {
            matches.push(opportunity);
        }
    }

    success(
        matches
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect(),
    )
}

fn matches_filter(opportunity: &Opportunity, filter: &OpportunityFilter) -> bool {
    filter
        .opportunity_type
        .map_or(true, |kind| opportunity.opportunity_type == kind)
        && filter
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map_or(true, |domain| opportunity.domain.eq_ignore_ascii_case(domain))
        && filter
            .featured
            .map_or(true, |featured| opportunity.featured == featured)
}

/// GET /api/opportunities/:id - Get a single opportunity.
pub async fn get_opportunity(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<String>,
) -> ApiResult<Opportunity> {
    success(load_visible(&state, viewer.as_ref(), &id).await?)
}

/// POST /api/opportunities - Submit an opportunity.
///
/// Submissions from moderators are published directly; everyone else's
/// wait in the moderation queue.
pub async fn create_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOpportunityRequest>,
) -> ApiResult<Opportunity> {
    require_text(&request.title, "title")?;
    require_text(&request.description, "description")?;
    require_text(&request.domain, "domain")?;
    let deadline = normalize_deadline(request.deadline.as_deref())?;

    let status = if user.is_moderator() {
        OpportunityStatus::Approved
    } else {
        OpportunityStatus::Pending
    };

    let opportunity = state
        .repo
        .create_opportunity(&request, deadline, &user.user_id, status)
        .await?;

    reindex(&state, &opportunity).await;
    state.feed.publish(ChangeEvent::insert(
        Table::Opportunities,
        &opportunity,
        Some(&opportunity.created_by),
    ));

    success(opportunity)
}

/// PUT /api/opportunities/:id - Edit an opportunity.
///
/// A creator's edit of a published or rejected opportunity sends it back
/// to moderation.
pub async fn update_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(mut request): Json<UpdateOpportunityRequest>,
) -> ApiResult<Opportunity> {
    let existing = state
        .repo
        .get_opportunity(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", id)))?;
    if !user.can_manage(&existing.created_by) {
        return Err(AppError::Forbidden(
            "Only the creator or a moderator can edit this opportunity".to_string(),
        ));
    }

    for (value, field) in [
        (&request.title, "title"),
        (&request.description, "description"),
        (&request.domain, "domain"),
    ] {
        if let Some(value) = value {
            require_text(value, field)?;
        }
    }
    request.deadline = normalize_deadline(request.deadline.as_deref())?;

    let resubmit = !user.is_moderator()
        && matches!(
            existing.status,
            OpportunityStatus::Approved | OpportunityStatus::Rejected
        );

    let opportunity = state.repo.update_opportunity(&id, &request, resubmit).await?;

    reindex(&state, &opportunity).await;
    publish_update(&state, &opportunity);

    success(opportunity)
}

/// DELETE /api/opportunities/:id - Delete an opportunity.
pub async fn delete_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let existing = state
        .repo
        .get_opportunity(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", id)))?;
    if !user.can_manage(&existing.created_by) {
        return Err(AppError::Forbidden(
            "Only the creator or a moderator can delete this opportunity".to_string(),
        ));
    }

    state.repo.delete_opportunity(&id).await?;

    if let Err(e) = state.search.remove_opportunity(&id).await {
        tracing::warn!("Failed to remove opportunity from index: {}", e);
    }
    state.feed.publish(ChangeEvent::delete(
        Table::Opportunities,
        &existing,
        Some(&existing.created_by),
    ));

    success(())
}

/// POST /api/opportunities/:id/view - Count a detail view.
pub async fn record_view(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<String>,
) -> ApiResult<ViewResponse> {
    load_visible(&state, viewer.as_ref(), &id).await?;
    let views_count = state.repo.increment_views(&id).await?;
    success(ViewResponse { views_count })
}

/// POST /api/opportunities/:id/apply - Count a click-through to the application page.
pub async fn record_application(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<String>,
) -> ApiResult<ApplyResponse> {
    load_visible(&state, viewer.as_ref(), &id).await?;
    let (applications_count, apply_url) = state.repo.increment_applications(&id).await?;
    success(ApplyResponse {
        applications_count,
        apply_url,
    })
}

/// GET /api/me/opportunities - The caller's own submissions, any status.
pub async fn list_my_opportunities(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<Opportunity>> {
    success(state.repo.list_opportunities_by_creator(&user.user_id).await?)
}
