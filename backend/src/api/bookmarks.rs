//! Bookmark API endpoints. Every operation is scoped to the caller.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{now_timestamp, BookmarkState, BookmarkWithOpportunity};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

/// GET /api/bookmarks - The caller's bookmarks with their opportunities.
pub async fn list_bookmarks(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<BookmarkWithOpportunity>> {
    success(state.repo.list_bookmarks(&user.user_id).await?)
}

/// PUT /api/bookmarks/:opportunityId - Bookmark an opportunity (idempotent).
pub async fn add_bookmark(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<String>,
) -> ApiResult<BookmarkState> {
    success(set_bookmark(&state, &user, &opportunity_id, true).await?)
}

/// DELETE /api/bookmarks/:opportunityId - Remove a bookmark (idempotent).
pub async fn remove_bookmark(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<String>,
) -> ApiResult<BookmarkState> {
    success(set_bookmark(&state, &user, &opportunity_id, false).await?)
}

/// POST /api/bookmarks/:opportunityId/toggle - Flip the bookmark state.
pub async fn toggle_bookmark(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<String>,
) -> ApiResult<BookmarkState> {
    let bookmarked = state
        .repo
        .get_bookmark(&user.user_id, &opportunity_id)
        .await?
        .is_some();
    success(set_bookmark(&state, &user, &opportunity_id, !bookmarked).await?)
}

async fn set_bookmark(
    state: &AppState,
    user: &AuthUser,
    opportunity_id: &str,
    bookmarked: bool,
) -> Result<BookmarkState, AppError> {
    if bookmarked {
        let opportunity = state
            .repo
            .get_opportunity(opportunity_id)
            .await?
            .filter(|o| o.is_public_at(&now_timestamp()) || user.can_manage(&o.created_by))
            .ok_or_else(|| {
                AppError::NotFound(format!("Opportunity {} not found", opportunity_id))
            })?;

        let (bookmark, created) = state.repo.add_bookmark(&user.user_id, &opportunity.id).await?;
        if created {
            state.feed.publish(ChangeEvent::insert(
                Table::Bookmarks,
                &bookmark,
                Some(&user.user_id),
            ));
        }
    } else if let Some(bookmark) = state
        .repo
        .remove_bookmark(&user.user_id, opportunity_id)
        .await?
    {
        state.feed.publish(ChangeEvent::delete(
            Table::Bookmarks,
            &bookmark,
            Some(&user.user_id),
        ));
    }

    Ok(BookmarkState {
        opportunity_id: opportunity_id.to_string(),
        bookmarked,
    })
}
