//! Profile endpoints for the signed-in user.

use axum::{extract::State, Json};

use super::{require_text, success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{Profile, UpdateProfileRequest};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

/// GET /api/profile - The caller's profile.
pub async fn get_profile(State(state): State<AppState>, user: AuthUser) -> ApiResult<Profile> {
    let profile = state
        .repo
        .get_profile(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user.user_id)))?;
    success(profile)
}

/// PUT /api/profile - Update the caller's profile.
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<Profile> {
    if let Some(full_name) = &request.full_name {
        require_text(full_name, "fullName")?;
    }

    let profile = state.repo.update_profile(&user.user_id, &request).await?;
    state
        .feed
        .publish(ChangeEvent::update(Table::Profiles, &profile, Some(&profile.id)));
    success(profile)
}
