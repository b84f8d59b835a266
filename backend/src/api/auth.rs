//! Account and session endpoints.

use axum::{extract::State, Json};
use chrono::Utc;

use super::{success, ApiResult};
use crate::auth::{generate_session_token, hash_password, hash_token, verify_password, AuthUser};
use crate::email::is_plausible_email;
use crate::errors::AppError;
use crate::models::{format_timestamp, Profile, Role, SessionResponse, SignInRequest, SignUpRequest};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

const MIN_PASSWORD_LENGTH: usize = 8;

/// POST /api/auth/signup - Create an account and sign in.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<SignUpRequest>,
) -> ApiResult<SessionResponse> {
    let email = request.email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let mut roles = vec![Role::User];
    if state.config.is_admin_email(&email) {
        roles.push(Role::Admin);
    }

    let full_name = request
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default())
        .to_string();

    let password_hash = hash_password(&request.password)?;
    let profile = state
        .repo
        .create_profile(&email, &password_hash, &full_name, &roles)
        .await?;
    tracing::info!(user_id = %profile.id, "Account created");

    state
        .feed
        .publish(ChangeEvent::insert(Table::Profiles, &profile, Some(&profile.id)));

    success(issue_session(&state, profile).await?)
}

/// POST /api/auth/signin - Exchange credentials for a session.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<SessionResponse> {
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let credentials = state
        .repo
        .find_credentials_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&request.password, &credentials.password_hash) {
        return Err(invalid());
    }

    let profile = state
        .repo
        .get_profile(&credentials.user_id)
        .await?
        .ok_or_else(invalid)?;

    success(issue_session(&state, profile).await?)
}

/// POST /api/auth/signout - End the current session.
pub async fn sign_out(State(state): State<AppState>, user: AuthUser) -> ApiResult<()> {
    state.repo.delete_session(&user.token_hash).await?;
    tracing::info!(user_id = %user.user_id, email = %user.email, "Signed out");
    success(())
}

/// GET /api/auth/session - The signed-in user's profile.
pub async fn get_session(State(state): State<AppState>, user: AuthUser) -> ApiResult<Profile> {
    let profile = state
        .repo
        .get_profile(&user.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Account no longer exists".to_string()))?;
    success(profile)
}

async fn issue_session(state: &AppState, user: Profile) -> Result<SessionResponse, AppError> {
    let expires_at = chrono::Duration::from_std(state.config.session_ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .map(format_timestamp)
        .ok_or_else(|| AppError::Internal("Session TTL is out of range".to_string()))?;

    let access_token = generate_session_token();
    state
        .repo
        .create_session(&hash_token(&access_token), &user.id, &expires_at)
        .await?;

    Ok(SessionResponse {
        access_token,
        expires_at,
        user,
    })
}
