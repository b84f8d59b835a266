//! Authentication and role gating.
//!
//! Two mechanisms live here:
//! - a pre-shared service key guarding the function endpoints, compared in
//!   constant time to mitigate timing attacks;
//! - bearer-token sessions for end users, resolved to an [`AuthUser`]
//!   carrying the caller's roles.

mod password;

pub use password::{generate_session_token, hash_password, hash_token, verify_password};

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::{now_timestamp, Role};
use crate::AppState;

/// Header name for the service key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Service-key layer function that takes the expected key as a parameter.
pub async fn service_key_layer(
    expected_key: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no key is configured, allow all requests (dev mode)
    let Some(expected) = expected_key else {
        return next.run(request).await;
    };

    // Get the API key from the request header
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match provided {
        Some(provided_key) => {
            if constant_time_compare(&provided_key, &expected) {
                next.run(request).await
            } else {
                unauthorized_response("Invalid service key")
            }
        }
        None => match bearer_token(request.headers()).map(str::to_string) {
            Some(bearer_key) if constant_time_compare(&bearer_key, &expected) => {
                next.run(request).await
            }
            _ => unauthorized_response("Missing or invalid service key"),
        },
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Create an unauthorized response.
fn unauthorized_response(message: &str) -> Response {
    AppError::Unauthorized(message.to_string()).into_response()
}

/// Extract the token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub roles: Vec<Role>,
    /// Fingerprint of the session token used, for sign-out
    pub token_hash: String,
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Admins hold every moderator capability.
    pub fn is_moderator(&self) -> bool {
        self.is_admin() || self.has_role(Role::Moderator)
    }

    /// Admins may act on any advertiser's behalf.
    pub fn is_advertiser(&self) -> bool {
        self.is_admin() || self.has_role(Role::Advertiser)
    }

    /// Owner of a row, or a moderator.
    pub fn can_manage(&self, owner_id: &str) -> bool {
        self.user_id == owner_id || self.is_moderator()
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin role required".to_string()))
        }
    }

    pub fn require_moderator(&self) -> Result<(), AppError> {
        if self.is_moderator() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Moderator role required".to_string()))
        }
    }

    pub fn require_advertiser(&self) -> Result<(), AppError> {
        if self.is_advertiser() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Advertiser role required".to_string()))
        }
    }
}

/// Resolve a raw session token to its user, if the session is live.
pub async fn authenticate_token(
    state: &AppState,
    token: &str,
) -> Result<Option<AuthUser>, AppError> {
    resolve_session(state, hash_token(token)).await
}

/// Resolve a stored token fingerprint to its user with current roles, if
/// the session is still live.
pub async fn resolve_session(
    state: &AppState,
    token_hash: String,
) -> Result<Option<AuthUser>, AppError> {
    let Some(session) = state
        .repo
        .resolve_session(&token_hash, &now_timestamp())
        .await?
    else {
        return Ok(None);
    };

    let roles = state.repo.list_roles(&session.user_id).await?;
    Ok(Some(AuthUser {
        user_id: session.user_id,
        email: session.email,
        roles,
        token_hash,
    }))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

        authenticate_token(state, token)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))
    }
}

/// Caller of a public endpoint; anonymous when no token is sent.
///
/// A token that is sent but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if bearer_token(&parts.headers).is_none() {
            return Ok(MaybeAuthUser(None));
        }
        AuthUser::from_request_parts(parts, state)
            .await
            .map(|user| MaybeAuthUser(Some(user)))
    }
}
