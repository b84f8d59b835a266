//! Profile, role and sign-in models.

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Access role granted to an account.
    Role {
        User => "user",
        Moderator => "moderator",
        Admin => "admin",
        Advertiser => "advertiser",
    }
}

/// User metadata; the id is the account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    /// Opt-in for bulk email campaigns
    pub email_notifications: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// A user-to-role mapping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRole {
    pub user_id: String,
    pub role: Role,
    pub granted_at: String,
}

/// Request body for updating the caller's profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
    #[serde(default)]
    pub email_notifications: Option<bool>,
}

/// Request body for granting and revoking roles.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRolesRequest {
    #[serde(default)]
    pub grant: Vec<Role>,
    #[serde(default)]
    pub revoke: Vec<Role>,
}

/// Request body for creating an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Request body for signing in.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// A freshly issued session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub expires_at: String,
    pub user: Profile,
}

/// Stored credentials looked up during sign-in.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub password_hash: String,
}
