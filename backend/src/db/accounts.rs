//! Profile, role and session persistence.

use sqlx::Row;

use super::repository::parse_json_array;
use super::Repository;
use crate::errors::AppError;
use crate::models::{now_timestamp, Credentials, Profile, Role, UpdateProfileRequest, UserRole};

const PROFILE_COLUMNS: &str = "id, email, full_name, avatar_url, bio, institution, interests, \
    email_notifications, created_at, updated_at";

/// A resolved, unexpired session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: String,
    pub email: String,
    pub expires_at: String,
}

impl Repository {
    // ==================== PROFILE OPERATIONS ====================

    /// Create an account with its profile and initial roles.
    pub async fn create_profile(
        &self,
        email: &str,
        password_hash: &str,
        full_name: &str,
        roles: &[Role],
    ) -> Result<Profile, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO profiles (id, email, password_hash, full_name, interests, email_notifications, created_at, updated_at) VALUES (?, ?, ?, ?, '[]', 1, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "An account for {} already exists",
                email
            )));
        }

        for role in roles {
            sqlx::query(
                "INSERT OR IGNORE INTO user_roles (user_id, role, granted_at) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(role.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Profile {
            id,
            email: email.to_string(),
            full_name: full_name.to_string(),
            avatar_url: None,
            bio: None,
            institution: None,
            interests: Vec::new(),
            email_notifications: true,
            created_at: now.clone(),
            updated_at: now,
            roles: roles.to_vec(),
        })
    }

    /// Look up sign-in credentials by email (case-insensitive).
    pub async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credentials>, AppError> {
        let row = sqlx::query("SELECT id, password_hash FROM profiles WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Credentials {
            user_id: row.get("id"),
            password_hash: row.get("password_hash"),
        }))
    }

    /// Get a profile with its roles.
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles WHERE id = ?",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut profile = profile_from_row(&row);
                profile.roles = self.list_roles(id).await?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// List all profiles with their roles, ordered by name.
    pub async fn list_profiles(&self) -> Result<Vec<Profile>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM profiles ORDER BY full_name COLLATE NOCASE, email",
            PROFILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let role_rows = sqlx::query("SELECT user_id, role FROM user_roles ORDER BY role")
            .fetch_all(&self.pool)
            .await?;

        let mut profiles: Vec<Profile> = rows.iter().map(profile_from_row).collect();
        for role_row in role_rows {
            let user_id: String = role_row.get("user_id");
            let role: String = role_row.get("role");
            if let (Some(profile), Some(role)) = (
                profiles.iter_mut().find(|p| p.id == user_id),
                Role::parse(&role),
            ) {
                profile.roles.push(role);
            }
        }
        Ok(profiles)
    }

    /// Update the editable fields of a profile.
    pub async fn update_profile(
        &self,
        id: &str,
        request: &UpdateProfileRequest,
    ) -> Result<Profile, AppError> {
        let existing = self
            .get_profile(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", id)))?;

        let now = now_timestamp();
        let full_name = request
            .full_name
            .as_deref()
            .map(str::trim)
            .unwrap_or(&existing.full_name)
            .to_string();
        let avatar_url = request.avatar_url.clone().or(existing.avatar_url.clone());
        let bio = request.bio.clone().or(existing.bio.clone());
        let institution = request.institution.clone().or(existing.institution.clone());
        let interests = request
            .interests
            .clone()
            .unwrap_or(existing.interests.clone());
        let email_notifications = request
            .email_notifications
            .unwrap_or(existing.email_notifications);
        let interests_json = serde_json::to_string(&interests).unwrap_or_default();

        sqlx::query(
            "UPDATE profiles SET full_name = ?, avatar_url = ?, bio = ?, institution = ?, interests = ?, email_notifications = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&full_name)
        .bind(&avatar_url)
        .bind(&bio)
        .bind(&institution)
        .bind(&interests_json)
        .bind(email_notifications as i32)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(Profile {
            full_name,
            avatar_url,
            bio,
            institution,
            interests,
            email_notifications,
            updated_at: now,
            ..existing
        })
    }

    /// Delete an account. Roles, sessions, bookmarks, notifications,
    /// submissions and ads cascade.
    pub async fn delete_profile(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Profile {} not found", id)));
        }
        Ok(())
    }

    /// Emails of profiles that accept bulk email, optionally limited to a role.
    pub async fn list_notifiable_emails(&self, role: Option<Role>) -> Result<Vec<String>, AppError> {
        let rows = match role {
            Some(role) => {
                sqlx::query(
                    "SELECT p.email FROM profiles p JOIN user_roles r ON r.user_id = p.id WHERE p.email_notifications = 1 AND r.role = ? ORDER BY p.email",
                )
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT email FROM profiles WHERE email_notifications = 1 ORDER BY email",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(|row| row.get("email")).collect())
    }

    /// Ids of all profiles, optionally limited to a role.
    pub async fn list_profile_ids(&self, role: Option<Role>) -> Result<Vec<String>, AppError> {
        let rows = match role {
            Some(role) => {
                sqlx::query("SELECT user_id AS id FROM user_roles WHERE role = ? ORDER BY user_id")
                    .bind(role.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id FROM profiles ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Number of registered accounts.
    pub async fn count_profiles(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ==================== ROLE OPERATIONS ====================

    /// Roles held by a user.
    pub async fn list_roles(&self, user_id: &str) -> Result<Vec<Role>, AppError> {
        Ok(self
            .list_role_grants(user_id)
            .await?
            .into_iter()
            .map(|grant| grant.role)
            .collect())
    }

    /// Role rows held by a user, with grant time.
    pub async fn list_role_grants(&self, user_id: &str) -> Result<Vec<UserRole>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id, role, granted_at FROM user_roles WHERE user_id = ? ORDER BY role",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let role: String = row.get("role");
                Some(UserRole {
                    user_id: row.get("user_id"),
                    role: Role::parse(&role)?,
                    granted_at: row.get("granted_at"),
                })
            })
            .collect())
    }

    /// Grant a role. Idempotent.
    pub async fn grant_role(&self, user_id: &str, role: Role) -> Result<(), AppError> {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role, granted_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(role.as_str())
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Revoke a role. Idempotent.
    pub async fn revoke_role(&self, user_id: &str, role: Role) -> Result<(), AppError> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role = ?")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== SESSION OPERATIONS ====================

    /// Store a session by its token fingerprint.
    pub async fn create_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(now_timestamp())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve a token fingerprint to its session if it has not expired.
    pub async fn resolve_session(
        &self,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<SessionRecord>, AppError> {
        let row = sqlx::query(
            r#"SELECT s.user_id, s.expires_at, p.email
               FROM sessions s JOIN profiles p ON p.id = s.user_id
               WHERE s.token_hash = ? AND s.expires_at > ?"#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SessionRecord {
            user_id: row.get("user_id"),
            email: row.get("email"),
            expires_at: row.get("expires_at"),
        }))
    }

    /// Delete one session. Idempotent.
    pub async fn delete_session(&self, token_hash: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete sessions that expired before `now`; returns how many.
    pub async fn purge_expired_sessions(&self, now: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn profile_from_row(row: &sqlx::sqlite::SqliteRow) -> Profile {
    let interests: Option<String> = row.get("interests");
    let email_notifications: i32 = row.get("email_notifications");
    Profile {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        avatar_url: row.get("avatar_url"),
        bio: row.get("bio"),
        institution: row.get("institution"),
        interests: interests.map(|s| parse_json_array(&s)).unwrap_or_default(),
        email_notifications: email_notifications != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        roles: Vec::new(),
    }
}
