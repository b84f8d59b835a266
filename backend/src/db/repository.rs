//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity. This file
//! holds the repository handle, opportunity and bookmark operations; the
//! account, messaging and ad operations live in sibling modules.

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    now_timestamp, Bookmark, BookmarkWithOpportunity, CreateOpportunityRequest, Opportunity,
    OpportunityFilter, OpportunitySort, OpportunityStats, OpportunityStatus, OpportunityType,
    UpdateOpportunityRequest,
};

/// Column list shared by every opportunity select.
pub(super) const OPPORTUNITY_COLUMNS: &str = "id, title, description, opportunity_type, domain, \
    organization, location, is_remote, apply_url, tags, deadline, status, rejection_reason, \
    featured, views_count, applications_count, created_by, approved_by, approved_at, \
    created_at, updated_at, version";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pub(super) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== OPPORTUNITY OPERATIONS ====================

    /// List publicly visible opportunities: approved, with no deadline or a
    /// deadline at or after `now`.
    pub async fn list_public_opportunities(
        &self,
        filter: &OpportunityFilter,
        now: &str,
    ) -> Result<Vec<Opportunity>, AppError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM opportunities WHERE status = 'approved' AND (deadline IS NULL OR deadline >= ",
            OPPORTUNITY_COLUMNS
        ));
        query.push_bind(now).push(")");

        if let Some(kind) = filter.opportunity_type {
            query.push(" AND opportunity_type = ").push_bind(kind.as_str());
        }
        if let Some(domain) = filter.domain.as_deref().filter(|d| !d.trim().is_empty()) {
            query
                .push(" AND domain = ")
                .push_bind(domain.trim().to_string())
                .push(" COLLATE NOCASE");
        }
        if let Some(featured) = filter.featured {
            query.push(" AND featured = ").push_bind(featured as i32);
        }

        query.push(match filter.sort.unwrap_or(OpportunitySort::Newest) {
            OpportunitySort::Newest => " ORDER BY featured DESC, created_at DESC",
            OpportunitySort::Deadline => " ORDER BY deadline IS NULL, deadline ASC",
            OpportunitySort::Popular => " ORDER BY views_count DESC, applications_count DESC",
        });
        query
            .push(" LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(opportunity_from_row).collect())
    }

    /// List every opportunity (used to rebuild the search index).
    pub async fn list_all_opportunities(&self) -> Result<Vec<Opportunity>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities ORDER BY created_at DESC",
            OPPORTUNITY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(opportunity_from_row).collect())
    }

    /// List opportunities in one moderation state, oldest first.
    pub async fn list_opportunities_by_status(
        &self,
        status: OpportunityStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Opportunity>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE status = ? ORDER BY created_at ASC LIMIT ? OFFSET ?",
            OPPORTUNITY_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(opportunity_from_row).collect())
    }

    /// List the opportunities a user submitted.
    pub async fn list_opportunities_by_creator(
        &self,
        user_id: &str,
    ) -> Result<Vec<Opportunity>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE created_by = ? ORDER BY created_at DESC",
            OPPORTUNITY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(opportunity_from_row).collect())
    }

    /// Get an opportunity by ID.
    pub async fn get_opportunity(&self, id: &str) -> Result<Option<Opportunity>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE id = ?",
            OPPORTUNITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(opportunity_from_row))
    }

    /// Create a new opportunity. `deadline` must already be normalized.
    ///
    /// Staff submissions may be created directly as approved; `approved_by`
    /// is then the creator.
    pub async fn create_opportunity(
        &self,
        request: &CreateOpportunityRequest,
        deadline: Option<String>,
        created_by: &str,
        status: OpportunityStatus,
    ) -> Result<Opportunity, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let tags_json = serde_json::to_string(&request.tags).unwrap_or_default();
        let (approved_by, approved_at) = if status == OpportunityStatus::Approved {
            (Some(created_by.to_string()), Some(now.clone()))
        } else {
            (None, None)
        };

        sqlx::query(
            r#"INSERT INTO opportunities (
                id, title, description, opportunity_type, domain, organization, location,
                is_remote, apply_url, tags, deadline, status, featured, views_count,
                applications_count, created_by, approved_by, approved_at, created_at,
                updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, 0, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(request.title.trim())
        .bind(request.description.trim())
        .bind(request.opportunity_type.as_str())
        .bind(request.domain.trim())
        .bind(&request.organization)
        .bind(&request.location)
        .bind(request.is_remote as i32)
        .bind(&request.apply_url)
        .bind(&tags_json)
        .bind(&deadline)
        .bind(status.as_str())
        .bind(created_by)
        .bind(&approved_by)
        .bind(&approved_at)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Opportunity {
            id,
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            opportunity_type: request.opportunity_type,
            domain: request.domain.trim().to_string(),
            organization: request.organization.clone(),
            location: request.location.clone(),
            is_remote: request.is_remote,
            apply_url: request.apply_url.clone(),
            tags: request.tags.clone(),
            deadline,
            status,
            rejection_reason: None,
            featured: false,
            views_count: 0,
            applications_count: 0,
            created_by: created_by.to_string(),
            approved_by,
            approved_at,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update an opportunity with optimistic concurrency control.
    ///
    /// `request.deadline` must already be normalized. When `resubmit` is set
    /// the opportunity goes back to the moderation queue.
    pub async fn update_opportunity(
        &self,
        id: &str,
        request: &UpdateOpportunityRequest,
        resubmit: bool,
    ) -> Result<Opportunity, AppError> {
        let existing = self
            .get_opportunity(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::VersionMismatch {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let now = now_timestamp();
        let new_version = existing.version + 1;

        let mut updated = existing.clone();
        if let Some(title) = &request.title {
            updated.title = title.trim().to_string();
        }
        if let Some(description) = &request.description {
            updated.description = description.trim().to_string();
        }
        if let Some(kind) = request.opportunity_type {
            updated.opportunity_type = kind;
        }
        if let Some(domain) = &request.domain {
            updated.domain = domain.trim().to_string();
        }
        updated.organization = request.organization.clone().or(existing.organization);
        updated.location = request.location.clone().or(existing.location);
        updated.is_remote = request.is_remote.unwrap_or(existing.is_remote);
        updated.apply_url = request.apply_url.clone().or(existing.apply_url);
        updated.tags = request.tags.clone().unwrap_or(existing.tags);
        updated.deadline = request.deadline.clone().or(existing.deadline);
        if resubmit {
            updated.status = OpportunityStatus::Pending;
            updated.approved_by = None;
            updated.approved_at = None;
            updated.rejection_reason = None;
        }
        updated.updated_at = now;
        updated.version = new_version;

        let tags_json = serde_json::to_string(&updated.tags).unwrap_or_default();

        // Use conditional UPDATE with version check to prevent race conditions
        let result = sqlx::query(
            r#"UPDATE opportunities SET
                title = ?, description = ?, opportunity_type = ?, domain = ?, organization = ?,
                location = ?, is_remote = ?, apply_url = ?, tags = ?, deadline = ?, status = ?,
                rejection_reason = ?, approved_by = ?, approved_at = ?, updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(updated.opportunity_type.as_str())
        .bind(&updated.domain)
        .bind(&updated.organization)
        .bind(&updated.location)
        .bind(updated.is_remote as i32)
        .bind(&updated.apply_url)
        .bind(&tags_json)
        .bind(&updated.deadline)
        .bind(updated.status.as_str())
        .bind(&updated.rejection_reason)
        .bind(&updated.approved_by)
        .bind(&updated.approved_at)
        .bind(&updated.updated_at)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Race condition - version changed between read and write
            let current = self.get_opportunity(id).await?;
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|o| o.version).unwrap_or(0),
            });
        }

        Ok(updated)
    }

    /// Move an opportunity to a moderation state. Last write wins; the
    /// approval stamp is only kept while the opportunity stays approved.
    pub async fn set_opportunity_status(
        &self,
        id: &str,
        status: OpportunityStatus,
        actor: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Opportunity, AppError> {
        let now = now_timestamp();
        let (approved_by, approved_at) = match status {
            OpportunityStatus::Approved => (actor.map(str::to_string), Some(now.clone())),
            _ => (None, None),
        };
        let rejection_reason = match status {
            OpportunityStatus::Rejected => reason.map(str::to_string),
            _ => None,
        };

        let result = sqlx::query(
            r#"UPDATE opportunities SET
                status = ?,
                approved_by = ?,
                approved_at = ?,
                rejection_reason = ?,
                updated_at = ?,
                version = version + 1
            WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(&approved_by)
        .bind(&approved_at)
        .bind(&rejection_reason)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Opportunity {} not found", id)));
        }

        self.get_opportunity(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", id)))
    }

    /// Feature or un-feature an opportunity.
    pub async fn set_opportunity_featured(
        &self,
        id: &str,
        featured: bool,
    ) -> Result<Opportunity, AppError> {
        let result = sqlx::query(
            "UPDATE opportunities SET featured = ?, updated_at = ?, version = version + 1 WHERE id = ?",
        )
        .bind(featured as i32)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Opportunity {} not found", id)));
        }

        self.get_opportunity(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", id)))
    }

    /// Delete an opportunity. Bookmarks cascade.
    pub async fn delete_opportunity(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM opportunities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Opportunity {} not found", id)));
        }

        Ok(())
    }

    /// Increment the view counter and return the new value.
    pub async fn increment_views(&self, id: &str) -> Result<i64, AppError> {
        let result =
            sqlx::query("UPDATE opportunities SET views_count = views_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Opportunity {} not found", id)));
        }

        let row = sqlx::query("SELECT views_count FROM opportunities WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("views_count"))
    }

    /// Increment the application counter; returns the new value and the apply URL.
    pub async fn increment_applications(
        &self,
        id: &str,
    ) -> Result<(i64, Option<String>), AppError> {
        let result = sqlx::query(
            "UPDATE opportunities SET applications_count = applications_count + 1 WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Opportunity {} not found", id)));
        }

        let row = sqlx::query("SELECT applications_count, apply_url FROM opportunities WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok((row.get("applications_count"), row.get("apply_url")))
    }

    /// Mark pending and approved opportunities whose deadline passed as
    /// expired. Returns the rows as they are after the update.
    pub async fn expire_due_opportunities(&self, now: &str) -> Result<Vec<Opportunity>, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE status IN ('pending', 'approved') AND deadline IS NOT NULL AND deadline < ?",
            OPPORTUNITY_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut opportunity = opportunity_from_row(row);
            sqlx::query(
                "UPDATE opportunities SET status = 'expired', updated_at = ?, version = version + 1 WHERE id = ?",
            )
            .bind(now)
            .bind(&opportunity.id)
            .execute(&mut *tx)
            .await?;

            opportunity.status = OpportunityStatus::Expired;
            opportunity.updated_at = now.to_string();
            opportunity.version += 1;
            expired.push(opportunity);
        }

        tx.commit().await?;
        Ok(expired)
    }

    /// Delete expired opportunities whose deadline is before `cutoff`.
    /// Returns the deleted rows.
    pub async fn delete_expired_before(&self, cutoff: &str) -> Result<Vec<Opportunity>, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM opportunities WHERE status = 'expired' AND deadline IS NOT NULL AND deadline < ?",
            OPPORTUNITY_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let deleted: Vec<Opportunity> = rows.iter().map(opportunity_from_row).collect();
        for opportunity in &deleted {
            sqlx::query("DELETE FROM opportunities WHERE id = ?")
                .bind(&opportunity.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Per-status counts and aggregate counters.
    pub async fn opportunity_stats(&self) -> Result<OpportunityStats, AppError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n, COALESCE(SUM(views_count), 0) AS views, COALESCE(SUM(applications_count), 0) AS applications FROM opportunities GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OpportunityStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("n");
            stats.total_views += row.get::<i64, _>("views");
            stats.total_applications += row.get::<i64, _>("applications");
            match OpportunityStatus::parse(&status) {
                Some(OpportunityStatus::Pending) => stats.pending = count,
                Some(OpportunityStatus::Approved) => stats.approved = count,
                Some(OpportunityStatus::Rejected) => stats.rejected = count,
                Some(OpportunityStatus::Expired) => stats.expired = count,
                None => tracing::warn!("Unknown opportunity status in database: {}", status),
            }
        }
        Ok(stats)
    }

    // ==================== BOOKMARK OPERATIONS ====================

    /// List a user's bookmarks with their opportunities, newest first.
    pub async fn list_bookmarks(
        &self,
        user_id: &str,
    ) -> Result<Vec<BookmarkWithOpportunity>, AppError> {
        let rows = sqlx::query(
            r#"SELECT b.id AS bookmark_id, b.user_id AS bookmark_user_id,
                      b.created_at AS bookmarked_at, o.*
               FROM bookmarks b
               JOIN opportunities o ON o.id = b.opportunity_id
               WHERE b.user_id = ?
               ORDER BY b.created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let opportunity = opportunity_from_row(row);
                BookmarkWithOpportunity {
                    bookmark: Bookmark {
                        id: row.get("bookmark_id"),
                        user_id: row.get("bookmark_user_id"),
                        opportunity_id: opportunity.id.clone(),
                        created_at: row.get("bookmarked_at"),
                    },
                    opportunity,
                }
            })
            .collect())
    }

    /// Get a user's bookmark of one opportunity.
    pub async fn get_bookmark(
        &self,
        user_id: &str,
        opportunity_id: &str,
    ) -> Result<Option<Bookmark>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_id, opportunity_id, created_at FROM bookmarks WHERE user_id = ? AND opportunity_id = ?",
        )
        .bind(user_id)
        .bind(opportunity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(bookmark_from_row))
    }

    /// Bookmark an opportunity. Idempotent: returns the bookmark and whether
    /// this call created it.
    pub async fn add_bookmark(
        &self,
        user_id: &str,
        opportunity_id: &str,
    ) -> Result<(Bookmark, bool), AppError> {
        if self.get_opportunity(opportunity_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Opportunity {} not found",
                opportunity_id
            )));
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO bookmarks (id, user_id, opportunity_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(opportunity_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        let bookmark = self
            .get_bookmark(user_id, opportunity_id)
            .await?
            .ok_or_else(|| AppError::Internal("Bookmark vanished after insert".to_string()))?;

        Ok((bookmark, result.rows_affected() == 1))
    }

    /// Remove a bookmark. Idempotent: returns the removed row, if any.
    pub async fn remove_bookmark(
        &self,
        user_id: &str,
        opportunity_id: &str,
    ) -> Result<Option<Bookmark>, AppError> {
        let Some(existing) = self.get_bookmark(user_id, opportunity_id).await? else {
            return Ok(None);
        };

        let result = sqlx::query("DELETE FROM bookmarks WHERE id = ?")
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;

        Ok((result.rows_affected() == 1).then_some(existing))
    }
}

// Helper functions for row conversion

pub(super) fn opportunity_from_row(row: &sqlx::sqlite::SqliteRow) -> Opportunity {
    let opportunity_type: String = row.get("opportunity_type");
    let status: String = row.get("status");
    let is_remote: i32 = row.get("is_remote");
    let featured: i32 = row.get("featured");
    let tags_str: Option<String> = row.get("tags");

    Opportunity {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        opportunity_type: OpportunityType::parse(&opportunity_type)
            .unwrap_or(OpportunityType::Other),
        domain: row.get("domain"),
        organization: row.get("organization"),
        location: row.get("location"),
        is_remote: is_remote != 0,
        apply_url: row.get("apply_url"),
        tags: tags_str.map(|s| parse_json_array(&s)).unwrap_or_default(),
        deadline: row.get("deadline"),
        status: OpportunityStatus::parse(&status).unwrap_or(OpportunityStatus::Pending),
        rejection_reason: row.get("rejection_reason"),
        featured: featured != 0,
        views_count: row.get("views_count"),
        applications_count: row.get("applications_count"),
        created_by: row.get("created_by"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn bookmark_from_row(row: &sqlx::sqlite::SqliteRow) -> Bookmark {
    Bookmark {
        id: row.get("id"),
        user_id: row.get("user_id"),
        opportunity_id: row.get("opportunity_id"),
        created_at: row.get("created_at"),
    }
}

pub(super) fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
