//! Advertiser campaign persistence.

use sqlx::Row;

use super::Repository;
use crate::errors::AppError;
use crate::models::{
    now_timestamp, Ad, AdPlacement, AdStatus, CreateAdRequest, UpdateAdRequest,
};

const AD_COLUMNS: &str = "id, advertiser_id, title, description, image_url, target_url, \
    placement, status, budget_cents, impressions, clicks, starts_at, ends_at, created_at, \
    updated_at, version";

impl Repository {
    // ==================== AD OPERATIONS ====================

    /// List an advertiser's ads, newest first.
    pub async fn list_ads_by_advertiser(&self, advertiser_id: &str) -> Result<Vec<Ad>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ads WHERE advertiser_id = ? ORDER BY created_at DESC",
            AD_COLUMNS
        ))
        .bind(advertiser_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(ad_from_row).collect())
    }

    /// List every ad, optionally in one status.
    pub async fn list_all_ads(&self, status: Option<AdStatus>) -> Result<Vec<Ad>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM ads WHERE status = ? ORDER BY created_at ASC",
                    AD_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM ads ORDER BY created_at DESC",
                    AD_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(ad_from_row).collect())
    }

    /// Ads currently eligible for display.
    pub async fn list_active_ads(
        &self,
        placement: Option<AdPlacement>,
        now: &str,
    ) -> Result<Vec<Ad>, AppError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM ads
               WHERE status = 'active'
                 AND (? IS NULL OR placement = ?)
                 AND (starts_at IS NULL OR starts_at <= ?)
                 AND (ends_at IS NULL OR ends_at >= ?)
               ORDER BY impressions ASC, created_at ASC"#,
            AD_COLUMNS
        ))
        .bind(placement.map(|p| p.as_str()))
        .bind(placement.map(|p| p.as_str()))
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(ad_from_row).collect())
    }

    /// Get an ad by ID.
    pub async fn get_ad(&self, id: &str) -> Result<Option<Ad>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM ads WHERE id = ?", AD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(ad_from_row))
    }

    /// Create a new ad in the `pending` state. Window bounds must already be normalized.
    pub async fn create_ad(
        &self,
        advertiser_id: &str,
        request: &CreateAdRequest,
        starts_at: Option<String>,
        ends_at: Option<String>,
    ) -> Result<Ad, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r#"INSERT INTO ads (
                id, advertiser_id, title, description, image_url, target_url, placement, status,
                budget_cents, impressions, clicks, starts_at, ends_at, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, 0, 0, ?, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(advertiser_id)
        .bind(request.title.trim())
        .bind(&request.description)
        .bind(&request.image_url)
        .bind(request.target_url.trim())
        .bind(request.placement.as_str())
        .bind(request.budget_cents)
        .bind(&starts_at)
        .bind(&ends_at)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Ad {
            id,
            advertiser_id: advertiser_id.to_string(),
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            image_url: request.image_url.clone(),
            target_url: request.target_url.trim().to_string(),
            placement: request.placement,
            status: AdStatus::Pending,
            budget_cents: request.budget_cents,
            impressions: 0,
            clicks: 0,
            starts_at,
            ends_at,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Update an ad with optimistic concurrency control. Window bounds in
    /// `request` must already be normalized.
    pub async fn update_ad(&self, id: &str, request: &UpdateAdRequest) -> Result<Ad, AppError> {
        let existing = self
            .get_ad(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ad {} not found", id)))?;

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

        let updated = Ad {
            title: request
                .title
                .as_deref()
                .map(|t| t.trim().to_string())
                .unwrap_or(existing.title.clone()),
            description: request.description.clone().or(existing.description.clone()),
            image_url: request.image_url.clone().or(existing.image_url.clone()),
            target_url: request
                .target_url
                .as_deref()
                .map(|t| t.trim().to_string())
                .unwrap_or(existing.target_url.clone()),
            placement: request.placement.unwrap_or(existing.placement),
            budget_cents: request.budget_cents.unwrap_or(existing.budget_cents),
            starts_at: request.starts_at.clone().or(existing.starts_at.clone()),
            ends_at: request.ends_at.clone().or(existing.ends_at.clone()),
            updated_at: now_timestamp(),
            version: existing.version + 1,
            ..existing.clone()
        };

        let result = sqlx::query(
            r#"UPDATE ads SET
                title = ?, description = ?, image_url = ?, target_url = ?, placement = ?,
                budget_cents = ?, starts_at = ?, ends_at = ?, updated_at = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(&updated.image_url)
        .bind(&updated.target_url)
        .bind(updated.placement.as_str())
        .bind(updated.budget_cents)
        .bind(&updated.starts_at)
        .bind(&updated.ends_at)
        .bind(&updated.updated_at)
        .bind(updated.version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_ad(id).await?;
            return Err(AppError::VersionMismatch {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|a| a.version).unwrap_or(0),
            });
        }

        Ok(updated)
    }

    /// Move an ad to a new review/delivery state.
    pub async fn set_ad_status(&self, id: &str, status: AdStatus) -> Result<Ad, AppError> {
        let result = sqlx::query(
            "UPDATE ads SET status = ?, updated_at = ?, version = version + 1 WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Ad {} not found", id)));
        }

        self.get_ad(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ad {} not found", id)))
    }

    /// Delete an ad.
    pub async fn delete_ad(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM ads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Ad {} not found", id)));
        }
        Ok(())
    }

    /// Count one impression of an ad that is active and inside its window.
    pub async fn record_impression(&self, id: &str, now: &str) -> Result<Ad, AppError> {
        self.bump_ad_counter(id, "impressions", now).await
    }

    /// Count one click of an ad that is active and inside its window.
    pub async fn record_click(&self, id: &str, now: &str) -> Result<Ad, AppError> {
        self.bump_ad_counter(id, "clicks", now).await
    }

    async fn bump_ad_counter(
        &self,
        id: &str,
        column: &'static str,
        now: &str,
    ) -> Result<Ad, AppError> {
        let result = sqlx::query(&format!(
            r#"UPDATE ads SET {column} = {column} + 1
               WHERE id = ? AND status = 'active'
                 AND (starts_at IS NULL OR starts_at <= ?)
                 AND (ends_at IS NULL OR ends_at >= ?)"#
        ))
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Active ad {} not found", id)));
        }

        self.get_ad(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ad {} not found", id)))
    }

    /// Move active and paused ads whose window closed before `now` to
    /// `ended`. Returns the rows as they are after the update.
    pub async fn end_elapsed_ads(&self, now: &str) -> Result<Vec<Ad>, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM ads WHERE status IN ('active', 'paused') AND ends_at IS NOT NULL AND ends_at < ?",
            AD_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut ended = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut ad = ad_from_row(row);
            sqlx::query(
                "UPDATE ads SET status = 'ended', updated_at = ?, version = version + 1 WHERE id = ?",
            )
            .bind(now)
            .bind(&ad.id)
            .execute(&mut *tx)
            .await?;

            ad.status = AdStatus::Ended;
            ad.updated_at = now.to_string();
            ad.version += 1;
            ended.push(ad);
        }

        tx.commit().await?;
        Ok(ended)
    }

    /// Number of ads in each status, as `(status, count)` pairs.
    pub async fn count_ads_by_status(&self) -> Result<Vec<(AdStatus, i64)>, AppError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM ads GROUP BY status ORDER BY status")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let status: String = row.get("status");
                Some((AdStatus::parse(&status)?, row.get("n")))
            })
            .collect())
    }
}

fn ad_from_row(row: &sqlx::sqlite::SqliteRow) -> Ad {
    let placement: String = row.get("placement");
    let status: String = row.get("status");
    Ad {
        id: row.get("id"),
        advertiser_id: row.get("advertiser_id"),
        title: row.get("title"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        target_url: row.get("target_url"),
        placement: AdPlacement::parse(&placement).unwrap_or(AdPlacement::Banner),
        status: AdStatus::parse(&status).unwrap_or(AdStatus::Pending),
        budget_cents: row.get("budget_cents"),
        impressions: row.get("impressions"),
        clicks: row.get("clicks"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}
