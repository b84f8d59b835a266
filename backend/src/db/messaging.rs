//! Notification and bulk email campaign persistence.

use sqlx::Row;

use super::Repository;
use crate::errors::AppError;
use crate::models::{
    now_timestamp, CampaignChannel, CampaignStatus, DeliveryStatus, EmailCampaign,
    EmailNotification, EmailProvider, NewNotification, Notification, NotificationKind,
};

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, kind, link, is_read, created_at";

const CAMPAIGN_COLUMNS: &str = "id, subject, html_body, channel, provider, status, \
    total_recipients, sent_count, failed_count, created_by, created_at, completed_at";

const EMAIL_COLUMNS: &str =
    "id, campaign_id, recipient, subject, status, error, attempts, sent_at, created_at";

impl Repository {
    // ==================== NOTIFICATION OPERATIONS ====================

    /// List a user's notifications, newest first.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE user_id = ? AND (? = 0 OR is_read = 0) ORDER BY created_at DESC, rowid DESC LIMIT ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(unread_only as i32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(notification_from_row).collect())
    }

    /// Number of unread notifications for a user.
    pub async fn unread_count(&self, user_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM notifications WHERE user_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Insert one notification for a user.
    pub async fn create_notification(
        &self,
        user_id: &str,
        content: &NewNotification,
    ) -> Result<Notification, AppError> {
        let mut created = self
            .create_notifications_bulk(&[user_id.to_string()], content)
            .await?;
        created
            .pop()
            .ok_or_else(|| AppError::Internal("Notification insert returned nothing".to_string()))
    }

    /// Insert the same notification for many users in one transaction.
    pub async fn create_notifications_bulk(
        &self,
        user_ids: &[String],
        content: &NewNotification,
    ) -> Result<Vec<Notification>, AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(user_ids.len());

        for user_id in user_ids {
            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO notifications (id, user_id, title, message, kind, link, is_read, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(&content.title)
            .bind(&content.message)
            .bind(content.kind.as_str())
            .bind(&content.link)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            created.push(Notification {
                id,
                user_id: user_id.clone(),
                title: content.title.clone(),
                message: content.message.clone(),
                kind: content.kind,
                link: content.link.clone(),
                is_read: false,
                created_at: now.clone(),
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Mark one of the user's notifications as read.
    pub async fn mark_notification_read(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Notification, AppError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(notification_from_row(&row))
    }

    /// Mark all of the user's notifications as read; returns the rows that changed.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<Vec<Notification>, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE user_id = ? AND is_read = 0 ORDER BY created_at ASC",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(rows
            .iter()
            .map(|row| Notification {
                is_read: true,
                ..notification_from_row(row)
            })
            .collect())
    }

    /// Delete one of the user's notifications.
    pub async fn delete_notification(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }
        Ok(())
    }

    // ==================== CAMPAIGN OPERATIONS ====================

    /// Open a campaign in the `sending` state.
    pub async fn create_campaign(
        &self,
        subject: &str,
        html_body: &str,
        channel: CampaignChannel,
        provider: EmailProvider,
        total_recipients: i64,
        created_by: Option<&str>,
    ) -> Result<EmailCampaign, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            "INSERT INTO email_campaigns (id, subject, html_body, channel, provider, status, total_recipients, sent_count, failed_count, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(&id)
        .bind(subject)
        .bind(html_body)
        .bind(channel.as_str())
        .bind(provider.as_str())
        .bind(CampaignStatus::Sending.as_str())
        .bind(total_recipients)
        .bind(created_by)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(EmailCampaign {
            id,
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            channel,
            provider,
            status: CampaignStatus::Sending,
            total_recipients,
            sent_count: 0,
            failed_count: 0,
            created_by: created_by.map(str::to_string),
            created_at: now,
            completed_at: None,
        })
    }

    /// Record the outcome of one recipient's send.
    pub async fn record_email_attempt(
        &self,
        campaign_id: &str,
        recipient: &str,
        subject: &str,
        status: DeliveryStatus,
        error: Option<&str>,
        attempts: i64,
    ) -> Result<EmailNotification, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let sent_at = (status == DeliveryStatus::Sent).then(|| now.clone());

        sqlx::query(
            "INSERT INTO email_notifications (id, campaign_id, recipient, subject, status, error, attempts, sent_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(campaign_id)
        .bind(recipient)
        .bind(subject)
        .bind(status.as_str())
        .bind(error)
        .bind(attempts)
        .bind(&sent_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(EmailNotification {
            id,
            campaign_id: campaign_id.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            status,
            error: error.map(str::to_string),
            attempts,
            sent_at,
            created_at: now,
        })
    }

    /// Checkpoint a running campaign's counters.
    pub async fn update_campaign_progress(
        &self,
        campaign_id: &str,
        sent: i64,
        failed: i64,
    ) -> Result<EmailCampaign, AppError> {
        sqlx::query("UPDATE email_campaigns SET sent_count = ?, failed_count = ? WHERE id = ?")
            .bind(sent)
            .bind(failed)
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        self.get_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))
    }

    /// Close a campaign with its final counters and status.
    pub async fn finish_campaign(
        &self,
        campaign_id: &str,
        sent: i64,
        failed: i64,
        status: CampaignStatus,
    ) -> Result<EmailCampaign, AppError> {
        sqlx::query(
            "UPDATE email_campaigns SET sent_count = ?, failed_count = ?, status = ?, completed_at = ? WHERE id = ?",
        )
        .bind(sent)
        .bind(failed)
        .bind(status.as_str())
        .bind(now_timestamp())
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        self.get_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))
    }

    /// Fail campaigns left in `sending` by a process that stopped mid-run.
    /// Only safe before any new campaign starts.
    pub async fn fail_interrupted_campaigns(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE email_campaigns SET status = ?, completed_at = ? WHERE status = ?",
        )
        .bind(CampaignStatus::Failed.as_str())
        .bind(now_timestamp())
        .bind(CampaignStatus::Sending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Get a campaign by ID.
    pub async fn get_campaign(&self, id: &str) -> Result<Option<EmailCampaign>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM email_campaigns WHERE id = ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(campaign_from_row))
    }

    /// List campaigns, newest first.
    pub async fn list_campaigns(&self, limit: i64) -> Result<Vec<EmailCampaign>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM email_campaigns ORDER BY created_at DESC, rowid DESC LIMIT ?",
            CAMPAIGN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(campaign_from_row).collect())
    }

    /// Per-recipient records of a campaign, in send order.
    pub async fn list_campaign_emails(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<EmailNotification>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM email_notifications WHERE campaign_id = ? ORDER BY rowid ASC",
            EMAIL_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(email_from_row).collect())
    }
}

fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> Notification {
    let kind: String = row.get("kind");
    let is_read: i32 = row.get("is_read");
    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        message: row.get("message"),
        kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::Info),
        link: row.get("link"),
        is_read: is_read != 0,
        created_at: row.get("created_at"),
    }
}

fn campaign_from_row(row: &sqlx::sqlite::SqliteRow) -> EmailCampaign {
    let channel: String = row.get("channel");
    let provider: String = row.get("provider");
    let status: String = row.get("status");
    EmailCampaign {
        id: row.get("id"),
        subject: row.get("subject"),
        html_body: row.get("html_body"),
        channel: CampaignChannel::parse(&channel).unwrap_or(CampaignChannel::Email),
        provider: EmailProvider::parse(&provider).unwrap_or(EmailProvider::SmtpRelay),
        status: CampaignStatus::parse(&status).unwrap_or(CampaignStatus::Failed),
        total_recipients: row.get("total_recipients"),
        sent_count: row.get("sent_count"),
        failed_count: row.get("failed_count"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}

fn email_from_row(row: &sqlx::sqlite::SqliteRow) -> EmailNotification {
    let status: String = row.get("status");
    EmailNotification {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        recipient: row.get("recipient"),
        subject: row.get("subject"),
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Pending),
        error: row.get("error"),
        attempts: row.get("attempts"),
        sent_at: row.get("sent_at"),
        created_at: row.get("created_at"),
    }
}
