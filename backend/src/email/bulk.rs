//! Bulk email campaigns.
//!
//! A run is split in two so callers can answer before delivery finishes:
//! [`BulkSender::prepare`] validates the request, resolves recipients and
//! records the campaign; [`BulkSender::run`] delivers to each recipient in
//! turn. Failures are recorded and counted, never queued.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::{EmailError, Mailer, OutgoingEmail};
use crate::config::EmailConfig;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    BulkEmailRequest, BulkSendSummary, CampaignChannel, CampaignStatus, DeliveryFailure,
    DeliveryStatus, EmailCampaign, Role,
};
use crate::realtime::{ChangeEvent, ChangeFeed, Table};

/// Audience value selecting every opted-in profile.
const AUDIENCE_ALL: &str = "all";

/// A recorded campaign waiting to be delivered.
#[derive(Debug, Clone)]
pub struct PreparedCampaign {
    pub campaign: EmailCampaign,
    recipients: Vec<String>,
}

/// Runs campaigns through one mailer.
#[derive(Clone)]
pub struct BulkSender {
    repo: Arc<Repository>,
    feed: ChangeFeed,
    mailer: Arc<dyn Mailer>,
    config: EmailConfig,
}

impl BulkSender {
    pub fn new(
        repo: Arc<Repository>,
        feed: ChangeFeed,
        mailer: Arc<dyn Mailer>,
        config: EmailConfig,
    ) -> Self {
        Self {
            repo,
            feed,
            mailer,
            config,
        }
    }

    /// Prepare and deliver in one call.
    pub async fn send(&self, request: &BulkEmailRequest) -> Result<BulkSendSummary, AppError> {
        let prepared = self.prepare(request).await?;
        self.run(prepared).await
    }

    /// Validate the request, resolve its recipients and record the campaign.
    pub async fn prepare(&self, request: &BulkEmailRequest) -> Result<PreparedCampaign, AppError> {
        if request.subject.trim().is_empty() {
            return Err(AppError::Validation("Subject is required".to_string()));
        }
        if request.html.trim().is_empty() {
            return Err(AppError::Validation("HTML body is required".to_string()));
        }

        let mut candidates = request.recipients.clone();
        if let Some(audience) = request.audience.as_deref() {
            let role = match audience {
                AUDIENCE_ALL => None,
                other => Some(Role::parse(other).ok_or_else(|| {
                    AppError::Validation(format!("Unknown audience '{}'", other))
                })?),
            };
            candidates.extend(self.repo.list_notifiable_emails(role).await?);
        }

        let recipients = normalize_recipients(&candidates)?;
        if recipients.is_empty() {
            return Err(AppError::Validation(
                "At least one recipient is required".to_string(),
            ));
        }

        let campaign = self
            .repo
            .create_campaign(
                request.subject.trim(),
                &request.html,
                CampaignChannel::Email,
                self.mailer.provider(),
                recipients.len() as i64,
                request.created_by.as_deref(),
            )
            .await?;
        self.feed
            .publish(ChangeEvent::insert(Table::EmailCampaigns, &campaign, None));

        info!(
            campaign_id = %campaign.id,
            provider = campaign.provider.as_str(),
            recipients = recipients.len(),
            "Bulk email campaign created"
        );

        Ok(PreparedCampaign {
            campaign,
            recipients,
        })
    }

    /// Deliver a prepared campaign and finish it.
    pub async fn run(&self, prepared: PreparedCampaign) -> Result<BulkSendSummary, AppError> {
        let PreparedCampaign {
            campaign,
            recipients,
        } = prepared;
        let total = recipients.len();
        let batch_size = self.config.batch_size.max(1);

        let mut sent = 0i64;
        let mut failed = 0i64;
        let mut failures = Vec::new();

        for (index, recipient) in recipients.iter().enumerate() {
            if index > 0 && !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }

            let email = OutgoingEmail {
                from_address: self.config.from_address.clone(),
                from_name: self.config.from_name.clone(),
                to: recipient.clone(),
                subject: campaign.subject.clone(),
                html: campaign.html_body.clone(),
            };
            let (outcome, attempts) = self.deliver(&email).await;

            let (status, error) = match &outcome {
                Ok(()) => {
                    sent += 1;
                    (DeliveryStatus::Sent, None)
                }
                Err(e) => {
                    failed += 1;
                    warn!(campaign_id = %campaign.id, recipient = %recipient, "Email send failed: {}", e);
                    failures.push(DeliveryFailure {
                        recipient: recipient.clone(),
                        error: e.to_string(),
                    });
                    (DeliveryStatus::Failed, Some(e.to_string()))
                }
            };

            if let Err(e) = self
                .repo
                .record_email_attempt(
                    &campaign.id,
                    recipient,
                    &campaign.subject,
                    status,
                    error.as_deref(),
                    attempts as i64,
                )
                .await
            {
                warn!(campaign_id = %campaign.id, "Failed to record email attempt: {}", e);
            }

            let done = index + 1;
            if done % batch_size == 0 && done < total {
                match self
                    .repo
                    .update_campaign_progress(&campaign.id, sent, failed)
                    .await
                {
                    Ok(progress) => {
                        self.feed
                            .publish(ChangeEvent::update(Table::EmailCampaigns, &progress, None));
                    }
                    Err(e) => warn!(campaign_id = %campaign.id, "Failed to checkpoint campaign: {}", e),
                }
            }
        }

        let status = CampaignStatus::from_counts(sent, failed);
        let finished = self
            .repo
            .finish_campaign(&campaign.id, sent, failed, status)
            .await?;
        self.feed
            .publish(ChangeEvent::update(Table::EmailCampaigns, &finished, None));

        info!(
            campaign_id = %campaign.id,
            sent,
            failed,
            status = status.as_str(),
            "Bulk email campaign finished"
        );

        Ok(BulkSendSummary {
            campaign_id: campaign.id,
            status,
            total: total as i64,
            sent,
            failed,
            failures,
        })
    }

    /// Send one message, retrying retryable failures up to `max_attempts`.
    /// Returns the outcome and the number of attempts made.
    async fn deliver(&self, email: &OutgoingEmail) -> (Result<(), EmailError>, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.mailer.send(email).await {
                Ok(()) => return (Ok(()), attempt),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    warn!(to = %email.to, attempt, "Retrying email send: {}", e);
                    tokio::time::sleep(self.config.delay).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Trim, validate and de-duplicate (case-insensitively) recipient
/// addresses, keeping first-seen order and spelling.
fn normalize_recipients(candidates: &[String]) -> Result<Vec<String>, AppError> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    let mut invalid = Vec::new();

    for candidate in candidates {
        let address = candidate.trim();
        if address.is_empty() {
            continue;
        }
        if !is_plausible_email(address) {
            invalid.push(address.to_string());
            continue;
        }
        if seen.insert(address.to_lowercase()) {
            recipients.push(address.to_string());
        }
    }

    if !invalid.is_empty() {
        return Err(AppError::Validation(format!(
            "Invalid recipient address(es): {}",
            invalid.join(", ")
        )));
    }
    Ok(recipients)
}

/// Syntactic plausibility only: `local@domain.tld` without whitespace.
pub fn is_plausible_email(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !address.chars().any(|c| c.is_whitespace() || c.is_control())
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::email::LogMailer;
    use crate::models::EmailProvider;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup(mailer: Arc<LogMailer>) -> (BulkSender, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .unwrap();
        let repo = Arc::new(Repository::new(pool));
        let config = EmailConfig {
            delay: Duration::ZERO,
            batch_size: 2,
            ..EmailConfig::default()
        };
        let sender = BulkSender::new(repo.clone(), ChangeFeed::new(16), mailer, config);
        (sender, repo, temp_dir)
    }

    fn request(recipients: &[&str]) -> BulkEmailRequest {
        BulkEmailRequest {
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            subject: "New opportunities".to_string(),
            html: "<p>Check them out</p>".to_string(),
            ..BulkEmailRequest::default()
        }
    }

    #[test]
    fn test_plausible_email() {
        assert!(is_plausible_email("a@b.co"));
        assert!(!is_plausible_email("a@b"));
        assert!(!is_plausible_email("@b.co"));
        assert!(!is_plausible_email("a b@c.co"));
        assert!(!is_plausible_email("a@b@c.co"));
        assert!(!is_plausible_email("a@.co"));
    }

    #[test]
    fn test_recipients_deduplicated_case_insensitively() {
        let recipients = normalize_recipients(&[
            "Ana@Example.com".to_string(),
            " ana@example.com ".to_string(),
            "".to_string(),
            "bo@example.com".to_string(),
        ])
        .unwrap();
        assert_eq!(recipients, vec!["Ana@Example.com", "bo@example.com"]);

        assert!(normalize_recipients(&["nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_bulk_send_counts_failures() {
        let mailer = Arc::new(LogMailer::failing_for(
            EmailProvider::Gmail,
            &["broken@example.com"],
        ));
        let (sender, repo, _dir) = setup(mailer.clone()).await;

        let summary = sender
            .send(&request(&[
                "a@example.com",
                "broken@example.com",
                "b@example.com",
            ]))
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.status, CampaignStatus::CompletedWithErrors);
        assert_eq!(summary.failures[0].recipient, "broken@example.com");
        assert_eq!(mailer.sent().len(), 2);

        let campaign = repo.get_campaign(&summary.campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::CompletedWithErrors);
        assert_eq!(campaign.sent_count, 2);
        assert!(campaign.completed_at.is_some());

        let emails = repo.list_campaign_emails(&summary.campaign_id).await.unwrap();
        assert_eq!(emails.len(), 3);
        assert_eq!(emails[1].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_all_failed_marks_campaign_failed() {
        let mailer = Arc::new(LogMailer::failing_for(EmailProvider::Gmail, &["x@example.com"]));
        let (sender, _repo, _dir) = setup(mailer).await;

        let summary = sender.send(&request(&["x@example.com"])).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Failed);
    }

    #[tokio::test]
    async fn test_prepare_rejects_empty_input() {
        let mailer = Arc::new(LogMailer::new(EmailProvider::SmtpRelay));
        let (sender, _repo, _dir) = setup(mailer).await;

        assert!(matches!(
            sender.prepare(&request(&[])).await,
            Err(AppError::Validation(_))
        ));

        let mut no_subject = request(&["a@example.com"]);
        no_subject.subject = "  ".to_string();
        assert!(matches!(
            sender.prepare(&no_subject).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_audience = request(&[]);
        bad_audience.audience = Some("martians".to_string());
        assert!(matches!(
            sender.prepare(&bad_audience).await,
            Err(AppError::Validation(_))
        ));
    }
}
