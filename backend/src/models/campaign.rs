//! Bulk email campaign and per-recipient send records.

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Delivery channel of a campaign.
    CampaignChannel {
        Email => "email",
        InApp => "in_app",
    }
}

string_enum! {
    /// Provider that carried a campaign.
    EmailProvider {
        Gmail => "gmail",
        SmtpRelay => "smtp_relay",
        InApp => "in_app",
    }
}

string_enum! {
    /// Progress of a campaign run.
    CampaignStatus {
        Sending => "sending",
        Completed => "completed",
        CompletedWithErrors => "completed_with_errors",
        Failed => "failed",
    }
}

string_enum! {
    /// Outcome of a single recipient's send.
    DeliveryStatus {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

impl CampaignStatus {
    /// Final status given the run's counters.
    pub fn from_counts(sent: i64, failed: i64) -> Self {
        match (sent, failed) {
            (_, 0) => CampaignStatus::Completed,
            (0, _) => CampaignStatus::Failed,
            _ => CampaignStatus::CompletedWithErrors,
        }
    }
}

/// An administrator-initiated batch message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailCampaign {
    pub id: String,
    pub subject: String,
    pub html_body: String,
    pub channel: CampaignChannel,
    pub provider: EmailProvider,
    pub status: CampaignStatus,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// One recipient's send record within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailNotification {
    pub id: String,
    pub campaign_id: String,
    pub recipient: String,
    pub subject: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    pub created_at: String,
}

/// Campaign header plus its per-recipient records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: EmailCampaign,
    pub emails: Vec<EmailNotification>,
}

/// Body accepted by both bulk email functions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEmailRequest {
    /// Explicit recipient addresses
    #[serde(default)]
    pub recipients: Vec<String>,
    /// `"all"` or a role name; resolved to opted-in profile emails
    #[serde(default)]
    pub audience: Option<String>,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Spawn the run and answer immediately with the campaign id
    #[serde(default)]
    pub background: bool,
}

/// A recipient that could not be delivered to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub error: String,
}

/// End-of-run summary of a bulk send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendSummary {
    pub campaign_id: String,
    pub status: CampaignStatus,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub failures: Vec<DeliveryFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(CampaignStatus::from_counts(3, 0), CampaignStatus::Completed);
        assert_eq!(CampaignStatus::from_counts(0, 0), CampaignStatus::Completed);
        assert_eq!(CampaignStatus::from_counts(0, 2), CampaignStatus::Failed);
        assert_eq!(
            CampaignStatus::from_counts(2, 1),
            CampaignStatus::CompletedWithErrors
        );
    }
}
