//! Outbound email.
//!
//! A [`Mailer`] delivers one message through one provider. The two HTTP
//! transports ([`GmailMailer`], [`RelayMailer`]) back the bulk email
//! functions; [`LogMailer`] stands in when a transport is unconfigured.
//! [`BulkSender`] runs a campaign over a recipient list.

mod bulk;
mod gmail;
mod relay;

pub use bulk::{is_plausible_email, BulkSender, PreparedCampaign};
pub use gmail::GmailMailer;
pub use relay::RelayMailer;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmailConfig;
use crate::errors::AppError;
use crate::models::EmailProvider;

/// Per-request timeout of the HTTP transports.
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(15);

/// One message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from_address: String,
    pub from_name: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Delivery failure of a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// Connection, timeout or decoding failure
    Transport(String),
    /// The provider answered with a non-success status
    Rejected { status: u16, message: String },
}

impl EmailError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmailError::Transport(_) => true,
            EmailError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl std::fmt::Display for EmailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailError::Transport(msg) => write!(f, "transport error: {}", msg),
            EmailError::Rejected { status, message } => {
                write!(f, "rejected with status {}: {}", status, message)
            }
        }
    }
}

impl std::error::Error for EmailError {}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::Email(err.to_string())
    }
}

fn transport_error(err: reqwest::Error) -> EmailError {
    EmailError::Transport(err.to_string())
}

/// Map a non-success provider response to [`EmailError::Rejected`].
async fn rejection(response: reqwest::Response) -> EmailError {
    let status = response.status().as_u16();
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > 200 {
        let cut = (0..=200).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
        message.truncate(cut);
    }
    EmailError::Rejected { status, message }
}

/// A delivery channel for single messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Provider recorded on campaigns run through this mailer.
    fn provider(&self) -> EmailProvider;

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError>;
}

/// Mailer that logs instead of delivering.
pub struct LogMailer {
    provider: EmailProvider,
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: HashSet<String>,
}

impl LogMailer {
    pub fn new(provider: EmailProvider) -> Self {
        Self {
            provider,
            sent: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    /// A mailer that rejects the given recipients.
    #[cfg(test)]
    pub fn failing_for(provider: EmailProvider, recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_lowercase()).collect(),
            ..Self::new(provider)
        }
    }

    /// Messages accepted so far.
    #[cfg(test)]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    fn provider(&self) -> EmailProvider {
        self.provider
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), EmailError> {
        if self.failing.contains(&email.to.to_lowercase()) {
            return Err(EmailError::Rejected {
                status: 550,
                message: format!("mailbox unavailable: {}", email.to),
            });
        }
        tracing::info!(
            provider = self.provider.as_str(),
            to = %email.to,
            subject = %email.subject,
            "Email delivery skipped: transport not configured"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

/// The mailers behind the two bulk email functions.
#[derive(Clone)]
pub struct Mailers {
    pub gmail: Arc<dyn Mailer>,
    pub relay: Arc<dyn Mailer>,
}

impl Mailers {
    /// Build the configured transports, falling back to [`LogMailer`].
    pub fn from_config(config: &EmailConfig) -> Result<Self, AppError> {
        let gmail: Arc<dyn Mailer> = match &config.gmail_access_token {
            Some(token) => Arc::new(GmailMailer::new(
                &config.gmail_api_url,
                token,
                TRANSPORT_TIMEOUT,
            )?),
            None => {
                tracing::warn!("HUB_GMAIL_ACCESS_TOKEN not set; Gmail sends are only logged");
                Arc::new(LogMailer::new(EmailProvider::Gmail))
            }
        };

        let relay: Arc<dyn Mailer> = match (&config.relay_url, &config.relay_api_key) {
            (Some(url), Some(key)) => Arc::new(RelayMailer::new(url, key, TRANSPORT_TIMEOUT)?),
            _ => {
                tracing::warn!("HUB_RELAY_URL/HUB_RELAY_API_KEY not set; relay sends are only logged");
                Arc::new(LogMailer::new(EmailProvider::SmtpRelay))
            }
        };

        Ok(Self { gmail, relay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            from_address: "hub@example.com".to_string(),
            from_name: "Hub".to_string(),
            to: to.to_string(),
            subject: "Hello".to_string(),
            html: "<p>Hi</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_mailer_records_and_fails_on_demand() {
        let mailer = LogMailer::failing_for(EmailProvider::Gmail, &["Bad@Example.com"]);

        mailer.send(&message("good@example.com")).await.unwrap();
        let err = mailer.send(&message("bad@example.com")).await.unwrap_err();

        assert!(matches!(err, EmailError::Rejected { status: 550, .. }));
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.sent()[0].to, "good@example.com");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(EmailError::Transport("timeout".to_string()).is_retryable());
        assert!(EmailError::Rejected { status: 503, message: String::new() }.is_retryable());
        assert!(EmailError::Rejected { status: 429, message: String::new() }.is_retryable());
        assert!(!EmailError::Rejected { status: 400, message: String::new() }.is_retryable());
    }

    #[test]
    fn test_unconfigured_transports_fall_back_to_log() {
        let mailers = Mailers::from_config(&EmailConfig::default()).unwrap();
        assert_eq!(mailers.gmail.provider(), EmailProvider::Gmail);
        assert_eq!(mailers.relay.provider(), EmailProvider::SmtpRelay);
    }
}
