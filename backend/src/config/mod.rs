//! Configuration module for the Opportunity Hub backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_GMAIL_API_URL: &str =
    "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Accepted session lifetimes, in hours (up to ten years).
const SESSION_TTL_HOURS: RangeInclusive<u64> = 1..=87_600;

/// Accepted retention windows for expired opportunities, in days.
const RETENTION_DAYS: RangeInclusive<i64> = 0..=36_500;

/// Accepted realtime re-authentication intervals, in seconds.
const REALTIME_REAUTH_SECS: RangeInclusive<u64> = 1..=3_600;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Outbound email settings shared by both bulk senders.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Sender address
    pub from_address: String,
    /// Sender display name
    pub from_name: String,
    /// Fixed pause between two recipients
    pub delay: Duration,
    /// Recipients processed between two progress checkpoints
    pub batch_size: usize,
    /// Attempts per recipient (1 disables retrying)
    pub max_attempts: u32,
    /// OAuth access token for the Gmail API transport
    pub gmail_access_token: Option<String>,
    /// Gmail API send endpoint
    pub gmail_api_url: String,
    /// SMTP-relay HTTP API endpoint
    pub relay_url: Option<String>,
    /// SMTP-relay API key
    pub relay_api_key: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: "no-reply@localhost".to_string(),
            from_name: "Opportunity Hub".to_string(),
            delay: Duration::from_millis(200),
            batch_size: 50,
            max_attempts: 1,
            gmail_access_token: None,
            gmail_api_url: DEFAULT_GMAIL_API_URL.to_string(),
            relay_url: None,
            relay_api_key: None,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Service key guarding the function endpoints (unset disables the check)
    pub service_key: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Lifetime of a sign-in session
    pub session_ttl: Duration,
    /// Emails that receive the admin role on sign-up (lowercased)
    pub admin_emails: Vec<String>,
    /// Interval of the expiry sweep; `None` disables the scheduler
    pub expire_sweep_interval: Option<Duration>,
    /// Days an expired opportunity is kept before deletion
    pub expired_retention_days: i64,
    /// Capacity of the realtime broadcast buffer
    pub realtime_capacity: usize,
    /// How often an open realtime socket re-checks its session
    pub realtime_reauth_interval: Duration,
    /// Outbound email settings
    pub email: EmailConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let service_key = env::var("HUB_SERVICE_KEY").ok().filter(|k| !k.is_empty());

        let db_path = env::var("HUB_DB_PATH")
            .unwrap_or_else(|_| "./data/hub.sqlite".to_string())
            .into();

        let index_path = env::var("HUB_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = parse_var("HUB_BIND_ADDR", "127.0.0.1:8080".parse().ok())?;

        let log_level = env::var("HUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("HUB_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "Invalid HUB_LOG_FORMAT '{}': expected text or json",
                    other
                )))
            }
        };

        let session_ttl_hours = within(
            "HUB_SESSION_TTL_HOURS",
            parse_var("HUB_SESSION_TTL_HOURS", Some(168))?,
            SESSION_TTL_HOURS,
        )?;

        let admin_emails = env::var("HUB_ADMIN_EMAILS")
            .map(|list| parse_email_list(&list))
            .unwrap_or_default();

        let sweep_secs: u64 = parse_var("HUB_EXPIRE_SWEEP_SECS", Some(3600))?;
        let expire_sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let expired_retention_days = within(
            "HUB_EXPIRED_RETENTION_DAYS",
            parse_var("HUB_EXPIRED_RETENTION_DAYS", Some(30))?,
            RETENTION_DAYS,
        )?;
        let realtime_capacity = parse_var("HUB_REALTIME_CAPACITY", Some(1024))?;
        let reauth_secs = within(
            "HUB_REALTIME_REAUTH_SECS",
            parse_var("HUB_REALTIME_REAUTH_SECS", Some(30))?,
            REALTIME_REAUTH_SECS,
        )?;

        let defaults = EmailConfig::default();
        let email = EmailConfig {
            from_address: env::var("HUB_EMAIL_FROM").unwrap_or(defaults.from_address),
            from_name: env::var("HUB_EMAIL_FROM_NAME").unwrap_or(defaults.from_name),
            delay: Duration::from_millis(parse_var("HUB_EMAIL_DELAY_MS", Some(200))?),
            batch_size: parse_var::<usize>("HUB_EMAIL_BATCH_SIZE", Some(defaults.batch_size))?
                .max(1),
            max_attempts: parse_var::<u32>("HUB_EMAIL_MAX_ATTEMPTS", Some(1))?.max(1),
            gmail_access_token: env::var("HUB_GMAIL_ACCESS_TOKEN").ok(),
            gmail_api_url: env::var("HUB_GMAIL_API_URL").unwrap_or(defaults.gmail_api_url),
            relay_url: env::var("HUB_RELAY_URL").ok(),
            relay_api_key: env::var("HUB_RELAY_API_KEY").ok(),
        };

        Ok(Self {
            service_key,
            db_path,
            index_path,
            bind_addr,
            log_level,
            log_format,
            session_ttl: Duration::from_secs(session_ttl_hours * 3600),
            admin_emails,
            expire_sweep_interval,
            expired_retention_days,
            realtime_capacity,
            realtime_reauth_interval: Duration::from_secs(reauth_secs),
            email,
        })
    }

    /// Whether signing up with this address grants the admin role.
    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|admin| *admin == email)
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: Option<T>) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid value for {}: '{}'", name, raw))),
        Err(_) => default.ok_or_else(|| AppError::Internal(format!("{} is required", name))),
    }
}

/// Reject a parsed value outside its accepted range.
fn within<T: PartialOrd + Display>(
    name: &str,
    value: T,
    range: RangeInclusive<T>,
) -> Result<T, AppError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(AppError::Internal(format!(
            "{} must be between {} and {}, got {}",
            name,
            range.start(),
            range.end(),
            value
        )))
    }
}

fn parse_email_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for var in [
            "HUB_SERVICE_KEY",
            "HUB_DB_PATH",
            "HUB_INDEX_PATH",
            "HUB_BIND_ADDR",
            "HUB_LOG_LEVEL",
            "HUB_LOG_FORMAT",
            "HUB_ADMIN_EMAILS",
            "HUB_EXPIRE_SWEEP_SECS",
            "HUB_EMAIL_DELAY_MS",
            "HUB_SESSION_TTL_HOURS",
            "HUB_EXPIRED_RETENTION_DAYS",
            "HUB_REALTIME_REAUTH_SECS",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env().unwrap();

        assert!(config.service_key.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/hub.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.expire_sweep_interval, Some(Duration::from_secs(3600)));
        assert_eq!(config.email.delay, Duration::from_millis(200));
        assert!(config.admin_emails.is_empty());
        assert_eq!(config.session_ttl, Duration::from_secs(168 * 3600));
        assert_eq!(config.expired_retention_days, 30);
        assert_eq!(config.realtime_reauth_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_retention_days_out_of_range_is_rejected() {
        assert_eq!(within("HUB_EXPIRED_RETENTION_DAYS", 0, RETENTION_DAYS).unwrap(), 0);
        assert!(matches!(
            within("HUB_EXPIRED_RETENTION_DAYS", 100_000_000, RETENTION_DAYS),
            Err(AppError::Internal(_))
        ));
        assert!(matches!(
            within("HUB_EXPIRED_RETENTION_DAYS", -1, RETENTION_DAYS),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn test_session_ttl_out_of_range_is_rejected() {
        assert_eq!(within("HUB_SESSION_TTL_HOURS", 168, SESSION_TTL_HOURS).unwrap(), 168);
        assert!(within("HUB_SESSION_TTL_HOURS", 0, SESSION_TTL_HOURS).is_err());
        let err = within("HUB_SESSION_TTL_HOURS", u64::MAX / 3600 + 1, SESSION_TTL_HOURS)
            .unwrap_err();
        assert!(err.message().contains("HUB_SESSION_TTL_HOURS"));
    }

    #[test]
    fn test_parse_email_list_normalizes() {
        let list = parse_email_list(" Admin@Example.com, ,ops@example.com ");
        assert_eq!(list, vec!["admin@example.com", "ops@example.com"]);
    }
}
