//! Data models for the Opportunity Hub application.
//!
//! These models match the frontend TypeScript interfaces (camelCase on the wire).

/// Declares a string-backed enum with `as_str`/`parse` helpers and
/// snake_case serde names.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

mod ad;
mod bookmark;
mod campaign;
mod notification;
mod opportunity;
mod profile;

pub use ad::*;
pub use bookmark::*;
pub use campaign::*;
pub use notification::*;
pub use opportunity::*;
pub use profile::*;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Format a timestamp the way every stored timestamp is written.
///
/// A single fixed format keeps lexical and chronological order identical,
/// so SQL comparisons on the text columns are correct.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time in storage format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a client-supplied instant: RFC 3339, or a bare `YYYY-MM-DD`
/// meaning the last second of that day in UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}
