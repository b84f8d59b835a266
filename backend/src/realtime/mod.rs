//! Realtime change feed.
//!
//! Every committed write publishes a [`ChangeEvent`] on a process-wide
//! broadcast channel. WebSocket sessions (see [`socket`]) hold one receiver
//! each and forward the events matching their subscriptions, after the same
//! ownership rules the REST handlers apply.

mod socket;

pub use socket::realtime_handler;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{now_timestamp, string_enum};

string_enum! {
    /// Tables that publish change events.
    Table {
        Opportunities => "opportunities",
        Bookmarks => "bookmarks",
        Notifications => "notifications",
        Profiles => "profiles",
        UserRoles => "user_roles",
        Ads => "ads",
        EmailCampaigns => "email_campaigns",
    }
}

string_enum! {
    /// Kind of row change.
    ChangeKind {
        Insert => "INSERT",
        Update => "UPDATE",
        Delete => "DELETE",
    }
}

/// One committed row change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: Table,
    pub event_type: ChangeKind,
    /// New row; `null` for deletes
    pub record: Value,
    /// Previous row, sent for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
    /// User that owns the row, for owner-scoped tables
    #[serde(skip)]
    pub owner_id: Option<String>,
    pub commit_timestamp: String,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: Table, record: &T, owner_id: Option<&str>) -> Self {
        Self::new(table, ChangeKind::Insert, to_value(record), None, owner_id)
    }

    pub fn update<T: Serialize>(table: Table, record: &T, owner_id: Option<&str>) -> Self {
        Self::new(table, ChangeKind::Update, to_value(record), None, owner_id)
    }

    pub fn delete<T: Serialize>(table: Table, old_record: &T, owner_id: Option<&str>) -> Self {
        Self::new(
            table,
            ChangeKind::Delete,
            Value::Null,
            Some(to_value(old_record)),
            owner_id,
        )
    }

    fn new(
        table: Table,
        event_type: ChangeKind,
        record: Value,
        old_record: Option<Value>,
        owner_id: Option<&str>,
    ) -> Self {
        Self {
            table,
            event_type,
            record,
            old_record,
            owner_id: owner_id.map(str::to_string),
            commit_timestamp: now_timestamp(),
        }
    }

    /// The row the event is about: the new row, or the old one for deletes.
    pub fn row(&self) -> &Value {
        match (&self.event_type, &self.old_record) {
            (ChangeKind::Delete, Some(old)) => old,
            _ => &self.record,
        }
    }

    fn row_str(&self, field: &str) -> Option<&str> {
        self.row().get(field).and_then(Value::as_str)
    }

    /// Row-level visibility of this event for a (possibly anonymous) viewer.
    pub fn is_visible_to(&self, viewer: Option<&AuthUser>) -> bool {
        let is_owner = match (viewer, self.owner_id.as_deref()) {
            (Some(user), Some(owner)) => user.user_id == owner,
            _ => false,
        };
        let is_admin = viewer.is_some_and(AuthUser::is_admin);
        let is_moderator = viewer.is_some_and(AuthUser::is_moderator);

        match self.table {
            Table::EmailCampaigns => is_admin,
            Table::Profiles | Table::UserRoles | Table::Notifications | Table::Bookmarks => {
                is_owner || is_admin
            }
            Table::Opportunities => {
                self.row_str("status") == Some("approved") || is_owner || is_moderator
            }
            Table::Ads => self.row_str("status") == Some("active") || is_owner || is_admin,
        }
    }
}

fn to_value<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or_else(|e| {
        tracing::warn!("Failed to serialize change record: {}", e);
        Value::Null
    })
}

/// Platform-style row filter `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let invalid = || {
            AppError::Validation(format!(
                "Invalid filter '{}': expected column=eq.value",
                raw
            ))
        };
        let (column, rest) = raw.split_once('=').ok_or_else(invalid)?;
        let value = rest.strip_prefix("eq.").ok_or_else(invalid)?;
        let column = column.trim();
        if column.is_empty() || value.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    /// Compare against the row, accepting the column in snake_case or
    /// the wire's camelCase.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row
            .get(&self.column)
            .or_else(|| row.get(snake_to_camel(&self.column)));
        match field {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

fn snake_to_camel(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper = false;
    for c in column.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// A client subscription on one table, optionally filtered.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub table: Table,
    pub filter: Option<RowFilter>,
}

impl Subscription {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(event.row()))
    }
}

/// Process-wide publisher of change events.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Arc<ChangeEvent>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; returns the number of live receivers.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        tracing::debug!(
            table = event.table.as_str(),
            event_type = event.event_type.as_str(),
            "Publishing change event"
        );
        // No receivers is not an error: nobody is listening.
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.sender.subscribe()
    }
}
