//! In-app notification model.

use serde::{Deserialize, Serialize};

use super::{string_enum, Role};

string_enum! {
    /// Presentation category of a notification.
    NotificationKind {
        Info => "info",
        Success => "success",
        Warning => "warning",
        Opportunity => "opportunity",
        System => "system",
    }
}

/// A per-user message with read state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

/// Content of a notification about to be inserted.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub link: Option<String>,
}

/// Query parameters for listing notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            unread: false,
            limit: default_limit(),
        }
    }
}

fn default_limit() -> i64 {
    50
}

/// Unread counter for badge display.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

/// Request body for an administrator's in-app broadcast.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub kind: Option<NotificationKind>,
    #[serde(default)]
    pub link: Option<String>,
    /// Restrict to holders of one role; everyone when absent
    #[serde(default)]
    pub role: Option<Role>,
}
