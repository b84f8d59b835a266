//! Bookmark model.

use serde::{Deserialize, Serialize};

use super::Opportunity;

/// A user's saved opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub opportunity_id: String,
    pub created_at: String,
}

/// A bookmark joined with the opportunity it points to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkWithOpportunity {
    #[serde(flatten)]
    pub bookmark: Bookmark,
    pub opportunity: Opportunity,
}

/// Bookmark state after an add, remove or toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkState {
    pub opportunity_id: String,
    pub bookmarked: bool,
}
