//! Opportunity model matching the frontend Opportunity interface.

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Kind of listed opportunity.
    OpportunityType {
        Internship => "internship",
        Scholarship => "scholarship",
        Contest => "contest",
        Event => "event",
        Other => "other",
    }
}

string_enum! {
    /// Moderation/lifecycle state of an opportunity.
    OpportunityStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Expired => "expired",
    }
}

string_enum! {
    /// Ordering of the public listing.
    OpportunitySort {
        Newest => "newest",
        Deadline => "deadline",
        Popular => "popular",
    }
}

/// A listed internship, scholarship, contest or event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub title: String,
    pub description: String,
    pub opportunity_type: OpportunityType,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub is_remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    pub status: OpportunityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub featured: bool,
    pub views_count: i64,
    pub applications_count: i64,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Opportunity {
    /// Whether the opportunity belongs in the public listing at `now`.
    pub fn is_public_at(&self, now: &str) -> bool {
        self.status == OpportunityStatus::Approved
            && self.deadline.as_deref().map_or(true, |d| d >= now)
    }
}

/// Request body for submitting a new opportunity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOpportunityRequest {
    pub title: String,
    pub description: String,
    pub opportunity_type: OpportunityType,
    pub domain: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_remote: bool,
    #[serde(default)]
    pub apply_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// Request body for updating an existing opportunity.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOpportunityRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub opportunity_type: Option<OpportunityType>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_remote: Option<bool>,
    #[serde(default)]
    pub apply_url: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub deadline: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters of the public listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpportunityFilter {
    #[serde(default, rename = "type")]
    pub opportunity_type: Option<OpportunityType>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub featured: Option<bool>,
    /// Full-text query; routed through the search index when present
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub sort: Option<OpportunitySort>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

/// Request body for rejecting an opportunity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectOpportunityRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for featuring or un-featuring an opportunity.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureOpportunityRequest {
    pub featured: bool,
}

/// Result of recording a click-through to the application page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub applications_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_url: Option<String>,
}

/// Per-status opportunity counts for dashboards.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityStats {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub expired: i64,
    pub total_views: i64,
    pub total_applications: i64,
}
