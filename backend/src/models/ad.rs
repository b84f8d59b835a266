//! Advertiser campaign model.

use serde::{Deserialize, Serialize};

use super::string_enum;

string_enum! {
    /// Where an ad is rendered.
    AdPlacement {
        Banner => "banner",
        Sidebar => "sidebar",
        Feed => "feed",
    }
}

string_enum! {
    /// Review/delivery state of an ad.
    AdStatus {
        Pending => "pending",
        Active => "active",
        Paused => "paused",
        Rejected => "rejected",
        Ended => "ended",
    }
}

/// An advertiser's campaign with its delivery metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    pub id: String,
    pub advertiser_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub target_url: String,
    pub placement: AdPlacement,
    pub status: AdStatus,
    pub budget_cents: i64,
    pub impressions: i64,
    pub clicks: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl Ad {
    /// Click-through rate; zero before the first impression.
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }
}

/// Request body for creating an ad.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub target_url: String,
    #[serde(default = "default_placement")]
    pub placement: AdPlacement,
    #[serde(default)]
    pub budget_cents: i64,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
}

fn default_placement() -> AdPlacement {
    AdPlacement::Banner
}

/// Request body for updating an ad.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAdRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub placement: Option<AdPlacement>,
    #[serde(default)]
    pub budget_cents: Option<i64>,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters for active ads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActiveAdsQuery {
    #[serde(default)]
    pub placement: Option<AdPlacement>,
}

/// Metrics view of an ad.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMetrics {
    pub ad_id: String,
    pub impressions: i64,
    pub clicks: i64,
    pub ctr: f64,
    pub budget_cents: i64,
    pub status: AdStatus,
}

impl From<&Ad> for AdMetrics {
    fn from(ad: &Ad) -> Self {
        Self {
            ad_id: ad.id.clone(),
            impressions: ad.impressions,
            clicks: ad.clicks,
            ctr: ad.ctr(),
            budget_cents: ad.budget_cents,
            status: ad.status,
        }
    }
}
