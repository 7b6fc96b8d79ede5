use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::services::distribution::DistributionStage;

/// Account kind of the author, as far as ranking cares.
///
/// The user directory also knows `driver` accounts; they rank as individuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorType {
    Individual,
    Company,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorType::Individual => "individual",
            AuthorType::Company => "company",
        }
    }

    pub fn from_user_type(user_type: &str) -> Option<Self> {
        match user_type {
            "company" => Some(AuthorType::Company),
            "individual" | "driver" => Some(AuthorType::Individual),
            _ => None,
        }
    }
}

/// Content variant stored alongside each feed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentVariant {
    Post,
    ShipmentAd,
    EmptyTruckAd,
}

impl ContentVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentVariant::Post => "post",
            ContentVariant::ShipmentAd => "shipmentAd",
            ContentVariant::EmptyTruckAd => "emptyTruckAd",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "post" => Some(ContentVariant::Post),
            "shipmentAd" | "shipment_ad" => Some(ContentVariant::ShipmentAd),
            "emptyTruckAd" | "empty_truck_ad" => Some(ContentVariant::EmptyTruckAd),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub text: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentAdContent {
    pub pickup_location: String,
    pub delivery_location: String,
    #[serde(default)]
    pub pickup_date: Option<DateTime<Utc>>,
    pub truck_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyTruckAdContent {
    pub current_location: String,
    pub preferred_destination: String,
    #[serde(default)]
    pub availability_date: Option<DateTime<Utc>>,
    pub truck_type: String,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

/// Variant-specific payload. Ranking never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "itemType", rename_all = "camelCase")]
pub enum FeedContent {
    Post(PostContent),
    ShipmentAd(ShipmentAdContent),
    EmptyTruckAd(EmptyTruckAdContent),
}

impl FeedContent {
    pub fn variant(&self) -> ContentVariant {
        match self {
            FeedContent::Post(_) => ContentVariant::Post,
            FeedContent::ShipmentAd(_) => ContentVariant::ShipmentAd,
            FeedContent::EmptyTruckAd(_) => ContentVariant::EmptyTruckAd,
        }
    }

    /// Decode the stored JSON payload for a given variant
    pub fn from_payload(
        variant: ContentVariant,
        payload: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match variant {
            ContentVariant::Post => FeedContent::Post(serde_json::from_value(payload)?),
            ContentVariant::ShipmentAd => {
                FeedContent::ShipmentAd(serde_json::from_value(payload)?)
            }
            ContentVariant::EmptyTruckAd => {
                FeedContent::EmptyTruckAd(serde_json::from_value(payload)?)
            }
        })
    }
}

/// Minimal author fields pre-populated by the content store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: Uuid,
    pub author_type: AuthorType,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

/// Persisted per-item tallies kept by the engagement accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCounters {
    pub impressions: u64,
    pub distinct_viewers: u64,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub video_completions: u64,
}

/// Persisted rollout flag for one item. `granted` only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutState {
    pub granted: DistributionStage,
    pub throttled: bool,
}

impl Default for RolloutState {
    fn default() -> Self {
        Self {
            granted: DistributionStage::Testing,
            throttled: false,
        }
    }
}

/// A ranked candidate: common header plus variant payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: Uuid,
    pub author: AuthorSummary,
    pub created_at: DateTime<Utc>,
    pub reaction_count: u32,
    pub comment_count: u32,
    pub counters: ItemCounters,
    pub rollout: RolloutState,
    pub content: FeedContent,
}

impl FeedItem {
    pub fn author_id(&self) -> Uuid {
        self.author.id
    }

    pub fn author_type(&self) -> AuthorType {
        self.author.author_type
    }

    pub fn variant(&self) -> ContentVariant {
        self.content.variant()
    }

    /// Strip ranking-internal state for the response body
    pub fn into_entry(self) -> FeedEntry {
        FeedEntry {
            id: self.id,
            author: self.author,
            created_at: self.created_at,
            reaction_count: self.reaction_count,
            comment_count: self.comment_count,
            content: self.content,
        }
    }
}

/// Why a candidate row could not become a [`FeedItem`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedItem {
    #[error("missing author")]
    MissingAuthor,
    #[error("missing created_at timestamp")]
    MissingTimestamp,
    #[error("unknown author type: {0}")]
    UnknownAuthorType(String),
    #[error("unknown content variant: {0}")]
    UnknownVariant(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Raw candidate row as handed over by the content store.
///
/// Author fields come from an outer join, so any of them may be missing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub variant: String,
    pub author_id: Option<Uuid>,
    pub author_user_type: Option<String>,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
    pub author_company_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub reaction_count: i64,
    pub comment_count: i64,
    pub payload: serde_json::Value,
}

impl CandidateRecord {
    pub fn validate(self) -> Result<FeedItem, MalformedItem> {
        let author_id = self.author_id.ok_or(MalformedItem::MissingAuthor)?;
        let name = self.author_name.ok_or(MalformedItem::MissingAuthor)?;
        let user_type = self.author_user_type.ok_or(MalformedItem::MissingAuthor)?;
        let author_type = AuthorType::from_user_type(&user_type)
            .ok_or(MalformedItem::UnknownAuthorType(user_type))?;
        let created_at = self.created_at.ok_or(MalformedItem::MissingTimestamp)?;
        let variant = ContentVariant::parse(&self.variant)
            .ok_or_else(|| MalformedItem::UnknownVariant(self.variant.clone()))?;
        let content = FeedContent::from_payload(variant, self.payload)
            .map_err(|e| MalformedItem::InvalidPayload(e.to_string()))?;

        Ok(FeedItem {
            id: self.id,
            author: AuthorSummary {
                id: author_id,
                author_type,
                name,
                avatar: self.author_avatar,
                company_name: self.author_company_name,
            },
            created_at,
            reaction_count: clamp_count(self.reaction_count),
            comment_count: clamp_count(self.comment_count),
            counters: ItemCounters::default(),
            rollout: RolloutState::default(),
            content,
        })
    }
}

fn clamp_count(raw: i64) -> u32 {
    raw.clamp(0, u32::MAX as i64) as u32
}

/// Viewer location used by the content store's scope filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Candidate query handed to the content store
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub viewer_id: Uuid,
    pub location: ViewerLocation,
    pub limit: i64,
}

/// Per-variant counts of items eligible for a viewer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantCounts {
    pub posts: i64,
    pub shipment_ads: i64,
    pub empty_truck_ads: i64,
}

/// One viewer x followed-author item sampling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRecord {
    pub viewer_id: Uuid,
    pub item_id: Uuid,
    pub show_in_feed: bool,
}

/// Feed entry as returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub id: Uuid,
    pub author: AuthorSummary,
    pub created_at: DateTime<Utc>,
    pub reaction_count: u32,
    pub comment_count: u32,
    #[serde(flatten)]
    pub content: FeedContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_items: usize,
    pub total_pages: usize,
    pub items_per_page: u32,
    pub has_more: bool,
}

/// Feed response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedEntry>,
    pub pagination: Pagination,
}

/// Diagnostics body for `GET /feed/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
    pub posts: i64,
    pub shipment_ads: i64,
    pub empty_truck_ads: i64,
    pub total_items: i64,
    pub following_count: usize,
    pub user_country: Option<String>,
}
