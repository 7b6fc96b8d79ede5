//! Visibility gate
//!
//! Followed authors' items only reach the feed when the notification
//! subsystem sampled the viewer into the item's in-feed audience. Everything
//! else (discovery content from authors the viewer does not follow) passes
//! untouched.
//!
//! The gate fails open: a missing record, or a record lookup that errors out,
//! leaves the item visible.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics;
use crate::models::VisibilityRecord;
use crate::utils::{seeded_shuffle, SeededStream};

/// Default share of followers that see a new item in-feed
pub const DEFAULT_FOLLOWER_FEED_FRACTION: f64 = 0.15;

/// Read/write access to per-viewer sampling records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisibilityStore: Send + Sync {
    /// `show_in_feed` flags for the items that have a record for `viewer_id`
    async fn lookup(
        &self,
        viewer_id: Uuid,
        item_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError>;

    /// Persist a sampling plan produced by [`plan_feed_sampling`]
    async fn record_plan(&self, records: &[VisibilityRecord]) -> Result<(), StoreError>;
}

/// Loaded sampling flags for one request
#[derive(Debug, Clone, Default)]
pub struct VisibilityDecisions {
    records: HashMap<Uuid, bool>,
}

impl VisibilityDecisions {
    pub fn new(records: HashMap<Uuid, bool>) -> Self {
        Self { records }
    }

    pub fn is_eligible(&self, item_id: Uuid, is_following: bool) -> bool {
        if !is_following {
            return true;
        }
        self.records.get(&item_id).copied().unwrap_or(true)
    }
}

pub struct VisibilityGate {
    store: Arc<dyn VisibilityStore>,
}

impl VisibilityGate {
    pub fn new(store: Arc<dyn VisibilityStore>) -> Self {
        Self { store }
    }

    /// Load flags for the followed-author items of a request.
    ///
    /// Never fails: a store error is logged and treated as "no records".
    pub async fn load(&self, viewer_id: Uuid, followed_item_ids: &[Uuid]) -> VisibilityDecisions {
        if followed_item_ids.is_empty() {
            return VisibilityDecisions::default();
        }

        match self.store.lookup(viewer_id, followed_item_ids).await {
            Ok(records) => {
                debug!(
                    viewer_id = %viewer_id,
                    requested = followed_item_ids.len(),
                    found = records.len(),
                    "Visibility records loaded"
                );
                VisibilityDecisions::new(records)
            }
            Err(e) => {
                warn!(
                    viewer_id = %viewer_id,
                    error = %e,
                    "Visibility lookup failed, keeping followed items visible"
                );
                metrics::record_visibility_fail_open();
                VisibilityDecisions::default()
            }
        }
    }
}

/// Decide which followers see a freshly published item in-feed.
///
/// `ceil(followers * fraction)` followers get `show_in_feed = true`, the rest
/// are notification-only. The pick is a Fisher-Yates shuffle seeded by the item
/// id over the sorted follower set, so replaying the same publish event yields
/// the same audience.
pub fn plan_feed_sampling(item_id: Uuid, followers: &[Uuid], fraction: f64) -> Vec<VisibilityRecord> {
    if followers.is_empty() {
        return Vec::new();
    }

    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        DEFAULT_FOLLOWER_FEED_FRACTION
    };
    let mut ordered: Vec<Uuid> = followers.to_vec();
    ordered.sort();
    ordered.dedup();
    let feed_count = ((ordered.len() as f64 * fraction).ceil() as usize).min(ordered.len());

    let seed: [&[u8]; 2] = [b"feed-sampling", item_id.as_bytes()];
    seeded_shuffle(&mut ordered, &seed);
    debug!(
        item_id = %item_id,
        seed = %SeededStream::new(&seed).fingerprint(),
        feed_count = feed_count,
        "Feed sampling planned"
    );

    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, viewer_id)| VisibilityRecord {
            viewer_id,
            item_id,
            show_in_feed: idx < feed_count,
        })
        .collect()
}

/// Plan and persist the in-feed audience of a freshly published item.
///
/// Returns how many followers were selected for the feed.
pub async fn record_feed_sampling(
    store: &dyn VisibilityStore,
    item_id: Uuid,
    followers: &[Uuid],
    fraction: f64,
) -> Result<usize, StoreError> {
    let plan = plan_feed_sampling(item_id, followers, fraction);
    let selected = plan.iter().filter(|r| r.show_in_feed).count();
    store.record_plan(&plan).await?;

    debug!(
        item_id = %item_id,
        followers = plan.len(),
        selected = selected,
        "Feed sampling recorded"
    );
    Ok(selected)
}
