// Stale low-engagement dampening
//
// Old items that gather interactions slowly are thinned out of the candidate
// set. The keep/drop draw is seeded by (viewer, item) so a viewer sees the
// same thinning on every request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FeedItem;
use crate::utils::{age_hours, SeededStream};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DampeningConfig {
    pub enabled: bool,
    pub min_age_hours: f64,
    pub min_rate_per_hour: f64,
    pub keep_fraction: f64,
}

impl Default for DampeningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_age_hours: 6.0,
            min_rate_per_hour: 0.5,
            keep_fraction: 0.2,
        }
    }
}

/// Interactions per hour of age: `(reactions + comments + shares) / hours`
pub fn interaction_rate_per_hour(item: &FeedItem, now: DateTime<Utc>) -> f64 {
    let hours = age_hours(item.created_at, now);
    if hours <= 0.0 {
        return f64::INFINITY;
    }
    let interactions =
        item.reaction_count as f64 + item.comment_count as f64 + item.counters.shares as f64;
    interactions / hours
}

pub struct StaleDampener {
    config: DampeningConfig,
}

impl StaleDampener {
    pub fn new(config: DampeningConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether `item` stays in `viewer_id`'s candidate set
    pub fn keep(&self, viewer_id: Uuid, item: &FeedItem, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }
        if age_hours(item.created_at, now) <= self.config.min_age_hours {
            return true;
        }
        if interaction_rate_per_hour(item, now) >= self.config.min_rate_per_hour {
            return true;
        }

        let mut stream = SeededStream::new(&[b"dampening", viewer_id.as_bytes(), item.id.as_bytes()]);
        stream.next_fraction() < self.config.keep_fraction
    }

    /// Filter a candidate list, returning survivors and the number dropped
    pub fn apply(&self, viewer_id: Uuid, items: Vec<FeedItem>, now: DateTime<Utc>) -> (Vec<FeedItem>, usize) {
        if !self.config.enabled {
            return (items, 0);
        }
        let before = items.len();
        let kept: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| self.keep(viewer_id, item, now))
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}
