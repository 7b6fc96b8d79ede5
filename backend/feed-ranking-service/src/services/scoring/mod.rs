//! Scoring engine
//!
//! Pure per-viewer scoring of a candidate item:
//! - Time score: piecewise linear decay over the item's age in hours
//! - Engagement score: reactions * 2 + comments * 3
//! - Relationship score: flat boost when the viewer follows the author
//! - Composite: 0.3 * time + 0.4 * engagement + 0.3 * relationship
//!
//! Nothing here touches I/O or shared state, so scores can be computed from
//! any number of request handlers at once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::FeedItem;
use crate::utils::age_hours;

pub const REACTION_WEIGHT: f64 = 2.0;
pub const COMMENT_WEIGHT: f64 = 3.0;
pub const FOLLOWING_BOOST: f64 = 30.0;

pub const TIME_WEIGHT: f64 = 0.3;
pub const ENGAGEMENT_WEIGHT: f64 = 0.4;
pub const RELATIONSHIP_WEIGHT: f64 = 0.3;

/// Per-request score breakdown. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedScore {
    pub time_score: f64,
    pub engagement_score: f64,
    pub relationship_score: f64,
    pub composite: f64,
}

impl FeedScore {
    pub fn new(time_score: f64, engagement_score: f64, relationship_score: f64) -> Self {
        Self {
            time_score,
            engagement_score,
            relationship_score,
            composite: TIME_WEIGHT * time_score
                + ENGAGEMENT_WEIGHT * engagement_score
                + RELATIONSHIP_WEIGHT * relationship_score,
        }
    }
}

/// A candidate together with its score for the current viewer
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: FeedItem,
    pub score: FeedScore,
    pub is_following: bool,
}

/// Engagement sub-score. Comments carry 1.5x the weight of reactions.
pub fn engagement_score(reaction_count: u32, comment_count: u32) -> f64 {
    reaction_count as f64 * REACTION_WEIGHT + comment_count as f64 * COMMENT_WEIGHT
}

/// Recency sub-score for an item `hours` old
///
/// | age (h)     | score                        |
/// |-------------|------------------------------|
/// | `< 24`      | `100 - 2h`                   |
/// | `24..72`    | `50 - (h - 24) / 2`          |
/// | `72..168`   | `25 - (h - 72) / 10`         |
/// | `>= 168`    | `max(1, 15 - (h - 168) / 100)` |
pub fn time_score(hours: f64) -> f64 {
    let hours = hours.max(0.0);
    if hours < 24.0 {
        100.0 - hours * 2.0
    } else if hours < 72.0 {
        50.0 - (hours - 24.0) / 2.0
    } else if hours < 168.0 {
        25.0 - (hours - 72.0) / 10.0
    } else {
        (15.0 - (hours - 168.0) / 100.0).max(1.0)
    }
}

pub fn relationship_score(is_following: bool) -> f64 {
    if is_following {
        FOLLOWING_BOOST
    } else {
        0.0
    }
}

/// Score a single item for a viewer
///
/// # Arguments
/// * `item` - Candidate item
/// * `is_following` - Whether the viewer follows the item's author
/// * `now` - Reference instant for the time decay
pub fn score_item(item: &FeedItem, is_following: bool, now: DateTime<Utc>) -> FeedScore {
    FeedScore::new(
        time_score(age_hours(item.created_at, now)),
        engagement_score(item.reaction_count, item.comment_count),
        relationship_score(is_following),
    )
}

/// Score every candidate, keeping the input order
pub fn score_all(
    items: Vec<FeedItem>,
    following: &HashSet<Uuid>,
    now: DateTime<Utc>,
) -> Vec<ScoredItem> {
    items
        .into_iter()
        .map(|item| {
            let is_following = following.contains(&item.author_id());
            let score = score_item(&item, is_following, now);
            ScoredItem {
                item,
                score,
                is_following,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorSummary, AuthorType, FeedContent, PostContent};
    use chrono::Duration;

    fn item(age: Duration, reactions: u32, comments: u32, now: DateTime<Utc>) -> FeedItem {
        FeedItem {
            id: Uuid::new_v4(),
            author: AuthorSummary {
                id: Uuid::new_v4(),
                author_type: AuthorType::Individual,
                name: "driver".to_string(),
                avatar: None,
                company_name: None,
            },
            created_at: now - age,
            reaction_count: reactions,
            comment_count: comments,
            counters: Default::default(),
            rollout: Default::default(),
            content: FeedContent::Post(PostContent::default()),
        }
    }

    #[test]
    fn test_engagement_score_weights() {
        assert_eq!(engagement_score(0, 0), 0.0);
        assert_eq!(engagement_score(10, 0), 20.0);
        assert_eq!(engagement_score(0, 10), 30.0);
        // comments are worth 1.5 reactions
        assert_eq!(engagement_score(3, 0), engagement_score(0, 2));
    }

    #[test]
    fn test_time_score_bracket_edges() {
        assert_eq!(time_score(0.0), 100.0);
        assert_eq!(time_score(12.0), 76.0);
        assert_eq!(time_score(24.0), 50.0);
        assert_eq!(time_score(71.0), 26.5);
        assert_eq!(time_score(72.0), 25.0);
        assert_eq!(time_score(168.0), 15.0);
        assert_eq!(time_score(268.0), 14.0);
        assert_eq!(time_score(5_000.0), 1.0);
    }

    #[test]
    fn test_time_score_clamps_future_items() {
        assert_eq!(time_score(-3.0), 100.0);
    }

    #[test]
    fn test_time_decay_monotonic_within_brackets() {
        let brackets = [(0.0, 24.0), (24.0, 72.0), (72.0, 168.0), (168.0, 1_568.0)];
        for (start, end) in brackets {
            let mut h = start;
            while h + 0.5 < end {
                assert!(
                    time_score(h) > time_score(h + 0.5),
                    "time score not decreasing at {}h",
                    h
                );
                h += 0.5;
            }
        }
    }

    #[test]
    fn test_time_score_floor() {
        assert_eq!(time_score(10_000.0), 1.0);
        assert_eq!(time_score(100_000.0), 1.0);
    }

    #[test]
    fn test_composite_invariant() {
        let score = FeedScore::new(80.0, 12.0, 30.0);
        let expected = 0.3 * 80.0 + 0.4 * 12.0 + 0.3 * 30.0;
        assert!((score.composite - expected).abs() < 1e-9);
    }

    #[test]
    fn test_score_item_following_boost() {
        let now = Utc::now();
        let candidate = item(Duration::hours(1), 5, 2, now);

        let followed = score_item(&candidate, true, now);
        let stranger = score_item(&candidate, false, now);

        assert_eq!(followed.relationship_score, 30.0);
        assert_eq!(stranger.relationship_score, 0.0);
        assert!((followed.composite - stranger.composite - 9.0).abs() < 1e-9);
        assert_eq!(followed.engagement_score, 16.0);
    }

    #[test]
    fn test_score_all_marks_followed_authors() {
        let now = Utc::now();
        let followed = item(Duration::hours(2), 1, 0, now);
        let other = item(Duration::hours(2), 1, 0, now);
        let following: HashSet<Uuid> = [followed.author_id()].into_iter().collect();

        let scored = score_all(vec![followed.clone(), other], &following, now);

        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].item.id, followed.id);
        assert!(scored[0].is_following);
        assert!(!scored[1].is_following);
        assert!(scored[0].score.composite > scored[1].score.composite);
    }

    #[test]
    fn test_score_item_is_repeatable() {
        let now = Utc::now();
        let candidate = item(Duration::hours(30), 7, 1, now);
        assert_eq!(
            score_item(&candidate, false, now),
            score_item(&candidate, false, now)
        );
    }
}
