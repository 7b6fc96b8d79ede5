use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

use crate::metrics;
use crate::models::AuthorType;
use crate::services::scoring::ScoredItem;
use crate::utils::stable_sort_by;

/// Engagement gap above which the per-author cap trusts the score over recency
pub const AUTHOR_TIEBREAK_MARGIN: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiversityConfig {
    /// Maximum items per author in one feed
    pub max_per_author: usize,
    /// Target share of company-authored items, `0.0..=1.0`
    pub company_ratio: f64,
    /// Minimum distance between two items of the same author
    pub min_gap: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            max_per_author: 3,
            company_ratio: 0.4,
            min_gap: 5,
        }
    }
}

/// What the enforcer had to bend to produce the final order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiversityReport {
    /// Items removed by the per-author cap
    pub capped_out: Vec<Uuid>,
    /// Output positions filled by the starvation fallback
    pub forced_positions: Vec<usize>,
    /// Items appended untouched once the round budget ran out. Every round
    /// places one item, so with a budget of three rounds per item this stays
    /// 0; it is reported so a budget regression shows up in logs and metrics.
    pub appended: usize,
}

impl DiversityReport {
    pub fn used_fallback(&self) -> bool {
        !self.forced_positions.is_empty() || self.appended > 0
    }
}

#[derive(Debug, Clone)]
pub struct DiversifiedFeed {
    pub items: Vec<ScoredItem>,
    pub report: DiversityReport,
}

/// Diversity Enforcer - rewrites a score-ordered list in three passes:
/// per-author cap, company/individual interleave, same-author spacing
pub struct DiversityEnforcer {
    config: DiversityConfig,
}

impl DiversityEnforcer {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    /// Create with a custom per-author cap, other settings default
    pub fn with_author_limit(max_per_author: usize) -> Self {
        Self {
            config: DiversityConfig {
                max_per_author,
                ..DiversityConfig::default()
            },
        }
    }

    pub fn config(&self) -> &DiversityConfig {
        &self.config
    }

    /// Run all three passes over `items` (already sorted by score)
    pub fn apply(&self, items: Vec<ScoredItem>) -> DiversifiedFeed {
        let mut report = DiversityReport::default();

        let capped = self.cap_per_author(items, &mut report.capped_out);
        let interleaved = self.interleave_by_author_type(capped);
        let items = self.repack_min_gap(interleaved, &mut report);

        if report.used_fallback() {
            warn!(
                forced = report.forced_positions.len(),
                appended = report.appended,
                min_gap = self.config.min_gap,
                "Diversity spacing could not be satisfied, used fallback placement"
            );
            metrics::record_diversity_fallback(report.forced_positions.len(), report.appended);
        }

        DiversifiedFeed { items, report }
    }

    /// Keep at most `max_per_author` items per author.
    ///
    /// Within an author, items are ranked by engagement score when two scores
    /// differ by more than [`AUTHOR_TIEBREAK_MARGIN`], otherwise by recency.
    /// Survivors keep their input order. Dropped ids are pushed to `dropped`.
    pub fn cap_per_author(&self, items: Vec<ScoredItem>, dropped: &mut Vec<Uuid>) -> Vec<ScoredItem> {
        let mut by_author: HashMap<Uuid, Vec<&ScoredItem>> = HashMap::new();
        for item in &items {
            by_author.entry(item.item.author_id()).or_default().push(item);
        }

        let mut keep: HashSet<Uuid> = HashSet::with_capacity(items.len());
        for group in by_author.into_values() {
            let ranked = stable_sort_by(group, |a, b| author_tiebreak(a, b));
            keep.extend(
                ranked
                    .into_iter()
                    .take(self.config.max_per_author)
                    .map(|s| s.item.id),
            );
        }

        items
            .into_iter()
            .filter(|s| {
                let kept = keep.contains(&s.item.id);
                if !kept {
                    dropped.push(s.item.id);
                }
                kept
            })
            .collect()
    }

    /// Interleave company and individual items toward `company_ratio`.
    ///
    /// Slot `i` goes to a company item when `floor((i+1)p/100)` steps past
    /// `floor(ip/100)`, with `p` the ratio in whole percent; 40% gives the
    /// repeating pattern I I C I C. An exhausted pool hands its slots to the
    /// other one, so the output length always equals the input length.
    pub fn interleave_by_author_type(&self, items: Vec<ScoredItem>) -> Vec<ScoredItem> {
        let (company, individual): (VecDeque<ScoredItem>, VecDeque<ScoredItem>) = items
            .into_iter()
            .partition(|s| s.item.author_type() == AuthorType::Company);
        let mut company = company;
        let mut individual = individual;

        let ratio = if self.config.company_ratio.is_finite() {
            self.config.company_ratio.clamp(0.0, 1.0)
        } else {
            DiversityConfig::default().company_ratio
        };
        let pct = (ratio * 100.0).round() as usize;

        let total = company.len() + individual.len();
        let mut result = Vec::with_capacity(total);

        for slot in 0..total {
            let wants_company = (slot + 1) * pct / 100 > slot * pct / 100;
            let next = if wants_company {
                company.pop_front().or_else(|| individual.pop_front())
            } else {
                individual.pop_front().or_else(|| company.pop_front())
            };
            if let Some(item) = next {
                result.push(item);
            }
        }

        result
    }

    /// Greedy repack keeping same-author items at least `min_gap` apart.
    ///
    /// Each round places the first pending item whose author is far enough
    /// back; when none fits, the head of the queue is placed anyway and its
    /// position recorded in `report.forced_positions`. Every round places
    /// exactly one item, so the loop ends after `items.len()` rounds, well
    /// inside the cap of three rounds per item; the cap only bounds the loop
    /// should that ever change, and leftovers would then be appended.
    pub fn repack_min_gap(&self, items: Vec<ScoredItem>, report: &mut DiversityReport) -> Vec<ScoredItem> {
        let min_gap = self.config.min_gap;
        let max_attempts = items.len() * 3;

        let mut pending: VecDeque<ScoredItem> = items.into();
        let mut result: Vec<ScoredItem> = Vec::with_capacity(pending.len());
        let mut last_seen: HashMap<Uuid, usize> = HashMap::new();
        let mut attempts = 0;

        while !pending.is_empty() && attempts < max_attempts {
            attempts += 1;
            let position = result.len();

            let fits = pending.iter().position(|s| {
                last_seen
                    .get(&s.item.author_id())
                    .map_or(true, |&last| position - last >= min_gap)
            });

            let next = match fits {
                Some(idx) => pending.remove(idx),
                None => {
                    report.forced_positions.push(position);
                    pending.pop_front()
                }
            };

            if let Some(item) = next {
                last_seen.insert(item.item.author_id(), position);
                result.push(item);
            }
        }

        report.appended = pending.len();
        result.extend(pending);
        result
    }
}

/// Ordering inside one author's group: higher engagement first when the gap
/// is decisive, newer first otherwise
fn author_tiebreak(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    let diff = a.score.engagement_score - b.score.engagement_score;
    if diff.abs() > AUTHOR_TIEBREAK_MARGIN {
        b.score
            .engagement_score
            .partial_cmp(&a.score.engagement_score)
            .unwrap_or(Ordering::Equal)
    } else {
        b.item.created_at.cmp(&a.item.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorSummary, FeedContent, FeedItem, PostContent};
    use crate::services::scoring::FeedScore;
    use chrono::{Duration, Utc};

    fn scored(author: Uuid, author_type: AuthorType, engagement: f64, age_minutes: i64) -> ScoredItem {
        ScoredItem {
            item: FeedItem {
                id: Uuid::new_v4(),
                author: AuthorSummary {
                    id: author,
                    author_type,
                    name: "author".to_string(),
                    avatar: None,
                    company_name: None,
                },
                created_at: Utc::now() - Duration::minutes(age_minutes),
                reaction_count: 0,
                comment_count: 0,
                counters: Default::default(),
                rollout: Default::default(),
                content: FeedContent::Post(PostContent::default()),
            },
            score: FeedScore::new(50.0, engagement, 0.0),
            is_following: false,
        }
    }

    fn count_by_author(items: &[ScoredItem]) -> HashMap<Uuid, usize> {
        let mut counts = HashMap::new();
        for s in items {
            *counts.entry(s.item.author_id()).or_insert(0) += 1;
        }
        counts
    }

    /// Same-author pairs closer than `min_gap`, excluding forced placements
    fn spacing_violations(items: &[ScoredItem], min_gap: usize, forced: &[usize]) -> usize {
        let mut last: HashMap<Uuid, usize> = HashMap::new();
        let mut violations = 0;
        for (pos, s) in items.iter().enumerate() {
            if let Some(&prev) = last.get(&s.item.author_id()) {
                if pos - prev < min_gap && !forced.contains(&pos) {
                    violations += 1;
                }
            }
            last.insert(s.item.author_id(), pos);
        }
        violations
    }

    #[test]
    fn test_scenario_ten_five_five_keeps_thirteen() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut input = Vec::new();
        // A: engagement 50, 48, 46, ... with the strongest also the newest
        for i in 0..10 {
            input.push(scored(a, AuthorType::Individual, 50.0 - 2.0 * i as f64, i * 10));
        }
        for i in 0..5 {
            input.push(scored(b, AuthorType::Individual, 20.0, i));
            input.push(scored(c, AuthorType::Company, 20.0, i));
        }
        let top_a: HashSet<Uuid> = input[..3].iter().map(|s| s.item.id).collect();

        let feed = DiversityEnforcer::new(DiversityConfig::default()).apply(input);

        assert_eq!(feed.items.len(), 13);
        let counts = count_by_author(&feed.items);
        assert_eq!(counts[&a], 3);
        assert_eq!(counts[&b], 5);
        assert_eq!(counts[&c], 5);
        let kept_a: HashSet<Uuid> = feed
            .items
            .iter()
            .filter(|s| s.item.author_id() == a)
            .map(|s| s.item.id)
            .collect();
        assert_eq!(kept_a, top_a);
        assert_eq!(feed.report.capped_out.len(), 7);
    }

    #[test]
    fn test_cap_drops_exactly_lowest_ranked_excess() {
        let author = Uuid::new_v4();
        // decisive score gaps, recency reversed: score must win
        let input: Vec<ScoredItem> = (0..5)
            .map(|i| scored(author, AuthorType::Individual, 100.0 - 20.0 * i as f64, 100 - i * 10))
            .collect();
        let expected_dropped: Vec<Uuid> = input[3..].iter().map(|s| s.item.id).collect();

        let mut dropped = Vec::new();
        let kept = DiversityEnforcer::with_author_limit(3).cap_per_author(input.clone(), &mut dropped);

        assert_eq!(kept.len(), 3);
        assert_eq!(
            kept.iter().map(|s| s.item.id).collect::<Vec<_>>(),
            input[..3].iter().map(|s| s.item.id).collect::<Vec<_>>()
        );
        assert_eq!(dropped, expected_dropped);
    }

    #[test]
    fn test_cap_prefers_recency_within_margin() {
        let author = Uuid::new_v4();
        let older_higher = scored(author, AuthorType::Individual, 30.0, 120);
        let newer_lower = scored(author, AuthorType::Individual, 25.0, 5);

        let mut dropped = Vec::new();
        let kept = DiversityEnforcer::with_author_limit(1)
            .cap_per_author(vec![older_higher.clone(), newer_lower.clone()], &mut dropped);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].item.id, newer_lower.item.id);
        assert_eq!(dropped, vec![older_higher.item.id]);
    }

    #[test]
    fn test_cap_bounds_every_author() {
        let authors: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let input: Vec<ScoredItem> = (0..40)
            .map(|i| scored(authors[i % 4], AuthorType::Individual, (i % 7) as f64, i as i64))
            .collect();

        let feed = DiversityEnforcer::new(DiversityConfig::default()).apply(input);

        assert!(count_by_author(&feed.items).values().all(|&n| n <= 3));
        assert_eq!(feed.items.len(), 12);
    }

    #[test]
    fn test_interleave_pattern_for_forty_percent() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let mut input = Vec::new();
        for i in 0..6 {
            input.push(scored(Uuid::new_v4(), AuthorType::Individual, 0.0, i));
        }
        for i in 0..4 {
            input.push(scored(Uuid::new_v4(), AuthorType::Company, 0.0, i));
        }

        let out = enforcer.interleave_by_author_type(input);
        let pattern: String = out
            .iter()
            .map(|s| match s.item.author_type() {
                AuthorType::Company => 'C',
                AuthorType::Individual => 'I',
            })
            .collect();

        assert_eq!(pattern, "IICICIICIC");
    }

    #[test]
    fn test_interleave_fills_from_other_pool() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let mut input: Vec<ScoredItem> = (0..8)
            .map(|i| scored(Uuid::new_v4(), AuthorType::Individual, 0.0, i))
            .collect();
        input.push(scored(Uuid::new_v4(), AuthorType::Company, 0.0, 0));

        let out = enforcer.interleave_by_author_type(input);

        assert_eq!(out.len(), 9);
        assert_eq!(out[2].item.author_type(), AuthorType::Company);
        assert!(out[3..]
            .iter()
            .all(|s| s.item.author_type() == AuthorType::Individual));
    }

    #[test]
    fn test_interleave_keeps_order_within_pool() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let input: Vec<ScoredItem> = (0..5)
            .map(|i| scored(Uuid::new_v4(), AuthorType::Company, 0.0, i))
            .collect();
        let ids: Vec<Uuid> = input.iter().map(|s| s.item.id).collect();

        let out = enforcer.interleave_by_author_type(input);
        assert_eq!(out.iter().map(|s| s.item.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_repack_spaces_same_author() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let authors: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        // runs of the same author back to back
        let input: Vec<ScoredItem> = (0..18)
            .map(|i| scored(authors[i / 3], AuthorType::Individual, 0.0, i as i64))
            .collect();

        let mut report = DiversityReport::default();
        let out = enforcer.repack_min_gap(input, &mut report);

        assert_eq!(out.len(), 18);
        assert_eq!(spacing_violations(&out, 5, &report.forced_positions), 0);
    }

    #[test]
    fn test_repack_starvation_is_bounded_and_reported() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let author = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut input: Vec<ScoredItem> = (0..4)
            .map(|i| scored(author, AuthorType::Individual, 0.0, i))
            .collect();
        input.push(scored(other, AuthorType::Individual, 0.0, 9));

        let mut report = DiversityReport::default();
        let out = enforcer.repack_min_gap(input, &mut report);

        assert_eq!(out.len(), 5);
        assert!(report.used_fallback());
        assert_eq!(report.forced_positions, vec![2, 3, 4]);
        assert_eq!(report.appended, 0);
        assert_eq!(spacing_violations(&out, 5, &report.forced_positions), 0);
    }

    #[test]
    fn test_repack_places_one_item_per_round() {
        let enforcer = DiversityEnforcer::new(DiversityConfig {
            min_gap: 50,
            ..DiversityConfig::default()
        });
        let author = Uuid::new_v4();
        let input: Vec<ScoredItem> = (0..40)
            .map(|i| scored(author, AuthorType::Individual, 0.0, i))
            .collect();
        let ids: Vec<Uuid> = input.iter().map(|s| s.item.id).collect();

        let mut report = DiversityReport::default();
        let out = enforcer.repack_min_gap(input, &mut report);

        // single author, unreachable gap: every slot after the first is forced
        assert_eq!(report.appended, 0);
        assert_eq!(report.forced_positions, (1..40).collect::<Vec<_>>());
        assert_eq!(out.iter().map(|s| s.item.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_repack_applies_to_short_lists() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let input = vec![
            scored(a, AuthorType::Individual, 0.0, 0),
            scored(a, AuthorType::Individual, 0.0, 1),
            scored(b, AuthorType::Individual, 0.0, 2),
        ];

        let mut report = DiversityReport::default();
        let out = enforcer.repack_min_gap(input, &mut report);

        assert_eq!(out[1].item.author_id(), b);
        assert_eq!(report.forced_positions, vec![2]);
    }

    #[test]
    fn test_no_item_loss_after_cap() {
        let enforcer = DiversityEnforcer::new(DiversityConfig::default());
        let authors: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let input: Vec<ScoredItem> = (0..30)
            .map(|i| {
                let kind = if i % 3 == 0 {
                    AuthorType::Company
                } else {
                    AuthorType::Individual
                };
                scored(authors[i % 10], kind, i as f64, i as i64)
            })
            .collect();
        let ids: HashSet<Uuid> = input.iter().map(|s| s.item.id).collect();

        let feed = enforcer.apply(input);

        // every author has exactly three items, so nothing is capped
        assert!(feed.report.capped_out.is_empty());
        assert_eq!(feed.items.len(), 30);
        let out_ids: HashSet<Uuid> = feed.items.iter().map(|s| s.item.id).collect();
        assert_eq!(out_ids, ids);
    }

    #[test]
    fn test_empty_input() {
        let feed = DiversityEnforcer::new(DiversityConfig::default()).apply(Vec::new());
        assert!(feed.items.is_empty());
        assert_eq!(feed.report, DiversityReport::default());
    }
}
