//! Feed assembler
//!
//! Per-request pipeline, strictly linear:
//! `Fetching -> Gating -> Scoring -> Sorting -> Diversifying -> Paginating -> Done`
//!
//! Only the fetches of `Fetching` and the counter snapshot of `Gating` can fail
//! the request. Everything else degrades locally (malformed rows dropped,
//! visibility fails open, spacing falls back). Assembly never writes counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics;
use crate::models::{
    CandidateQuery, CandidateRecord, FeedItem, FeedPage, FeedStats, Pagination, VariantCounts,
    ViewerLocation,
};
use crate::services::dampening::{DampeningConfig, StaleDampener};
use crate::services::distribution::{DistributionConfig, DistributionController};
use crate::services::diversity::{DiversityConfig, DiversityEnforcer};
use crate::services::engagement::CounterStore;
use crate::services::scoring::{score_all, ScoredItem};
use crate::services::visibility::{VisibilityGate, VisibilityStore};
use crate::utils::stable_sort_by;

/// Composite points within which recency decides the order
pub const DEFAULT_TIE_BAND: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    Fetching,
    Gating,
    Scoring,
    Sorting,
    Diversifying,
    Paginating,
    Done,
}

impl AssemblyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblyStage::Fetching => "fetching",
            AssemblyStage::Gating => "gating",
            AssemblyStage::Scoring => "scoring",
            AssemblyStage::Sorting => "sorting",
            AssemblyStage::Diversifying => "diversifying",
            AssemblyStage::Paginating => "paginating",
            AssemblyStage::Done => "done",
        }
    }
}

impl std::fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed assembly failed while {stage}: {source}")]
    Fetch {
        stage: AssemblyStage,
        source: StoreError,
    },
}

/// Eligible items for a viewer, read-only
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Published, in-scope items not hidden by or authored by the viewer,
    /// newest first, at most `query.limit` rows
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Vec<CandidateRecord>, StoreError>;

    async fn count_by_variant(
        &self,
        viewer_id: Uuid,
        location: &ViewerLocation,
    ) -> Result<VariantCounts, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Ids of the authors the viewer follows
    async fn following(&self, viewer_id: Uuid) -> Result<HashSet<Uuid>, StoreError>;

    /// Profile location; both fields empty when unknown
    async fn location(&self, viewer_id: Uuid) -> Result<ViewerLocation, StoreError>;
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub candidate_limit: i64,
    pub tie_band: f64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 500,
            tie_band: DEFAULT_TIE_BAND,
        }
    }
}

/// One feed page request. `page` is 1-based, `limit` at least 1.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub viewer_id: Uuid,
    pub page: u32,
    pub limit: u32,
    /// Per-request location override. A set `country` replaces the profile
    /// location (with `city`); an empty string means "no filter".
    pub country: Option<String>,
    pub city: Option<String>,
}

impl FeedRequest {
    pub fn new(viewer_id: Uuid, page: u32, limit: u32) -> Self {
        Self {
            viewer_id,
            page,
            limit,
            country: None,
            city: None,
        }
    }
}

pub struct FeedAssembler {
    content: Arc<dyn ContentStore>,
    graph: Arc<dyn SocialGraph>,
    counters: Arc<dyn CounterStore>,
    visibility: VisibilityGate,
    controller: DistributionController,
    diversity: DiversityEnforcer,
    dampener: StaleDampener,
    config: AssemblerConfig,
}

impl FeedAssembler {
    pub fn new(
        content: Arc<dyn ContentStore>,
        graph: Arc<dyn SocialGraph>,
        visibility: Arc<dyn VisibilityStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            content,
            graph,
            counters,
            visibility: VisibilityGate::new(visibility),
            controller: DistributionController::default(),
            diversity: DiversityEnforcer::new(DiversityConfig::default()),
            dampener: StaleDampener::new(DampeningConfig::default()),
            config: AssemblerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AssemblerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_distribution(mut self, config: DistributionConfig) -> Self {
        self.controller = DistributionController::new(config);
        self
    }

    pub fn with_diversity(mut self, config: DiversityConfig) -> Self {
        self.diversity = DiversityEnforcer::new(config);
        self
    }

    pub fn with_dampening(mut self, config: DampeningConfig) -> Self {
        self.dampener = StaleDampener::new(config);
        self
    }

    pub async fn assemble(&self, request: FeedRequest) -> Result<FeedPage, FeedError> {
        let started = Instant::now();
        let result = self.assemble_at(&request, Utc::now()).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::observe_feed_assembly(status, started.elapsed());
        result
    }

    /// Run the pipeline against a fixed clock
    pub async fn assemble_at(&self, request: &FeedRequest, now: DateTime<Utc>) -> Result<FeedPage, FeedError> {
        let viewer_id = request.viewer_id;
        let mut stage = AssemblyStage::Fetching;

        let (following, location) = futures::try_join!(
            async {
                self.graph
                    .following(viewer_id)
                    .await
                    .map_err(|source| FeedError::Fetch { stage, source })
            },
            self.resolve_location(request, stage),
        )?;
        let query = CandidateQuery {
            viewer_id,
            location,
            limit: self.config.candidate_limit,
        };
        let records = self
            .content
            .fetch_candidates(&query)
            .await
            .map_err(|source| FeedError::Fetch { stage, source })?;
        let fetched = records.len();
        let candidates = validate_candidates(records, viewer_id);
        let dropped = fetched - candidates.len();

        stage = advance(stage, AssemblyStage::Gating, viewer_id);
        let ids: Vec<Uuid> = candidates.iter().map(|item| item.id).collect();
        let snapshots = self
            .counters
            .snapshot(&ids)
            .await
            .map_err(|source| FeedError::Fetch { stage, source })?;
        let candidates: Vec<FeedItem> = candidates
            .into_iter()
            .map(|mut item| {
                if let Some(snapshot) = snapshots.get(&item.id) {
                    item.counters = snapshot.counters;
                    item.rollout = snapshot.rollout;
                }
                item
            })
            .collect();
        let gated = self.gate(viewer_id, candidates, &following, now).await;

        stage = advance(stage, AssemblyStage::Scoring, viewer_id);
        let scored = score_all(gated, &following, now);
        let eligible = scored.len();

        stage = advance(stage, AssemblyStage::Sorting, viewer_id);
        let sorted = rank_items(scored, self.config.tie_band);

        stage = advance(stage, AssemblyStage::Diversifying, viewer_id);
        let diversified = self.diversity.apply(sorted);
        metrics::record_filtered("capped", diversified.report.capped_out.len());

        stage = advance(stage, AssemblyStage::Paginating, viewer_id);
        let total = diversified.items.len();
        let (items, pagination) = paginate(diversified.items, request.page, request.limit);

        advance(stage, AssemblyStage::Done, viewer_id);
        info!(
            viewer_id = %viewer_id,
            candidates = fetched,
            dropped = dropped,
            eligible = eligible,
            diversified = total,
            returned = items.len(),
            page = request.page,
            "Feed assembled"
        );

        Ok(FeedPage {
            items: items.into_iter().map(|s| s.item.into_entry()).collect(),
            pagination,
        })
    }

    /// Per-variant eligible counts for the diagnostics endpoint
    pub async fn stats(&self, request: &FeedRequest) -> Result<FeedStats, FeedError> {
        let stage = AssemblyStage::Fetching;
        let (following, location) = futures::try_join!(
            async {
                self.graph
                    .following(request.viewer_id)
                    .await
                    .map_err(|source| FeedError::Fetch { stage, source })
            },
            self.resolve_location(request, stage),
        )?;
        let counts = self
            .content
            .count_by_variant(request.viewer_id, &location)
            .await
            .map_err(|source| FeedError::Fetch { stage, source })?;

        Ok(FeedStats {
            posts: counts.posts,
            shipment_ads: counts.shipment_ads,
            empty_truck_ads: counts.empty_truck_ads,
            total_items: counts.posts + counts.shipment_ads + counts.empty_truck_ads,
            following_count: following.len(),
            user_country: location.country,
        })
    }

    async fn resolve_location(&self, request: &FeedRequest, stage: AssemblyStage) -> Result<ViewerLocation, FeedError> {
        let profile = self
            .graph
            .location(request.viewer_id)
            .await
            .map_err(|source| FeedError::Fetch { stage, source })?;

        Ok(resolve_location(request, profile))
    }

    /// Visibility gate for followed authors, reach cap and dampening for the rest
    async fn gate(
        &self,
        viewer_id: Uuid,
        candidates: Vec<FeedItem>,
        following: &HashSet<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<FeedItem> {
        let followed_ids: Vec<Uuid> = candidates
            .iter()
            .filter(|item| following.contains(&item.author_id()))
            .map(|item| item.id)
            .collect();
        let decisions = self.visibility.load(viewer_id, &followed_ids).await;

        let mut hidden = 0;
        let mut out_of_reach = 0;
        let mut eligible = Vec::with_capacity(candidates.len());
        for item in candidates {
            let is_following = following.contains(&item.author_id());
            if !decisions.is_eligible(item.id, is_following) {
                hidden += 1;
                continue;
            }
            if !is_following
                && !self
                    .controller
                    .has_remaining_reach(&item.rollout, item.counters.impressions)
            {
                out_of_reach += 1;
                continue;
            }
            eligible.push(item);
        }

        let (eligible, dampened) = self.dampener.apply(viewer_id, eligible, now);

        metrics::record_filtered("visibility", hidden);
        metrics::record_filtered("reach", out_of_reach);
        metrics::record_filtered("dampening", dampened);
        debug!(
            viewer_id = %viewer_id,
            hidden = hidden,
            out_of_reach = out_of_reach,
            dampened = dampened,
            "Candidates gated"
        );

        eligible
    }
}

fn advance(from: AssemblyStage, to: AssemblyStage, viewer_id: Uuid) -> AssemblyStage {
    debug!(viewer_id = %viewer_id, from = %from, to = %to, "Feed assembly stage");
    to
}

/// A requested country replaces the whole profile location; empty strings clear
fn resolve_location(request: &FeedRequest, profile: ViewerLocation) -> ViewerLocation {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    match &request.country {
        Some(country) => ViewerLocation {
            country: non_empty(Some(country.clone())),
            city: non_empty(request.city.clone()),
        },
        None => ViewerLocation {
            country: non_empty(profile.country),
            city: non_empty(profile.city),
        },
    }
}

/// Turn raw rows into items, dropping malformed rows and the viewer's own items
fn validate_candidates(records: Vec<CandidateRecord>, viewer_id: Uuid) -> Vec<FeedItem> {
    let mut malformed = 0;
    let items: Vec<FeedItem> = records
        .into_iter()
        .filter_map(|record| {
            let item_id = record.id;
            match record.validate() {
                Ok(item) => Some(item),
                Err(reason) => {
                    warn!(item_id = %item_id, reason = %reason, "Dropping malformed feed candidate");
                    malformed += 1;
                    None
                }
            }
        })
        .filter(|item| item.author_id() != viewer_id)
        .collect();
    metrics::record_filtered("malformed", malformed);
    items
}

/// Sort descending by composite score; within `tie_band` points, newer first.
///
/// The near-tie rule is not transitive, so this goes through the crate's
/// merge sort rather than `slice::sort_by`.
pub fn rank_items(items: Vec<ScoredItem>, tie_band: f64) -> Vec<ScoredItem> {
    stable_sort_by(items, |a, b| {
        let diff = a.score.composite - b.score.composite;
        if diff.abs() <= tie_band {
            b.item.created_at.cmp(&a.item.created_at)
        } else {
            b.score
                .composite
                .partial_cmp(&a.score.composite)
                .unwrap_or(Ordering::Equal)
        }
    })
}

/// Window `[skip, skip + limit)`; `has_more` when anything lies past it
pub fn slice_window<T>(items: Vec<T>, skip: usize, limit: usize) -> (Vec<T>, bool) {
    let total = items.len();
    let window: Vec<T> = items.into_iter().skip(skip).take(limit).collect();
    let has_more = skip + window.len() < total;
    (window, has_more)
}

/// Page `page` (1-based) of `limit` items
pub fn paginate<T>(items: Vec<T>, page: u32, limit: u32) -> (Vec<T>, Pagination) {
    let page = page.max(1);
    let limit = limit.max(1);
    let total = items.len();
    let skip = (page as usize - 1) * limit as usize;

    let (window, has_more) = slice_window(items, skip, limit as usize);

    (
        window,
        Pagination {
            current_page: page,
            total_items: total,
            total_pages: (total + limit as usize - 1) / limit as usize,
            items_per_page: limit,
            has_more,
        },
    )
}
