//! In-memory stores for exercising the HTTP surface without Postgres or Redis.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use feed_ranking_service::config::RankingConfig;
use feed_ranking_service::error::StoreError;
use feed_ranking_service::handlers::FeedHandlerState;
use feed_ranking_service::models::{
    CandidateQuery, CandidateRecord, ContentVariant, ItemCounters, RolloutState, VariantCounts,
    ViewerLocation, VisibilityRecord,
};
use feed_ranking_service::services::assembler::{ContentStore, SocialGraph};
use feed_ranking_service::services::distribution::DistributionConfig;
use feed_ranking_service::services::engagement::{CounterSnapshot, CounterStore, InteractionKind};
use feed_ranking_service::services::visibility::VisibilityStore;
use feed_ranking_service::services::{DistributionController, EngagementAccumulator, FeedAssembler};

pub fn post_record(author_id: Uuid, user_type: &str, created_at: DateTime<Utc>) -> CandidateRecord {
    CandidateRecord {
        id: Uuid::new_v4(),
        variant: ContentVariant::Post.as_str().to_string(),
        author_id: Some(author_id),
        author_user_type: Some(user_type.to_string()),
        author_name: Some("Author".to_string()),
        author_avatar: None,
        author_company_name: None,
        created_at: Some(created_at),
        reaction_count: 0,
        comment_count: 0,
        payload: json!({ "text": "load available", "mediaUrls": [] }),
    }
}

/// `count` posts, one author each, alternating individual and company
pub fn sample_records(count: usize, now: DateTime<Utc>) -> Vec<CandidateRecord> {
    (0..count)
        .map(|i| {
            let user_type = if i % 2 == 0 { "individual" } else { "company" };
            post_record(Uuid::new_v4(), user_type, now - Duration::minutes(i as i64))
        })
        .collect()
}

#[derive(Default)]
pub struct InMemoryContent {
    pub records: Vec<CandidateRecord>,
    pub last_query: Mutex<Option<CandidateQuery>>,
}

#[async_trait]
impl ContentStore for InMemoryContent {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Vec<CandidateRecord>, StoreError> {
        *self.last_query.lock().await = Some(query.clone());
        Ok(self
            .records
            .iter()
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_variant(
        &self,
        _viewer_id: Uuid,
        _location: &ViewerLocation,
    ) -> Result<VariantCounts, StoreError> {
        let mut counts = VariantCounts::default();
        for record in &self.records {
            match ContentVariant::parse(&record.variant) {
                Some(ContentVariant::Post) => counts.posts += 1,
                Some(ContentVariant::ShipmentAd) => counts.shipment_ads += 1,
                Some(ContentVariant::EmptyTruckAd) => counts.empty_truck_ads += 1,
                None => {}
            }
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct InMemoryGraph {
    pub following: HashSet<Uuid>,
    pub location: ViewerLocation,
}

#[async_trait]
impl SocialGraph for InMemoryGraph {
    async fn following(&self, _viewer_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        Ok(self.following.clone())
    }

    async fn location(&self, _viewer_id: Uuid) -> Result<ViewerLocation, StoreError> {
        Ok(self.location.clone())
    }
}

#[derive(Default)]
pub struct InMemoryVisibility {
    pub records: Mutex<HashMap<(Uuid, Uuid), bool>>,
}

#[async_trait]
impl VisibilityStore for InMemoryVisibility {
    async fn lookup(
        &self,
        viewer_id: Uuid,
        item_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        let records = self.records.lock().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| records.get(&(viewer_id, *id)).map(|flag| (*id, *flag)))
            .collect())
    }

    async fn record_plan(&self, plan: &[VisibilityRecord]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        for record in plan {
            records
                .entry((record.viewer_id, record.item_id))
                .or_insert(record.show_in_feed);
        }
        Ok(())
    }
}

/// Counter store kept in process. `fail` makes every call return
/// `StoreError::Unavailable`.
#[derive(Default)]
pub struct InMemoryCounters {
    pub fail: bool,
    counters: Mutex<HashMap<Uuid, ItemCounters>>,
    viewers: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
    rollout: Mutex<HashMap<Uuid, RolloutState>>,
}

impl InMemoryCounters {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub async fn stored_rollout(&self, item_id: Uuid) -> Option<RolloutState> {
        self.rollout.lock().await.get(&item_id).copied()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            Err(StoreError::Unavailable("counter store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounters {
    async fn record_impression(&self, item_id: Uuid, viewer_id: Uuid) -> Result<ItemCounters, StoreError> {
        self.check()?;
        let mut viewers = self.viewers.lock().await;
        let seen = viewers.entry(item_id).or_default();
        seen.insert(viewer_id);

        let mut counters = self.counters.lock().await;
        let entry = counters.entry(item_id).or_default();
        entry.impressions += 1;
        entry.distinct_viewers = seen.len() as u64;
        Ok(*entry)
    }

    async fn record_interaction(
        &self,
        item_id: Uuid,
        kind: InteractionKind,
    ) -> Result<ItemCounters, StoreError> {
        self.check()?;
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(item_id).or_default();
        match kind {
            InteractionKind::Like => entry.likes += 1,
            InteractionKind::Comment => entry.comments += 1,
            InteractionKind::Share => entry.shares += 1,
            InteractionKind::WatchComplete => entry.video_completions += 1,
        }
        Ok(*entry)
    }

    async fn snapshot(&self, item_ids: &[Uuid]) -> Result<HashMap<Uuid, CounterSnapshot>, StoreError> {
        self.check()?;
        let counters = self.counters.lock().await;
        let rollout = self.rollout.lock().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| {
                counters.get(id).map(|c| {
                    (
                        *id,
                        CounterSnapshot {
                            counters: *c,
                            rollout: rollout.get(id).copied().unwrap_or_default(),
                        },
                    )
                })
            })
            .collect())
    }

    async fn rollout_state(&self, item_id: Uuid) -> Result<RolloutState, StoreError> {
        self.check()?;
        Ok(self
            .rollout
            .lock()
            .await
            .get(&item_id)
            .copied()
            .unwrap_or_default())
    }

    async fn save_rollout_state(&self, item_id: Uuid, state: RolloutState) -> Result<(), StoreError> {
        self.check()?;
        let mut rollout = self.rollout.lock().await;
        let entry = rollout.entry(item_id).or_default();
        if entry.granted <= state.granted {
            *entry = state;
        }
        Ok(())
    }
}

pub struct Fixture {
    pub content: Arc<InMemoryContent>,
    pub graph: Arc<InMemoryGraph>,
    pub visibility: Arc<InMemoryVisibility>,
    pub counters: Arc<InMemoryCounters>,
}

impl Fixture {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        Self {
            content: Arc::new(InMemoryContent {
                records,
                ..Default::default()
            }),
            graph: Arc::new(InMemoryGraph::default()),
            visibility: Arc::new(InMemoryVisibility::default()),
            counters: Arc::new(InMemoryCounters::default()),
        }
    }

    pub fn with_counters(mut self, counters: InMemoryCounters) -> Self {
        self.counters = Arc::new(counters);
        self
    }

    pub fn with_graph(mut self, graph: InMemoryGraph) -> Self {
        self.graph = Arc::new(graph);
        self
    }

    pub fn state(&self) -> FeedHandlerState {
        let assembler = FeedAssembler::new(
            self.content.clone(),
            self.graph.clone(),
            self.visibility.clone(),
            self.counters.clone(),
        );
        let accumulator = EngagementAccumulator::new(
            self.counters.clone(),
            DistributionController::new(DistributionConfig::default()),
        );

        FeedHandlerState {
            assembler: Arc::new(assembler),
            accumulator: Arc::new(accumulator),
            ranking: RankingConfig::default(),
        }
    }
}
