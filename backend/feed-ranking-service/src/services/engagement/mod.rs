//! Engagement accumulator
//!
//! Turns impressions and interactions into atomic counter increments, then
//! re-evaluates the item's rollout against the fresh tallies. The rollout
//! flag is written back only when the decision changes it.
//!
//! Called by the serving layer after items were shown or interacted with,
//! never from inside feed assembly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::metrics;
use crate::models::{ItemCounters, RolloutState};
use crate::services::distribution::{DistributionController, EngagementSnapshot, RolloutDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Comment,
    Share,
    WatchComplete,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Comment => "comment",
            InteractionKind::Share => "share",
            InteractionKind::WatchComplete => "watch_complete",
        }
    }

    /// Counter field bumped by this interaction
    pub fn counter_field(&self) -> &'static str {
        match self {
            InteractionKind::Like => "likes",
            InteractionKind::Comment => "comments",
            InteractionKind::Share => "shares",
            InteractionKind::WatchComplete => "video_completions",
        }
    }
}

/// Counters plus rollout flag for one item, read together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub counters: ItemCounters,
    pub rollout: RolloutState,
}

/// Persistent counter set with atomic increments
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one impression and remember `viewer_id` as a distinct viewer.
    /// Returns the counters after the increment.
    async fn record_impression(&self, item_id: Uuid, viewer_id: Uuid) -> Result<ItemCounters, StoreError>;

    /// Count one interaction. Returns the counters after the increment.
    async fn record_interaction(
        &self,
        item_id: Uuid,
        kind: InteractionKind,
    ) -> Result<ItemCounters, StoreError>;

    /// Read-only bulk lookup used by feed assembly. Items never seen are absent.
    async fn snapshot(&self, item_ids: &[Uuid]) -> Result<HashMap<Uuid, CounterSnapshot>, StoreError>;

    async fn rollout_state(&self, item_id: Uuid) -> Result<RolloutState, StoreError>;

    async fn save_rollout_state(&self, item_id: Uuid, state: RolloutState) -> Result<(), StoreError>;
}

/// Result of recording one event
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub item_id: Uuid,
    pub counters: ItemCounters,
    pub decision: RolloutDecision,
}

pub struct EngagementAccumulator {
    store: Arc<dyn CounterStore>,
    controller: DistributionController,
}

impl EngagementAccumulator {
    pub fn new(store: Arc<dyn CounterStore>, controller: DistributionController) -> Self {
        Self { store, controller }
    }

    pub async fn record_impression(&self, item_id: Uuid, viewer_id: Uuid) -> Result<RecordOutcome, StoreError> {
        let counters = self.store.record_impression(item_id, viewer_id).await?;
        debug!(
            item_id = %item_id,
            viewer_id = %viewer_id,
            impressions = counters.impressions,
            distinct_viewers = counters.distinct_viewers,
            "Impression recorded"
        );
        self.reevaluate(item_id, counters).await
    }

    pub async fn record_interaction(&self, item_id: Uuid, kind: InteractionKind) -> Result<RecordOutcome, StoreError> {
        let counters = self.store.record_interaction(item_id, kind).await?;
        debug!(item_id = %item_id, kind = kind.as_str(), "Interaction recorded");
        self.reevaluate(item_id, counters).await
    }

    /// Evaluate fresh counters and persist the rollout flag if it moved
    async fn reevaluate(&self, item_id: Uuid, counters: ItemCounters) -> Result<RecordOutcome, StoreError> {
        let previous = self.store.rollout_state(item_id).await?;
        let decision = self
            .controller
            .evaluate(&EngagementSnapshot::from(&counters), &previous);

        if decision.changed(&previous) {
            self.store
                .save_rollout_state(item_id, decision.next_state)
                .await?;

            info!(
                item_id = %item_id,
                from = %previous.granted,
                to = %decision.next_state.granted,
                throttled = decision.next_state.throttled,
                stage = %decision.stage,
                engagement_rate = decision.engagement_rate,
                impressions = counters.impressions,
                distinct_viewers = counters.distinct_viewers,
                audience_cap = decision.audience_cap,
                "Rollout state changed"
            );
            metrics::record_rollout_transition(&decision.action);
        }

        Ok(RecordOutcome {
            item_id,
            counters,
            decision,
        })
    }
}
