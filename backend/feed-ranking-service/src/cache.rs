//! Redis-backed counter store
//!
//! Keys:
//! - feed:counters:{item_id} → hash of impressions/likes/comments/shares/video_completions
//! - feed:viewers:{item_id}  → set of viewer ids that produced an impression
//! - feed:rollout:{item_id}  → hash { granted, throttled }
//!
//! Increments use HINCRBY/SADD inside a MULTI pipeline so concurrent writers
//! never lose an update. Rollout writes go through a Lua script so `granted`
//! only moves forward.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ItemCounters, RolloutState};
use crate::services::distribution::DistributionStage;
use crate::services::engagement::{CounterSnapshot, CounterStore, InteractionKind};

fn counters_key(item_id: Uuid) -> String {
    format!("feed:counters:{}", item_id)
}

fn viewers_key(item_id: Uuid) -> String {
    format!("feed:viewers:{}", item_id)
}

fn rollout_key(item_id: Uuid) -> String {
    format!("feed:rollout:{}", item_id)
}

/// Server-side compare-and-raise of the rollout hash.
///
/// ARGV[1] is the requested stage, ARGV[2] the throttled flag. A request whose
/// stage ranks below the stored one changes nothing, so a late writer holding
/// an older evaluation can neither lower `granted` nor flip `throttled`.
/// Returns the stage stored afterwards.
static ROLLOUT_RATCHET: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(ROLLOUT_RATCHET_LUA));

const ROLLOUT_RATCHET_LUA: &str = r#"
local rank = { testing = 0, expanding = 1, viral = 2, saturated = 3 }
local current = redis.call('HGET', KEYS[1], 'granted')
if current and rank[current] and rank[current] > rank[ARGV[1]] then
    return current
end
redis.call('HSET', KEYS[1], 'granted', ARGV[1], 'throttled', ARGV[2])
return ARGV[1]
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    client: Arc<ConnectionManager>,
}

impl RedisCounterStore {
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self {
            client: Arc::new(manager),
        })
    }

    /// Ping Redis to check connection health
    pub async fn ping(&self) -> Result<(), StoreError> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.client.as_ref().clone())
            .await
            .map_err(|e| {
                warn!("Redis PING failed: {}", e);
                StoreError::from(e)
            })?;
        Ok(())
    }

    /// Increment `field` and return the item's counters afterwards
    async fn increment(&self, item_id: Uuid, field: &str, viewer_id: Option<Uuid>) -> Result<ItemCounters, StoreError> {
        let counters = counters_key(item_id);
        let viewers = viewers_key(item_id);

        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HINCRBY").arg(&counters).arg(field).arg(1).ignore();
        if let Some(viewer_id) = viewer_id {
            pipe.cmd("SADD").arg(&viewers).arg(viewer_id.to_string()).ignore();
        }
        pipe.cmd("HGETALL").arg(&counters).cmd("SCARD").arg(&viewers);

        let (fields, distinct_viewers): (HashMap<String, u64>, u64) = pipe
            .query_async(&mut self.client.as_ref().clone())
            .await
            .map_err(|e| {
                warn!(item_id = %item_id, field = field, "Redis counter increment failed: {}", e);
                StoreError::from(e)
            })?;

        debug!(item_id = %item_id, field = field, "Counter incremented");
        Ok(counters_from_fields(&fields, distinct_viewers))
    }
}

fn counters_from_fields(fields: &HashMap<String, u64>, distinct_viewers: u64) -> ItemCounters {
    let get = |name: &str| fields.get(name).copied().unwrap_or(0);
    ItemCounters {
        impressions: get("impressions"),
        distinct_viewers,
        likes: get(InteractionKind::Like.counter_field()),
        comments: get(InteractionKind::Comment.counter_field()),
        shares: get(InteractionKind::Share.counter_field()),
        video_completions: get(InteractionKind::WatchComplete.counter_field()),
    }
}

fn rollout_from_fields(fields: &HashMap<String, String>) -> RolloutState {
    let granted = fields
        .get("granted")
        .and_then(|raw| DistributionStage::parse(raw))
        .unwrap_or(DistributionStage::Testing);
    let throttled = fields
        .get("throttled")
        .map(|raw| raw == "1" || raw == "true")
        .unwrap_or(false);
    RolloutState { granted, throttled }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_impression(&self, item_id: Uuid, viewer_id: Uuid) -> Result<ItemCounters, StoreError> {
        self.increment(item_id, "impressions", Some(viewer_id)).await
    }

    async fn record_interaction(
        &self,
        item_id: Uuid,
        kind: InteractionKind,
    ) -> Result<ItemCounters, StoreError> {
        self.increment(item_id, kind.counter_field(), None).await
    }

    async fn snapshot(&self, item_ids: &[Uuid]) -> Result<HashMap<Uuid, CounterSnapshot>, StoreError> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.client.as_ref().clone();

        let mut counters_pipe = redis::pipe();
        let mut viewers_pipe = redis::pipe();
        let mut rollout_pipe = redis::pipe();
        for id in item_ids {
            counters_pipe.cmd("HGETALL").arg(counters_key(*id));
            viewers_pipe.cmd("SCARD").arg(viewers_key(*id));
            rollout_pipe.cmd("HGETALL").arg(rollout_key(*id));
        }

        let counters: Vec<HashMap<String, u64>> = counters_pipe.query_async(&mut conn).await?;
        let viewers: Vec<u64> = viewers_pipe.query_async(&mut conn).await?;
        let rollouts: Vec<HashMap<String, String>> = rollout_pipe.query_async(&mut conn).await?;

        let mut snapshots = HashMap::with_capacity(item_ids.len());
        for (idx, id) in item_ids.iter().enumerate() {
            let fields = counters.get(idx);
            let rollout = rollouts.get(idx);
            let seen = fields.map_or(false, |f| !f.is_empty()) || rollout.map_or(false, |r| !r.is_empty());
            if !seen {
                continue;
            }
            let empty_counters = HashMap::new();
            let empty_rollout = HashMap::new();
            snapshots.insert(
                *id,
                CounterSnapshot {
                    counters: counters_from_fields(
                        fields.unwrap_or(&empty_counters),
                        viewers.get(idx).copied().unwrap_or(0),
                    ),
                    rollout: rollout_from_fields(rollout.unwrap_or(&empty_rollout)),
                },
            );
        }

        debug!(
            requested = item_ids.len(),
            found = snapshots.len(),
            "Counter snapshot loaded"
        );
        Ok(snapshots)
    }

    async fn rollout_state(&self, item_id: Uuid) -> Result<RolloutState, StoreError> {
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(rollout_key(item_id))
            .query_async(&mut self.client.as_ref().clone())
            .await?;
        Ok(rollout_from_fields(&fields))
    }

    async fn save_rollout_state(&self, item_id: Uuid, state: RolloutState) -> Result<(), StoreError> {
        let granted: String = ROLLOUT_RATCHET
            .key(rollout_key(item_id))
            .arg(state.granted.as_str())
            .arg(if state.throttled { "1" } else { "0" })
            .invoke_async(&mut self.client.as_ref().clone())
            .await
            .map_err(|e| {
                warn!(item_id = %item_id, "Rollout state save failed: {}", e);
                StoreError::from(e)
            })?;

        debug!(
            item_id = %item_id,
            requested = %state.granted,
            granted = %granted,
            throttled = state.throttled,
            "Rollout state saved"
        );
        Ok(())
    }
}
