use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RankingConfig;
use crate::error::{AppError, Result, StoreError};
use crate::metrics;
use crate::middleware::ViewerId;
use crate::models::ItemCounters;
use crate::services::assembler::{FeedAssembler, FeedRequest};
use crate::services::distribution::RolloutDecision;
use crate::services::engagement::{EngagementAccumulator, InteractionKind, RecordOutcome};

#[derive(Debug, Deserialize)]
pub struct FeedQueryParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl FeedQueryParams {
    /// Resolve page (1-based, rejected below 1) and limit (clamped to `[1, max]`)
    fn page_and_limit(&self, ranking: &RankingConfig) -> Result<(u32, u32)> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(AppError::BadRequest("page must be >= 1".to_string()));
        }
        let page = u32::try_from(page)
            .map_err(|_| AppError::BadRequest("page is out of range".to_string()))?;

        let max = i64::from(ranking.max_page_size.max(1));
        let limit = self
            .limit
            .unwrap_or_else(|| i64::from(ranking.default_page_size))
            .clamp(1, max) as u32;

        Ok((page, limit))
    }

    fn into_request(self, viewer_id: Uuid, page: u32, limit: u32) -> FeedRequest {
        FeedRequest {
            viewer_id,
            page,
            limit,
            country: self.country,
            city: self.city,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InteractionBody {
    pub kind: InteractionKind,
}

/// Answer to impression/interaction calls. Always 202; `recorded` tells
/// whether the counters actually moved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub recorded: bool,
    pub item_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<ItemCounters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RolloutDecision>,
}

impl RecordResponse {
    fn from_outcome(
        item_id: Uuid,
        outcome: std::result::Result<RecordOutcome, StoreError>,
        operation: &str,
    ) -> Self {
        match outcome {
            Ok(outcome) => Self {
                recorded: true,
                item_id,
                counters: Some(outcome.counters),
                decision: Some(outcome.decision),
            },
            Err(e) => {
                warn!(item_id = %item_id, operation = operation, error = %e, "Counter update failed");
                metrics::record_counter_failure(operation);
                Self {
                    recorded: false,
                    item_id,
                    counters: None,
                    decision: None,
                }
            }
        }
    }
}

pub struct FeedHandlerState {
    pub assembler: Arc<FeedAssembler>,
    pub accumulator: Arc<EngagementAccumulator>,
    pub ranking: RankingConfig,
}

#[get("")]
pub async fn get_feed(
    query: web::Query<FeedQueryParams>,
    viewer: ViewerId,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let (page, limit) = query.page_and_limit(&state.ranking)?;
    debug!(viewer_id = %viewer.0, page = page, limit = limit, "Getting feed");

    let request = query.into_inner().into_request(viewer.0, page, limit);
    let feed = state.assembler.assemble(request).await?;

    Ok(HttpResponse::Ok().json(feed))
}

#[get("/stats")]
pub async fn get_feed_stats(
    query: web::Query<FeedQueryParams>,
    viewer: ViewerId,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let request = query.into_inner().into_request(viewer.0, 1, 1);
    let stats = state.assembler.stats(&request).await?;

    Ok(HttpResponse::Ok().json(stats))
}

#[post("/items/{item_id}/impressions")]
pub async fn record_impression(
    path: web::Path<String>,
    viewer: ViewerId,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let item_id = parse_item_id(&path)?;
    let outcome = state.accumulator.record_impression(item_id, viewer.0).await;

    Ok(HttpResponse::Accepted().json(RecordResponse::from_outcome(item_id, outcome, "impression")))
}

#[post("/items/{item_id}/interactions")]
pub async fn record_interaction(
    path: web::Path<String>,
    body: web::Json<InteractionBody>,
    _viewer: ViewerId,
    state: web::Data<FeedHandlerState>,
) -> Result<HttpResponse> {
    let item_id = parse_item_id(&path)?;
    let outcome = state.accumulator.record_interaction(item_id, body.kind).await;

    Ok(HttpResponse::Accepted().json(RecordResponse::from_outcome(item_id, outcome, "interaction")))
}

fn parse_item_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid item id: {}", raw)))
}
