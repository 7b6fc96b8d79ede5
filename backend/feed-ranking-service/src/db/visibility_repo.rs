/// Visibility Repository
///
/// Per-viewer in-feed sampling flags written by the notification pipeline.
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::VisibilityRecord;
use crate::services::visibility::VisibilityStore;

#[derive(Clone)]
pub struct VisibilityRepo {
    pool: PgPool,
}

impl VisibilityRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisibilityStore for VisibilityRepo {
    async fn lookup(
        &self,
        viewer_id: Uuid,
        item_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, bool>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, bool)>(
            r#"
            SELECT item_id, show_in_feed
            FROM feed_visibility
            WHERE viewer_id = $1 AND item_id = ANY($2)
            "#,
        )
        .bind(viewer_id)
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn record_plan(&self, records: &[VisibilityRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let viewers: Vec<Uuid> = records.iter().map(|r| r.viewer_id).collect();
        let items: Vec<Uuid> = records.iter().map(|r| r.item_id).collect();
        let flags: Vec<bool> = records.iter().map(|r| r.show_in_feed).collect();

        // existing decisions are never flipped by a replayed plan
        let result = sqlx::query(
            r#"
            INSERT INTO feed_visibility (viewer_id, item_id, show_in_feed)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::bool[])
            ON CONFLICT (viewer_id, item_id) DO NOTHING
            "#,
        )
        .bind(&viewers)
        .bind(&items)
        .bind(&flags)
        .execute(&self.pool)
        .await?;

        debug!(
            planned = records.len(),
            inserted = result.rows_affected(),
            "Visibility plan recorded"
        );
        Ok(())
    }
}
