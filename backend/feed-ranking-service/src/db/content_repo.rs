/// Content Repository
///
/// Candidate reads for feed assembly. Filters applied here, before ranking:
/// published, not hidden by the viewer, not the viewer's own, not
/// category-only, and inside the viewer's location scope.
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{CandidateQuery, CandidateRecord, ContentVariant, VariantCounts, ViewerLocation};
use crate::services::assembler::ContentStore;

/// `$1` viewer id, `$2` country, `$3` city
const ELIGIBLE_FILTER: &str = r#"
    (i.is_published IS NULL OR i.is_published)
    AND i.author_id IS DISTINCT FROM $1
    AND (i.publish_scope IS NULL OR i.publish_scope = 'home_and_category')
    AND NOT EXISTS (
        SELECT 1 FROM feed_item_hidden h
        WHERE h.item_id = i.id AND h.viewer_id = $1
    )
    AND (
        $2::text IS NULL
        OR i.scope IS NULL
        OR i.scope = 'global'
        OR (
            i.scope = 'local'
            AND i.country = $2
            AND ($3::text IS NULL OR i.city IS NULL OR i.city = $3)
        )
    )
"#;

#[derive(Clone)]
pub struct ContentRepo {
    pool: PgPool,
}

impl ContentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for ContentRepo {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Vec<CandidateRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT
                i.id,
                i.variant,
                u.id AS author_id,
                u.user_type AS author_user_type,
                u.name AS author_name,
                u.avatar AS author_avatar,
                u.company_name AS author_company_name,
                i.created_at,
                i.reaction_count,
                i.comment_count,
                i.payload
            FROM feed_items i
            LEFT JOIN users u ON u.id = i.author_id
            WHERE {}
            ORDER BY i.created_at DESC NULLS LAST
            LIMIT $4
            "#,
            ELIGIBLE_FILTER
        );

        let rows = sqlx::query_as::<_, CandidateRecord>(&sql)
            .bind(query.viewer_id)
            .bind(query.location.country.as_deref())
            .bind(query.location.city.as_deref())
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(viewer_id = %query.viewer_id, "Failed to fetch feed candidates: {}", e);
                StoreError::from(e)
            })?;

        debug!(viewer_id = %query.viewer_id, rows = rows.len(), "Fetched feed candidates");
        Ok(rows)
    }

    async fn count_by_variant(
        &self,
        viewer_id: Uuid,
        location: &ViewerLocation,
    ) -> Result<VariantCounts, StoreError> {
        let sql = format!(
            r#"
            SELECT i.variant, COUNT(*)::bigint
            FROM feed_items i
            WHERE {}
            GROUP BY i.variant
            "#,
            ELIGIBLE_FILTER
        );

        let rows = sqlx::query_as::<_, (String, i64)>(&sql)
            .bind(viewer_id)
            .bind(location.country.as_deref())
            .bind(location.city.as_deref())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(viewer_id = %viewer_id, "Failed to count feed items: {}", e);
                StoreError::from(e)
            })?;

        let mut counts = VariantCounts::default();
        for (variant, count) in rows {
            match ContentVariant::parse(&variant) {
                Some(ContentVariant::Post) => counts.posts += count,
                Some(ContentVariant::ShipmentAd) => counts.shipment_ads += count,
                Some(ContentVariant::EmptyTruckAd) => counts.empty_truck_ads += count,
                None => debug!(variant = %variant, count = count, "Skipping unknown variant in stats"),
            }
        }
        Ok(counts)
    }
}
