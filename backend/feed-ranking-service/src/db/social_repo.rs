/// Social graph reads: following set and profile location
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::ViewerLocation;
use crate::services::assembler::SocialGraph;

#[derive(Clone)]
pub struct SocialRepo {
    pool: PgPool,
}

impl SocialRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialGraph for SocialRepo {
    async fn following(&self, viewer_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT followee_id FROM follows WHERE follower_id = $1
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(viewer_id = %viewer_id, "Failed to load following set: {}", e);
            StoreError::from(e)
        })?;

        Ok(rows.into_iter().collect())
    }

    async fn location(&self, viewer_id: Uuid) -> Result<ViewerLocation, StoreError> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            r#"
            SELECT country, city FROM users WHERE id = $1
            "#,
        )
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(country, city)| ViewerLocation { country, city })
            .unwrap_or_default())
    }
}
