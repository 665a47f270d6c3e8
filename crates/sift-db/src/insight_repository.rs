use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sift_core::error::AppError;
use sift_core::models::Insight;
use sift_core::traits::InsightStore;

/// PostgreSQL-backed insight persistence.
#[derive(Clone)]
pub struct InsightRepository {
    pool: Pool<Postgres>,
}

impl InsightRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of insights stored for one job.
    pub async fn count_for_job(&self, job_id: Uuid) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM insights WHERE job_id = $1"#)
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

impl InsightStore for InsightRepository {
    async fn store_batch(&self, job_id: Uuid, insights: &[Insight]) -> Result<u32, AppError> {
        if insights.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut inserted = 0u32;
        for insight in insights {
            let entities = serde_json::to_value(&insight.entities)?;
            let provenance = serde_json::to_value(&insight.provenance)?;

            // (job_id, post_id) uniqueness keeps retried jobs from
            // double-writing rows they already stored.
            let result = sqlx::query(
                r#"
                INSERT INTO insights
                    (job_id, tenant, post_id, content_text, ocr_text,
                     sentiment, sentiment_score, entities, topics, keywords,
                     language, author, published_at, provenance,
                     is_spam, is_duplicate, is_exact_duplicate, is_near_duplicate,
                     duplicate_of)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                        $11, $12, $13, $14, $15, $16, $17, $18, $19)
                ON CONFLICT (job_id, post_id) DO NOTHING
                "#,
            )
            .bind(job_id)
            .bind(&insight.tenant)
            .bind(&insight.post_id)
            .bind(&insight.content_text)
            .bind(&insight.ocr_text)
            .bind(&insight.sentiment)
            .bind(insight.sentiment_score)
            .bind(&entities)
            .bind(&insight.topics)
            .bind(&insight.keywords)
            .bind(&insight.language)
            .bind(&insight.author)
            .bind(insight.published_at)
            .bind(&provenance)
            .bind(insight.is_spam)
            .bind(insight.is_duplicate)
            .bind(insight.is_exact_duplicate)
            .bind(insight.is_near_duplicate)
            .bind(&insight.duplicate_of)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            inserted += result.rows_affected() as u32;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(%job_id, inserted, total = insights.len(), "Stored insight batch");
        Ok(inserted)
    }
}
