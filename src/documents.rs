use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;
use crate::models::{BatchRun, EvaluationRecord, Period, UserId};
use crate::stores::DocumentStore;

/// All users' results for one (data type, period). At most one per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterAggregateDocument {
    pub data_type: String,
    pub period: String,
    pub users: BTreeMap<String, serde_json::Value>,
    pub user_count: usize,
    pub activity_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl QuarterAggregateDocument {
    pub fn new(data_type: &str, period: Period) -> Self {
        Self {
            data_type: data_type.to_string(),
            period: period.to_string(),
            users: BTreeMap::new(),
            user_count: 0,
            activity_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn merge_record(&mut self, record: &EvaluationRecord) -> Result<()> {
        let payload = serde_json::to_value(record)?;
        self.merge_user(record.user_id, payload, record.evaluated_at);
        Ok(())
    }

    /// Replaces the user's entry (never appends a second one) and recomputes
    /// the counters from the entries themselves.
    pub fn merge_user(
        &mut self,
        user_id: UserId,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) {
        self.users.insert(user_id.to_string(), payload);
        self.user_count = self.users.len();
        self.activity_count = self
            .users
            .values()
            .filter_map(|entry| entry.get("activity_count")?.as_u64())
            .sum();
        self.updated_at = at;
    }
}

/// Aggregate documents and batch summaries kept as JSONB in Postgres.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert_evaluation(
        &self,
        record: &EvaluationRecord,
    ) -> Result<QuarterAggregateDocument> {
        let data_type = record.kind.data_type_tag();
        let period = record.period.to_string();
        let mut tx = self.pool.begin().await?;

        // The row has to exist before it can be locked, otherwise two writers on
        // a fresh period both start from an empty document.
        let empty = QuarterAggregateDocument::new(data_type, record.period);
        sqlx::query(
            r#"
            INSERT INTO performance_review.aggregate_documents (data_type, period, document, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (data_type, period) DO NOTHING
            "#,
        )
        .bind(data_type)
        .bind(&period)
        .bind(Json(&empty))
        .bind(empty.updated_at)
        .execute(&mut *tx)
        .await?;

        let Json(mut document): Json<QuarterAggregateDocument> = sqlx::query_scalar(
            r#"
            SELECT document FROM performance_review.aggregate_documents
            WHERE data_type = $1 AND period = $2
            FOR UPDATE
            "#,
        )
        .bind(data_type)
        .bind(&period)
        .fetch_one(&mut *tx)
        .await?;

        document.merge_record(record)?;

        sqlx::query(
            r#"
            UPDATE performance_review.aggregate_documents
            SET document = $3, updated_at = $4
            WHERE data_type = $1 AND period = $2
            "#,
        )
        .bind(data_type)
        .bind(&period)
        .bind(Json(&document))
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            data_type,
            period = %period,
            users = document.user_count,
            "aggregate document updated"
        );
        Ok(document)
    }

    async fn record_batch_run(&self, run: &BatchRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance_review.batch_runs
            (id, kind, period, target_user_ids, total_users, successful_evaluations,
             failed_evaluations, start_time, end_time, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id)
        .bind(run.kind.as_str())
        .bind(run.period.to_string())
        .bind(&run.target_user_ids)
        .bind(count_column(run.total_users))
        .bind(count_column(run.successful_evaluations))
        .bind(count_column(run.failed_evaluations))
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(Json(run))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn count_column(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationKind;

    fn record(user_id: UserId, score: f64, activity_count: u32) -> EvaluationRecord {
        EvaluationRecord {
            user_id,
            kind: EvaluationKind::Peer,
            period: Period::new(2025, 2).unwrap(),
            score: Some(score),
            dimensions: None,
            narrative: format!("narrative for {user_id}"),
            activity_count,
            evaluated_at: Utc::now(),
        }
    }

    fn empty_document() -> QuarterAggregateDocument {
        QuarterAggregateDocument::new("peer_evaluation", Period::new(2025, 2).unwrap())
    }

    #[test]
    fn merging_the_same_record_twice_keeps_one_entry() {
        let mut document = empty_document();
        let first = record(7, 3.1, 4);
        document.merge_record(&first).unwrap();
        document.merge_record(&first).unwrap();

        assert_eq!(document.users.len(), 1);
        assert_eq!(document.user_count, 1);
        assert_eq!(document.activity_count, 4);
    }

    #[test]
    fn later_record_replaces_earlier_entry() {
        let mut document = empty_document();
        document.merge_record(&record(7, 3.1, 4)).unwrap();
        document.merge_record(&record(7, 4.2, 6)).unwrap();

        assert_eq!(document.users["7"]["score"], 4.2);
        assert_eq!(document.activity_count, 6);
    }

    #[test]
    fn counters_sum_across_users() {
        let mut document = empty_document();
        document.merge_record(&record(1, 2.0, 3)).unwrap();
        document.merge_record(&record(2, 2.5, 5)).unwrap();

        assert_eq!(document.user_count, 2);
        assert_eq!(document.activity_count, 8);
        assert_eq!(document.period, "2025-Q2");
    }

    #[test]
    fn placeholder_row_reads_back_as_empty_document() {
        let stored = serde_json::to_value(empty_document()).unwrap();
        let mut document: QuarterAggregateDocument = serde_json::from_value(stored).unwrap();
        assert!(document.users.is_empty());

        document.merge_record(&record(3, 2.0, 1)).unwrap();
        assert_eq!(document.user_count, 1);
    }

    // Requires DATABASE_URL pointing at a scratch Postgres, run with --ignored
    #[tokio::test]
    #[ignore]
    async fn concurrent_writers_on_a_new_period_keep_every_user() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::init_db(&pool).await.unwrap();
        let store = PgDocumentStore::new(pool.clone());

        for quarter in 1..=4 {
            let period = Period::new(2099, quarter).unwrap();
            sqlx::query(
                r#"
                DELETE FROM performance_review.aggregate_documents
                WHERE period = $1
                "#,
            )
            .bind(period.to_string())
            .execute(&pool)
            .await
            .unwrap();

            let mut first = record(1, 2.0, 1);
            first.period = period;
            let mut second = record(2, 3.0, 1);
            second.period = period;
            let (a, b) = tokio::join!(
                store.upsert_evaluation(&first),
                store.upsert_evaluation(&second)
            );
            a.unwrap();
            b.unwrap();

            let Json(stored): Json<QuarterAggregateDocument> = sqlx::query_scalar(
                r#"
                SELECT document FROM performance_review.aggregate_documents
                WHERE data_type = 'peer_evaluation' AND period = $1
                "#,
            )
            .bind(period.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(stored.user_count, 2, "lost a user for {period}");
        }
    }
}
