//! Seams to the external systems the orchestrator talks to.

use async_trait::async_trait;

use crate::documents::QuarterAggregateDocument;
use crate::error::Result;
use crate::models::{
    BatchRun, EvaluationKind, EvaluationRecord, GradeSheet, KeywordTally, Period, UserId,
};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn keyword_tallies(&self, user: UserId, period: Period) -> Result<Vec<KeywordTally>>;

    /// `None` when the user has no task grades for the period.
    async fn grade_sheet(&self, user: UserId, period: Period) -> Result<Option<GradeSheet>>;

    async fn user_ids_with_input(
        &self,
        kind: EvaluationKind,
        period: Period,
    ) -> Result<Vec<UserId>>;

    async fn upsert_score(&self, record: &EvaluationRecord) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, user: Option<UserId>, top_k: usize) -> Result<Vec<VectorMatch>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the aggregate document as stored after the merge.
    async fn upsert_evaluation(
        &self,
        record: &EvaluationRecord,
    ) -> Result<QuarterAggregateDocument>;

    async fn record_batch_run(&self, run: &BatchRun) -> Result<()>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
