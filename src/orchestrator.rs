//! Sequential evaluation of a set of users with per-user failure isolation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConfigError, Result};
use crate::llm;
use crate::models::{
    ActivityRecord, BatchFailure, BatchRun, EvaluationKind, EvaluationRecord, EvaluationStatus,
    FailureReason, GradeSheet, KeywordTally, Period, ScoredUser, UserId, UserOutcome,
};
use crate::scoring;
use crate::stores::{DocumentStore, RecordStore, TextGenerator, VectorIndex};
use crate::vector;

#[derive(Debug, Clone)]
pub enum UserSelection {
    /// Every user with input for the period.
    All,
    Explicit(Vec<UserId>),
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Matches fetched when discovering users from the vector index.
    pub discovery_limit: usize,
    /// Matches fetched per user for weekly reports.
    pub activity_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            discovery_limit: 1000,
            activity_limit: 200,
        }
    }
}

enum EvaluationInput {
    Peer(Vec<KeywordTally>),
    Quarterly(GradeSheet),
    Weekly(Vec<ActivityRecord>),
}

enum Attempt {
    Completed(EvaluationRecord),
    Declined(FailureReason),
}

/// A batch that has started but not finished. Consumed by `finish`.
struct RunningBatch {
    id: Uuid,
    kind: EvaluationKind,
    period: Period,
    target_user_ids: Vec<UserId>,
    start_time: DateTime<Utc>,
    outcomes: Vec<UserOutcome>,
}

impl RunningBatch {
    fn start(kind: EvaluationKind, period: Period, target_user_ids: Vec<UserId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            period,
            outcomes: Vec::with_capacity(target_user_ids.len()),
            target_user_ids,
            start_time: Utc::now(),
        }
    }

    fn record(&mut self, outcome: UserOutcome) {
        self.outcomes.push(outcome);
    }

    fn finish(self) -> BatchRun {
        let mut evaluated = Vec::new();
        let mut failures = Vec::new();
        for outcome in &self.outcomes {
            match &outcome.status {
                EvaluationStatus::Succeeded(record) => evaluated.push(ScoredUser {
                    user_id: outcome.user_id,
                    score: record.score,
                }),
                EvaluationStatus::Failed(reason) => failures.push(BatchFailure {
                    user_id: outcome.user_id,
                    reason: reason.to_string(),
                }),
            }
        }

        BatchRun {
            id: self.id,
            kind: self.kind,
            period: self.period,
            total_users: self.target_user_ids.len(),
            successful_evaluations: evaluated.len(),
            failed_evaluations: failures.len(),
            target_user_ids: self.target_user_ids,
            start_time: self.start_time,
            end_time: Utc::now(),
            evaluated,
            failures,
        }
    }
}

pub struct BatchOrchestrator {
    records: Arc<dyn RecordStore>,
    documents: Arc<dyn DocumentStore>,
    generator: Arc<dyn TextGenerator>,
    vectors: Option<Arc<dyn VectorIndex>>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        documents: Arc<dyn DocumentStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            records,
            documents,
            generator,
            vectors: None,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_vector_index(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    fn vector_index(&self) -> Result<&dyn VectorIndex> {
        self.vectors
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("VECTOR_INDEX_HOST").into())
    }

    fn ensure_ready(&self, kind: EvaluationKind) -> Result<()> {
        if kind.needs_vector_index() {
            self.vector_index()?;
        }
        Ok(())
    }

    /// Evaluates every selected user in order and persists the run summary.
    ///
    /// Only faults before the loop (configuration, discovery) are returned as
    /// errors; per-user faults end up in the summary.
    pub async fn run(
        &self,
        kind: EvaluationKind,
        period: Period,
        selection: UserSelection,
    ) -> Result<BatchRun> {
        self.ensure_ready(kind)?;
        let targets = match selection {
            UserSelection::All => self.discover(kind, period).await?,
            UserSelection::Explicit(ids) => dedup_in_order(ids),
        };

        info!(%kind, %period, users = targets.len(), "starting batch evaluation");
        let mut batch = RunningBatch::start(kind, period, targets.clone());
        for user in targets {
            let outcome = self.evaluate_user(kind, user, period).await;
            batch.record(outcome);
        }

        let run = batch.finish();
        if let Err(err) = self.documents.record_batch_run(&run).await {
            error!(run_id = %run.id, error = %err, "failed to persist batch summary");
        }
        info!(
            run_id = %run.id,
            successful = run.successful_evaluations,
            failed = run.failed_evaluations,
            "batch evaluation finished"
        );
        Ok(run)
    }

    /// Evaluates a single user without discovering the full set.
    pub async fn evaluate_one(
        &self,
        kind: EvaluationKind,
        user: UserId,
        period: Period,
    ) -> Result<UserOutcome> {
        self.ensure_ready(kind)?;
        Ok(self.evaluate_user(kind, user, period).await)
    }

    async fn discover(&self, kind: EvaluationKind, period: Period) -> Result<Vec<UserId>> {
        match kind {
            EvaluationKind::Weekly => {
                let matches = self
                    .vector_index()?
                    .query(None, self.settings.discovery_limit)
                    .await?;
                let activities = vector::activities_from_matches(&matches);
                Ok(vector::distinct_user_ids(&activities, period))
            }
            EvaluationKind::Peer | EvaluationKind::Quarterly => {
                self.records.user_ids_with_input(kind, period).await
            }
        }
    }

    async fn evaluate_user(
        &self,
        kind: EvaluationKind,
        user: UserId,
        period: Period,
    ) -> UserOutcome {
        let status = match self.attempt(kind, user, period).await {
            Ok(Attempt::Completed(record)) => {
                debug!(user, score = ?record.score, "evaluation stored");
                EvaluationStatus::Succeeded(record)
            }
            Ok(Attempt::Declined(reason)) => {
                warn!(user, %reason, "user not evaluated");
                EvaluationStatus::Failed(reason)
            }
            Err(err) => {
                warn!(user, error = %err, "evaluation failed");
                EvaluationStatus::Failed(FailureReason::Collaborator(err.to_string()))
            }
        };
        UserOutcome {
            user_id: user,
            status,
        }
    }

    async fn attempt(
        &self,
        kind: EvaluationKind,
        user: UserId,
        period: Period,
    ) -> Result<Attempt> {
        let Some(input) = self.gather(kind, user, period).await? else {
            return Ok(Attempt::Declined(FailureReason::NoData));
        };

        let (score, dimensions, prompt, activity_count) = match &input {
            EvaluationInput::Peer(tallies) => {
                let dims = scoring::compute_dimension_scores(tallies);
                let score = scoring::compute_final_score(&dims).value();
                let prompt = llm::peer_prompt(user, period, tallies, &dims, score);
                let selections: u64 = tallies.iter().map(|t| u64::from(t.count)).sum();
                (Some(score), Some(dims), prompt, selections)
            }
            EvaluationInput::Quarterly(sheet) => {
                let Some(score) = scoring::compute_grade_based_score(
                    &sheet.grades,
                    sheet.difficulty,
                    sheet.compliance_percent,
                ) else {
                    return Ok(Attempt::Declined(FailureReason::Unscorable(
                        "no graded tasks".to_string(),
                    )));
                };
                let prompt = llm::quarterly_prompt(user, period, sheet, score);
                (Some(score), None, prompt, sheet.grades.len() as u64)
            }
            EvaluationInput::Weekly(activities) => {
                let prompt = llm::weekly_prompt(user, period, activities);
                (None, None, prompt, activities.len() as u64)
            }
        };

        let narrative = self.generator.generate(&prompt).await?;
        let record = EvaluationRecord {
            user_id: user,
            kind,
            period,
            score,
            dimensions,
            narrative,
            activity_count: u32::try_from(activity_count).unwrap_or(u32::MAX),
            evaluated_at: Utc::now(),
        };

        self.records.upsert_score(&record).await?;
        self.documents.upsert_evaluation(&record).await?;
        Ok(Attempt::Completed(record))
    }

    async fn gather(
        &self,
        kind: EvaluationKind,
        user: UserId,
        period: Period,
    ) -> Result<Option<EvaluationInput>> {
        let input = match kind {
            EvaluationKind::Peer => {
                let tallies = self.records.keyword_tallies(user, period).await?;
                (!tallies.is_empty()).then_some(EvaluationInput::Peer(tallies))
            }
            EvaluationKind::Quarterly => self
                .records
                .grade_sheet(user, period)
                .await?
                .map(EvaluationInput::Quarterly),
            EvaluationKind::Weekly => {
                let matches = self
                    .vector_index()?
                    .query(Some(user), self.settings.activity_limit)
                    .await?;
                let activities: Vec<ActivityRecord> = vector::activities_from_matches(&matches)
                    .into_iter()
                    .filter(|record| record.user_id == user && record.starts_in(period))
                    .collect();
                (!activities.is_empty()).then_some(EvaluationInput::Weekly(activities))
            }
        };
        Ok(input)
    }
}

fn dedup_in_order(ids: Vec<UserId>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
