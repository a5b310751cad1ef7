//! Activity records stored in a hosted vector index.
//!
//! The index is only queried by metadata filter; a constant probe vector stands
//! in for a real embedding since ranking does not matter here.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::VectorConfig;
use crate::error::{EvaluationError, Result};
use crate::models::{ActivityRecord, Period, UserId};
use crate::stores::{VectorIndex, VectorMatch};

pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeIndex {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let (host, api_key) = config.credentials()?;
        Ok(Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            namespace: config.namespace.clone(),
            dimension: config.dimension,
        })
    }

    fn probe_vector(&self) -> Vec<f32> {
        let component = 1.0 / (self.dimension.max(1) as f32).sqrt();
        vec![component; self.dimension]
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(&self, user: Option<UserId>, top_k: usize) -> Result<Vec<VectorMatch>> {
        let request = QueryRequest {
            vector: self.probe_vector(),
            top_k,
            include_metadata: true,
            namespace: self.namespace.clone(),
            filter: user.map(|id| serde_json::json!({ "user_id": { "$eq": id } })),
        };
        debug!(?user, top_k, "querying vector index");

        let response = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluationError::Api {
                service: "vector index",
                status,
                body,
            });
        }

        let parsed: QueryResponse = response.json().await?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|raw| VectorMatch {
                id: raw.id,
                score: raw.score,
                metadata: raw.metadata.unwrap_or_default(),
            })
            .collect())
    }
}

/// Accepts numeric ids and numeric strings.
fn metadata_user_id(metadata: &Map<String, Value>) -> Option<UserId> {
    match metadata.get("user_id")? {
        Value::Number(number) => number.as_i64().or_else(|| {
            let float = number.as_f64()?;
            (float.fract() == 0.0).then_some(float as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn metadata_string(metadata: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| match metadata.get(*key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Matches without a usable `user_id` are dropped; other missing fields become "".
pub fn activity_from_match(found: &VectorMatch) -> Option<ActivityRecord> {
    let Some(user_id) = metadata_user_id(&found.metadata) else {
        debug!(id = %found.id, score = found.score, "vector match without user_id skipped");
        return None;
    };

    Some(ActivityRecord {
        user_id,
        start_date: metadata_string(&found.metadata, &["start_date"]),
        end_date: metadata_string(&found.metadata, &["end_date"]),
        report_type: metadata_string(&found.metadata, &["report_type", "type"]),
        content: metadata_string(&found.metadata, &["content", "text", "summary"]),
    })
}

/// Maps matches to activities, keeping only the first record for each
/// (user, start date, end date).
pub fn activities_from_matches(matches: &[VectorMatch]) -> Vec<ActivityRecord> {
    let mut seen = HashSet::new();
    matches
        .iter()
        .filter_map(activity_from_match)
        .filter(|record| {
            let dates = (record.start_date.clone(), record.end_date.clone());
            seen.insert((record.user_id, dates))
        })
        .collect()
}

/// Users with at least one activity starting inside `period`, in first-seen order.
pub fn distinct_user_ids(activities: &[ActivityRecord], period: Period) -> Vec<UserId> {
    let mut seen = HashSet::new();
    activities
        .iter()
        .filter(|record| record.starts_in(period))
        .map(|record| record.user_id)
        .filter(|id| seen.insert(*id))
        .collect()
}
