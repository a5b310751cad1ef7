//! Narrative feedback from an OpenAI-compatible chat completions endpoint.

use std::fmt::Write;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{EvaluationError, Result};
use crate::models::{ActivityRecord, DimensionScoreSet, GradeSheet, KeywordTally, Period, UserId};
use crate::stores::TextGenerator;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.validate()?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting narrative");
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You write concise, constructive employee performance feedback.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluationError::Api {
                service: "text generation",
                status,
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_content(parsed)
    }
}

fn first_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| EvaluationError::Api {
            service: "text generation",
            status: 200,
            body: "empty completion".to_string(),
        })
}

pub fn peer_prompt(
    user: UserId,
    period: Period,
    tallies: &[KeywordTally],
    dims: &DimensionScoreSet,
    score: f64,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Peer evaluation for employee {user}, {period}.");
    let _ = writeln!(prompt, "Overall peer score: {score:.2} / 5.00");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Keywords chosen by colleagues:");
    for tally in tallies {
        let _ = writeln!(
            prompt,
            "- {} ({}): selected {} times",
            tally.category,
            tally.polarity.as_str(),
            tally.count
        );
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Dimension scores:");
    for (dimension, value) in dims.iter() {
        let _ = writeln!(prompt, "- {}: {:.3}", dimension.name(), value);
    }
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Summarise strengths and areas to improve in three short paragraphs."
    );
    prompt
}

pub fn quarterly_prompt(user: UserId, period: Period, sheet: &GradeSheet, score: f64) -> String {
    let graded: Vec<String> = sheet
        .grades
        .iter()
        .map(|grade| match grade {
            Some(grade) => format!("{grade:?}"),
            None => "ungraded".to_string(),
        })
        .collect();

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Quarterly review for employee {user}, {period}.");
    let _ = writeln!(prompt, "Task grades: {}", graded.join(", "));
    let _ = writeln!(prompt, "Task difficulty: {} of 5", sheet.difficulty);
    let _ = writeln!(
        prompt,
        "Process compliance: {:.0}%",
        sheet.compliance_percent
    );
    let _ = writeln!(prompt, "Weighted quarterly score: {score:.2}");
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Write a balanced quarterly assessment with one concrete goal for next quarter."
    );
    prompt
}

pub fn weekly_prompt(user: UserId, period: Period, activities: &[ActivityRecord]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Weekly activity reports for employee {user}, {period}."
    );
    for activity in activities {
        let _ = writeln!(
            prompt,
            "## {} to {} {}",
            activity.start_date, activity.end_date, activity.report_type
        );
        let _ = writeln!(prompt, "{}", activity.content);
    }
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Summarise the work delivered over the period and note recurring blockers."
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, Polarity};

    #[test]
    fn first_non_empty_choice_is_returned() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "  Solid quarter.  " } }
            ]
        }))
        .unwrap();
        assert_eq!(first_content(response).unwrap(), "Solid quarter.");
    }

    #[test]
    fn empty_completion_is_an_error() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        }))
        .unwrap();
        assert!(matches!(
            first_content(response),
            Err(EvaluationError::Api { .. })
        ));
    }

    #[test]
    fn peer_prompt_lists_keywords_and_dimensions() {
        let tallies = vec![KeywordTally {
            category: "team player".to_string(),
            polarity: Polarity::Positive,
            weights: DimensionScoreSet::uniform(0.5),
            count: 4,
        }];
        let prompt = peer_prompt(
            12,
            Period::new(2025, 3).unwrap(),
            &tallies,
            &DimensionScoreSet::uniform(0.5),
            2.5,
        );
        assert!(prompt.contains("employee 12, 2025-Q3"));
        assert!(prompt.contains("team player (positive): selected 4 times"));
        assert!(prompt.contains("self_centeredness: 0.500"));
    }

    #[test]
    fn quarterly_prompt_marks_ungraded_tasks() {
        let sheet = GradeSheet {
            grades: vec![Some(Grade::A), None],
            difficulty: 4,
            compliance_percent: 90.0,
        };
        let prompt = quarterly_prompt(3, Period::new(2025, 1).unwrap(), &sheet, 4.5);
        assert!(prompt.contains("Task grades: A, ungraded"));
        assert!(prompt.contains("compliance: 90%"));
    }
}
