use std::fmt::Write;

use crate::models::{BatchRun, EvaluationKind, Period, PeriodScore};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBand {
    pub label: &'static str,
    pub count: usize,
}

const BANDS: [(&str, f64, f64); 5] = [
    ("4.0 - 5.0", 4.0, f64::INFINITY),
    ("3.0 - 4.0", 3.0, 4.0),
    ("2.0 - 3.0", 2.0, 3.0),
    ("1.0 - 2.0", 1.0, 2.0),
    ("0.0 - 1.0", f64::NEG_INFINITY, 1.0),
];

pub fn summarize_by_band(scores: &[PeriodScore]) -> Vec<ScoreBand> {
    BANDS
        .iter()
        .map(|&(label, low, high)| ScoreBand {
            label,
            count: scores
                .iter()
                .filter_map(|s| s.score)
                .filter(|score| *score >= low && *score < high)
                .count(),
        })
        .collect()
}

pub fn average_score(scores: &[PeriodScore]) -> Option<f64> {
    let values: Vec<f64> = scores.iter().filter_map(|s| s.score).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn build_report(kind: EvaluationKind, period: Period, scores: &[PeriodScore]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Performance Evaluation Report");
    let _ = writeln!(output, "Generated for {} evaluations, {}", kind, period);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Distribution");

    match average_score(scores) {
        None => {
            let _ = writeln!(output, "No scored evaluations for this period.");
        }
        Some(average) => {
            let users = scores.len();
            let _ = writeln!(output, "Average score {average:.2} across {users} users");
            for band in summarize_by_band(scores) {
                let _ = writeln!(output, "- {}: {} users", band.label, band.count);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Scores");

    if scores.is_empty() {
        let _ = writeln!(output, "No users evaluated for this period.");
    } else {
        for score in scores.iter().filter(|s| s.score.is_some()).take(10) {
            let _ = writeln!(
                output,
                "- user {} score {:.2} (evaluated {})",
                score.user_id,
                score.score.unwrap_or_default(),
                score.evaluated_at.format("%Y-%m-%d")
            );
        }
    }

    let unscored = scores.iter().filter(|s| s.score.is_none()).count();
    if unscored > 0 {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "{unscored} users have narrative feedback without a numeric score."
        );
    }

    output
}

pub fn render_batch_summary(run: &BatchRun) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Batch {} ({} {}): {} of {} users evaluated, {} failed in {:.1}s.",
        run.id,
        run.kind,
        run.period,
        run.successful_evaluations,
        run.total_users,
        run.failed_evaluations,
        (run.end_time - run.start_time).num_milliseconds() as f64 / 1000.0
    );
    for user in &run.evaluated {
        match user.score {
            Some(score) => {
                let _ = writeln!(output, "- user {} score {:.2}", user.user_id, score);
            }
            None => {
                let _ = writeln!(output, "- user {} narrative stored", user.user_id);
            }
        }
    }
    for failure in &run.failures {
        let _ = writeln!(
            output,
            "- user {} failed: {}",
            failure.user_id, failure.reason
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::{BatchFailure, ScoredUser};

    fn score(user_id: i64, score: Option<f64>) -> PeriodScore {
        PeriodScore {
            user_id,
            score,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn bands_bucket_scores_and_skip_missing() {
        let scores = vec![
            score(1, Some(5.0)),
            score(2, Some(4.0)),
            score(3, Some(2.5)),
            score(4, Some(0.0)),
            score(5, None),
        ];
        let bands = summarize_by_band(&scores);
        let counts: Vec<usize> = bands.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 0, 1, 0, 1]);
    }

    #[test]
    fn average_ignores_unscored_users() {
        let scores = vec![score(1, Some(4.0)), score(2, None), score(3, Some(2.0))];
        assert_eq!(average_score(&scores), Some(3.0));
        assert_eq!(average_score(&[score(1, None)]), None);
    }

    #[test]
    fn report_lists_scores_and_unscored_count() {
        let scores = vec![score(11, Some(4.25)), score(12, None)];
        let report = build_report(EvaluationKind::Peer, Period::new(2025, 3).unwrap(), &scores);
        assert!(report.contains("Generated for peer evaluations, 2025-Q3"));
        assert!(report.contains("- user 11 score 4.25"));
        assert!(report.contains("1 users have narrative feedback"));
    }

    #[test]
    fn empty_report_says_so() {
        let period = Period::new(2025, 1).unwrap();
        let report = build_report(EvaluationKind::Quarterly, period, &[]);
        assert!(report.contains("No scored evaluations for this period."));
        assert!(report.contains("No users evaluated for this period."));
    }

    #[test]
    fn batch_summary_lists_failures() {
        let now = Utc::now();
        let run = BatchRun {
            id: Uuid::new_v4(),
            kind: EvaluationKind::Peer,
            period: Period::new(2025, 3).unwrap(),
            target_user_ids: vec![1, 2],
            total_users: 2,
            successful_evaluations: 1,
            failed_evaluations: 1,
            start_time: now,
            end_time: now,
            evaluated: vec![ScoredUser {
                user_id: 1,
                score: Some(3.5),
            }],
            failures: vec![BatchFailure {
                user_id: 2,
                reason: "no data for period".to_string(),
            }],
        };
        let summary = render_batch_summary(&run);
        assert!(summary.contains("1 of 2 users evaluated, 1 failed"));
        assert!(summary.contains("- user 2 failed: no data for period"));
    }
}
