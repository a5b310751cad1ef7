use crate::models::{Dimension, DimensionScoreSet, FinalScore, Grade, KeywordTally};

/// Weighted mean of each dimension over every selection: `Σ(count × weight) / Σ(count)`.
/// With no selections at all every dimension is 0.0.
pub fn compute_dimension_scores(tallies: &[KeywordTally]) -> DimensionScoreSet {
    let total: u64 = tallies.iter().map(|t| u64::from(t.count)).sum();
    if total == 0 {
        return DimensionScoreSet::default();
    }

    DimensionScoreSet::from_fn(|dimension| {
        let weighted: f64 = tallies
            .iter()
            .map(|t| f64::from(t.count) * t.weights.get(dimension))
            .sum();
        weighted / total as f64
    })
}

/// Maps the constructive/corrosive differential onto 0..=5 with 2.5 as neutral.
pub fn compute_final_score(dims: &DimensionScoreSet) -> FinalScore {
    let constructive = group_mean(dims, &Dimension::CONSTRUCTIVE);
    let corrosive = group_mean(dims, &Dimension::CORROSIVE);
    FinalScore::clamped((constructive - corrosive) * 2.5 + 2.5)
}

fn group_mean(dims: &DimensionScoreSet, group: &[Dimension]) -> f64 {
    group.iter().map(|d| dims.get(*d)).sum::<f64>() / group.len() as f64
}

/// Average grade points scaled by difficulty and compliance boosts, rounded to
/// two decimals. Returns `None` when no task carries a grade.
///
/// Unlike [`compute_final_score`] the result is not clamped to 0..=5.
pub fn compute_grade_based_score(
    grades: &[Option<Grade>],
    difficulty: u8,
    compliance_percent: f64,
) -> Option<f64> {
    let points: Vec<f64> = grades
        .iter()
        .flatten()
        .map(|grade| f64::from(grade.points()))
        .collect();
    if points.is_empty() {
        return None;
    }

    let average = points.iter().sum::<f64>() / points.len() as f64;
    let value = average * difficulty_boost(difficulty) * compliance_boost(compliance_percent);
    Some(round2(value))
}

pub fn difficulty_boost(difficulty: u8) -> f64 {
    0.95 + 0.05 * (1.0 - 0.05 * (5.0 - f64::from(difficulty)))
}

pub fn compliance_boost(compliance_percent: f64) -> f64 {
    0.9 + (compliance_percent / 100.0) * 0.1
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Polarity;

    fn tally(count: u32, weights: DimensionScoreSet) -> KeywordTally {
        KeywordTally {
            category: "proactive".to_string(),
            polarity: Polarity::Positive,
            weights,
            count,
        }
    }

    fn split(constructive: f64, corrosive: f64) -> DimensionScoreSet {
        DimensionScoreSet::from_fn(|d| {
            if Dimension::CONSTRUCTIVE.contains(&d) {
                constructive
            } else {
                corrosive
            }
        })
    }

    #[test]
    fn zero_occurrences_give_zero_dimensions() {
        let tallies = vec![tally(0, DimensionScoreSet::uniform(0.8))];
        assert_eq!(
            compute_dimension_scores(&tallies),
            DimensionScoreSet::default()
        );
        assert_eq!(compute_dimension_scores(&[]), DimensionScoreSet::default());
    }

    #[test]
    fn dimensions_are_count_weighted_means() {
        let tallies = vec![
            tally(3, DimensionScoreSet::uniform(1.0)),
            tally(1, DimensionScoreSet::uniform(-0.2)),
        ];
        let dims = compute_dimension_scores(&tallies);
        for (_, value) in dims.iter() {
            assert!((value - (3.0 - 0.2) / 4.0).abs() < 1e-9);
        }
    }

    #[test]
    fn neutral_dimensions_score_midpoint() {
        let score = compute_final_score(&DimensionScoreSet::uniform(0.5));
        assert_eq!(score.value(), 2.5);
    }

    #[test]
    fn final_score_hits_and_holds_the_ceiling() {
        assert_eq!(compute_final_score(&split(1.0, 0.0)).value(), 5.0);
        assert_eq!(compute_final_score(&split(3.0, 0.0)).value(), 5.0);
    }

    #[test]
    fn final_score_hits_and_holds_the_floor() {
        assert_eq!(compute_final_score(&split(0.0, 1.0)).value(), 0.0);
        assert_eq!(compute_final_score(&split(-1.0, 2.0)).value(), 0.0);
    }

    #[test]
    fn grade_score_matches_worked_example() {
        let grades = vec![Some(Grade::A), Some(Grade::A), Some(Grade::B)];
        assert_eq!(compute_grade_based_score(&grades, 3, 100.0), Some(4.64));
    }

    #[test]
    fn ungraded_entries_are_ignored() {
        let grades = vec![None, Some(Grade::C), None];
        // 3 × 1.0 × 0.9
        assert_eq!(compute_grade_based_score(&grades, 5, 0.0), Some(2.7));
    }

    #[test]
    fn all_ungraded_cannot_be_scored() {
        assert_eq!(compute_grade_based_score(&[None, None], 3, 80.0), None);
        assert_eq!(compute_grade_based_score(&[], 3, 80.0), None);
    }

    #[test]
    fn boosts_follow_expected_curve() {
        assert!((difficulty_boost(5) - 1.0).abs() < 1e-12);
        assert!((difficulty_boost(1) - 0.99).abs() < 1e-12);
        assert!((compliance_boost(50.0) - 0.95).abs() < 1e-12);
    }
}
