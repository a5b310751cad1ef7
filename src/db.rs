use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EvaluationError, Result};
use crate::models::{
    Dimension, DimensionScoreSet, EvaluationKind, EvaluationRecord, Grade, GradeSheet,
    KeywordTally, Period, PeriodScore, Polarity, UserId, DIMENSION_COUNT,
};
use crate::stores::RecordStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool, period: Period) -> anyhow::Result<()> {
    // name, polarity, collaboration, communication, initiative, expertise,
    // passivity, self_centeredness, negativity, unreliability
    let categories: [(&str, &str, [f64; DIMENSION_COUNT]); 6] = [
        ("team player", "positive", [0.9, 0.5, 0.2, 0.1, 0.0, 0.0, 0.0, 0.0]),
        ("clear communicator", "positive", [0.3, 0.9, 0.1, 0.2, 0.0, 0.0, 0.0, 0.0]),
        ("self-starter", "positive", [0.1, 0.1, 0.9, 0.4, 0.0, 0.0, 0.0, 0.0]),
        ("domain expert", "positive", [0.1, 0.2, 0.3, 0.9, 0.0, 0.0, 0.0, 0.0]),
        ("hard to reach", "negative", [0.0, 0.0, 0.0, 0.0, 0.6, 0.2, 0.1, 0.7]),
        ("dismissive", "negative", [0.0, 0.0, 0.0, 0.0, 0.1, 0.8, 0.7, 0.1]),
    ];

    for (name, polarity, weights) in categories {
        sqlx::query(
            r#"
            INSERT INTO performance_review.keyword_categories
            (name, polarity, collaboration, communication, initiative, expertise,
             passivity, self_centeredness, negativity, unreliability)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (name) DO UPDATE
            SET polarity = EXCLUDED.polarity,
                collaboration = EXCLUDED.collaboration,
                communication = EXCLUDED.communication,
                initiative = EXCLUDED.initiative,
                expertise = EXCLUDED.expertise,
                passivity = EXCLUDED.passivity,
                self_centeredness = EXCLUDED.self_centeredness,
                negativity = EXCLUDED.negativity,
                unreliability = EXCLUDED.unreliability
            "#,
        )
        .bind(name)
        .bind(polarity)
        .bind(weights[0])
        .bind(weights[1])
        .bind(weights[2])
        .bind(weights[3])
        .bind(weights[4])
        .bind(weights[5])
        .bind(weights[6])
        .bind(weights[7])
        .execute(pool)
        .await?;
    }

    let selections = vec![
        SelectionRow::seeded(1, 2, period, "team player", "seed-sel-001"),
        SelectionRow::seeded(3, 2, period, "clear communicator", "seed-sel-002"),
        SelectionRow::seeded(1, 2, period, "hard to reach", "seed-sel-003"),
        SelectionRow::seeded(2, 1, period, "domain expert", "seed-sel-004"),
        SelectionRow::seeded(3, 1, period, "self-starter", "seed-sel-005"),
        SelectionRow::seeded(2, 3, period, "dismissive", "seed-sel-006"),
    ];
    for row in &selections {
        insert_selection(pool, row).await?;
    }

    let grades = [
        (1, "Quarterly planning", Some("A"), "seed-grade-001"),
        (1, "Incident review", Some("B"), "seed-grade-002"),
        (2, "Migration rollout", Some("A"), "seed-grade-003"),
        (2, "Onboarding guide", None, "seed-grade-004"),
        (3, "Vendor audit", Some("C"), "seed-grade-005"),
    ];
    for (user_id, task_name, grade, source_key) in grades {
        sqlx::query(
            r#"
            INSERT INTO performance_review.task_grades
            (id, user_id, year, quarter, task_name, grade, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id as i64)
        .bind(period.year())
        .bind(i16::from(period.quarter()))
        .bind(task_name)
        .bind(grade)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let inputs = [(1_i64, 4_i16, 95.0_f64), (2, 3, 100.0), (3, 2, 70.0)];
    for (user_id, difficulty, compliance) in inputs {
        sqlx::query(
            r#"
            INSERT INTO performance_review.quarterly_inputs
            (user_id, year, quarter, difficulty, compliance_percent)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, year, quarter) DO UPDATE
            SET difficulty = EXCLUDED.difficulty, compliance_percent = EXCLUDED.compliance_percent
            "#,
        )
        .bind(user_id)
        .bind(period.year())
        .bind(i16::from(period.quarter()))
        .bind(difficulty)
        .bind(compliance)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// One peer keyword selection as it appears in an import file.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct SelectionRow {
    pub evaluator_id: i64,
    pub evaluatee_id: i64,
    pub year: i32,
    pub quarter: i16,
    pub category: String,
    pub source_key: Option<String>,
}

impl SelectionRow {
    fn seeded(
        evaluator_id: i64,
        evaluatee_id: i64,
        period: Period,
        category: &str,
        key: &str,
    ) -> Self {
        Self {
            evaluator_id,
            evaluatee_id,
            year: period.year(),
            quarter: i16::from(period.quarter()),
            category: category.to_string(),
            source_key: Some(key.to_string()),
        }
    }
}

pub fn read_selection_rows<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<SelectionRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<SelectionRow>().enumerate() {
        let line = index + 1;
        let row = result
            .with_context(|| format!("malformed selection on data line {line}"))?;
        if !(1..=4).contains(&row.quarter) {
            anyhow::bail!("quarter {} out of range on data line {line}", row.quarter);
        }
        rows.push(row);
    }
    Ok(rows)
}

async fn insert_selection(pool: &PgPool, row: &SelectionRow) -> anyhow::Result<bool> {
    let category_id: i32 = sqlx::query_scalar(
        "SELECT id FROM performance_review.keyword_categories WHERE name = $1",
    )
    .bind(&row.category)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("unknown keyword category `{}`", row.category))?;

    let source_key = row
        .source_key
        .clone()
        .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

    let result = sqlx::query(
        r#"
        INSERT INTO performance_review.peer_keyword_selections
        (id, evaluator_id, evaluatee_id, year, quarter, category_id, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(row.evaluator_id)
    .bind(row.evaluatee_id)
    .bind(row.year)
    .bind(row.quarter)
    .bind(category_id)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_selection_rows(file)?;
    let mut inserted = 0usize;

    for row in &rows {
        if insert_selection(pool, row).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_period_scores(
    pool: &PgPool,
    kind: EvaluationKind,
    period: Period,
) -> anyhow::Result<Vec<PeriodScore>> {
    let records = sqlx::query(
        r#"
        SELECT user_id, score, evaluated_at
        FROM performance_review.evaluation_scores
        WHERE kind = $1 AND year = $2 AND quarter = $3
        ORDER BY score DESC NULLS LAST, user_id
        "#,
    )
    .bind(kind.as_str())
    .bind(period.year())
    .bind(i16::from(period.quarter()))
    .fetch_all(pool)
    .await?;

    let mut scores = Vec::with_capacity(records.len());
    for row in records {
        scores.push(PeriodScore {
            user_id: row.try_get("user_id")?,
            score: row.try_get("score")?,
            evaluated_at: row.try_get("evaluated_at")?,
        });
    }

    Ok(scores)
}

/// Maps one aggregated selection row into a tally. Counts come from `COUNT(*)`
/// so a negative or oversized value means the row is corrupt.
pub fn tally_from_parts(
    category: String,
    polarity: &str,
    weights: [f64; DIMENSION_COUNT],
    occurrences: i64,
) -> Result<KeywordTally> {
    let polarity: Polarity = polarity.parse().map_err(EvaluationError::InvalidRow)?;
    let count = u32::try_from(occurrences).map_err(|_| {
        EvaluationError::InvalidRow(format!(
            "category `{category}` has invalid occurrence count {occurrences}"
        ))
    })?;

    Ok(KeywordTally {
        category,
        polarity,
        weights: DimensionScoreSet::from_values(weights),
        count,
    })
}

fn tally_from_row(row: &PgRow) -> Result<KeywordTally> {
    let mut weights = [0.0; DIMENSION_COUNT];
    for (slot, dimension) in weights.iter_mut().zip(Dimension::ALL) {
        *slot = row.try_get::<Option<f64>, _>(dimension.name())?.unwrap_or(0.0);
    }
    let category: Option<String> = row.try_get("name")?;
    let polarity: String = row.try_get("polarity")?;
    tally_from_parts(
        category.unwrap_or_default(),
        &polarity,
        weights,
        row.try_get("occurrences")?,
    )
}

/// A user without task grades has no sheet, whatever their quarterly inputs say.
/// Missing difficulty falls back to the lowest level and missing compliance to zero.
pub fn grade_sheet_from_parts(
    grades: Vec<Option<String>>,
    inputs: Option<(i16, f64)>,
) -> Option<GradeSheet> {
    if grades.is_empty() {
        return None;
    }
    let (difficulty, compliance_percent) = inputs.unwrap_or((1, 0.0));

    Some(GradeSheet {
        grades: grades
            .iter()
            .map(|grade| grade.as_deref().and_then(Grade::from_letter))
            .collect(),
        difficulty: difficulty.clamp(1, 5) as u8,
        compliance_percent: compliance_percent.clamp(0.0, 100.0),
    })
}

/// Postgres-backed source of evaluation inputs and sink for scores.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn keyword_tallies(&self, user: UserId, period: Period) -> Result<Vec<KeywordTally>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name, c.polarity,
                   c.collaboration, c.communication, c.initiative, c.expertise,
                   c.passivity, c.self_centeredness, c.negativity, c.unreliability,
                   COUNT(*)::BIGINT AS occurrences
            FROM performance_review.peer_keyword_selections s
            JOIN performance_review.keyword_categories c ON c.id = s.category_id
            WHERE s.evaluatee_id = $1 AND s.year = $2 AND s.quarter = $3
            GROUP BY c.id
            ORDER BY c.name
            "#,
        )
        .bind(user)
        .bind(period.year())
        .bind(i16::from(period.quarter()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tally_from_row).collect()
    }

    async fn grade_sheet(&self, user: UserId, period: Period) -> Result<Option<GradeSheet>> {
        let grades: Vec<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT grade FROM performance_review.task_grades
            WHERE user_id = $1 AND year = $2 AND quarter = $3
            ORDER BY task_name
            "#,
        )
        .bind(user)
        .bind(period.year())
        .bind(i16::from(period.quarter()))
        .fetch_all(&self.pool)
        .await?;

        let inputs: Option<(i16, f64)> = sqlx::query_as(
            r#"
            SELECT difficulty, compliance_percent FROM performance_review.quarterly_inputs
            WHERE user_id = $1 AND year = $2 AND quarter = $3
            "#,
        )
        .bind(user)
        .bind(period.year())
        .bind(i16::from(period.quarter()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(grade_sheet_from_parts(grades, inputs))
    }

    async fn user_ids_with_input(
        &self,
        kind: EvaluationKind,
        period: Period,
    ) -> Result<Vec<UserId>> {
        let query = match kind {
            EvaluationKind::Peer => {
                r#"
                SELECT DISTINCT evaluatee_id FROM performance_review.peer_keyword_selections
                WHERE year = $1 AND quarter = $2
                ORDER BY 1
                "#
            }
            EvaluationKind::Quarterly => {
                r#"
                SELECT DISTINCT user_id FROM performance_review.task_grades
                WHERE year = $1 AND quarter = $2
                ORDER BY 1
                "#
            }
            // Weekly inputs live in the vector index only.
            EvaluationKind::Weekly => return Ok(Vec::new()),
        };

        let ids: Vec<UserId> = sqlx::query_scalar(query)
            .bind(period.year())
            .bind(i16::from(period.quarter()))
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_score(&self, record: &EvaluationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance_review.evaluation_scores
            (user_id, year, quarter, kind, score, evaluated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, year, quarter, kind) DO UPDATE
            SET score = EXCLUDED.score, evaluated_at = EXCLUDED.evaluated_at
            "#,
        )
        .bind(record.user_id)
        .bind(record.period.year())
        .bind(i16::from(record.period.quarter()))
        .bind(record.kind.as_str())
        .bind(record.score)
        .bind(record.evaluated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_keeps_weights_in_dimension_order() {
        let weights = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let tally = tally_from_parts("team player".to_string(), "positive", weights, 3).unwrap();
        assert_eq!(tally.count, 3);
        assert_eq!(tally.polarity, Polarity::Positive);
        assert_eq!(tally.weights.get(Dimension::Collaboration), 0.1);
        assert_eq!(tally.weights.get(Dimension::Unreliability), 0.8);
    }

    #[test]
    fn tally_rejects_negative_counts() {
        let weights = [0.0; DIMENSION_COUNT];
        let err = tally_from_parts("dismissive".to_string(), "negative", weights, -1).unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidRow(_)));
    }

    #[test]
    fn tally_rejects_unknown_polarity() {
        let weights = [0.0; DIMENSION_COUNT];
        let result = tally_from_parts("x".to_string(), "neutral", weights, 1);
        assert!(result.is_err());
    }

    #[test]
    fn grade_sheet_absent_without_any_input() {
        assert_eq!(grade_sheet_from_parts(Vec::new(), None), None);
    }

    #[test]
    fn grade_sheet_absent_with_inputs_but_no_grades() {
        assert_eq!(grade_sheet_from_parts(Vec::new(), Some((3, 90.0))), None);
    }

    #[test]
    fn grade_sheet_defaults_missing_inputs() {
        let grades = vec![Some("B".to_string()), None, Some("z".to_string())];
        let sheet = grade_sheet_from_parts(grades, None).unwrap();
        assert_eq!(sheet.grades, vec![Some(Grade::B), None, None]);
        assert_eq!(sheet.difficulty, 1);
        assert_eq!(sheet.compliance_percent, 0.0);
    }

    #[test]
    fn selection_rows_parse_with_optional_source_key() {
        let data = "evaluator_id,evaluatee_id,year,quarter,category,source_key\n\
                    4,9,2025,3,team player,row-1\n\
                    5,9,2025,3,dismissive,\n";
        let rows = read_selection_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_key.as_deref(), Some("row-1"));
        assert_eq!(rows[1].source_key, None);
        assert_eq!(rows[1].category, "dismissive");
    }

    #[test]
    fn selection_rows_reject_bad_quarter() {
        let data = "evaluator_id,evaluatee_id,year,quarter,category,source_key\n\
                    4,9,2025,6,team player,\n";
        assert!(read_selection_rows(data.as_bytes()).is_err());
    }
}
