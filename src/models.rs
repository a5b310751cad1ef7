use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

pub type UserId = i64;

/// Evaluation interval identified by year and quarter, written `2025-Q3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    year: i32,
    quarter: u8,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid period `{0}`, expected YYYY-Qn with n in 1..=4")]
pub struct ParsePeriodError(String);

impl Period {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && (date.month0() / 3 + 1) as u8 == self.quarter
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for Period {
    type Err = ParsePeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParsePeriodError(s.to_string());
        let (year, quarter) = s.trim().split_once(['-', ' ']).ok_or_else(invalid)?;
        let quarter = quarter
            .trim_start_matches(['Q', 'q'])
            .parse::<u8>()
            .map_err(|_| invalid())?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        Period::new(year, quarter).ok_or_else(invalid)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    /// Peer keyword selections scored across the eight dimensions
    Peer,
    /// Task letter grades weighted by difficulty and compliance
    Quarterly,
    /// Activity reports from the vector index, narrative only
    Weekly,
}

impl EvaluationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationKind::Peer => "peer",
            EvaluationKind::Quarterly => "quarterly",
            EvaluationKind::Weekly => "weekly",
        }
    }

    pub fn data_type_tag(&self) -> &'static str {
        match self {
            EvaluationKind::Peer => "peer_evaluation",
            EvaluationKind::Quarterly => "quarterly_evaluation",
            EvaluationKind::Weekly => "weekly_report",
        }
    }

    pub fn needs_vector_index(&self) -> bool {
        matches!(self, EvaluationKind::Weekly)
    }
}

impl fmt::Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DIMENSION_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Collaboration,
    Communication,
    Initiative,
    Expertise,
    Passivity,
    SelfCenteredness,
    Negativity,
    Unreliability,
}

impl Dimension {
    pub const ALL: [Dimension; DIMENSION_COUNT] = [
        Dimension::Collaboration,
        Dimension::Communication,
        Dimension::Initiative,
        Dimension::Expertise,
        Dimension::Passivity,
        Dimension::SelfCenteredness,
        Dimension::Negativity,
        Dimension::Unreliability,
    ];

    pub const CONSTRUCTIVE: [Dimension; 4] = [
        Dimension::Collaboration,
        Dimension::Communication,
        Dimension::Initiative,
        Dimension::Expertise,
    ];

    pub const CORROSIVE: [Dimension; 4] = [
        Dimension::Passivity,
        Dimension::SelfCenteredness,
        Dimension::Negativity,
        Dimension::Unreliability,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Collaboration => "collaboration",
            Dimension::Communication => "communication",
            Dimension::Initiative => "initiative",
            Dimension::Expertise => "expertise",
            Dimension::Passivity => "passivity",
            Dimension::SelfCenteredness => "self_centeredness",
            Dimension::Negativity => "negativity",
            Dimension::Unreliability => "unreliability",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DimensionScoreSet {
    values: [f64; DIMENSION_COUNT],
}

pub type DimensionWeights = DimensionScoreSet;

impl DimensionScoreSet {
    pub fn from_fn(mut f: impl FnMut(Dimension) -> f64) -> Self {
        let mut values = [0.0; DIMENSION_COUNT];
        for dimension in Dimension::ALL {
            values[dimension.index()] = f(dimension);
        }
        Self { values }
    }

    /// Values in [`Dimension::ALL`] order.
    pub fn from_values(values: [f64; DIMENSION_COUNT]) -> Self {
        Self { values }
    }

    #[cfg(test)]
    pub fn uniform(value: f64) -> Self {
        Self {
            values: [value; DIMENSION_COUNT],
        }
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        self.values[dimension.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        Dimension::ALL.into_iter().map(|d| (d, self.get(d)))
    }
}

impl Serialize for DimensionScoreSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(DIMENSION_COUNT))?;
        for (dimension, value) in self.iter() {
            map.serialize_entry(dimension.name(), &value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }
}

impl FromStr for Polarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Polarity::Positive),
            "negative" => Ok(Polarity::Negative),
            other => Err(format!("unknown polarity `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordTally {
    pub category: String,
    pub polarity: Polarity,
    pub weights: DimensionWeights,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
}

impl Grade {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "E" => Some(Grade::E),
            _ => None,
        }
    }

    pub fn points(&self) -> u8 {
        match self {
            Grade::A => 5,
            Grade::B => 4,
            Grade::C => 3,
            Grade::D => 2,
            Grade::E => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeSheet {
    pub grades: Vec<Option<Grade>>,
    pub difficulty: u8,
    pub compliance_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub user_id: UserId,
    pub start_date: String,
    pub end_date: String,
    pub report_type: String,
    pub content: String,
}

impl ActivityRecord {
    pub fn starts_in(&self, period: Period) -> bool {
        NaiveDate::parse_from_str(self.start_date.trim(), "%Y-%m-%d")
            .map(|date| period.contains(date))
            .unwrap_or(false)
    }
}

/// Score on the 0..=5 scale. Construction clamps.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct FinalScore(f64);

impl FinalScore {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 5.0;

    pub fn clamped(raw: f64) -> Self {
        Self(raw.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub user_id: UserId,
    pub kind: EvaluationKind,
    pub period: Period,
    pub score: Option<f64>,
    pub dimensions: Option<DimensionScoreSet>,
    pub narrative: String,
    pub activity_count: u32,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    NoData,
    Unscorable(String),
    Collaborator(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoData => f.write_str("no data for period"),
            FailureReason::Unscorable(detail) => write!(f, "cannot score user: {detail}"),
            FailureReason::Collaborator(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EvaluationStatus {
    Succeeded(EvaluationRecord),
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct UserOutcome {
    pub user_id: UserId,
    pub status: EvaluationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredUser {
    pub user_id: UserId,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub id: Uuid,
    pub kind: EvaluationKind,
    pub period: Period,
    pub target_user_ids: Vec<UserId>,
    pub total_users: usize,
    pub successful_evaluations: usize,
    pub failed_evaluations: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub evaluated: Vec<ScoredUser>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone)]
pub struct PeriodScore {
    pub user_id: UserId,
    pub score: Option<f64>,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parses_and_displays() {
        let period: Period = "2025-Q3".parse().unwrap();
        assert_eq!(period.year(), 2025);
        assert_eq!(period.quarter(), 3);
        assert_eq!(period.to_string(), "2025-Q3");
        assert_eq!(
            "2024 q1".parse::<Period>().unwrap(),
            Period::new(2024, 1).unwrap()
        );
    }

    #[test]
    fn period_rejects_bad_quarters() {
        assert!("2025-Q0".parse::<Period>().is_err());
        assert!("2025-Q5".parse::<Period>().is_err());
        assert!("2025".parse::<Period>().is_err());
        assert!(Period::new(2025, 7).is_none());
    }

    #[test]
    fn period_contains_dates_of_its_quarter() {
        let period = Period::new(2025, 2).unwrap();
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert!(period.contains(date(2025, 4, 1)));
        assert!(period.contains(date(2025, 6, 30)));
        assert!(!period.contains(date(2025, 7, 1)));
        assert!(!period.contains(date(2024, 5, 1)));
    }

    #[test]
    fn dimension_groups_cover_every_dimension_once() {
        let mut grouped: Vec<Dimension> = Dimension::CONSTRUCTIVE
            .into_iter()
            .chain(Dimension::CORROSIVE)
            .collect();
        grouped.sort_by_key(|d| d.index());
        assert_eq!(grouped, Dimension::ALL.to_vec());
    }

    #[test]
    fn dimension_scores_serialize_by_name() {
        let scores = DimensionScoreSet::from_fn(|d| match d {
            Dimension::Negativity => 0.25,
            _ => 0.0,
        });
        let value = serde_json::to_value(scores).unwrap();
        assert_eq!(value.as_object().unwrap().len(), DIMENSION_COUNT);
        assert_eq!(value["negativity"], 0.25);
        assert_eq!(value["collaboration"], 0.0);
    }

    #[test]
    fn activity_with_unparseable_date_is_outside_every_period() {
        let record = ActivityRecord {
            user_id: 1,
            start_date: String::new(),
            end_date: String::new(),
            report_type: String::new(),
            content: String::new(),
        };
        assert!(!record.starts_in(Period::new(2025, 1).unwrap()));
    }

    #[test]
    fn grades_map_to_points() {
        assert_eq!(Grade::from_letter(" a ").map(|g| g.points()), Some(5));
        assert_eq!(Grade::from_letter("E").map(|g| g.points()), Some(1));
        assert_eq!(Grade::from_letter("F"), None);
    }
}
