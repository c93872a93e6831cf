use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One submission row of a per-question evaluation export.
#[derive(Debug, Clone, Default)]
pub struct EvaluationRow {
    pub sid: String,
    pub name: String,
    pub email: String,
    pub grader: String,
    pub comments: Option<String>,
    pub adjustment: Option<f64>,
    pub score: Option<f64>,
    pub assignment_submission_id: String,
    pub question_submission_id: String,
    /// Raw rubric cells keyed by the header they appeared under.
    pub cells: HashMap<String, String>,
    /// Numeric cells that did not parse, as `(column, cell)`.
    pub unparseable: Vec<(String, String)>,
}

impl EvaluationRow {
    pub fn is_marked(&self, column: &str) -> bool {
        self.cells
            .get(column)
            .is_some_and(|cell| cell.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemScore {
    pub short_name: String,
    pub points: f64,
}

/// A data-quality problem found on a single graded row.
#[derive(Debug, Clone, PartialEq)]
pub enum GradingIssue {
    ColumnNotFound { term: String },
    MissingSelection { item: String },
    MultipleSelections { item: String },
    TotalMismatch { computed: f64, reported: f64, adjustment: f64 },
    BlankComment { incomplete: bool },
    SecondPersonComment,
    MarkedNotSubmitted { reported: f64 },
    UnparseableNumber { column: String, cell: String },
}

impl fmt::Display for GradingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradingIssue::ColumnNotFound { term } => {
                write!(f, "No column found for rubric term: {term}")
            }
            GradingIssue::MissingSelection { item } => {
                write!(f, "No score entered for rubric item: {item}")
            }
            GradingIssue::MultipleSelections { item } => write!(
                f,
                "More than one score entered for single-select rubric item: {item}"
            ),
            GradingIssue::TotalMismatch {
                computed,
                reported,
                adjustment,
            } => write!(
                f,
                "Calculated grade {computed} doesn't match reported score {reported} (adjustment {adjustment})"
            ),
            GradingIssue::BlankComment { incomplete: true } => {
                write!(f, "Comment is blank (rubric not filled in).")
            }
            GradingIssue::BlankComment { incomplete: false } => write!(f, "Comment is blank."),
            GradingIssue::SecondPersonComment => write!(f, "Comment contains the word 'you.'"),
            GradingIssue::MarkedNotSubmitted { reported } => write!(
                f,
                "Marked as not submitted but has a score of {reported}"
            ),
            GradingIssue::UnparseableNumber { column, cell } => {
                write!(f, "{column} value '{cell}' is not a number; counted as 0.")
            }
        }
    }
}

/// The validated outcome of grading one evaluation row.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedRecord {
    pub sid: String,
    pub name: String,
    pub email: String,
    pub question: String,
    pub grader: String,
    pub comments: Option<String>,
    pub adjustment: f64,
    pub scores: Vec<ItemScore>,
    pub computed_total: f64,
    pub reported_total: f64,
    pub was_submitted: bool,
    pub incomplete: bool,
    pub issues: Vec<GradingIssue>,
    pub review_url: String,
    pub assignment_submission_id: String,
    pub question_submission_id: String,
    /// Minutes late, present only when a status table was joined.
    pub lateness_minutes: Option<f64>,
}

impl GradedRecord {
    pub fn score_for(&self, short_name: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.short_name == short_name)
            .map(|s| s.points)
    }

    pub fn is_ungraded(&self) -> bool {
        self.reported_total == 0.0 || self.incomplete
    }

    pub fn has_total_mismatch(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| matches!(issue, GradingIssue::TotalMismatch { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingQuestions {
    pub sid: String,
    pub name: String,
    pub email: String,
    /// Expected minus seen; negative when a student answered extra questions.
    pub missing: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InconsistentStudent {
    pub sid: String,
    pub name: String,
    pub spread: f64,
    pub totals: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraderSummary {
    pub grader: String,
    pub count: usize,
    pub mean: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutlier {
    pub grader: String,
    pub question: String,
    pub name: String,
    pub total: f64,
    pub review_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraderConsistency {
    /// Ranked by ascending mean.
    pub graders: Vec<GraderSummary>,
    pub global_median: f64,
    pub global_stdev: f64,
    pub outliers: Vec<ScoreOutlier>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatenessSplit {
    pub on_time: usize,
    pub late: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionSummary {
    pub question: String,
    pub graded: usize,
    pub ungraded: usize,
    pub graded_split: Option<LatenessSplit>,
    pub ungraded_split: Option<LatenessSplit>,
}

/// Running slip-day account for one student, keyed by email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlipLedger {
    pub name: String,
    pub email: String,
    pub consumed: i64,
    pub late: BTreeMap<String, f64>,
    pub missing: BTreeMap<String, f64>,
}

impl SlipLedger {
    pub fn remaining(&self, initial_allowance: i64) -> i64 {
        initial_allowance - self.consumed
    }
}
