use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

/// One assignment of the course, in slip-day processing order.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssignmentConfig {
    pub name: String,
    pub rubric: PathBuf,
    pub data: PathBuf,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
}

/// Participation quizzes: one export per quiz, named `M-D.csv` after the day
/// it was due.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizConfig {
    pub dir: PathBuf,
    pub year: i32,
    /// Time of day (UTC) every quiz is due unless listed in `deadlines`.
    #[serde(default = "default_quiz_due_time")]
    pub due_time: NaiveTime,
    #[serde(default = "default_quiz_grace_minutes")]
    pub grace_minutes: f64,
    #[serde(default = "default_late_credit")]
    pub late_credit: f64,
    /// JSON object mapping a quiz name to the student ids exempt from it.
    #[serde(default)]
    pub exceptions: Option<PathBuf>,
    #[serde(default)]
    pub deadlines: BTreeMap<String, DateTime<Utc>>,
}

fn default_quiz_due_time() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 20, 0).unwrap_or(NaiveTime::MIN)
}

fn default_quiz_grace_minutes() -> f64 {
    1.0
}

fn default_late_credit() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseConfig {
    pub review_url_base: String,
    /// Course id on the grading platform; review links need it unless
    /// `review_url_base` already ends in `/courses/<id>`.
    pub course_id: Option<String>,
    pub initial_slip_days: i64,
    pub grace_minutes: f64,
    pub outlier_threshold: f64,
    pub grader_outlier_stdevs: f64,
    pub footer_rows: usize,
    pub question_key_length: usize,
    pub ignore_suffix: String,
    pub scores_pattern: String,
    pub email_domain: String,
    pub roster: Option<PathBuf>,
    pub slip_day_overrides: Option<PathBuf>,
    pub linked_assignments: Vec<Vec<String>>,
    pub assignments: Vec<AssignmentConfig>,
    pub quizzes: Option<QuizConfig>,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            review_url_base: "https://www.gradescope.com".to_string(),
            course_id: None,
            initial_slip_days: 10,
            grace_minutes: 20.0,
            outlier_threshold: 5.0,
            grader_outlier_stdevs: 2.5,
            footer_rows: 4,
            question_key_length: 20,
            ignore_suffix: "_ignore".to_string(),
            scores_pattern: "scores".to_string(),
            email_domain: "cornell.edu".to_string(),
            roster: None,
            slip_day_overrides: None,
            linked_assignments: Vec::new(),
            assignments: Vec::new(),
            quizzes: None,
        }
    }
}

impl CourseConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: CourseConfig = serde_json::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Resolve relative paths against the directory holding the config file.
    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for assignment in &mut self.assignments {
            join(&mut assignment.rubric);
            join(&mut assignment.data);
        }
        if let Some(roster) = self.roster.as_mut() {
            join(roster);
        }
        if let Some(overrides) = self.slip_day_overrides.as_mut() {
            join(overrides);
        }
        if let Some(quizzes) = self.quizzes.as_mut() {
            join(&mut quizzes.dir);
            if let Some(exceptions) = quizzes.exceptions.as_mut() {
                join(exceptions);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for assignment in &self.assignments {
            if !seen.insert(assignment.name.as_str()) {
                return Err(ConfigError::DuplicateAssignment(assignment.name.clone()));
            }
        }
        for name in self.linked_assignments.iter().flatten() {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::UnknownLinkedAssignment(name.clone()));
            }
        }
        Ok(())
    }

    /// Base of every review link: `{reviewUrlBase}/courses/{courseId}`.
    pub fn course_url(&self) -> String {
        let base = self.review_url_base.trim_end_matches('/');
        match self.course_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => format!("{base}/courses/{id}"),
            _ => {
                if !base.contains("/courses/") {
                    warn!(
                        base,
                        "no courseId configured; review links will not open without the course path"
                    );
                }
                base.to_string()
            }
        }
    }

    pub fn assignment(&self, name: &str) -> Result<&AssignmentConfig, ConfigError> {
        self.assignments
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| ConfigError::UnknownAssignment(name.to_string()))
    }
}
