use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::QuizConfig;
use crate::error::LoadError;
use crate::roster::RosterEntry;
use crate::slip_days::slips_for_lateness;

/// Student ids exempt from each quiz, keyed by quiz name.
pub type QuizExceptions = HashMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Quiz {
    pub name: String,
    pub path: PathBuf,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizAttempt {
    pub sid: String,
    pub attempt: u32,
    pub submitted: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizMark {
    OnTime,
    Late,
    Missing,
    Exempt,
}

impl QuizMark {
    /// Participation credit, or `None` when the quiz does not count.
    pub fn credit(self, late_credit: f64) -> Option<f64> {
        match self {
            QuizMark::OnTime => Some(1.0),
            QuizMark::Late => Some(late_credit),
            QuizMark::Missing => Some(0.0),
            QuizMark::Exempt => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizStanding {
    pub sid: String,
    pub name: String,
    pub email: String,
    /// One mark per quiz, aligned with `QuizBook::quizzes`.
    pub marks: Vec<QuizMark>,
    pub participation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizBook {
    pub quizzes: Vec<Quiz>,
    pub standings: Vec<QuizStanding>,
    pub late_credit: f64,
}

/// Deadline for a quiz named `M-D`, or `None` if the name is not a date.
pub fn quiz_deadline(name: &str, settings: &QuizConfig) -> Option<DateTime<Utc>> {
    if let Some(deadline) = settings.deadlines.get(name) {
        return Some(*deadline);
    }
    let (month, day) = name.split_once('-')?;
    let date = NaiveDate::from_ymd_opt(
        settings.year,
        month.trim().parse().ok()?,
        day.trim().parse().ok()?,
    )?;
    Some(date.and_time(settings.due_time).and_utc())
}

pub fn discover_quizzes(settings: &QuizConfig) -> Result<Vec<Quiz>, LoadError> {
    if !settings.dir.is_dir() {
        return Err(LoadError::MissingDirectory(settings.dir.clone()));
    }

    let mut quizzes = Vec::new();
    for entry in WalkDir::new(&settings.dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().is_some_and(|e| e == "csv") {
            continue;
        }
        let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        match quiz_deadline(&name, settings) {
            Some(deadline) => quizzes.push(Quiz {
                name,
                path: path.to_path_buf(),
                deadline,
            }),
            None => warn!(path = %path.display(), "quiz export is not named M-D, skipped"),
        }
    }

    quizzes.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.name.cmp(&b.name)));
    Ok(quizzes)
}

/// Parse the submission timestamps found in quiz exports, either RFC 3339 or
/// `YYYY-MM-DD HH:MM:SS UTC`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = text.trim_end_matches("UTC").trim();
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

pub fn read_attempts(path: &Path) -> Result<Vec<QuizAttempt>, LoadError> {
    #[derive(Deserialize)]
    struct CsvRow {
        #[serde(default)]
        sis_id: Option<String>,
        #[serde(default)]
        submitted: Option<String>,
        #[serde(default)]
        attempt: Option<String>,
    }

    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let mut attempts = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(csv_err)?;
        let sid = row.sis_id.unwrap_or_default().trim().to_string();
        if sid.is_empty() {
            continue;
        }
        let Some(submitted) = row.submitted.as_deref().and_then(parse_timestamp) else {
            warn!(path = %path.display(), sid = %sid, "attempt without a readable submission time skipped");
            continue;
        };
        let attempt = row
            .attempt
            .as_deref()
            .and_then(|a| a.trim().parse().ok())
            .unwrap_or(1);
        attempts.push(QuizAttempt {
            sid,
            attempt,
            submitted,
        });
    }
    Ok(attempts)
}

/// Each student's lowest-numbered attempt. Only lateness matters for
/// participation, so later retakes never change the mark.
pub fn first_attempts(attempts: Vec<QuizAttempt>) -> BTreeMap<String, QuizAttempt> {
    let mut firsts: BTreeMap<String, QuizAttempt> = BTreeMap::new();
    for attempt in attempts {
        let earlier_kept = firsts
            .get(&attempt.sid)
            .is_some_and(|kept| kept.attempt <= attempt.attempt);
        if !earlier_kept {
            firsts.insert(attempt.sid.clone(), attempt);
        }
    }
    firsts
}

pub fn load_exceptions(path: &Path) -> Result<QuizExceptions, LoadError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StudentId {
        Text(String),
        Number(i64),
    }

    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: HashMap<String, Vec<StudentId>> =
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(raw
        .into_iter()
        .map(|(quiz, ids)| {
            let ids: BTreeSet<String> = ids
                .into_iter()
                .map(|id| match id {
                    StudentId::Text(text) => text.trim().to_string(),
                    StudentId::Number(number) => number.to_string(),
                })
                .collect();
            (quiz, ids)
        })
        .collect())
}

pub fn mark_attempt(
    attempt: Option<&QuizAttempt>,
    deadline: DateTime<Utc>,
    grace_minutes: f64,
) -> QuizMark {
    match attempt {
        None => QuizMark::Missing,
        Some(attempt) => {
            let minutes_late = (attempt.submitted - deadline).num_seconds() as f64 / 60.0;
            if slips_for_lateness(minutes_late, grace_minutes) > 0 {
                QuizMark::Late
            } else {
                QuizMark::OnTime
            }
        }
    }
}

/// Mean credit over the quizzes that count for a student. A student exempt
/// from every quiz has full participation.
pub fn participation(marks: &[QuizMark], late_credit: f64) -> f64 {
    let credits: Vec<f64> = marks.iter().filter_map(|m| m.credit(late_credit)).collect();
    if credits.is_empty() {
        1.0
    } else {
        credits.iter().sum::<f64>() / credits.len() as f64
    }
}

/// Mark every roster student on every quiz. Attempts by students no longer on
/// the roster are ignored.
pub fn grade_quizzes(
    settings: &QuizConfig,
    roster: &[RosterEntry],
    exceptions: &QuizExceptions,
) -> Result<QuizBook, LoadError> {
    let quizzes = discover_quizzes(settings)?;

    let mut firsts = Vec::with_capacity(quizzes.len());
    for quiz in &quizzes {
        let attempts = first_attempts(read_attempts(&quiz.path)?);
        info!(quiz = %quiz.name, students = attempts.len(), deadline = %quiz.deadline, "loaded quiz");
        firsts.push(attempts);
    }

    let standings = roster
        .iter()
        .map(|student| {
            let marks: Vec<QuizMark> = quizzes
                .iter()
                .zip(&firsts)
                .map(|(quiz, attempts)| {
                    let exempt = exceptions
                        .get(&quiz.name)
                        .is_some_and(|ids| ids.contains(&student.sid));
                    if exempt {
                        QuizMark::Exempt
                    } else {
                        mark_attempt(
                            attempts.get(&student.sid),
                            quiz.deadline,
                            settings.grace_minutes,
                        )
                    }
                })
                .collect();
            QuizStanding {
                sid: student.sid.clone(),
                name: student.name.clone(),
                email: student.email.clone(),
                participation: participation(&marks, settings.late_credit),
                marks,
            }
        })
        .collect();

    Ok(QuizBook {
        quizzes,
        standings,
        late_credit: settings.late_credit,
    })
}
