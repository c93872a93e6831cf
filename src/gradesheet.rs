use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::columns::HeaderResolver;
use crate::config::CourseConfig;
use crate::error::LoadError;
use crate::grader::{grade_row, GradingContext};
use crate::models::{EvaluationRow, GradedRecord};
use crate::rubric::Rubric;

const SID: &str = "SID";
const EMAIL: &str = "Email";
const NAME: &str = "Name";
const FIRST_NAME: &str = "First Name";
const LAST_NAME: &str = "Last Name";
const GRADER: &str = "Grader";
const COMMENTS: &str = "Comments";
const ADJUSTMENT: &str = "Adjustment";
const SCORE: &str = "Score";
const ASSIGNMENT_SUBMISSION_ID: &str = "Assignment Submission ID";
const QUESTION_SUBMISSION_ID: &str = "Question Submission ID";
const LATENESS: &str = "Lateness (H:M:S)";

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub footer_rows: usize,
    pub question_key_length: usize,
    pub ignore_suffix: String,
    pub scores_pattern: String,
    pub review_url_base: String,
    pub only_submitted: bool,
}

impl LoadOptions {
    pub fn from_config(config: &CourseConfig) -> Self {
        Self {
            footer_rows: config.footer_rows,
            question_key_length: config.question_key_length,
            ignore_suffix: config.ignore_suffix.clone(),
            scores_pattern: config.scores_pattern.clone(),
            review_url_base: config.course_url(),
            only_submitted: false,
        }
    }

    pub fn only_submitted(mut self, only_submitted: bool) -> Self {
        self.only_submitted = only_submitted;
        self
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from_config(&CourseConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionTable {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub questions: Vec<QuestionTable>,
    pub status_table: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LoadedAssignment {
    pub rubric: Rubric,
    pub questions: Vec<String>,
    pub records: Vec<GradedRecord>,
    pub has_lateness: bool,
}

/// Find the question tables and the optional status table of an assignment
/// directory. Only the directory itself and its immediate subdirectories are
/// searched.
pub fn discover(
    dir: &Path,
    options: &LoadOptions,
    skip_questions: &BTreeSet<String>,
) -> Result<Discovery, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::MissingDirectory(dir.to_path_buf()));
    }

    let mut discovery = Discovery::default();
    let mut keys = BTreeSet::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().is_some_and(|e| e == "csv") {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };

        if stem.ends_with(&options.ignore_suffix) {
            debug!(path = %path.display(), "ignoring table");
            continue;
        }

        if stem.ends_with(&options.scores_pattern) {
            match &discovery.status_table {
                Some(existing) => warn!(
                    kept = %existing.display(),
                    ignored = %path.display(),
                    "more than one status table found"
                ),
                None => discovery.status_table = Some(path.to_path_buf()),
            }
            continue;
        }

        let key: String = stem.chars().take(options.question_key_length).collect();
        if skip_questions.contains(&key) {
            info!(question = %key, "skipping question listed in skipQuestions");
            continue;
        }
        if !keys.insert(key.clone()) {
            warn!(question = %key, path = %path.display(), "duplicate question key, table ignored");
            continue;
        }
        discovery.questions.push(QuestionTable {
            key,
            path: path.to_path_buf(),
        });
    }

    Ok(discovery)
}

/// Load, grade and (optionally) lateness-annotate every question table of
/// one assignment.
pub fn load_assignment(
    rubric_path: &Path,
    dir: &Path,
    options: &LoadOptions,
) -> Result<LoadedAssignment, LoadError> {
    let rubric = Rubric::load(rubric_path)?;
    let discovery = discover(dir, options, &rubric.skip_questions)?;

    let mut records = Vec::new();
    for table in &discovery.questions {
        let graded = load_gradesheet(&rubric, &table.key, &table.path, options)?;
        info!(question = %table.key, rows = graded.len(), "graded question table");
        records.extend(graded);
    }

    let has_lateness = match &discovery.status_table {
        Some(path) => {
            let lateness = read_status_table(path)?;
            attach_lateness(&mut records, &lateness);
            true
        }
        None => false,
    };

    if options.only_submitted {
        records.retain(|record| record.was_submitted);
    }

    Ok(LoadedAssignment {
        rubric,
        questions: discovery.questions.into_iter().map(|q| q.key).collect(),
        records,
        has_lateness,
    })
}

/// Grade every data row of one evaluation table. The trailing platform
/// metadata rows are discarded first.
pub fn load_gradesheet(
    rubric: &Rubric,
    question: &str,
    path: &Path,
    options: &LoadOptions,
) -> Result<Vec<GradedRecord>, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .collect::<Result<Vec<StringRecord>, _>>()
        .map_err(csv_err)?;
    let keep = rows.len().saturating_sub(options.footer_rows);

    let resolver = HeaderResolver::new(headers.clone());
    let ctx = GradingContext {
        rubric,
        question,
        review_url_base: &options.review_url_base,
    };

    let graded: Vec<GradedRecord> = rows[..keep]
        .iter()
        .map(|record| grade_row(&evaluation_row(&headers, record), &ctx, &resolver))
        .collect();

    for (term, column) in resolver.fuzzy_matches() {
        warn!(
            question,
            term = %term,
            column = %column,
            "rubric term matched a differently named column; check the export for a missing column"
        );
    }

    Ok(graded)
}

fn evaluation_row(headers: &[String], record: &StringRecord) -> EvaluationRow {
    let cells: HashMap<String, String> = headers
        .iter()
        .zip(record.iter())
        .map(|(header, cell)| (header.clone(), cell.to_string()))
        .collect();
    let text = |column: &str| -> String {
        headers
            .iter()
            .position(|h| h.trim() == column)
            .and_then(|idx| record.get(idx))
            .map(|cell| cell.trim().to_string())
            .unwrap_or_default()
    };

    let name = match text(NAME) {
        name if !name.is_empty() => name,
        _ => format!("{} {}", text(FIRST_NAME), text(LAST_NAME))
            .trim()
            .to_string(),
    };
    let comments = Some(text(COMMENTS)).filter(|c| !c.is_empty());

    let mut unparseable = Vec::new();
    let mut number = |column: &str| -> Option<f64> {
        let cell = text(column);
        if cell.is_empty() {
            return None;
        }
        match cell.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                unparseable.push((column.to_string(), cell));
                None
            }
        }
    };
    let adjustment = number(ADJUSTMENT);
    let score = number(SCORE);

    EvaluationRow {
        sid: text(SID),
        name,
        email: text(EMAIL),
        grader: text(GRADER),
        comments,
        adjustment,
        score,
        assignment_submission_id: text(ASSIGNMENT_SUBMISSION_ID),
        question_submission_id: text(QUESTION_SUBMISSION_ID),
        cells,
        unparseable,
    }
}

/// Minutes of lateness keyed by student id.
pub type LatenessTable = HashMap<String, f64>;

pub fn read_status_table(path: &Path) -> Result<LatenessTable, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (Some(sid_idx), Some(late_idx)) = (column(SID), column(LATENESS)) else {
        warn!(path = %path.display(), "status table lacks SID or lateness column");
        return Ok(LatenessTable::new());
    };

    let mut table = LatenessTable::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let sid = record.get(sid_idx).unwrap_or_default().trim();
        if sid.is_empty() {
            continue;
        }
        let lateness = record
            .get(late_idx)
            .and_then(parse_lateness)
            .unwrap_or(0.0);
        if table.contains_key(sid) {
            warn!(sid, "student id appears twice in status table, keeping first");
            continue;
        }
        table.insert(sid.to_string(), lateness);
    }
    Ok(table)
}

/// Parse an `H:M:S` lateness figure into minutes. Hours may exceed 24.
pub fn parse_lateness(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0.0);
    }
    let parts: Vec<f64> = text
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [h, m, s] => Some(h * 60.0 + m + s / 60.0),
        _ => None,
    }
}

pub fn attach_lateness(records: &mut [GradedRecord], lateness: &LatenessTable) {
    for record in records.iter_mut() {
        let minutes = match lateness.get(&record.sid) {
            Some(minutes) => *minutes,
            None => {
                warn!(sid = %record.sid, question = %record.question, "no lateness entry for student");
                0.0
            }
        };
        record.lateness_minutes = Some(minutes);
    }
}
