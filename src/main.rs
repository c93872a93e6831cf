use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod columns;
mod config;
mod consistency;
mod error;
mod grader;
mod gradesheet;
mod linkage;
mod models;
mod quiz;
mod report;
mod roster;
mod rubric;
mod slip_days;

use config::CourseConfig;
use gradesheet::{load_assignment, LoadOptions};

#[derive(Parser)]
#[command(name = "grade-reconciler")]
#[command(about = "Reconcile exported rubric evaluations into validated grades and slip-day balances", long_about = None)]
struct Cli {
    /// Course configuration file
    #[arg(long, env = "GRADE_RECONCILER_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one assignment's evaluation exports and write review sheets
    #[command(group(
        ArgGroup::new("source")
            .args(["assignment", "rubric"])
            .required(true)
            .multiple(false)
    ))]
    Grades {
        #[arg(long)]
        assignment: Option<String>,
        #[arg(long, requires = "data")]
        rubric: Option<PathBuf>,
        #[arg(long, requires = "rubric")]
        data: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long)]
        only_submitted: bool,
        /// Course id for review links, overriding the config
        #[arg(long)]
        course_id: Option<String>,
    },
    /// Tally slip days across every configured assignment
    SlipDays {
        #[arg(long, default_value = "slip_days.csv")]
        out: PathBuf,
    },
    /// Write a per-section attendance sheet from the roster
    Attendance {
        #[arg(long, default_value = "attendance.csv")]
        out: PathBuf,
    },
    /// Score quiz participation for every roster student
    Quizzes {
        #[arg(long, default_value = "quizzes.csv")]
        out: PathBuf,
    },
    /// Pair group submissions with their members' individual submissions
    LinkGroups {
        #[arg(long)]
        group: String,
        #[arg(long)]
        individual: String,
        #[arg(long, default_value = "conn_group_indiv.csv")]
        out: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn load_config(path: &Path, required: bool) -> anyhow::Result<CourseConfig> {
    if !required && !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return Ok(CourseConfig::default());
    }
    CourseConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn create(path: &Path) -> anyhow::Result<File> {
    info!(path = %path.display(), "writing export");
    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Grades {
            assignment,
            rubric,
            data,
            out,
            only_submitted,
            course_id,
        } => {
            let mut config = load_config(&cli.config, assignment.is_some())?;
            if course_id.is_some() {
                config.course_id = course_id;
            }
            let (label, rubric_path, data_dir) = match (assignment, rubric, data) {
                (Some(name), _, _) => {
                    let entry = config.assignment(&name)?;
                    (name.clone(), entry.rubric.clone(), entry.data.clone())
                }
                (None, Some(rubric), Some(data)) => {
                    let label = data
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "assignment".to_string());
                    (label, rubric, data)
                }
                _ => anyhow::bail!("either --assignment or both --rubric and --data are required"),
            };

            let options = LoadOptions::from_config(&config).only_submitted(only_submitted);
            let loaded = load_assignment(&rubric_path, &data_dir, &options)
                .with_context(|| format!("failed to load grades for {label}"))?;
            std::fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;

            report::export_all_grades(
                create(&out.join("all_grades.csv"))?,
                &loaded.rubric,
                &loaded.records,
                loaded.has_lateness,
            )?;
            report::export_grading_errors(create(&out.join("grading_errors.csv"))?, &loaded.records)?;

            if let Some(expected) = loaded.rubric.expected_question_count {
                let missing = consistency::missing_questions(&loaded.records, expected);
                report::export_missing_questions(
                    create(&out.join("missing_questions.csv"))?,
                    &missing,
                )?;
            } else if loaded.questions.len() > 1 {
                tracing::warn!("set expectedQuestionsAnswered in the rubric to export missing questions");
            }

            let pending = consistency::left_to_grade(&loaded.records);
            report::export_left_to_grade(create(&out.join("left_to_grade.csv"))?, &pending)?;
            report::export_grader_sheet(create(&out.join("grader_sheet.csv"))?, &pending)?;

            let summary = report::build_report(&label, &loaded, &config);
            std::fs::write(out.join("report.md"), summary)?;

            let issues: usize = loaded.records.iter().map(|r| r.issues.len()).sum();
            println!(
                "Graded {} records for {label}: {issues} issues, {} left to grade. Output in {}.",
                loaded.records.len(),
                pending.len(),
                out.display()
            );
        }
        Commands::SlipDays { out } => {
            let config = load_config(&cli.config, true)?;
            let ledgers = slip_days::compute_ledgers(&config, Utc::now())
                .context("failed to tally slip days")?;
            report::export_slip_days(create(&out)?, &ledgers, config.initial_slip_days)?;
            println!(
                "Saved remaining slip days for {} students to {}.",
                ledgers.len(),
                out.display()
            );
        }
        Commands::Attendance { out } => {
            let config = load_config(&cli.config, true)?;
            let path = config
                .roster
                .as_deref()
                .context("config has no roster path")?;
            let roster = roster::load_roster(path, &config.email_domain)?;
            let sheet = roster::attendance_sheet(&roster);
            report::export_attendance(create(&out)?, &sheet)?;
            println!("Attendance sheet for {} students written to {}.", sheet.len(), out.display());
        }
        Commands::Quizzes { out } => {
            let config = load_config(&cli.config, true)?;
            let settings = config
                .quizzes
                .as_ref()
                .context("config has no quizzes section")?;
            let path = config
                .roster
                .as_deref()
                .context("config has no roster path")?;
            let roster = roster::load_roster(path, &config.email_domain)?;
            let exceptions = match &settings.exceptions {
                Some(path) => quiz::load_exceptions(path)?,
                None => quiz::QuizExceptions::new(),
            };
            let book = quiz::grade_quizzes(settings, &roster, &exceptions)
                .context("failed to grade quizzes")?;
            report::export_quizzes(create(&out)?, &book)?;
            println!(
                "Quiz participation for {} students across {} quizzes written to {}.",
                book.standings.len(),
                book.quizzes.len(),
                out.display()
            );
        }
        Commands::LinkGroups {
            group,
            individual,
            out,
        } => {
            let config = load_config(&cli.config, true)?;
            let options = LoadOptions::from_config(&config);
            let load = |name: &str| -> anyhow::Result<Vec<models::GradedRecord>> {
                let entry = config.assignment(name)?;
                let loaded = load_assignment(&entry.rubric, &entry.data, &options)
                    .with_context(|| format!("failed to load grades for {name}"))?;
                Ok(loaded.records)
            };
            let group_records = load(&group)?;
            let individual_records = load(&individual)?;
            let links = linkage::link_group_submissions(&group_records, &individual_records);
            report::export_group_links(create(&out)?, &links)?;
            println!("Linked {} group submissions into {}.", links.len(), out.display());
        }
    }

    Ok(())
}
