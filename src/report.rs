use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::io::Write;

use crate::config::CourseConfig;
use crate::consistency;
use crate::gradesheet::LoadedAssignment;
use crate::linkage::GroupLink;
use crate::models::{GradedRecord, GradingIssue, MissingQuestions, SlipLedger};
use crate::quiz::{QuizBook, QuizMark};
use crate::roster::RosterEntry;
use crate::rubric::{Aggregation, Rubric};

#[derive(Debug, Clone, PartialEq)]
pub struct IssueSummary {
    pub grader: String,
    pub records: usize,
    pub issues: usize,
    pub mismatches: usize,
}

pub fn summarize_issues_by_grader(records: &[GradedRecord]) -> Vec<IssueSummary> {
    let mut map: HashMap<&str, (usize, usize, usize)> = HashMap::new();

    for record in records.iter().filter(|r| !r.issues.is_empty()) {
        let entry = map.entry(record.grader.as_str()).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += record.issues.len();
        if record.has_total_mismatch() {
            entry.2 += 1;
        }
    }

    let mut summaries: Vec<IssueSummary> = map
        .into_iter()
        .map(|(grader, (records, issues, mismatches))| IssueSummary {
            grader: grader.to_string(),
            records,
            issues,
            mismatches,
        })
        .collect();

    summaries.sort_by(|a, b| b.issues.cmp(&a.issues).then_with(|| a.grader.cmp(&b.grader)));
    summaries
}

/// Selection problems on structured rubric items.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemIssueSummary {
    pub item: String,
    pub short_name: String,
    pub aggregation: Aggregation,
    pub missing_selections: usize,
    pub multiple_selections: usize,
}

pub fn summarize_issues_by_item(
    rubric: &Rubric,
    records: &[GradedRecord],
) -> Vec<ItemIssueSummary> {
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for issue in records.iter().flat_map(|r| r.issues.iter()) {
        match issue {
            GradingIssue::MissingSelection { item } => {
                counts.entry(item.as_str()).or_default().0 += 1;
            }
            GradingIssue::MultipleSelections { item } => {
                counts.entry(item.as_str()).or_default().1 += 1;
            }
            _ => {}
        }
    }

    counts
        .into_iter()
        .filter_map(|(item, (missing, multiple))| {
            Some(ItemIssueSummary {
                item: item.to_string(),
                short_name: rubric.short_name(item)?.to_string(),
                aggregation: rubric.aggregation(item)?,
                missing_selections: missing,
                multiple_selections: multiple,
            })
        })
        .collect()
}

pub fn build_report(assignment: &str, loaded: &LoadedAssignment, config: &CourseConfig) -> String {
    let records = &loaded.records;
    let summaries = summarize_issues_by_grader(records);
    let flagged = consistency::inconsistent_students(records, config.outlier_threshold);
    let graders = consistency::grader_consistency(records, config.grader_outlier_stdevs);
    let completion = consistency::completion(records, config.grace_minutes);

    let mut output = String::new();
    let submitted = records.iter().filter(|r| r.was_submitted).count();

    let _ = writeln!(output, "# Grading Report: {assignment}");
    let _ = writeln!(
        output,
        "{} records across {} questions ({} submitted)",
        records.len(),
        loaded.questions.len(),
        submitted
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grading Issues");

    if summaries.is_empty() {
        let _ = writeln!(output, "No grading issues found.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} issues on {} records, {} total mismatches",
                summary.grader, summary.issues, summary.records, summary.mismatches
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rubric Items");

    let items = summarize_issues_by_item(&loaded.rubric, records);
    if items.is_empty() {
        let _ = writeln!(output, "No selection problems on rubric items.");
    } else {
        for item in items.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, {}): {} missing, {} multiple selections",
                item.item,
                item.short_name,
                item.aggregation.as_str(),
                item.missing_selections,
                item.multiple_selections
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Missing Questions");

    match loaded.rubric.expected_question_count {
        None => {
            let _ = writeln!(output, "expectedQuestionsAnswered is not set in the rubric.");
        }
        Some(expected) => {
            let missing = consistency::missing_questions(records, expected);
            if missing.is_empty() {
                let _ = writeln!(output, "Every student answered {expected} questions.");
            } else {
                for student in missing.iter() {
                    let _ = writeln!(
                        output,
                        "- {} ({}) missing {}",
                        student.name, student.email, student.missing
                    );
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Inconsistent Students (spread > {} points)",
        config.outlier_threshold
    );

    if flagged.is_empty() {
        let _ = writeln!(output, "No student has inconsistent question totals.");
    } else {
        for student in flagged.iter() {
            let totals: Vec<String> = student
                .totals
                .iter()
                .map(|(question, total)| format!("{question}={total}"))
                .collect();
            let _ = writeln!(
                output,
                "- {} spread {:.1}: {}",
                student.name,
                student.spread,
                totals.join(", ")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grader Consistency");
    let _ = writeln!(
        output,
        "Global median {:.2}, stdev {:.2}",
        graders.global_median, graders.global_stdev
    );

    for grader in graders.graders.iter() {
        let _ = writeln!(
            output,
            "- {}: mean {:.2}, stdev {:.2} over {} records",
            grader.grader, grader.mean, grader.stdev, grader.count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Statistical Outliers");

    if graders.outliers.is_empty() {
        let _ = writeln!(output, "No scores beyond {} stdevs.", config.grader_outlier_stdevs);
    } else {
        for outlier in graders.outliers.iter() {
            let _ = writeln!(
                output,
                "- {} scored {} on {} by {}: {}",
                outlier.name, outlier.total, outlier.question, outlier.grader, outlier.review_url
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Completion");

    for question in completion.iter() {
        let _ = write!(
            output,
            "- {}: {} graded, {} ungraded",
            question.question, question.graded, question.ungraded
        );
        if let Some(split) = &question.graded_split {
            let _ = write!(
                output,
                "; graded {} on time, {} late",
                split.on_time, split.late
            );
        }
        if let Some(split) = &question.ungraded_split {
            let _ = write!(
                output,
                "; to grade {} on time, {} late",
                split.on_time, split.late
            );
        }
        let _ = writeln!(output);
    }

    output
}

pub fn export_all_grades<W: Write>(
    writer: W,
    rubric: &Rubric,
    records: &[GradedRecord],
    with_lateness: bool,
) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = [
        "Name",
        "Email",
        "Question",
        "Grader",
        "Comments",
        "Adjustment",
        "Total Score",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(rubric.short_names().map(str::to_string));
    if with_lateness {
        header.push("Lateness (min)".to_string());
    }
    header.extend(
        ["URL", "SID", "Assignment Submission ID", "Question Submission ID"]
            .iter()
            .map(|s| s.to_string()),
    );
    out.write_record(&header)?;

    let mut sorted: Vec<&GradedRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.question.cmp(&b.question)));

    for record in sorted {
        let mut row = vec![
            record.name.clone(),
            record.email.clone(),
            record.question.clone(),
            record.grader.clone(),
            record.comments.clone().unwrap_or_default(),
            record.adjustment.to_string(),
            record.reported_total.to_string(),
        ];
        row.extend(rubric.short_names().map(|short| {
            record
                .score_for(short)
                .map(|points| points.to_string())
                .unwrap_or_default()
        }));
        if with_lateness {
            row.push(
                record
                    .lateness_minutes
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
            );
        }
        row.extend([
            record.review_url.clone(),
            record.sid.clone(),
            record.assignment_submission_id.clone(),
            record.question_submission_id.clone(),
        ]);
        out.write_record(&row)?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_grading_errors<W: Write>(writer: W, records: &[GradedRecord]) -> csv::Result<()> {
    let mut rows: Vec<[String; 4]> = records
        .iter()
        .flat_map(|record| {
            record.issues.iter().map(move |issue| {
                [
                    issue.to_string(),
                    record.grader.clone(),
                    record.question.clone(),
                    record.review_url.clone(),
                ]
            })
        })
        .collect();
    rows.sort();

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["Issue", "Grader", "Question", "URL"])?;
    for row in rows {
        out.write_record(&row)?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_missing_questions<W: Write>(
    writer: W,
    missing: &[MissingQuestions],
) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["SID", "Name", "Email", "Number Missing"])?;
    for student in missing {
        out.write_record([
            student.sid.as_str(),
            student.name.as_str(),
            student.email.as_str(),
            student.missing.to_string().as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_left_to_grade<W: Write>(writer: W, pending: &[&GradedRecord]) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["Question", "Name", "Email", "Grader", "Incomplete", "URL"])?;
    for record in pending {
        out.write_record([
            record.question.as_str(),
            record.name.as_str(),
            record.email.as_str(),
            record.grader.as_str(),
            if record.incomplete { "yes" } else { "no" },
            record.review_url.as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// A blank sign-up sheet graders fill in while working through the backlog.
pub fn export_grader_sheet<W: Write>(writer: W, pending: &[&GradedRecord]) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["Grader", "Graded?", "Question", "URL", "Notes"])?;
    for record in pending {
        out.write_record(["", "0", record.question.as_str(), record.review_url.as_str(), ""])?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_slip_days<W: Write>(
    writer: W,
    ledgers: &[SlipLedger],
    initial_allowance: i64,
) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record([
        "Name",
        "Email",
        "Slip Days Used",
        "Slip Days Remaining",
        "Late Assignments",
        "Missing Assignments",
    ])?;
    for ledger in ledgers {
        let late: Vec<&str> = ledger.late.keys().map(String::as_str).collect();
        let missing: Vec<&str> = ledger.missing.keys().map(String::as_str).collect();
        out.write_record([
            ledger.name.clone(),
            ledger.email.clone(),
            ledger.consumed.to_string(),
            ledger.remaining(initial_allowance).to_string(),
            late.join(","),
            missing.join(","),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_attendance<W: Write>(writer: W, sheet: &[RosterEntry]) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["Section", "Name", "Email"])?;
    for entry in sheet {
        out.write_record([&entry.section, &entry.name, &entry.email])?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_quizzes<W: Write>(writer: W, book: &QuizBook) -> csv::Result<()> {
    let mut header = vec![
        "Name".to_string(),
        "Email".to_string(),
        "SID".to_string(),
        "Quiz %".to_string(),
    ];
    header.extend(book.quizzes.iter().map(|q| format!("quiz-{}", q.name)));

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&header)?;
    for standing in &book.standings {
        let mut row = vec![
            standing.name.clone(),
            standing.email.clone(),
            standing.sid.clone(),
            format!("{:.2}", standing.participation * 100.0),
        ];
        row.extend(standing.marks.iter().map(|mark| match mark {
            QuizMark::Exempt => "exempt".to_string(),
            other => other
                .credit(book.late_credit)
                .unwrap_or_default()
                .to_string(),
        }));
        out.write_record(&row)?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_group_links<W: Write>(writer: W, links: &[GroupLink]) -> csv::Result<()> {
    let width = links.iter().map(|l| l.members.len()).max().unwrap_or(0).max(2);
    let mut header = vec!["Group #".to_string(), "Group Submission".to_string()];
    for n in 1..=width {
        header.push(format!("Member {n}"));
        header.push(format!("Member {n} Submission"));
    }

    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&header)?;
    for link in links {
        let mut row = vec![link.group_submission_id.clone(), link.group_url.clone()];
        for n in 0..width {
            match link.members.get(n) {
                Some(member) => {
                    row.push(member.name.clone());
                    row.push(member.review_url.clone());
                }
                None => {
                    row.push("N/A".to_string());
                    row.push("N/A".to_string());
                }
            }
        }
        out.write_record(&row)?;
    }
    out.flush()?;
    Ok(())
}
