use crate::columns::ColumnResolver;
use crate::models::{EvaluationRow, GradedRecord, GradingIssue, ItemScore};
use crate::rubric::{Aggregation, ItemPoints, Rubric, RubricItem};

/// Everything the row grader needs besides the row itself.
#[derive(Debug, Clone, Copy)]
pub struct GradingContext<'a> {
    pub rubric: &'a Rubric,
    pub question: &'a str,
    pub review_url_base: &'a str,
}

impl GradingContext<'_> {
    pub fn review_url(&self, row: &EvaluationRow) -> String {
        format!(
            "{}/assignments/{}/submissions/{}#{}",
            self.review_url_base.trim_end_matches('/'),
            self.rubric.assignment_id,
            row.assignment_submission_id,
            row.question_submission_id
        )
    }
}

/// Score one evaluation row against the rubric.
///
/// Per-row data problems never fail; they are collected on the returned
/// record for a human to adjudicate.
pub fn grade_row(
    row: &EvaluationRow,
    ctx: &GradingContext<'_>,
    resolver: &impl ColumnResolver,
) -> GradedRecord {
    let rubric = ctx.rubric;
    let reported = row.score.unwrap_or(0.0);
    let adjustment = row.adjustment.unwrap_or(0.0);
    let mut issues: Vec<GradingIssue> = row
        .unparseable
        .iter()
        .map(|(column, cell)| GradingIssue::UnparseableNumber {
            column: column.clone(),
            cell: cell.clone(),
        })
        .collect();
    let mut incomplete = false;

    let mut was_submitted = true;
    if let Some(marker) = &rubric.submission_marker {
        match resolver.resolve(&marker.item) {
            Ok(column) => was_submitted = marker.was_submitted(row.is_marked(&column)),
            Err(err) => issues.push(GradingIssue::ColumnNotFound { term: err.term }),
        }
    }

    let mut scores = Vec::with_capacity(rubric.items.len());
    for item in &rubric.items {
        let points = if rubric.is_submission_marker(&item.name) {
            match item.points {
                ItemPoints::Flat(value) if was_submitted => value,
                _ => 0.0,
            }
        } else {
            score_item(item, row, reported, resolver, &mut issues, &mut incomplete)
        };
        scores.push(ItemScore {
            short_name: item.short_name.clone(),
            points,
        });
    }

    let computed = scores.iter().map(|s| s.points).sum::<f64>() + adjustment;
    if computed != reported {
        issues.push(GradingIssue::TotalMismatch {
            computed,
            reported,
            adjustment,
        });
    }

    if !was_submitted && reported != 0.0 {
        issues.push(GradingIssue::MarkedNotSubmitted { reported });
        was_submitted = true;
    }

    if was_submitted {
        check_comment(row.comments.as_deref(), incomplete, &mut issues);
    }

    GradedRecord {
        sid: row.sid.clone(),
        name: row.name.clone(),
        email: row.email.clone(),
        question: ctx.question.to_string(),
        grader: row.grader.clone(),
        comments: row.comments.clone(),
        adjustment,
        scores,
        computed_total: computed,
        reported_total: reported,
        was_submitted,
        incomplete,
        issues,
        review_url: ctx.review_url(row),
        assignment_submission_id: row.assignment_submission_id.clone(),
        question_submission_id: row.question_submission_id.clone(),
        lateness_minutes: None,
    }
}

fn score_item(
    item: &RubricItem,
    row: &EvaluationRow,
    reported: f64,
    resolver: &impl ColumnResolver,
    issues: &mut Vec<GradingIssue>,
    incomplete: &mut bool,
) -> f64 {
    let mut marked = |term: &str| match resolver.resolve(term) {
        Ok(column) => row.is_marked(&column),
        Err(err) => {
            issues.push(GradingIssue::ColumnNotFound { term: err.term });
            false
        }
    };

    let sub_items = match &item.points {
        ItemPoints::Flat(value) => return if marked(&item.name) { *value } else { 0.0 },
        ItemPoints::Structured(sub_items) => sub_items,
    };

    let selected: Vec<f64> = sub_items
        .iter()
        .filter(|sub| marked(&item.sub_item_term(sub)))
        .map(|sub| sub.points)
        .collect();

    match item.aggregation {
        Aggregation::Sum => selected.iter().sum(),
        Aggregation::Max if selected.is_empty() => {
            *incomplete = true;
            if reported != 0.0 {
                issues.push(GradingIssue::MissingSelection {
                    item: item.name.clone(),
                });
            }
            0.0
        }
        Aggregation::Max => {
            if selected.len() > 1 {
                issues.push(GradingIssue::MultipleSelections {
                    item: item.name.clone(),
                });
            }
            selected.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        }
    }
}

fn check_comment(comment: Option<&str>, incomplete: bool, issues: &mut Vec<GradingIssue>) {
    match comment.map(str::trim) {
        None | Some("") => issues.push(GradingIssue::BlankComment { incomplete }),
        Some(text) if text.contains("you") || text.contains("You") => {
            issues.push(GradingIssue::SecondPersonComment)
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::HeaderResolver;

    const RUBRIC: &str = r#"{
        "gsAssignmentID": "777",
        "rubric": {
            "Flat": 2,
            "Structured": { "Partial": 3, "Full": 5 }
        },
        "aggr_method": { "Flat": "max", "Structured": "max" },
        "shortnames": { "Flat": "flat", "Structured": "structured" }
    }"#;

    const MARKED_RUBRIC: &str = r#"{
        "gsAssignmentID": "777",
        "wasNotSubmittedItem": "Not submitted",
        "rubric": {
            "Not submitted": 0,
            "Tags": { "A": 1, "B": 1.5 }
        },
        "aggr_method": { "Not submitted": "max", "Tags": "sum" },
        "shortnames": { "Not submitted": "ns", "Tags": "tags" }
    }"#;

    fn sample_row(cells: &[(&str, &str)], score: f64, comment: &str) -> EvaluationRow {
        EvaluationRow {
            sid: "1001".into(),
            name: "Avery Lee".into(),
            email: "avery@example.com".into(),
            grader: "Jules".into(),
            comments: Some(comment.into()),
            adjustment: None,
            score: Some(score),
            assignment_submission_id: "555".into(),
            question_submission_id: "999".into(),
            cells: cells
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            unparseable: Vec::new(),
        }
    }

    fn grade(rubric_json: &str, row: &EvaluationRow) -> GradedRecord {
        let rubric = Rubric::from_json(rubric_json).unwrap();
        let ctx = GradingContext {
            rubric: &rubric,
            question: "Q1",
            review_url_base: "https://grading.example.com/courses/42/",
        };
        let resolver = HeaderResolver::new(row.cells.keys().cloned().collect());
        grade_row(row, &ctx, &resolver)
    }

    fn structured(partial: &str, full: &str) -> Vec<(&'static str, String)> {
        vec![
            ("Flat", "true".to_string()),
            ("Structured: Partial", partial.to_string()),
            ("Structured: Full", full.to_string()),
        ]
    }

    fn row_from(cells: &[(&'static str, String)], score: f64) -> EvaluationRow {
        let borrowed: Vec<(&str, &str)> = cells.iter().map(|(k, v)| (*k, v.as_str())).collect();
        sample_row(&borrowed, score, "Clear argument, well supported.")
    }

    #[test]
    fn scores_flat_and_single_select_items() {
        let record = grade(RUBRIC, &row_from(&structured("true", "false"), 5.0));
        assert_eq!(record.score_for("flat"), Some(2.0));
        assert_eq!(record.score_for("structured"), Some(3.0));
        assert_eq!(record.computed_total, 5.0);
        assert!(record.issues.is_empty(), "{:?}", record.issues);
        assert!(record.was_submitted);
        assert!(!record.incomplete);
        assert_eq!(
            record.review_url,
            "https://grading.example.com/courses/42/assignments/777/submissions/555#999"
        );
    }

    #[test]
    fn single_select_with_no_selection_is_incomplete() {
        let record = grade(RUBRIC, &row_from(&structured("false", "false"), 2.0));
        assert_eq!(record.score_for("structured"), Some(0.0));
        assert!(record.incomplete);
        assert!(record.issues.contains(&GradingIssue::MissingSelection {
            item: "Structured".into()
        }));
    }

    #[test]
    fn unscored_row_without_selection_is_not_an_error() {
        let mut row = row_from(&structured("false", "false"), 0.0);
        row.cells.insert("Flat".into(), "false".into());
        let record = grade(RUBRIC, &row);
        assert!(record.incomplete);
        assert!(!record
            .issues
            .iter()
            .any(|i| matches!(i, GradingIssue::MissingSelection { .. })));
        assert!(record.is_ungraded());
    }

    #[test]
    fn multiple_selections_keep_the_largest_value() {
        let record = grade(RUBRIC, &row_from(&structured("TRUE", "true"), 7.0));
        assert_eq!(record.score_for("structured"), Some(5.0));
        assert!(record.issues.contains(&GradingIssue::MultipleSelections {
            item: "Structured".into()
        }));
        assert!(!record.has_total_mismatch());
    }

    #[test]
    fn total_mismatch_is_reported_with_adjustment() {
        let mut row = row_from(&structured("true", "false"), 6.0);
        row.adjustment = Some(-1.0);
        let record = grade(RUBRIC, &row);
        assert_eq!(record.computed_total, 4.0);
        assert!(record.has_total_mismatch());
        assert!(record.issues.contains(&GradingIssue::TotalMismatch {
            computed: 4.0,
            reported: 6.0,
            adjustment: -1.0
        }));
    }

    #[test]
    fn reconciliation_error_iff_totals_disagree() {
        let cases = [
            ("true", "false", None, 5.0),
            ("true", "false", Some(1.0), 6.0),
            ("false", "true", None, 7.0),
            ("false", "true", Some(-0.5), 6.0),
            ("true", "false", None, 4.0),
        ];
        for (partial, full, adjustment, reported) in cases {
            let mut row = row_from(&structured(partial, full), reported);
            row.adjustment = adjustment;
            let record = grade(RUBRIC, &row);
            let sum: f64 = record.scores.iter().map(|s| s.points).sum();
            let agrees = sum + record.adjustment == record.reported_total;
            assert_eq!(agrees, !record.has_total_mismatch(), "{partial} {full} {reported}");
        }
    }

    #[test]
    fn sum_items_add_every_selection() {
        let row = sample_row(
            &[("Not submitted", "false"), ("Tags: A", "true"), ("Tags: B", "true")],
            2.5,
            "Nice tags.",
        );
        let record = grade(MARKED_RUBRIC, &row);
        assert_eq!(record.score_for("tags"), Some(2.5));
        assert_eq!(record.score_for("ns"), Some(0.0));
        assert!(record.was_submitted);
        assert!(record.issues.is_empty(), "{:?}", record.issues);
    }

    #[test]
    fn not_submitted_marker_clears_submission() {
        let row = sample_row(
            &[("Not submitted", "true"), ("Tags: A", "false"), ("Tags: B", "false")],
            0.0,
            "",
        );
        let record = grade(MARKED_RUBRIC, &row);
        assert!(!record.was_submitted);
        assert!(record.issues.is_empty(), "{:?}", record.issues);
    }

    #[test]
    fn score_contradicting_marker_forces_submission() {
        let row = sample_row(
            &[("Not submitted", "true"), ("Tags: A", "true"), ("Tags: B", "false")],
            1.0,
            "Good start.",
        );
        let record = grade(MARKED_RUBRIC, &row);
        assert!(record.was_submitted);
        assert!(record
            .issues
            .contains(&GradingIssue::MarkedNotSubmitted { reported: 1.0 }));
    }

    #[test]
    fn comment_checks() {
        let mut row = row_from(&structured("true", "false"), 5.0);
        row.comments = Some("   ".into());
        let record = grade(RUBRIC, &row);
        assert!(record
            .issues
            .contains(&GradingIssue::BlankComment { incomplete: false }));

        row.comments = Some("I think your argument works.".into());
        let record = grade(RUBRIC, &row);
        assert!(record.issues.contains(&GradingIssue::SecondPersonComment));

        let mut row = row_from(&structured("false", "false"), 0.0);
        row.cells.insert("Flat".into(), "false".into());
        row.comments = None;
        let record = grade(RUBRIC, &row);
        assert!(record
            .issues
            .contains(&GradingIssue::BlankComment { incomplete: true }));
    }

    #[test]
    fn unresolvable_column_is_a_row_issue() {
        let row = sample_row(&[("Flat", "true")], 2.0, "Solid.");
        let record = grade(RUBRIC, &row);
        assert!(record
            .issues
            .iter()
            .any(|i| matches!(i, GradingIssue::ColumnNotFound { .. })));
        assert_eq!(record.score_for("flat"), Some(2.0));
    }

    #[test]
    fn missing_score_and_adjustment_count_as_zero() {
        let mut row = row_from(&structured("false", "false"), 0.0);
        row.cells.insert("Flat".into(), "false".into());
        row.score = None;
        let record = grade(RUBRIC, &row);
        assert_eq!(record.reported_total, 0.0);
        assert_eq!(record.adjustment, 0.0);
        assert!(!record.has_total_mismatch());
    }

    #[test]
    fn unparseable_score_is_a_row_issue() {
        let mut row = row_from(&structured("true", "false"), 0.0);
        row.score = None;
        row.unparseable.push(("Score".into(), "5 pts".into()));
        let record = grade(RUBRIC, &row);
        assert_eq!(record.reported_total, 0.0);
        assert!(record.issues.contains(&GradingIssue::UnparseableNumber {
            column: "Score".into(),
            cell: "5 pts".into()
        }));
        assert!(record.has_total_mismatch());
    }
}
