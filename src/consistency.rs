use std::collections::BTreeMap;

use crate::models::{
    CompletionSummary, GradedRecord, GraderConsistency, GraderSummary, InconsistentStudent,
    LatenessSplit, MissingQuestions, ScoreOutlier,
};

pub fn bucket_by_student(records: &[GradedRecord]) -> BTreeMap<&str, Vec<&GradedRecord>> {
    let mut buckets: BTreeMap<&str, Vec<&GradedRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.sid.as_str()).or_default().push(record);
    }
    buckets
}

pub fn bucket_by_grader(records: &[GradedRecord]) -> BTreeMap<&str, Vec<&GradedRecord>> {
    let mut buckets: BTreeMap<&str, Vec<&GradedRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.grader.as_str()).or_default().push(record);
    }
    buckets
}

fn is_scored(record: &GradedRecord) -> bool {
    record.was_submitted && !record.is_ungraded()
}

/// Students whose submitted question count differs from the expected count.
pub fn missing_questions(records: &[GradedRecord], expected: usize) -> Vec<MissingQuestions> {
    bucket_by_student(records)
        .into_iter()
        .filter_map(|(sid, bucket)| {
            let seen = bucket.iter().filter(|r| r.was_submitted).count();
            (seen != expected).then(|| MissingQuestions {
                sid: sid.to_string(),
                name: bucket[0].name.clone(),
                email: bucket[0].email.clone(),
                missing: expected as i64 - seen as i64,
            })
        })
        .collect()
}

/// Students whose question totals spread by more than `threshold` points.
pub fn inconsistent_students(
    records: &[GradedRecord],
    threshold: f64,
) -> Vec<InconsistentStudent> {
    bucket_by_student(records)
        .into_iter()
        .filter_map(|(sid, bucket)| {
            let totals: Vec<(String, f64)> = bucket
                .iter()
                .filter(|r| is_scored(r))
                .map(|r| (r.question.clone(), r.reported_total))
                .collect();
            if totals.len() < 2 {
                return None;
            }
            let max = totals.iter().map(|t| t.1).fold(f64::NEG_INFINITY, f64::max);
            let min = totals.iter().map(|t| t.1).fold(f64::INFINITY, f64::min);
            let spread = max - min;
            (spread > threshold).then(|| InconsistentStudent {
                sid: sid.to_string(),
                name: bucket[0].name.clone(),
                spread,
                totals,
            })
        })
        .collect()
}

pub fn grader_consistency(records: &[GradedRecord], outlier_stdevs: f64) -> GraderConsistency {
    let scored: Vec<GradedRecord> = records.iter().filter(|r| is_scored(r)).cloned().collect();

    let mut graders: Vec<GraderSummary> = bucket_by_grader(&scored)
        .into_iter()
        .map(|(grader, bucket)| {
            let totals: Vec<f64> = bucket.iter().map(|r| r.reported_total).collect();
            GraderSummary {
                grader: grader.to_string(),
                count: totals.len(),
                mean: mean(&totals),
                stdev: sample_stdev(&totals),
            }
        })
        .collect();
    graders.sort_by(|a, b| {
        a.mean
            .partial_cmp(&b.mean)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.grader.cmp(&b.grader))
    });

    let totals: Vec<f64> = scored.iter().map(|r| r.reported_total).collect();
    let global_median = median(&totals);
    let global_stdev = sample_stdev(&totals);

    let outliers = if global_stdev > 0.0 {
        scored
            .iter()
            .filter(|r| (r.reported_total - global_median).abs() > outlier_stdevs * global_stdev)
            .map(|r| ScoreOutlier {
                grader: r.grader.clone(),
                question: r.question.clone(),
                name: r.name.clone(),
                total: r.reported_total,
                review_url: r.review_url.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    GraderConsistency {
        graders,
        global_median,
        global_stdev,
        outliers,
    }
}

/// Graded versus ungraded counts per question, split by lateness when the
/// records carry it.
pub fn completion(records: &[GradedRecord], grace_minutes: f64) -> Vec<CompletionSummary> {
    let mut by_question: BTreeMap<&str, CompletionSummary> = BTreeMap::new();

    for record in records.iter().filter(|r| r.was_submitted) {
        let summary = by_question
            .entry(record.question.as_str())
            .or_insert_with(|| CompletionSummary {
                question: record.question.clone(),
                ..CompletionSummary::default()
            });
        let (count, split) = if record.is_ungraded() {
            (&mut summary.ungraded, &mut summary.ungraded_split)
        } else {
            (&mut summary.graded, &mut summary.graded_split)
        };
        *count += 1;
        if let Some(minutes) = record.lateness_minutes {
            let split = split.get_or_insert_with(LatenessSplit::default);
            if minutes > grace_minutes {
                split.late += 1;
            } else {
                split.on_time += 1;
            }
        }
    }

    by_question.into_values().collect()
}

/// Submitted records that still need a grader.
pub fn left_to_grade(records: &[GradedRecord]) -> Vec<&GradedRecord> {
    let mut pending: Vec<&GradedRecord> = records
        .iter()
        .filter(|r| r.was_submitted && r.is_ungraded())
        .collect();
    pending.sort_by(|a, b| a.question.cmp(&b.question).then_with(|| a.name.cmp(&b.name)));
    pending
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
