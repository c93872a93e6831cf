use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::CourseConfig;
use crate::error::LoadError;
use crate::gradesheet::{load_assignment, LoadOptions};
use crate::models::{GradedRecord, SlipLedger};
use crate::roster::{load_overrides, load_roster, RosterEntry, SlipOverride};

const MINUTES_PER_DAY: f64 = 1440.0;

/// Slip days charged for a submission `minutes` late. Anything within the
/// grace period is free; every started day past it costs one.
pub fn slips_for_lateness(minutes: f64, grace_minutes: f64) -> i64 {
    if minutes > grace_minutes {
        (minutes / MINUTES_PER_DAY).floor() as i64 + 1
    } else {
        0
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Default)]
struct PendingLink {
    parts_seen: BTreeSet<String>,
    worst: i64,
}

/// Accumulates slip-day consumption across assignments processed in order.
#[derive(Debug)]
pub struct SlipTally {
    grace_minutes: f64,
    linked: Vec<Vec<String>>,
    exclusions: HashMap<String, BTreeSet<String>>,
    ledgers: BTreeMap<String, SlipLedger>,
    pending: BTreeMap<(usize, String), PendingLink>,
}

impl SlipTally {
    pub fn new(grace_minutes: f64, linked: Vec<Vec<String>>, overrides: &[SlipOverride]) -> Self {
        let exclusions = overrides
            .iter()
            .filter(|o| !o.excluding.is_empty())
            .map(|o| (o.email.clone(), o.excluding.clone()))
            .collect();
        Self {
            grace_minutes,
            linked,
            exclusions,
            ledgers: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    fn ledger(&mut self, email: &str, name: &str) -> &mut SlipLedger {
        self.ledgers
            .entry(email.to_string())
            .or_insert_with(|| SlipLedger {
                name: name.to_string(),
                email: email.to_string(),
                ..SlipLedger::default()
            })
    }

    fn is_excluded(&self, email: &str, assignment: &str) -> bool {
        self.exclusions
            .get(email)
            .is_some_and(|excluded| excluded.contains(assignment))
    }

    /// Charge every student seen in `records` for the assignment. Only the
    /// first record per student counts.
    pub fn record_assignment(&mut self, assignment: &str, records: &[GradedRecord]) {
        let group = self
            .linked
            .iter()
            .position(|g| g.iter().any(|member| member == assignment));
        let mut seen = HashSet::new();

        for record in records {
            let email = normalize_email(&record.email);
            if email.is_empty() {
                warn!(sid = %record.sid, assignment, "record without email skipped");
                continue;
            }
            if !seen.insert(email.clone()) {
                continue;
            }

            let lateness = record.lateness_minutes.unwrap_or(0.0);
            let used = if self.is_excluded(&email, assignment) {
                info!(email = %email, assignment, "excluding assignment from slip days");
                0
            } else {
                slips_for_lateness(lateness, self.grace_minutes)
            };

            let ledger = self.ledger(&email, &record.name);
            if lateness > 0.0 && used > 0 {
                ledger.late.insert(assignment.to_string(), lateness);
            }

            match group {
                Some(group) => self.defer_linked(group, &email, assignment, used),
                None => self.ledger(&email, &record.name).consumed += used,
            }
        }
    }

    fn defer_linked(&mut self, group: usize, email: &str, assignment: &str, used: i64) {
        let parts = self.linked[group].len();
        let pending = self.pending.entry((group, email.to_string())).or_default();
        pending.parts_seen.insert(assignment.to_string());
        pending.worst = pending.worst.max(used);
        if pending.parts_seen.len() < parts {
            return;
        }
        let worst = pending.worst;
        self.pending.remove(&(group, email.to_string()));
        info!(email, assignment, slips = worst, "charged linked assignments at their worst lateness");
        if let Some(ledger) = self.ledgers.get_mut(email) {
            ledger.consumed += worst;
        }
    }

    /// Flag roster students with no submission for the assignment. They are
    /// not charged, but get a ledger entry so they appear in the export.
    pub fn record_missing(
        &mut self,
        assignment: &str,
        records: &[GradedRecord],
        roster: &[RosterEntry],
        due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let seen: HashSet<&str> = records.iter().map(|r| r.sid.as_str()).collect();
        let lateness = due
            .map(|due| (now - due).num_minutes().max(0) as f64)
            .unwrap_or(0.0);

        for student in roster.iter().filter(|s| !seen.contains(s.sid.as_str())) {
            let email = normalize_email(&student.email);
            self.ledger(&email, &student.name)
                .missing
                .insert(assignment.to_string(), lateness);
        }
    }

    /// Settle partially seen linked groups and apply manual grants.
    pub fn finalize(mut self, overrides: &[SlipOverride]) -> Vec<SlipLedger> {
        for ((_, email), pending) in std::mem::take(&mut self.pending) {
            if let Some(ledger) = self.ledgers.get_mut(&email) {
                ledger.consumed += pending.worst;
            }
        }

        for grant in overrides {
            let name = grant.name.clone().unwrap_or_default();
            self.ledger(&grant.email, &name).consumed -= grant.extra_days;
        }

        self.ledgers.into_values().collect()
    }
}

/// Run the slip-day tally over every configured assignment, in order.
pub fn compute_ledgers(
    config: &CourseConfig,
    now: DateTime<Utc>,
) -> Result<Vec<SlipLedger>, LoadError> {
    let overrides = match &config.slip_day_overrides {
        Some(path) => load_overrides(path)?,
        None => Vec::new(),
    };
    let roster = match &config.roster {
        Some(path) => load_roster(path, &config.email_domain)?,
        None => Vec::new(),
    };

    let options = LoadOptions::from_config(config).only_submitted(true);
    let mut tally = SlipTally::new(
        config.grace_minutes,
        config.linked_assignments.clone(),
        &overrides,
    );

    for assignment in &config.assignments {
        let loaded = load_assignment(&assignment.rubric, &assignment.data, &options)?;
        if !loaded.has_lateness {
            warn!(assignment = %assignment.name, "no status table; lateness treated as zero");
        }
        tally.record_assignment(&assignment.name, &loaded.records);
        if !roster.is_empty() {
            tally.record_missing(
                &assignment.name,
                &loaded.records,
                &roster,
                assignment.due,
                now,
            );
        }
    }

    Ok(tally.finalize(&overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record(email: &str, lateness: f64) -> GradedRecord {
        GradedRecord {
            sid: email.split('@').next().unwrap_or_default().to_string(),
            name: format!("Name of {email}"),
            email: email.to_string(),
            question: "Q1".into(),
            grader: "Sam".into(),
            comments: Some("Good.".into()),
            adjustment: 0.0,
            scores: Vec::new(),
            computed_total: 5.0,
            reported_total: 5.0,
            was_submitted: true,
            incomplete: false,
            issues: Vec::new(),
            review_url: String::new(),
            assignment_submission_id: "1".into(),
            question_submission_id: "1".into(),
            lateness_minutes: Some(lateness),
        }
    }

    fn ledger_for<'a>(ledgers: &'a [SlipLedger], email: &str) -> &'a SlipLedger {
        ledgers.iter().find(|l| l.email == email).unwrap()
    }

    #[test]
    fn grace_period_boundary() {
        assert_eq!(slips_for_lateness(0.0, 20.0), 0);
        assert_eq!(slips_for_lateness(20.0, 20.0), 0);
        assert_eq!(slips_for_lateness(21.0, 20.0), 1);
        assert_eq!(slips_for_lateness(1440.0, 20.0), 2);
        assert_eq!(slips_for_lateness(3.0 * 1440.0 - 1.0, 20.0), 3);
    }

    #[test]
    fn only_first_record_per_student_counts() {
        let mut tally = SlipTally::new(20.0, Vec::new(), &[]);
        tally.record_assignment(
            "mp1",
            &[sample_record("a@x.edu", 100.0), sample_record("A@x.edu ", 5000.0)],
        );
        let ledgers = tally.finalize(&[]);
        assert_eq!(ledgers.len(), 1);
        assert_eq!(ledgers[0].consumed, 1);
        assert_eq!(ledgers[0].name, "Name of a@x.edu");
        assert_eq!(ledgers[0].late.get("mp1"), Some(&100.0));
    }

    #[test]
    fn linked_assignments_charge_the_worse_part_once() {
        let linked = vec![vec!["mp3_indiv".to_string(), "mp3_group".to_string()]];
        let mut tally = SlipTally::new(20.0, linked, &[]);
        tally.record_assignment("mp3_indiv", &[sample_record("a@x.edu", 0.0)]);
        tally.record_assignment("mp3_group", &[sample_record("a@x.edu", 2.5 * 1440.0)]);
        let ledgers = tally.finalize(&[]);
        assert_eq!(ledger_for(&ledgers, "a@x.edu").consumed, 3);
    }

    #[test]
    fn partially_seen_linked_group_is_settled_at_the_end() {
        let linked = vec![vec!["mp3_indiv".to_string(), "mp3_group".to_string()]];
        let mut tally = SlipTally::new(20.0, linked, &[]);
        tally.record_assignment("mp3_indiv", &[sample_record("a@x.edu", 30.0)]);
        let ledgers = tally.finalize(&[]);
        assert_eq!(ledger_for(&ledgers, "a@x.edu").consumed, 1);
    }

    #[test]
    fn exclusions_and_grants_apply() {
        let overrides = vec![
            SlipOverride {
                email: "a@x.edu".into(),
                name: None,
                extra_days: 2,
                excluding: ["dw1".to_string()].into(),
            },
            SlipOverride {
                email: "solo@x.edu".into(),
                name: Some("Solo".into()),
                extra_days: 1,
                excluding: BTreeSet::new(),
            },
        ];
        let mut tally = SlipTally::new(20.0, Vec::new(), &overrides);
        tally.record_assignment("dw1", &[sample_record("a@x.edu", 4000.0)]);
        tally.record_assignment("dw2", &[sample_record("a@x.edu", 60.0)]);
        let ledgers = tally.finalize(&overrides);

        let a = ledger_for(&ledgers, "a@x.edu");
        assert_eq!(a.consumed, 1 - 2);
        assert_eq!(a.remaining(10), 11);
        assert!(!a.late.contains_key("dw1"));

        let solo = ledger_for(&ledgers, "solo@x.edu");
        assert_eq!(solo.name, "Solo");
        assert_eq!(solo.remaining(10), 11);
    }

    #[test]
    fn roster_students_without_submission_are_flagged_missing() {
        let roster = vec![
            RosterEntry {
                sid: "a".into(),
                name: "Avery".into(),
                email: "a@x.edu".into(),
                section: "DIS 1".into(),
            },
            RosterEntry {
                sid: "k".into(),
                name: "Kiara".into(),
                email: "k@x.edu".into(),
                section: "DIS 1".into(),
            },
        ];
        let due = Utc.with_ymd_and_hms(2021, 3, 1, 5, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2021, 3, 2, 5, 30, 0).unwrap();
        let records = vec![sample_record("a@x.edu", 0.0)];

        let mut tally = SlipTally::new(20.0, Vec::new(), &[]);
        tally.record_assignment("mp1", &records);
        tally.record_missing("mp1", &records, &roster, Some(due), now);
        let ledgers = tally.finalize(&[]);

        let kiara = ledger_for(&ledgers, "k@x.edu");
        assert_eq!(kiara.consumed, 0);
        assert_eq!(kiara.missing.get("mp1"), Some(&(24.0 * 60.0 + 30.0)));
        assert!(ledger_for(&ledgers, "a@x.edu").missing.is_empty());
    }

    #[test]
    fn computes_ledgers_from_configured_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let rubric = r#"{
            "gsAssignmentID": "1",
            "rubric": { "Done": 1 },
            "aggr_method": { "Done": "max" },
            "shortnames": { "Done": "done" }
        }"#;
        let header = "Name,SID,Email,Assignment Submission ID,Question Submission ID,Score,Adjustment,Comments,Grader,Done";
        let footer = "Point Values,,,,,,,,,1\nRubric Numbers,,,,,,,,,1\nRubric Type,,,,,,,,,\nScoring Method,,,,,,,,,\n";

        for (name, lateness) in [("dw1", "50:00:00"), ("dw2", "00:10:00")] {
            let data = root.join(name);
            std::fs::create_dir_all(&data).unwrap();
            std::fs::write(root.join(format!("{name}.json")), rubric).unwrap();
            std::fs::write(
                data.join("q1.csv"),
                format!("{header}\nAvery Lee,1001,avery@x.edu,1,1,1,,Nice.,Sam,true\n{footer}"),
            )
            .unwrap();
            std::fs::write(
                data.join("dw_scores.csv"),
                format!("SID,Status,Lateness (H:M:S)\n1001,Graded,{lateness}\n"),
            )
            .unwrap();
        }
        std::fs::write(
            root.join("config.json"),
            r#"{ "assignments": [
                { "name": "dw1", "rubric": "dw1.json", "data": "dw1" },
                { "name": "dw2", "rubric": "dw2.json", "data": "dw2" }
            ] }"#,
        )
        .unwrap();

        let config = CourseConfig::load(&root.join("config.json")).unwrap();
        let now = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        let ledgers = compute_ledgers(&config, now).unwrap();
        assert_eq!(ledgers.len(), 1);
        assert_eq!(ledgers[0].consumed, 3);
        assert_eq!(ledgers[0].remaining(config.initial_slip_days), 7);
        assert_eq!(compute_ledgers(&config, now).unwrap(), ledgers);
    }
}
