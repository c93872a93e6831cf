use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::models::GradedRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedMember {
    pub sid: String,
    pub name: String,
    pub review_url: String,
}

/// A group submission and the individual submissions of its members.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLink {
    pub group_submission_id: String,
    pub group_url: String,
    pub members: Vec<LinkedMember>,
}

/// Pair each group submission with its members' individual submissions.
///
/// Members with no individual submission, or with more than one, are logged
/// and left out of the group's member list.
pub fn link_group_submissions(
    group: &[GradedRecord],
    individual: &[GradedRecord],
) -> Vec<GroupLink> {
    let mut by_submission: BTreeMap<&str, Vec<&GradedRecord>> = BTreeMap::new();
    for record in group {
        by_submission
            .entry(record.assignment_submission_id.as_str())
            .or_default()
            .push(record);
    }

    let mut individual_by_sid: BTreeMap<&str, Vec<&GradedRecord>> = BTreeMap::new();
    for record in individual {
        individual_by_sid.entry(record.sid.as_str()).or_default().push(record);
    }

    by_submission
        .into_iter()
        .map(|(submission_id, records)| {
            let mut seen = BTreeSet::new();
            let mut members = Vec::new();
            for member in records.iter().filter(|r| seen.insert(r.sid.as_str())) {
                let own = individual_by_sid
                    .get(member.sid.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let submissions: BTreeSet<&str> =
                    own.iter().map(|r| r.assignment_submission_id.as_str()).collect();
                match submissions.len() {
                    0 => warn!(sid = %member.sid, name = %member.name, "no individual submission for group member"),
                    1 => members.push(LinkedMember {
                        sid: member.sid.clone(),
                        name: own[0].name.clone(),
                        review_url: own[0].review_url.clone(),
                    }),
                    n => warn!(sid = %member.sid, name = %member.name, submissions = n, "group member submitted individually more than once"),
                }
            }
            GroupLink {
                group_submission_id: submission_id.to_string(),
                group_url: records[0].review_url.clone(),
                members,
            }
        })
        .collect()
}
