use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::LoadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub sid: String,
    pub name: String,
    pub email: String,
    pub section: String,
}

/// A manual slip-day adjustment for one student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlipOverride {
    pub email: String,
    pub name: Option<String>,
    pub extra_days: i64,
    pub excluding: BTreeSet<String>,
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> LoadError + '_ {
    move |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a gradebook roster export. The export carries two metadata rows
/// after the header and a test student at the end, all discarded.
pub fn load_roster(path: &Path, email_domain: &str) -> Result<Vec<RosterEntry>, LoadError> {
    #[derive(Deserialize)]
    struct CsvRow {
        #[serde(rename = "Student", default)]
        student: Option<String>,
        #[serde(rename = "SIS User ID", default)]
        sis_user_id: Option<String>,
        #[serde(rename = "SIS Login ID", default)]
        sis_login_id: Option<String>,
        #[serde(rename = "Section", default)]
        section: Option<String>,
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_error(path))?;
    let rows = reader
        .deserialize::<CsvRow>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_error(path))?;
    let last = rows.len().saturating_sub(1);

    let mut roster = Vec::new();
    for (idx, row) in rows.into_iter().enumerate() {
        if idx == 1 || idx == 2 || idx == last {
            continue;
        }
        let Some(sid) = row.sis_user_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        else {
            continue;
        };
        let login = row.sis_login_id.unwrap_or_default();
        let section = row.section.unwrap_or_default();
        roster.push(RosterEntry {
            sid,
            name: row.student.unwrap_or_default().trim().to_string(),
            email: format!("{}@{}", login.trim(), email_domain).to_lowercase(),
            section: section
                .split("and")
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
        });
    }

    info!(path = %path.display(), students = roster.len(), "loaded roster");
    Ok(roster)
}

pub fn load_overrides(path: &Path) -> Result<Vec<SlipOverride>, LoadError> {
    #[derive(Deserialize)]
    struct CsvRow {
        #[serde(rename = "Name", default)]
        name: Option<String>,
        #[serde(rename = "Email")]
        email: String,
        #[serde(rename = "Extra Slip Days", default)]
        extra_slip_days: Option<f64>,
        #[serde(rename = "Excluding", default)]
        excluding: Option<String>,
    }

    let mut reader = csv::Reader::from_path(path).map_err(csv_error(path))?;
    let mut overrides = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(csv_error(path))?;
        let email = row.email.trim().to_lowercase();
        if email.is_empty() {
            warn!(path = %path.display(), "override row without email skipped");
            continue;
        }
        overrides.push(SlipOverride {
            email,
            name: row.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            extra_days: row.extra_slip_days.unwrap_or(0.0).round() as i64,
            excluding: row
                .excluding
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }

    Ok(overrides)
}

/// Roster entries ordered for printing per-section attendance sheets.
pub fn attendance_sheet(roster: &[RosterEntry]) -> Vec<RosterEntry> {
    let mut sheet = roster.to_vec();
    sheet.sort_by(|a, b| a.section.cmp(&b.section).then_with(|| a.name.cmp(&b.name)));
    sheet
}
