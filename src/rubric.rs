use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RubricError;

/// How the selected sub-items of a structured rubric item combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Single-select: exactly one sub-item should be marked.
    Max,
    /// Multi-select: every marked sub-item adds its points.
    Sum,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Max => "max",
            Aggregation::Sum => "sum",
        }
    }

    fn parse(item: &str, method: &str) -> Result<Self, RubricError> {
        match method.trim() {
            "max" => Ok(Aggregation::Max),
            "sum" => Ok(Aggregation::Sum),
            other => Err(RubricError::UnknownAggregation {
                item: item.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubItem {
    pub name: String,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemPoints {
    Flat(f64),
    Structured(Vec<SubItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RubricItem {
    pub name: String,
    pub short_name: String,
    pub aggregation: Aggregation,
    pub points: ItemPoints,
}

impl RubricItem {
    /// Column term for a sub-item, in the `item: subitem` form the grading
    /// platform uses for its headers.
    pub fn sub_item_term(&self, sub_item: &SubItem) -> String {
        format!("{}: {}", self.name, sub_item.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPolarity {
    /// A marked cell means the unit was submitted.
    MarkedWhenSubmitted,
    /// A marked cell means the unit was not submitted.
    MarkedWhenMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionMarker {
    pub item: String,
    pub polarity: MarkerPolarity,
}

impl SubmissionMarker {
    pub fn was_submitted(&self, marked: bool) -> bool {
        match self.polarity {
            MarkerPolarity::MarkedWhenSubmitted => marked,
            MarkerPolarity::MarkedWhenMissing => !marked,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    pub assignment_id: String,
    pub max_score: Option<f64>,
    pub expected_question_count: Option<usize>,
    pub submission_marker: Option<SubmissionMarker>,
    pub skip_questions: BTreeSet<String>,
    pub items: Vec<RubricItem>,
}

#[derive(Deserialize)]
struct RawRubric {
    #[serde(rename = "gsAssignmentID")]
    assignment_id: Option<Value>,
    #[serde(rename = "maxScore")]
    max_score: Option<Value>,
    #[serde(rename = "expectedQuestionsAnswered")]
    expected_questions: Option<Value>,
    #[serde(rename = "wasSubmittedItem")]
    was_submitted_item: Option<String>,
    #[serde(rename = "wasNotSubmittedItem")]
    was_not_submitted_item: Option<String>,
    #[serde(rename = "skipQuestions", default)]
    skip_questions: Vec<String>,
    #[serde(default)]
    rubric: Map<String, Value>,
    #[serde(default)]
    aggr_method: HashMap<String, String>,
    #[serde(default)]
    shortnames: HashMap<String, String>,
}

impl Rubric {
    pub fn load(path: &Path) -> Result<Self, RubricError> {
        let text = std::fs::read_to_string(path).map_err(|source| RubricError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, RubricError> {
        let raw: RawRubric = serde_json::from_str(text)?;

        let assignment_id = match raw.assignment_id {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(RubricError::MissingAssignmentId),
        };

        let submission_marker = match (raw.was_submitted_item, raw.was_not_submitted_item) {
            (Some(_), Some(_)) => return Err(RubricError::ConflictingSubmissionMarkers),
            (Some(item), None) => Some(SubmissionMarker {
                item,
                polarity: MarkerPolarity::MarkedWhenSubmitted,
            }),
            (None, Some(item)) => Some(SubmissionMarker {
                item,
                polarity: MarkerPolarity::MarkedWhenMissing,
            }),
            (None, None) => None,
        };

        let mut items = Vec::with_capacity(raw.rubric.len());
        for (name, value) in raw.rubric {
            let short_name = raw
                .shortnames
                .get(&name)
                .cloned()
                .ok_or_else(|| RubricError::MissingShortName(name.clone()))?;
            let method = raw
                .aggr_method
                .get(&name)
                .ok_or_else(|| RubricError::MissingAggregation(name.clone()))?;
            let aggregation = Aggregation::parse(&name, method)?;
            let points = parse_points(&name, &value)?;
            items.push(RubricItem {
                name,
                short_name,
                aggregation,
                points,
            });
        }

        if let Some(marker) = &submission_marker {
            let structured = items.iter().any(|item| {
                item.name == marker.item && matches!(item.points, ItemPoints::Structured(_))
            });
            if structured {
                return Err(RubricError::StructuredSubmissionMarker(marker.item.clone()));
            }
        }

        Ok(Rubric {
            assignment_id,
            max_score: raw.max_score.as_ref().and_then(number_like),
            expected_question_count: raw
                .expected_questions
                .as_ref()
                .and_then(number_like)
                .filter(|count| *count >= 0.0)
                .map(|count| count as usize),
            submission_marker,
            skip_questions: raw.skip_questions.into_iter().collect(),
            items,
        })
    }

    pub fn item(&self, name: &str) -> Option<&RubricItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn aggregation(&self, name: &str) -> Option<Aggregation> {
        self.item(name).map(|item| item.aggregation)
    }

    pub fn short_name(&self, name: &str) -> Option<&str> {
        self.item(name).map(|item| item.short_name.as_str())
    }

    /// Short names in rubric order; these are the score columns of every export.
    pub fn short_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.short_name.as_str())
    }

    pub fn is_submission_marker(&self, name: &str) -> bool {
        self.submission_marker
            .as_ref()
            .is_some_and(|marker| marker.item == name)
    }
}

fn parse_points(item: &str, value: &Value) -> Result<ItemPoints, RubricError> {
    match value {
        Value::Object(sub_items) => {
            let mut parsed = Vec::with_capacity(sub_items.len());
            for (name, points) in sub_items {
                let points = points
                    .as_f64()
                    .ok_or_else(|| RubricError::InvalidPoints(format!("{item}: {name}")))?;
                parsed.push(SubItem {
                    name: name.clone(),
                    points,
                });
            }
            Ok(ItemPoints::Structured(parsed))
        }
        other => other
            .as_f64()
            .map(ItemPoints::Flat)
            .ok_or_else(|| RubricError::InvalidPoints(item.to_string())),
    }
}

// Rubric generators leave "ENTER" placeholders in numeric fields.
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "gsAssignmentID": "1234567",
        "maxScore": "7",
        "expectedQuestionsAnswered": 3,
        "wasNotSubmittedItem": "Not submitted",
        "skipQuestions": ["Bonus"],
        "rubric": {
            "Not submitted": 0,
            "Summary": 2,
            "Analysis": { "Weak": 3, "Strong": 5 },
            "Extras": { "Figure": 1, "Citation": 0.5 }
        },
        "aggr_method": {
            "Not submitted": "max",
            "Summary": "max",
            "Analysis": "max",
            "Extras": "sum"
        },
        "shortnames": {
            "Not submitted": "NS",
            "Summary": "Sum",
            "Analysis": "Ana",
            "Extras": "Ext"
        }
    }"#;

    #[test]
    fn parses_items_in_declared_order() {
        let rubric = Rubric::from_json(SAMPLE).unwrap();
        let names: Vec<&str> = rubric.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Not submitted", "Summary", "Analysis", "Extras"]);
        assert_eq!(
            rubric.short_names().collect::<Vec<_>>(),
            vec!["NS", "Sum", "Ana", "Ext"]
        );
        assert_eq!(rubric.assignment_id, "1234567");
        assert_eq!(rubric.max_score, Some(7.0));
        assert_eq!(rubric.expected_question_count, Some(3));
        assert!(rubric.skip_questions.contains("Bonus"));
    }

    #[test]
    fn exposes_lookups_by_item_name() {
        let rubric = Rubric::from_json(SAMPLE).unwrap();
        assert_eq!(rubric.aggregation("Extras"), Some(Aggregation::Sum));
        assert_eq!(rubric.short_name("Analysis"), Some("Ana"));
        assert_eq!(
            rubric.item("Summary").map(|i| &i.points),
            Some(&ItemPoints::Flat(2.0))
        );
        match &rubric.item("Analysis").unwrap().points {
            ItemPoints::Structured(subs) => {
                assert_eq!(subs.len(), 2);
                assert_eq!(subs[1].name, "Strong");
                assert_eq!(subs[1].points, 5.0);
            }
            other => panic!("expected structured item, got {other:?}"),
        }
    }

    #[test]
    fn submission_marker_polarity() {
        let rubric = Rubric::from_json(SAMPLE).unwrap();
        let marker = rubric.submission_marker.as_ref().unwrap();
        assert_eq!(marker.polarity, MarkerPolarity::MarkedWhenMissing);
        assert!(!marker.was_submitted(true));
        assert!(marker.was_submitted(false));
        assert!(rubric.is_submission_marker("Not submitted"));
    }

    #[test]
    fn missing_assignment_id_is_fatal() {
        let text = SAMPLE.replace("\"gsAssignmentID\": \"1234567\",", "");
        assert!(matches!(
            Rubric::from_json(&text),
            Err(RubricError::MissingAssignmentId)
        ));
        let blank = SAMPLE.replace("\"1234567\"", "\"  \"");
        assert!(matches!(
            Rubric::from_json(&blank),
            Err(RubricError::MissingAssignmentId)
        ));
    }

    #[test]
    fn every_item_needs_short_name_and_method() {
        let no_short = SAMPLE.replace("\"Extras\": \"Ext\"", "\"Other\": \"Ext\"");
        assert!(matches!(
            Rubric::from_json(&no_short),
            Err(RubricError::MissingShortName(item)) if item == "Extras"
        ));
        let no_method = SAMPLE.replace("\"Extras\": \"sum\"", "\"Other\": \"sum\"");
        assert!(matches!(
            Rubric::from_json(&no_method),
            Err(RubricError::MissingAggregation(item)) if item == "Extras"
        ));
        let bad_method = SAMPLE.replace("\"Extras\": \"sum\"", "\"Extras\": \"avg\"");
        assert!(matches!(
            Rubric::from_json(&bad_method),
            Err(RubricError::UnknownAggregation { .. })
        ));
    }

    #[test]
    fn rejects_both_submission_markers() {
        let text = SAMPLE.replace(
            "\"wasNotSubmittedItem\": \"Not submitted\",",
            "\"wasNotSubmittedItem\": \"Not submitted\", \"wasSubmittedItem\": \"Summary\",",
        );
        assert!(matches!(
            Rubric::from_json(&text),
            Err(RubricError::ConflictingSubmissionMarkers)
        ));
    }

    #[test]
    fn placeholder_numbers_are_ignored() {
        let text = SAMPLE
            .replace("\"maxScore\": \"7\"", "\"maxScore\": \"ENTER\"")
            .replace("\"expectedQuestionsAnswered\": 3", "\"expectedQuestionsAnswered\": \"ENTER\"");
        let rubric = Rubric::from_json(&text).unwrap();
        assert_eq!(rubric.max_score, None);
        assert_eq!(rubric.expected_question_count, None);
    }
}
