use std::path::PathBuf;

use thiserror::Error;

/// Problems that make a rubric unusable. Any of these aborts the load of the
/// assignment the rubric belongs to.
#[derive(Debug, Error)]
pub enum RubricError {
    #[error("could not read rubric {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rubric is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("rubric has no gsAssignmentID; review URLs cannot be built without it")]
    MissingAssignmentId,

    #[error("rubric item '{0}' has no entry in shortnames")]
    MissingShortName(String),

    #[error("rubric item '{0}' has no entry in aggr_method")]
    MissingAggregation(String),

    #[error("rubric item '{item}' uses unknown aggregation method '{method}'")]
    UnknownAggregation { item: String, method: String },

    #[error("rubric item '{0}' does not have a numeric point value")]
    InvalidPoints(String),

    #[error("rubric sets both wasSubmittedItem and wasNotSubmittedItem")]
    ConflictingSubmissionMarkers,

    #[error("submission marker '{0}' refers to an item with sub-items")]
    StructuredSubmissionMarker(String),
}

/// A rubric term that matched no column of an evaluation table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no column matches '{term}'")]
pub struct ColumnNotFound {
    pub term: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Rubric(#[from] RubricError),

    #[error("could not parse table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("data directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("assignment '{0}' is not listed in the config")]
    UnknownAssignment(String),

    #[error("assignment '{0}' is listed more than once")]
    DuplicateAssignment(String),

    #[error("linked assignment '{0}' is not listed in the config")]
    UnknownLinkedAssignment(String),
}
