use thiserror::Error;

use crate::statistics::SolvingStatistics;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("'{entity}' is assigned multiple resulting states")]
    MultipleResultingState { entity: String },

    #[error("No resulting state can be derived for '{entity}'")]
    UnknownResultingState { entity: String },

    #[error("Unknown entity referenced: {entity}")]
    UnknownEntity { entity: String },

    #[error("Duration evaluation failed for '{entity}': {reason}")]
    DurationEvaluation { entity: String, reason: String },

    #[error("Malformed constraint '{constraint}': {reason}")]
    MalformedConstraint { constraint: String, reason: String },

    #[error("Inconsistent model for '{entity}': {details}")]
    InconsistentModel { entity: String, details: String },

    #[error("Bin-packing items for '{dimension}' are not sorted by non-increasing size")]
    UnsortedItems { dimension: String },

    #[error("Configuration is not viable: {details}")]
    NonViableConfiguration { details: String },

    #[error("No reconfiguration plan found")]
    NoPlanFound { statistics: SolvingStatistics },

    #[error("No node can host VM '{vm}'")]
    NoViableHost { vm: String },

    #[error("Failed to parse plan entry '{line}': {reason}")]
    PlanParse { line: String, reason: String },

    #[error("Plan serialization failed: {0}")]
    PlanEncoding(#[from] Box<bincode::ErrorKind>),

    #[error("Plan JSON encoding failed: {0}")]
    PlanJson(#[from] serde_json::Error),

    #[error("A partition worker panicked")]
    PartitionFailure,

    #[error("Invalid planner parameters: {reason}")]
    InvalidParams { reason: String },
}

pub type Result<T> = std::result::Result<T, PlanError>;
