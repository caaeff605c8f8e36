use crate::core::grid::GridError;
use crate::core::io::grid::GridFileError;
use crate::core::models::arena::ArenaError;
use crate::core::models::value::ValueError;
use crate::core::structure::reference::StructureError;
use crate::core::utils::pbc::PbcError;
use thiserror::Error;

/// Numerical faults raised while an action evaluates its tasks.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Grid evaluation failed: {0}")]
    Grid(#[from] GridError),
    #[error("Periodic boundary error: {0}")]
    Pbc(#[from] PbcError),
    #[error("Value access failed: {0}")]
    Value(#[from] ValueError),
    #[error("Atom access failed: {0}")]
    Arena(#[from] ArenaError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error in action '{label}': {message}")]
    Configuration { label: String, message: String },

    #[error("Ordering error in action '{label}': {message}")]
    Ordering { label: String, message: String },

    #[error("Runtime computation error in action '{label}': {source}")]
    Computation {
        label: String,
        source: ComputationError,
    },

    #[error("Unknown action type '{0}'")]
    UnknownAction(String),

    #[error("Duplicate action label '{0}'")]
    DuplicateLabel(String),

    #[error("Action type '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("Value '{0}' does not exist in the graph")]
    UnknownValue(String),

    #[error("Failed to read grid file: {0}")]
    GridFile(#[from] GridFileError),

    #[error("Reference structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Invalid simulation input: {0}")]
    Input(#[from] ArenaError),

    #[error("Invalid simulation cell: {0}")]
    Cell(#[from] PbcError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn configuration(label: &str, message: impl Into<String>) -> Self {
        EngineError::Configuration {
            label: label.to_string(),
            message: message.into(),
        }
    }

    pub fn ordering(label: &str, message: impl Into<String>) -> Self {
        EngineError::Ordering {
            label: label.to_string(),
            message: message.into(),
        }
    }

    pub fn computation(label: &str, source: impl Into<ComputationError>) -> Self {
        EngineError::Computation {
            label: label.to_string(),
            source: source.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration { .. })
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, EngineError::Ordering { .. })
    }

    pub fn is_computation(&self) -> bool {
        matches!(self, EngineError::Computation { .. })
    }
}
