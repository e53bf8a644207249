//! Error taxonomy shared by all components.

use crate::message::MessageType;
use crate::model::ModelError;
use crate::target::RoutingError;
use crate::transform::TransformError;

/// Invalid component configuration. Detected at start, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting '{0}'")]
    MissingSetting(String),

    #[error("invalid value '{value}' for setting '{name}': {reason}")]
    InvalidSetting {
        name: String,
        value: String,
        reason: String,
    },

    #[error("step '{step}' requires an {direction} model")]
    MissingModel { step: String, direction: String },

    #[error("model '{0}' is not defined")]
    UnknownModel(String),

    #[error("invalid model: {0}")]
    Model(#[from] ModelError),

    #[error("attribute '{0}' is not part of the model")]
    UnknownAttribute(String),

    #[error("attribute '{0}' has no ordinal")]
    MissingOrdinal(String),

    #[error("attribute '{0}' is bound more than once")]
    DuplicateBinding(String),

    #[error("attributes '{first}' and '{second}' both bind to ordinal {ordinal}")]
    OrdinalCollision {
        ordinal: usize,
        first: String,
        second: String,
    },

    #[error("unknown transform '{0}'")]
    UnknownTransform(String),
}

/// Malformed physical data. Halts the current batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("line {line}: invalid {encoding} byte sequence")]
    Undecodable { line: usize, encoding: String },

    #[error("record {record}: not representable in {encoding}")]
    Unencodable { record: usize, encoding: String },

    #[error("record {record}: {reason}")]
    Write { record: usize, reason: String },
}

/// Any failure raised by a component's lifecycle methods.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("sequence violation on edge from '{edge}': expected {expected}, got {actual}")]
    Ordering {
        edge: String,
        expected: u64,
        actual: u64,
    },

    #[error("message from '{0}' arrived after its last message")]
    StreamClosed(String),

    #[error("message from unexpected upstream '{0}'")]
    UnknownEdge(String),

    #[error("upstream closed before sending its last message")]
    UpstreamClosed,

    #[error("expected a {expected} payload, got {actual}")]
    UnexpectedPayload {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("component used before start")]
    NotStarted,

    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ComponentError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ComponentError::Configuration(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComponentError::Cancelled)
    }
}
