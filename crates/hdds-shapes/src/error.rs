// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the shapes session engine.

use thiserror::Error;

use crate::session::SessionStep;

/// Option validation failure. The binary prints the message followed by the
/// usage text and exits with code 1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("please specify topic name [-t]")]
    MissingTopic,

    #[error("please specify publish [-P] or subscribe [-S]")]
    MissingRole,

    #[error("please specify only one of: publish [-P] or subscribe [-S]")]
    ConflictingRoles,

    #[error("unrecognized value for durability '{0}'")]
    InvalidDurability(String),

    #[error("unrecognized value for data representation '{0}'")]
    InvalidRepresentation(String),

    #[error("unrecognized value for history_depth '{0}'")]
    InvalidHistoryDepth(i32),

    #[error("unrecognized value for ownership_strength '{0}'")]
    InvalidOwnershipStrength(i32),
}

/// Failure reported by a transport backend.
///
/// "No more data" is not an error: `take_next_instance` reports it through
/// [`crate::TakeOutcome::NoMoreData`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("entity creation rejected: {0}")]
    CreationFailed(String),

    #[error("precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("invalid filter expression: {0}")]
    Filter(String),

    #[error("transport failure: {0}")]
    Backend(String),

    #[error("hdds: {0}")]
    Hdds(#[from] hdds::Error),
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum ShapesError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("failed to create {step}")]
    EntityCreation {
        step: SessionStep,
        #[source]
        source: TransportError,
    },

    #[error("invalid session state: {0}")]
    InvalidState(String),
}

impl ShapesError {
    /// Process exit code for this error (1 = arguments, 2 = init/run).
    pub fn exit_code(&self) -> i32 {
        match self {
            ShapesError::Argument(_) => 1,
            ShapesError::EntityCreation { .. } | ShapesError::InvalidState(_) => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShapesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_messages_match_usage_hints() {
        assert_eq!(
            ArgumentError::MissingTopic.to_string(),
            "please specify topic name [-t]"
        );
        assert_eq!(
            ArgumentError::InvalidDurability("z".into()).to_string(),
            "unrecognized value for durability 'z'"
        );
    }

    #[test]
    fn test_exit_codes() {
        let arg = ShapesError::from(ArgumentError::MissingRole);
        assert_eq!(arg.exit_code(), 1);

        let create = ShapesError::EntityCreation {
            step: SessionStep::Topic,
            source: TransportError::CreationFailed("no type".into()),
        };
        assert_eq!(create.exit_code(), 2);
        assert_eq!(create.to_string(), "failed to create topic");
    }
}
