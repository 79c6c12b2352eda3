//! Typed errors for configuration, envelope construction and dispatch.

use std::fmt;

use thiserror::Error;

use crate::config::Identity;
use crate::envelope::MessageId;
use crate::message::{HandlerType, MessageRole, MessageType};

/// Errors detected while building an application's static configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A handler never called `identity()`
    #[error("{handler_type} handler has no identity")]
    MissingIdentity { handler_type: HandlerType },

    /// Identity names are non-empty and contain no whitespace
    #[error("invalid identity name {name:?}")]
    InvalidIdentityName { name: String },

    /// Identity keys are UUIDs
    #[error("invalid identity key {key:?} for '{name}': {source}")]
    InvalidIdentityKey {
        name: String,
        key: String,
        #[source]
        source: uuid::Error,
    },

    #[error("identity '{name}' is configured more than once")]
    DuplicateIdentityName { name: String },

    #[error("identity key {key} is configured more than once")]
    DuplicateIdentityKey { key: String },

    /// The route kind is not available to this handler type
    #[error("the '{handler}' {handler_type} handler can not {route} ({message_type})")]
    IllegalRoute {
        handler: String,
        handler_type: HandlerType,
        route: &'static str,
        message_type: MessageType,
    },

    /// A required route kind was never declared
    #[error("the '{handler}' {handler_type} handler must {route} at least one message type")]
    MissingRoute {
        handler: String,
        handler_type: HandlerType,
        route: &'static str,
    },

    #[error("the '{handler}' handler routes {message_type} more than once")]
    DuplicateRoute {
        handler: String,
        message_type: MessageType,
    },

    /// A message type must play one role across the whole application
    #[error("{message_type} is used as both a {first} and a {second}")]
    ConflictingRole {
        message_type: MessageType,
        first: MessageRole,
        second: MessageRole,
    },

    /// Commands and timeouts have exactly one consumer, events one producer
    #[error("{message_type} is {relation} by both '{first}' and '{second}'")]
    SharedMessageType {
        message_type: MessageType,
        relation: &'static str,
        first: String,
        second: String,
    },
}

/// Returned by [`Envelope::new_root`](crate::envelope::Envelope::new_root).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Timeouts can only be scheduled by a handler, never injected
    #[error("can not dispatch {message_type} directly, it is a {role}")]
    InvalidRole {
        message_type: MessageType,
        role: MessageRole,
    },
}

/// One failed controller invocation.
#[derive(Debug, Error)]
#[error("the '{handler}' {handler_type} message handler failed to handle {message_type} message {message_id}: {source:#}")]
pub struct HandlerFailure {
    pub handler: Identity,
    pub handler_type: HandlerType,
    pub message_id: MessageId,
    pub message_type: MessageType,
    #[source]
    pub source: anyhow::Error,
}

/// The combined result of a dispatch or tick.
///
/// Handler failures do not short-circuit the causal expansion, so a single
/// dispatch can fail in several places at once.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("{}", Failures(.0))]
    Handlers(Vec<HandlerFailure>),
}

impl DispatchError {
    /// The individual handler failures, in the order they occurred.
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            DispatchError::Envelope(_) => &[],
            DispatchError::Handlers(f) => f,
        }
    }

    /// Folds accumulated failures into a result.
    pub(crate) fn from_failures(failures: Vec<HandlerFailure>) -> Result<(), DispatchError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::Handlers(failures))
        }
    }
}

struct Failures<'a>(&'a [HandlerFailure]);

impl fmt::Display for Failures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [one] => write!(f, "{one}"),
            many => {
                write!(f, "{} handler invocations failed", many.len())?;
                for failure in many {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
        }
    }
}

/// Result type alias for dispatch operations.
pub type DispatchResult = std::result::Result<(), DispatchError>;
