use chrono::{DateTime, Utc};
use thiserror::Error;

use rehearsal_engine::{DispatchError, MessageRole, MessageType};

/// Failures of a test run itself, as opposed to failed expectations.
#[derive(Debug, Error)]
pub enum TestError {
    #[error("{message_type} is not a recognized message type")]
    UnrecognizedMessage { message_type: MessageType },

    #[error("can not {verb} {message_type}, it is configured as {}", with_article(.actual))]
    UnexpectedRole {
        verb: &'static str,
        message_type: MessageType,
        expected: MessageRole,
        actual: MessageRole,
    },

    #[error("time can not go backwards (now {now}, requested {requested})")]
    TimeReversal {
        now: DateTime<Utc>,
        requested: DateTime<Utc>,
    },

    #[error("the scenario has no '{step}' step")]
    IncompleteScenario { step: &'static str },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("call failed: {0:#}")]
    Call(anyhow::Error),
}

fn with_article(role: &MessageRole) -> String {
    match role {
        MessageRole::Event => format!("an {role}"),
        _ => format!("a {role}"),
    }
}
