//! Envelopes: one occurrence of a message plus its causal lineage.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Identity;
use crate::error::EnvelopeError;
use crate::message::{AnyMessage, HandlerType, MessageRole, MessageType, Payload};

/// A message ID, unique within one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out monotonically increasing message IDs, starting at 1.
///
/// Owned by one engine. Only reset as part of a full engine reset so that
/// IDs stay predictable for diagnostics.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::SeqCst))
    }

    pub fn reset(&self) {
        self.next.store(1, Ordering::SeqCst);
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The handler (and instance) that produced a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub handler: Identity,
    pub handler_type: HandlerType,
    /// Set for stateful handlers only.
    pub instance_id: Option<String>,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.handler.name, self.handler_type)?;
        if let Some(id) = &self.instance_id {
            write!(f, " instance {id}")?;
        }
        Ok(())
    }
}

/// One immutable occurrence of a message.
#[derive(Clone)]
pub struct Envelope {
    pub message_id: MessageId,
    /// The envelope whose handling produced this one, or itself for roots.
    pub causation_id: MessageId,
    /// The root of this causal tree.
    pub correlation_id: MessageId,
    pub message: Payload,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
    /// Only ever set for timeouts.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// `None` for messages dispatched from outside the application.
    pub origin: Option<Origin>,
}

impl Envelope {
    /// A root envelope for a message dispatched from outside the application.
    pub fn new_root(
        id: MessageId,
        message: Payload,
        role: MessageRole,
        created_at: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        if role == MessageRole::Timeout {
            return Err(EnvelopeError::InvalidRole {
                message_type: message.message_type(),
                role,
            });
        }

        Ok(Self {
            message_id: id,
            causation_id: id,
            correlation_id: id,
            message,
            role,
            created_at,
            scheduled_for: None,
            origin: None,
        })
    }

    /// A command or event caused by handling this envelope.
    pub fn new_child(
        &self,
        id: MessageId,
        message: Payload,
        role: MessageRole,
        created_at: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        Self {
            message_id: id,
            causation_id: self.message_id,
            correlation_id: self.correlation_id,
            message,
            role,
            created_at,
            scheduled_for: None,
            origin: Some(origin),
        }
    }

    /// A timeout caused by handling this envelope.
    pub fn new_timeout(
        &self,
        id: MessageId,
        message: Payload,
        created_at: DateTime<Utc>,
        scheduled_for: DateTime<Utc>,
        origin: Origin,
    ) -> Self {
        let mut env = self.new_child(id, message, MessageRole::Timeout, created_at, origin);
        env.scheduled_for = Some(scheduled_for);
        env
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    pub fn is_root(&self) -> bool {
        self.origin.is_none()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("message_id", &self.message_id)
            .field("causation_id", &self.causation_id)
            .field("correlation_id", &self.correlation_id)
            .field("message", &self.message)
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("scheduled_for", &self.scheduled_for)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Structural equality: identical lineage and an equal message value.
impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
            && self.causation_id == other.causation_id
            && self.correlation_id == other.correlation_id
            && self.role == other.role
            && self.created_at == other.created_at
            && self.scheduled_for == other.scheduled_for
            && self.origin == other.origin
            && same_message(&*self.message, &*other.message)
    }
}

fn same_message(a: &dyn AnyMessage, b: &dyn AnyMessage) -> bool {
    a.message_type() == b.message_type() && a.to_value() == b.to_value()
}

/// Convenience for building payloads from concrete messages.
pub fn payload<M: crate::message::Message>(message: M) -> Payload {
    Arc::new(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CommandA, EventA, TimeoutA};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    const KEY: &str = "d6c2d3e4-5e52-4a4e-8d43-96a7b4e0b7d1";

    fn origin() -> Origin {
        Origin {
            handler: Identity::new("agg", KEY).unwrap(),
            handler_type: HandlerType::Aggregate,
            instance_id: Some("<instance>".into()),
        }
    }

    #[test]
    fn generator_counts_from_one_and_resets() {
        let ids = MessageIdGenerator::new();
        assert_eq!(ids.next(), MessageId(1));
        assert_eq!(ids.next(), MessageId(2));
        ids.reset();
        assert_eq!(ids.next(), MessageId(1));
    }

    #[test]
    fn root_is_its_own_cause_and_correlation() {
        let env = Envelope::new_root(
            MessageId(7),
            payload(CommandA::new("A1")),
            MessageRole::Command,
            now(),
        )
        .unwrap();

        assert_eq!(env.causation_id, MessageId(7));
        assert_eq!(env.correlation_id, MessageId(7));
        assert!(env.is_root());
        assert!(env.scheduled_for.is_none());
    }

    #[test]
    fn root_can_not_be_a_timeout() {
        let err = Envelope::new_root(
            MessageId(1),
            payload(TimeoutA::new("T1")),
            MessageRole::Timeout,
            now(),
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "can not dispatch TimeoutA directly, it is a timeout"
        );
    }

    #[test]
    fn child_inherits_correlation_and_points_at_parent() {
        let root = Envelope::new_root(
            MessageId(1),
            payload(CommandA::new("A1")),
            MessageRole::Command,
            now(),
        )
        .unwrap();
        let child = root.new_child(
            MessageId(2),
            payload(EventA::new("E1")),
            MessageRole::Event,
            now(),
            origin(),
        );
        let grandchild = child.new_timeout(
            MessageId(3),
            payload(TimeoutA::new("T1")),
            now(),
            now() + chrono::Duration::hours(1),
            origin(),
        );

        assert_eq!(child.causation_id, MessageId(1));
        assert_eq!(child.correlation_id, MessageId(1));
        assert_eq!(grandchild.causation_id, MessageId(2));
        assert_eq!(grandchild.correlation_id, MessageId(1));
        assert_eq!(grandchild.role, MessageRole::Timeout);
        assert_eq!(
            grandchild.scheduled_for,
            Some(now() + chrono::Duration::hours(1))
        );
        assert!(!grandchild.is_root());
    }

    #[test]
    fn equality_compares_message_values() {
        let root = |value: &str| {
            let message = payload(CommandA::new(value));
            Envelope::new_root(MessageId(1), message, MessageRole::Command, now()).unwrap()
        };
        let (a, b, c) = (root("A1"), root("A1"), root("A2"));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
