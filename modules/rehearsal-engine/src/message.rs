//! Application message model.
//!
//! Messages are opaque to the engine. It only needs to know a message's
//! type, its structural form (for comparison and rendering) and whether the
//! application considers it valid.

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

/// A message defined by the application under test.
///
/// The serde form is treated as the message's structure: two messages of
/// the same type with equal serialized values are structurally equal.
pub trait Message: Serialize + fmt::Debug + Send + Sync + 'static {
    /// Top-level fields that are generated bookkeeping rather than content.
    /// The default comparator ignores them.
    const BOOKKEEPING_FIELDS: &'static [&'static str] = &[];

    /// Application-defined validation. Recording or executing an invalid
    /// message is a contract violation.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Object-safe view of a [`Message`]. Implemented for every message type.
pub trait AnyMessage: fmt::Debug + Send + Sync + 'static {
    fn message_type(&self) -> MessageType;

    /// The structural form of the message.
    fn to_value(&self) -> serde_json::Value;

    fn validate(&self) -> Result<(), String>;

    fn bookkeeping_fields(&self) -> &'static [&'static str];

    fn as_any(&self) -> &dyn Any;
}

impl<M: Message> AnyMessage for M {
    fn message_type(&self) -> MessageType {
        MessageType::of::<M>()
    }

    fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .unwrap_or_else(|e| serde_json::Value::String(format!("<unserializable: {e}>")))
    }

    fn validate(&self) -> Result<(), String> {
        Message::validate(self)
    }

    fn bookkeeping_fields(&self) -> &'static [&'static str] {
        M::BOOKKEEPING_FIELDS
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyMessage {
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

/// A shared, immutable message value.
pub type Payload = Arc<dyn AnyMessage>;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The concrete Rust type of a message.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// Fully-qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module paths, including inside generic arguments.
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut segment = String::new();

        for c in self.name.chars() {
            match c {
                '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                    out.push_str(strip_path(&segment));
                    segment.clear();
                    out.push(c);
                }
                _ => segment.push(c),
            }
        }
        out.push_str(strip_path(&segment));
        out
    }
}

fn strip_path(segment: &str) -> &str {
    segment.rsplit("::").next().unwrap_or(segment)
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for MessageType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The role a message type plays within an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Command,
    Event,
    Timeout,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Command => "command",
            MessageRole::Event => "event",
            MessageRole::Timeout => "timeout",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The behavioral role of a message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    Aggregate,
    Process,
    Integration,
    Projection,
}

impl HandlerType {
    pub const ALL: [HandlerType; 4] = [
        HandlerType::Aggregate,
        HandlerType::Process,
        HandlerType::Integration,
        HandlerType::Projection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::Aggregate => "aggregate",
            HandlerType::Process => "process",
            HandlerType::Integration => "integration",
            HandlerType::Projection => "projection",
        }
    }

    /// Stateful handlers own addressable instances.
    pub fn is_stateful(&self) -> bool {
        matches!(self, HandlerType::Aggregate | HandlerType::Process)
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CommandA, EventA};

    #[test]
    fn message_type_identity_follows_rust_type() {
        assert_eq!(MessageType::of::<CommandA>(), MessageType::of::<CommandA>());
        assert_ne!(MessageType::of::<CommandA>(), MessageType::of::<EventA>());
    }

    #[test]
    fn display_uses_short_name() {
        assert_eq!(MessageType::of::<CommandA>().to_string(), "CommandA");
        assert!(MessageType::of::<CommandA>().name().contains("::"));
    }

    #[test]
    fn short_name_strips_paths_inside_generics() {
        #[derive(Debug, Serialize)]
        struct Wrapper<T>(T);
        impl<T: Serialize + fmt::Debug + Send + Sync + 'static> Message for Wrapper<T> {}

        assert_eq!(
            MessageType::of::<Wrapper<CommandA>>().to_string(),
            "Wrapper<CommandA>"
        );
    }

    #[test]
    fn any_message_downcasts_to_concrete_type() {
        let payload: Payload = Arc::new(CommandA::new("A1"));
        assert!(payload.is::<CommandA>());
        assert_eq!(payload.downcast_ref::<CommandA>().unwrap().value, "A1");
        assert!(payload.downcast_ref::<EventA>().is_none());
    }

    #[test]
    fn invalid_message_reports_reason() {
        let m = EventA::invalid("<reason>");
        assert_eq!(AnyMessage::validate(&m), Err("<reason>".to_string()));
    }
}
