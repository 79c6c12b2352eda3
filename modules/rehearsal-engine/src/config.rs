//! Static handler configuration.
//!
//! Each handler describes itself through a [`HandlerConfigurer`]: who it is
//! and which message types it consumes and produces. The result is an
//! immutable [`HandlerConfig`] that the engine routes by.

use std::fmt;

use crate::error::ConfigError;
use crate::message::{HandlerType, Message, MessageRole, MessageType};

/// The name and key of an application or handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub key: String,
}

impl Identity {
    /// Build a validated identity. The key must be a UUID.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let key = key.into();

        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidIdentityName { name });
        }

        let parsed = match uuid::Uuid::parse_str(&key) {
            Ok(parsed) => parsed,
            Err(source) => return Err(ConfigError::InvalidIdentityKey { name, key, source }),
        };

        Ok(Self {
            name,
            key: parsed.hyphenated().to_string(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// What a handler does with a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    HandlesCommand,
    HandlesEvent,
    RecordsEvent,
    ExecutesCommand,
    SchedulesTimeout,
}

impl RouteKind {
    pub fn role(&self) -> MessageRole {
        match self {
            RouteKind::HandlesCommand | RouteKind::ExecutesCommand => MessageRole::Command,
            RouteKind::HandlesEvent | RouteKind::RecordsEvent => MessageRole::Event,
            RouteKind::SchedulesTimeout => MessageRole::Timeout,
        }
    }

    /// Timeouts are both produced and consumed by the scheduling process.
    pub fn is_consumed(&self) -> bool {
        matches!(
            self,
            RouteKind::HandlesCommand | RouteKind::HandlesEvent | RouteKind::SchedulesTimeout
        )
    }

    pub fn is_produced(&self) -> bool {
        matches!(
            self,
            RouteKind::RecordsEvent | RouteKind::ExecutesCommand | RouteKind::SchedulesTimeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::HandlesCommand => "handle commands",
            RouteKind::HandlesEvent => "handle events",
            RouteKind::RecordsEvent => "record events",
            RouteKind::ExecutesCommand => "execute commands",
            RouteKind::SchedulesTimeout => "schedule timeouts",
        }
    }

    fn allowed(handler_type: HandlerType) -> &'static [RouteKind] {
        match handler_type {
            HandlerType::Aggregate => &[RouteKind::HandlesCommand, RouteKind::RecordsEvent],
            HandlerType::Process => &[
                RouteKind::HandlesEvent,
                RouteKind::ExecutesCommand,
                RouteKind::SchedulesTimeout,
            ],
            HandlerType::Integration => &[RouteKind::HandlesCommand, RouteKind::RecordsEvent],
            HandlerType::Projection => &[RouteKind::HandlesEvent],
        }
    }

    fn required(handler_type: HandlerType) -> &'static [RouteKind] {
        match handler_type {
            HandlerType::Aggregate => &[RouteKind::HandlesCommand, RouteKind::RecordsEvent],
            HandlerType::Process => &[RouteKind::HandlesEvent, RouteKind::ExecutesCommand],
            HandlerType::Integration => &[RouteKind::HandlesCommand],
            HandlerType::Projection => &[RouteKind::HandlesEvent],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub kind: RouteKind,
    pub message_type: MessageType,
}

// ---------------------------------------------------------------------------
// HandlerConfigurer
// ---------------------------------------------------------------------------

/// Passed to a handler's `configure()` method.
pub struct HandlerConfigurer {
    handler_type: HandlerType,
    identity: Option<(String, String)>,
    routes: Vec<Route>,
}

impl HandlerConfigurer {
    pub(crate) fn new(handler_type: HandlerType) -> Self {
        Self {
            handler_type,
            identity: None,
            routes: Vec::new(),
        }
    }

    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    pub fn identity(&mut self, name: impl Into<String>, key: impl Into<String>) -> &mut Self {
        self.identity = Some((name.into(), key.into()));
        self
    }

    pub fn handles_command<M: Message>(&mut self) -> &mut Self {
        self.route(RouteKind::HandlesCommand, MessageType::of::<M>())
    }

    pub fn handles_event<M: Message>(&mut self) -> &mut Self {
        self.route(RouteKind::HandlesEvent, MessageType::of::<M>())
    }

    pub fn records_event<M: Message>(&mut self) -> &mut Self {
        self.route(RouteKind::RecordsEvent, MessageType::of::<M>())
    }

    pub fn executes_command<M: Message>(&mut self) -> &mut Self {
        self.route(RouteKind::ExecutesCommand, MessageType::of::<M>())
    }

    pub fn schedules_timeout<M: Message>(&mut self) -> &mut Self {
        self.route(RouteKind::SchedulesTimeout, MessageType::of::<M>())
    }

    pub fn route(&mut self, kind: RouteKind, message_type: MessageType) -> &mut Self {
        self.routes.push(Route { kind, message_type });
        self
    }

    /// Validate what was declared and freeze it.
    pub(crate) fn finish(self) -> Result<HandlerConfig, ConfigError> {
        let handler_type = self.handler_type;

        let (name, key) = self
            .identity
            .ok_or(ConfigError::MissingIdentity { handler_type })?;
        let identity = Identity::new(name, key)?;

        let allowed = RouteKind::allowed(handler_type);
        for (i, route) in self.routes.iter().enumerate() {
            if !allowed.contains(&route.kind) {
                return Err(ConfigError::IllegalRoute {
                    handler: identity.name.clone(),
                    handler_type,
                    route: route.kind.as_str(),
                    message_type: route.message_type,
                });
            }

            if self.routes[..i]
                .iter()
                .any(|r| r.message_type == route.message_type)
            {
                return Err(ConfigError::DuplicateRoute {
                    handler: identity.name.clone(),
                    message_type: route.message_type,
                });
            }
        }

        for required in RouteKind::required(handler_type) {
            if !self.routes.iter().any(|r| r.kind == *required) {
                return Err(ConfigError::MissingRoute {
                    handler: identity.name.clone(),
                    handler_type,
                    route: required.as_str(),
                });
            }
        }

        Ok(HandlerConfig {
            identity,
            handler_type,
            routes: self.routes,
        })
    }
}

// ---------------------------------------------------------------------------
// HandlerConfig
// ---------------------------------------------------------------------------

/// The validated, immutable configuration of one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    identity: Identity,
    handler_type: HandlerType,
    routes: Vec<Route>,
}

impl HandlerConfig {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    /// Routes in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn consumes(&self, message_type: MessageType) -> bool {
        self.routes
            .iter()
            .any(|r| r.message_type == message_type && r.kind.is_consumed())
    }

    pub fn has_route(&self, kind: RouteKind, message_type: MessageType) -> bool {
        self.routes
            .iter()
            .any(|r| r.message_type == message_type && r.kind == kind)
    }

    pub fn produces(&self, message_type: MessageType) -> bool {
        self.routes
            .iter()
            .any(|r| r.message_type == message_type && r.kind.is_produced())
    }

    /// Consumed message types with their roles, in declaration order.
    pub fn consumed(&self) -> impl Iterator<Item = (MessageType, MessageRole)> + '_ {
        self.routes
            .iter()
            .filter(|r| r.kind.is_consumed())
            .map(|r| (r.message_type, r.kind.role()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CommandA, EventA, TimeoutA};

    const KEY: &str = "6a1e7b45-ac65-4c0b-ae73-38be7b6c1fa7";

    #[test]
    fn identity_rejects_whitespace_names() {
        assert!(matches!(
            Identity::new("bad name", KEY),
            Err(ConfigError::InvalidIdentityName { .. })
        ));
        assert!(matches!(
            Identity::new("", KEY),
            Err(ConfigError::InvalidIdentityName { .. })
        ));
    }

    #[test]
    fn identity_requires_uuid_key() {
        assert!(matches!(
            Identity::new("handler", "<key>"),
            Err(ConfigError::InvalidIdentityKey { .. })
        ));
    }

    #[test]
    fn identity_key_is_normalized() {
        let identity = Identity::new("handler", KEY.to_uppercase()).unwrap();
        assert_eq!(identity.key, KEY);
    }

    #[test]
    fn aggregate_can_not_execute_commands() {
        let mut c = HandlerConfigurer::new(HandlerType::Aggregate);
        c.identity("agg", KEY)
            .handles_command::<CommandA>()
            .records_event::<EventA>()
            .route(RouteKind::ExecutesCommand, MessageType::of::<CommandA>());

        assert!(matches!(c.finish(), Err(ConfigError::IllegalRoute { .. })));
    }

    #[test]
    fn process_must_execute_commands() {
        let mut c = HandlerConfigurer::new(HandlerType::Process);
        c.identity("proc", KEY).handles_event::<EventA>();

        let err = c.finish().unwrap_err();
        assert_eq!(
            err.to_string(),
            "the 'proc' process handler must execute commands at least one message type"
        );
    }

    #[test]
    fn missing_identity_is_reported() {
        let mut c = HandlerConfigurer::new(HandlerType::Projection);
        c.handles_event::<EventA>();

        assert!(matches!(
            c.finish(),
            Err(ConfigError::MissingIdentity {
                handler_type: HandlerType::Projection,
            })
        ));
    }

    #[test]
    fn timeouts_are_consumed_and_produced() {
        let mut c = HandlerConfigurer::new(HandlerType::Process);
        c.identity("proc", KEY)
            .handles_event::<EventA>()
            .executes_command::<CommandA>()
            .schedules_timeout::<TimeoutA>();
        let config = c.finish().unwrap();

        let timeout = MessageType::of::<TimeoutA>();
        assert!(config.consumes(timeout));
        assert!(config.produces(timeout));
        assert!(!config.consumes(MessageType::of::<CommandA>()));
        assert_eq!(
            config.consumed().collect::<Vec<_>>(),
            vec![
                (MessageType::of::<EventA>(), MessageRole::Event),
                (timeout, MessageRole::Timeout)
            ]
        );
    }
}
