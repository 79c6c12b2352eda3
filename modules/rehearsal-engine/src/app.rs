//! The application under test: an identity plus its registered handlers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::{HandlerConfig, HandlerConfigurer, Identity, RouteKind};
use crate::controller::{
    AggregateController, Controller, IntegrationController, ProcessController, ProjectionController,
};
use crate::envelope::MessageIdGenerator;
use crate::error::ConfigError;
use crate::handler::{
    AggregateMessageHandler, IntegrationMessageHandler, ProcessMessageHandler,
    ProjectionMessageHandler,
};
use crate::message::{HandlerType, MessageRole, MessageType};

type ControllerFactory =
    Arc<dyn Fn(Arc<HandlerConfig>, Arc<MessageIdGenerator>) -> Box<dyn Controller> + Send + Sync>;

/// A handler's configuration and a way to build a controller for it.
#[derive(Clone)]
pub(crate) struct HandlerRegistration {
    pub config: Arc<HandlerConfig>,
    factory: ControllerFactory,
}

impl HandlerRegistration {
    pub fn controller(&self, message_ids: Arc<MessageIdGenerator>) -> Box<dyn Controller> {
        (self.factory)(self.config.clone(), message_ids)
    }
}

/// A validated application. Immutable once built; any number of engines
/// may be built from it.
#[derive(Clone)]
pub struct Application {
    identity: Identity,
    handlers: Vec<HandlerRegistration>,
    roles: HashMap<MessageType, MessageRole>,
}

impl Application {
    pub fn builder(name: impl Into<String>, key: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            name: name.into(),
            key: key.into(),
            handlers: Vec::new(),
            error: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handler configurations in registration order.
    pub fn handlers(&self) -> impl Iterator<Item = &Arc<HandlerConfig>> + '_ {
        self.handlers.iter().map(|h| &h.config)
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<HandlerConfig>> {
        self.handlers().find(|h| h.name() == name)
    }

    /// The role of every message type the application mentions.
    pub fn roles(&self) -> &HashMap<MessageType, MessageRole> {
        &self.roles
    }

    pub fn role_of(&self, message_type: MessageType) -> Option<MessageRole> {
        self.roles.get(&message_type).copied()
    }

    pub(crate) fn registrations(&self) -> &[HandlerRegistration] {
        &self.handlers
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("identity", &self.identity)
            .field(
                "handlers",
                &self.handlers().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Collects handlers. Configuration errors surface from [`build`](Self::build).
pub struct ApplicationBuilder {
    name: String,
    key: String,
    handlers: Vec<HandlerRegistration>,
    error: Option<ConfigError>,
}

impl ApplicationBuilder {
    pub fn aggregate<H: AggregateMessageHandler>(self, handler: H) -> Self {
        let handler = Arc::new(handler);
        let config = configure(HandlerType::Aggregate, |c| handler.configure(c));
        self.register(config, move |config, ids| {
            Box::new(AggregateController::new(config, handler.clone(), ids))
        })
    }

    pub fn process<H: ProcessMessageHandler>(self, handler: H) -> Self {
        let handler = Arc::new(handler);
        let config = configure(HandlerType::Process, |c| handler.configure(c));
        self.register(config, move |config, ids| {
            Box::new(ProcessController::new(config, handler.clone(), ids))
        })
    }

    pub fn integration<H: IntegrationMessageHandler>(self, handler: H) -> Self {
        let handler = Arc::new(handler);
        let config = configure(HandlerType::Integration, |c| handler.configure(c));
        self.register(config, move |config, ids| {
            Box::new(IntegrationController::new(config, handler.clone(), ids))
        })
    }

    pub fn projection<H: ProjectionMessageHandler>(self, handler: H) -> Self {
        let handler = Arc::new(handler);
        let config = configure(HandlerType::Projection, |c| handler.configure(c));
        self.register(config, move |config, _| {
            Box::new(ProjectionController::new(config, handler.clone()))
        })
    }

    fn register<F>(mut self, config: Result<HandlerConfig, ConfigError>, factory: F) -> Self
    where
        F: Fn(Arc<HandlerConfig>, Arc<MessageIdGenerator>) -> Box<dyn Controller>
            + Send
            + Sync
            + 'static,
    {
        match config {
            Ok(config) => self.handlers.push(HandlerRegistration {
                config: Arc::new(config),
                factory: Arc::new(factory),
            }),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Validate the application as a whole.
    pub fn build(self) -> Result<Application, ConfigError> {
        let identity = Identity::new(self.name, self.key)?;
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut names = HashSet::from([identity.name.clone()]);
        let mut keys = HashSet::from([identity.key.clone()]);
        for h in &self.handlers {
            let id = h.config.identity();
            if !names.insert(id.name.clone()) {
                return Err(ConfigError::DuplicateIdentityName {
                    name: id.name.clone(),
                });
            }
            if !keys.insert(id.key.clone()) {
                return Err(ConfigError::DuplicateIdentityKey {
                    key: id.key.clone(),
                });
            }
        }

        let mut roles = HashMap::new();
        let mut consumers = HashMap::new();
        let mut producers = HashMap::new();
        let mut schedulers = HashMap::new();

        for h in &self.handlers {
            let name = h.config.name();

            for route in h.config.routes() {
                let role = route.kind.role();
                match roles.entry(route.message_type) {
                    Entry::Vacant(e) => {
                        e.insert(role);
                    }
                    Entry::Occupied(e) if *e.get() != role => {
                        return Err(ConfigError::ConflictingRole {
                            message_type: route.message_type,
                            first: *e.get(),
                            second: role,
                        });
                    }
                    Entry::Occupied(_) => {}
                }

                let (owners, relation) = match route.kind {
                    RouteKind::HandlesCommand => (&mut consumers, "handled"),
                    RouteKind::RecordsEvent => (&mut producers, "recorded"),
                    RouteKind::SchedulesTimeout => (&mut schedulers, "scheduled"),
                    _ => continue,
                };
                exclusive(owners, route.message_type, relation, name)?;
            }
        }

        Ok(Application {
            identity,
            handlers: self.handlers,
            roles,
        })
    }
}

fn configure(
    handler_type: HandlerType,
    f: impl FnOnce(&mut HandlerConfigurer),
) -> Result<HandlerConfig, ConfigError> {
    let mut c = HandlerConfigurer::new(handler_type);
    f(&mut c);
    c.finish()
}

fn exclusive(
    owners: &mut HashMap<MessageType, String>,
    message_type: MessageType,
    relation: &'static str,
    name: &str,
) -> Result<(), ConfigError> {
    match owners.entry(message_type) {
        Entry::Occupied(e) => Err(ConfigError::SharedMessageType {
            message_type,
            relation,
            first: e.get().clone(),
            second: name.to_string(),
        }),
        Entry::Vacant(e) => {
            e.insert(name.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    const APP_KEY: &str = "0f0e1d3c-4c47-4b67-9e1c-3f0c8f8e2a10";

    fn aggregate(name: &str, key: &str) -> AggregateHandlerStub {
        let (name, key) = (name.to_string(), key.to_string());
        AggregateHandlerStub::new(move |c| {
            c.identity(name.clone(), key.clone())
                .handles_command::<CommandA>()
                .records_event::<EventA>();
        })
    }

    #[test]
    fn roles_cover_consumed_and_produced_types() {
        let app = Application::builder("<app>", APP_KEY)
            .aggregate(aggregate("<aggregate>", KEY_AGGREGATE))
            .build()
            .unwrap();

        assert_eq!(
            app.role_of(MessageType::of::<CommandA>()),
            Some(MessageRole::Command)
        );
        assert_eq!(
            app.role_of(MessageType::of::<EventA>()),
            Some(MessageRole::Event)
        );
        assert_eq!(app.role_of(MessageType::of::<CommandB>()), None);
        assert!(app.handler("<aggregate>").is_some());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Application::builder("<app>", APP_KEY)
            .aggregate(aggregate("<aggregate>", KEY_AGGREGATE))
            .integration(IntegrationHandlerStub::new(|c| {
                c.identity("<aggregate>", KEY_INTEGRATION)
                    .handles_command::<CommandB>();
            }))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateIdentityName { .. }));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = Application::builder("<app>", KEY_AGGREGATE)
            .aggregate(aggregate("<aggregate>", KEY_AGGREGATE))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateIdentityKey { .. }));
    }

    #[test]
    fn command_has_one_consumer() {
        let err = Application::builder("<app>", APP_KEY)
            .aggregate(aggregate("<aggregate>", KEY_AGGREGATE))
            .integration(IntegrationHandlerStub::new(|c| {
                c.identity("<integration>", KEY_INTEGRATION)
                    .handles_command::<CommandA>();
            }))
            .build()
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "CommandA is handled by both '<aggregate>' and '<integration>'"
        );
    }

    #[test]
    fn message_type_has_one_role() {
        let err = Application::builder("<app>", APP_KEY)
            .aggregate(aggregate("<aggregate>", KEY_AGGREGATE))
            .projection(ProjectionHandlerStub::new(|c| {
                c.identity("<projection>", KEY_PROJECTION)
                    .handles_event::<CommandA>();
            }))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::ConflictingRole {
                first: MessageRole::Command,
                second: MessageRole::Event,
                ..
            }
        ));
    }

    #[test]
    fn handler_config_errors_surface_from_build() {
        let err = Application::builder("<app>", APP_KEY)
            .projection(ProjectionHandlerStub::new(|c| {
                c.identity("<projection>", "<not a uuid>")
                    .handles_event::<EventA>();
            }))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidIdentityKey { .. }));
    }
}
