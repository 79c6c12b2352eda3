//! Integration controller and command scope. Integrations are stateless.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{private, require_consumed, Controller, Site};
use crate::config::{HandlerConfig, RouteKind};
use crate::envelope::{Envelope, MessageIdGenerator, Origin};
use crate::fact::{Fact, Observer};
use crate::handler::{Context, IntegrationMessageHandler};
use crate::message::{HandlerType, Message, MessageRole, Payload};

pub struct IntegrationController<H> {
    config: Arc<HandlerConfig>,
    handler: Arc<H>,
    message_ids: Arc<MessageIdGenerator>,
}

impl<H: IntegrationMessageHandler> IntegrationController<H> {
    pub(crate) fn new(
        config: Arc<HandlerConfig>,
        handler: Arc<H>,
        message_ids: Arc<MessageIdGenerator>,
    ) -> Self {
        Self {
            config,
            handler,
            message_ids,
        }
    }
}

impl<H> private::Sealed for IntegrationController<H> {}

impl<H: IntegrationMessageHandler> Controller for IntegrationController<H> {
    fn config(&self) -> &Arc<HandlerConfig> {
        &self.config
    }

    fn tick(&mut self, _: &Context, _: &dyn Observer, _: DateTime<Utc>) -> Vec<Envelope> {
        Vec::new()
    }

    fn handle(
        &mut self,
        ctx: &Context,
        obs: &dyn Observer,
        now: DateTime<Utc>,
        env: &Envelope,
    ) -> anyhow::Result<Vec<Envelope>> {
        require_consumed(&self.config, env);

        let site = Site {
            config: &self.config,
            interface: "IntegrationMessageHandler",
            method: "handle_command",
            message_type: env.message_type(),
        };

        let mut scope = IntegrationCommandScope {
            site,
            config: &self.config,
            message_ids: &self.message_ids,
            observer: obs,
            command: env,
            now,
            events: Vec::new(),
        };

        match self.handler.handle_command(ctx, &mut scope, &*env.message) {
            Ok(()) => Ok(scope.events),
            Err(e) => Err(site.check_error(e)),
        }
    }

    fn reset(&mut self) {}
}

/// What an integration can do while handling one command.
pub struct IntegrationCommandScope<'a> {
    site: Site<'a>,
    config: &'a Arc<HandlerConfig>,
    message_ids: &'a MessageIdGenerator,
    observer: &'a dyn Observer,
    command: &'a Envelope,
    now: DateTime<Utc>,
    events: Vec<Envelope>,
}

impl IntegrationCommandScope<'_> {
    pub fn record_event<E: Message>(&mut self, event: E) {
        self.record_payload(Arc::new(event));
    }

    pub fn record_payload(&mut self, event: Payload) {
        self.site.check_produced(RouteKind::RecordsEvent, &*event);

        let env = self.command.new_child(
            self.message_ids.next(),
            event,
            MessageRole::Event,
            self.now,
            Origin {
                handler: self.config.identity().clone(),
                handler_type: HandlerType::Integration,
                instance_id: None,
            },
        );

        self.observer.notify(&Fact::EventRecorded {
            handler: self.config.clone(),
            instance_id: None,
            envelope: self.command.clone(),
            event: env.clone(),
        });

        self.events.push(env);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.observer.notify(&Fact::MessageLogged {
            handler: self.config.clone(),
            instance_id: None,
            envelope: self.command.clone(),
            message: message.to_string(),
        });
    }
}
