//! Projection controller and event scope. Projections produce nothing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{private, require_consumed, Controller, Site};
use crate::config::HandlerConfig;
use crate::envelope::Envelope;
use crate::fact::{Fact, Observer};
use crate::handler::{Context, ProjectionMessageHandler};

pub struct ProjectionController<H> {
    config: Arc<HandlerConfig>,
    handler: Arc<H>,
}

impl<H: ProjectionMessageHandler> ProjectionController<H> {
    pub(crate) fn new(config: Arc<HandlerConfig>, handler: Arc<H>) -> Self {
        Self { config, handler }
    }
}

impl<H> private::Sealed for ProjectionController<H> {}

impl<H: ProjectionMessageHandler> Controller for ProjectionController<H> {
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

        let mut scope = ProjectionEventScope {
            config: &self.config,
            observer: obs,
            event: env,
            now,
        };

        self.handler
            .handle_event(ctx, &mut scope, &*env.message)
            .map_err(|e| {
                Site {
                    config: &self.config,
                    interface: "ProjectionMessageHandler",
                    method: "handle_event",
                    message_type: env.message_type(),
                }
                .check_error(e)
            })?;

        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

/// What a projection can do while handling one event.
pub struct ProjectionEventScope<'a> {
    config: &'a Arc<HandlerConfig>,
    observer: &'a dyn Observer,
    event: &'a Envelope,
    now: DateTime<Utc>,
}

impl ProjectionEventScope<'_> {
    /// When the event being handled was recorded.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.event.created_at
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.observer.notify(&Fact::MessageLogged {
            handler: self.config.clone(),
            instance_id: None,
            envelope: self.event.clone(),
            message: message.to_string(),
        });
    }
}
