//! Process controller and scope.
//!
//! A process instance starts when an event is first routed to it and lives
//! until the handler ends it. Timeouts it schedules are held here until
//! they become due.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{private, render_root, require_consumed, Controller, Site};
use crate::config::{HandlerConfig, RouteKind};
use crate::envelope::{Envelope, MessageIdGenerator, Origin};
use crate::fact::{Fact, Observer};
use crate::handler::{Context, ProcessMessageHandler, ProcessRoot};
use crate::message::{HandlerType, Message, MessageRole, Payload};

const INTERFACE: &str = "ProcessMessageHandler";

pub struct ProcessController<H: ProcessMessageHandler> {
    config: Arc<HandlerConfig>,
    handler: Arc<H>,
    message_ids: Arc<MessageIdGenerator>,
    instances: HashMap<String, H::Root>,
    timeouts: Vec<Envelope>,
}

impl<H: ProcessMessageHandler> ProcessController<H> {
    pub(crate) fn new(
        config: Arc<HandlerConfig>,
        handler: Arc<H>,
        message_ids: Arc<MessageIdGenerator>,
    ) -> Self {
        Self {
            config,
            handler,
            message_ids,
            instances: HashMap::new(),
            timeouts: Vec::new(),
        }
    }

    /// Timeouts waiting for a tick, in no particular order.
    pub fn pending_timeouts(&self) -> &[Envelope] {
        &self.timeouts
    }

    fn instance_of(timeout: &Envelope) -> Option<&str> {
        timeout.origin.as_ref()?.instance_id.as_deref()
    }
}

impl<H: ProcessMessageHandler> private::Sealed for ProcessController<H> {}

impl<H: ProcessMessageHandler> Controller for ProcessController<H> {
    fn config(&self) -> &Arc<HandlerConfig> {
        &self.config
    }

    fn tick(&mut self, _: &Context, _: &dyn Observer, now: DateTime<Utc>) -> Vec<Envelope> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .timeouts
            .drain(..)
            .partition(|t| t.scheduled_for.map_or(true, |at| at <= now));
        self.timeouts = pending;

        due.sort_by_key(|t| (t.scheduled_for, t.message_id));
        due
    }

    fn handle(
        &mut self,
        ctx: &Context,
        obs: &dyn Observer,
        now: DateTime<Utc>,
        env: &Envelope,
    ) -> anyhow::Result<Vec<Envelope>> {
        require_consumed(&self.config, env);

        let method = match env.role {
            MessageRole::Event => "handle_event",
            MessageRole::Timeout => "handle_timeout",
            MessageRole::Command => panic!(
                "the '{}' process message handler can not handle {} messages in the command role",
                self.config.name(),
                env.message_type(),
            ),
        };
        let site = Site {
            config: &self.config,
            interface: INTERFACE,
            method,
            message_type: env.message_type(),
        };

        let instance_id = if env.role == MessageRole::Timeout {
            let Some(id) = Self::instance_of(env) else {
                panic!(
                    "the '{}' process message handler received a {} timeout without an instance ID",
                    self.config.name(),
                    env.message_type(),
                );
            };

            if !self.instances.contains_key(id) {
                obs.notify(&Fact::TimeoutIgnored {
                    handler: self.config.clone(),
                    instance_id: id.to_string(),
                    envelope: env.clone(),
                });
                return Ok(Vec::new());
            }

            id.to_string()
        } else {
            let routing = Site {
                method: "route_event_to_instance",
                ..site
            };
            let routed = self
                .handler
                .route_event_to_instance(ctx, &*env.message)
                .map_err(|e| routing.check_error(e))?;

            match routed {
                None => {
                    obs.notify(&Fact::MessageIgnored {
                        handler: self.config.clone(),
                        envelope: env.clone(),
                    });
                    return Ok(Vec::new());
                }
                Some(id) if id.is_empty() => panic!(
                    "the '{}' process message handler attempted to route an event of type {} to an empty instance ID",
                    self.config.name(),
                    env.message_type(),
                ),
                Some(id) => id,
            }
        };

        let (root, existed) = match self.instances.remove(&instance_id) {
            Some(root) => {
                obs.notify(&Fact::InstanceLoaded {
                    handler: self.config.clone(),
                    instance_id: instance_id.clone(),
                    root: render_root(&root),
                    envelope: env.clone(),
                });
                (root, true)
            }
            None => {
                obs.notify(&Fact::InstanceNotFound {
                    handler: self.config.clone(),
                    instance_id: instance_id.clone(),
                    envelope: env.clone(),
                });
                let root = self.handler.new_root();
                obs.notify(&Fact::InstanceCreated {
                    handler: self.config.clone(),
                    instance_id: instance_id.clone(),
                    root: render_root(&root),
                    envelope: env.clone(),
                });
                (root, false)
            }
        };

        let mut scope = ProcessScope {
            site,
            config: &self.config,
            message_ids: &self.message_ids,
            observer: obs,
            cause: env,
            now,
            instance_id,
            root,
            ended: false,
            produced: Vec::new(),
        };

        let result = match env.role {
            MessageRole::Timeout => self.handler.handle_timeout(ctx, &mut scope, &*env.message),
            _ => self.handler.handle_event(ctx, &mut scope, &*env.message),
        };

        let ProcessScope {
            instance_id,
            root,
            ended,
            produced,
            ..
        } = scope;

        if let Err(e) = result {
            if existed {
                self.instances.insert(instance_id, root);
            }
            return Err(site.check_error(e));
        }

        if ended {
            self.timeouts
                .retain(|t| Self::instance_of(t) != Some(instance_id.as_str()));
            return Ok(produced);
        }

        self.instances.insert(instance_id, root);

        let (due, pending): (Vec<_>, Vec<_>) = produced
            .into_iter()
            .partition(|m| m.scheduled_for.map_or(true, |at| at <= now));
        self.timeouts.extend(pending);

        Ok(due)
    }

    fn reset(&mut self) {
        self.instances.clear();
        self.timeouts.clear();
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// What a process can do while handling one event or timeout.
pub struct ProcessScope<'a, R> {
    site: Site<'a>,
    config: &'a Arc<HandlerConfig>,
    message_ids: &'a MessageIdGenerator,
    observer: &'a dyn Observer,
    cause: &'a Envelope,
    now: DateTime<Utc>,
    instance_id: String,
    root: R,
    ended: bool,
    produced: Vec<Envelope>,
}

impl<R: ProcessRoot> ProcessScope<'_, R> {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn root(&self) -> &R {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut R {
        &mut self.root
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// End the instance. Its root and any pending timeouts are discarded.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        // Timeouts scheduled earlier in this invocation go with the instance.
        self.produced.retain(|m| m.role != MessageRole::Timeout);

        self.observer.notify(&Fact::InstanceDestroyed {
            handler: self.config.clone(),
            instance_id: self.instance_id.clone(),
            root: render_root(&self.root),
            envelope: self.cause.clone(),
        });
    }

    pub fn execute_command<C: Message>(&mut self, command: C) {
        self.execute_payload(Arc::new(command));
    }

    pub fn execute_payload(&mut self, command: Payload) {
        if self.ended {
            self.site.violation(format_args!(
                "executed a {} command after the instance ended",
                command.message_type()
            ));
        }
        self.site.check_produced(RouteKind::ExecutesCommand, &*command);

        let env = self.cause.new_child(
            self.message_ids.next(),
            command,
            MessageRole::Command,
            self.now,
            self.origin(),
        );

        self.observer.notify(&Fact::CommandExecuted {
            handler: self.config.clone(),
            instance_id: Some(self.instance_id.clone()),
            envelope: self.cause.clone(),
            command: env.clone(),
        });

        self.produced.push(env);
    }

    /// Schedule a timeout for `at`. It is delivered to this instance by the
    /// first tick at or after that time, unless the instance ends first.
    pub fn schedule_timeout<T: Message>(&mut self, timeout: T, at: DateTime<Utc>) {
        self.schedule_payload(Arc::new(timeout), at);
    }

    pub fn schedule_payload(&mut self, timeout: Payload, at: DateTime<Utc>) {
        if self.ended {
            self.site.violation(format_args!(
                "scheduled a {} timeout after the instance ended",
                timeout.message_type()
            ));
        }
        self.site.check_produced(RouteKind::SchedulesTimeout, &*timeout);

        let env = self.cause.new_timeout(
            self.message_ids.next(),
            timeout,
            self.now,
            at,
            self.origin(),
        );

        self.observer.notify(&Fact::TimeoutScheduled {
            handler: self.config.clone(),
            instance_id: self.instance_id.clone(),
            envelope: self.cause.clone(),
            timeout: env.clone(),
        });

        self.produced.push(env);
    }

    /// When the message being handled was created.
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.cause.created_at
    }

    /// When the timeout being handled was scheduled for. `None` for events.
    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.cause.scheduled_for
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.observer.notify(&Fact::MessageLogged {
            handler: self.config.clone(),
            instance_id: Some(self.instance_id.clone()),
            envelope: self.cause.clone(),
            message: message.to_string(),
        });
    }

    fn origin(&self) -> Origin {
        Origin {
            handler: self.config.identity().clone(),
            handler_type: HandlerType::Process,
            instance_id: Some(self.instance_id.clone()),
        }
    }
}
