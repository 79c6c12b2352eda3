//! The dispatch loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::Application;
use crate::controller::Controller;
use crate::envelope::{Envelope, MessageIdGenerator};
use crate::error::{DispatchError, DispatchResult, HandlerFailure};
use crate::fact::{Fact, Observer};
use crate::handler::Context;
use crate::message::{Message, MessageRole, MessageType, Payload};
use crate::options::OperationOptions;

/// In-memory engine for one application.
///
/// Dispatch → route to every consuming controller → enqueue what they
/// produce → repeat until the queue is empty. Messages are handled
/// breadth-first, so every consumer sees a message before any consumer
/// sees the messages it caused.
pub struct Engine {
    controllers: Vec<Box<dyn Controller>>,
    roles: HashMap<MessageType, MessageRole>,
    routes: HashMap<MessageType, Vec<usize>>,
    message_ids: Arc<MessageIdGenerator>,
}

impl Engine {
    pub fn new(app: &Application) -> Self {
        Self::with_message_ids(app, Arc::new(MessageIdGenerator::new()))
    }

    /// Build an engine that takes message IDs from `message_ids`.
    pub fn with_message_ids(app: &Application, message_ids: Arc<MessageIdGenerator>) -> Self {
        let mut controllers = Vec::new();
        let mut routes: HashMap<MessageType, Vec<usize>> = HashMap::new();

        for (i, registration) in app.registrations().iter().enumerate() {
            for (message_type, _) in registration.config.consumed() {
                routes.entry(message_type).or_default().push(i);
            }
            controllers.push(registration.controller(message_ids.clone()));
        }

        Self {
            controllers,
            roles: app.roles().clone(),
            routes,
            message_ids,
        }
    }

    /// The role `message_type` plays in the application, if it is routed.
    pub fn role_of(&self, message_type: MessageType) -> Option<MessageRole> {
        self.roles.get(&message_type).copied()
    }

    pub fn dispatch<M: Message>(
        &mut self,
        ctx: &Context,
        message: M,
        options: &OperationOptions,
    ) -> DispatchResult {
        self.dispatch_payload(ctx, Arc::new(message), options)
    }

    /// Dispatch a message from outside the application and handle
    /// everything it causes.
    pub fn dispatch_payload(
        &mut self,
        ctx: &Context,
        message: Payload,
        options: &OperationOptions,
    ) -> DispatchResult {
        let obs = options.observers();
        let message_type = message.message_type();

        let Some(role) = self.role_of(message_type) else {
            debug!(message_type = %message_type, "dispatched unroutable message");
            obs.notify(&Fact::UnroutableMessageDispatched {
                message,
                engine_time: options.now(),
                enabled: options.enabled().clone(),
            });
            return Ok(());
        };

        let env = Envelope::new_root(self.message_ids.next(), message, role, options.now())?;
        debug!(
            message_id = %env.message_id,
            message_type = %message_type,
            role = %role,
            "dispatching message"
        );

        obs.notify(&Fact::MessageDispatchBegun {
            envelope: env.clone(),
            engine_time: options.now(),
            enabled: options.enabled().clone(),
        });

        let result = self.run_cycle(ctx, options, vec![env.clone()]);

        if let Err(e) = &result {
            warn!(message_id = %env.message_id, error = %e, "dispatch failed");
        }

        obs.notify(&Fact::MessageDispatchCompleted {
            envelope: env,
            error: result.as_ref().err().map(ToString::to_string),
            enabled: options.enabled().clone(),
        });

        result
    }

    /// Deliver every timeout that is due as of the options' time.
    pub fn tick(&mut self, ctx: &Context, options: &OperationOptions) -> DispatchResult {
        let obs = options.observers();
        let now = options.now();
        debug!(%now, "tick");

        obs.notify(&Fact::TickCycleBegun {
            engine_time: now,
            enabled: options.enabled().clone(),
        });

        let mut due = Vec::new();
        for controller in &mut self.controllers {
            if options.enabled().is_enabled(controller.config()) {
                due.extend(controller.tick(ctx, obs, now));
            }
        }

        let result = if due.is_empty() {
            Ok(())
        } else {
            self.run_cycle(ctx, options, due)
        };

        if let Err(e) = &result {
            warn!(error = %e, "tick failed");
        }

        obs.notify(&Fact::TickCycleCompleted {
            engine_time: now,
            error: result.as_ref().err().map(ToString::to_string),
            enabled: options.enabled().clone(),
        });

        result
    }

    /// Discard all handler state and restart message IDs.
    pub fn reset(&mut self) {
        for controller in &mut self.controllers {
            controller.reset();
        }
        self.message_ids.reset();
    }

    /// Breadth-first causal expansion from `seeds`.
    fn run_cycle(
        &mut self,
        ctx: &Context,
        options: &OperationOptions,
        seeds: Vec<Envelope>,
    ) -> DispatchResult {
        let obs = options.observers();
        let now = options.now();

        obs.notify(&Fact::DispatchCycleBegun {
            envelopes: seeds.clone(),
            engine_time: now,
            enabled: options.enabled().clone(),
        });

        let mut queue: VecDeque<Envelope> = seeds.into();
        let mut failures = Vec::new();

        while let Some(env) = queue.pop_front() {
            let message_type = env.message_type();

            if let Some(declared) = self.roles.get(&message_type) {
                if *declared != env.role {
                    panic!(
                        "{message_type} is configured as a {declared} but was dispatched as a {}",
                        env.role
                    );
                }
            }

            let Some(indices) = self.routes.get(&message_type) else {
                continue;
            };

            for &i in indices {
                let controller = &mut self.controllers[i];
                let handler = controller.config().clone();

                if !options.enabled().is_enabled(&handler) {
                    obs.notify(&Fact::MessageHandlingSkipped {
                        handler,
                        envelope: env.clone(),
                    });
                    continue;
                }

                obs.notify(&Fact::MessageHandlingBegun {
                    handler: handler.clone(),
                    envelope: env.clone(),
                });

                debug!(
                    handler = handler.name(),
                    handler_type = %handler.handler_type(),
                    message_id = %env.message_id,
                    message_type = %message_type,
                    "handling message"
                );

                match controller.handle(ctx, obs, now, &env) {
                    Ok(produced) => {
                        obs.notify(&Fact::MessageHandlingCompleted {
                            handler,
                            envelope: env.clone(),
                            error: None,
                        });
                        queue.extend(produced);
                    }
                    Err(source) => {
                        obs.notify(&Fact::MessageHandlingCompleted {
                            handler: handler.clone(),
                            envelope: env.clone(),
                            error: Some(format!("{source:#}")),
                        });
                        failures.push(HandlerFailure {
                            handler: handler.identity().clone(),
                            handler_type: handler.handler_type(),
                            message_id: env.message_id,
                            message_type,
                            source,
                        });
                    }
                }
            }
        }

        DispatchError::from_failures(failures)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field(
                "handlers",
                &self
                    .controllers
                    .iter()
                    .map(|c| c.identity().name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
