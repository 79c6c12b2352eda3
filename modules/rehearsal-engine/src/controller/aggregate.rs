//! Aggregate controller and command scope.
//!
//! An aggregate instance exists while it has an event history. Loading an
//! instance replays that history onto a fresh root.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{private, render_root, Controller, Site};
use crate::config::{HandlerConfig, RouteKind};
use crate::envelope::{Envelope, MessageIdGenerator, Origin};
use crate::fact::{Fact, Observer};
use crate::handler::{AggregateMessageHandler, AggregateRoot, Context};
use crate::message::{AnyMessage, HandlerType, Message, MessageRole, Payload};

const INTERFACE: &str = "AggregateMessageHandler";

pub struct AggregateController<H: AggregateMessageHandler> {
    config: Arc<HandlerConfig>,
    handler: Arc<H>,
    message_ids: Arc<MessageIdGenerator>,
    history: HashMap<String, Vec<Envelope>>,
}

impl<H: AggregateMessageHandler> AggregateController<H> {
    pub(crate) fn new(
        config: Arc<HandlerConfig>,
        handler: Arc<H>,
        message_ids: Arc<MessageIdGenerator>,
    ) -> Self {
        Self {
            config,
            handler,
            message_ids,
            history: HashMap::new(),
        }
    }

    /// Rebuild a root from its history.
    fn load(&self, history: &[Envelope]) -> H::Root {
        let mut root = self.handler.new_root();
        for event in history {
            apply(&self.config, &mut root, &*event.message);
        }
        root
    }
}

fn apply<R: AggregateRoot>(config: &HandlerConfig, root: &mut R, event: &dyn AnyMessage) {
    if root.apply_event(event).is_err() {
        Site {
            config,
            interface: "AggregateRoot",
            method: "apply_event",
            message_type: event.message_type(),
        }
        .unexpected();
    }
}

impl<H: AggregateMessageHandler> private::Sealed for AggregateController<H> {}

impl<H: AggregateMessageHandler> Controller for AggregateController<H> {
    fn config(&self) -> &Arc<HandlerConfig> {
        &self.config
    }

    fn tick(&mut self, _: &Context, _: &dyn Observer, _: DateTime<Utc>) -> Vec<Envelope> {
        Vec::new()
    }

    fn handle(
        &mut self,
        _ctx: &Context,
        obs: &dyn Observer,
        now: DateTime<Utc>,
        env: &Envelope,
    ) -> anyhow::Result<Vec<Envelope>> {
        if env.role != MessageRole::Command {
            panic!(
                "the '{}' aggregate message handler can not handle {} messages in the {} role",
                self.config.name(),
                env.message_type(),
                env.role,
            );
        }

        let command = &*env.message;
        let site = |method| Site {
            config: &self.config,
            interface: INTERFACE,
            method,
            message_type: env.message_type(),
        };

        let instance_id = self
            .handler
            .route_command_to_instance(command)
            .unwrap_or_else(|_| site("route_command_to_instance").unexpected());

        if instance_id.is_empty() {
            panic!(
                "the '{}' aggregate message handler attempted to route a {} command to an empty instance ID",
                self.config.name(),
                env.message_type(),
            );
        }

        let (root, exists) = match self.history.get(&instance_id) {
            Some(history) => {
                let root = self.load(history);
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
                (self.handler.new_root(), false)
            }
        };

        let mut scope = AggregateCommandScope {
            config: &self.config,
            message_ids: &self.message_ids,
            observer: obs,
            command: env,
            now,
            instance_id,
            root,
            exists,
            destroyed: false,
            events: Vec::new(),
        };

        if self.handler.handle_command(&mut scope, command).is_err() {
            site("handle_command").unexpected();
        }

        let AggregateCommandScope {
            instance_id,
            exists,
            destroyed,
            events,
            ..
        } = scope;

        if events.is_empty() && destroyed {
            panic!(
                "the '{}' aggregate message handler destroyed the '{}' instance without recording an event while handling a {} command",
                self.config.name(),
                instance_id,
                env.message_type(),
            );
        }

        if exists {
            self.history
                .entry(instance_id)
                .or_default()
                .extend(events.iter().cloned());
        } else {
            self.history.remove(&instance_id);
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// What an aggregate can do while handling one command.
pub struct AggregateCommandScope<'a, R> {
    config: &'a Arc<HandlerConfig>,
    message_ids: &'a MessageIdGenerator,
    observer: &'a dyn Observer,
    command: &'a Envelope,
    now: DateTime<Utc>,
    instance_id: String,
    root: R,
    exists: bool,
    destroyed: bool,
    events: Vec<Envelope>,
}

impl<R: AggregateRoot> AggregateCommandScope<'_, R> {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The root, with every event recorded so far already applied.
    pub fn root(&self) -> &R {
        &self.root
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Record an event and apply it to the root.
    ///
    /// Recording an event against an instance that does not exist creates
    /// it, or reverts its destruction if `destroy()` was called earlier in
    /// this invocation.
    pub fn record_event<E: Message>(&mut self, event: E) {
        self.record_payload(Arc::new(event));
    }

    pub fn record_payload(&mut self, event: Payload) {
        Site {
            config: self.config,
            interface: INTERFACE,
            method: "handle_command",
            message_type: self.command.message_type(),
        }
        .check_produced(RouteKind::RecordsEvent, &*event);

        apply(self.config, &mut self.root, &*event);

        if !self.exists {
            self.exists = true;

            let fact = if self.destroyed {
                self.destroyed = false;
                Fact::InstanceDestructionReverted {
                    handler: self.config.clone(),
                    instance_id: self.instance_id.clone(),
                    root: render_root(&self.root),
                    envelope: self.command.clone(),
                }
            } else {
                Fact::InstanceCreated {
                    handler: self.config.clone(),
                    instance_id: self.instance_id.clone(),
                    root: render_root(&self.root),
                    envelope: self.command.clone(),
                }
            };
            self.observer.notify(&fact);
        }

        let env = self.command.new_child(
            self.message_ids.next(),
            event,
            MessageRole::Event,
            self.now,
            Origin {
                handler: self.config.identity().clone(),
                handler_type: HandlerType::Aggregate,
                instance_id: Some(self.instance_id.clone()),
            },
        );

        self.observer.notify(&Fact::EventRecorded {
            handler: self.config.clone(),
            instance_id: Some(self.instance_id.clone()),
            envelope: self.command.clone(),
            event: env.clone(),
        });

        self.events.push(env);
    }

    /// Destroy the instance. Has no effect if it does not exist.
    ///
    /// At least one event must be recorded in the same invocation.
    pub fn destroy(&mut self) {
        if !self.exists {
            return;
        }

        self.exists = false;
        self.destroyed = true;

        self.observer.notify(&Fact::InstanceDestroyed {
            handler: self.config.clone(),
            instance_id: self.instance_id.clone(),
            root: render_root(&self.root),
            envelope: self.command.clone(),
        });
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.observer.notify(&Fact::MessageLogged {
            handler: self.config.clone(),
            instance_id: Some(self.instance_id.clone()),
            envelope: self.command.clone(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{payload, MessageId};
    use crate::fact::FactBuffer;
    use crate::handler::UnexpectedMessage;
    use crate::testing::{AggregateHandlerStub, CommandA, EventA, EventB, KEY_AGGREGATE};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    type Ctrl = AggregateController<AggregateHandlerStub>;

    fn controller(stub: AggregateHandlerStub) -> Ctrl {
        let mut c = crate::config::HandlerConfigurer::new(HandlerType::Aggregate);
        stub.configure(&mut c);
        AggregateController::new(
            Arc::new(c.finish().unwrap()),
            Arc::new(stub),
            Arc::new(MessageIdGenerator::new()),
        )
    }

    fn command(value: &str) -> Envelope {
        Envelope::new_root(
            MessageId(100),
            payload(CommandA::new(value)),
            MessageRole::Command,
            now(),
        )
        .unwrap()
    }

    /// Handle a command for `<id>`, discarding the facts.
    fn handle(ctrl: &mut Ctrl) -> anyhow::Result<Vec<Envelope>> {
        let buf = FactBuffer::new();
        ctrl.handle(&Context::background(), &buf, now(), &command("<id>"))
    }

    fn kinds(buf: &FactBuffer) -> Vec<&'static str> {
        buf.facts().iter().map(Fact::kind).collect()
    }

    fn configured() -> AggregateHandlerStub {
        AggregateHandlerStub::new(|c| {
            c.identity("<aggregate>", KEY_AGGREGATE)
                .handles_command::<CommandA>()
                .records_event::<EventA>();
        })
    }

    // -----------------------------------------------------------------------
    // Instance lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn not_found_precedes_created() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::new("E1"));
            Ok(())
        }));
        let buf = FactBuffer::new();

        ctrl.handle(&Context::background(), &buf, now(), &command("<id>"))
            .unwrap();

        assert_eq!(
            kinds(&buf),
            vec!["instance_not_found", "instance_created", "event_recorded"]
        );
    }

    #[test]
    fn many_events_create_the_instance_once() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::new("E1"));
            s.record_event(EventA::new("E2"));
            s.record_event(EventA::new("E3"));
            Ok(())
        }));
        let buf = FactBuffer::new();

        let produced = ctrl
            .handle(&Context::background(), &buf, now(), &command("<id>"))
            .unwrap();

        assert_eq!(produced.len(), 3);
        let created = buf
            .facts()
            .iter()
            .filter(|f| matches!(f, Fact::InstanceCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn no_events_means_no_instance() {
        let mut ctrl = controller(configured());
        let buf = FactBuffer::new();

        ctrl.handle(&Context::background(), &buf, now(), &command("<id>"))
            .unwrap();
        ctrl.handle(&Context::background(), &buf, now(), &command("<id>"))
            .unwrap();

        assert_eq!(kinds(&buf), vec!["instance_not_found"; 2]);
    }

    #[test]
    fn existing_instance_is_loaded_from_history() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            let seen = s.root().applied.len();
            s.record_event(EventA::new(format!("E{seen}")));
            Ok(())
        }));
        let buf = FactBuffer::new();
        let ctx = Context::background();

        ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();
        let produced = ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();

        assert_eq!(
            produced[0].message.downcast_ref::<EventA>().unwrap().value,
            "E1"
        );
        let loaded: Vec<String> = buf
            .facts()
            .iter()
            .filter_map(|f| match f {
                Fact::InstanceLoaded { instance_id, .. } => Some(instance_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(loaded, vec!["<id>"]);
    }

    #[test]
    fn destroy_then_record_reverts_destruction() {
        let ctx = Context::background();
        let buf = FactBuffer::new();
        let mut ctrl = controller(configured().handle_with(|s, m| {
            let value = &m.downcast_ref::<CommandA>().unwrap().value;
            if value == "<id>" && !s.root().applied.is_empty() {
                s.destroy();
            }
            s.record_event(EventA::new("E"));
            Ok(())
        }));

        ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();
        buf.clear();
        ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();

        assert_eq!(
            kinds(&buf),
            vec![
                "instance_loaded",
                "instance_destroyed",
                "instance_destruction_reverted",
                "event_recorded"
            ]
        );
        assert_eq!(ctrl.history.get("<id>").map(Vec::len), Some(2));
    }

    #[test]
    fn record_then_destroy_discards_history() {
        let ctx = Context::background();
        let buf = FactBuffer::new();
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::new("E"));
            if s.root().applied.len() > 1 {
                s.destroy();
            }
            Ok(())
        }));

        ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();
        ctrl.handle(&ctx, &buf, now(), &command("<id>")).unwrap();

        assert!(ctrl.history.is_empty());
    }

    #[test]
    fn reset_discards_every_instance() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::new("E"));
            Ok(())
        }));
        handle(&mut ctrl).unwrap();

        ctrl.reset();

        assert!(ctrl.history.is_empty());
    }

    #[test]
    fn produced_event_is_a_child_of_the_command() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::new("E1"));
            Ok(())
        }));

        let produced = handle(&mut ctrl).unwrap();

        let event = &produced[0];
        assert_eq!(event.causation_id, MessageId(100));
        assert_eq!(event.correlation_id, MessageId(100));
        assert_eq!(event.role, MessageRole::Event);
        assert_eq!(
            event.origin.as_ref().and_then(|o| o.instance_id.as_deref()),
            Some("<id>")
        );
    }

    // -----------------------------------------------------------------------
    // Contract violations
    // -----------------------------------------------------------------------

    #[test]
    #[should_panic(expected = "attempted to route a CommandA command to an empty instance ID")]
    fn empty_instance_id_panics() {
        let mut ctrl = controller(configured().route_with(|_| Ok(String::new())));
        let _ = handle(&mut ctrl);
    }

    #[test]
    #[should_panic(expected = "destroyed the '<id>' instance without recording an event")]
    fn destroy_without_event_panics() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            if s.root().applied.is_empty() {
                s.record_event(EventA::new("E"));
            } else {
                s.destroy();
            }
            Ok(())
        }));

        handle(&mut ctrl).unwrap();
        let _ = handle(&mut ctrl);
    }

    #[test]
    #[should_panic(
        expected = "recorded an event of type EventB, which is not produced by this handler"
    )]
    fn undeclared_event_panics() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventB::new("E"));
            Ok(())
        }));
        let _ = handle(&mut ctrl);
    }

    #[test]
    #[should_panic(expected = "recorded an invalid EventA event: <reason>")]
    fn invalid_event_panics() {
        let mut ctrl = controller(configured().handle_with(|s, _| {
            s.record_event(EventA::invalid("<reason>"));
            Ok(())
        }));
        let _ = handle(&mut ctrl);
    }

    #[test]
    #[should_panic(
        expected = "behaved unexpectedly in AggregateMessageHandler::handle_command() while handling a CommandA message"
    )]
    fn unexpected_message_is_enriched() {
        let mut ctrl = controller(configured().handle_with(|_, _| Err(UnexpectedMessage)));
        let _ = handle(&mut ctrl);
    }

    #[test]
    #[should_panic(expected = "can not handle EventA messages in the event role")]
    fn non_command_panics() {
        let mut ctrl = controller(configured());
        let env = Envelope::new_root(
            MessageId(1),
            payload(EventA::new("E")),
            MessageRole::Event,
            now(),
        )
        .unwrap();
        let _ = ctrl.handle(&Context::background(), &FactBuffer::new(), now(), &env);
    }
}
