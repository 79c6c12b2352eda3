//! Facts: immutable records of every decision the engine makes.
//!
//! Facts are pushed synchronously to observers in emission order. An
//! observer must never call back into the engine.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::HandlerConfig;
use crate::envelope::Envelope;
use crate::message::Payload;
use crate::options::HandlerEnablement;

/// One engine decision. The set of variants is closed.
#[derive(Debug, Clone)]
pub enum Fact {
    /// A message with no routes was dispatched. This is not an error.
    UnroutableMessageDispatched {
        message: Payload,
        engine_time: DateTime<Utc>,
        enabled: HandlerEnablement,
    },

    MessageDispatchBegun {
        envelope: Envelope,
        engine_time: DateTime<Utc>,
        enabled: HandlerEnablement,
    },

    MessageDispatchCompleted {
        envelope: Envelope,
        error: Option<String>,
        enabled: HandlerEnablement,
    },

    /// Causal expansion is about to start from these seed envelopes.
    DispatchCycleBegun {
        envelopes: Vec<Envelope>,
        engine_time: DateTime<Utc>,
        enabled: HandlerEnablement,
    },

    TickCycleBegun {
        engine_time: DateTime<Utc>,
        enabled: HandlerEnablement,
    },

    TickCycleCompleted {
        engine_time: DateTime<Utc>,
        error: Option<String>,
        enabled: HandlerEnablement,
    },

    MessageHandlingBegun {
        handler: Arc<HandlerConfig>,
        envelope: Envelope,
    },

    MessageHandlingCompleted {
        handler: Arc<HandlerConfig>,
        envelope: Envelope,
        error: Option<String>,
    },

    /// The handler is disabled for this operation.
    MessageHandlingSkipped {
        handler: Arc<HandlerConfig>,
        envelope: Envelope,
    },

    InstanceNotFound {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        envelope: Envelope,
    },

    InstanceLoaded {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },

    InstanceCreated {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },

    /// An aggregate was destroyed or a process ended.
    InstanceDestroyed {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },

    /// An event was recorded after `destroy()` in the same invocation.
    InstanceDestructionReverted {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        root: String,
        envelope: Envelope,
    },

    EventRecorded {
        handler: Arc<HandlerConfig>,
        instance_id: Option<String>,
        envelope: Envelope,
        event: Envelope,
    },

    CommandExecuted {
        handler: Arc<HandlerConfig>,
        instance_id: Option<String>,
        envelope: Envelope,
        command: Envelope,
    },

    TimeoutScheduled {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        envelope: Envelope,
        timeout: Envelope,
    },

    MessageLogged {
        handler: Arc<HandlerConfig>,
        instance_id: Option<String>,
        envelope: Envelope,
        message: String,
    },

    /// A process chose not to route an event to any instance.
    MessageIgnored {
        handler: Arc<HandlerConfig>,
        envelope: Envelope,
    },

    /// A timeout fired for a process instance that has since ended.
    TimeoutIgnored {
        handler: Arc<HandlerConfig>,
        instance_id: String,
        envelope: Envelope,
    },
}

impl Fact {
    /// The snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Fact::UnroutableMessageDispatched { .. } => "unroutable_message_dispatched",
            Fact::MessageDispatchBegun { .. } => "message_dispatch_begun",
            Fact::MessageDispatchCompleted { .. } => "message_dispatch_completed",
            Fact::DispatchCycleBegun { .. } => "dispatch_cycle_begun",
            Fact::TickCycleBegun { .. } => "tick_cycle_begun",
            Fact::TickCycleCompleted { .. } => "tick_cycle_completed",
            Fact::MessageHandlingBegun { .. } => "message_handling_begun",
            Fact::MessageHandlingCompleted { .. } => "message_handling_completed",
            Fact::MessageHandlingSkipped { .. } => "message_handling_skipped",
            Fact::InstanceNotFound { .. } => "instance_not_found",
            Fact::InstanceLoaded { .. } => "instance_loaded",
            Fact::InstanceCreated { .. } => "instance_created",
            Fact::InstanceDestroyed { .. } => "instance_destroyed",
            Fact::InstanceDestructionReverted { .. } => "instance_destruction_reverted",
            Fact::EventRecorded { .. } => "event_recorded",
            Fact::CommandExecuted { .. } => "command_executed",
            Fact::TimeoutScheduled { .. } => "timeout_scheduled",
            Fact::MessageLogged { .. } => "message_logged",
            Fact::MessageIgnored { .. } => "message_ignored",
            Fact::TimeoutIgnored { .. } => "timeout_ignored",
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::UnroutableMessageDispatched { message, .. } => write!(
                f,
                "dispatched {} which is not routed to any handlers",
                message.message_type()
            ),
            Fact::MessageDispatchBegun { envelope, .. } => {
                write!(f, "{} dispatching {}", ids(envelope), describe(envelope))
            }
            Fact::MessageDispatchCompleted {
                envelope, error, ..
            } => {
                write!(f, "{} dispatched {}", ids(envelope), describe(envelope))?;
                outcome(f, error)
            }
            Fact::DispatchCycleBegun { envelopes, .. } => {
                let n = envelopes.len();
                write!(f, "dispatch cycle begun with {n} message(s)")
            }
            Fact::TickCycleBegun { engine_time, .. } => write!(f, "tick begun at {engine_time}"),
            Fact::TickCycleCompleted {
                engine_time, error, ..
            } => {
                write!(f, "tick completed at {engine_time}")?;
                outcome(f, error)
            }
            Fact::MessageHandlingBegun { handler, envelope } => {
                handling(f, envelope, handler, "handling")
            }
            Fact::MessageHandlingCompleted {
                handler,
                envelope,
                error,
            } => {
                handling(f, envelope, handler, "handled")?;
                outcome(f, error)
            }
            Fact::MessageHandlingSkipped { handler, envelope } => {
                handling(f, envelope, handler, "is disabled, skipped")
            }
            Fact::InstanceNotFound {
                handler,
                instance_id,
                envelope,
            } => {
                head(f, envelope, handler)?;
                write!(f, "instance {instance_id} not found")
            }
            Fact::InstanceLoaded {
                handler,
                instance_id,
                envelope,
                ..
            } => {
                head(f, envelope, handler)?;
                write!(f, "instance {instance_id} loaded")
            }
            Fact::InstanceCreated {
                handler,
                instance_id,
                envelope,
                ..
            } => {
                head(f, envelope, handler)?;
                write!(f, "instance {instance_id} created")
            }
            Fact::InstanceDestroyed {
                handler,
                instance_id,
                envelope,
                ..
            } => {
                head(f, envelope, handler)?;
                write!(f, "instance {instance_id} destroyed")
            }
            Fact::InstanceDestructionReverted {
                handler,
                instance_id,
                envelope,
                ..
            } => {
                head(f, envelope, handler)?;
                write!(f, "instance {instance_id} destruction reverted")
            }
            Fact::EventRecorded { handler, event, .. } => {
                head(f, event, handler)?;
                write!(f, "recorded {}", describe(event))
            }
            Fact::CommandExecuted {
                handler, command, ..
            } => {
                head(f, command, handler)?;
                write!(f, "executed {}", describe(command))
            }
            Fact::TimeoutScheduled {
                handler, timeout, ..
            } => {
                head(f, timeout, handler)?;
                write!(f, "scheduled {}", describe(timeout))?;
                if let Some(at) = timeout.scheduled_for {
                    write!(f, " for {at}")?;
                }
                Ok(())
            }
            Fact::MessageLogged {
                handler,
                envelope,
                message,
                ..
            } => {
                head(f, envelope, handler)?;
                write!(f, "logged: {message}")
            }
            Fact::MessageIgnored { handler, envelope } => {
                head(f, envelope, handler)?;
                write!(f, "ignored {}", envelope.message_type())
            }
            Fact::TimeoutIgnored {
                handler,
                instance_id,
                envelope,
            } => {
                head(f, envelope, handler)?;
                write!(
                    f,
                    "instance {instance_id} has ended, ignored {}",
                    envelope.message_type()
                )
            }
        }
    }
}

fn ids(env: &Envelope) -> String {
    format!(
        "[{} <- {} ~ {}]",
        env.message_id, env.causation_id, env.correlation_id
    )
}

fn describe(env: &Envelope) -> String {
    format!("{} {}", env.message_type(), env.role)
}

/// "[ids] 'handler' ", shared by every fact about one handler.
fn head(f: &mut fmt::Formatter<'_>, env: &Envelope, handler: &HandlerConfig) -> fmt::Result {
    write!(f, "{} '{}' ", ids(env), handler.name())
}

fn handling(
    f: &mut fmt::Formatter<'_>,
    env: &Envelope,
    handler: &HandlerConfig,
    verb: &str,
) -> fmt::Result {
    head(f, env, handler)?;
    let handler_type = handler.handler_type();
    write!(f, "{handler_type} {verb} {}", env.message_type())
}

fn outcome(f: &mut fmt::Formatter<'_>, error: &Option<String>) -> fmt::Result {
    match error {
        None => Ok(()),
        Some(e) => write!(f, " with error: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Receives facts, one call per fact, in emission order.
pub trait Observer: Send + Sync {
    fn notify(&self, fact: &Fact);
}

impl<F> Observer for F
where
    F: Fn(&Fact) + Send + Sync,
{
    fn notify(&self, fact: &Fact) {
        self(fact)
    }
}

/// Fans facts out to every registered observer, in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for ObserverSet {
    fn notify(&self, fact: &Fact) {
        for o in &self.observers {
            o.notify(fact);
        }
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverSet({} observers)", self.observers.len())
    }
}

/// Discards every fact.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ignore;

impl Observer for Ignore {
    fn notify(&self, _: &Fact) {}
}

/// Retains facts for later inspection. Thread-safe.
#[derive(Debug, Default)]
pub struct FactBuffer {
    facts: Mutex<Vec<Fact>>,
}

impl FactBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fact observed so far, in order.
    pub fn facts(&self) -> Vec<Fact> {
        self.facts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.facts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Observer for FactBuffer {
    fn notify(&self, fact: &Fact) {
        self.facts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fact.clone());
    }
}

/// Writes every fact to the `tracing` log as one human-readable line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactLogger;

impl Observer for FactLogger {
    fn notify(&self, fact: &Fact) {
        tracing::info!(target: "rehearsal::fact", kind = fact.kind(), "{fact}");
    }
}
