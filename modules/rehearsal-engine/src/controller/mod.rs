//! Controllers: one per registered handler, owning that handler's state.
//!
//! Every controller exposes the same contract to the engine. The rules that
//! differ per handler type live in the four implementations, which are the
//! only implementations there will ever be.

pub mod aggregate;
pub mod integration;
pub mod process;
pub mod projection;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{HandlerConfig, Identity, RouteKind};
use crate::envelope::Envelope;
use crate::fact::Observer;
use crate::handler::{Context, UnexpectedMessage};
use crate::message::{AnyMessage, HandlerType, MessageType};

pub use aggregate::{AggregateCommandScope, AggregateController};
pub use integration::{IntegrationCommandScope, IntegrationController};
pub use process::{ProcessController, ProcessScope};
pub use projection::{ProjectionController, ProjectionEventScope};

mod private {
    pub trait Sealed {}
}

/// The uniform contract between the engine and a handler's controller.
pub trait Controller: private::Sealed + Send {
    fn config(&self) -> &Arc<HandlerConfig>;

    fn identity(&self) -> &Identity {
        self.config().identity()
    }

    fn handler_type(&self) -> HandlerType {
        self.config().handler_type()
    }

    /// Messages that have become due as of `now`. Only processes produce
    /// anything here.
    fn tick(&mut self, ctx: &Context, obs: &dyn Observer, now: DateTime<Utc>) -> Vec<Envelope>;

    /// Handle one envelope and return what the handler produced.
    ///
    /// Contract violations by the handler panic. Errors returned by the
    /// handler's own logic are returned here.
    fn handle(
        &mut self,
        ctx: &Context,
        obs: &dyn Observer,
        now: DateTime<Utc>,
        env: &Envelope,
    ) -> anyhow::Result<Vec<Envelope>>;

    /// Discard all instance state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Contract violations
// ---------------------------------------------------------------------------

/// Where in the handler's code a violation was detected.
#[derive(Clone, Copy)]
pub(crate) struct Site<'a> {
    pub config: &'a HandlerConfig,
    pub interface: &'static str,
    pub method: &'static str,
    pub message_type: MessageType,
}

impl Site<'_> {
    pub fn violation(&self, description: impl fmt::Display) -> ! {
        panic!(
            "the '{}' {} message handler behaved unexpectedly in {}::{}() while handling a {} message: {}",
            self.config.name(),
            self.config.handler_type(),
            self.interface,
            self.method,
            self.message_type,
            description,
        )
    }

    pub fn unexpected(&self) -> ! {
        self.violation("the handler returned UnexpectedMessage")
    }

    /// Promotes an `UnexpectedMessage` inside a handler error to a panic.
    pub fn check_error(&self, err: anyhow::Error) -> anyhow::Error {
        if err.is::<UnexpectedMessage>() {
            self.unexpected();
        }
        err
    }

    /// A message a handler produces must be declared and valid.
    pub fn check_produced(&self, kind: RouteKind, message: &dyn AnyMessage) {
        let message_type = message.message_type();
        let (verb, noun, declared) = match kind {
            RouteKind::RecordsEvent => ("recorded", "event", "produced"),
            RouteKind::ExecutesCommand => ("executed", "command", "produced"),
            _ => ("scheduled", "timeout", "scheduled"),
        };

        if !self.config.has_route(kind, message_type) {
            let article = article(noun);
            self.violation(format_args!(
                "{verb} {article} {noun} of type {message_type}, which is not {declared} by this handler"
            ));
        }

        if let Err(reason) = message.validate() {
            self.violation(format_args!("{verb} an invalid {message_type} {noun}: {reason}"));
        }
    }
}

fn article(noun: &str) -> &'static str {
    if noun.starts_with('e') {
        "an"
    } else {
        "a"
    }
}

/// Panics if the controller was handed a message it does not consume.
pub(crate) fn require_consumed(config: &HandlerConfig, env: &Envelope) {
    let message_type = env.message_type();
    if !config.consumes(message_type) {
        panic!(
            "the '{}' {} message handler does not consume {} messages",
            config.name(),
            config.handler_type(),
            message_type,
        );
    }
}

/// The string form of a root, as carried by instance facts.
pub(crate) fn render_root(root: &impl fmt::Debug) -> String {
    format!("{root:?}")
}
