//! Handler traits implemented by the application under test.
//!
//! Handlers never produce messages directly. Everything they do is done
//! through the scope passed to them, so every side effect is observable and
//! attributable to a handler.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::config::HandlerConfigurer;
use crate::controller::aggregate::AggregateCommandScope;
use crate::controller::integration::IntegrationCommandScope;
use crate::controller::process::ProcessScope;
use crate::controller::projection::ProjectionEventScope;
use crate::message::AnyMessage;

/// Returned by handler code that is given a message it was never meant to
/// receive. The controller turns it into a diagnosable panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unexpected message")]
pub struct UnexpectedMessage;

/// Ambient context for one operation. Cancellation is cooperative: the
/// engine never checks it, long-running handler logic may.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    /// Cancels this context and every clone of it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with a "context cancelled" error once cancelled.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("context cancelled");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// The state of one aggregate instance. Only changed by applying events.
pub trait AggregateRoot: fmt::Debug + Send + 'static {
    fn apply_event(&mut self, event: &dyn AnyMessage) -> Result<(), UnexpectedMessage>;
}

pub trait AggregateMessageHandler: Send + Sync + 'static {
    type Root: AggregateRoot;

    fn configure(&self, c: &mut HandlerConfigurer);

    /// A root in its initial state.
    fn new_root(&self) -> Self::Root;

    /// The ID of the instance a command is addressed to. Must not be empty.
    fn route_command_to_instance(
        &self,
        command: &dyn AnyMessage,
    ) -> Result<String, UnexpectedMessage>;

    fn handle_command(
        &self,
        scope: &mut AggregateCommandScope<'_, Self::Root>,
        command: &dyn AnyMessage,
    ) -> Result<(), UnexpectedMessage>;
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// The state of one process instance.
pub trait ProcessRoot: fmt::Debug + Send + 'static {}

pub trait ProcessMessageHandler: Send + Sync + 'static {
    type Root: ProcessRoot;

    fn configure(&self, c: &mut HandlerConfigurer);

    fn new_root(&self) -> Self::Root;

    /// The instance an event is routed to, or `None` to ignore it.
    fn route_event_to_instance(
        &self,
        ctx: &Context,
        event: &dyn AnyMessage,
    ) -> anyhow::Result<Option<String>>;

    fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProcessScope<'_, Self::Root>,
        event: &dyn AnyMessage,
    ) -> anyhow::Result<()>;

    fn handle_timeout(
        &self,
        ctx: &Context,
        scope: &mut ProcessScope<'_, Self::Root>,
        timeout: &dyn AnyMessage,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Integrations and projections
// ---------------------------------------------------------------------------

pub trait IntegrationMessageHandler: Send + Sync + 'static {
    fn configure(&self, c: &mut HandlerConfigurer);

    fn handle_command(
        &self,
        ctx: &Context,
        scope: &mut IntegrationCommandScope<'_>,
        command: &dyn AnyMessage,
    ) -> anyhow::Result<()>;
}

pub trait ProjectionMessageHandler: Send + Sync + 'static {
    fn configure(&self, c: &mut HandlerConfigurer);

    fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProjectionEventScope<'_>,
        event: &dyn AnyMessage,
    ) -> anyhow::Result<()>;
}
