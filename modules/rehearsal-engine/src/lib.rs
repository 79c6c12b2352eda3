//! In-memory message dispatch engine for exercising message-driven
//! applications.
//!
//! An [`Application`] registers aggregate, process, integration and
//! projection handlers. An [`Engine`] routes messages to them through one
//! controller per handler, expanding each dispatch breadth-first until
//! nothing more is produced, and reports every decision it makes as a
//! [`Fact`] to the observers passed in [`OperationOptions`].

pub mod app;
pub mod config;
pub mod controller;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fact;
pub mod handler;
pub mod message;
pub mod options;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use app::{Application, ApplicationBuilder};
pub use config::{HandlerConfig, HandlerConfigurer, Identity, Route, RouteKind};
pub use controller::{
    AggregateCommandScope, IntegrationCommandScope, ProcessScope, ProjectionEventScope,
};
pub use engine::Engine;
pub use envelope::{Envelope, MessageId, MessageIdGenerator, Origin};
pub use error::{ConfigError, DispatchError, DispatchResult, EnvelopeError, HandlerFailure};
pub use fact::{Fact, FactBuffer, FactLogger, Ignore, Observer, ObserverSet};
pub use handler::{
    AggregateMessageHandler, AggregateRoot, Context, IntegrationMessageHandler,
    ProcessMessageHandler, ProcessRoot, ProjectionMessageHandler, UnexpectedMessage,
};
pub use message::{AnyMessage, HandlerType, Message, MessageRole, MessageType, Payload};
pub use options::{HandlerEnablement, OperationOptions};
