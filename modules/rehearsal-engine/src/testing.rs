//! Test doubles: stub messages and closure-driven handlers.
//!
//! Available to this crate's tests and, through the `test-support`
//! feature, to dependent crates.

use anyhow::Result;
use serde::Serialize;

use crate::config::HandlerConfigurer;
use crate::controller::{
    AggregateCommandScope, IntegrationCommandScope, ProcessScope, ProjectionEventScope,
};
use crate::handler::{
    AggregateMessageHandler, AggregateRoot, Context, IntegrationMessageHandler,
    ProcessMessageHandler, ProcessRoot, ProjectionMessageHandler, UnexpectedMessage,
};
use crate::message::{AnyMessage, Message};

pub const KEY_AGGREGATE: &str = "7e9b1f55-0b3a-4a36-9d0c-1f1e3c4b8a21";
pub const KEY_PROCESS: &str = "5c6a2f3e-8b1d-4e0f-a4c2-6d7e8f9a0b13";
pub const KEY_INTEGRATION: &str = "2b8c4d6e-1f3a-4c5b-9e7d-0a1b2c3d4e5f";
pub const KEY_PROJECTION: &str = "9d0e1f2a-3b4c-4d5e-8f6a-7b8c9d0e1f2a";

macro_rules! stub_messages {
    ($($name:ident),* $(,)?) => {$(
        /// A stub message carrying a single value.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct $name {
            pub value: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            pub invalid_because: Option<String>,
        }

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    value: value.into(),
                    invalid_because: None,
                }
            }

            /// A message that fails validation with `reason`.
            pub fn invalid(reason: impl Into<String>) -> Self {
                Self {
                    value: String::new(),
                    invalid_because: Some(reason.into()),
                }
            }
        }

        impl Message for $name {
            fn validate(&self) -> Result<(), String> {
                match &self.invalid_because {
                    Some(reason) => Err(reason.clone()),
                    None => Ok(()),
                }
            }
        }
    )*};
}

stub_messages!(CommandA, CommandB, CommandX);
stub_messages!(EventA, EventB, EventX);
stub_messages!(TimeoutA, TimeoutX);

/// The `value` field of a stub message, used as the default instance ID.
pub fn value_of(m: &dyn AnyMessage) -> Option<String> {
    m.to_value()
        .get("value")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}

type ConfigureFn = Box<dyn Fn(&mut HandlerConfigurer) + Send + Sync>;

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Records the structural form of every event applied to it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregateRootStub {
    pub applied: Vec<serde_json::Value>,
}

impl AggregateRoot for AggregateRootStub {
    fn apply_event(&mut self, event: &dyn AnyMessage) -> Result<(), UnexpectedMessage> {
        self.applied.push(event.to_value());
        Ok(())
    }
}

type AggregateStubScope<'a> = AggregateCommandScope<'a, AggregateRootStub>;
type AggregateRouteFn =
    Box<dyn Fn(&dyn AnyMessage) -> Result<String, UnexpectedMessage> + Send + Sync>;
type AggregateHandleFn = Box<
    dyn Fn(&mut AggregateStubScope<'_>, &dyn AnyMessage) -> Result<(), UnexpectedMessage>
        + Send
        + Sync,
>;

/// Routes commands by their `value` and does nothing unless told to.
pub struct AggregateHandlerStub {
    configure: ConfigureFn,
    route: AggregateRouteFn,
    handle: AggregateHandleFn,
}

impl AggregateHandlerStub {
    pub fn new(configure: impl Fn(&mut HandlerConfigurer) + Send + Sync + 'static) -> Self {
        Self {
            configure: Box::new(configure),
            route: Box::new(|m| value_of(m).ok_or(UnexpectedMessage)),
            handle: Box::new(|_, _| Ok(())),
        }
    }

    pub fn route_with(
        mut self,
        f: impl Fn(&dyn AnyMessage) -> Result<String, UnexpectedMessage> + Send + Sync + 'static,
    ) -> Self {
        self.route = Box::new(f);
        self
    }

    pub fn handle_with(
        mut self,
        f: impl Fn(&mut AggregateStubScope<'_>, &dyn AnyMessage) -> Result<(), UnexpectedMessage>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handle = Box::new(f);
        self
    }
}

impl AggregateMessageHandler for AggregateHandlerStub {
    type Root = AggregateRootStub;

    fn configure(&self, c: &mut HandlerConfigurer) {
        (self.configure)(c)
    }

    fn new_root(&self) -> AggregateRootStub {
        AggregateRootStub::default()
    }

    fn route_command_to_instance(
        &self,
        command: &dyn AnyMessage,
    ) -> Result<String, UnexpectedMessage> {
        (self.route)(command)
    }

    fn handle_command(
        &self,
        scope: &mut AggregateStubScope<'_>,
        command: &dyn AnyMessage,
    ) -> Result<(), UnexpectedMessage> {
        (self.handle)(scope, command)
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

/// Keeps whatever the handler closures put into it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessRootStub {
    pub handled: Vec<serde_json::Value>,
}

impl ProcessRoot for ProcessRootStub {}

type ProcessStubScope<'a> = ProcessScope<'a, ProcessRootStub>;
type ProcessRouteFn =
    Box<dyn Fn(&Context, &dyn AnyMessage) -> Result<Option<String>> + Send + Sync>;
type ProcessHandleFn =
    Box<dyn Fn(&Context, &mut ProcessStubScope<'_>, &dyn AnyMessage) -> Result<()> + Send + Sync>;

/// Routes events by their `value` and does nothing unless told to.
pub struct ProcessHandlerStub {
    configure: ConfigureFn,
    route: ProcessRouteFn,
    handle_event: ProcessHandleFn,
    handle_timeout: ProcessHandleFn,
}

impl ProcessHandlerStub {
    pub fn new(configure: impl Fn(&mut HandlerConfigurer) + Send + Sync + 'static) -> Self {
        Self {
            configure: Box::new(configure),
            route: Box::new(|_, m| Ok(value_of(m))),
            handle_event: Box::new(|_, _, _| Ok(())),
            handle_timeout: Box::new(|_, _, _| Ok(())),
        }
    }

    pub fn route_with(
        mut self,
        f: impl Fn(&Context, &dyn AnyMessage) -> Result<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        self.route = Box::new(f);
        self
    }

    pub fn handle_event_with(
        mut self,
        f: impl Fn(&Context, &mut ProcessStubScope<'_>, &dyn AnyMessage) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handle_event = Box::new(f);
        self
    }

    pub fn handle_timeout_with(
        mut self,
        f: impl Fn(&Context, &mut ProcessStubScope<'_>, &dyn AnyMessage) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handle_timeout = Box::new(f);
        self
    }
}

impl ProcessMessageHandler for ProcessHandlerStub {
    type Root = ProcessRootStub;

    fn configure(&self, c: &mut HandlerConfigurer) {
        (self.configure)(c)
    }

    fn new_root(&self) -> ProcessRootStub {
        ProcessRootStub::default()
    }

    fn route_event_to_instance(
        &self,
        ctx: &Context,
        event: &dyn AnyMessage,
    ) -> Result<Option<String>> {
        (self.route)(ctx, event)
    }

    fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProcessStubScope<'_>,
        event: &dyn AnyMessage,
    ) -> Result<()> {
        (self.handle_event)(ctx, scope, event)
    }

    fn handle_timeout(
        &self,
        ctx: &Context,
        scope: &mut ProcessStubScope<'_>,
        timeout: &dyn AnyMessage,
    ) -> Result<()> {
        (self.handle_timeout)(ctx, scope, timeout)
    }
}

// ---------------------------------------------------------------------------
// Integration and projection
// ---------------------------------------------------------------------------

type IntegrationHandleFn = Box<
    dyn Fn(&Context, &mut IntegrationCommandScope<'_>, &dyn AnyMessage) -> Result<()> + Send + Sync,
>;

pub struct IntegrationHandlerStub {
    configure: ConfigureFn,
    handle: IntegrationHandleFn,
}

impl IntegrationHandlerStub {
    pub fn new(configure: impl Fn(&mut HandlerConfigurer) + Send + Sync + 'static) -> Self {
        Self {
            configure: Box::new(configure),
            handle: Box::new(|_, _, _| Ok(())),
        }
    }

    pub fn handle_with(
        mut self,
        f: impl Fn(&Context, &mut IntegrationCommandScope<'_>, &dyn AnyMessage) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handle = Box::new(f);
        self
    }
}

impl IntegrationMessageHandler for IntegrationHandlerStub {
    fn configure(&self, c: &mut HandlerConfigurer) {
        (self.configure)(c)
    }

    fn handle_command(
        &self,
        ctx: &Context,
        scope: &mut IntegrationCommandScope<'_>,
        command: &dyn AnyMessage,
    ) -> Result<()> {
        (self.handle)(ctx, scope, command)
    }
}

type ProjectionHandleFn = Box<
    dyn Fn(&Context, &mut ProjectionEventScope<'_>, &dyn AnyMessage) -> Result<()> + Send + Sync,
>;

pub struct ProjectionHandlerStub {
    configure: ConfigureFn,
    handle: ProjectionHandleFn,
}

impl ProjectionHandlerStub {
    pub fn new(configure: impl Fn(&mut HandlerConfigurer) + Send + Sync + 'static) -> Self {
        Self {
            configure: Box::new(configure),
            handle: Box::new(|_, _, _| Ok(())),
        }
    }

    pub fn handle_with(
        mut self,
        f: impl Fn(&Context, &mut ProjectionEventScope<'_>, &dyn AnyMessage) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.handle = Box::new(f);
        self
    }
}

impl ProjectionMessageHandler for ProjectionHandlerStub {
    fn configure(&self, c: &mut HandlerConfigurer) {
        (self.configure)(c)
    }

    fn handle_event(
        &self,
        ctx: &Context,
        scope: &mut ProjectionEventScope<'_>,
        event: &dyn AnyMessage,
    ) -> Result<()> {
        (self.handle)(ctx, scope, event)
    }
}
