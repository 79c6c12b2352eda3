//! Actions: the things a test does to the application.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use rehearsal_engine::{
    Context, Engine, HandlerEnablement, Message, MessageRole, Observer, OperationOptions, Payload,
};

use crate::error::TestError;
use crate::expectation::PredicateOptions;

pub trait Action {
    /// Logged before the action runs.
    fn caption(&self) -> String;

    /// Adjust how the paired expectation reads the facts this action
    /// causes.
    fn configure_predicate(&self, _options: &mut PredicateOptions) {}

    fn run(self: Box<Self>, scope: &mut ActionScope<'_>) -> Result<(), TestError>;
}

/// What an action may use while it runs.
pub struct ActionScope<'a> {
    pub(crate) engine: &'a mut Engine,
    pub(crate) ctx: &'a Context,
    pub(crate) now: DateTime<Utc>,
    pub(crate) enabled: &'a HandlerEnablement,
    pub(crate) observers: Vec<Arc<dyn Observer>>,
}

impl ActionScope<'_> {
    /// The test's virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn engine(&mut self) -> &mut Engine {
        self.engine
    }

    /// Options for one engine operation at the current virtual time.
    pub fn options(&self) -> OperationOptions {
        self.observers.iter().fold(
            OperationOptions::at(self.now).with_enablement(self.enabled.clone()),
            |options, o| options.with_observer(o.clone()),
        )
    }

    /// Dispatch `message`, which the application must route in `role`.
    pub fn dispatch_as(&mut self, message: Payload, role: MessageRole) -> Result<(), TestError> {
        let message_type = message.message_type();
        match self.engine.role_of(message_type) {
            None => Err(TestError::UnrecognizedMessage { message_type }),
            Some(actual) if actual != role => Err(TestError::UnexpectedRole {
                verb: verb(role),
                message_type,
                expected: role,
                actual,
            }),
            Some(_) => {
                let options = self.options();
                self.engine.dispatch_payload(self.ctx, message, &options)?;
                Ok(())
            }
        }
    }

    fn advance_to(&mut self, target: DateTime<Utc>) -> Result<(), TestError> {
        if target < self.now {
            return Err(TestError::TimeReversal {
                now: self.now,
                requested: target,
            });
        }
        debug!(from = %self.now, to = %target, "advancing virtual time");
        self.now = target;

        let options = self.options();
        self.engine.tick(self.ctx, &options)?;
        Ok(())
    }
}

fn verb(role: MessageRole) -> &'static str {
    match role {
        MessageRole::Command => "execute",
        MessageRole::Event => "record",
        MessageRole::Timeout => "schedule",
    }
}

// ---------------------------------------------------------------------------
// Dispatching
// ---------------------------------------------------------------------------

struct Dispatch {
    message: Payload,
    role: MessageRole,
}

impl Action for Dispatch {
    fn caption(&self) -> String {
        match self.role {
            MessageRole::Command => format!("executing {} command", self.message.message_type()),
            _ => format!("recording {} event", self.message.message_type()),
        }
    }

    fn run(self: Box<Self>, scope: &mut ActionScope<'_>) -> Result<(), TestError> {
        scope.dispatch_as(self.message, self.role)
    }
}

/// Execute a command, as if it came from outside the application.
pub fn execute_command<M: Message>(command: M) -> Box<dyn Action> {
    Box::new(Dispatch {
        message: Arc::new(command),
        role: MessageRole::Command,
    })
}

/// Record an event, as if it came from outside the application.
pub fn record_event<M: Message>(event: M) -> Box<dyn Action> {
    Box::new(Dispatch {
        message: Arc::new(event),
        role: MessageRole::Event,
    })
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAdjustment {
    ToTime(DateTime<Utc>),
    ByDuration(Duration),
}

impl fmt::Display for TimeAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeAdjustment::ToTime(t) => write!(f, "to {}", t.to_rfc3339()),
            TimeAdjustment::ByDuration(d) => write!(f, "by {d}"),
        }
    }
}

struct AdvanceTime(TimeAdjustment);

impl Action for AdvanceTime {
    fn caption(&self) -> String {
        format!("advancing time {}", self.0)
    }

    fn run(self: Box<Self>, scope: &mut ActionScope<'_>) -> Result<(), TestError> {
        let target = match self.0 {
            TimeAdjustment::ToTime(t) => t,
            TimeAdjustment::ByDuration(d) => scope.now + d,
        };
        scope.advance_to(target)
    }
}

/// Move the virtual clock forward and deliver any timeouts that become
/// due. Time never moves backwards.
pub fn advance_time(adjustment: TimeAdjustment) -> Box<dyn Action> {
    Box::new(AdvanceTime(adjustment))
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Handed to the closure of a [`call`] action. Messages dispatched through
/// it count as produced messages for the paired expectation.
pub struct CallScope<'s, 'a> {
    scope: &'s mut ActionScope<'a>,
}

impl CallScope<'_, '_> {
    pub fn execute_command<M: Message>(&mut self, command: M) -> Result<(), TestError> {
        self.scope.dispatch_as(Arc::new(command), MessageRole::Command)
    }

    pub fn record_event<M: Message>(&mut self, event: M) -> Result<(), TestError> {
        self.scope.dispatch_as(Arc::new(event), MessageRole::Event)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.scope.now
    }
}

type CallFn = Box<dyn FnOnce(&mut CallScope<'_, '_>) -> anyhow::Result<()>>;

struct Call(CallFn);

impl Action for Call {
    fn caption(&self) -> String {
        "calling user-defined function".to_string()
    }

    fn configure_predicate(&self, options: &mut PredicateOptions) {
        options.match_dispatch_cycle_started_facts = true;
    }

    fn run(self: Box<Self>, scope: &mut ActionScope<'_>) -> Result<(), TestError> {
        let mut call = CallScope { scope };
        (self.0)(&mut call).map_err(TestError::Call)
    }
}

/// Run test code that dispatches messages through a [`CallScope`], for
/// example to exercise application code that wraps the engine's inputs.
pub fn call<F>(f: F) -> Box<dyn Action>
where
    F: FnOnce(&mut CallScope<'_, '_>) -> anyhow::Result<()> + 'static,
{
    Box::new(Call(Box::new(f)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rehearsal_engine::testing::*;
    use rehearsal_engine::{Application, FactBuffer};

    const APP_KEY: &str = "6a1d2e3f-4b5c-4d6e-8f7a-9b0c1d2e3f4a";

    fn app() -> Application {
        Application::builder("<app>", APP_KEY)
            .aggregate(AggregateHandlerStub::new(|c| {
                c.identity("<aggregate>", KEY_AGGREGATE)
                    .handles_command::<CommandA>()
                    .records_event::<EventA>();
            }))
            .build()
            .unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn run(action: Box<dyn Action>) -> (Result<(), TestError>, DateTime<Utc>, Arc<FactBuffer>) {
        let app = app();
        let mut engine = Engine::new(&app);
        let ctx = Context::background();
        let enabled = HandlerEnablement::default();
        let buf = Arc::new(FactBuffer::new());
        let mut scope = ActionScope {
            engine: &mut engine,
            ctx: &ctx,
            now: start(),
            enabled: &enabled,
            observers: vec![buf.clone() as Arc<dyn Observer>],
        };
        let result = action.run(&mut scope);
        (result, scope.now, buf)
    }

    #[test]
    fn execute_command_rejects_an_event() {
        let (result, _, _) = run(execute_command(EventA::new("1")));
        assert_eq!(
            result.unwrap_err().to_string(),
            "can not execute EventA, it is configured as an event"
        );
    }

    #[test]
    fn record_event_rejects_an_unknown_type() {
        let (result, _, _) = run(record_event(EventX::new("1")));
        assert!(matches!(result, Err(TestError::UnrecognizedMessage { .. })));
    }

    #[test]
    fn advance_time_moves_the_clock_and_ticks() {
        let adjustment = TimeAdjustment::ByDuration(Duration::hours(2));
        let (result, now, buf) = run(advance_time(adjustment));
        result.unwrap();
        assert_eq!(now, start() + Duration::hours(2));
        assert_eq!(buf.facts()[0].kind(), "tick_cycle_begun");
    }

    #[test]
    fn advance_time_refuses_to_go_backwards() {
        let adjustment = TimeAdjustment::ToTime(start() - Duration::seconds(1));
        let (result, now, _) = run(advance_time(adjustment));
        assert!(matches!(result, Err(TestError::TimeReversal { .. })));
        assert_eq!(now, start());
    }

    #[test]
    fn call_dispatches_through_the_scope() {
        let (result, _, buf) = run(call(|s| {
            s.execute_command(CommandA::new("1"))?;
            Ok(())
        }));
        result.unwrap();
        assert_eq!(buf.facts()[0].kind(), "message_dispatch_begun");

        let mut options = PredicateOptions::default();
        call(|_| Ok(())).configure_predicate(&mut options);
        assert!(options.match_dispatch_cycle_started_facts);
    }

    #[test]
    fn call_errors_are_reported() {
        let (result, _, _) = run(call(|_| anyhow::bail!("<error>")));
        assert_eq!(result.unwrap_err().to_string(), "call failed: <error>");
    }
}
