//! Black-box testing of message-driven applications.
//!
//! A [`Test`] runs [`Action`]s against an in-memory engine and checks
//! the facts they cause with [`Expectation`]s. When an expectation
//! fails, the report explains what was produced instead and what to
//! check next.

pub mod action;
pub mod bdd;
pub mod compare;
pub mod config;
pub mod error;
pub mod expectation;
pub mod logging;
pub mod render;

pub use action::{
    advance_time, call, execute_command, record_event, Action, ActionScope, CallScope,
    TimeAdjustment,
};
pub use bdd::Scenario;
pub use compare::{Comparator, DefaultComparator, Similarity};
pub use config::{load_config, HandlerTypesConfig, TestConfig};
pub use error::TestError;
pub use expectation::{
    all_of, any_of, none_of, to_execute_command, to_execute_command_of_type, to_record_event,
    to_record_event_of_type, Expectation, ExpectationResult, PredicateOptions, ReportSection,
};
pub use logging::init_logging;
pub use render::{DefaultRenderer, Renderer};
pub use test::{Test, TestOptions};
