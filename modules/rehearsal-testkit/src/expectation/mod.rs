//! Expectations evaluated against the facts an action produces.
//!
//! An expectation is fed every fact while its action runs and is then
//! asked for a result. Failed results carry enough of an explanation to
//! fix the test or the application without re-running it under a
//! debugger.

use std::fmt::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use rehearsal_engine::{Fact, Observer};

use crate::compare::Comparator;
use crate::render::Renderer;

pub mod composite;
pub mod message;

pub use composite::{all_of, any_of, none_of};
pub use message::{
    to_execute_command, to_execute_command_of_type, to_record_event, to_record_event_of_type,
};

/// Options an action passes to the expectation it is paired with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredicateOptions {
    /// Treat the seed messages of a dispatch cycle as produced messages.
    /// Set by actions that dispatch on behalf of the test's own code.
    pub match_dispatch_cycle_started_facts: bool,
}

pub trait Expectation: Send {
    /// A short description of what is expected.
    fn caption(&self) -> String;

    fn begin(&mut self, options: &PredicateOptions, comparator: Arc<dyn Comparator>);

    fn notify(&mut self, fact: &Fact);

    fn end(&mut self, renderer: &dyn Renderer) -> ExpectationResult;
}

/// The outcome of one expectation, and of its children for composites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationResult {
    pub ok: bool,
    pub criteria: String,
    pub explanation: String,
    pub sections: Vec<ReportSection>,
    pub sub_results: Vec<ExpectationResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
}

impl ReportSection {
    pub fn append_list_item(&mut self, item: impl fmt::Display) {
        let _ = writeln!(self.content, "• {item}");
    }
}

impl ExpectationResult {
    pub fn new(ok: bool, criteria: impl Into<String>) -> Self {
        Self {
            ok,
            criteria: criteria.into(),
            explanation: String::new(),
            sections: Vec::new(),
            sub_results: Vec::new(),
        }
    }

    /// The section titled `title`, created empty if it does not exist yet.
    pub fn section(&mut self, title: &str) -> &mut ReportSection {
        let index = match self.sections.iter().position(|s| s.title == title) {
            Some(i) => i,
            None => {
                self.sections.push(ReportSection {
                    title: title.to_string(),
                    content: String::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    pub fn suggest(&mut self, suggestion: impl fmt::Display) {
        self.section(SUGGESTIONS).append_list_item(suggestion);
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        let mark = if self.ok { '✓' } else { '✗' };

        write!(f, "{indent}{mark} {}", self.criteria)?;
        if !self.explanation.is_empty() {
            write!(f, " ({})", self.explanation)?;
        }
        writeln!(f)?;

        for section in &self.sections {
            writeln!(f, "{indent}  | {}:", section.title)?;
            for line in section.content.lines() {
                writeln!(f, "{indent}  |     {line}")?;
            }
        }

        for sub in &self.sub_results {
            sub.write(f, depth + 1)?;
        }
        Ok(())
    }
}

pub const SUGGESTIONS: &str = "Suggestions";
pub const MESSAGE_DIFF: &str = "Message Diff";

impl fmt::Display for ExpectationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

/// Feeds facts to an expectation while an action runs.
pub(crate) struct ExpectationObserver {
    expectation: Mutex<Box<dyn Expectation>>,
}

impl ExpectationObserver {
    pub fn new(expectation: Box<dyn Expectation>) -> Arc<Self> {
        Arc::new(Self {
            expectation: Mutex::new(expectation),
        })
    }

    pub fn end(&self, renderer: &dyn Renderer) -> ExpectationResult {
        self.expectation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .end(renderer)
    }
}

impl Observer for ExpectationObserver {
    fn notify(&self, fact: &Fact) {
        self.expectation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify(fact);
    }
}
