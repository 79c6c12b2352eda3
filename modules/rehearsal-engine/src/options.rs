//! Per-operation options for dispatch and tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::HandlerConfig;
use crate::fact::{Observer, ObserverSet};
use crate::message::HandlerType;

/// Which handlers take part in an operation.
///
/// A per-handler setting overrides the setting for its handler type.
/// Aggregates and processes are enabled by default, integrations and
/// projections are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEnablement {
    types: BTreeMap<HandlerType, bool>,
    handlers: BTreeMap<String, bool>,
}

impl Default for HandlerEnablement {
    fn default() -> Self {
        Self {
            types: BTreeMap::from([
                (HandlerType::Aggregate, true),
                (HandlerType::Process, true),
                (HandlerType::Integration, false),
                (HandlerType::Projection, false),
            ]),
            handlers: BTreeMap::new(),
        }
    }
}

impl HandlerEnablement {
    pub fn is_type_enabled(&self, handler_type: HandlerType) -> bool {
        self.types.get(&handler_type).copied().unwrap_or(false)
    }

    pub fn is_enabled(&self, handler: &HandlerConfig) -> bool {
        self.handlers
            .get(handler.name())
            .copied()
            .unwrap_or_else(|| self.is_type_enabled(handler.handler_type()))
    }

    pub fn set_type(&mut self, handler_type: HandlerType, enabled: bool) {
        self.types.insert(handler_type, enabled);
    }

    pub fn set_handler(&mut self, name: impl Into<String>, enabled: bool) {
        self.handlers.insert(name.into(), enabled);
    }
}

/// Options for one `dispatch` or `tick` call.
///
/// The engine never reads a clock; the caller supplies "now".
#[derive(Debug, Clone)]
pub struct OperationOptions {
    now: DateTime<Utc>,
    observers: ObserverSet,
    enabled: HandlerEnablement,
}

impl OperationOptions {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            observers: ObserverSet::new(),
            enabled: HandlerEnablement::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn enable_handler_type(mut self, handler_type: HandlerType, enabled: bool) -> Self {
        self.enabled.set_type(handler_type, enabled);
        self
    }

    pub fn enable_handler(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.enabled.set_handler(name, enabled);
        self
    }

    pub fn with_enablement(mut self, enabled: HandlerEnablement) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_time(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub fn enabled(&self) -> &HandlerEnablement {
        &self.enabled
    }
}
