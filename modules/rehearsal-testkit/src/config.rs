use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use rehearsal_engine::{HandlerEnablement, HandlerType};

use crate::logging;

/// Test-run settings shared by a suite.
///
/// Loaded from a TOML file, from the environment, or both.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TestConfig {
    /// Virtual time at the start of each test, as an RFC 3339 string.
    /// Defaults to the wall clock when the test begins.
    pub start_time: Option<DateTime<Utc>>,
    pub handlers: HandlerTypesConfig,
    /// A `tracing` filter such as `rehearsal=debug`.
    pub log_filter: Option<String>,
    /// Log every fact the engine emits.
    pub log_facts: bool,
    /// Log the report of every expectation, passed or failed.
    pub log_reports: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            handlers: HandlerTypesConfig::default(),
            log_filter: None,
            log_facts: false,
            log_reports: true,
        }
    }
}

/// Which handler types are enabled unless a test says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HandlerTypesConfig {
    pub aggregate: bool,
    pub process: bool,
    pub integration: bool,
    pub projection: bool,
}

impl Default for HandlerTypesConfig {
    fn default() -> Self {
        Self {
            aggregate: true,
            process: true,
            integration: false,
            projection: false,
        }
    }
}

impl HandlerTypesConfig {
    pub fn enablement(&self) -> HandlerEnablement {
        let mut e = HandlerEnablement::default();
        e.set_type(HandlerType::Aggregate, self.aggregate);
        e.set_type(HandlerType::Process, self.process);
        e.set_type(HandlerType::Integration, self.integration);
        e.set_type(HandlerType::Projection, self.projection);
        e
    }
}

impl TestConfig {
    /// Build from the environment, after loading `.env` if present.
    ///
    /// `REHEARSAL_CONFIG` names a TOML file to start from;
    /// `REHEARSAL_START_TIME` and `REHEARSAL_LOG` override its start time
    /// and log filter.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var("REHEARSAL_CONFIG") {
            Some(path) => load_config(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(s) = var("REHEARSAL_START_TIME") {
            let t = DateTime::parse_from_rfc3339(&s)
                .with_context(|| format!("Invalid REHEARSAL_START_TIME: {s}"))?;
            config.start_time = Some(t.with_timezone(&Utc));
        }
        if let Some(filter) = var("REHEARSAL_LOG") {
            config.log_filter = Some(filter);
        }

        Ok(config)
    }

    /// The `tracing` filter built from `log_filter` on top of `RUST_LOG`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        logging::env_filter(self.log_filter.as_deref())
    }

    /// Install the log subscriber for this configuration. Only the first
    /// call in a process installs one.
    pub fn init_logging(&self) -> Result<()> {
        let filter = self
            .env_filter()
            .with_context(|| format!("Invalid log filter: {:?}", self.log_filter))?;
        logging::install(filter);
        Ok(())
    }
}

/// Load and parse a TOML test configuration file.
pub fn load_config(path: &Path) -> Result<TestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: TestConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
