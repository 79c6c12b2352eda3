use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "rehearsal=info";

/// Install a `tracing` subscriber that writes through the test harness's
/// output capture.
///
/// `filter` is a comma-separated list of directives added on top of
/// `RUST_LOG`. Only the first call in a process installs a subscriber.
pub fn init_logging(filter: Option<&str>) -> Result<()> {
    install(env_filter(filter)?);
    Ok(())
}

/// The filter `init_logging` would install for `filter`.
pub fn env_filter(filter: Option<&str>) -> Result<EnvFilter> {
    let mut env_filter = EnvFilter::from_default_env();
    for directive in filter.unwrap_or(DEFAULT_FILTER).split(',') {
        let directive = directive.trim();
        if !directive.is_empty() {
            env_filter = env_filter.add_directive(directive.parse()?);
        }
    }
    Ok(env_filter)
}

pub(crate) fn install(env_filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}
