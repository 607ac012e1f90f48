use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Level used until the configuration has been read.
pub const STARTUP_LEVEL: &str = "info";

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool, quiet: bool, configured: &str) -> String {
    if quiet {
        "error".to_string()
    } else if verbose {
        "debug".to_string()
    } else {
        configured.to_string()
    }
}

/// Handle to the installed filter, so the configured level can replace the
/// startup level once the configuration is loaded.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    verbose: bool,
    quiet: bool,
    from_env: bool,
}

impl LogHandle {
    /// Directive the configured level maps to, or `None` when flags or
    /// `RUST_LOG` already decide the filter.
    pub fn configured_directive(&self, configured: &str) -> Option<String> {
        if self.from_env || self.quiet || self.verbose {
            return None;
        }
        Some(default_directive(false, false, configured))
    }

    pub fn apply_configured_level(&self, configured: &str) {
        let Some(directive) = self.configured_directive(configured) else {
            return;
        };
        if let Err(e) = self.filter.reload(EnvFilter::new(&directive)) {
            warn!("Failed to apply log level '{}': {}", directive, e);
        }
    }
}

/// Install the global subscriber before anything else logs. Logs go to
/// stderr so stdout carries only the report.
pub fn init_logging(verbose: bool, quiet: bool) -> LogHandle {
    let (env_filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (
            EnvFilter::new(default_directive(verbose, quiet, STARTUP_LEVEL)),
            false,
        ),
    };
    let (filter_layer, filter) = reload::Layer::new(env_filter);

    let subscriber = Registry::default().with(filter_layer).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    );
    tracing::subscriber::set_global_default(subscriber).ok();

    LogHandle {
        filter,
        verbose,
        quiet,
        from_env,
    }
}
