use crate::infrastructure::error::{CliError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub default_level: tracing::Level,
    /// Level for the session and core crates
    pub library_level: tracing::Level,
    pub show_spans: bool,
    pub show_thread_ids: bool,
    pub show_targets: bool,
    pub show_logs: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: tracing::Level::INFO,
            library_level: tracing::Level::DEBUG,
            show_spans: false,
            show_thread_ids: false,
            show_targets: true,
            show_logs: true,
        }
    }
}

impl LogConfig {
    /// Development configuration (verbose, human-readable)
    pub fn dev() -> Self {
        Self {
            default_level: tracing::Level::DEBUG,
            library_level: tracing::Level::TRACE,
            show_spans: true,
            show_thread_ids: true,
            ..Default::default()
        }
    }

    /// Warnings only, so chat output stays readable
    pub fn quiet() -> Self {
        Self {
            default_level: tracing::Level::WARN,
            library_level: tracing::Level::WARN,
            show_targets: false,
            ..Default::default()
        }
    }

    /// Preset for a `-v` count: none is quiet, one is the default, more is dev
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => Self::quiet(),
            1 => Self::default(),
            _ => Self::dev(),
        }
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn without_logs(mut self) -> Self {
        self.show_logs = false;
        self
    }

    /// Filter used when `RUST_LOG` is not set
    pub fn filter_directives(&self) -> String {
        format!(
            "snapshare={},snapshare_cli={},snapshare_p2p={},snapshare_core={}",
            self.default_level, self.default_level, self.library_level, self.library_level
        )
    }

    pub fn init(self) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directives()));

        let registry = tracing_subscriber::registry().with(env_filter);

        if self.show_logs {
            let span_events = if self.show_spans {
                fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
            } else {
                fmt::format::FmtSpan::NONE
            };
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(self.show_targets)
                .with_thread_ids(self.show_thread_ids)
                .with_span_events(span_events);

            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| CliError::Logging(e.to_string()))
        } else {
            registry
                .try_init()
                .map_err(|e| CliError::Logging(e.to_string()))
        }
    }
}
