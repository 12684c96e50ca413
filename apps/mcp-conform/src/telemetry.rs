pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Full `EnvFilter` directive string; replaces the level-derived default.
    pub const FILTER_ENV: &str = "MCP_CONFORM_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("invalid log filter {directives:?}: {reason}")]
        Filter { directives: String, reason: String },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Later calls are no-ops.
    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if GUARD.get().is_some() {
            return Ok(());
        }

        let override_directives = std::env::var(FILTER_ENV).ok();
        let filter = build_filter(config.level, override_directives.as_deref())?;
        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    /// Above `info`, only the harness's own targets get the extra verbosity;
    /// dependencies stay at `warn`.
    fn default_directives(level: LogLevel) -> &'static str {
        match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "warn,mcp_conform=info",
            LogLevel::Debug => "warn,mcp_conform=debug",
            LogLevel::Trace => "warn,mcp_conform=trace",
        }
    }

    fn build_filter(level: LogLevel, override_directives: Option<&str>) -> Result<EnvFilter, InitError> {
        let directives = override_directives.unwrap_or_else(|| default_directives(level));
        EnvFilter::try_new(directives).map_err(|err| InitError::Filter {
            directives: directives.to_string(),
            reason: err.to_string(),
        })
    }

}
