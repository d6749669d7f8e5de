use clap::ValueEnum;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }

    /// Level for the agent's single-digit debug argument.
    pub fn from_debug_digit(digit: u8) -> Self {
        match digit {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// `--log-level` if given, else the debug digit, else info.
    pub fn resolve(explicit: Option<LogLevel>, debug_digit: Option<u8>) -> Self {
        explicit
            .or(debug_digit.map(LogLevel::from_debug_digit))
            .unwrap_or(LogLevel::Info)
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_digits_raise_verbosity() {
        assert_eq!(LogLevel::from_debug_digit(0), LogLevel::Info);
        assert_eq!(LogLevel::from_debug_digit(1), LogLevel::Debug);
        assert_eq!(LogLevel::from_debug_digit(9), LogLevel::Trace);
    }

    #[test]
    fn explicit_level_wins() {
        assert_eq!(LogLevel::resolve(Some(LogLevel::Warn), Some(2)), LogLevel::Warn);
        assert_eq!(LogLevel::resolve(None, Some(0)), LogLevel::Info);
        assert_eq!(LogLevel::resolve(None, None), LogLevel::Info);
    }
}
