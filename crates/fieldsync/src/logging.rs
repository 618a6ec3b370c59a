//! Logging setup for fieldsync.
//!
//! Library code only emits `tracing` events. Binaries (and tests) install a
//! subscriber here. Output goes to stderr so command output on stdout stays
//! machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise.
const NOISY_DEPENDENCIES: &[&str] = &["reqwest", "hyper", "hyper_util", "rustls"];

/// How much the binary logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything, including connectivity probes.
    Trace,
}

impl Verbosity {
    /// Derive the verbosity from `-v` count and `-q` flags; `-q` wins.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level emitted at this verbosity.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directives used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_directives(self) -> String {
        let mut directives = vec![format!("fieldsync={}", self.level())];
        directives.extend(NOISY_DEPENDENCIES.iter().map(|krate| format!("{krate}=warn")));
        directives.join(",")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the verbosity-derived filter. Calling this
/// more than once is harmless; only the first call takes effect.
///
/// # Examples
///
/// ```no_run
/// use fieldsync::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(1, false));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directives()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= Verbosity::Verbose)
                .with_line_number(verbosity == Verbosity::Trace),
        )
        .try_init();
}

/// Install a subscriber that writes through the test harness.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fieldsync=debug")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(0, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(1, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(5, false), Verbosity::Trace);
        assert_eq!(Verbosity::from_flags(2, true), Verbosity::Quiet);
    }

    #[test]
    fn test_level() {
        assert_eq!(Verbosity::Quiet.level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.level(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.level(), Level::TRACE);
    }

    #[test]
    fn test_default_directives() {
        let directives = Verbosity::Verbose.default_directives();
        assert!(directives.starts_with("fieldsync=DEBUG"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_ordering() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Trace > Verbosity::Verbose);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Trace);
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        tracing::debug!("test logging initialized");
    }
}
