//! Logging and progress for the CLI.
//!
//! [`Notifier`] installs `env_logger` as the global logger and, at the quiet
//! level, shows an `indicatif` spinner naming the current step:
//! - [`VerbosityLevel::Quiet`]: warnings only, steps go to the spinner.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`]:
//!   plain logs, steps are logged at info level.
//!
//! `RUST_LOG` still overrides the filter for individual modules.

use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0,
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    spinner: Option<ProgressBar>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        // A second notifier in the same process keeps the first logger
        let _ = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .try_init();

        let spinner = (verbosity == VerbosityLevel::Quiet).then(|| {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });

        Self { verbosity, spinner }
    }

    /// Reports the step now running.
    pub fn step(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(message.to_string()),
            None => info!("{}", message),
        }
    }

    /// Runs `f` with the spinner hidden, for commands that write to the
    /// terminal themselves.
    pub fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.spinner {
            Some(spinner) => spinner.suspend(f),
            None => f(),
        }
    }

    /// Clears the spinner, if any.
    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.finish();
    }
}
