//! Progress reporting for anser.
//!
//! The pipeline is stateless: a [`ProgressReporter`] travels in the
//! conversion context instead of any global sink. Two implementations are
//! provided, a no-op for library use and a terminal renderer for the CLI.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

/// Output verbosity of the terminal reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// No output at all.
    Silent,
    /// Live progress that is cleared once a step finishes.
    #[default]
    Transient,
    /// Progress lines stay on screen.
    Normal,
}

/// Capability interface for step-level progress.
///
/// Implementations must be cheap to call; stages invoke `step_begin` /
/// `step_end` around every named pipeline step and `tick` per processed
/// group.
pub trait ProgressReporter: Send + Sync {
    /// A named step starts. `total` is the number of expected ticks, if
    /// known.
    fn step_begin(&self, name: &str, total: Option<u64>);

    /// One unit of work within the current step finished.
    fn tick(&self) {}

    /// The current step finished.
    fn step_end(&self, name: &str);
}

/// Reporter that swallows everything.
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step_begin(&self, _name: &str, _total: Option<u64>) {}

    fn step_end(&self, _name: &str) {}
}

/// Terminal reporter backed by an indicatif spinner / bar.
pub struct TerminalProgress {
    verbosity: Verbosity,
    current: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    /// Create a terminal reporter with the given verbosity.
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            current: Mutex::new(None),
        }
    }

    fn make_bar(&self, name: &str, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template("{msg:<42} {bar:30} {pos}/{len}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.enable_steady_tick(std::time::Duration::from_millis(120));
                bar
            }
        };
        bar.set_message(name.to_string());
        bar
    }
}

impl ProgressReporter for TerminalProgress {
    fn step_begin(&self, name: &str, total: Option<u64>) {
        if self.verbosity == Verbosity::Silent {
            return;
        }
        let bar = self.make_bar(name, total);
        *self.current.lock().expect("progress lock poisoned") = Some(bar);
    }

    fn tick(&self) {
        if let Some(bar) = self
            .current
            .lock()
            .expect("progress lock poisoned")
            .as_ref()
        {
            bar.inc(1);
        }
    }

    fn step_end(&self, name: &str) {
        let mut guard = self.current.lock().expect("progress lock poisoned");
        if let Some(bar) = guard.take() {
            match self.verbosity {
                Verbosity::Silent => {}
                Verbosity::Transient => bar.finish_and_clear(),
                Verbosity::Normal => bar.finish_with_message(format!("{name} - done")),
            }
        }
    }
}

impl std::fmt::Debug for TerminalProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalProgress")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}
