//! Run-scoped structured logging.
//!
//! Components receive a [`RunLog`] at construction and emit events as
//! `component.event key=value ...` lines through the `log` facade. The binary
//! decides where they go; the library never installs a logger.

use std::fmt;
use std::sync::Arc;

use log::Level;

pub const TARGET: &str = "crossrecon";

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: Arc<str>,
    component: &'static str,
}

impl RunLog {
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id: String = run_id.into();
        Self {
            run_id: Arc::from(run_id),
            component: "run",
        }
    }

    /// Run id derived from the current time, e.g. `20261018T101500`.
    pub fn timestamped() -> Self {
        Self::new(chrono::Local::now().format("%Y%m%dT%H%M%S").to_string())
    }

    /// Same run, different component scope.
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            run_id: Arc::clone(&self.run_id),
            component,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn debug(&self, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.emit(Level::Debug, event, fields);
    }

    pub fn info(&self, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.emit(Level::Info, event, fields);
    }

    pub fn warn(&self, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.emit(Level::Warn, event, fields);
    }

    fn emit(&self, level: Level, event: &str, fields: &[(&str, &dyn fmt::Display)]) {
        if !log::log_enabled!(target: TARGET, level) {
            return;
        }
        log::log!(
            target: TARGET,
            level,
            "{}",
            render(&self.run_id, self.component, event, fields)
        );
    }
}

fn render(run_id: &str, component: &str, event: &str, fields: &[(&str, &dyn fmt::Display)]) -> String {
    let mut line = format!("{component}.{event} run={run_id}");
    for (key, value) in fields {
        let value = value.to_string();
        if value.is_empty() || value.contains(char::is_whitespace) {
            line.push_str(&format!(" {key}={value:?}"));
        } else {
            line.push_str(&format!(" {key}={value}"));
        }
    }
    line
}
