use std::fmt;

use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Which part of the system a notification comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Headline {
    Controller,
    Serial,
    Tcp,
}
impl fmt::Display for Headline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Headline::Controller => f.write_str("CONTROLLER"),
            Headline::Serial => f.write_str("SERIAL"),
            Headline::Tcp => f.write_str("TCP"),
        }
    }
}

/// Human-readable sink for protocol events, the console of whatever shell
/// drives the core.
pub trait Notify: Send + Sync {
    fn notify(&self, headline: Headline, severity: Severity, message: &str);
}

impl<F> Notify for F
where
    F: Fn(Headline, Severity, &str) + Send + Sync,
{
    fn notify(&self, headline: Headline, severity: Severity, message: &str) {
        self(headline, severity, message)
    }
}

/// Forwards notifications to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;
impl Notify for LogNotifier {
    fn notify(&self, headline: Headline, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "clinostat::notify", "{headline}: {message}"),
            Severity::Warning => warn!(target: "clinostat::notify", "{headline}: {message}"),
            Severity::Error => error!(target: "clinostat::notify", "{headline} ERROR: {message}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;
impl Notify for NullNotifier {
    fn notify(&self, _headline: Headline, _severity: Severity, _message: &str) {}
}
