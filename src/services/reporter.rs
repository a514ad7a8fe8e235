//! Error/analytics sink consumed by the workers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// CRM/ERP record synchronization
    RecordSync,
    /// Photo binary upload
    PhotoUpload,
    /// Local queue store
    Storage,
}

/// What was being done when an error was reported
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: String,
    pub action: String,
    pub item_id: Option<String>,
    pub object_id: Option<String>,
    pub attempt: Option<u32>,
}

impl ErrorContext {
    pub fn new(component: &str, action: &str) -> Self {
        Self {
            component: component.to_string(),
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }

    pub fn object(mut self, object_id: &str) -> Self {
        self.object_id = Some(object_id.to_string());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Fire-and-forget reporting; implementations must never fail back into the caller
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &str, context: &ErrorContext, severity: Severity, category: ErrorCategory);

    /// Non-error outcome worth recording (e.g. a finished upload)
    fn track(&self, event: &str, context: &ErrorContext) {
        log::debug!("{} [{} / {}]", event, context.component, context.action);
    }
}

/// Reporter that writes to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &str, context: &ErrorContext, severity: Severity, category: ErrorCategory) {
        let level = match severity {
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Critical => log::Level::Error,
        };
        log::log!(
            level,
            "[{:?}] {} during {}/{} (item={:?}, object={:?}, attempt={:?}): {}",
            category,
            severity_label(severity),
            context.component,
            context.action,
            context.item_id,
            context.object_id,
            context.attempt,
            error
        );
    }

    fn track(&self, event: &str, context: &ErrorContext) {
        log::info!(
            "{} [{} / {}] item={:?} object={:?}",
            event,
            context.component,
            context.action,
            context.item_id,
            context.object_id
        );
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Critical => "critical",
    }
}
