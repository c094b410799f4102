use crate::story::audit;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Where user-visible warnings and failures end up.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, code: &str, message: &str);
}

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn format_line(severity: Severity, code: &str, message: &str) -> String {
    format!(
        "STORY_WARN severity={} code={} message={}",
        severity.as_str(),
        sanitize_value(code),
        sanitize_value(message),
    )
}

/// Writes `STORY_WARN` lines to stderr and mirrors them into the audit log.
#[derive(Debug, Clone, Default)]
pub struct StderrNotifier {
    audit_log: Option<PathBuf>,
}

impl StderrNotifier {
    pub fn new(audit_log: Option<PathBuf>) -> Self {
        Self { audit_log }
    }
}

impl Notifier for StderrNotifier {
    fn notify(&self, severity: Severity, code: &str, message: &str) {
        eprintln!("{}", format_line(severity, code, message));
        let Some(log) = &self.audit_log else {
            return;
        };
        if let Err(err) = audit::append_event(log, "notify", severity.as_str(), message) {
            tracing::warn!(error = %err, log = %log.display(), "failed to append audit event");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("a b\tc\n"), "a_b_c");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("   "), "na");
    }

    #[test]
    fn line_carries_severity_and_code() {
        let line = format_line(Severity::Error, "E006_SAVE_FAILED", "gave up saving stories.json");
        assert_eq!(
            line,
            "STORY_WARN severity=error code=E006_SAVE_FAILED message=gave_up_saving_stories.json"
        );
    }
}
