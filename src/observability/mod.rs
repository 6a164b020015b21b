//! Structured logging for the compilation pipeline.
//!
//! One log line is one JSON object with deterministic key ordering:
//! `event` first, then `severity`, then caller fields sorted by key.
//! Error lines go to stderr, everything else to stdout. Logging is
//! synchronous and unbuffered, so lines interleave cleanly with
//! whatever the process prints around them.

use std::fmt;
use std::io::{self, Write};

/// Log severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-pass detail: decisions, rewrites, slot counts.
    Trace = 0,
    /// Normal operations.
    Info = 1,
    /// Recoverable issues.
    Warn = 2,
    /// Operation failures.
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// JSON-line logger with deterministic field ordering.
pub struct Logger;

impl Logger {
    /// Logs one event to stdout.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        Self::log_to_writer(severity, event, fields, &mut io::stdout());
    }

    /// Logs one event to stderr (used for operation failures).
    pub fn log_stderr(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        Self::log_to_writer(severity, event, fields, &mut io::stderr());
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log_stderr(Severity::Error, event, fields);
    }

    /// Writes one event to an arbitrary writer. Exposed for tests that
    /// capture output.
    pub fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        let mut output = String::with_capacity(256);
        output.push_str("{\"event\":\"");
        Self::escape_json_string(&mut output, event);
        output.push_str("\",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(key, _)| *key);
        for (key, value) in sorted_fields {
            output.push_str(",\"");
            Self::escape_json_string(&mut output, key);
            output.push_str("\":\"");
            Self::escape_json_string(&mut output, value);
            output.push('"');
        }

        output.push_str("}\n");
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.flush();
    }

    fn escape_json_string(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut buffer = Vec::new();
        Logger::log_to_writer(severity, event, fields, &mut buffer);
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_fields_are_sorted_and_the_event_leads() {
        let line = capture(
            Severity::Trace,
            "ACCESS_DECISION",
            &[("scope", "User"), ("kind", "filtered"), ("operation", "read")],
        );
        assert_eq!(
            line,
            "{\"event\":\"ACCESS_DECISION\",\"severity\":\"TRACE\",\
             \"kind\":\"filtered\",\"operation\":\"read\",\"scope\":\"User\"}\n"
        );
    }

    #[test]
    fn test_values_are_escaped() {
        let line = capture(Severity::Error, "COMPILE_FAILED", &[("error", "a\"b\nc")]);
        assert!(line.contains("a\\\"b\\nc"));
        assert!(line.ends_with("}\n"));
    }

    /// Error lines bound for stderr keep the shared wire format.
    #[test]
    fn test_error_lines_keep_the_wire_format() {
        let line = capture(
            Severity::Error,
            "COMPILE_REJECTED",
            &[("stage", "auth"), ("error", "denied")],
        );
        assert_eq!(
            line,
            "{\"event\":\"COMPILE_REJECTED\",\"severity\":\"ERROR\",\
             \"error\":\"denied\",\"stage\":\"auth\"}\n"
        );
    }

    #[test]
    fn test_severities_order_by_importance() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert_eq!(Severity::Warn.to_string(), "WARN");
    }
}
