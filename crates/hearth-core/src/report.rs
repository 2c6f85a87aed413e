//! Failure reporting sink
//!
//! Public cache operations never return errors to their callers. Instead they
//! hand a [`Report`] to a [`Reporter`] and degrade to a sentinel value.

use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::CoreError;

/// Error type for parsing a report kind
#[derive(Debug, Clone)]
pub struct ParseReportKindError(String);

impl fmt::Display for ParseReportKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid report kind: {}", self.0)
    }
}

impl std::error::Error for ParseReportKindError {}

/// Category of a reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Cache tier or record store not connected
    NotReady,
    /// Missing node, entity or configuration
    NotFound,
    /// Field not declared by the node
    UnknownField,
    /// Duplicate registration or initialization
    Conflict,
    /// Undecodable packet or value
    Decode,
    /// Per-entity flush failure
    Sync,
    /// Any other operation failure
    Operation,
    /// Startup failure
    Initialization,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::NotReady => "not_ready",
            ReportKind::NotFound => "not_found",
            ReportKind::UnknownField => "unknown_field",
            ReportKind::Conflict => "conflict",
            ReportKind::Decode => "decode",
            ReportKind::Sync => "sync",
            ReportKind::Operation => "operation",
            ReportKind::Initialization => "initialization",
        }
    }

    /// Map an error onto the category it is reported under
    pub fn of(err: &CoreError) -> Self {
        match err {
            e if e.is_not_ready() => ReportKind::NotReady,
            CoreError::NotFound(_) => ReportKind::NotFound,
            CoreError::UnknownField { .. } => ReportKind::UnknownField,
            CoreError::InvalidValue { .. }
            | CoreError::MissingIdentifier(_)
            | CoreError::InvalidEntityId(_) => ReportKind::Decode,
            CoreError::AlreadyInitialized(_) => ReportKind::Conflict,
            CoreError::Database(e) if e.is_duplicate() => ReportKind::Conflict,
            _ => ReportKind::Operation,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ParseReportKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_ready" => Ok(ReportKind::NotReady),
            "not_found" => Ok(ReportKind::NotFound),
            "unknown_field" => Ok(ReportKind::UnknownField),
            "conflict" => Ok(ReportKind::Conflict),
            "decode" => Ok(ReportKind::Decode),
            "sync" => Ok(ReportKind::Sync),
            "operation" => Ok(ReportKind::Operation),
            "initialization" => Ok(ReportKind::Initialization),
            _ => Err(ParseReportKindError(s.to_string())),
        }
    }
}

/// A single reported failure
#[derive(Debug, Clone)]
pub struct Report {
    /// Correlation id, `HE-<unix-seconds>-<suffix>`
    pub id: String,
    pub kind: ReportKind,
    /// Where the failure happened, e.g. `profile.increment`
    pub context: String,
    pub message: String,
    pub cause: Option<String>,
}

impl Report {
    pub fn new(kind: ReportKind, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: report_id(),
            kind,
            context: context.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Build a report from an error, categorised by [`ReportKind::of`]
    pub fn from_error(context: impl Into<String>, err: &CoreError) -> Self {
        Self::new(ReportKind::of(err), context, err.to_string())
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// Generate a correlation id for a report
pub fn report_id() -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect::<String>()
        .to_uppercase();
    format!("HE-{}-{}", chrono::Utc::now().timestamp(), suffix)
}

/// Sink for failure reports
pub trait Reporter: Send + Sync {
    fn report(&self, report: Report);
}

/// Reporter that emits every report as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, report: Report) {
        let cause = report.cause.as_deref().unwrap_or("-");
        match report.kind {
            ReportKind::Sync | ReportKind::Operation | ReportKind::Initialization => error!(
                report_id = %report.id,
                kind = report.kind.as_str(),
                context = %report.context,
                cause = %cause,
                "{}",
                report.message
            ),
            _ => warn!(
                report_id = %report.id,
                kind = report.kind.as_str(),
                context = %report.context,
                cause = %cause,
                "{}",
                report.message
            ),
        }
    }
}

/// Reporter that keeps every report in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    pub fn count(&self, kind: ReportKind) -> usize {
        self.reports.lock().iter().filter(|r| r.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, report: Report) {
        self.reports.lock().push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_id_shape() {
        let id = report_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "HE");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 5);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ReportKind::NotReady,
            ReportKind::NotFound,
            ReportKind::UnknownField,
            ReportKind::Conflict,
            ReportKind::Decode,
            ReportKind::Sync,
            ReportKind::Operation,
            ReportKind::Initialization,
        ] {
            assert_eq!(kind.as_str().parse::<ReportKind>().unwrap(), kind);
        }
        assert!("fatal".parse::<ReportKind>().is_err());
    }

    #[test]
    fn test_kind_of_error() {
        assert_eq!(ReportKind::of(&CoreError::NotReady), ReportKind::NotReady);
        assert_eq!(
            ReportKind::of(&CoreError::Tier(hearth_tier::TierError::NotReady)),
            ReportKind::NotReady
        );
        assert_eq!(
            ReportKind::of(&CoreError::NotFound("node".into())),
            ReportKind::NotFound
        );
        assert_eq!(
            ReportKind::of(&CoreError::Database(hearth_db::DbError::Duplicate("x".into()))),
            ReportKind::Conflict
        );
        assert_eq!(
            ReportKind::of(&CoreError::Task("boom".into())),
            ReportKind::Operation
        );
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        assert!(reporter.is_empty());

        reporter.report(Report::new(ReportKind::Decode, "bridge", "bad packet").with_cause("eof"));
        reporter.report(Report::from_error("profile.get", &CoreError::NotReady));

        assert_eq!(reporter.count(ReportKind::Decode), 1);
        assert_eq!(reporter.count(ReportKind::NotReady), 1);
        assert_eq!(reporter.reports()[0].cause.as_deref(), Some("eof"));

        reporter.clear();
        assert!(reporter.is_empty());
    }
}
