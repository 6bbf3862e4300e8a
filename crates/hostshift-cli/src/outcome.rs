use std::process::ExitCode;

use hostshift_backup::{JournalRecord, RollbackOutcome};

/// Process exit status of `hostshift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionExit {
    Converted,
    /// The conversion failed and every change was undone.
    RolledBack,
    /// The conversion failed and at least one change could not be undone.
    RollbackIncomplete,
    /// Bad usage or configuration, detected before the host was touched.
    UsageError,
}

impl ConversionExit {
    pub fn code(self) -> u8 {
        match self {
            Self::Converted => 0,
            Self::RolledBack => 1,
            Self::RollbackIncomplete => 2,
            Self::UsageError => 3,
        }
    }

    pub fn from_rollback(outcome: &RollbackOutcome) -> Self {
        if outcome.is_clean() {
            Self::RolledBack
        } else {
            Self::RollbackIncomplete
        }
    }
}

impl From<ConversionExit> for ExitCode {
    fn from(value: ConversionExit) -> Self {
        ExitCode::from(value.code())
    }
}

pub fn rollback_summary_lines(outcome: &RollbackOutcome, internal_error: bool) -> Vec<String> {
    let report = outcome.report();
    let mut lines = Vec::new();
    if internal_error {
        lines.push(
            "the conversion stopped on an internal error; please report it with the log file"
                .to_string(),
        );
    }

    match outcome {
        RollbackOutcome::RolledBack(_) => lines.push(format!(
            "rollback complete: {} change(s) undone, {} with nothing to undo",
            report.restored.len(),
            report.skipped.len()
        )),
        RollbackOutcome::ManualInterventionRequired(_) => {
            lines.push(format!(
                "rollback incomplete: {} of {} change(s) could not be undone; manual intervention required",
                report.failures.len(),
                report.attempted()
            ));
            for failure in &report.failures {
                lines.push(format!("  failed to restore {}: {}", failure.item, failure.error));
            }
        }
    }
    lines
}

pub fn format_journal_record(record: &JournalRecord) -> String {
    let event = serde_json::to_value(record.event)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", record.event));
    let mut line = format!("{:>4} {:<9}", record.seq, event);
    if let Some(item) = &record.item {
        line.push(' ');
        line.push_str(item);
    }
    if let Some(detail) = &record.detail {
        line.push_str(&format!(" ({detail})"));
    }
    line.trim_end().to_string()
}
