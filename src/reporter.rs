// Reporting channel standing in for the excluded logging transport (§1, §10.2).
//
// Modeled after the donor's `ExecutionEvent`/`ProgressSender` pair: an unbounded mpsc
// channel of typed events, a thin sender wrapper that never panics on a dropped
// receiver, and the two report tables the walker is required to maintain (§3, §4.6).

use std::fmt;
use tokio::sync::mpsc;

pub type ReportSender = mpsc::UnboundedSender<ReportEvent>;
pub type ReportReceiver = mpsc::UnboundedReceiver<ReportEvent>;

pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub enum ReportEvent {
    Log {
        severity: Severity,
        message: String,
    },
    ActionRow {
        stage: String,
        index: usize,
        passed: bool,
        description: String,
    },
    StageRow {
        stage: String,
        passed: bool,
        description: String,
    },
}

/// Gates and forwards events; the single place §7's severity rules are applied.
pub struct Reporter {
    sender: ReportSender,
    debug_mode: bool,
    action_rows: Vec<(String, usize, bool, String)>,
    stage_rows: Vec<(String, bool, String)>,
}

impl Reporter {
    pub fn new(sender: ReportSender, debug_mode: bool) -> Self {
        Self {
            sender,
            debug_mode,
            action_rows: Vec::new(),
            stage_rows: Vec::new(),
        }
    }

    /// Debug events are suppressed unless `DEBUG_MODE` is set; warning and error
    /// events are always forwarded (§7).
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        if severity == Severity::Debug && !self.debug_mode {
            return;
        }
        let _ = self.sender.send(ReportEvent::Log {
            severity,
            message: message.into(),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Severity::Debug, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }

    /// Append a row to the per-action report table (`multilineReportMap`, §3) and
    /// forward it on the channel.
    pub fn action_row(
        &mut self,
        stage: impl Into<String>,
        index: usize,
        passed: bool,
        description: impl Into<String>,
    ) {
        let stage = stage.into();
        let description = description.into();
        self.action_rows
            .push((stage.clone(), index, passed, description.clone()));
        let _ = self.sender.send(ReportEvent::ActionRow {
            stage,
            index,
            passed,
            description,
        });
    }

    /// Append a row to the per-stage report table (`multilineReportStagesMap`, §3).
    pub fn stage_row(&mut self, stage: impl Into<String>, passed: bool, description: impl Into<String>) {
        let stage = stage.into();
        let description = description.into();
        self.stage_rows.push((stage.clone(), passed, description.clone()));
        let _ = self.sender.send(ReportEvent::StageRow {
            stage,
            passed,
            description,
        });
    }

    pub fn action_table(&self) -> &[(String, usize, bool, String)] {
        &self.action_rows
    }

    pub fn stage_table(&self) -> &[(String, bool, String)] {
        &self.stage_rows
    }

    /// Render the action report table the way the donor rendered its string forms,
    /// one row per line.
    pub fn render_action_table(&self) -> String {
        self.action_rows
            .iter()
            .map(|(stage, idx, passed, desc)| {
                format!("{}[{}]: {}: {}", stage, idx, status_word(*passed), desc)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_stage_table(&self) -> String {
        self.stage_rows
            .iter()
            .map(|(stage, passed, desc)| format!("{}: {}: {}", stage, status_word(*passed), desc))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn status_word(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("debug_mode", &self.debug_mode)
            .field("action_rows", &self.action_rows.len())
            .field("stage_rows", &self.stage_rows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debug_events_suppressed_without_debug_mode() {
        let (tx, mut rx) = report_channel();
        let reporter = Reporter::new(tx, false);
        reporter.debug("hidden");
        reporter.warning("shown");
        drop(reporter);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ReportEvent::Log { severity: Severity::Warning, .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn debug_events_forwarded_with_debug_mode() {
        let (tx, mut rx) = report_channel();
        let reporter = Reporter::new(tx, true);
        reporter.debug("visible");
        drop(reporter);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ReportEvent::Log { severity: Severity::Debug, .. }));
    }

    #[test]
    fn report_tables_render_one_row_per_line() {
        let (tx, _rx) = report_channel();
        let mut reporter = Reporter::new(tx, false);
        reporter.action_row("build", 0, true, "a1: artifacts");
        reporter.action_row("build", 1, false, "a2: script");
        assert_eq!(
            reporter.render_action_table(),
            "build[0]: PASS: a1: artifacts\nbuild[1]: FAIL: a2: script"
        );
    }
}
