// src/exec/report.rs

//! Run reporting: one row per task with its final status, summarized as a
//! table and folded into the process exit code.

use std::fmt;

/// Terminal status of one task in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// An upstream task failed or was cancelled.
    Blocked,
    Cancelled,
    /// Outputs present and signature unchanged; no tool invocation.
    UpToDate,
    /// A dynamic guard converted the ready task to a skip.
    SkippedGuard,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::UpToDate => "up-to-date",
            TaskStatus::SkippedGuard => "skipped-guard",
        }
    }

    /// Does this status satisfy dependent tasks?
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::UpToDate)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub target: String,
    pub session: String,
    pub task: String,
    pub status: TaskStatus,
    pub note: String,
}

/// Accumulated result of one run (possibly several targets).
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub rows: Vec<ReportRow>,
    /// Target-level notes (skipped targets, build failures).
    pub target_notes: Vec<String>,
    /// True when a whole target failed to build.
    pub any_target_failed: bool,
}

impl RunReport {
    pub fn merge(&mut self, other: RunReport) {
        self.rows.extend(other.rows);
        self.target_notes.extend(other.target_notes);
        self.any_target_failed |= other.any_target_failed;
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }

    pub fn any_failed(&self) -> bool {
        self.any_target_failed
            || self
                .rows
                .iter()
                .any(|r| matches!(r.status, TaskStatus::Failed | TaskStatus::Blocked))
    }

    /// Every task either succeeded without work or was skipped by a guard.
    pub fn all_up_to_date(&self) -> bool {
        !self.rows.is_empty()
            && self
                .rows
                .iter()
                .all(|r| matches!(r.status, TaskStatus::UpToDate | TaskStatus::SkippedGuard))
    }

    /// 0 = success, 1 = partial failure. Fatal misconfiguration (exit 2) is
    /// decided above this layer, before a report exists.
    pub fn exit_code(&self) -> i32 {
        if self.any_failed() {
            1
        } else {
            0
        }
    }

    /// Plain-text summary table: (target, session, task, status, note).
    pub fn render(&self) -> String {
        if self.rows.is_empty() && self.target_notes.is_empty() {
            return "no work\n".to_string();
        }

        let mut out = String::new();
        let widths = self.column_widths();
        out.push_str(&format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  note\n",
            "target",
            "session",
            "task",
            "status",
            w0 = widths.0,
            w1 = widths.1,
            w2 = widths.2,
            w3 = widths.3,
        ));
        for row in &self.rows {
            out.push_str(&format!(
                "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {}\n",
                row.target,
                row.session,
                row.task,
                row.status,
                row.note,
                w0 = widths.0,
                w1 = widths.1,
                w2 = widths.2,
                w3 = widths.3,
            ));
        }
        for note in &self.target_notes {
            out.push_str(&format!("note: {note}\n"));
        }
        out
    }

    fn column_widths(&self) -> (usize, usize, usize, usize) {
        let mut widths = ("target".len(), "session".len(), "task".len(), "status".len());
        for row in &self.rows {
            widths.0 = widths.0.max(row.target.len());
            widths.1 = widths.1.max(row.session.len());
            widths.2 = widths.2.max(row.task.len());
            widths.3 = widths.3.max(row.status.as_str().len());
        }
        widths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(task: &str, status: TaskStatus) -> ReportRow {
        ReportRow {
            target: "m31".into(),
            session: "s1".into(),
            task: task.into(),
            status,
            note: String::new(),
        }
    }

    #[test]
    fn exit_codes_track_failures() {
        let mut report = RunReport::default();
        report.rows.push(row("a", TaskStatus::Succeeded));
        assert_eq!(report.exit_code(), 0);

        report.rows.push(row("b", TaskStatus::Failed));
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn blocked_counts_as_failure() {
        let mut report = RunReport::default();
        report.rows.push(row("a", TaskStatus::Blocked));
        assert!(report.any_failed());
    }

    #[test]
    fn all_up_to_date_detection() {
        let mut report = RunReport::default();
        assert!(!report.all_up_to_date());
        report.rows.push(row("a", TaskStatus::UpToDate));
        report.rows.push(row("b", TaskStatus::SkippedGuard));
        assert!(report.all_up_to_date());
        report.rows.push(row("c", TaskStatus::Succeeded));
        assert!(!report.all_up_to_date());
    }

    #[test]
    fn render_contains_all_columns() {
        let mut report = RunReport::default();
        report.rows.push(row("stack_m31", TaskStatus::Succeeded));
        let table = report.render();
        assert!(table.contains("target"));
        assert!(table.contains("stack_m31"));
        assert!(table.contains("succeeded"));
    }
}
