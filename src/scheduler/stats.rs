//! Scheduler counters.

use serde::Serialize;

use super::task::TaskKind;

/// Snapshot of what the drain loop has done so far.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub passes: u64,
    pub main_executed: u64,
    pub priority_executed: u64,
    pub microtask_executed: u64,
    pub timer_executed: u64,
    pub completion_executed: u64,
    pub check_executed: u64,
    pub close_executed: u64,
    pub failures: u64,
    pub cancelled_skipped: u64,
    pub completions_dropped: u64,
    pub drain_yields: u64,
    pub discarded_on_shutdown: u64,
}

impl SchedulerStats {
    pub(crate) fn record_executed(&mut self, kind: TaskKind) {
        match kind {
            TaskKind::Main => self.main_executed += 1,
            TaskKind::Priority => self.priority_executed += 1,
            TaskKind::Microtask => self.microtask_executed += 1,
            TaskKind::Timer => self.timer_executed += 1,
            TaskKind::Completion => self.completion_executed += 1,
            TaskKind::Check => self.check_executed += 1,
            TaskKind::Close => self.close_executed += 1,
        }
    }

    /// Tasks of `kind` that ran (successfully or not).
    pub fn executed(&self, kind: TaskKind) -> u64 {
        match kind {
            TaskKind::Main => self.main_executed,
            TaskKind::Priority => self.priority_executed,
            TaskKind::Microtask => self.microtask_executed,
            TaskKind::Timer => self.timer_executed,
            TaskKind::Completion => self.completion_executed,
            TaskKind::Check => self.check_executed,
            TaskKind::Close => self.close_executed,
        }
    }

    pub fn total_executed(&self) -> u64 {
        self.main_executed
            + self.priority_executed
            + self.microtask_executed
            + self.timer_executed
            + self.completion_executed
            + self.check_executed
            + self.close_executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let mut stats = SchedulerStats::default();
        stats.record_executed(TaskKind::Timer);
        stats.record_executed(TaskKind::Timer);
        stats.record_executed(TaskKind::Check);
        assert_eq!(stats.executed(TaskKind::Timer), 2);
        assert_eq!(stats.executed(TaskKind::Check), 1);
        assert_eq!(stats.total_executed(), 3);
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = SchedulerStats { passes: 3, ..Default::default() };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["passes"], 3);
        assert_eq!(json["failures"], 0);
    }
}
