//! Jobset identity and registry records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a jobset: the `(project, name)` pair that keys the
/// registry and every database query. Ordering is lexicographic on the
/// pair, project first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobsetName {
    pub project: String,
    pub name: String,
}

impl JobsetName {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for JobsetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.name)
    }
}

/// How a jobset wants to be scheduled, as stored in the `enabled`
/// column of the jobsets table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStyle {
    /// Evaluate on interval and on explicit trigger.
    Schedule,
    /// Scheduled the same way as `Schedule`; the distinction matters
    /// downstream of the evaluation, not here.
    OneShot,
    /// Interval-driven, but a new evaluation may not start while any
    /// build of the previous evaluation is unfinished.
    OneAtATime,
}

impl EvaluationStyle {
    /// Map the `enabled` column value. Unknown non-zero values mean
    /// the jobset takes no part in scheduling.
    pub fn from_db(enabled: i32) -> Option<Self> {
        match enabled {
            1 => Some(Self::Schedule),
            2 => Some(Self::OneShot),
            3 => Some(Self::OneAtATime),
            _ => None,
        }
    }
}

/// In-memory registry record for one jobset.
#[derive(Debug, Clone)]
pub struct Jobset {
    pub name: JobsetName,
    pub style: EvaluationStyle,
    /// Seconds since epoch of the last completed check; 0 if never.
    pub last_checked_time: i64,
    /// Instant at which an evaluation was explicitly requested, if
    /// one is outstanding. Cleared by the reaper after the next run.
    pub trigger_time: Option<i64>,
    /// Seconds between automatic evaluations; <= 0 disables them.
    pub check_interval: i64,
    /// Pid of the running evaluation child, if any.
    pub pid: Option<u32>,
}

impl Jobset {
    pub fn new(name: JobsetName, style: EvaluationStyle) -> Self {
        Self {
            name,
            style,
            last_checked_time: 0,
            trigger_time: None,
            check_interval: 0,
            pid: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}
