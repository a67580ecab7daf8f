//! Shared scheduler state.

use std::collections::BTreeMap;

use hydra_core::{Jobset, JobsetName};

/// Mutable state shared by the dispatcher, the registry monitor, and
/// the reaper. Guarded by the evaluator's mutex.
#[derive(Debug, Default)]
pub struct State {
    /// Number of evaluation children currently alive. Equals the
    /// number of registry entries with a pid and never exceeds the
    /// configured concurrency cap.
    pub running_evals: usize,
    /// The jobset registry, keyed by `(project, name)`.
    pub jobsets: BTreeMap<JobsetName, Jobset>,
}

impl State {
    /// Invariant check used by tests: the running counter matches the
    /// number of registry entries with a live child.
    pub fn running_matches_pids(&self) -> bool {
        self.running_evals == self.jobsets.values().filter(|j| j.is_running()).count()
    }
}
