//! The evaluation dispatcher: keeps the jobset registry, decides
//! which jobsets may run, and launches evaluation children up to the
//! concurrency cap.

use std::collections::btree_map::Entry;
use std::collections::BTreeSet;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hydra_core::{dispatch_order, eligibility, next_wakeup, Eligibility, JobsetName};
use hydra_db::{DbResult, JobsetStore};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info};

use crate::config::EvaluatorConfig;
use crate::error::{EvalError, EvalResult};
use crate::state::State;

/// Completion report sent by a child waiter task to the reaper.
#[derive(Debug)]
pub struct FinishedEval {
    pub name: JobsetName,
    pub pid: u32,
    pub status: ExitStatus,
}

/// The scheduler. One shared instance drives the dispatcher loop, the
/// registry monitor, and the reaper.
pub struct Evaluator {
    pub(crate) config: EvaluatorConfig,
    pub(crate) store: Arc<dyn JobsetStore>,
    pub(crate) state: Mutex<State>,
    /// Signalled by the monitor on registry changes and by the reaper
    /// on child completion; awaited by the dispatcher.
    pub(crate) wakeup: Notify,
    finished_tx: mpsc::UnboundedSender<FinishedEval>,
    /// When set, only this jobset is synced and scheduled, the
    /// eligibility check is bypassed, and the process exits after its
    /// single evaluation completes.
    pub(crate) eval_one: Option<JobsetName>,
}

impl Evaluator {
    pub fn new(
        config: EvaluatorConfig,
        store: Arc<dyn JobsetStore>,
        eval_one: Option<JobsetName>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FinishedEval>) {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let evaluator = Arc::new(Self {
            config,
            store,
            state: Mutex::new(State::default()),
            wakeup: Notify::new(),
            finished_tx,
            eval_one,
        });
        (evaluator, finished_rx)
    }

    /// Replace the registry with the store's current enabled-jobsets
    /// snapshot, in one critical section.
    ///
    /// Entries keep their pid across syncs. An entry that disappeared
    /// from the store while its child runs is kept until the reaper
    /// clears the pid; the next sync after that drops it.
    pub async fn sync_registry(&self) -> DbResult<()> {
        let rows = self.store.load_enabled().await?;

        let mut state = self.state.lock().await;
        let mut seen = BTreeSet::new();

        for row in rows {
            let name = row.jobset_name();
            if let Some(only) = &self.eval_one {
                if name != *only {
                    continue;
                }
            }
            let Some(fresh) = row.to_jobset() else {
                continue;
            };
            match state.jobsets.entry(name.clone()) {
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.style = fresh.style;
                    existing.last_checked_time = fresh.last_checked_time;
                    existing.trigger_time = fresh.trigger_time;
                    existing.check_interval = fresh.check_interval;
                }
                Entry::Vacant(entry) => {
                    entry.insert(fresh);
                }
            }
            seen.insert(name);
        }

        if self.eval_one.is_some() && seen.is_empty() {
            error!("the specified jobset does not exist");
            std::process::exit(1);
        }

        state.jobsets.retain(|name, jobset| {
            if seen.contains(name) {
                return true;
            }
            if jobset.is_running() {
                debug!(jobset = %name, "jobset disappeared while evaluating, removal deferred");
                return true;
            }
            info!(jobset = %name, "forgetting jobset");
            false
        });

        Ok(())
    }

    /// One dispatch pass: order the eligible jobsets and start
    /// children until the concurrency cap is reached.
    pub async fn dispatch(&self) -> EvalResult<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now().timestamp();

        let mut runnable: Vec<JobsetName> = Vec::new();
        for jobset in state.jobsets.values() {
            if self.eval_one.is_some() {
                if !jobset.is_running() {
                    runnable.push(jobset.name.clone());
                }
                continue;
            }
            match eligibility(jobset, now) {
                Eligibility::No => {}
                Eligibility::Ready => runnable.push(jobset.name.clone()),
                Eligibility::ReadyIfIdle => {
                    if self.store.previous_eval_busy(&jobset.name).await? {
                        debug!(jobset = %jobset.name, "previous evaluation still has unfinished builds");
                    } else {
                        runnable.push(jobset.name.clone());
                    }
                }
            }
        }

        runnable.sort_by(|a, b| dispatch_order(&state.jobsets[a], &state.jobsets[b]));

        for name in runnable {
            if state.running_evals >= self.config.max_concurrent_evals {
                break;
            }
            self.start_eval(&mut state, &name, now).await?;
        }

        Ok(())
    }

    /// Launch one evaluation child. Called with the state lock held.
    async fn start_eval(&self, state: &mut State, name: &JobsetName, now: i64) -> EvalResult<()> {
        let Some(jobset) = state.jobsets.get_mut(name) else {
            return Ok(());
        };

        info!(
            jobset = %name,
            last_checked_secs_ago = now - jobset.last_checked_time,
            "starting evaluation"
        );

        self.store.mark_started(name, now).await?;

        let mut child = Command::new(&self.config.eval_program)
            .arg(&name.project)
            .arg(&name.name)
            .spawn()
            .map_err(|source| EvalError::Spawn {
                program: self.config.eval_program.clone(),
                source,
            })?;

        let pid = child.id().expect("child should have pid");
        jobset.pid = Some(pid);
        state.running_evals += 1;

        // The waiter task owns the child handle and reports its exit
        // exactly once; the reaper never waits on a pid it did not
        // get handed this way.
        let finished_tx = self.finished_tx.clone();
        let name = name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let _ = finished_tx.send(FinishedEval { name, pid, status });
                }
                Err(e) => {
                    error!(jobset = %name, error = %e, "waiting for evaluation child failed");
                    std::process::exit(1);
                }
            }
        });

        Ok(())
    }

    /// Main dispatcher loop: sleep until the nearest jobset can
    /// become due or until woken, then run a dispatch pass. Any error
    /// is logged and retried after a pause.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.dispatch_loop().await {
                error!(error = %e, "dispatcher error");
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    }

    async fn dispatch_loop(&self) -> EvalResult<()> {
        loop {
            let sleep_time = {
                let state = self.state.lock().await;
                let now = Utc::now().timestamp();
                let slots_free = state.running_evals < self.config.max_concurrent_evals;
                next_wakeup(state.jobsets.values(), now, slots_free)
            };

            match sleep_time {
                Some(duration) => {
                    debug!(seconds = duration.as_secs(), "waiting for next due jobset");
                    let _ = tokio::time::timeout(duration, self.wakeup.notified()).await;
                }
                None => {
                    debug!("waiting for work");
                    self.wakeup.notified().await;
                }
            }

            self.dispatch().await?;
        }
    }
}
