//! Child completion handling: records evaluation outcomes and frees
//! dispatcher slots.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::scheduler::{Evaluator, FinishedEval};

/// Consume completion reports for the life of the process.
pub async fn run_reaper(
    evaluator: Arc<Evaluator>,
    mut finished_rx: mpsc::UnboundedReceiver<FinishedEval>,
) {
    while let Some(finished) = finished_rx.recv().await {
        handle_finished(&evaluator, finished).await;
    }
}

/// Book a finished evaluation: in-memory state first, then the
/// database writeback. A database failure here is logged and
/// swallowed so a completed child can never wedge the scheduler.
pub(crate) async fn handle_finished(evaluator: &Evaluator, finished: FinishedEval) {
    let FinishedEval { name, pid, status } = finished;

    info!(jobset = %name, pid, status = %describe_status(status), "evaluation finished");

    let now = Utc::now().timestamp();
    {
        let mut state = evaluator.state.lock().await;
        debug_assert!(state.running_evals > 0);
        state.running_evals -= 1;

        if let Some(jobset) = state.jobsets.get_mut(&name) {
            jobset.trigger_time = None;
            jobset.last_checked_time = now;
            jobset.pid = None;
        }

        let error = eval_error_message(status);
        if let Err(e) = evaluator
            .store
            .record_finished(&name, now, error.as_deref())
            .await
        {
            error!(jobset = %name, error = %e, "failed to record evaluation outcome");
        }
    }

    evaluator.wakeup.notify_one();

    if evaluator.eval_one.is_some() {
        std::process::exit(0);
    }
}

/// Human-readable exit description; also embedded in the recorded
/// error message.
fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => match status.signal() {
            Some(signal) => format!("killed by signal {signal}"),
            None => "terminated abnormally".to_string(),
        },
    }
}

/// Exit 0 is success. Exit 1 means the evaluator already recorded its
/// own failure detail, so the scheduler stays silent. Anything else,
/// including death by signal, is a scheduler-visible error.
fn eval_error_message(status: ExitStatus) -> Option<String> {
    match status.code() {
        Some(0) | Some(1) => None,
        _ => Some(format!("evaluation {}", describe_status(status))),
    }
}
