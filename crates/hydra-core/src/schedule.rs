//! The database-free part of the scheduling decision: which jobsets
//! may start an evaluation, in what order, and how long the
//! dispatcher may sleep before the next one becomes due.

use std::cmp::Ordering;
use std::time::Duration;

use tracing::debug;

use crate::jobset::{EvaluationStyle, Jobset};

/// Outcome of the eligibility check for one jobset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Not eligible right now.
    No,
    /// Start an evaluation.
    Ready,
    /// Due, but one-at-a-time: start only if the previous evaluation
    /// has no unfinished builds. The caller owns that probe.
    ReadyIfIdle,
}

/// Decide whether `jobset` may start an evaluation at `now`.
///
/// An explicit trigger always wins. Otherwise the check interval must
/// be positive and elapsed, and one-at-a-time jobsets additionally
/// defer to the backlog probe.
pub fn eligibility(jobset: &Jobset, now: i64) -> Eligibility {
    if jobset.pid.is_some() {
        debug!(jobset = %jobset.name, "not eligible: already running");
        return Eligibility::No;
    }

    if jobset.trigger_time.is_some() {
        debug!(jobset = %jobset.name, "eligible: evaluation requested");
        return Eligibility::Ready;
    }

    if jobset.check_interval <= 0 {
        // Automatic scheduling is disabled; only explicit triggers
        // ever start this jobset.
        debug!(jobset = %jobset.name, "not eligible: automatic scheduling disabled");
        return Eligibility::No;
    }

    if jobset.last_checked_time + jobset.check_interval > now {
        debug!(jobset = %jobset.name, "not eligible: not due yet");
        return Eligibility::No;
    }

    match jobset.style {
        EvaluationStyle::Schedule | EvaluationStyle::OneShot => {
            debug!(jobset = %jobset.name, "eligible: check interval elapsed");
            Eligibility::Ready
        }
        EvaluationStyle::OneAtATime => Eligibility::ReadyIfIdle,
    }
}

/// Order eligible jobsets for launch: ascending trigger time (real
/// trigger instants before untriggered), then stalest last-checked
/// time, then name.
pub fn dispatch_order(a: &Jobset, b: &Jobset) -> Ordering {
    let a_trigger = a.trigger_time.unwrap_or(i64::MAX);
    let b_trigger = b.trigger_time.unwrap_or(i64::MAX);
    a_trigger
        .cmp(&b_trigger)
        .then(a.last_checked_time.cmp(&b.last_checked_time))
        .then_with(|| a.name.cmp(&b.name))
}

/// How long the dispatcher may sleep before some jobset can become
/// due. `None` means wait indefinitely: the concurrency cap is
/// reached, or no idle jobset has automatic scheduling enabled.
pub fn next_wakeup<'a, I>(jobsets: I, now: i64, slots_free: bool) -> Option<Duration>
where
    I: IntoIterator<Item = &'a Jobset>,
{
    if !slots_free {
        return None;
    }
    jobsets
        .into_iter()
        .filter(|j| j.pid.is_none() && j.check_interval > 0)
        .map(|j| (j.last_checked_time + j.check_interval - now).max(1) as u64)
        .min()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobset::JobsetName;

    const NOW: i64 = 1_000_000;

    fn jobset(name: &str, style: EvaluationStyle) -> Jobset {
        Jobset::new(JobsetName::new("proj", name), style)
    }

    #[test]
    fn running_jobset_is_never_eligible() {
        let mut j = jobset("a", EvaluationStyle::Schedule);
        j.trigger_time = Some(NOW - 10);
        j.pid = Some(42);
        assert_eq!(eligibility(&j, NOW), Eligibility::No);
    }

    #[test]
    fn trigger_wins_over_disabled_interval() {
        let mut j = jobset("a", EvaluationStyle::Schedule);
        j.check_interval = 0;
        j.trigger_time = Some(NOW - 5);
        assert_eq!(eligibility(&j, NOW), Eligibility::Ready);
    }

    #[test]
    fn disabled_interval_without_trigger_never_runs() {
        let mut j = jobset("a", EvaluationStyle::Schedule);
        j.check_interval = 0;
        j.last_checked_time = 0;
        assert_eq!(eligibility(&j, NOW), Eligibility::No);

        j.check_interval = -1;
        assert_eq!(eligibility(&j, NOW), Eligibility::No);
    }

    #[test]
    fn not_due_until_interval_elapses() {
        let mut j = jobset("a", EvaluationStyle::Schedule);
        j.check_interval = 60;
        j.last_checked_time = NOW - 59;
        assert_eq!(eligibility(&j, NOW), Eligibility::No);

        j.last_checked_time = NOW - 60;
        assert_eq!(eligibility(&j, NOW), Eligibility::Ready);
    }

    #[test]
    fn oneshot_shares_the_interval_branch() {
        let mut j = jobset("a", EvaluationStyle::OneShot);
        j.check_interval = 60;
        j.last_checked_time = NOW - 61;
        assert_eq!(eligibility(&j, NOW), Eligibility::Ready);
    }

    #[test]
    fn one_at_a_time_defers_to_backlog_probe() {
        let mut j = jobset("a", EvaluationStyle::OneAtATime);
        j.check_interval = 60;
        j.last_checked_time = NOW - 61;
        assert_eq!(eligibility(&j, NOW), Eligibility::ReadyIfIdle);

        // An explicit trigger does not wait for the backlog.
        j.trigger_time = Some(NOW - 1);
        assert_eq!(eligibility(&j, NOW), Eligibility::Ready);
    }

    #[test]
    fn triggered_jobsets_sort_before_untriggered() {
        let mut a = jobset("a", EvaluationStyle::Schedule);
        let mut b = jobset("b", EvaluationStyle::Schedule);
        let mut c = jobset("c", EvaluationStyle::Schedule);
        a.trigger_time = Some(10);
        b.trigger_time = Some(20);
        c.trigger_time = None;
        c.last_checked_time = 0;

        let mut sorted = vec![&c, &b, &a];
        sorted.sort_by(|x, y| dispatch_order(x, y));
        let names: Vec<_> = sorted.iter().map(|j| j.name.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn untriggered_jobsets_sort_stalest_first_then_by_name() {
        let mut a = jobset("a", EvaluationStyle::Schedule);
        let mut b = jobset("b", EvaluationStyle::Schedule);
        let mut c = jobset("c", EvaluationStyle::Schedule);
        a.last_checked_time = 500;
        b.last_checked_time = 100;
        c.last_checked_time = 100;

        let mut sorted = vec![&a, &c, &b];
        sorted.sort_by(|x, y| dispatch_order(x, y));
        let names: Vec<_> = sorted.iter().map(|j| j.name.name.as_str()).collect();
        assert_eq!(names, ["b", "c", "a"]);
    }

    #[test]
    fn wakeup_is_min_over_idle_scheduled_jobsets() {
        let mut a = jobset("a", EvaluationStyle::Schedule);
        a.check_interval = 300;
        a.last_checked_time = NOW - 100;
        let mut b = jobset("b", EvaluationStyle::Schedule);
        b.check_interval = 60;
        b.last_checked_time = NOW - 30;

        let jobsets = [a, b];
        assert_eq!(
            next_wakeup(jobsets.iter(), NOW, true),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn wakeup_is_clamped_to_one_second_when_overdue() {
        let mut a = jobset("a", EvaluationStyle::Schedule);
        a.check_interval = 60;
        a.last_checked_time = NOW - 1000;
        let jobsets = [a];
        assert_eq!(
            next_wakeup(jobsets.iter(), NOW, true),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn no_wakeup_when_cap_reached_or_nothing_scheduled() {
        let mut a = jobset("a", EvaluationStyle::Schedule);
        a.check_interval = 60;
        let jobsets = [a];
        assert_eq!(next_wakeup(jobsets.iter(), NOW, false), None);

        let mut b = jobset("b", EvaluationStyle::Schedule);
        b.check_interval = 0;
        let mut c = jobset("c", EvaluationStyle::Schedule);
        c.check_interval = 60;
        c.pid = Some(7);
        let jobsets = [b, c];
        assert_eq!(next_wakeup(jobsets.iter(), NOW, true), None);
    }
}
