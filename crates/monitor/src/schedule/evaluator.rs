//! Pure status derivation over a check's configuration and ping history.

use chrono::{DateTime, Utc};

use deadman_core::duration::to_chrono;
use deadman_core::{Check, CheckKind, ConfigurationError, FlipReason, Status};

use super::cron::{next_occurrence, parse_schedule, parse_tz};

/// Result of deriving a check's status at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub status: Status,
    /// Deadline in force, if any.
    pub deadline: Option<DateTime<Utc>>,
    /// Why the check is down, when it is.
    pub reason: Option<FlipReason>,
}

/// Validate everything the evaluator will later rely on.
///
/// Called at configuration time so a bad schedule or zone is rejected before
/// it is stored, never discovered during a sweep.
pub fn validate(check: &Check) -> Result<(), ConfigurationError> {
    check.validate_intervals()?;
    parse_tz(&check.tz)?;
    if check.kind == CheckKind::Cron {
        parse_schedule(&check.schedule)?;
    }
    Ok(())
}

/// The timestamp the deadline is measured from.
///
/// An outstanding start ping takes the place of the last terminal ping.
pub fn anchor(check: &Check) -> Option<DateTime<Utc>> {
    check.last_start.or(check.last_ping)
}

/// Deadline for the check's current run, as of `as_of`.
///
/// `None` while the check is new or paused. A start ping recorded after
/// `as_of` is not yet in force.
pub fn next_deadline(check: &Check, as_of: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ConfigurationError> {
    if check.paused {
        return Ok(None);
    }
    let Some(last_ping) = check.last_ping else {
        return Ok(None);
    };
    let anchor = match check.last_start {
        Some(start) if start <= as_of => start,
        _ => last_ping,
    };
    deadline_after(check, anchor)
}

/// Whether the deadline in force at `as_of` has passed (grace or down).
pub fn is_late(check: &Check, as_of: DateTime<Utc>) -> Result<bool, ConfigurationError> {
    Ok(next_deadline(check, as_of)?.is_some_and(|deadline| as_of >= deadline))
}

/// Derive the status of `check` at `now`.
pub fn derive_status(check: &Check, now: DateTime<Utc>) -> Result<Evaluation, ConfigurationError> {
    if check.paused {
        return Ok(Evaluation { status: Status::Paused, deadline: None, reason: None });
    }
    if check.last_ping.is_none() {
        return Ok(Evaluation { status: Status::New, deadline: None, reason: None });
    }

    let deadline = next_deadline(check, now)?;

    if check.last_ping_failed && check.last_start.is_none() {
        return Ok(Evaluation { status: Status::Down, deadline, reason: Some(FlipReason::Fail) });
    }

    if let Some(previous) = missed_before_start(check, now)? {
        let reason = if check.last_ping_failed { FlipReason::Fail } else { FlipReason::Timeout };
        return Ok(Evaluation { status: Status::Down, deadline: Some(previous), reason: Some(reason) });
    }

    let Some(deadline) = deadline else {
        // Schedule with no future occurrence: nothing more is expected.
        return Ok(Evaluation { status: Status::Up, deadline: None, reason: None });
    };

    let down_at = deadline + to_chrono(check.grace);
    let evaluation = if now < deadline {
        Evaluation { status: Status::Up, deadline: Some(deadline), reason: None }
    } else if now < down_at {
        Evaluation { status: Status::Grace, deadline: Some(deadline), reason: None }
    } else {
        let reason = if check.last_start.is_some() { FlipReason::LongRunning } else { FlipReason::Timeout };
        Evaluation { status: Status::Down, deadline: Some(deadline), reason: Some(reason) }
    };

    // A failed run stays down while a retry is in progress.
    if check.last_ping_failed && evaluation.status != Status::Down {
        return Ok(Evaluation { status: Status::Down, reason: Some(FlipReason::Fail), ..evaluation });
    }
    Ok(evaluation)
}

/// The previous run's deadline, when that run was already down by the time
/// the outstanding start ping arrived. Only a terminal ping lifts such a check.
fn missed_before_start(check: &Check, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ConfigurationError> {
    let (Some(start), Some(last_ping)) = (check.last_start, check.last_ping) else {
        return Ok(None);
    };
    if start > now {
        return Ok(None);
    }
    Ok(deadline_after(check, last_ping)?.filter(|previous| start >= *previous + to_chrono(check.grace)))
}

fn deadline_after(check: &Check, anchor: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ConfigurationError> {
    match check.kind {
        CheckKind::Simple => Ok(Some(anchor + to_chrono(check.timeout))),
        CheckKind::Cron => {
            let schedule = parse_schedule(&check.schedule)?;
            let tz = parse_tz(&check.tz)?;
            Ok(next_occurrence(&schedule, tz, anchor))
        }
    }
}
