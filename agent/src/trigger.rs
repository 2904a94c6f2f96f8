//! Trigger evaluator: decides per tick which cached tasks are due.
//!
//! The cron grammar supported here is deliberately the narrow
//! `minute hour * * weekday` subset — no general cron crate is pulled in
//! for five fields this restricted.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};

use rmm_protocol::{CachedTask, Trigger};

/// Ticks the trigger evaluator runs on.
pub const EVALUATOR_TICK: std::time::Duration = std::time::Duration::from_secs(30);

/// Computes the next run at-or-after `now` matching `minute`/`hour` and,
/// if `weekday` is `Some`, that ISO weekday (0 = Monday .. 6 = Sunday, same
/// convention as `chrono::Weekday::num_days_from_monday`).
///
/// Returns `None` for a malformed expression — an unparsable cron is
/// treated as never-due rather than erroring the evaluator.
pub fn cron_next_run(expr: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }
    let minute: u32 = parts[0].parse().ok()?;
    let hour: u32 = parts[1].parse().ok()?;
    if minute > 59 || hour > 23 {
        return None;
    }

    let mut candidate = now
        .with_minute(minute)?
        .with_second(0)?
        .with_nanosecond(0)?
        .with_hour(hour)?;
    if candidate <= now {
        candidate += ChronoDuration::days(1);
    }

    if parts[4] != "*" {
        let field: u32 = parts[4].parse().ok()?;
        // Standard cron weekday convention: 0 (or 7) = Sunday, 1 = Monday,
        // ..., 6 = Saturday.
        let target = match field {
            0 | 7 => chrono::Weekday::Sun,
            1 => chrono::Weekday::Mon,
            2 => chrono::Weekday::Tue,
            3 => chrono::Weekday::Wed,
            4 => chrono::Weekday::Thu,
            5 => chrono::Weekday::Fri,
            6 => chrono::Weekday::Sat,
            _ => return None,
        };
        while candidate.weekday() != target {
            candidate += ChronoDuration::days(1);
        }
    }
    Some(candidate)
}

/// Whether `task` is due to run at `now`. `event` triggers are never due
/// from this path — they're dispatched by the event watcher instead.
pub fn is_due(task: &CachedTask, now: DateTime<Utc>) -> bool {
    if task.cancelled {
        return false;
    }
    match &task.trigger {
        Trigger::Now => true,
        Trigger::Once { scheduled_at } => now >= *scheduled_at,
        Trigger::Interval { interval_seconds } => match task.last_run {
            None => true,
            Some(last) => (now - last).num_seconds() >= *interval_seconds as i64,
        },
        Trigger::Cron { cron_expression } => match cron_next_run(cron_expression, now) {
            None => false,
            Some(next_run) => {
                now >= next_run && task.last_run.map(|last| last < next_run).unwrap_or(true)
            }
        },
        Trigger::Event { .. } => false,
    }
}

/// Selects the due tasks from `tasks`, preserving insertion order for
/// tie-breaking when several fire in the same tick.
pub fn due_tasks<'a>(tasks: &'a [CachedTask], now: DateTime<Utc>) -> Vec<&'a CachedTask> {
    tasks.iter().filter(|t| is_due(t, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn task(trigger: Trigger, last_run: Option<DateTime<Utc>>) -> CachedTask {
        CachedTask {
            task_id: Uuid::new_v4(),
            name: "t".into(),
            script_type: rmm_protocol::ScriptType::Bash,
            script_body: "echo hi".into(),
            trigger,
            cancelled: false,
            last_run,
        }
    }

    #[test]
    fn now_trigger_is_always_due() {
        let t = task(Trigger::Now, None);
        assert!(is_due(&t, Utc::now()));
    }

    #[test]
    fn once_is_due_only_after_scheduled_time() {
        let scheduled = Utc::now() + ChronoDuration::seconds(60);
        let t = task(Trigger::Once { scheduled_at: scheduled }, None);
        assert!(!is_due(&t, Utc::now()));
        assert!(is_due(&t, scheduled + ChronoDuration::seconds(1)));
    }

    #[test]
    fn once_in_the_past_fires_immediately() {
        // fires immediately rather than skipping with a warning
        let scheduled = Utc::now() - ChronoDuration::hours(1);
        let t = task(Trigger::Once { scheduled_at: scheduled }, None);
        assert!(is_due(&t, Utc::now()));
    }

    #[test]
    fn interval_due_after_elapsed_window() {
        let last = Utc::now() - ChronoDuration::seconds(61);
        let t = task(Trigger::Interval { interval_seconds: 60 }, Some(last));
        assert!(is_due(&t, Utc::now()));

        let recent = Utc::now() - ChronoDuration::seconds(10);
        let t2 = task(Trigger::Interval { interval_seconds: 60 }, Some(recent));
        assert!(!is_due(&t2, Utc::now()));
    }

    #[test]
    fn cron_next_monday_0230_from_a_thursday() {
        // Thursday 2026-01-01 10:00 UTC; "30 2 * * 1" fires on the next
        // Monday 02:30 UTC at-or-after now.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = cron_next_run("30 2 * * 1", now).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
        assert_eq!(next.hour(), 2);
        assert_eq!(next.minute(), 30);
        assert!(next > now);
    }

    #[test]
    fn cron_rejects_malformed_expression() {
        assert!(cron_next_run("not a cron", Utc::now()).is_none());
    }

    #[test]
    fn cancelled_task_never_due() {
        let mut t = task(Trigger::Now, None);
        t.cancelled = true;
        assert!(!is_due(&t, Utc::now()));
    }

    #[test]
    fn event_trigger_never_due_from_evaluator() {
        let t = task(
            Trigger::Event {
                event_kind: rmm_protocol::EventKind::NetworkChange,
            },
            None,
        );
        assert!(!is_due(&t, Utc::now()));
    }
}
