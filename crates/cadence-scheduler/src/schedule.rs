use chrono::{DateTime, Datelike, Duration, Utc};

use crate::types::{CalendarRule, CronExpression, RepeatCount, SchedulePolicy};

/// First UTC fire time at or after `start`.
///
/// Returns `None` when the policy can never fire from `start` on.
pub fn first_fire_time(policy: &SchedulePolicy, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match policy {
        SchedulePolicy::Simple { .. } => Some(start),
        // `after` is exclusive and second-granular; step back one second and
        // discard anything before `start`.
        SchedulePolicy::Cron(expr) => {
            let from = start
                .checked_sub_signed(Duration::seconds(1))
                .unwrap_or(start);
            cron_after(expr, from)?.find(|t| *t >= start)
        }
        SchedulePolicy::Calendar(rule) => calendar_at_or_after(rule, start),
    }
}

/// Fire time following `previous`, given that the trigger has produced
/// `fired` fires so far (including `previous`).
///
/// Returns `None` once the schedule is exhausted.
pub fn next_fire_time(
    policy: &SchedulePolicy,
    previous: DateTime<Utc>,
    fired: u32,
) -> Option<DateTime<Utc>> {
    match policy {
        SchedulePolicy::Simple { repeat, interval } => {
            if let RepeatCount::Times(n) = repeat {
                // n repeats after the initial fire: n + 1 fires in total.
                if fired > *n {
                    return None;
                }
            }
            let step = Duration::from_std(*interval).ok()?;
            previous.checked_add_signed(step)
        }
        SchedulePolicy::Cron(expr) => cron_after(expr, previous)?.next(),
        SchedulePolicy::Calendar(rule) => {
            calendar_at_or_after(rule, previous.checked_add_signed(Duration::seconds(1))?)
        }
    }
}

/// `cron` steps one second past `after` internally, which overflows at the
/// end of representable time.
fn cron_after(
    expr: &CronExpression,
    after: DateTime<Utc>,
) -> Option<impl Iterator<Item = DateTime<Utc>> + '_> {
    after.checked_add_signed(Duration::seconds(1))?;
    Some(expr.schedule().after(&after))
}

fn calendar_at_or_after(rule: &CalendarRule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match rule {
        CalendarRule::Daily { hour, minute } => {
            let candidate = from
                .date_naive()
                .and_hms_opt(*hour as u32, *minute as u32, 0)?
                .and_utc();
            if candidate >= from {
                Some(candidate)
            } else {
                // Today's window has passed.
                candidate.checked_add_signed(Duration::days(1))
            }
        }

        CalendarRule::Weekly {
            weekday,
            hour,
            minute,
        } => {
            let today = from.weekday().num_days_from_monday() as i64;
            let days_ahead = (*weekday as i64 - today).rem_euclid(7);
            let candidate = from
                .date_naive()
                .checked_add_signed(Duration::days(days_ahead))?
                .and_hms_opt(*hour as u32, *minute as u32, 0)?
                .and_utc();
            if candidate >= from {
                Some(candidate)
            } else {
                // Same weekday, but the time has already gone.
                candidate.checked_add_signed(Duration::days(7))
            }
        }
    }
}
