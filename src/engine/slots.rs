use chrono::{Datelike, Days, NaiveDate, Timelike};

use crate::model::{Ms, ProviderState, Slot, Span};

// ── Slot generation ──────────────────────────────────────────────

/// Derive the bookable slots for a date range from a provider's weekly
/// rules, time-off, and active bookings.
///
/// Per day: the active rule for that weekday opens a window (no rule means
/// no slots), a time-off period covering the day closes it entirely, and
/// candidate start times step through the window at `granularity_minutes`,
/// each occupying one granularity unit. Candidates at or before `now` and
/// candidates colliding with a pending/confirmed booking are dropped.
///
/// The sequence is lazy per day and recomputed on every call, so repeated
/// calls with the same `now` and state yield identical slots.
pub fn generate_slots<'a>(
    ps: &'a ProviderState,
    range_start: NaiveDate,
    num_days: u32,
    granularity_minutes: u32,
    now: Ms,
) -> impl Iterator<Item = Slot> + 'a {
    (0..num_days)
        .filter_map(move |offset| range_start.checked_add_days(Days::new(u64::from(offset))))
        .flat_map(move |day| day_slots(ps, day, granularity_minutes, now))
}

fn day_slots(ps: &ProviderState, day: NaiveDate, granularity_minutes: u32, now: Ms) -> Vec<Slot> {
    let weekday = day.weekday().num_days_from_sunday() as u8;
    let Some(rule) = ps
        .rules
        .iter()
        .find(|r| r.active && r.day_of_week == weekday)
    else {
        return Vec::new();
    };
    // Day-level exclusion: any time-off covering the day blanks it out.
    if ps.time_off.iter().any(|t| t.covers(day)) {
        return Vec::new();
    }

    let start_min = rule.start_time.num_seconds_from_midnight() / 60;
    let end_min = rule.end_time.num_seconds_from_midnight() / 60;
    let window_open = day.and_time(rule.start_time).and_utc().timestamp_millis();
    let granularity_ms = Ms::from(granularity_minutes) * 60_000;

    let mut slots = Vec::new();
    let mut minute = start_min;
    while minute + granularity_minutes <= end_min {
        let offset_min = minute - start_min;
        let start = window_open + Ms::from(offset_min) * 60_000;
        minute += granularity_minutes;

        if start <= now {
            continue; // no past slots
        }
        let candidate = Span::new(start, start + granularity_ms);
        if ps.overlapping_active(&candidate).next().is_some() {
            continue;
        }
        slots.push(Slot {
            date: day,
            start_time: rule.start_time + chrono::Duration::minutes(i64::from(offset_min)),
            start,
            bookable: true,
        });
    }
    slots
}
