// Local-time slot matching for hydration reminders

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::core::types::ScheduledReminderSlot;

/// Wall-clock position of `now` in a user's timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    pub hour: u32,
    pub minute: u32,
    /// UTC instant of the most recent local midnight
    pub day_start_utc: DateTime<Utc>,
}

impl LocalClock {
    pub fn minutes_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

/// Parse an IANA zone name. Missing or unknown zones resolve to UTC.
pub fn resolve_timezone(name: Option<&str>) -> Tz {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Tz::UTC;
    };
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown timezone {:?}, falling back to UTC", name);
            Tz::UTC
        }
    }
}

pub fn local_clock(now: DateTime<Utc>, tz: Tz) -> LocalClock {
    let local = now.with_timezone(&tz);
    let midnight = local.date_naive().and_time(NaiveTime::MIN);

    // A zone whose midnight falls in a DST gap has no local 00:00; count
    // back from now instead.
    let day_start_utc = tz
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            now - Duration::minutes(i64::from(local.hour() * 60 + local.minute()))
                - Duration::seconds(i64::from(local.second()))
        });

    LocalClock {
        hour: local.hour(),
        minute: local.minute(),
        day_start_utc,
    }
}

/// Parse "H:MM AM/PM" into a 24h (hour, minute)
pub fn parse_slot_time(raw: &str) -> Option<(u32, u32)> {
    let normalized = raw.trim().to_ascii_uppercase();
    let (clock, meridiem) = if let Some(rest) = normalized.strip_suffix("AM") {
        (rest.trim_end(), false)
    } else if let Some(rest) = normalized.strip_suffix("PM") {
        (rest.trim_end(), true)
    } else {
        return None;
    };

    let (hour, minute) = clock.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }

    let hour = match (hour, meridiem) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    Some((hour, minute))
}

/// Dedup key for a slot: zero-padded 24h "HH:MM"
pub fn scheduled_time_key(hour: u32, minute: u32) -> String {
    format!("{:02}:{:02}", hour, minute)
}

/// Whether a slot is within `window` minutes of now. Plain difference in
/// minutes of the day, so slots never match across midnight.
pub fn is_due(now_minutes: u32, slot_minutes: u32, window: u32) -> bool {
    now_minutes.abs_diff(slot_minutes) <= window
}

/// Ounces the plan expects by now: the suggested amounts of every slot
/// strictly earlier than `now_minutes`
pub fn expected_ounces_by(slots: &[ScheduledReminderSlot], now_minutes: u32) -> f64 {
    slots
        .iter()
        .filter_map(|slot| {
            let (h, m) = parse_slot_time(&slot.time)?;
            (h * 60 + m < now_minutes).then_some(slot.suggested_ounces)
        })
        .sum()
}
