use std::sync::atomic::{AtomicI64, Ordering};

use time::{macros::format_description, OffsetDateTime};

/// Source of "now" for ids and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that advances one millisecond on every read. Keeps generated
/// ids distinct in tests that create several rows back to back.
#[derive(Debug)]
pub struct SteppingClock {
    start: OffsetDateTime,
    ticks: AtomicI64,
}

impl SteppingClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            start,
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> OffsetDateTime {
        let n = self.ticks.fetch_add(1, Ordering::Relaxed);
        self.start + time::Duration::milliseconds(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Guest,
    Item,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::User => "U",
            IdKind::Guest => "G",
            IdKind::Item => "INV",
        }
    }
}

/// Entity-type prefix followed by the unix time in milliseconds.
///
/// Two creates of the same kind within one millisecond collide; see
/// DESIGN.md.
pub fn new_id(kind: IdKind, at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!("{}{}", kind.prefix(), millis)
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:00:00.000Z`.
pub fn iso_timestamp(at: OffsetDateTime) -> String {
    let fmt = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(&fmt)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ids_carry_prefix_and_millis() {
        let at = datetime!(2024-01-01 00:00:00.123 UTC);
        assert_eq!(new_id(IdKind::User, at), "U1704067200123");
        assert_eq!(new_id(IdKind::Guest, at), "G1704067200123");
        assert_eq!(new_id(IdKind::Item, at), "INV1704067200123");
    }

    #[test]
    fn timestamps_are_iso_millis() {
        let at = datetime!(2024-05-01 10:00:00.5 UTC);
        assert_eq!(iso_timestamp(at), "2024-05-01T10:00:00.500Z");
    }

    #[test]
    fn stepping_clock_never_repeats() {
        let clock = SteppingClock::new(datetime!(2024-01-01 0:00 UTC));
        let a = new_id(IdKind::Item, clock.now());
        let b = new_id(IdKind::Item, clock.now());
        assert_ne!(a, b);
    }
}
