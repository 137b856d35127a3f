use chrono::{DateTime, Utc};

/// Time format of ACL validity bounds, e.g. `2024-06-01T12:00:00Z`.
/// Fixed-width and zero-padded so lexicographic order is chronological.
pub const VALIDITY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Source of the "now" string that validity windows are compared against.
pub trait Clock: Send + Sync {
    fn now_string(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_string(&self) -> String {
        format_time(&Utc::now())
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn now_string(&self) -> String {
        self.0.clone()
    }
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format(VALIDITY_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_uses_calendar_month() {
        let time = Utc
            .with_ymd_and_hms(2024, 1, 5, 7, 8, 9)
            .single()
            .expect("Should build timestamp");
        assert_eq!(format_time(&time), "2024-01-05T07:08:09Z");
    }

    #[test]
    fn test_system_clock_shape() {
        let now = SystemClock.now_string();
        assert_eq!(now.len(), 20);
        assert!(now.ends_with('Z'));
        assert_eq!(&now[10..11], "T");
    }
}
