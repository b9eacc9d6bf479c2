use chrono::{DateTime, Duration, Local, SubsecRound, TimeZone, Utc};

/// Sessions are kept with one second precision.
pub fn whole_seconds(moment: DateTime<Utc>) -> DateTime<Utc> {
    moment.trunc_subsecs(0)
}

/// Formats a session start the way the session table shows it, e.g. `3:07 PM`.
pub fn format_start_time<Tz: TimeZone>(start: DateTime<Utc>, zone: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    start.with_timezone(zone).format("%-I:%M %p").to_string()
}

/// [format_start_time] in the machine's local zone.
pub fn format_local_start_time(start: DateTime<Utc>) -> String {
    format_start_time(start, &Local)
}

/// Formats a duration as whole minutes and remaining seconds, e.g. `12m 5s`. Hours are folded
/// into minutes.
pub fn format_duration(v: Duration) -> String {
    let seconds = v.num_seconds().max(0);
    format!("{}m {}s", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset};

    use super::{format_duration, format_start_time};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(0)), "0m 0s");
        assert_eq!(format_duration(Duration::seconds(59)), "0m 59s");
        assert_eq!(format_duration(Duration::seconds(61)), "1m 1s");
        assert_eq!(format_duration(Duration::seconds(3725)), "62m 5s");
    }

    #[test]
    fn test_format_start_time_uses_twelve_hour_clock() {
        let zone = FixedOffset::east_opt(0).unwrap();
        let morning = DateTime::from_timestamp(9 * 3600 + 5 * 60, 0).unwrap();
        let evening = DateTime::from_timestamp(21 * 3600 + 30 * 60, 0).unwrap();
        assert_eq!(format_start_time(morning, &zone), "9:05 AM");
        assert_eq!(format_start_time(evening, &zone), "9:30 PM");
    }

    #[test]
    fn test_format_start_time_applies_zone() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let start = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(format_start_time(start, &zone), "2:00 AM");
    }
}
