use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const JST_OFFSET_SECS: i32 = 9 * 3600;

// Runs before this time (JST) use the previous session's data.
// TSE closes at 15:30 JST; daily metrics land some time after that.
const CLOSE_CUTOFF_HOUR_JST: u32 = 16;
const CLOSE_CUTOFF_MINUTE_JST: u32 = 0;

pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date (expected YYYY-MM-DD): {s}"));
    }

    let jst = chrono::FixedOffset::east_opt(JST_OFFSET_SECS).context("invalid JST offset")?;
    let now_jst = now_utc.with_timezone(&jst);

    let cutoff_reached =
        (now_jst.hour(), now_jst.minute()) >= (CLOSE_CUTOFF_HOUR_JST, CLOSE_CUTOFF_MINUTE_JST);
    let mut date = now_jst.date_naive();
    if !cutoff_reached {
        date = date - Duration::days(1);
    }

    Ok(last_trading_day_on_or_before(date, &configured_holidays()))
}

fn last_trading_day_on_or_before(mut date: NaiveDate, holidays: &HashSet<NaiveDate>) -> NaiveDate {
    while is_weekend(date) || holidays.contains(&date) {
        date = date - Duration::days(1);
    }
    date
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Exchange year-end closure (Dec 31 - Jan 3). National holidays move around, so supply
    // them via JP_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    for y in 2024..=2030 {
        for (m, d) in [(1, 1), (1, 2), (1, 3), (12, 31)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("JP_MARKET_HOLIDAYS") {
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    out.insert(d);
                }
                Err(err) => {
                    tracing::warn!(value = part, error = %err, "ignoring malformed JP_MARKET_HOLIDAYS entry");
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let d = resolve_as_of_date(Some("2026-02-27"), now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 2, 27).unwrap());
        assert!(resolve_as_of_date(Some("27/02/2026"), now).is_err());
    }

    #[test]
    fn rolls_back_on_weekend() {
        // 2026-01-10 08:00 UTC = 17:00 JST on a Saturday.
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 9).unwrap());
    }

    #[test]
    fn uses_same_day_after_cutoff() {
        // 2026-01-06 08:00 UTC = 17:00 JST (>= 16:00 cutoff), a Tuesday.
        let now = Utc.with_ymd_and_hms(2026, 1, 6, 8, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
    }

    #[test]
    fn rolls_back_across_year_end_closure_before_cutoff() {
        // 2026-01-05 06:00 UTC = 15:00 JST Monday; previous day is Sunday, then Sat, Jan 2, Jan 1,
        // Dec 31 (all closed).
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 6, 0, 0).unwrap();
        let d = resolve_as_of_date(None, now).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 12, 30).unwrap());
    }

    #[test]
    fn extra_holidays_are_skipped() {
        let holiday = NaiveDate::from_ymd_opt(2026, 2, 11).unwrap();
        let holidays: HashSet<NaiveDate> = [holiday].into_iter().collect();
        assert_eq!(
            last_trading_day_on_or_before(holiday, &holidays),
            NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()
        );
    }
}
