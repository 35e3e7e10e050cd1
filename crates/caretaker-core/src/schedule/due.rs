//! Due-ness of the periodic maintenance task

use caretaker_api::{Frequency, ScheduleConfig};
use chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveDateTime};

/// Whether a task last completed at `last_completed` is due at `now`.
///
/// `None` means the task never ran and is always due. Daily and weekly
/// checks compare local calendar dates and wall-clock times; hourly uses
/// elapsed real time.
pub fn is_due(
    now: DateTime<Local>,
    last_completed: Option<DateTime<Local>>,
    config: &ScheduleConfig,
) -> bool {
    let Some(last) = last_completed else {
        return true;
    };

    match config.frequency {
        Frequency::Hourly => now.signed_duration_since(last) >= chrono::Duration::hours(1),
        Frequency::Daily => {
            let scheduled = now.date_naive().and_time(config.time_of_day.to_naive_time());
            last.date_naive() != now.date_naive() && now.naive_local() >= scheduled
        }
        Frequency::Weekly => {
            let this_week = week_start(now.date_naive());
            let scheduled = scheduled_in_week(this_week, config);
            week_start(last.date_naive()) != this_week && now.naive_local() >= scheduled
        }
    }
}

/// Monday of the ISO week containing `date`
fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday();
    date.checked_sub_days(Days::new(offset.into()))
        .unwrap_or(date)
}

fn scheduled_in_week(monday: NaiveDate, config: &ScheduleConfig) -> NaiveDateTime {
    let offset = config.weekday.num_days_from_monday();
    monday
        .checked_add_days(Days::new(offset.into()))
        .unwrap_or(monday)
        .and_time(config.time_of_day.to_naive_time())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_util::WallClock;
    use chrono::{Duration, TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
    }

    fn config(frequency: Frequency) -> ScheduleConfig {
        ScheduleConfig {
            enabled: true,
            frequency,
            time_of_day: WallClock::new(9, 0).unwrap(),
            weekday: Weekday::Mon,
        }
    }

    #[test]
    fn never_run_is_due() {
        let now = at(2025, 3, 12, 8, 0);
        for frequency in [Frequency::Hourly, Frequency::Daily, Frequency::Weekly] {
            assert!(is_due(now, None, &config(frequency)));
        }
    }

    #[test]
    fn hourly() {
        let now = at(2025, 3, 12, 12, 0);
        let hourly = config(Frequency::Hourly);

        assert!(!is_due(now, Some(now - Duration::minutes(59)), &hourly));
        assert!(is_due(now, Some(now - Duration::minutes(61)), &hourly));
        assert!(is_due(now, Some(now - Duration::hours(1)), &hourly));
    }

    #[test]
    fn daily() {
        let daily = config(Frequency::Daily);
        let last = at(2025, 3, 11, 10, 0);

        assert!(!is_due(at(2025, 3, 12, 8, 59), Some(last), &daily));
        assert!(is_due(at(2025, 3, 12, 9, 1), Some(last), &daily));
        assert!(is_due(at(2025, 3, 12, 9, 0), Some(last), &daily));
    }

    #[test]
    fn daily_already_ran_today() {
        let daily = config(Frequency::Daily);
        let last = at(2025, 3, 12, 9, 5);
        assert!(!is_due(at(2025, 3, 12, 18, 0), Some(last), &daily));
    }

    #[test]
    fn daily_early_run_still_counts_for_the_day() {
        // A manual run before the scheduled time consumes today's slot
        let daily = config(Frequency::Daily);
        let last = at(2025, 3, 12, 7, 0);
        assert!(!is_due(at(2025, 3, 12, 9, 30), Some(last), &daily));
    }

    #[test]
    fn weekly_same_iso_week_never_due() {
        let weekly = config(Frequency::Weekly);
        // 2025-03-10 is a Monday
        let last = at(2025, 3, 10, 9, 30);
        for day in 10..=16 {
            for hour in [0, 9, 23] {
                assert!(!is_due(at(2025, 3, day, hour, 0), Some(last), &weekly));
            }
        }
    }

    #[test]
    fn weekly_next_week() {
        let mut weekly = config(Frequency::Weekly);
        weekly.weekday = Weekday::Wed;
        let last = at(2025, 3, 12, 9, 0);

        // Following week, before Wednesday 09:00
        assert!(!is_due(at(2025, 3, 17, 10, 0), Some(last), &weekly));
        assert!(!is_due(at(2025, 3, 19, 8, 59), Some(last), &weekly));
        // At or after the scheduled instant
        assert!(is_due(at(2025, 3, 19, 9, 0), Some(last), &weekly));
        assert!(is_due(at(2025, 3, 21, 7, 0), Some(last), &weekly));
    }

    #[test]
    fn weekly_sunday_belongs_to_previous_week() {
        let weekly = config(Frequency::Weekly);
        // Sunday 2025-03-16 is in the week starting Monday 2025-03-10
        let last = at(2025, 3, 16, 20, 0);
        assert!(is_due(at(2025, 3, 17, 9, 0), Some(last), &weekly));
    }

    #[test]
    fn week_start_is_monday() {
        let wed = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        assert_eq!(week_start(wed), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        let sun = NaiveDate::from_ymd_opt(2025, 3, 16).unwrap();
        assert_eq!(week_start(sun), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }
}
