use crate::error::{Result, TriggerError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;

/// A parsed five-field cron expression evaluated in a fixed time zone.
pub struct CronSchedule {
    cron: Cron,
    tz: Tz,
}

impl CronSchedule {
    /// Parses `expression` (minute hour day-of-month month day-of-week) and
    /// an optional IANA time zone name. UTC is used when no zone is given.
    pub fn parse(expression: &str, time_zone: Option<&str>) -> Result<Self> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(TriggerError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, found {fields}"),
            });
        }
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| TriggerError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        let tz = match time_zone.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| TriggerError::InvalidTimeZone(name.to_string()))?,
            None => Tz::UTC,
        };
        Ok(Self { cron, tz })
    }

    /// The first occurrence strictly after `after`, or `None` if the
    /// expression never matches again.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.cron
            .find_next_occurrence(&local, false)
            .ok()
            .map(|next| next.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_five_minutes_lands_on_boundaries() {
        let schedule = CronSchedule::parse("*/5 * * * *", None).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 12, 3, 17).unwrap();
        let next = schedule.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap());
        assert_eq!(
            schedule.next_after(next).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 10, 0).unwrap()
        );
    }

    #[test]
    fn time_zone_shifts_wall_clock_schedule() {
        let schedule = CronSchedule::parse("0 9 * * *", Some("Europe/Berlin")).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        // 09:00 CET is 08:00 UTC in winter.
        assert_eq!(
            schedule.next_after(from).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_expressions_and_zones() {
        assert!(matches!(
            CronSchedule::parse("*/5 * * *", None),
            Err(TriggerError::InvalidCronExpression { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 * * * *", None),
            Err(TriggerError::InvalidCronExpression { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("99 * * * *", None),
            Err(TriggerError::InvalidCronExpression { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* * * * *", Some("Mars/Olympus")),
            Err(TriggerError::InvalidTimeZone(_))
        ));
    }
}
