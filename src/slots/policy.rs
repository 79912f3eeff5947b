use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::BookingPolicy;

impl BookingPolicy {
    /// Earliest bookable instant. Only meaningful when same-day booking is
    /// enabled and an advance-notice window is configured. A notice period
    /// past the end of the calendar saturates, so nothing is bookable.
    pub fn min_booking_instant(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.allow_same_day_booking {
            return None;
        }
        self.advance_booking_hours.map(|h| {
            now.checked_add_signed(Duration::hours(i64::from(h)))
                .unwrap_or(NaiveDateTime::MAX)
        })
    }

    /// Last enabled date. `None` when unbounded, including a horizon past
    /// the end of the calendar.
    pub fn horizon(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.max_advance_booking_days
            .and_then(|days| today.checked_add_signed(Duration::days(i64::from(days))))
    }

    /// Date-level gate.
    ///
    /// Past dates are always disabled. With same-day booking turned off no
    /// further restriction applies; otherwise dates lying entirely before the
    /// advance-notice instant, or beyond the max-advance horizon, are disabled.
    pub fn is_date_enabled(&self, date: NaiveDate, now: NaiveDateTime) -> bool {
        let today = now.date();
        if date < today {
            return false;
        }
        if !self.allow_same_day_booking {
            return true;
        }
        if let Some(min) = self.min_booking_instant(now)
            && let Some(next_day) = date.succ_opt()
            && next_day.and_time(NaiveTime::MIN) <= min
        {
            return false;
        }
        if let Some(last) = self.horizon(today)
            && date > last
        {
            return false;
        }
        true
    }

    /// Slot-level gate. Only slots on today's date are ever restricted, and
    /// only when an advance-notice instant exists.
    pub fn is_slot_allowed(&self, slot_start: NaiveDateTime, now: NaiveDateTime) -> bool {
        if slot_start.date() != now.date() {
            return true;
        }
        match self.min_booking_instant(now) {
            Some(min) => slot_start >= min,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn now() -> NaiveDateTime {
        d(10).and_hms_opt(14, 20, 0).unwrap()
    }

    fn policy(same_day: bool, hours: Option<u32>, days: Option<u32>) -> BookingPolicy {
        BookingPolicy {
            allow_same_day_booking: same_day,
            advance_booking_hours: hours,
            max_advance_booking_days: days,
        }
    }

    #[test]
    fn past_dates_always_disabled() {
        for p in [policy(false, None, None), policy(true, Some(2), Some(30))] {
            assert!(!p.is_date_enabled(d(9), now()));
        }
    }

    #[test]
    fn same_day_off_bypasses_advance_and_horizon() {
        let p = policy(false, Some(72), Some(1));
        assert!(p.is_date_enabled(d(10), now()));
        assert!(p.is_date_enabled(d(11), now()));
        assert!(p.is_date_enabled(d(28), now()));
        assert!(p.is_slot_allowed(d(10).and_hms_opt(14, 30, 0).unwrap(), now()));
    }

    #[test]
    fn advance_hours_disable_dates_entirely_before_min_instant() {
        // now + 48h = 12th 14:20, so the 10th and 11th fall entirely before it.
        let p = policy(true, Some(48), None);
        assert!(!p.is_date_enabled(d(10), now()));
        assert!(!p.is_date_enabled(d(11), now()));
        assert!(p.is_date_enabled(d(12), now()));
    }

    #[test]
    fn max_advance_days_disable_far_dates() {
        let p = policy(true, None, Some(7));
        assert!(p.is_date_enabled(d(17), now()));
        assert!(!p.is_date_enabled(d(18), now()));
    }

    #[test]
    fn slot_gate_applies_to_today_only() {
        let p = policy(true, Some(2), None);
        // min instant is 16:20 today
        assert!(!p.is_slot_allowed(d(10).and_hms_opt(16, 0, 0).unwrap(), now()));
        assert!(p.is_slot_allowed(d(10).and_hms_opt(16, 20, 0).unwrap(), now()));
        assert!(p.is_slot_allowed(d(11).and_hms_opt(8, 0, 0).unwrap(), now()));
    }

    #[test]
    fn huge_advance_hours_disable_everything_without_panicking() {
        let p = policy(true, Some(u32::MAX), None);
        assert!(!p.is_date_enabled(d(10), now()));
        assert!(!p.is_date_enabled(d(31), now()));
        assert!(!p.is_slot_allowed(d(10).and_hms_opt(23, 0, 0).unwrap(), now()));
    }

    #[test]
    fn huge_max_advance_days_is_unbounded() {
        let p = policy(true, None, Some(u32::MAX));
        assert!(p.is_date_enabled(d(11), now()));
        assert!(p.is_date_enabled(NaiveDate::from_ymd_opt(9999, 12, 31).unwrap(), now()));
    }

    #[test]
    fn horizon_near_end_of_calendar() {
        let p = policy(true, None, Some(10));
        assert_eq!(p.horizon(NaiveDate::MAX), None);
        assert!(p.is_date_enabled(NaiveDate::MAX, NaiveDate::MAX.and_hms_opt(0, 0, 0).unwrap()));
    }

    #[test]
    fn slot_gate_without_advance_hours_is_open() {
        let p = policy(true, None, None);
        assert!(p.is_slot_allowed(d(10).and_hms_opt(9, 0, 0).unwrap(), now()));
    }
}
