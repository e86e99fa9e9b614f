use chrono::NaiveDate;

use crate::model::{Minor, Stay};

/// Stays of at least this many days get the office's monthly discount.
pub const MONTHLY_DISCOUNT_MIN_DAYS: i64 = 28;

/// The computed, not-yet-persisted price of a prospective stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StayQuote {
    pub days: i64,
    pub discount_applied: bool,
    pub daily_rate: Minor,
    pub total: Minor,
}

/// Price an inclusive `[start, end]` stay.
///
/// `days * daily_rate`, then for stays of 28+ days with a non-zero discount the
/// total becomes `price * (100 - pct) / 100`. Integer division truncates, so a
/// fractional minor unit is always dropped in the guest's favour.
pub fn quote(start: NaiveDate, end: NaiveDate, daily_rate: Minor, monthly_discount: Option<u8>) -> StayQuote {
    let days = if start <= end { Stay::new(start, end).days() } else { 0 };
    let gross = days as u128 * daily_rate as u128;

    let (total, discount_applied) = match monthly_discount {
        Some(pct) if pct > 0 && days >= MONTHLY_DISCOUNT_MIN_DAYS => {
            let pct = pct.min(100) as u128;
            (gross * (100 - pct) / 100, true)
        }
        _ => (gross, false),
    };

    StayQuote {
        days,
        discount_applied,
        daily_rate,
        total: Minor::try_from(total).unwrap_or(Minor::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn plus(start: NaiveDate, n: u64) -> NaiveDate {
        start.checked_add_days(Days::new(n)).unwrap()
    }

    #[test]
    fn short_stay_no_discount() {
        let q = quote(d("2030-03-01"), d("2030-03-02"), 1000, Some(10));
        assert_eq!(q.days, 2);
        assert_eq!(q.total, 2000);
        assert!(!q.discount_applied);
    }

    #[test]
    fn threshold_day_gets_discount() {
        let start = d("2030-03-01");
        let q = quote(start, plus(start, 27), 1000, Some(10));
        assert_eq!(q.days, 28);
        assert_eq!(q.total, 25200);
        assert!(q.discount_applied);

        let q = quote(start, plus(start, 26), 1000, Some(10));
        assert_eq!(q.days, 27);
        assert_eq!(q.total, 27000);
        assert!(!q.discount_applied);
    }

    #[test]
    fn forty_day_stay() {
        let start = d("2030-03-01");
        let q = quote(start, plus(start, 39), 1000, Some(10));
        assert_eq!(q.days, 40);
        assert_eq!(q.total, 36000);
    }

    #[test]
    fn zero_or_missing_discount_is_ignored() {
        let start = d("2030-03-01");
        let q = quote(start, plus(start, 29), 500, None);
        assert_eq!(q.total, 15000);
        assert!(!q.discount_applied);
        let q = quote(start, plus(start, 29), 500, Some(0));
        assert_eq!(q.total, 15000);
        assert!(!q.discount_applied);
    }

    #[test]
    fn fractional_minor_units_truncate() {
        // 28 * 333 = 9324; 9324 * 0.85 = 7925.4 -> 7925
        let start = d("2030-03-01");
        let q = quote(start, plus(start, 27), 333, Some(15));
        assert_eq!(q.total, 7925);

        // 28 * 7 = 196; 196 * 0.67 = 131.32 -> 131
        let q = quote(start, plus(start, 27), 7, Some(33));
        assert_eq!(q.total, 131);
    }

    #[test]
    fn full_discount() {
        let start = d("2030-03-01");
        let q = quote(start, plus(start, 30), 1000, Some(100));
        assert_eq!(q.total, 0);
        assert!(q.discount_applied);
    }
}
