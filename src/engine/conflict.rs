use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_STAY_DAYS;
use crate::model::*;

use super::EngineError;

/// Shortest bookable stay, in inclusive days.
pub const MIN_STAY_DAYS: i64 = 2;

/// The first active reservation whose stay overlaps `stay`, if any.
/// Canceled reservations never block.
pub fn first_conflict(st: &OfficeState, stay: &Stay) -> Option<Ulid> {
    st.overlapping(stay).find(|r| r.is_active()).map(|r| r.id)
}

pub fn has_conflict(st: &OfficeState, stay: &Stay) -> bool {
    first_conflict(st, stay).is_some()
}

/// Request-shape checks on the dates alone; no state is consulted.
pub(crate) fn validate_stay_shape(start: NaiveDate, end: NaiveDate) -> Result<Stay, EngineError> {
    if end < start {
        return Err(EngineError::validation(
            "end_date",
            "The end date must be a date after start date.",
        ));
    }
    let stay = Stay::new(start, end);
    check_min_stay(&stay)?;
    if stay.days() > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

pub(crate) fn check_min_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.days() < MIN_STAY_DAYS {
        return Err(EngineError::validation(
            "start_date",
            "You cannot make a reservation for only 1 day",
        ));
    }
    Ok(())
}

pub(crate) fn check_start_in_future(start: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if start <= today {
        return Err(EngineError::validation(
            "start_date",
            "The start date must be a date after today.",
        ));
    }
    Ok(())
}

/// Office-side gates: not the guest's own office, approved and visible.
pub(crate) fn check_bookable(office: &Office, user_id: Ulid) -> Result<(), EngineError> {
    if office.owner_id == user_id {
        return Err(EngineError::validation(
            "office_id",
            "You cannot make a reservation on your own office",
        ));
    }
    if !office.is_bookable() {
        return Err(EngineError::validation(
            "office_id",
            "You cannot make a reservation on a hidden office",
        ));
    }
    Ok(())
}

pub(crate) fn parse_day(field: &'static str, raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        EngineError::validation(field, format!("The {field} does not match the format Y-m-d."))
    })
}

impl NewReservation {
    /// Build a request from raw `Y-m-d` date strings.
    pub fn parse(office_id: Ulid, user_id: Ulid, start: &str, end: &str) -> Result<Self, EngineError> {
        Ok(Self {
            office_id,
            user_id,
            start: parse_day("start_date", start)?,
            end: parse_day("end_date", end)?,
        })
    }
}
