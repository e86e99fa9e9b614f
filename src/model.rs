use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::geo::GeoPoint;

/// Integer currency minor units (cents). Prices never touch floating point.
pub type Minor = u64;

/// Closed calendar-day range `[start, end]`. Both days are part of the stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "Stay start must not be after end");
        Self { start, end }
    }

    /// Inclusive day count: a stay starting and ending on the same day is 1 day.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Office {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub title: String,
    pub location: GeoPoint,
    pub daily_rate: Minor,
    /// Percentage (0-100) taken off stays of 28 days or more.
    pub monthly_discount: Option<u8>,
    pub approval: ApprovalStatus,
    pub hidden: bool,
    /// Storage paths of uploaded images, released on teardown.
    pub images: Vec<String>,
}

impl Office {
    pub fn is_bookable(&self) -> bool {
        self.approval == ApprovalStatus::Approved && !self.hidden
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub office_id: Ulid,
    pub user_id: Ulid,
    pub stay: Stay,
    pub status: ReservationStatus,
    pub price: Minor,
    /// Per-stay access credential handed to the guest (the wifi password).
    pub access_secret: String,
    pub created_on: NaiveDate,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// An office and every reservation ever made against it.
#[derive(Debug, Clone)]
pub struct OfficeState {
    pub office: Office,
    /// All reservations (active and canceled), sorted by `stay.start`.
    pub reservations: Vec<Reservation>,
}

impl OfficeState {
    pub fn new(office: Office) -> Self {
        Self {
            office,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by stay.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.start <= reservation.stay.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any status) whose stay overlaps `query`.
    /// Everything starting after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.start <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.end >= query.start)
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.is_active()).count()
    }
}

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OfficeRegistered { office: Office },
    /// Full snapshot of the office after an edit, approval or visibility change.
    OfficeUpdated { office: Office },
    OfficeDeleted { id: Ulid },
    ReservationCreated { reservation: Reservation },
    ReservationCanceled { id: Ulid, office_id: Ulid },
}

// ── Requests ─────────────────────────────────────────────────────

/// A booking request. Dates are timezone-naive calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub office_id: Ulid,
    pub user_id: Ulid,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOffice {
    pub owner_id: Ulid,
    pub title: String,
    pub location: GeoPoint,
    pub daily_rate: Minor,
    pub monthly_discount: Option<u8>,
}

/// Partial office edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfficePatch {
    pub title: Option<String>,
    pub location: Option<GeoPoint>,
    pub daily_rate: Option<Minor>,
    /// `Some(None)` clears the discount.
    pub monthly_discount: Option<Option<u8>>,
    pub hidden: Option<bool>,
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub user_id: Option<Ulid>,
    pub office_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfficeFilter {
    /// Who is asking. Owners listing their own offices also see hidden and pending ones.
    pub viewer_id: Option<Ulid>,
    pub owner_id: Option<Ulid>,
    /// Only offices this user has reserved.
    pub visitor_id: Option<Ulid>,
    /// Rank by distance from this point; id order when absent.
    pub near: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfficeListing {
    pub office: Office,
    pub distance_km: Option<f64>,
    pub active_reservations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn reservation(start: &str, end: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            office_id: Ulid::new(),
            user_id: Ulid::new(),
            stay: Stay::new(d(start), d(end)),
            status,
            price: 0,
            access_secret: String::new(),
            created_on: d("2030-01-01"),
        }
    }

    #[test]
    fn stay_days_inclusive() {
        assert_eq!(Stay::new(d("2030-03-01"), d("2030-03-01")).days(), 1);
        assert_eq!(Stay::new(d("2030-03-01"), d("2030-03-02")).days(), 2);
        assert_eq!(Stay::new(d("2030-02-01"), d("2030-03-12")).days(), 40);
    }

    #[test]
    fn stay_overlap_is_closed() {
        let a = Stay::new(d("2030-03-01"), d("2030-03-05"));
        let touching = Stay::new(d("2030-03-05"), d("2030-03-09"));
        let after = Stay::new(d("2030-03-06"), d("2030-03-09"));
        let inside = Stay::new(d("2030-03-02"), d("2030-03-03"));
        assert!(a.overlaps(&touching)); // shared last day counts
        assert!(touching.overlaps(&a));
        assert!(!a.overlaps(&after));
        assert!(a.overlaps(&inside));
        assert!(inside.overlaps(&a));
    }

    #[test]
    fn stay_contains_day() {
        let s = Stay::new(d("2030-03-01"), d("2030-03-03"));
        assert!(s.contains_day(d("2030-03-01")));
        assert!(s.contains_day(d("2030-03-03")));
        assert!(!s.contains_day(d("2030-03-04")));
    }

    fn office_state() -> OfficeState {
        OfficeState::new(Office {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            title: "Loft".into(),
            location: GeoPoint { lat: 38.7, lng: -9.1 },
            daily_rate: 1000,
            monthly_discount: None,
            approval: ApprovalStatus::Approved,
            hidden: false,
            images: Vec::new(),
        })
    }

    #[test]
    fn reservations_kept_sorted() {
        let mut st = office_state();
        st.insert_reservation(reservation("2030-05-01", "2030-05-03", ReservationStatus::Active));
        st.insert_reservation(reservation("2030-03-01", "2030-03-03", ReservationStatus::Active));
        st.insert_reservation(reservation("2030-04-01", "2030-04-03", ReservationStatus::Canceled));
        let starts: Vec<_> = st.reservations.iter().map(|r| r.stay.start).collect();
        assert_eq!(starts, vec![d("2030-03-01"), d("2030-04-01"), d("2030-05-01")]);
        assert_eq!(st.active_count(), 2);
    }

    #[test]
    fn overlapping_skips_before_and_after() {
        let mut st = office_state();
        st.insert_reservation(reservation("2030-03-01", "2030-03-04", ReservationStatus::Active));
        st.insert_reservation(reservation("2030-03-10", "2030-03-12", ReservationStatus::Active));
        st.insert_reservation(reservation("2030-03-20", "2030-03-25", ReservationStatus::Active));

        let query = Stay::new(d("2030-03-04"), d("2030-03-10"));
        let hits: Vec<_> = st.overlapping(&query).map(|r| r.stay.start).collect();
        assert_eq!(hits, vec![d("2030-03-01"), d("2030-03-10")]);

        let gap = Stay::new(d("2030-03-13"), d("2030-03-19"));
        assert_eq!(st.overlapping(&gap).count(), 0);
    }

    #[test]
    fn overlapping_long_stay_spanning_query() {
        let mut st = office_state();
        st.insert_reservation(reservation("2030-01-01", "2030-12-31", ReservationStatus::Active));
        let query = Stay::new(d("2030-06-01"), d("2030-06-02"));
        assert_eq!(st.overlapping(&query).count(), 1);
    }

    #[test]
    fn unbookable_offices() {
        let mut st = office_state();
        assert!(st.office.is_bookable());
        st.office.hidden = true;
        assert!(!st.office.is_bookable());
        st.office.hidden = false;
        st.office.approval = ApprovalStatus::Pending;
        assert!(!st.office.is_bookable());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation("2030-03-01", "2030-03-04", ReservationStatus::Active),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
