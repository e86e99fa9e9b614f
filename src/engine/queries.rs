use chrono::NaiveDate;
use ulid::Ulid;

use crate::geo::rank_by_distance;
use crate::limits::MAX_LISTING_WINDOW_DAYS;
use crate::model::*;

use super::conflict;
use super::{Engine, EngineError};

/// Check the optional `from..=to` listing window: both or neither, `to`
/// strictly after `from`, bounded length.
fn listing_window(filter: &ReservationFilter) -> Result<Option<Stay>, EngineError> {
    match (filter.from_date, filter.to_date) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(EngineError::validation(
            "to_date",
            "The to date field is required when from date is present.",
        )),
        (None, Some(_)) => Err(EngineError::validation(
            "from_date",
            "The from date field is required when to date is present.",
        )),
        (Some(from), Some(to)) => {
            if to <= from {
                return Err(EngineError::validation(
                    "to_date",
                    "The to date must be a date after from date.",
                ));
            }
            let window = Stay::new(from, to);
            if window.days() > MAX_LISTING_WINDOW_DAYS {
                return Err(EngineError::LimitExceeded("listing window too long"));
            }
            Ok(Some(window))
        }
    }
}

fn reservation_matches(r: &Reservation, filter: &ReservationFilter, window: Option<&Stay>) -> bool {
    filter.user_id.is_none_or(|u| r.user_id == u)
        && filter.office_id.is_none_or(|o| r.office_id == o)
        && filter.status.is_none_or(|s| r.status == s)
        && window.is_none_or(|w| r.stay.overlaps(w))
}

impl Engine {
    pub async fn get_office(&self, office_id: Ulid) -> Result<Office, EngineError> {
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(office_id))?;
        let st = shared.read().await;
        Ok(st.office.clone())
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let office_id = self
            .reservation_index
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(reservation_id))?;
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let st = shared.read().await;
        st.reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))
    }

    /// The first active reservation on the office overlapping `[start, end]`.
    /// A point-in-time answer: only a booking under the office lease is
    /// guaranteed to see no conflict appear afterwards.
    pub async fn first_conflict(
        &self,
        office_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Ulid>, EngineError> {
        if end < start {
            return Err(EngineError::validation(
                "end_date",
                "The end date must be a date after start date.",
            ));
        }
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(office_id))?;
        let st = shared.read().await;
        Ok(conflict::first_conflict(&st, &Stay::new(start, end)))
    }

    pub async fn has_conflict(&self, office_id: Ulid, start: NaiveDate, end: NaiveDate) -> Result<bool, EngineError> {
        Ok(self.first_conflict(office_id, start, end).await?.is_some())
    }

    /// Reservations matching `filter`, ordered by id.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let window = listing_window(filter)?;
        let offices = match filter.office_id {
            Some(id) => self.office_state(&id).into_iter().collect(),
            None => self.office_states(),
        };

        let mut out = Vec::new();
        for shared in offices {
            let st = shared.read().await;
            out.extend(
                st.reservations
                    .iter()
                    .filter(|r| reservation_matches(r, filter, window.as_ref()))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    /// Reservations made against any office owned by `owner_id`.
    pub async fn host_reservations(
        &self,
        owner_id: Ulid,
        filter: &ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = listing_window(filter)?;
        let mut out = Vec::new();
        for shared in self.office_states() {
            let st = shared.read().await;
            if st.office.owner_id != owner_id {
                continue;
            }
            out.extend(
                st.reservations
                    .iter()
                    .filter(|r| reservation_matches(r, filter, window.as_ref()))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    /// Browse offices. Only approved, visible offices are listed, except that
    /// an owner listing their own offices also sees hidden and pending ones.
    /// Ranked nearest-first when `near` is set, by id otherwise.
    pub async fn list_offices(&self, filter: &OfficeFilter) -> Vec<OfficeListing> {
        let own_listing = filter.owner_id.is_some() && filter.owner_id == filter.viewer_id;

        let mut candidates = Vec::new();
        let mut active_counts = std::collections::HashMap::new();
        for shared in self.office_states() {
            let st = shared.read().await;
            let office = &st.office;
            if filter.owner_id.is_some_and(|o| office.owner_id != o) {
                continue;
            }
            if !own_listing && !office.is_bookable() {
                continue;
            }
            if let Some(visitor) = filter.visitor_id
                && !st.reservations.iter().any(|r| r.user_id == visitor)
            {
                continue;
            }
            active_counts.insert(office.id, st.active_count());
            candidates.push(office.clone());
        }

        rank_by_distance(filter.near.as_ref(), candidates)
            .into_iter()
            .map(|(office, distance_km)| OfficeListing {
                active_reservations: active_counts.get(&office.id).copied().unwrap_or(0),
                office,
                distance_km,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn window_needs_both_ends() {
        let only_from = ReservationFilter {
            from_date: Some(d("2030-03-01")),
            ..Default::default()
        };
        assert!(matches!(
            listing_window(&only_from),
            Err(EngineError::Validation { field: "to_date", .. })
        ));
        let only_to = ReservationFilter {
            to_date: Some(d("2030-03-01")),
            ..Default::default()
        };
        assert!(matches!(
            listing_window(&only_to),
            Err(EngineError::Validation { field: "from_date", .. })
        ));
        assert_eq!(listing_window(&ReservationFilter::default()).unwrap(), None);
    }

    #[test]
    fn window_must_move_forward() {
        let same_day = ReservationFilter {
            from_date: Some(d("2030-03-01")),
            to_date: Some(d("2030-03-01")),
            ..Default::default()
        };
        assert!(matches!(
            listing_window(&same_day),
            Err(EngineError::Validation { field: "to_date", .. })
        ));
        let huge = ReservationFilter {
            from_date: Some(d("2030-01-01")),
            to_date: Some(d("2045-01-01")),
            ..Default::default()
        };
        assert!(matches!(listing_window(&huge), Err(EngineError::LimitExceeded(_))));
    }
}
