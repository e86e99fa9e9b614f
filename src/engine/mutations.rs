use std::sync::Arc;
use std::time::Instant;

use rand::distributions::{Alphanumeric, DistString};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;
use crate::observability::{self, status_label};
use crate::pricing;

use super::conflict::{self, check_bookable, check_min_stay, check_start_in_future, validate_stay_shape};
use super::{Engine, EngineError};

/// Length of the per-stay access secret.
const ACCESS_SECRET_LEN: usize = 16;

fn invalid_office() -> EngineError {
    EngineError::validation("office_id", "Invalid office_id")
}

fn cannot_cancel() -> EngineError {
    EngineError::validation("reservation", "You cannot cancel this reservation")
}

fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::validation("title", "The title field is required."));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("office title too long"));
    }
    Ok(())
}

fn validate_discount(discount: Option<u8>) -> Result<(), EngineError> {
    if discount.is_some_and(|pct| pct > 100) {
        return Err(EngineError::validation(
            "monthly_discount",
            "The monthly discount must be between 0 and 100.",
        ));
    }
    Ok(())
}

impl Engine {
    // ── Booking ──────────────────────────────────────────────────

    /// Book a stay. Validates the request, then under the office lease:
    /// conflict check, price, journal, apply. Both parties are notified
    /// after the lease is released.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.book(req).await;
        metrics::counter!(observability::BOOKINGS_TOTAL, "status" => status_label(&result, "created"))
            .increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok((reservation, owner_id)) => {
                info!(
                    "reservation {} on office {} for {} days: {}",
                    reservation.id,
                    reservation.office_id,
                    reservation.stay.days(),
                    reservation.price
                );
                self.notifier.notify(
                    reservation.user_id,
                    Notice::NewUserReservation { reservation: reservation.clone() },
                );
                self.notifier.notify(
                    owner_id,
                    Notice::NewHostReservation { reservation: reservation.clone() },
                );
                Ok(reservation)
            }
            Err(e) => {
                debug!("booking on office {} rejected: {e}", req.office_id);
                Err(e)
            }
        }
    }

    /// Returns the committed reservation and the office owner to notify.
    async fn book(&self, req: NewReservation) -> Result<(Reservation, Ulid), EngineError> {
        let stay = validate_stay_shape(req.start, req.end)?;
        let shared = self.office_state(&req.office_id).ok_or_else(invalid_office)?;
        {
            let st = shared.read().await;
            check_bookable(&st.office, req.user_id)?;
        }
        let today = self.clock.today();
        check_start_in_future(stay.start, today)?;

        let critical = async {
            let _commit = self.begin_commit().await;
            let mut st = shared.write().await;

            // Re-read under the lease: the office may have been torn down,
            // hidden or sent back to review while we waited.
            if !self.offices.contains_key(&req.office_id) {
                return Err(invalid_office());
            }
            check_bookable(&st.office, req.user_id)?;
            check_min_stay(&stay)?;
            if let Some(existing) = conflict::first_conflict(&st, &stay) {
                return Err(EngineError::Conflict(existing));
            }
            if st.reservations.len() >= MAX_RESERVATIONS_PER_OFFICE {
                return Err(EngineError::LimitExceeded("too many reservations on office"));
            }

            let quote = pricing::quote(stay.start, stay.end, st.office.daily_rate, st.office.monthly_discount);
            let reservation = Reservation {
                id: Ulid::new(),
                office_id: req.office_id,
                user_id: req.user_id,
                stay,
                status: ReservationStatus::Active,
                price: quote.total,
                access_secret: Alphanumeric.sample_string(&mut rand::thread_rng(), ACCESS_SECRET_LEN),
                created_on: today,
            };
            let event = Event::ReservationCreated { reservation: reservation.clone() };
            self.persist_and_apply(&mut st, &event).await?;
            Ok((reservation, st.office.owner_id))
        };

        self.locks
            .with_lock(req.office_id, self.config.lock_hold, self.config.lock_wait, critical)
            .await
    }

    /// Cancel one of the caller's own reservations before it starts.
    /// Takes no lease: cancellation only ever frees days.
    pub async fn cancel_reservation(&self, reservation_id: Ulid, user_id: Ulid) -> Result<Reservation, EngineError> {
        let result = self.cancel(reservation_id, user_id).await;
        metrics::counter!(observability::CANCELLATIONS_TOTAL, "status" => status_label(&result, "canceled"))
            .increment(1);
        if let Ok(r) = &result {
            info!("reservation {} on office {} canceled", r.id, r.office_id);
        }
        result
    }

    async fn cancel(&self, reservation_id: Ulid, user_id: Ulid) -> Result<Reservation, EngineError> {
        let office_id = self
            .reservation_index
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(reservation_id))?;
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let today = self.clock.today();

        let _commit = self.begin_commit().await;
        let mut st = shared.write().await;
        let current = st
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        if current.user_id != user_id || !current.is_active() || current.stay.start <= today {
            return Err(cannot_cancel());
        }

        let event = Event::ReservationCanceled { id: reservation_id, office_id };
        self.persist_and_apply(&mut st, &event).await?;
        st.reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))
    }

    // ── Office registry ──────────────────────────────────────────

    /// List a new office. It starts pending approval and visible.
    pub async fn register_office(&self, new: NewOffice) -> Result<Office, EngineError> {
        validate_title(&new.title)?;
        validate_discount(new.monthly_discount)?;
        if self.offices.len() >= MAX_OFFICES {
            return Err(EngineError::LimitExceeded("too many offices"));
        }

        let office = Office {
            id: Ulid::new(),
            owner_id: new.owner_id,
            title: new.title,
            location: new.location,
            daily_rate: new.daily_rate,
            monthly_discount: new.monthly_discount,
            approval: ApprovalStatus::Pending,
            hidden: false,
            images: Vec::new(),
        };

        let _commit = self.begin_commit().await;
        self.journal_append(&Event::OfficeRegistered { office: office.clone() })
            .await?;
        self.offices
            .insert(office.id, Arc::new(RwLock::new(OfficeState::new(office.clone()))));
        metrics::gauge!(observability::OFFICES_ACTIVE).set(self.offices.len() as f64);
        info!("office {} registered by {}", office.id, office.owner_id);
        Ok(office)
    }

    pub async fn approve_office(&self, office_id: Ulid) -> Result<Office, EngineError> {
        self.modify_office(office_id, |office| {
            office.approval = ApprovalStatus::Approved;
            Ok(())
        })
        .await
    }

    /// Apply a partial edit. An approved office whose location or rate
    /// changes (or discount, when the review policy says so) goes back to
    /// pending and the configured reviewers are told.
    pub async fn update_office(&self, office_id: Ulid, patch: OfficePatch) -> Result<Office, EngineError> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(discount) = patch.monthly_discount {
            validate_discount(discount)?;
        }
        let policy = self.config.review;
        let mut sent_back = false;

        let office = self
            .modify_office(office_id, |office| {
                let relocated = patch.location.is_some_and(|l| l != office.location);
                let repriced = patch.daily_rate.is_some_and(|r| r != office.daily_rate);
                let rediscounted = patch
                    .monthly_discount
                    .is_some_and(|d| d != office.monthly_discount);
                let needs_review = office.approval == ApprovalStatus::Approved
                    && (relocated || repriced || (policy.discount_triggers_review && rediscounted));

                if let Some(title) = &patch.title {
                    office.title = title.clone();
                }
                if let Some(location) = patch.location {
                    office.location = location;
                }
                if let Some(rate) = patch.daily_rate {
                    office.daily_rate = rate;
                }
                if let Some(discount) = patch.monthly_discount {
                    office.monthly_discount = discount;
                }
                if let Some(hidden) = patch.hidden {
                    office.hidden = hidden;
                }
                if needs_review {
                    office.approval = ApprovalStatus::Pending;
                    sent_back = true;
                }
                Ok(())
            })
            .await?;

        if sent_back {
            info!("office {office_id} returned to pending approval");
            for reviewer in &self.config.reviewers {
                self.notifier
                    .notify(*reviewer, Notice::OfficePendingApproval { office_id });
            }
        }
        Ok(office)
    }

    pub async fn set_hidden(&self, office_id: Ulid, hidden: bool) -> Result<Office, EngineError> {
        self.modify_office(office_id, |office| {
            office.hidden = hidden;
            Ok(())
        })
        .await
    }

    /// Record an uploaded image path against the office.
    pub async fn add_office_image(&self, office_id: Ulid, path: String) -> Result<Office, EngineError> {
        if path.trim().is_empty() {
            return Err(EngineError::validation("image", "The image field is required."));
        }
        if path.len() > MAX_IMAGE_PATH_LEN {
            return Err(EngineError::LimitExceeded("image path too long"));
        }
        self.modify_office(office_id, move |office| {
            if office.images.len() >= MAX_IMAGES_PER_OFFICE {
                return Err(EngineError::LimitExceeded("too many images on office"));
            }
            office.images.push(path);
            Ok(())
        })
        .await
    }

    /// Edit the office record under its write guard and journal the result.
    /// An edit that changes nothing is not journaled.
    async fn modify_office<F>(&self, office_id: Ulid, edit: F) -> Result<Office, EngineError>
    where
        F: FnOnce(&mut Office) -> Result<(), EngineError>,
    {
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(office_id))?;
        let _commit = self.begin_commit().await;
        let mut st = shared.write().await;

        let mut office = st.office.clone();
        edit(&mut office)?;
        if office == st.office {
            return Ok(office);
        }
        if office.approval != st.office.approval {
            debug!("office {office_id} approval {:?} -> {:?}", st.office.approval, office.approval);
        }
        let event = Event::OfficeUpdated { office: office.clone() };
        self.persist_and_apply(&mut st, &event).await?;
        Ok(office)
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Remove an office: refuse while it has active reservations, release
    /// its images, then journal the removal. Canceled reservations go with it.
    /// Runs under the office lease so no booking can slip in between steps.
    pub async fn delete_office(&self, office_id: Ulid) -> Result<(), EngineError> {
        let shared = self
            .office_state(&office_id)
            .ok_or(EngineError::NotFound(office_id))?;

        let teardown = async {
            let images = {
                let st = shared.read().await;
                if st.active_count() > 0 {
                    return Err(EngineError::HasActiveReservations(office_id));
                }
                st.office.images.clone()
            };

            for path in &images {
                self.images.delete(path).await.map_err(|e| {
                    warn!("office {office_id}: releasing image {path} failed: {e}");
                    EngineError::Storage {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                })?;
            }

            let _commit = self.begin_commit().await;
            let st = shared.write().await;
            if !self.offices.contains_key(&office_id) {
                return Err(EngineError::NotFound(office_id));
            }
            // The lease may have lapsed while images were released.
            if st.active_count() > 0 {
                return Err(EngineError::HasActiveReservations(office_id));
            }
            self.journal_append(&Event::OfficeDeleted { id: office_id }).await?;
            for r in &st.reservations {
                self.reservation_index.remove(&r.id);
            }
            self.offices.remove(&office_id);
            metrics::gauge!(observability::OFFICES_ACTIVE).set(self.offices.len() as f64);
            info!(
                "office {office_id} deleted with {} images and {} past reservations",
                images.len(),
                st.reservations.len()
            );
            Ok(())
        };

        self.locks
            .with_lock(office_id, self.config.lock_hold, self.config.lock_wait, teardown)
            .await
    }
}
