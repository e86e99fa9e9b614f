mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{MIN_STAY_DAYS, first_conflict, has_conflict};
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::journal::{Journal, WalJournal};
use crate::lock::LockManager;
use crate::model::*;
use crate::notify::Notifier;
use crate::storage::ImageStorage;

pub type SharedOfficeState = Arc<RwLock<OfficeState>>;

/// The booking engine: in-memory office state rebuilt from the journal,
/// per-office leases for booking, and the outbound boundaries.
pub struct Engine {
    pub(super) offices: DashMap<Ulid, SharedOfficeState>,
    /// Reverse lookup: reservation id → office id
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    pub(super) journal: Arc<dyn Journal>,
    pub(super) locks: LockManager,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) images: Arc<dyn ImageStorage>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    /// Shared by every journal-append + apply, exclusive for compaction, so a
    /// compaction snapshot never misses a commit. Taken before any office guard.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an office-scoped event. Caller holds the write guard.
fn apply_to_office(st: &mut OfficeState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::OfficeUpdated { office } => {
            st.office = office.clone();
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.office_id);
            st.insert_reservation(reservation.clone());
        }
        Event::ReservationCanceled { id, .. } => {
            if let Some(r) = st.reservation_mut(*id) {
                r.status = ReservationStatus::Canceled;
            }
        }
        // Registration and deletion are handled at the map level, not here
        Event::OfficeRegistered { .. } | Event::OfficeDeleted { .. } => {}
    }
}

/// The office an office-scoped event belongs to.
fn event_office_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::OfficeUpdated { office } => Some(office.id),
        Event::ReservationCreated { reservation } => Some(reservation.office_id),
        Event::ReservationCanceled { office_id, .. } => Some(*office_id),
        Event::OfficeRegistered { .. } | Event::OfficeDeleted { .. } => None,
    }
}

impl Engine {
    /// Open the WAL under `config.data_dir`, replay it, and start the writer.
    pub fn open(
        config: EngineConfig,
        notifier: Arc<dyn Notifier>,
        images: Arc<dyn ImageStorage>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let (journal, history) = WalJournal::open(&config.wal_path())?;
        tracing::info!(
            "journal {} replayed: {} events",
            config.wal_path().display(),
            history.len()
        );
        Ok(Self::from_journal(
            Arc::new(journal),
            history,
            notifier,
            images,
            Arc::new(SystemClock),
            config,
        ))
    }

    /// Build an engine over any journal, rebuilding state from `history`.
    pub fn from_journal(
        journal: Arc<dyn Journal>,
        history: Vec<Event>,
        notifier: Arc<dyn Notifier>,
        images: Arc<dyn ImageStorage>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let index = DashMap::new();
        let mut states: HashMap<Ulid, OfficeState> = HashMap::new();

        for event in &history {
            match event {
                Event::OfficeRegistered { office } => {
                    states.insert(office.id, OfficeState::new(office.clone()));
                }
                Event::OfficeDeleted { id } => {
                    if let Some(st) = states.remove(id) {
                        for r in &st.reservations {
                            index.remove(&r.id);
                        }
                    }
                }
                other => {
                    if let Some(office_id) = event_office_id(other)
                        && let Some(st) = states.get_mut(&office_id)
                    {
                        apply_to_office(st, other, &index);
                    }
                }
            }
        }

        let offices = DashMap::with_capacity(states.len());
        for (id, st) in states {
            offices.insert(id, Arc::new(RwLock::new(st)));
        }
        metrics::gauge!(crate::observability::OFFICES_ACTIVE).set(offices.len() as f64);

        Self {
            offices,
            reservation_index: index,
            journal,
            locks: LockManager::new(),
            notifier,
            images,
            clock,
            config,
            commit_gate: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub(super) fn office_state(&self, id: &Ulid) -> Option<SharedOfficeState> {
        self.offices.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every office handle, so no map guard is held across awaits.
    pub(super) fn office_states(&self) -> Vec<SharedOfficeState> {
        self.offices.iter().map(|e| e.value().clone()).collect()
    }

    /// Hold while journaling and applying a change.
    pub(super) async fn begin_commit(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Make an event durable. Nothing is applied in memory if this fails.
    /// Caller holds the commit gate.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.journal
            .append(event)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Journal-append + apply in one call, for office-scoped events.
    /// Caller holds the commit gate and the office write guard.
    pub(super) async fn persist_and_apply(&self, st: &mut OfficeState, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_office(st, event, &self.reservation_index);
        Ok(())
    }

    /// Rewrite the journal with just the events needed to recreate current state.
    /// Canceled reservations are kept: they are history, not garbage.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();
        for shared in self.office_states() {
            let st = shared.read().await;
            events.push(Event::OfficeRegistered {
                office: st.office.clone(),
            });
            events.extend(st.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        let count = events.len();
        self.journal
            .compact(events)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        tracing::info!("journal compacted to {count} events");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
