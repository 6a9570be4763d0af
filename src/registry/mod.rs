//! Seat registry: one record per physical seat.
//!
//! State machine:
//! - `empty → occupied` via `reserve`
//! - `occupied → empty` via `release` (operator, `auto_released = false`) or the
//!   auto-release sweep (`auto_released = true`)
//! - detection reports only refresh `last_detected_at`
//!
//! Every operation is a read-modify-write of one record performed while the
//! store lock is held, so concurrent mutations of a seat are serialized and a
//! losing `reserve` observes `Conflict`.

mod error;
mod seat;
mod store;
pub mod sweeper;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};

use crate::clock::{Clock, SystemClock};

pub use error::{FieldErrors, RegistryError, RegistryResult};
pub use seat::{Seat, SeatStatus, SeatUpdate, DEFAULT_USER_NAME};
pub use store::{InMemorySeatStore, SeatStore, SqliteSeatStore};

pub const DEFAULT_AUTO_RELEASE_MINUTES: u32 = 15;

/// What `ingest_detection` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// `last_detected_at` was refreshed.
    Updated(Seat),
    /// `person_detected` was false; nothing changed.
    NoPerson,
}

pub struct SeatRegistry {
    store: Mutex<Box<dyn SeatStore>>,
    clock: Arc<dyn Clock>,
}

impl SeatRegistry {
    pub fn new(store: Box<dyn SeatStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Box<dyn SeatStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(store),
            clock,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemorySeatStore::new()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> RegistryResult<MutexGuard<'_, Box<dyn SeatStore>>> {
        self.store
            .lock()
            .map_err(|_| RegistryError::Storage(anyhow!("seat store lock poisoned")))
    }

    fn load(store: &mut Box<dyn SeatStore>, seat_number: u32) -> RegistryResult<Seat> {
        store
            .get(seat_number)?
            .ok_or(RegistryError::NotFound(seat_number))
    }

    /// Ensure a record exists for each seat number. Existing records are untouched.
    pub fn provision(&self, seat_numbers: &[u32]) -> RegistryResult<Vec<u32>> {
        let mut store = self.lock()?;
        let mut created = Vec::new();
        for &number in seat_numbers {
            if number == 0 {
                return Err(RegistryError::field(
                    "seat_number",
                    "Ensure this value is greater than or equal to 1.",
                ));
            }
            if store.insert(&Seat::new(number))? {
                created.push(number);
            }
        }
        Ok(created)
    }

    pub fn list(&self) -> RegistryResult<Vec<Seat>> {
        Ok(self.lock()?.list()?)
    }

    pub fn get(&self, seat_number: u32) -> RegistryResult<Seat> {
        let mut store = self.lock()?;
        Self::load(&mut store, seat_number)
    }

    pub fn create(&self, seat_number: u32) -> RegistryResult<Seat> {
        if seat_number == 0 {
            return Err(RegistryError::field(
                "seat_number",
                "Ensure this value is greater than or equal to 1.",
            ));
        }
        let seat = Seat::new(seat_number);
        if !self.lock()?.insert(&seat)? {
            return Err(RegistryError::field(
                "seat_number",
                "seat with this seat number already exists.",
            ));
        }
        log::info!("seat {} created", seat_number);
        Ok(seat)
    }

    pub fn update(&self, seat_number: u32, update: SeatUpdate) -> RegistryResult<Seat> {
        let mut store = self.lock()?;
        let seat = Self::load(&mut store, seat_number)?;
        let next = update.apply_to(&seat)?;
        store.save(&next)?;
        Ok(next)
    }

    pub fn delete(&self, seat_number: u32) -> RegistryResult<()> {
        if !self.lock()?.delete(seat_number)? {
            return Err(RegistryError::NotFound(seat_number));
        }
        log::info!("seat {} deleted", seat_number);
        Ok(())
    }

    pub fn reserve(&self, seat_number: u32, user_name: Option<&str>) -> RegistryResult<Seat> {
        let mut store = self.lock()?;
        let mut seat = Self::load(&mut store, seat_number)?;
        seat.reserve(user_name, self.clock.now())?;
        store.save(&seat)?;
        log::info!(
            "seat {} reserved by {}",
            seat_number,
            seat.user_name.as_deref().unwrap_or(DEFAULT_USER_NAME)
        );
        Ok(seat)
    }

    pub fn release(&self, seat_number: u32, auto: bool) -> RegistryResult<Seat> {
        let mut store = self.lock()?;
        let mut seat = Self::load(&mut store, seat_number)?;
        seat.release(auto)?;
        store.save(&seat)?;
        log::info!("seat {} released (auto={})", seat_number, auto);
        Ok(seat)
    }

    /// Apply an edge report. `last_detected_at` takes server time; the reported
    /// timestamp is accepted but not stored.
    pub fn ingest_detection(
        &self,
        seat_number: u32,
        person_detected: bool,
        reported_at: DateTime<Utc>,
    ) -> RegistryResult<DetectionOutcome> {
        let mut store = self.lock()?;
        let mut seat = Self::load(&mut store, seat_number)?;
        if !person_detected {
            return Ok(DetectionOutcome::NoPerson);
        }
        let now = self.clock.now();
        seat.record_detection(now);
        store.save(&seat)?;
        log::debug!(
            "seat {} detection refreshed (reported_at={}, skew={}s)",
            seat_number,
            reported_at.to_rfc3339(),
            now.signed_duration_since(reported_at).num_seconds()
        );
        Ok(DetectionOutcome::Updated(seat))
    }

    /// Release every occupied seat unseen for longer than `threshold_minutes`.
    /// Returns released seat numbers in ascending order.
    pub fn auto_release_sweep(&self, threshold_minutes: u32) -> RegistryResult<Vec<u32>> {
        let threshold = Duration::minutes(i64::from(threshold_minutes));
        let now = self.clock.now();
        let mut store = self.lock()?;
        let mut released = Vec::new();
        for mut seat in store.list()? {
            if !seat.is_stale(now, threshold) {
                continue;
            }
            seat.release(true)?;
            if let Err(source) = store.save(&seat) {
                log::error!(
                    "auto-release sweep failed on seat {} after releasing {:?}: {:#}",
                    seat.seat_number,
                    released,
                    source
                );
                return Err(RegistryError::SweepInterrupted { released, source });
            }
            released.push(seat.seat_number);
        }
        if !released.is_empty() {
            log::info!(
                "auto-release sweep (>{} min) released seats {:?}",
                threshold_minutes,
                released
            );
        }
        Ok(released)
    }
}
