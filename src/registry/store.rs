use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::seat::{Seat, SeatStatus};

/// Persistence for seat records. Callers serialize access.
pub trait SeatStore: Send {
    fn get(&mut self, seat_number: u32) -> Result<Option<Seat>>;

    /// All seats ordered by seat number.
    fn list(&mut self) -> Result<Vec<Seat>>;

    /// Insert a new record. Returns false when the seat number already exists.
    fn insert(&mut self, seat: &Seat) -> Result<bool>;

    /// Overwrite an existing record.
    fn save(&mut self, seat: &Seat) -> Result<()>;

    /// Returns false when nothing was deleted.
    fn delete(&mut self, seat_number: u32) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemorySeatStore {
    seats: BTreeMap<u32, Seat>,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeatStore for InMemorySeatStore {
    fn get(&mut self, seat_number: u32) -> Result<Option<Seat>> {
        Ok(self.seats.get(&seat_number).cloned())
    }

    fn list(&mut self) -> Result<Vec<Seat>> {
        Ok(self.seats.values().cloned().collect())
    }

    fn insert(&mut self, seat: &Seat) -> Result<bool> {
        if self.seats.contains_key(&seat.seat_number) {
            return Ok(false);
        }
        self.seats.insert(seat.seat_number, seat.clone());
        Ok(true)
    }

    fn save(&mut self, seat: &Seat) -> Result<()> {
        match self.seats.get_mut(&seat.seat_number) {
            Some(slot) => {
                *slot = seat.clone();
                Ok(())
            }
            None => Err(anyhow!("seat {} does not exist", seat.seat_number)),
        }
    }

    fn delete(&mut self, seat_number: u32) -> Result<bool> {
        Ok(self.seats.remove(&seat_number).is_some())
    }
}

pub struct SqliteSeatStore {
    conn: Connection,
}

impl SqliteSeatStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS seats (
              seat_number INTEGER PRIMARY KEY CHECK (seat_number > 0),
              status TEXT NOT NULL DEFAULT 'empty',
              user_name TEXT,
              reserved_at TEXT,
              last_detected_at TEXT,
              auto_released INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_seats_status ON seats(status);
            "#,
        )?;
        Ok(())
    }
}

const SEAT_COLUMNS: &str =
    "seat_number, status, user_name, reserved_at, last_detected_at, auto_released";

fn seat_from_row(row: &Row<'_>) -> rusqlite::Result<Seat> {
    let status: String = row.get(1)?;
    let status = SeatStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown seat status '{status}'").into(),
        )
    })?;
    Ok(Seat {
        seat_number: row.get(0)?,
        status,
        user_name: row.get(2)?,
        reserved_at: row.get(3)?,
        last_detected_at: row.get(4)?,
        auto_released: row.get(5)?,
    })
}

impl SeatStore for SqliteSeatStore {
    fn get(&mut self, seat_number: u32) -> Result<Option<Seat>> {
        let sql = format!("SELECT {SEAT_COLUMNS} FROM seats WHERE seat_number = ?1");
        let seat = self
            .conn
            .query_row(&sql, params![seat_number], seat_from_row)
            .optional()?;
        Ok(seat)
    }

    fn list(&mut self) -> Result<Vec<Seat>> {
        let sql = format!("SELECT {SEAT_COLUMNS} FROM seats ORDER BY seat_number");
        let mut stmt = self.conn.prepare(&sql)?;
        let seats = stmt
            .query_map([], seat_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(seats)
    }

    fn insert(&mut self, seat: &Seat) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO seats
               (seat_number, status, user_name, reserved_at, last_detected_at, auto_released)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                seat.seat_number,
                seat.status.as_str(),
                seat.user_name,
                seat.reserved_at,
                seat.last_detected_at,
                seat.auto_released
            ],
        )?;
        Ok(inserted == 1)
    }

    fn save(&mut self, seat: &Seat) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE seats
               SET status = ?2, user_name = ?3, reserved_at = ?4,
                   last_detected_at = ?5, auto_released = ?6
             WHERE seat_number = ?1",
            params![
                seat.seat_number,
                seat.status.as_str(),
                seat.user_name,
                seat.reserved_at,
                seat.last_detected_at,
                seat.auto_released
            ],
        )?;
        if updated != 1 {
            return Err(anyhow!("seat {} does not exist", seat.seat_number));
        }
        Ok(())
    }

    fn delete(&mut self, seat_number: u32) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM seats WHERE seat_number = ?1", params![seat_number])?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn exercise_store(store: &mut dyn SeatStore) {
        assert!(store.insert(&Seat::new(2)).unwrap());
        assert!(store.insert(&Seat::new(1)).unwrap());
        assert!(!store.insert(&Seat::new(1)).unwrap());

        let mut seat = store.get(1).unwrap().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        seat.reserve(Some("alice"), at).unwrap();
        store.save(&seat).unwrap();
        assert_eq!(store.get(1).unwrap(), Some(seat));

        let numbers: Vec<u32> = store.list().unwrap().iter().map(|s| s.seat_number).collect();
        assert_eq!(numbers, vec![1, 2]);

        assert!(store.delete(2).unwrap());
        assert!(!store.delete(2).unwrap());
        assert!(store.get(2).unwrap().is_none());
        assert!(store.save(&Seat::new(9)).is_err());
    }

    #[test]
    fn in_memory_store_round_trips_seats() {
        exercise_store(&mut InMemorySeatStore::new());
    }

    #[test]
    fn sqlite_store_round_trips_seats() {
        let mut store = SqliteSeatStore::open(&crate::shared_memory_uri()).unwrap();
        exercise_store(&mut store);
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seats.db");
        let path = path.to_string_lossy().to_string();
        {
            let mut store = SqliteSeatStore::open(&path).unwrap();
            store.insert(&Seat::new(7)).unwrap();
        }
        let mut store = SqliteSeatStore::open(&path).unwrap();
        assert_eq!(store.get(7).unwrap(), Some(Seat::new(7)));
    }
}
