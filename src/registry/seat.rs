use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{RegistryError, RegistryResult};

pub const DEFAULT_USER_NAME: &str = "Anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Empty,
    Occupied,
    /// Declared for future use. No operation transitions into it.
    Reserved,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Empty => "empty",
            SeatStatus::Occupied => "occupied",
            SeatStatus::Reserved => "reserved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "empty" => Some(SeatStatus::Empty),
            "occupied" => Some(SeatStatus::Occupied),
            "reserved" => Some(SeatStatus::Reserved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub seat_number: u32,
    pub status: SeatStatus,
    pub user_name: Option<String>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub last_detected_at: Option<DateTime<Utc>>,
    pub auto_released: bool,
}

impl Seat {
    pub fn new(seat_number: u32) -> Self {
        Self {
            seat_number,
            status: SeatStatus::Empty,
            user_name: None,
            reserved_at: None,
            last_detected_at: None,
            auto_released: false,
        }
    }

    /// empty → occupied.
    pub fn reserve(&mut self, user_name: Option<&str>, now: DateTime<Utc>) -> RegistryResult<()> {
        if self.status != SeatStatus::Empty {
            return Err(RegistryError::Conflict("Seat is not available".to_string()));
        }
        let user_name = user_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USER_NAME);
        self.status = SeatStatus::Occupied;
        self.user_name = Some(user_name.to_string());
        self.reserved_at = Some(now);
        self.last_detected_at = Some(now);
        self.auto_released = false;
        Ok(())
    }

    /// occupied → empty. `auto` records whether the sweep triggered it.
    pub fn release(&mut self, auto: bool) -> RegistryResult<()> {
        if self.status != SeatStatus::Occupied {
            return Err(RegistryError::Conflict("Seat is not occupied".to_string()));
        }
        self.status = SeatStatus::Empty;
        self.user_name = None;
        self.reserved_at = None;
        self.last_detected_at = None;
        self.auto_released = auto;
        Ok(())
    }

    /// Refresh the presence timestamp. Status is never changed here.
    pub fn record_detection(&mut self, now: DateTime<Utc>) {
        self.last_detected_at = Some(now);
    }

    /// Occupied and unseen for strictly longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match (self.status, self.last_detected_at) {
            (SeatStatus::Occupied, Some(last)) => now.signed_duration_since(last) > threshold,
            _ => false,
        }
    }

    /// Status invariants required of records written through `update`.
    pub fn check_invariants(&self) -> RegistryResult<()> {
        match self.status {
            SeatStatus::Empty => {
                if self.user_name.is_some() || self.reserved_at.is_some() {
                    return Err(RegistryError::field(
                        "status",
                        "An empty seat cannot carry user_name or reserved_at.",
                    ));
                }
            }
            SeatStatus::Occupied => {
                if self.user_name.is_none() || self.reserved_at.is_none() {
                    return Err(RegistryError::field(
                        "status",
                        "An occupied seat requires user_name and reserved_at.",
                    ));
                }
            }
            SeatStatus::Reserved => {
                return Err(RegistryError::field(
                    "status",
                    "\"reserved\" has no supported transition.",
                ));
            }
        }
        Ok(())
    }
}

/// Partial update sent through the CRUD surface. `None` leaves a field as is;
/// `Some(None)` clears a nullable field.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeatUpdate {
    #[serde(default)]
    pub seat_number: Option<u32>,
    #[serde(default)]
    pub status: Option<SeatStatus>,
    #[serde(default, with = "double_option")]
    pub user_name: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub reserved_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, with = "double_option")]
    pub last_detected_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub auto_released: Option<bool>,
}

impl SeatUpdate {
    pub fn apply_to(self, seat: &Seat) -> RegistryResult<Seat> {
        if let Some(number) = self.seat_number {
            if number != seat.seat_number {
                return Err(RegistryError::field(
                    "seat_number",
                    "seat_number cannot be changed.",
                ));
            }
        }
        let mut next = seat.clone();
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(user_name) = self.user_name {
            next.user_name = user_name;
        }
        if let Some(reserved_at) = self.reserved_at {
            next.reserved_at = reserved_at;
        }
        if let Some(last_detected_at) = self.last_detected_at {
            next.last_detected_at = last_detected_at;
        }
        if let Some(auto_released) = self.auto_released {
            next.auto_released = auto_released;
        }
        next.check_invariants()?;
        Ok(next)
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn reserve_defaults_user_name_and_stamps_times() {
        let mut seat = Seat::new(1);
        seat.auto_released = true;
        seat.reserve(None, t0()).unwrap();
        assert_eq!(seat.status, SeatStatus::Occupied);
        assert_eq!(seat.user_name.as_deref(), Some(DEFAULT_USER_NAME));
        assert_eq!(seat.reserved_at, Some(t0()));
        assert_eq!(seat.last_detected_at, Some(t0()));
        assert!(!seat.auto_released);
    }

    #[test]
    fn reserve_on_occupied_seat_is_conflict_without_mutation() {
        let mut seat = Seat::new(1);
        seat.reserve(Some("alice"), t0()).unwrap();
        let before = seat.clone();
        let err = seat
            .reserve(Some("bob"), t0() + Duration::minutes(1))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(seat, before);
    }

    #[test]
    fn release_on_empty_seat_is_conflict_without_mutation() {
        let mut seat = Seat::new(2);
        let before = seat.clone();
        assert!(matches!(
            seat.release(false).unwrap_err(),
            RegistryError::Conflict(_)
        ));
        assert_eq!(seat, before);
    }

    #[test]
    fn release_clears_reservation_metadata() {
        let mut seat = Seat::new(1);
        seat.reserve(Some("alice"), t0()).unwrap();
        seat.release(true).unwrap();
        assert_eq!(seat.status, SeatStatus::Empty);
        assert!(seat.user_name.is_none());
        assert!(seat.reserved_at.is_none());
        assert!(seat.last_detected_at.is_none());
        assert!(seat.auto_released);
    }

    #[test]
    fn staleness_is_strictly_greater_than_threshold() {
        let mut seat = Seat::new(1);
        seat.reserve(Some("alice"), t0()).unwrap();
        let threshold = Duration::minutes(15);
        assert!(!seat.is_stale(t0() + Duration::minutes(15), threshold));
        assert!(seat.is_stale(t0() + Duration::minutes(15) + Duration::seconds(1), threshold));

        let mut empty = Seat::new(2);
        empty.record_detection(t0());
        assert!(!empty.is_stale(t0() + Duration::hours(1), threshold));
    }

    #[test]
    fn update_rejects_reserved_and_inconsistent_records() {
        let seat = Seat::new(1);
        let update = SeatUpdate {
            status: Some(SeatStatus::Reserved),
            ..SeatUpdate::default()
        };
        assert!(matches!(
            update.apply_to(&seat),
            Err(RegistryError::Validation(_))
        ));

        let update = SeatUpdate {
            user_name: Some(Some("carol".to_string())),
            ..SeatUpdate::default()
        };
        assert!(update.apply_to(&seat).is_err());
    }

    #[test]
    fn update_distinguishes_missing_from_null() {
        let mut seat = Seat::new(1);
        seat.reserve(Some("alice"), t0()).unwrap();
        let update: SeatUpdate =
            serde_json::from_str(r#"{"user_name":"bob","last_detected_at":null}"#).unwrap();
        let next = update.apply_to(&seat).unwrap();
        assert_eq!(next.user_name.as_deref(), Some("bob"));
        assert_eq!(next.reserved_at, Some(t0()));
        assert!(next.last_detected_at.is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(Seat::new(3)).unwrap();
        assert_eq!(json["status"], "empty");
        assert_eq!(SeatStatus::parse("occupied"), Some(SeatStatus::Occupied));
    }
}
