//! seatwatch: library seat occupancy.
//!
//! Two halves share this crate:
//!
//! - **Edge monitor** (`seat_monitor`): samples frames, runs a person detector,
//!   decides per-region occupancy by bounding-box-center containment and sends
//!   rate-limited reports to the registry.
//! - **Seat registry** (`seat_registry`): one record per seat with an
//!   `empty | occupied | reserved` status, reserve/release, detection ingest
//!   and an auto-release sweep for seats left unattended, served over HTTP.
//!
//! # Module Structure
//!
//! - `region`, `throttle`, `monitor`, `overlay`, `report`, `client`: edge side
//! - `detect`, `frame`, `ingest`: detector backends and frame sources
//! - `registry`, `auth`, `api`: registry side
//! - `config`, `clock`, `ui`: shared plumbing

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};

pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod overlay;
pub mod region;
pub mod registry;
pub mod report;
pub mod throttle;
pub mod ui;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detect::{BoundingBox, Detection, DetectionResult, ObjectClass};
pub use frame::{Frame, FrameSource};
pub use monitor::{EdgeMonitor, MonitorControls};
pub use region::{Region, RegionSet};
pub use registry::{DetectionOutcome, RegistryError, Seat, SeatRegistry, SeatStatus};
pub use report::{OccupancyReport, ReportSink};
pub use throttle::ReportThrottle;

/// Unique shared-cache in-memory SQLite URI (tests, ephemeral deployments).
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:seatwatch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
