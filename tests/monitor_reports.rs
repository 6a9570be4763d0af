use anyhow::Result;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seatwatch::api::{ApiConfig, ApiServer};
use seatwatch::auth::{OperatorCredential, TokenManager};
use seatwatch::client::RegistryClient;
use seatwatch::config::{Secret, DEFAULT_TOKEN_TTL_SECS};
use seatwatch::detect::{self, BoundingBox, Detection, SharedBackend, StubBackend};
use seatwatch::ingest::{FileConfig, FileSource};
use seatwatch::monitor::RunOptions;
use seatwatch::registry::InMemorySeatStore;
use seatwatch::report::HttpReporter;
use seatwatch::{
    Clock, EdgeMonitor, Frame, ManualClock, MonitorControls, RegionSet, ReportThrottle,
    SeatRegistry, SeatStatus,
};

fn person_in_seat_two() -> Vec<Detection> {
    vec![Detection::person(
        BoundingBox::new(400.0, 50.0, 560.0, 220.0),
        0.9,
    )]
}

#[test]
fn monitor_reports_refresh_occupied_seat_over_http() -> Result<()> {
    let registry = Arc::new(SeatRegistry::in_memory());
    registry.provision(&[1, 2, 3, 4])?;
    registry.reserve(2, Some("carol"))?;
    let reserved = registry.get(2)?;

    let tokens = Arc::new(TokenManager::new(
        &[OperatorCredential::from_password("edge-01", "hunter2")],
        Duration::from_secs(600),
    )?);
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        },
        registry.clone(),
        tokens,
    )
    .spawn()?;

    let mut client = RegistryClient::new(&handle.base_url(), Duration::from_secs(3));
    client.login("edge-01", "hunter2")?;

    let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::scripted(vec![
        person_in_seat_two(),
    ])));
    let mut monitor = EdgeMonitor::new(
        RegionSet::quadrants(640, 480)?,
        ReportThrottle::new(Duration::from_secs(5)),
        backend,
    )
    .with_sink(Box::new(HttpReporter::new(client)?));

    std::thread::sleep(Duration::from_millis(20));
    let t0 = Utc::now();
    let outcome = monitor.process_frame(&Frame::blank(640, 480, t0))?;
    assert_eq!(outcome.reports_attempted, 4);
    // within the cooldown: nothing goes out
    let outcome = monitor.process_frame(&Frame::blank(640, 480, t0 + ChronoDuration::seconds(1)))?;
    assert_eq!(outcome.reports_attempted, 0);

    let stats = monitor.stats();
    assert_eq!(stats.reports_sent, 4);
    assert_eq!(stats.reports_failed, 0);

    let seat = registry.get(2)?;
    assert_eq!(seat.status, SeatStatus::Occupied);
    assert!(seat.last_detected_at > reserved.last_detected_at);
    // false reports leave empty seats untouched
    assert_eq!(registry.get(1)?.last_detected_at, None);

    handle.stop()?;
    Ok(())
}

#[test]
fn reports_keep_landing_after_the_token_expires() -> Result<()> {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ));
    let registry = Arc::new(SeatRegistry::with_clock(
        Box::new(InMemorySeatStore::new()),
        clock.clone() as Arc<dyn Clock>,
    ));
    registry.provision(&[1, 2, 3, 4])?;
    registry.reserve(2, Some("carol"))?;

    let tokens = Arc::new(TokenManager::new(
        &[OperatorCredential::from_password("edge-01", "hunter2")],
        Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
    )?);
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        },
        registry.clone(),
        tokens,
    )
    .spawn()?;

    let monitor_for = |reporter: HttpReporter| {
        EdgeMonitor::new(
            RegionSet::quadrants(640, 480).unwrap(),
            ReportThrottle::new(Duration::from_secs(5)),
            detect::shared(StubBackend::scripted(vec![person_in_seat_two()])),
        )
        .with_sink(Box::new(reporter))
    };

    let mut client = RegistryClient::new(&handle.base_url(), Duration::from_secs(3));
    client.login("edge-01", "hunter2")?;
    let mut relogging = monitor_for(
        HttpReporter::new(client)?.with_login("edge-01", Secret::new("hunter2")),
    );
    let mut client = RegistryClient::new(&handle.base_url(), Duration::from_secs(3));
    client.login("edge-01", "hunter2")?;
    let mut single_login = monitor_for(HttpReporter::new(client)?);

    relogging.process_frame(&Frame::blank(640, 480, clock.now()))?;
    assert_eq!(relogging.stats().reports_sent, 4);

    clock.advance(ChronoDuration::seconds(DEFAULT_TOKEN_TTL_SECS as i64 + 3600));
    let later = clock.now();

    relogging.process_frame(&Frame::blank(640, 480, later))?;
    assert_eq!(relogging.stats().reports_sent, 8);
    assert_eq!(relogging.stats().reports_failed, 0);
    assert_eq!(registry.get(2)?.last_detected_at, Some(later));

    single_login.process_frame(&Frame::blank(640, 480, later))?;
    assert_eq!(single_login.stats().reports_failed, 4);

    // the refreshed seat survives a sweep run right after
    clock.advance(ChronoDuration::minutes(1));
    assert!(registry.auto_release_sweep(15)?.is_empty());
    assert_eq!(registry.get(2)?.status, SeatStatus::Occupied);

    handle.stop()?;
    Ok(())
}

#[test]
fn unreachable_registry_is_logged_and_dropped() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = RegistryClient::new(&format!("http://127.0.0.1:{port}"), Duration::from_millis(500))
        .with_token("stale-token");
    let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::empty()));
    let mut monitor = EdgeMonitor::new(
        RegionSet::quadrants(640, 480)?,
        ReportThrottle::new(Duration::from_secs(5)),
        backend,
    )
    .with_sink(Box::new(HttpReporter::new(client)?));

    let outcome = monitor.process_frame(&Frame::blank(640, 480, Utc::now()))?;
    assert_eq!(outcome.reports_attempted, 4);
    assert_eq!(monitor.stats().reports_failed, 4);
    Ok(())
}

#[test]
fn run_loop_stops_after_max_frames_and_writes_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::default_script(64, 48)));
    let mut monitor = EdgeMonitor::new(
        RegionSet::quadrants(64, 48)?,
        ReportThrottle::default(),
        backend,
    );
    let mut source = FileSource::new(FileConfig {
        path: "stub://test".to_string(),
        width: 64,
        height: 48,
    })?;
    let controls = MonitorControls::new();
    controls.request_snapshot();
    let stats = monitor.run(
        &mut source,
        &controls,
        &RunOptions {
            snapshot_dir: dir.path().to_path_buf(),
            target_fps: 0,
            max_frames: Some(3),
        },
    )?;
    assert_eq!(stats.frames_processed, 3);
    assert_eq!(stats.reports_sent, 0);
    assert_eq!(monitor.regions().get(1).and_then(|r| r.last_status), Some(true));

    let snapshots: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("snapshot_"))
        .collect();
    assert_eq!(snapshots.len(), 1);
    Ok(())
}
