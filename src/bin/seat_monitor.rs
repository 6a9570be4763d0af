//! seat_monitor - edge occupancy monitor
//!
//! This daemon:
//! 1. Reads frames from the configured source (`stub://` or an image directory)
//! 2. Runs the person detector once per frame
//! 3. Decides per-seat occupancy from box centers inside each region
//! 4. Reports to the seat registry, at most once per region per cooldown
//!
//! Operator input on stdin: `q` quits, `s` saves an annotated snapshot.

use anyhow::{anyhow, Result};

use seatwatch::{
    client::{token_prefix, RegistryClient},
    config::{DetectorKind, MonitorConfig, Secret},
    detect::{self, SharedBackend, StubBackend},
    ingest::FileSource,
    monitor::{spawn_stdin_controls, EdgeMonitor, MonitorControls, RunOptions},
    report::HttpReporter,
    ReportThrottle,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MonitorConfig::load()?;

    let backend = build_backend(&config)?;
    if let Ok(mut detector) = backend.lock() {
        log::info!("detector backend: {}", detector.name());
        detector.warm_up()?;
    }

    let mut source = FileSource::new(config.source.clone())?;

    let mut monitor = EdgeMonitor::new(
        config.regions.clone(),
        ReportThrottle::new(config.cooldown),
        backend,
    );
    match authenticate(&config) {
        Some(reporter) => {
            monitor = monitor.with_sink(Box::new(reporter));
        }
        None => log::warn!("running in detection-only mode; no reports will be sent"),
    }

    let controls = MonitorControls::new();
    let ctrlc_controls = controls.clone();
    ctrlc::set_handler(move || ctrlc_controls.request_quit())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    let _stdin = spawn_stdin_controls(controls.clone());

    log::info!(
        "seat_monitor running. source={} registry={} cooldown={}s",
        config.source.path,
        config.registry_url,
        config.cooldown.as_secs()
    );
    let options = RunOptions {
        snapshot_dir: config.snapshot_dir.clone(),
        target_fps: config.target_fps,
        max_frames: None,
    };
    let stats = monitor.run(&mut source, &controls, &options)?;
    log::info!(
        "frames={} reports sent={} failed={} suppressed={}",
        stats.frames_processed,
        stats.reports_sent,
        stats.reports_failed,
        stats.reports_suppressed
    );
    Ok(())
}

fn build_backend(config: &MonitorConfig) -> Result<SharedBackend> {
    match config.detector {
        DetectorKind::Stub => Ok(detect::shared(StubBackend::default_script(
            config.source.width,
            config.source.height,
        ))),
        DetectorKind::Tract => tract_backend(config),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_backend(config: &MonitorConfig) -> Result<SharedBackend> {
    let path = config
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector 'tract' requires model_path"))?;
    let backend =
        seatwatch::detect::TractBackend::new(path)?.with_threshold(config.confidence_threshold);
    Ok(detect::shared(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_backend(_config: &MonitorConfig) -> Result<SharedBackend> {
    Err(anyhow!(
        "detector 'tract' requires building with --features backend-tract"
    ))
}

/// Token exchange; `None` means detection-only mode. The reporter keeps the
/// credentials so an expired token can be exchanged again.
fn authenticate(config: &MonitorConfig) -> Option<HttpReporter> {
    let Some((username, password)) = config.credentials() else {
        log::warn!("no monitor credentials configured (SEAT_MONITOR_USERNAME / SEAT_MONITOR_PASSWORD)");
        return None;
    };
    let mut client = RegistryClient::new(&config.registry_url, config.request_timeout);
    match client.login(username, password) {
        Ok(token) => {
            log::info!(
                "authenticated to {} as '{}' (token {}…)",
                config.registry_url,
                username,
                token_prefix(&token)
            );
            match HttpReporter::new(client) {
                Ok(reporter) => Some(reporter.with_login(username, Secret::new(password))),
                Err(err) => {
                    log::warn!("report sink unavailable: {}", err);
                    None
                }
            }
        }
        Err(err) => {
            log::warn!("authentication against {} failed: {}", config.registry_url, err);
            None
        }
    }
}
