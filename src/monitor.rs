//! Edge monitor: frame → detector → region membership → throttled reports.
//!
//! One sequential loop. A slow report call delays the next inference; there
//! is at most one outstanding request, bounded by the client timeout.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::detect::{DetectionResult, SharedBackend};
use crate::frame::{Frame, FrameSource};
use crate::overlay;
use crate::region::RegionSet;
use crate::report::{OccupancyReport, ReportSink};
use crate::throttle::ReportThrottle;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Operator controls shared with the stdin reader and the Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct MonitorControls {
    quit: Arc<AtomicBool>,
    snapshot: Arc<AtomicBool>,
}

impl MonitorControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn request_snapshot(&self) {
        self.snapshot.store(true, Ordering::SeqCst);
    }

    pub fn should_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Returns true once per snapshot request.
    pub fn take_snapshot(&self) -> bool {
        self.snapshot.swap(false, Ordering::SeqCst)
    }

    /// Apply one line of operator input: `q` quits, `s` saves a snapshot.
    /// Returns false for unrecognised input.
    pub fn apply_command(&self, line: &str) -> bool {
        match line.trim() {
            "q" | "Q" => {
                self.request_quit();
                true
            }
            "s" | "S" => {
                self.request_snapshot();
                true
            }
            _ => false,
        }
    }
}

/// Read operator commands from stdin on a background thread.
pub fn spawn_stdin_controls(controls: MonitorControls) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if !controls.apply_command(&line) && !line.trim().is_empty() {
                log::info!("unknown command '{}' (q = quit, s = snapshot)", line.trim());
            }
            if controls.should_quit() {
                break;
            }
        }
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames_processed: u64,
    pub reports_sent: u64,
    pub reports_failed: u64,
    pub reports_suppressed: u64,
}

/// Result of processing one frame.
#[derive(Clone, Debug)]
pub struct FrameOutcome {
    pub detections: DetectionResult,
    /// `(seat_number, occupied)` for every region, by seat number.
    pub occupancy: Vec<(u32, bool)>,
    pub reports_attempted: usize,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub snapshot_dir: PathBuf,
    /// Upper bound on frames per second; 0 runs unpaced.
    pub target_fps: u32,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("."),
            target_fps: 10,
            max_frames: None,
        }
    }
}

pub struct EdgeMonitor {
    regions: RegionSet,
    throttle: ReportThrottle,
    sink: Option<Box<dyn ReportSink>>,
    backend: SharedBackend,
    stats: MonitorStats,
    last_annotated: Option<Frame>,
}

impl EdgeMonitor {
    /// A monitor without a sink only detects and renders.
    pub fn new(regions: RegionSet, throttle: ReportThrottle, backend: SharedBackend) -> Self {
        Self {
            regions,
            throttle,
            sink: None,
            backend,
            stats: MonitorStats::default(),
            last_annotated: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn is_reporting(&self) -> bool {
        self.sink.is_some()
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn throttle(&self) -> &ReportThrottle {
        &self.throttle
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// Most recent annotated frame, if any frame was processed.
    pub fn last_annotated(&self) -> Option<&Frame> {
        self.last_annotated.as_ref()
    }

    /// Detect, classify every region and attempt one throttled report per region.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let detections = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            frame.run_detector(&mut *backend)?
        };
        let occupancy = self.regions.classify(&detections);
        self.stats.frames_processed += 1;

        let mut reports_attempted = 0;
        if let Some(sink) = self.sink.as_mut() {
            for &(seat_number, person_detected) in &occupancy {
                if !self.throttle.try_acquire(seat_number, frame.captured_at) {
                    self.stats.reports_suppressed += 1;
                    log::debug!("seat {}: report suppressed by cooldown", seat_number);
                    continue;
                }
                reports_attempted += 1;
                let report = OccupancyReport {
                    seat_number,
                    person_detected,
                    timestamp: frame.captured_at,
                };
                match sink.send(&report) {
                    Ok(()) => {
                        self.stats.reports_sent += 1;
                        log::info!(
                            "seat {}: {}",
                            seat_number,
                            if person_detected { "person" } else { "empty" }
                        );
                    }
                    Err(err) => {
                        self.stats.reports_failed += 1;
                        log::warn!("seat {}: report failed: {}", seat_number, err);
                    }
                }
            }
        }

        Ok(FrameOutcome {
            detections,
            occupancy,
            reports_attempted,
        })
    }

    /// Run until quit, `max_frames` or a frame-source error.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        controls: &MonitorControls,
        options: &RunOptions,
    ) -> Result<MonitorStats> {
        source.connect()?;
        let frame_interval = if options.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(options.target_fps))
        };
        let mut last_health_log = Instant::now();

        log::info!(
            "seat monitor running: {} region(s), reporting={}",
            self.regions.len(),
            self.is_reporting()
        );

        while !controls.should_quit() {
            if let Some(max) = options.max_frames {
                if self.stats.frames_processed >= max {
                    break;
                }
            }
            let started = Instant::now();
            let frame = source.next_frame().context("failed to grab frame")?;
            let outcome = self.process_frame(&frame)?;
            let annotated = overlay::annotate(
                &frame,
                &self.regions,
                &outcome.detections,
                self.stats.frames_processed,
            );

            if controls.take_snapshot() {
                match overlay::save_snapshot(&annotated, &options.snapshot_dir) {
                    Ok(path) => log::info!("snapshot saved to {}", path.display()),
                    Err(err) => log::error!("snapshot failed: {:#}", err),
                }
            }
            self.last_annotated = Some(annotated);

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = source.stats();
                log::info!(
                    "source health={} frames={} location={} processed={} sent={} failed={}",
                    source.is_healthy(),
                    source_stats.frames_captured,
                    source_stats.location,
                    self.stats.frames_processed,
                    self.stats.reports_sent,
                    self.stats.reports_failed
                );
                last_health_log = Instant::now();
            }

            let elapsed = started.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
        }

        log::info!(
            "seat monitor stopped after {} frame(s)",
            self.stats.frames_processed
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::region::Region;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<OccupancyReport>>>,
        fail: bool,
    }

    impl ReportSink for RecordingSink {
        fn send(&mut self, report: &OccupancyReport) -> Result<(), ClientError> {
            self.sent.lock().unwrap().push(report.clone());
            if self.fail {
                return Err(ClientError::Status(500, "boom".into()));
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn person_at(x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<Detection> {
        vec![Detection::person(BoundingBox::new(x1, y1, x2, y2), 0.8)]
    }

    fn monitor(script: Vec<Vec<Detection>>, sink: Option<RecordingSink>) -> EdgeMonitor {
        let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::scripted(script)));
        let monitor = EdgeMonitor::new(
            RegionSet::quadrants(640, 480).unwrap(),
            ReportThrottle::new(std::time::Duration::from_secs(5)),
            backend,
        );
        match sink {
            Some(sink) => monitor.with_sink(Box::new(sink)),
            None => monitor,
        }
    }

    #[test]
    fn one_report_per_region_then_cooldown() {
        let sink = RecordingSink::default();
        let mut monitor = monitor(vec![person_at(50.0, 50.0, 150.0, 200.0)], Some(sink.clone()));

        let outcome = monitor.process_frame(&Frame::blank(640, 480, t0())).unwrap();
        assert_eq!(
            outcome.occupancy,
            vec![(1, true), (2, false), (3, false), (4, false)]
        );
        assert_eq!(outcome.reports_attempted, 4);

        let outcome = monitor
            .process_frame(&Frame::blank(640, 480, t0() + ChronoDuration::seconds(2)))
            .unwrap();
        assert_eq!(outcome.reports_attempted, 0);
        assert_eq!(monitor.stats().reports_suppressed, 4);

        monitor
            .process_frame(&Frame::blank(640, 480, t0() + ChronoDuration::seconds(5)))
            .unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 8);
        assert_eq!(sent[0].seat_number, 1);
        assert!(sent[0].person_detected);
        assert_eq!(sent[0].timestamp, t0());
    }

    #[test]
    fn failed_delivery_still_starts_cooldown() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut monitor = monitor(vec![Vec::new()], Some(sink.clone()));
        monitor.process_frame(&Frame::blank(640, 480, t0())).unwrap();
        monitor
            .process_frame(&Frame::blank(640, 480, t0() + ChronoDuration::seconds(1)))
            .unwrap();
        assert_eq!(monitor.stats().reports_failed, 4);
        assert_eq!(sink.sent.lock().unwrap().len(), 4);
        assert_eq!(monitor.throttle().last_sent(3), Some(t0()));
    }

    #[test]
    fn without_sink_nothing_is_reported_or_throttled() {
        let mut monitor = monitor(vec![person_at(400.0, 300.0, 500.0, 420.0)], None);
        let outcome = monitor.process_frame(&Frame::blank(640, 480, t0())).unwrap();
        assert_eq!(outcome.occupancy[3], (4, true));
        assert_eq!(outcome.reports_attempted, 0);
        assert!(monitor.throttle().last_sent(4).is_none());
    }

    #[test]
    fn overlapping_regions_both_see_one_person() {
        let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::scripted(vec![
            person_at(90.0, 90.0, 110.0, 110.0),
        ])));
        let regions = RegionSet::new(vec![
            Region::new(1, 0, 0, 120, 120).unwrap(),
            Region::new(2, 80, 80, 200, 200).unwrap(),
        ])
        .unwrap();
        let mut monitor = EdgeMonitor::new(regions, ReportThrottle::default(), backend);
        let outcome = monitor.process_frame(&Frame::blank(640, 480, t0())).unwrap();
        assert_eq!(outcome.occupancy, vec![(1, true), (2, true)]);
    }

    #[test]
    fn controls_parse_operator_commands() {
        let controls = MonitorControls::new();
        assert!(!controls.apply_command("x"));
        assert!(controls.apply_command("s\n"));
        assert!(controls.take_snapshot());
        assert!(!controls.take_snapshot());
        assert!(controls.apply_command("q"));
        assert!(controls.should_quit());
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn next_frame(&mut self) -> Result<Frame> {
            Err(anyhow!("camera unplugged"))
        }
        fn is_healthy(&self) -> bool {
            false
        }
        fn stats(&self) -> crate::frame::SourceStats {
            crate::frame::SourceStats {
                frames_captured: 0,
                location: "test".into(),
            }
        }
    }

    #[test]
    fn frame_source_error_ends_run() {
        let mut monitor = monitor(Vec::new(), None);
        let err = monitor
            .run(&mut FailingSource, &MonitorControls::new(), &RunOptions::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to grab frame"));
    }
}
