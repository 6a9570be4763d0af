//! Periodic driver for `SeatRegistry::auto_release_sweep`.
//!
//! The registry itself has no timer. The `seat_registry` daemon runs this
//! scheduler on its own thread; any other scheduler may call the sweep
//! directly (or hit `POST /seats/auto_release_check`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::SeatRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    pub interval: Duration,
    pub threshold_minutes: u32,
}

#[derive(Debug)]
pub struct SweepHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("sweep scheduler thread panicked"))?;
        }
        Ok(())
    }
}

pub struct SweepScheduler {
    cfg: SweepConfig,
    registry: Arc<SeatRegistry>,
}

impl SweepScheduler {
    pub fn new(cfg: SweepConfig, registry: Arc<SeatRegistry>) -> Self {
        Self { cfg, registry }
    }

    pub fn spawn(self) -> Result<SweepHandle> {
        if self.cfg.interval.is_zero() {
            return Err(anyhow!("sweep interval must be greater than zero"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            let mut last_sweep = Instant::now();
            while !shutdown_thread.load(Ordering::SeqCst) {
                if last_sweep.elapsed() >= self.cfg.interval {
                    last_sweep = Instant::now();
                    match self.registry.auto_release_sweep(self.cfg.threshold_minutes) {
                        Ok(released) => log::debug!(
                            "scheduled sweep released {} seat(s)",
                            released.len()
                        ),
                        Err(err) => log::error!("scheduled sweep failed: {}", err),
                    }
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });
        Ok(SweepHandle {
            shutdown,
            join: Some(join),
        })
    }
}
