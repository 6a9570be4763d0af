//! Terminal output for `seatctl`.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::registry::{Seat, SeatStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(UiMode::Auto),
            "plain" => Some(UiMode::Plain),
            "pretty" => Some(UiMode::Pretty),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Spinner (or a plain `==>` line) until the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn seat_table(&self, seats: &[Seat]) -> String {
        let mut out = format!(
            "{:<6} {:<9} {:<16} {:<25} {}\n",
            "SEAT", "STATUS", "USER", "LAST DETECTED", "AUTO"
        );
        for seat in seats {
            let status = if self.pretty() {
                colored_status(seat.status)
            } else {
                format!("{:<9}", seat.status.as_str())
            };
            out.push_str(&format!(
                "{:<6} {} {:<16} {:<25} {}\n",
                seat.seat_number,
                status,
                seat.user_name.as_deref().unwrap_or("-"),
                seat.last_detected_at
                    .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                if seat.auto_released { "yes" } else { "no" }
            ));
        }
        out
    }
}

fn colored_status(status: SeatStatus) -> String {
    let code = match status {
        SeatStatus::Empty => "32",
        SeatStatus::Occupied => "31",
        SeatStatus::Reserved => "33",
    };
    format!("\x1b[{}m{:<9}\x1b[0m", code, status.as_str())
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
