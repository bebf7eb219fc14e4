//! src/status.rs
//! Console rendering of controller events, mirrored into the log file.

use chrono::{ DateTime, Local };
use std::sync::Arc;

use crate::controller::StatusSink;
use crate::logger::Logger;

/// Print the peak readout once every this many frames (~4 Hz at 60 fps).
const PEAK_PRINT_EVERY: u32 = 15;

pub struct ConsoleStatus {
    logger: Arc<Logger>,
    show_peaks: bool,
    frames_since_peak: u32,
    last_status: String,
    last_tick: String,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
}

impl ConsoleStatus {
    pub fn new(logger: Arc<Logger>, show_peaks: bool) -> Self {
        Self {
            logger,
            show_peaks,
            frames_since_peak: 0,
            last_status: String::new(),
            last_tick: String::from("00:00:00"),
            started_at: None,
            ended_at: None,
        }
    }

    #[cfg(test)]
    pub fn last_status(&self) -> &str {
        &self.last_status
    }

    #[cfg(test)]
    pub fn last_tick(&self) -> &str {
        &self.last_tick
    }

    pub fn summary_line(&self) -> String {
        let fmt = |t: Option<DateTime<Local>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_else(|| "--".into())
        };
        format!(
            "start={} end={} timer={} status=\"{}\"",
            fmt(self.started_at),
            fmt(self.ended_at),
            self.last_tick,
            self.last_status
        )
    }
}

impl StatusSink for ConsoleStatus {
    fn on_peak_update(&mut self, freq_hz: f32, amplitude: u8) {
        if !self.show_peaks {
            return;
        }
        self.frames_since_peak += 1;
        if self.frames_since_peak >= PEAK_PRINT_EVERY {
            self.frames_since_peak = 0;
            println!("  peak {:>8.2} Hz  vol {:>3}", freq_hz, amplitude);
        }
    }

    fn on_status_change(&mut self, text: &str) {
        if text == self.last_status {
            return;
        }
        self.last_status = text.to_string();
        println!("{}", text);
        let _ = self.logger.info(&format!("status: {}", text));
    }

    fn on_timer_tick(&mut self, elapsed: &str) {
        self.last_tick = elapsed.to_string();
        println!("  timer {}", elapsed);
    }

    fn on_session_start(&mut self, at: DateTime<Local>) {
        self.started_at = Some(at);
        self.ended_at = None;
        self.last_tick = String::from("00:00:00");
        println!(">>> Session start: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }

    fn on_session_end(&mut self, at: DateTime<Local>) {
        self.ended_at = Some(at);
        println!(">>> Session end:   {}  ({})", at.format("%Y-%m-%d %H:%M:%S"), self.last_tick);
    }
}
