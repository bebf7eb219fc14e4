//! src/session.rs

use chrono::{ DateTime, Local };

/// Start/stop bookkeeping for one timed session.
#[derive(Clone, Debug, Default)]
pub struct SessionTimer {
    start_ms: Option<u64>,
    end_ms: Option<u64>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
    running: bool,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns false (and changes nothing) when already running.
    pub fn start(&mut self, now_ms: u64, wall: DateTime<Local>) -> bool {
        if self.running {
            return false;
        }
        self.start_ms = Some(now_ms);
        self.started_at = Some(wall);
        self.end_ms = None;
        self.ended_at = None;
        self.running = true;
        true
    }

    /// Returns false (and changes nothing) when not running.
    pub fn stop(&mut self, now_ms: u64, wall: DateTime<Local>) -> bool {
        if !self.running {
            return false;
        }
        self.end_ms = Some(now_ms);
        self.ended_at = Some(wall);
        self.running = false;
        true
    }

    pub fn start_ms(&self) -> Option<u64> {
        self.start_ms
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.ended_at
    }

    /// Live elapsed while running, final duration once stopped.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        let start = self.start_ms?;
        let end = if self.running { now_ms } else { self.end_ms? };
        Some(end.saturating_sub(start))
    }
}

/// Raw duration as `HH:MM:SS`. Hours keep counting past 24.
pub fn format_elapsed(ms: u64) -> String {
    let total_s = ms / 1000;
    let hours = total_s / 3600;
    let minutes = (total_s % 3600) / 60;
    let seconds = total_s % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
