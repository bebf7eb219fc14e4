//! src/clock.rs
//! Time source for the detector. Monotonic milliseconds drive every timer;
//! wall-clock stamps are only used for session start/end reporting.

use chrono::{ DateTime, Local };
use std::sync::{ atomic::{ AtomicU64, Ordering }, Arc };
use std::time::Instant;

pub trait Clock {
    /// Monotonic milliseconds since the clock was created.
    fn now_ms(&self) -> u64;
    fn wall_now(&self) -> DateTime<Local>;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
    fn wall_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Hand-advanced clock shared between the pump and the controller.
/// Replay mode steps it by the frame hop; tests step it explicitly.
#[derive(Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
    wall_origin: DateTime<Local>,
}

impl ManualClock {
    pub fn new(wall_origin: DateTime<Local>) -> Self {
        Self { now_ms: Arc::new(AtomicU64::new(0)), wall_origin }
    }

    #[cfg(test)]
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
    fn wall_now(&self) -> DateTime<Local> {
        self.wall_origin + chrono::Duration::milliseconds(self.now_ms() as i64)
    }
}
