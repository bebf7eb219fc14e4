//! src/schedule.rs
//! One-shot deadlines keyed by purpose. At most one deadline per purpose is
//! pending; arming a purpose again replaces the earlier one.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerPurpose {
    SequenceReset,
    DropoutGrace,
    Cooldown,
    DisplayTick,
}

#[derive(Debug, Default)]
pub struct Schedule {
    pending: Vec<(TimerPurpose, u64)>,
}

impl Schedule {
    pub fn new() -> Self {
        Self { pending: Vec::with_capacity(4) }
    }

    pub fn arm(&mut self, purpose: TimerPurpose, deadline_ms: u64) {
        self.cancel(purpose);
        self.pending.push((purpose, deadline_ms));
    }

    pub fn cancel(&mut self, purpose: TimerPurpose) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(p, _)| *p != purpose);
        self.pending.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    pub fn is_armed(&self, purpose: TimerPurpose) -> bool {
        self.pending.iter().any(|(p, _)| *p == purpose)
    }

    #[cfg(test)]
    pub fn deadline(&self, purpose: TimerPurpose) -> Option<u64> {
        self.pending
            .iter()
            .find(|(p, _)| *p == purpose)
            .map(|(_, d)| *d)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending
            .iter()
            .map(|(_, d)| *d)
            .min()
    }

    /// Removes and returns the earliest entry due at `now_ms`.
    /// Equal deadlines come out in `TimerPurpose` order.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerPurpose, u64)> {
        let idx = self.pending
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| *d <= now_ms)
            .min_by_key(|(_, (p, d))| (*d, *p))
            .map(|(i, _)| i)?;
        Some(self.pending.swap_remove(idx))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
