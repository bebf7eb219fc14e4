//! src/edge.rs
//! Turns per-frame tone presence into discrete beep events.
//!
//! `Sustained`: one event per rising edge. A dropout shorter than the grace
//! window does not end the beep. `Retrigger`: any tone frame more than the
//! debounce interval after the last accepted beep is a new beep, so a long
//! tone is counted once per interval.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgePolicy {
    Sustained,
    Retrigger,
}

impl EdgePolicy {
    pub fn parse(s: &str) -> Option<EdgePolicy> {
        match s.to_lowercase().as_str() {
            "sustained" | "level" | "a" => Some(EdgePolicy::Sustained),
            "retrigger" | "debounce" | "b" => Some(EdgePolicy::Retrigger),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgePolicy::Sustained => "sustained",
            EdgePolicy::Retrigger => "retrigger",
        }
    }
}

/// What the owner should do with the dropout-grace timer after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraceRequest {
    Keep,
    Arm(u64),
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeStep {
    pub beep: bool,
    pub grace: GraceRequest,
}

impl EdgeStep {
    const QUIET: EdgeStep = EdgeStep { beep: false, grace: GraceRequest::Keep };
}

#[derive(Clone, Debug)]
pub struct EdgeDetector {
    policy: EdgePolicy,
    debounce_ms: u64,
    grace_ms: u64,
    is_beeping: bool,
    last_beep_ms: Option<u64>,
}

impl EdgeDetector {
    pub fn new(policy: EdgePolicy, debounce_ms: u64, grace_ms: u64) -> Self {
        Self { policy, debounce_ms, grace_ms, is_beeping: false, last_beep_ms: None }
    }

    pub fn from_config(cfg: &crate::Config) -> Self {
        Self::new(cfg.edge_policy, cfg.debounce_ms, cfg.min_beep_ms)
    }

    pub fn policy(&self) -> EdgePolicy {
        self.policy
    }

    #[cfg(test)]
    pub fn is_beeping(&self) -> bool {
        self.is_beeping
    }

    #[cfg(test)]
    pub fn last_beep_ms(&self) -> Option<u64> {
        self.last_beep_ms
    }

    /// `grace_armed` is whether a dropout-grace deadline is currently pending.
    pub fn observe(&mut self, tone_active: bool, now_ms: u64, grace_armed: bool) -> EdgeStep {
        match self.policy {
            EdgePolicy::Sustained => self.observe_sustained(tone_active, now_ms, grace_armed),
            EdgePolicy::Retrigger => self.observe_retrigger(tone_active, now_ms),
        }
    }

    fn observe_sustained(&mut self, tone_active: bool, now_ms: u64, grace_armed: bool) -> EdgeStep {
        match (tone_active, self.is_beeping) {
            (true, false) => {
                self.is_beeping = true;
                self.last_beep_ms = Some(now_ms);
                EdgeStep { beep: true, grace: GraceRequest::Cancel }
            }
            (true, true) => {
                if grace_armed {
                    EdgeStep { beep: false, grace: GraceRequest::Cancel }
                } else {
                    EdgeStep::QUIET
                }
            }
            (false, true) if !grace_armed => {
                EdgeStep { beep: false, grace: GraceRequest::Arm(now_ms + self.grace_ms) }
            }
            _ => EdgeStep::QUIET,
        }
    }

    fn observe_retrigger(&mut self, tone_active: bool, now_ms: u64) -> EdgeStep {
        if !tone_active {
            return EdgeStep::QUIET;
        }
        let clear = match self.last_beep_ms {
            None => true,
            Some(t) => now_ms.saturating_sub(t) > self.debounce_ms,
        };
        if !clear {
            return EdgeStep::QUIET;
        }
        self.last_beep_ms = Some(now_ms);
        EdgeStep { beep: true, grace: GraceRequest::Keep }
    }

    /// Dropout grace elapsed without re-detection.
    pub fn release(&mut self) {
        self.is_beeping = false;
    }

    /// Clean slate for a new listening run.
    pub fn reset(&mut self) {
        self.is_beeping = false;
        self.last_beep_ms = None;
    }

    /// Re-arm after cooldown: nothing is beeping and the debounce window is
    /// measured from `now_ms`.
    pub fn rearm(&mut self, now_ms: u64) {
        self.is_beeping = false;
        self.last_beep_ms = Some(now_ms);
    }
}
