//! src/sequence.rs
//! Beep counting and the start/stop dispatch rule.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    TowardStart {
        count: u32,
        target: u32,
    },
    TowardStop {
        count: u32,
        target: u32,
    },
}

impl Progress {
    pub fn status_text(&self) -> String {
        match self {
            Progress::TowardStart { count, target } =>
                format!("Beep detected ({}) of {} to start.", count, target),
            Progress::TowardStop { count, target } =>
                format!("Beep detected ({}) of {} to stop.", count, target),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountStep {
    pub count: u32,
    pub progress: Option<Progress>,
    pub action: Option<SessionAction>,
}

#[derive(Clone, Debug)]
pub struct SequenceCounter {
    count: u32,
    start_at: u32,
    stop_at: u32,
}

impl SequenceCounter {
    pub fn new(start_at: u32, stop_at: u32) -> Self {
        Self { count: 0, start_at, stop_at }
    }

    pub fn from_config(cfg: &crate::Config) -> Self {
        Self::new(cfg.start_beep_count, cfg.stop_beep_count)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Counts one beep. The first beep of a sequence is silent; from the
    /// second on, progress is reported against whichever threshold applies.
    /// Start needs the exact count, stop accepts overshoot.
    pub fn record_beep(&mut self, running: bool) -> CountStep {
        self.count = self.count.saturating_add(1);
        let count = self.count;
        if count < 2 {
            return CountStep { count, progress: None, action: None };
        }
        if running {
            CountStep {
                count,
                progress: Some(Progress::TowardStop { count, target: self.stop_at }),
                action: (count >= self.stop_at).then_some(SessionAction::Stop),
            }
        } else {
            CountStep {
                count,
                progress: Some(Progress::TowardStart { count, target: self.start_at }),
                action: (count == self.start_at).then_some(SessionAction::Start),
            }
        }
    }
}
