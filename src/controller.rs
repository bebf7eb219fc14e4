//! src/controller.rs
//! Owns every piece of mutable detection and session state. Frames, user
//! commands and due timers all enter through `BeepController` methods, one
//! at a time, on the pump thread.

use chrono::{ DateTime, Local };
use std::sync::Arc;

use crate::clock::Clock;
use crate::edge::{ EdgeDetector, GraceRequest };
use crate::logger::Logger;
use crate::schedule::{ Schedule, TimerPurpose };
use crate::sequence::{ SequenceCounter, SessionAction };
use crate::session::{ format_elapsed, SessionTimer };
use crate::spectrum::{ extract_peak, SpectralFrame };
use crate::tone::ToneMatcher;
use crate::Config;

pub const DISPLAY_TICK_MS: u64 = 1000;

pub const STATUS_LISTENING: &str = "Microphone active, waiting for beep...";
pub const STATUS_ACQUISITION_FAILED: &str = "Error: Could not access the microphone.";
pub const STATUS_COOLDOWN_OVER: &str = "Timer active. Listening for stop sequence...";
pub const STATUS_REARMED: &str = "Session complete. Listening for a new start sequence...";

fn cooldown_secs(ms: u64) -> u64 {
    ((ms as f64) / 1000.0).round() as u64
}

/// What happens to the listener once a session stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterStop {
    /// Listening ends; a new `start_listening` is needed for the next session.
    Disarm,
    /// Listening continues and the next start sequence opens a new session.
    Rearm,
}

impl AfterStop {
    pub fn parse(s: &str) -> Option<AfterStop> {
        match s.to_lowercase().as_str() {
            "disarm" | "stop" => Some(AfterStop::Disarm),
            "rearm" | "continue" => Some(AfterStop::Rearm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AfterStop::Disarm => "disarm",
            AfterStop::Rearm => "rearm",
        }
    }
}

/// Display/status collaborator.
pub trait StatusSink {
    fn on_peak_update(&mut self, _freq_hz: f32, _amplitude: u8) {}
    fn on_status_change(&mut self, text: &str);
    fn on_timer_tick(&mut self, elapsed: &str);
    fn on_session_start(&mut self, at: DateTime<Local>);
    fn on_session_end(&mut self, at: DateTime<Local>);
}

/// A frame that produced a beep event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeepOutcome {
    pub at_ms: u64,
    /// Sequence count including this beep, before any action reset it.
    pub count: u32,
    pub action: Option<SessionAction>,
}

pub struct BeepController<C: Clock, S: StatusSink> {
    config: Config,
    clock: C,
    sink: S,
    logger: Arc<Logger>,

    matcher: ToneMatcher,
    edge: EdgeDetector,
    counter: SequenceCounter,
    session: SessionTimer,
    schedule: Schedule,

    is_paused: bool,
    is_listening: bool,
    beeps_total: u64,
    sessions_completed: u32,
}

impl<C: Clock, S: StatusSink> BeepController<C, S> {
    pub fn new(config: &Config, clock: C, sink: S, logger: Arc<Logger>) -> Self {
        Self {
            matcher: ToneMatcher::from_config(config),
            edge: EdgeDetector::from_config(config),
            counter: SequenceCounter::from_config(config),
            session: SessionTimer::new(),
            schedule: Schedule::new(),
            config: config.clone(),
            clock,
            sink,
            logger,
            is_paused: false,
            is_listening: false,
            beeps_total: 0,
            sessions_completed: 0,
        }
    }

    // ── controls ─────────────────────────────────────────────────────────────

    /// Rejected (returns false) while already listening.
    pub fn start_listening(&mut self) -> bool {
        if self.is_listening {
            let _ = self.logger.debug("start_listening ignored: already listening");
            return false;
        }
        self.schedule.cancel_all();
        self.counter.reset();
        self.edge.reset();
        self.is_paused = false;
        self.is_listening = true;
        if let Some(start) = self.session.start_ms().filter(|_| self.session.is_running()) {
            // resumed mid-session: keep the tick phase aligned to the start
            let now = self.clock.now_ms();
            let since = now.saturating_sub(start) % DISPLAY_TICK_MS;
            self.schedule.arm(TimerPurpose::DisplayTick, now + (DISPLAY_TICK_MS - since));
        }
        let _ = crate::log_info!(
            self.logger,
            "Listening: policy={} targets={:?}Hz ±{:.0}Hz sensitivity={} start={} stop={}",
            self.edge.policy().as_str(),
            self.config.target_frequencies,
            self.config.freq_tolerance_hz,
            self.config.sensitivity,
            self.config.start_beep_count,
            self.config.stop_beep_count
        );
        self.sink.on_status_change(STATUS_LISTENING);
        true
    }

    /// Teardown. Every pending timer is dropped.
    pub fn stop_listening(&mut self) {
        if !self.is_listening {
            return;
        }
        self.schedule.cancel_all();
        self.is_listening = false;
        self.is_paused = false;
        self.counter.reset();
        self.edge.reset();
        let _ = self.logger.info("Listening stopped");
    }

    /// Microphone could not be opened. Listening does not start and nothing
    /// retries on its own.
    pub fn report_acquisition_failure(&mut self, err: &anyhow::Error) {
        let _ = crate::log_error!(self.logger, "Error during microphone setup: {:#}", err);
        self.sink.on_status_change(STATUS_ACQUISITION_FAILED);
    }

    /// Stop when running, start otherwise. Ignored during cooldown and when
    /// not listening.
    pub fn manual_toggle(&mut self) -> Option<SessionAction> {
        self.run_due_timers();
        if !self.is_listening {
            let _ = self.logger.debug("Manual toggle ignored: not listening.");
            return None;
        }
        if self.is_paused {
            let _ = self.logger.debug("Cannot manually operate timer during cooldown.");
            return None;
        }
        if self.session.is_running() {
            self.stop_timer().then_some(SessionAction::Stop)
        } else {
            self.start_timer().then_some(SessionAction::Start)
        }
    }

    // ── frame path ───────────────────────────────────────────────────────────

    pub fn process_frame(&mut self, frame: &SpectralFrame) -> Option<BeepOutcome> {
        self.run_due_timers();
        if !self.is_listening || self.is_paused {
            return None;
        }

        let peak = extract_peak(frame);
        self.sink.on_peak_update(peak.frequency_hz, peak.amplitude);

        let now = self.clock.now_ms();
        let active = self.matcher.is_tone_active(&peak);
        let step = self.edge.observe(
            active,
            now,
            self.schedule.is_armed(TimerPurpose::DropoutGrace)
        );
        match step.grace {
            GraceRequest::Arm(deadline) => self.schedule.arm(TimerPurpose::DropoutGrace, deadline),
            GraceRequest::Cancel => {
                self.schedule.cancel(TimerPurpose::DropoutGrace);
            }
            GraceRequest::Keep => {}
        }

        if !step.beep {
            return None;
        }
        let _ = crate::log_debug!(
            self.logger,
            "beep at {}ms peak={:.1}Hz (bin {}) amp={}",
            now,
            peak.frequency_hz,
            peak.bin,
            peak.amplitude
        );
        Some(self.on_beep(now))
    }

    fn on_beep(&mut self, now: u64) -> BeepOutcome {
        self.beeps_total += 1;
        let step = self.counter.record_beep(self.session.is_running());
        self.schedule.arm(TimerPurpose::SequenceReset, now + self.config.max_pause_ms);

        let action = match step.action {
            Some(SessionAction::Start) => self.start_timer().then_some(SessionAction::Start),
            Some(SessionAction::Stop) => self.stop_timer().then_some(SessionAction::Stop),
            None => None,
        };
        // progress text is the last word, even after a start or stop
        if let Some(progress) = step.progress {
            self.sink.on_status_change(&progress.status_text());
        }
        BeepOutcome { at_ms: now, count: step.count, action }
    }

    // ── session timer ────────────────────────────────────────────────────────

    fn start_timer(&mut self) -> bool {
        let now = self.clock.now_ms();
        let wall = self.clock.wall_now();
        if !self.session.start(now, wall) {
            let _ = self.logger.debug("start ignored: session already running");
            return false;
        }
        self.counter.reset();
        self.is_paused = true;
        self.schedule.cancel(TimerPurpose::SequenceReset);
        self.schedule.cancel(TimerPurpose::DropoutGrace);
        self.schedule.arm(TimerPurpose::Cooldown, now + self.config.cooldown_ms);
        self.schedule.arm(TimerPurpose::DisplayTick, now + DISPLAY_TICK_MS);

        let _ = crate::log_info!(
            self.logger,
            "Session started at {} (cooldown {}ms)",
            wall.format("%Y-%m-%d %H:%M:%S"),
            self.config.cooldown_ms
        );
        self.sink.on_session_start(wall);
        self.sink.on_status_change(
            &format!(
                "Timer started. Detection paused for {}s...",
                cooldown_secs(self.config.cooldown_ms)
            )
        );
        true
    }

    fn stop_timer(&mut self) -> bool {
        let now = self.clock.now_ms();
        let wall = self.clock.wall_now();
        if !self.session.stop(now, wall) {
            let _ = self.logger.debug("stop ignored: no session running");
            return false;
        }
        self.schedule.cancel_all();
        self.counter.reset();
        self.edge.reset();
        self.sessions_completed += 1;

        let elapsed = format_elapsed(self.session.elapsed_ms(now).unwrap_or(0));
        let _ = crate::log_info!(
            self.logger,
            "Session ended at {} after {}",
            wall.format("%Y-%m-%d %H:%M:%S"),
            elapsed
        );
        self.sink.on_timer_tick(&elapsed);
        self.sink.on_session_end(wall);

        match self.config.after_stop {
            AfterStop::Disarm => {
                self.is_listening = false;
                self.is_paused = false;
                self.sink.on_status_change(
                    "Session complete. Start listening again for a new session."
                );
            }
            AfterStop::Rearm => {
                // the stop beep may still be ringing; gate it out like after a start
                self.is_paused = true;
                self.schedule.arm(TimerPurpose::Cooldown, now + self.config.cooldown_ms);
                self.sink.on_status_change(
                    &format!(
                        "Session complete. Detection paused for {}s...",
                        cooldown_secs(self.config.cooldown_ms)
                    )
                );
            }
        }
        true
    }

    // ── timers ───────────────────────────────────────────────────────────────

    /// Fires every deadline that is due, earliest first.
    pub fn run_due_timers(&mut self) {
        let now = self.clock.now_ms();
        while let Some((purpose, deadline)) = self.schedule.pop_due(now) {
            self.fire(purpose, deadline);
        }
    }

    fn fire(&mut self, purpose: TimerPurpose, deadline: u64) {
        match purpose {
            TimerPurpose::SequenceReset => {
                if self.is_listening && !self.is_paused && self.counter.count() > 0 {
                    let _ = crate::log_debug!(
                        self.logger,
                        "sequence timed out at count {}",
                        self.counter.count()
                    );
                    self.counter.reset();
                }
            }
            TimerPurpose::DropoutGrace => {
                if self.is_listening {
                    self.edge.release();
                }
            }
            TimerPurpose::Cooldown => {
                if self.is_listening && self.is_paused {
                    self.is_paused = false;
                    self.counter.reset();
                    self.edge.rearm(deadline);
                    let _ = self.logger.info("Cooldown over");
                    if self.session.is_running() {
                        self.sink.on_status_change(STATUS_COOLDOWN_OVER);
                    } else {
                        self.sink.on_status_change(STATUS_REARMED);
                    }
                }
            }
            TimerPurpose::DisplayTick => {
                if let (true, Some(start)) = (self.session.is_running(), self.session.start_ms()) {
                    self.sink.on_timer_tick(&format_elapsed(deadline.saturating_sub(start)));
                    self.schedule.arm(TimerPurpose::DisplayTick, deadline + DISPLAY_TICK_MS);
                }
            }
        }
    }

    /// Earliest pending deadline, for pumps that want to sleep precisely.
    pub fn next_deadline(&self) -> Option<u64> {
        self.schedule.next_deadline()
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn beep_count(&self) -> u32 {
        self.counter.count()
    }
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }
    pub fn is_listening(&self) -> bool {
        self.is_listening
    }
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }
    pub fn session(&self) -> &SessionTimer {
        &self.session
    }
    pub fn beeps_total(&self) -> u64 {
        self.beeps_total
    }
    pub fn sessions_completed(&self) -> u32 {
        self.sessions_completed
    }
    pub fn elapsed(&self) -> Option<String> {
        self.session.elapsed_ms(self.clock.now_ms()).map(format_elapsed)
    }
    pub fn sink(&self) -> &S {
        &self.sink
    }
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::edge::EdgePolicy;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Status(String),
        Tick(String),
        Start,
        End,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Ev>,
        peaks: usize,
    }

    impl Recorder {
        fn starts(&self) -> usize {
            self.events
                .iter()
                .filter(|e| **e == Ev::Start)
                .count()
        }
        fn ends(&self) -> usize {
            self.events
                .iter()
                .filter(|e| **e == Ev::End)
                .count()
        }
        fn statuses(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|e| if let Ev::Status(s) = e { Some(s.as_str()) } else { None })
                .collect()
        }
        fn ticks(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|e| if let Ev::Tick(s) = e { Some(s.as_str()) } else { None })
                .collect()
        }
    }

    impl StatusSink for Recorder {
        fn on_peak_update(&mut self, _freq_hz: f32, _amplitude: u8) {
            self.peaks += 1;
        }
        fn on_status_change(&mut self, text: &str) {
            self.events.push(Ev::Status(text.to_string()));
        }
        fn on_timer_tick(&mut self, elapsed: &str) {
            self.events.push(Ev::Tick(elapsed.to_string()));
        }
        fn on_session_start(&mut self, _at: DateTime<Local>) {
            self.events.push(Ev::Start);
        }
        fn on_session_end(&mut self, _at: DateTime<Local>) {
            self.events.push(Ev::End);
        }
    }

    const SR: u32 = 48_000;
    const FFT: usize = 2048;

    fn cfg(policy: EdgePolicy) -> Config {
        let mut c = Config::default();
        c.edge_policy = policy;
        c.target_frequencies = vec![2179.0];
        c.freq_tolerance_hz = 150.0;
        c.sensitivity = 75;
        c.debounce_ms = 150;
        c.min_beep_ms = 100;
        c.max_pause_ms = 400;
        c.start_beep_count = 2;
        c.stop_beep_count = 5;
        c.cooldown_ms = 5000;
        c.after_stop = AfterStop::Disarm;
        c
    }

    /// Frame whose peak lands on `freq_hz` with `amp`.
    fn frame_at(freq_hz: f32, amp: u8) -> SpectralFrame {
        let mut bins = vec![5u8; FFT / 2];
        let bin = ((freq_hz * (FFT as f32)) / (SR as f32)).round() as usize;
        bins[bin] = amp;
        SpectralFrame { bins, sample_rate: SR, fft_size: FFT }
    }

    fn beep_frame() -> SpectralFrame {
        frame_at(2180.0, 180)
    }

    fn quiet_frame() -> SpectralFrame {
        frame_at(500.0, 20)
    }

    type Ctl = BeepController<ManualClock, Recorder>;

    fn controller(config: &Config) -> (Ctl, ManualClock) {
        let clock = ManualClock::new(Local::now());
        clock.set(10_000);
        let ctl = BeepController::new(
            config,
            clock.clone(),
            Recorder::default(),
            Arc::new(Logger::disabled())
        );
        (ctl, clock)
    }

    /// One physical beep: `on_ms` of tone then `off_ms` of silence at 16 ms frames.
    fn beep(ctl: &mut Ctl, clock: &ManualClock, on_ms: u64, off_ms: u64) -> Vec<BeepOutcome> {
        let mut out = Vec::new();
        let mut t = 0;
        while t < on_ms {
            out.extend(ctl.process_frame(&beep_frame()));
            clock.advance(16);
            t += 16;
        }
        t = 0;
        while t < off_ms {
            out.extend(ctl.process_frame(&quiet_frame()));
            clock.advance(16);
            t += 16;
        }
        out
    }

    fn idle(ctl: &mut Ctl, clock: &ManualClock, ms: u64) {
        let mut t = 0;
        while t < ms {
            ctl.process_frame(&quiet_frame());
            clock.advance(16);
            t += 16;
        }
    }

    #[test]
    fn frames_are_ignored_until_listening() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        assert!(beep(&mut ctl, &clock, 100, 200).is_empty());
        assert_eq!(ctl.sink().peaks, 0);
        assert!(ctl.start_listening());
        assert!(!ctl.start_listening());
        assert_eq!(ctl.sink().statuses(), vec![STATUS_LISTENING]);
    }

    #[test]
    fn first_beep_is_silent_second_starts_session() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();

        let first = beep(&mut ctl, &clock, 96, 160);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].count, 1);
        assert_eq!(ctl.sink().statuses().len(), 1);

        let second = beep(&mut ctl, &clock, 96, 160);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].count, 2);
        assert_eq!(second[0].action, Some(SessionAction::Start));
        assert!(ctl.is_running());
        assert!(ctl.is_paused());
        assert_eq!(ctl.beep_count(), 0);
        assert_eq!(ctl.sink().starts(), 1);
        let statuses = ctl.sink().statuses();
        assert_eq!(
            &statuses[statuses.len() - 2..],
            &["Timer started. Detection paused for 5s...", "Beep detected (2) of 2 to start."]
        );
    }

    #[test]
    fn start_fires_once_for_retrigger_policy() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Retrigger));
        ctl.start_listening();

        // two frames 200 ms apart: distinct beeps under the debounce policy
        let a = ctl.process_frame(&beep_frame());
        clock.advance(200);
        let b = ctl.process_frame(&beep_frame());
        assert_eq!(a.map(|o| o.action), Some(None));
        assert_eq!(b.map(|o| o.action), Some(Some(SessionAction::Start)));

        // a third beep right after does nothing: detection is paused
        clock.advance(200);
        assert_eq!(ctl.process_frame(&beep_frame()), None);
        assert_eq!(ctl.sink().starts(), 1);
    }

    #[test]
    fn sequence_resets_after_max_pause() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();

        beep(&mut ctl, &clock, 64, 0);
        assert_eq!(ctl.beep_count(), 1);
        idle(&mut ctl, &clock, 420);
        assert_eq!(ctl.beep_count(), 0);

        let next = beep(&mut ctl, &clock, 64, 160);
        assert_eq!(next[0].count, 1);
        assert!(!ctl.is_running());
    }

    #[test]
    fn reset_fires_exactly_at_threshold() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Retrigger));
        ctl.start_listening();
        assert_eq!(ctl.process_frame(&beep_frame()).map(|o| o.count), Some(1));
        clock.advance(400);
        assert_eq!(ctl.process_frame(&beep_frame()).map(|o| o.count), Some(1));
    }

    #[test]
    fn cooldown_blocks_everything() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Retrigger));
        ctl.start_listening();
        ctl.manual_toggle();
        assert!(ctl.is_paused());
        let peaks_before = ctl.sink().peaks;

        for i in 0..200u8 {
            let f = frame_at(1000.0 + (i as f32) * 40.0, 255);
            assert_eq!(ctl.process_frame(&f), None);
            assert_eq!(ctl.beep_count(), 0);
            clock.advance(20);
        }
        assert_eq!(ctl.sink().peaks, peaks_before);
        assert!(ctl.is_running());
        assert_eq!(ctl.manual_toggle(), None);
        assert!(ctl.is_running());

        clock.advance(1_000);
        ctl.run_due_timers();
        assert!(!ctl.is_paused());
        assert_eq!(ctl.sink().statuses().last().copied(), Some(STATUS_COOLDOWN_OVER));
    }

    #[test]
    fn retrigger_debounce_restarts_at_cooldown_end() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Retrigger));
        ctl.start_listening();
        ctl.manual_toggle();
        clock.advance(5_000);
        ctl.run_due_timers();
        assert!(!ctl.is_paused());

        clock.advance(100);
        assert_eq!(ctl.process_frame(&beep_frame()), None);
        clock.advance(60);
        assert!(ctl.process_frame(&beep_frame()).is_some());
    }

    #[test]
    fn six_rapid_beeps_stop_once() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();
        ctl.manual_toggle();
        clock.advance(5_000);

        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.extend(beep(&mut ctl, &clock, 80, 160));
        }
        let stops = outcomes
            .iter()
            .filter(|o| o.action == Some(SessionAction::Stop))
            .count();
        assert_eq!(stops, 1);
        assert_eq!(outcomes.len(), 5, "disarmed after the fifth beep");
        assert_eq!(ctl.sink().ends(), 1);
        assert!(!ctl.is_running());
        assert!(!ctl.is_listening());
        assert!(ctl.sink().statuses().contains(&"Beep detected (4) of 5 to stop."));
    }

    #[test]
    fn rearm_keeps_listening_for_next_session() {
        let mut c = cfg(EdgePolicy::Retrigger);
        c.after_stop = AfterStop::Rearm;
        let (mut ctl, clock) = controller(&c);
        ctl.start_listening();
        ctl.manual_toggle();
        clock.advance(5_000);

        let mut stops = 0;
        for _ in 0..6 {
            clock.advance(200);
            if let Some(o) = ctl.process_frame(&beep_frame()) {
                if o.action == Some(SessionAction::Stop) {
                    stops += 1;
                }
            }
        }
        assert_eq!(stops, 1);
        assert!(ctl.is_listening());
        assert!(ctl.is_paused());
        assert!(!ctl.is_running());
        assert_eq!(ctl.sessions_completed(), 1);
        assert_eq!(
            ctl.sink().statuses().last().copied(),
            Some("Beep detected (5) of 5 to stop.")
        );

        clock.advance(5_000);
        ctl.run_due_timers();
        assert!(!ctl.is_paused());
        assert_eq!(ctl.sink().statuses().last().copied(), Some(STATUS_REARMED));

        // a fresh start sequence opens the next session
        clock.advance(500);
        ctl.process_frame(&beep_frame());
        clock.advance(200);
        let start = ctl.process_frame(&beep_frame());
        assert_eq!(start.and_then(|o| o.action), Some(SessionAction::Start));
        assert_eq!(ctl.sink().starts(), 2);
    }

    #[test]
    fn rearm_ignores_stop_tone_still_ringing_under_retrigger() {
        let mut c = cfg(EdgePolicy::Retrigger);
        c.after_stop = AfterStop::Rearm;
        let (mut ctl, clock) = controller(&c);
        ctl.start_listening();
        ctl.manual_toggle();
        clock.advance(5_000);

        for _ in 0..4 {
            clock.advance(200);
            assert_eq!(ctl.process_frame(&beep_frame()).and_then(|o| o.action), None);
        }
        clock.advance(200);
        // one long physical beep: the first frame stops, the rest must not restart
        let outcomes = beep(&mut ctl, &clock, 208, 0);
        let actions: Vec<_> = outcomes.iter().map(|o| o.action).collect();
        assert_eq!(actions, vec![Some(SessionAction::Stop)]);
        assert_eq!(ctl.sink().starts(), 1);
        assert!(!ctl.is_running());
        assert!(ctl.is_listening());
    }

    #[test]
    fn rearm_six_sustained_beeps_stop_once_without_restart() {
        let mut c = cfg(EdgePolicy::Sustained);
        c.after_stop = AfterStop::Rearm;
        let (mut ctl, clock) = controller(&c);
        ctl.start_listening();
        ctl.manual_toggle();
        clock.advance(5_000);

        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.extend(beep(&mut ctl, &clock, 80, 160));
        }
        let counts: Vec<_> = outcomes.iter().map(|o| (o.count, o.action)).collect();
        assert_eq!(
            counts,
            vec![(1, None), (2, None), (3, None), (4, None), (5, Some(SessionAction::Stop))]
        );
        assert_eq!(ctl.sink().starts(), 1);
        assert_eq!(ctl.sink().ends(), 1);
        assert!(!ctl.is_running());
        assert!(ctl.is_paused());

        // cooldown after the stop rejects the manual toggle too
        assert_eq!(ctl.manual_toggle(), None);
        clock.advance(5_000);
        assert_eq!(ctl.manual_toggle(), Some(SessionAction::Start));
    }

    #[test]
    fn sustained_tone_counts_once_but_retrigger_counts_many() {
        let (mut sustained, c1) = controller(&cfg(EdgePolicy::Sustained));
        sustained.start_listening();
        let n1 = beep(&mut sustained, &c1, 1_000, 0).len();

        let (mut retrig, c2) = controller(&cfg(EdgePolicy::Retrigger));
        retrig.start_listening();
        let n2 = beep(&mut retrig, &c2, 1_000, 0).len();

        assert_eq!(n1, 1);
        assert!(n2 >= 2, "retrigger counted {}", n2);
    }

    #[test]
    fn display_tick_reports_elapsed_every_second() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();
        ctl.manual_toggle();
        for _ in 0..3 {
            clock.advance(1_000);
            ctl.run_due_timers();
        }
        assert_eq!(ctl.sink().ticks(), vec!["00:00:01", "00:00:02", "00:00:03"]);
        assert_eq!(ctl.elapsed().as_deref(), Some("00:00:03"));
    }

    #[test]
    fn manual_stop_cancels_tick_and_disarms() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();
        assert_eq!(ctl.manual_toggle(), Some(SessionAction::Start));
        clock.advance(6_500);
        assert_eq!(ctl.manual_toggle(), Some(SessionAction::Stop));
        let ticks_at_stop = ctl.sink().ticks().len();

        clock.advance(10_000);
        ctl.run_due_timers();
        assert_eq!(ctl.sink().ticks().len(), ticks_at_stop);
        assert_eq!(ctl.sink().ticks().last().copied(), Some("00:00:06"));
        assert!(!ctl.is_listening());
        assert_eq!(ctl.next_deadline(), None);

        // a disarmed listener ignores the toggle until re-armed
        assert_eq!(ctl.manual_toggle(), None);
        assert!(ctl.start_listening());
        assert_eq!(ctl.manual_toggle(), Some(SessionAction::Start));
    }

    #[test]
    fn stop_listening_drops_pending_timers() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();
        beep(&mut ctl, &clock, 64, 0);
        assert!(ctl.next_deadline().is_some());
        ctl.stop_listening();
        assert_eq!(ctl.next_deadline(), None);
        clock.advance(10_000);
        ctl.run_due_timers();
        assert_eq!(ctl.beep_count(), 0);
        assert_eq!(ctl.process_frame(&beep_frame()), None);
    }

    #[test]
    fn stale_cooldown_after_restart_is_harmless() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.start_listening();
        ctl.manual_toggle();
        ctl.stop_listening();
        assert!(ctl.start_listening());
        assert!(!ctl.is_paused());
        // only the re-aligned display tick may be pending
        assert_eq!(ctl.next_deadline().map(|d| d - clock.now_ms()), Some(DISPLAY_TICK_MS));
        clock.advance(6_000);
        ctl.run_due_timers();
        assert!(!ctl.is_paused());
        assert!(ctl.is_running());
    }

    #[test]
    fn acquisition_failure_reports_once_and_stays_idle() {
        let (mut ctl, _clock) = controller(&cfg(EdgePolicy::Sustained));
        ctl.report_acquisition_failure(&anyhow::anyhow!("permission denied"));
        assert_eq!(ctl.sink().statuses(), vec![STATUS_ACQUISITION_FAILED]);
        assert!(!ctl.is_listening());
    }

    #[test]
    fn off_target_or_quiet_frames_never_count() {
        let (mut ctl, clock) = controller(&cfg(EdgePolicy::Retrigger));
        ctl.start_listening();
        for _ in 0..50 {
            assert_eq!(ctl.process_frame(&frame_at(2200.0, 60)), None);
            assert_eq!(ctl.process_frame(&frame_at(3000.0, 90)), None);
            clock.advance(200);
        }
        assert_eq!(ctl.beeps_total(), 0);
        assert!(ctl.process_frame(&frame_at(2200.0, 80)).is_some());
    }
}
