//! src/mods/replay.rs
//! Replay mode: run the detector over a local audio file, frame by frame,
//! on a simulated clock. Useful for tuning thresholds against a recording of
//! the equipment.

use anyhow::Result;
use chrono::Local;
use std::{ path::Path, sync::Arc };

use crate::clock::{ Clock, ManualClock };
use crate::controller::BeepController;
use crate::decode;
use crate::logger::Logger;
use crate::sequence::SessionAction;
use crate::spectrum::{ Analyser, AnalyserParams, SpectralFrame, SpectralSource };
use crate::status::ConsoleStatus;
use crate::{ Config, controller::BeepOutcome };

/// Decoded samples exposed as a spectral source. Every frame advances `clock`
/// to the end of the audio it covers.
pub struct FileSource {
    samples: Vec<f32>,
    pos: usize,
    hop: usize,
    analyser: Analyser,
    clock: ManualClock,
}

impl FileSource {
    pub fn new(samples: Vec<f32>, sr: u32, cli: &Config, clock: ManualClock) -> Result<Self> {
        let analyser = Analyser::new(sr, AnalyserParams::from_config(cli))?;
        let hop = (((sr as u64) * cli.frame_ms) / 1000).max(1) as usize;
        Ok(Self { samples, pos: 0, hop, analyser, clock })
    }

    pub fn duration_ms(&self) -> u64 {
        ((self.samples.len() as u64) * 1000) / (self.analyser.sample_rate() as u64)
    }
}

impl SpectralSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.analyser.sample_rate()
    }

    fn fft_size(&self) -> usize {
        self.analyser.fft_size()
    }

    fn next_frame(&mut self) -> Result<Option<SpectralFrame>> {
        if self.pos >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.pos + self.hop).min(self.samples.len());
        let frame = self.analyser.frame(&self.samples[..end])?;
        self.pos = end;
        self.clock.set(((end as u64) * 1000) / (self.analyser.sample_rate() as u64));
        Ok(Some(frame))
    }
}

#[derive(Debug)]
pub struct ReplayReport {
    pub beeps: Vec<BeepOutcome>,
    pub starts: usize,
    pub stops: usize,
    pub audio_ms: u64,
    pub stopped_early_ms: Option<u64>,
    pub summary: String,
}

pub fn replay_samples(
    cli: &Config,
    samples: Vec<f32>,
    sr: u32,
    logger: Arc<Logger>
) -> Result<ReplayReport> {
    let clock = ManualClock::new(Local::now());
    let mut source = FileSource::new(samples, sr, cli, clock.clone())?;
    let audio_ms = source.duration_ms();

    let sink = ConsoleStatus::new(logger.clone(), cli.show_peaks);
    let mut controller = BeepController::new(cli, clock.clone(), sink, logger.clone());
    controller.start_listening();

    let mut beeps = Vec::new();
    let mut stopped_early_ms = None;
    while let Some(frame) = source.next_frame()? {
        if let Some(outcome) = controller.process_frame(&frame) {
            println!(
                "  beep #{:<3} t={:>9.3}s  count={}{}",
                beeps.len() + 1,
                (outcome.at_ms as f64) / 1000.0,
                outcome.count,
                match outcome.action {
                    Some(SessionAction::Start) => "  → start",
                    Some(SessionAction::Stop) => "  → stop",
                    None => "",
                }
            );
            beeps.push(outcome);
        }
        if !controller.is_listening() {
            stopped_early_ms = Some(clock.now_ms());
            break;
        }
    }
    controller.run_due_timers();

    let count = |a: SessionAction| beeps.iter().filter(|o| o.action == Some(a)).count();
    let starts = count(SessionAction::Start);
    let stops = count(SessionAction::Stop);
    let summary = controller.sink().summary_line();
    Ok(ReplayReport { beeps, starts, stops, audio_ms, stopped_early_ms, summary })
}

pub fn run_replay(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    logger.info(
        &format!(
            "beep-timer (replay) starting…  policy={} targets={:?}Hz tol={:.0}Hz sens={} frame_ms={}",
            cli.edge_policy.as_str(),
            cli.target_frequencies,
            cli.freq_tolerance_hz,
            cli.sensitivity,
            cli.frame_ms
        )
    )?;

    let path = Path::new(&cli.input_path);
    if !path.exists() {
        anyhow::bail!("Input file not found: {}", path.display());
    }

    logger.info(&format!("Decoding: {}", path.display()))?;
    let audio = decode::load_mono(path)?;
    logger.info(
        &format!(
            "Decoded: sr={} Hz, channels={}, samples(mono)={}",
            audio.sr,
            audio.channels,
            audio.samples_mono.len()
        )
    )?;

    if audio.samples_mono.is_empty() {
        logger.warn(&format!("{} decoded to no audio", path.display()))?;
    }

    let report = replay_samples(cli, audio.samples_mono, audio.sr, logger.clone())?;

    if let Some(ms) = report.stopped_early_ms {
        println!(
            "Listener disarmed at {:.3}s of {:.3}s.",
            (ms as f64) / 1000.0,
            (report.audio_ms as f64) / 1000.0
        );
    }
    println!(
        "Replay done: {} beep(s), {} start(s), {} stop(s). {}",
        report.beeps.len(),
        report.starts,
        report.stops,
        report.summary
    );
    logger.info(
        &format!(
            "Replay of {} done: beeps={} starts={} stops={} audio={:.1}s {}",
            path.display(),
            report.beeps.len(),
            report.starts,
            report.stops,
            (report.audio_ms as f64) / 1000.0,
            report.summary
        )
    )?;
    Ok(())
}
