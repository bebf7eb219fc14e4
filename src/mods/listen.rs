//! src/mods/listen.rs
//! Live mode: default microphone → analyser → controller, pumped at the
//! frame cadence on this thread. Stdin lines drive the manual controls.

use anyhow::{ bail, Context, Result };
use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use crossbeam_channel::{ bounded, Receiver, Sender, TryRecvError };
use std::{
    io::BufRead,
    sync::{ atomic::{ AtomicBool, Ordering }, Arc },
    thread,
    time::{ Duration, Instant },
};

use crate::clock::{ Clock, SystemClock };
use crate::controller::{ BeepController, StatusSink };
use crate::logger::Logger;
use crate::spectrum::{ Analyser, AnalyserParams, SpectralFrame, SpectralSource };
use crate::status::ConsoleStatus;
use crate::{ build_input_stream, maybe_rate_supported, Config };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Toggle,
    Listen,
    Status,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "" | "t" | "toggle" => Some(Command::Toggle),
        "l" | "listen" => Some(Command::Listen),
        "s" | "status" => Some(Command::Status),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn read_commands(tx: Sender<Command>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        match parse_command(&line) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            None => eprintln!("unknown command: {:?} (t, l, s, q)", line.trim()),
        }
    }
}

/// Microphone capture exposed as a spectral source. The cpal stream stays
/// alive as long as this value does.
pub struct MicSource {
    _stream: cpal::Stream,
    rx: Receiver<Vec<f32>>,
    ring: Vec<f32>,
    analyser: Analyser,
}

impl MicSource {
    pub fn open(cli: &Config, logger: Arc<Logger>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device (microphone) found"))?;
        let supported = device
            .default_input_config()
            .context("querying default input config")?;
        let sample_format = supported.sample_format();
        let mut mic_config = supported.config();

        if let Some(sr) = maybe_rate_supported(&device, cli.sample_rate_hz) {
            mic_config.sample_rate.0 = sr;
        }
        let sr = mic_config.sample_rate.0;

        logger.info(&format!("Mic device: {}", device.name().unwrap_or_default()))?;
        logger.info(
            &format!(
                "Mic: sample rate {} Hz, channels {}, format {:?}",
                sr,
                mic_config.channels,
                sample_format
            )
        )?;

        let analyser = Analyser::new(sr, AnalyserParams::from_config(cli))?;

        let (tx, rx) = bounded::<Vec<f32>>(32);
        let stream = build_input_stream(&device, &mic_config, sample_format, tx, logger.clone())
            .context("building microphone stream")?;
        stream.play().context("starting microphone stream")?;

        let fft_size = analyser.fft_size();
        Ok(Self {
            _stream: stream,
            rx,
            ring: Vec::with_capacity(fft_size * 2),
            analyser,
        })
    }
}

impl SpectralSource for MicSource {
    fn sample_rate(&self) -> u32 {
        self.analyser.sample_rate()
    }

    fn fft_size(&self) -> usize {
        self.analyser.fft_size()
    }

    fn next_frame(&mut self) -> Result<Option<SpectralFrame>> {
        loop {
            match self.rx.try_recv() {
                Ok(block) => self.ring.extend_from_slice(&block),
                Err(TryRecvError::Empty) => {
                    break;
                }
                Err(TryRecvError::Disconnected) => bail!("microphone stream closed"),
            }
        }
        let keep = self.analyser.fft_size();
        if self.ring.len() > keep {
            let drop = self.ring.len() - keep;
            self.ring.drain(0..drop);
        }
        Ok(Some(self.analyser.frame(&self.ring)?))
    }
}

fn acquire<C: Clock, S: StatusSink>(
    cli: &Config,
    logger: &Arc<Logger>,
    controller: &mut BeepController<C, S>
) -> Option<MicSource> {
    match MicSource::open(cli, logger.clone()) {
        Ok(source) => {
            let _ = crate::log_info!(
                logger,
                "Analyser: {} Hz, fft {} ({} bins of {:.2} Hz)",
                source.sample_rate(),
                source.fft_size(),
                source.fft_size() / 2,
                (source.sample_rate() as f32) / (source.fft_size() as f32)
            );
            controller.start_listening();
            Some(source)
        }
        Err(e) => {
            controller.report_acquisition_failure(&e);
            None
        }
    }
}

fn print_state<C: Clock, S: StatusSink>(controller: &BeepController<C, S>) {
    let now_ms = controller.now_ms();
    let stamp = |t: Option<chrono::DateTime<chrono::Local>>| {
        t.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_else(|| "--".into())
    };
    println!(
        "listening={} paused={} running={} count={} elapsed={} started={} ended={} next_timer={} beeps_total={} sessions={}",
        controller.is_listening(),
        controller.is_paused(),
        controller.is_running(),
        controller.beep_count(),
        controller.elapsed().unwrap_or_else(|| "--".into()),
        stamp(controller.session().started_at()),
        stamp(controller.session().ended_at()),
        controller
            .next_deadline()
            .map(|d| format!("{}ms", d.saturating_sub(now_ms)))
            .unwrap_or_else(|| "--".into()),
        controller.beeps_total(),
        controller.sessions_completed()
    );
}

/// One frame through the controller. The capture is released when listening
/// ends, whether by a disarming stop or a dead stream; `l` re-acquires it.
fn pump_frame<C: Clock, S: StatusSink, Src: SpectralSource>(
    controller: &mut BeepController<C, S>,
    source: &mut Option<Src>,
    logger: &Arc<Logger>
) {
    if controller.is_listening() {
        let failed = match source.as_mut().map(|s| s.next_frame()) {
            Some(Ok(Some(frame))) => {
                controller.process_frame(&frame);
                None
            }
            Some(Err(e)) => Some(e),
            _ => None,
        };
        if let Some(e) = failed {
            let _ = crate::log_warn!(logger, "capture lost: {:#}", e);
            controller.stop_listening();
            controller.report_acquisition_failure(&e);
        }
    }
    if !controller.is_listening() && source.take().is_some() {
        let _ = logger.info("Microphone released");
    }
}

pub fn run_listen(cli: &Config, logger: Arc<Logger>) -> Result<()> {
    logger.info(
        &format!(
            "beep-timer (listen) starting…  policy={} targets={:?}Hz tol={:.0}Hz sens={} frame_ms={}",
            cli.edge_policy.as_str(),
            cli.target_frequencies,
            cli.freq_tolerance_hz,
            cli.sensitivity,
            cli.frame_ms
        )
    )?;

    // ctrl+c to quit
    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = quit.clone();
        let _ = ctrlc::set_handler(move || {
            q.store(true, Ordering::SeqCst);
        });
    }

    let (cmd_tx, cmd_rx) = bounded::<Command>(16);
    thread::spawn(move || read_commands(cmd_tx));

    let sink = ConsoleStatus::new(logger.clone(), cli.show_peaks);
    let mut controller = BeepController::new(cli, SystemClock::new(), sink, logger.clone());
    let mut source = acquire(cli, &logger, &mut controller);

    println!("Commands: <Enter>/t toggle, l listen, s status, q quit. Ctrl+C exits.");

    let frame_period = Duration::from_millis(cli.frame_ms);
    let mut next = Instant::now();
    while !quit.load(Ordering::SeqCst) {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Toggle => {
                    controller.manual_toggle();
                }
                Command::Listen => {
                    if source.is_none() {
                        source = acquire(cli, &logger, &mut controller);
                    } else {
                        controller.start_listening();
                    }
                }
                Command::Status => print_state(&controller),
                Command::Quit => quit.store(true, Ordering::SeqCst),
            }
        }

        controller.run_due_timers();

        pump_frame(&mut controller, &mut source, &logger);

        next += frame_period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    controller.stop_listening();
    logger.info(
        &format!(
            "beep-timer stopped. beeps={} sessions={} {}",
            controller.beeps_total(),
            controller.sessions_completed(),
            controller.sink().summary_line()
        )
    )?;
    Ok(())
}
