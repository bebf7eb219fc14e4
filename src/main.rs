//! src/main.rs

use anyhow::Result;
use cpal::traits::DeviceTrait;
use std::{ env, sync::Arc };

mod logger;
use logger::Logger;

use crate::logger::LogLevel;

mod clock;
mod controller;
mod edge;
mod schedule;
mod sequence;
mod session;
mod spectrum;
mod status;
mod tone;

// expose the split mode files in src/mods/
mod mods;

use controller::AfterStop;
use edge::EdgePolicy;

// ───────────────────────────────────────────────────────────────────────────────
// CLI config + parsing
// ───────────────────────────────────────────────────────────────────────────────
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Listen,
    Replay,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,

    // tone matching
    pub target_frequencies: Vec<f32>,
    pub freq_tolerance_hz: f32,
    pub sensitivity: u8,

    // beep edges + sequence
    pub edge_policy: EdgePolicy,
    pub debounce_ms: u64,
    pub min_beep_ms: u64,
    pub max_pause_ms: u64,
    pub start_beep_count: u32,
    pub stop_beep_count: u32,
    pub cooldown_ms: u64,
    pub after_stop: AfterStop,

    // analyser
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
    pub frame_ms: u64,
    pub sample_rate_hz: u32,

    // paths + output
    pub input_path: String,
    pub log_path: String,
    pub log_level: LogLevel,
    pub log_echo: bool,
    pub show_peaks: bool,
}

impl Default for Config {
    fn default() -> Self {
        let default_log = env
            ::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join("build")
            .join("BeepTimer.log")
            .to_string_lossy()
            .into_owned();

        Self {
            mode: Mode::Listen,

            // fundamental + 3rd harmonic, so small speakers still match
            target_frequencies: vec![2179.0, 6537.0],
            freq_tolerance_hz: 150.0,
            sensitivity: 75,

            edge_policy: EdgePolicy::Sustained,
            debounce_ms: 150,
            min_beep_ms: 100,
            max_pause_ms: 400,
            start_beep_count: 2,
            stop_beep_count: 5,
            cooldown_ms: 5000,
            after_stop: AfterStop::Disarm,

            fft_size: 2048,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
            frame_ms: 16,
            sample_rate_hz: 48_000,

            input_path: String::new(),
            log_path: default_log,
            log_level: LogLevel::Info,
            log_echo: false,
            show_peaks: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.target_frequencies.is_empty() {
            return Err("at least one target frequency is required".to_string());
        }
        if self.target_frequencies.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err("target frequencies must be positive".to_string());
        }
        if !(self.freq_tolerance_hz > 0.0) {
            return Err("tolerance must be > 0".to_string());
        }
        if self.start_beep_count < 2 {
            return Err("start-beeps must be at least 2 (the first beep is never acted on)".to_string());
        }
        if self.start_beep_count > self.stop_beep_count {
            return Err(
                format!(
                    "start-beeps ({}) must not exceed stop-beeps ({})",
                    self.start_beep_count,
                    self.stop_beep_count
                )
            );
        }
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(format!("fft-size must be a power of two in 32..=32768, got {}", self.fft_size));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err("smoothing must be in [0, 1)".to_string());
        }
        if self.min_db >= self.max_db {
            return Err("min-db must be below max-db".to_string());
        }
        if self.frame_ms == 0 {
            return Err("frame-ms must be > 0".to_string());
        }
        if self.mode == Mode::Replay && self.input_path.is_empty() {
            return Err("--input <PATH> is required in replay mode".to_string());
        }
        Ok(())
    }
}

fn print_usage(cfg: &Config) {
    println!("Usage: beep-timer [OPTIONS]\n");
    println!("Modes:");
    println!("  --mode listen         (default) Detect beeps on the default microphone");
    println!("  --mode replay         Run the detector over an audio file (.wav/.mp3/.flac/.ogg/.m4a)");
    println!("  --input <PATH>        (replay) Audio file to analyze\n");

    println!("General:");
    println!("  --log-path <PATH>             Log file (default: {})", cfg.log_path);
    println!(
        "  --log-level <LEVEL>           Log level: debug, info, warning, error (default: info)"
    );
    println!("  --log-echo                    Mirror log lines to stderr");
    println!("  --show-peaks                  Print the live peak frequency/amplitude");

    println!("\nTone matching:");
    println!(
        "  --target-hz <HZ[,HZ..]>       Target frequencies (default: {})",
        join_hz(&cfg.target_frequencies)
    );
    println!(
        "  --tolerance-hz <HZ>           Match band half-width (default: {:.0})",
        cfg.freq_tolerance_hz
    );
    println!(
        "  --sensitivity <0-255>         Peak amplitude must exceed this (default: {})",
        cfg.sensitivity
    );

    println!("\nBeep sequence:");
    println!(
        "  --edge-policy <POLICY>        sustained: one event per tone; retrigger: one per debounce (default: {})",
        cfg.edge_policy.as_str()
    );
    println!(
        "  --debounce-ms <MS>            (retrigger) Min gap between beeps (default: {})",
        cfg.debounce_ms
    );
    println!(
        "  --min-beep-ms <MS>            (sustained) Dropout grace inside one beep (default: {})",
        cfg.min_beep_ms
    );
    println!(
        "  --max-pause-ms <MS>           Silence that abandons a sequence (default: {})",
        cfg.max_pause_ms
    );
    println!("  --start-beeps <N>             Beeps that start the timer (default: {})", cfg.start_beep_count);
    println!("  --stop-beeps <N>              Beeps that stop the timer (default: {})", cfg.stop_beep_count);
    println!(
        "  --cooldown-ms <MS>            Detection pause after start (default: {})",
        cfg.cooldown_ms
    );
    println!(
        "  --after-stop <disarm|rearm>   Stop listening after a session, or wait for the next (default: {})",
        cfg.after_stop.as_str()
    );

    println!("\nAnalyser:");
    println!("  --fft-size <N>                FFT size, power of two (default: {})", cfg.fft_size);
    println!("  --smoothing <FRAC>            Spectrum smoothing [0..1) (default: {:.2})", cfg.smoothing);
    println!("  --min-db <DB>                 Byte scale floor (default: {:.0})", cfg.min_db);
    println!("  --max-db <DB>                 Byte scale ceiling (default: {:.0})", cfg.max_db);
    println!("  --frame-ms <MS>               Analysis cadence (default: {})", cfg.frame_ms);
    println!(
        "  --sample-rate, --sr <HZ>      Preferred mic sample rate (default: {})",
        cfg.sample_rate_hz
    );

    println!("\nWhile listening, type a command and press Enter:");
    println!("  <Enter> or t   toggle the timer by hand");
    println!("  l              start listening again (or retry the microphone)");
    println!("  s              print status");
    println!("  q              quit");

    println!("\nExamples:");
    println!("  beep-timer --target-hz 2179 --sensitivity 90");
    println!("  beep-timer --edge-policy retrigger --after-stop rearm");
    println!("  beep-timer --mode replay --input ./session.wav --log-echo");
}

fn join_hz(v: &[f32]) -> String {
    v.iter()
        .map(|f| format!("{:.0}", f))
        .collect::<Vec<_>>()
        .join(",")
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn number<T: std::str::FromStr>(
    args: &[String],
    i: usize,
    flag: &str
) -> std::result::Result<T, String> {
    let raw = value(args, i, flag)?;
    raw.parse::<T>().map_err(|_| format!("Invalid {} value: {}", flag, raw))
}

/// `args[0]` is the program name, as in `env::args()`.
/// `Ok(None)` means help was requested.
fn parse_arguments_from(args: &[String]) -> std::result::Result<Option<Config>, String> {
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--mode" => {
                config.mode = match value(args, i, flag)?.to_lowercase().as_str() {
                    "listen" | "live" => Mode::Listen,
                    "replay" | "offline" => Mode::Replay,
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                };
                i += 2;
            }
            "--input" => {
                config.input_path = value(args, i, flag)?.to_string();
                i += 2;
            }
            "--log-path" => {
                config.log_path = value(args, i, flag)?.to_string();
                i += 2;
            }
            "--log-level" => {
                let raw = value(args, i, flag)?;
                config.log_level = LogLevel::parse(raw).ok_or_else(||
                    format!("Invalid log level: {}. Valid options: debug, info, warning, error", raw)
                )?;
                i += 2;
            }
            "--log-echo" => {
                config.log_echo = true;
                i += 1;
            }
            "--show-peaks" => {
                config.show_peaks = true;
                i += 1;
            }
            "--target-hz" => {
                let raw = value(args, i, flag)?;
                let mut targets = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    targets.push(
                        part.parse::<f32>().map_err(|_| format!("Invalid target frequency: {}", part))?
                    );
                }
                config.target_frequencies = targets;
                i += 2;
            }
            "--tolerance-hz" => {
                config.freq_tolerance_hz = number(args, i, flag)?;
                i += 2;
            }
            "--sensitivity" => {
                config.sensitivity = number(args, i, flag)?;
                i += 2;
            }
            "--edge-policy" => {
                let raw = value(args, i, flag)?;
                config.edge_policy = EdgePolicy::parse(raw).ok_or_else(||
                    format!("Unknown edge policy: {}. Valid options: sustained, retrigger", raw)
                )?;
                i += 2;
            }
            "--debounce-ms" => {
                config.debounce_ms = number(args, i, flag)?;
                i += 2;
            }
            "--min-beep-ms" => {
                config.min_beep_ms = number(args, i, flag)?;
                i += 2;
            }
            "--max-pause-ms" => {
                config.max_pause_ms = number(args, i, flag)?;
                i += 2;
            }
            "--start-beeps" => {
                config.start_beep_count = number(args, i, flag)?;
                i += 2;
            }
            "--stop-beeps" => {
                config.stop_beep_count = number(args, i, flag)?;
                i += 2;
            }
            "--cooldown-ms" => {
                config.cooldown_ms = number(args, i, flag)?;
                i += 2;
            }
            "--after-stop" => {
                let raw = value(args, i, flag)?;
                config.after_stop = AfterStop::parse(raw).ok_or_else(||
                    format!("Unknown after-stop behaviour: {}. Valid options: disarm, rearm", raw)
                )?;
                i += 2;
            }
            "--fft-size" => {
                config.fft_size = number(args, i, flag)?;
                i += 2;
            }
            "--smoothing" => {
                config.smoothing = number(args, i, flag)?;
                i += 2;
            }
            "--min-db" => {
                config.min_db = number(args, i, flag)?;
                i += 2;
            }
            "--max-db" => {
                config.max_db = number(args, i, flag)?;
                i += 2;
            }
            "--frame-ms" => {
                let v: u64 = number(args, i, flag)?;
                config.frame_ms = v.max(1);
                i += 2;
            }
            "--sample-rate" | "--sr" => {
                let v: u32 = number(args, i, flag)?;
                if v == 0 {
                    return Err("sample rate must be > 0".to_string());
                }
                config.sample_rate_hz = v;
                i += 2;
            }
            "-h" | "--help" => {
                return Ok(None);
            }
            _ => {
                return Err(format!("Unknown option: {}", args[i]));
            }
        }
    }

    config.validate()?;
    Ok(Some(config))
}

// ───────────────────────────────────────────────────────────────────────────────
// Decoder for WAV/MP3/MP4 (AAC)/FLAC/OGG using symphonia (used by replay mode)
// ───────────────────────────────────────────────────────────────────────────────
pub mod decode {
    use std::{ fs::File, path::Path };
    use symphonia::core::{
        audio::SampleBuffer,
        codecs::DecoderOptions,
        errors::Error,
        formats::FormatOptions,
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    };
    use symphonia::default::{ get_codecs, get_probe };

    #[derive(Debug)]
    pub struct AudioData {
        pub sr: u32,
        pub channels: u16,
        pub samples_mono: Vec<f32>, // channel average
    }

    pub fn load_mono<P: AsRef<Path>>(path: P) -> anyhow::Result<AudioData> {
        let path_ref = path.as_ref();

        let file = File::open(path_ref)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path_ref.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default()
        )?;
        let mut format = probed.format;

        let (track_id, codec_params) = {
            let track = format
                .default_track()
                .ok_or_else(|| anyhow::anyhow!("no default audio track found"))?;
            (track.id, track.codec_params.clone())
        };

        let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let sr = codec_params.sample_rate.ok_or_else(|| anyhow::anyhow!("unknown sample rate"))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(1u16);

        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut mono = Vec::<f32>::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(err) => {
                    return Err(err.into());
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(_)) => {
                    continue;
                }
                Err(err) => {
                    return Err(err.into());
                }
            };

            let spec = *decoded.spec();
            let chan_count = spec.channels.count().max(1);

            if
                sample_buf
                    .as_ref()
                    .map(|b| b.capacity() < decoded.capacity())
                    .unwrap_or(true)
            {
                sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };

            buf.copy_interleaved_ref(decoded);
            downmix_into(&mut mono, buf.samples(), chan_count);
        }

        Ok(AudioData { sr, channels, samples_mono: mono })
    }

    pub(crate) fn downmix_into(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
        if channels <= 1 {
            out.extend_from_slice(interleaved);
            return;
        }
        for frame in interleaved.chunks_exact(channels) {
            out.push(frame.iter().sum::<f32>() / (channels as f32));
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Shared helpers for the microphone path
// ───────────────────────────────────────────────────────────────────────────────
pub fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    tx: crossbeam_channel::Sender<Vec<f32>>,
    logger: Arc<Logger>
) -> Result<cpal::Stream> {
    let channels = config.channels.max(1) as usize;
    let err_logger = logger.clone();
    let err_fn = move |e| {
        let _ = err_logger.error(&format!("audio stream error: {}", e));
    };

    match sample_format {
        cpal::SampleFormat::F32 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[f32], _| on_audio_input_first_channel(data, channels, &tx),
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::I16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[i16], _| {
                        let tmp: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32) / 32768.0)
                            .collect();
                        on_audio_input_first_channel(&tmp, channels, &tx);
                    },
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::U16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[u16], _| {
                        let tmp: Vec<f32> = data
                            .iter()
                            .map(|&s| ((s as f32) / 65535.0) * 2.0 - 1.0)
                            .collect();
                        on_audio_input_first_channel(&tmp, channels, &tx);
                    },
                    err_fn,
                    None
                )?
            )
        }
        other => anyhow::bail!("Unsupported sample format: {:?}", other),
    }
}

fn on_audio_input_first_channel(
    data: &[f32],
    channels: usize,
    tx: &crossbeam_channel::Sender<Vec<f32>>
) {
    // a full channel means the pump is behind; dropping a block is fine here
    let _ = tx.try_send(first_channel(data, channels));
}

fn first_channel(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.iter().step_by(channels).copied().collect()
}

pub fn maybe_rate_supported(device: &cpal::Device, want: u32) -> Option<u32> {
    if let Ok(mut configs) = device.supported_input_configs() {
        for c in configs.by_ref() {
            let r = c.min_sample_rate().0..=c.max_sample_rate().0;
            if r.contains(&want) {
                return Some(want);
            }
        }
    }
    None
}

// ───────────────────────────────────────────────────────────────────────────────
// main
// ───────────────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_arguments_from(&args) {
        Ok(Some(c)) => c,
        Ok(None) => {
            print_usage(&Config::default());
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Config::default());
            std::process::exit(1);
        }
    };

    let logger = Arc::new(
        Logger::new_with_level(&cli.log_path, true, cli.log_level)?.with_stderr_echo(cli.log_echo)
    );
    if cli.log_echo && logger.is_enabled() {
        eprintln!("logging to {}", logger.file_path());
    }

    match cli.mode {
        Mode::Listen => mods::listen::run_listen(&cli, logger),
        Mode::Replay => mods::replay::run_replay(&cli, logger),
    }
}
