//! src/spectrum.rs
//! Byte spectra and the peak extractor.
//!
//! `Analyser` reproduces the browser analyser-node pipeline (Blackman window,
//! |X|/N magnitude, exponential smoothing, dB mapped onto 0..=255) so the
//! sensitivity threshold keeps its 0-255 meaning on every capture path.

use anyhow::{ bail, Result };
use realfft::{ RealFftPlanner, RealToComplex };
use rustfft::num_complex::Complex32;
use std::sync::Arc;

/// One analyser snapshot: amplitude per frequency bin.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralFrame {
    pub bins: Vec<u8>,
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl SpectralFrame {
    #[cfg(test)]
    pub fn bin_hz(&self) -> f32 {
        (self.sample_rate as f32) / (self.fft_size.max(1) as f32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Peak {
    pub frequency_hz: f32,
    pub amplitude: u8,
    pub bin: usize,
}

/// Argmax over the bins, ties to the lowest index.
pub fn extract_peak(frame: &SpectralFrame) -> Peak {
    let mut max_val = 0u8;
    let mut max_index = 0usize;
    for (i, &v) in frame.bins.iter().enumerate() {
        if v > max_val {
            max_val = v;
            max_index = i;
        }
    }
    Peak {
        frequency_hz: ((max_index as f32) * (frame.sample_rate as f32)) /
        (frame.fft_size.max(1) as f32),
        amplitude: max_val,
        bin: max_index,
    }
}

/// Anything that can hand the detector a fresh spectrum once per refresh.
/// `Ok(None)` means the source is exhausted.
pub trait SpectralSource {
    fn sample_rate(&self) -> u32;
    fn fft_size(&self) -> usize;
    fn next_frame(&mut self) -> Result<Option<SpectralFrame>>;
}

#[derive(Clone, Copy, Debug)]
pub struct AnalyserParams {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl AnalyserParams {
    pub fn from_config(cfg: &crate::Config) -> Self {
        Self {
            fft_size: cfg.fft_size,
            smoothing: cfg.smoothing,
            min_db: cfg.min_db,
            max_db: cfg.max_db,
        }
    }
}

#[inline]
fn blackman(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..n)
        .map(|i| {
            let t = (2.0 * std::f32::consts::PI * (i as f32)) / (n as f32);
            a0 - a1 * t.cos() + a2 * (2.0 * t).cos()
        })
        .collect()
}

pub struct Analyser {
    params: AnalyserParams,
    sample_rate: u32,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    inbuf: Vec<f32>,
    outbuf: Vec<Complex32>,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new(sample_rate: u32, params: AnalyserParams) -> Result<Self> {
        let n = params.fft_size;
        if !n.is_power_of_two() || !(32..=32768).contains(&n) {
            bail!("fft size must be a power of two in 32..=32768, got {}", n);
        }
        if sample_rate == 0 {
            bail!("sample rate must be > 0");
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(n);
        let outbuf = r2c.make_output_vec();
        Ok(Self {
            params,
            sample_rate,
            window: blackman(n),
            r2c,
            inbuf: vec![0.0; n],
            outbuf,
            smoothed: vec![0.0; n / 2],
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.params.fft_size
    }

    /// Spectrum of the most recent `fft_size` samples; shorter input is
    /// left-padded with silence.
    pub fn frame(&mut self, samples: &[f32]) -> Result<SpectralFrame> {
        let n = self.params.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        let tail = &samples[samples.len() - take..];

        for v in self.inbuf[..pad].iter_mut() {
            *v = 0.0;
        }
        for (j, &s) in tail.iter().enumerate() {
            self.inbuf[pad + j] = s * self.window[pad + j];
        }

        self.r2c.process(&mut self.inbuf, &mut self.outbuf)?;

        let tau = self.params.smoothing;
        let range = self.params.max_db - self.params.min_db;
        let scale = 1.0 / (n as f32);
        let mut bins = Vec::with_capacity(n / 2);
        for (k, c) in self.outbuf.iter().take(n / 2).enumerate() {
            let mag = c.norm() * scale;
            let s = tau * self.smoothed[k] + (1.0 - tau) * mag;
            self.smoothed[k] = s;
            bins.push(db_to_byte(s, self.params.min_db, range));
        }

        Ok(SpectralFrame { bins, sample_rate: self.sample_rate, fft_size: n })
    }
}

#[inline]
fn db_to_byte(magnitude: f32, min_db: f32, range_db: f32) -> u8 {
    if magnitude <= 0.0 || !magnitude.is_finite() {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = ((db - min_db) / range_db) * 255.0;
    scaled.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bins: Vec<u8>) -> SpectralFrame {
        SpectralFrame { bins, sample_rate: 48_000, fft_size: 2048 }
    }

    fn params() -> AnalyserParams {
        AnalyserParams { fft_size: 2048, smoothing: 0.0, min_db: -100.0, max_db: -30.0 }
    }

    fn sine(freq: f32, sr: u32, n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * (i as f32) / (sr as f32)).sin())
            .collect()
    }

    #[test]
    fn peak_frequency_follows_bin_formula() {
        let mut bins = vec![0u8; 1024];
        bins[93] = 200;
        let p = extract_peak(&frame(bins));
        assert_eq!(p.bin, 93);
        assert_eq!(p.amplitude, 200);
        assert!((p.frequency_hz - (93.0 * 48_000.0) / 2048.0).abs() < 1e-3);
    }

    #[test]
    fn peak_ties_pick_lowest_bin() {
        let mut bins = vec![10u8; 64];
        bins[7] = 90;
        bins[20] = 90;
        bins[50] = 90;
        assert_eq!(extract_peak(&frame(bins)).bin, 7);
    }

    #[test]
    fn silent_frame_peaks_at_bin_zero() {
        let p = extract_peak(&frame(vec![0u8; 1024]));
        assert_eq!((p.bin, p.amplitude), (0, 0));
        assert_eq!(p.frequency_hz, 0.0);

        let empty = extract_peak(&frame(Vec::new()));
        assert_eq!((empty.bin, empty.amplitude), (0, 0));
    }

    #[test]
    fn analyser_rejects_bad_fft_size() {
        let mut p = params();
        p.fft_size = 1000;
        assert!(Analyser::new(48_000, p).is_err());
        p.fft_size = 16;
        assert!(Analyser::new(48_000, p).is_err());
    }

    #[test]
    fn analyser_finds_injected_tone() {
        let sr = 48_000;
        let mut a = Analyser::new(sr, params()).unwrap();
        let f = a.frame(&sine(2179.0, sr, 4096, 0.5)).unwrap();
        assert_eq!(f.bins.len(), 1024);
        let p = extract_peak(&f);
        assert!((p.frequency_hz - 2179.0).abs() < f.bin_hz() * 1.5, "peak {}", p.frequency_hz);
        assert!(p.amplitude > 200, "amplitude {}", p.amplitude);
    }

    #[test]
    fn analyser_silence_is_all_zero() {
        let mut a = Analyser::new(48_000, params()).unwrap();
        let f = a.frame(&[]).unwrap();
        assert!(f.bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn smoothing_lags_behind_new_energy() {
        let sr = 48_000;
        let mut raw = Analyser::new(sr, params()).unwrap();
        let mut p = params();
        p.smoothing = 0.8;
        let mut smooth = Analyser::new(sr, p).unwrap();

        let tone = sine(3000.0, sr, 2048, 0.05);
        let fast = extract_peak(&raw.frame(&tone).unwrap());
        let slow = extract_peak(&smooth.frame(&tone).unwrap());
        assert!(slow.amplitude < fast.amplitude);
    }

    #[test]
    fn db_mapping_clamps_to_byte_range() {
        assert_eq!(db_to_byte(0.0, -100.0, 70.0), 0);
        assert_eq!(db_to_byte(1.0, -100.0, 70.0), 255);
        // -65 dB sits halfway between -100 and -30
        let mid = db_to_byte((10.0f32).powf(-65.0 / 20.0), -100.0, 70.0);
        assert!((126..=128).contains(&mid), "mid {}", mid);
    }
}
