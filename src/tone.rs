//! src/tone.rs

use crate::spectrum::Peak;

#[derive(Clone, Debug)]
pub struct ToneMatcher {
    targets_hz: Vec<f32>,
    tolerance_hz: f32,
    sensitivity: u8,
}

impl ToneMatcher {
    pub fn new(targets_hz: Vec<f32>, tolerance_hz: f32, sensitivity: u8) -> Self {
        Self { targets_hz, tolerance_hz, sensitivity }
    }

    pub fn from_config(cfg: &crate::Config) -> Self {
        Self::new(cfg.target_frequencies.clone(), cfg.freq_tolerance_hz, cfg.sensitivity)
    }

    /// True when `freq_hz` is strictly inside the tolerance band of any target.
    pub fn matches_frequency(&self, freq_hz: f32) -> bool {
        self.targets_hz.iter().any(|&t| (freq_hz - t).abs() < self.tolerance_hz)
    }

    pub fn is_tone_active(&self, peak: &Peak) -> bool {
        peak.amplitude > self.sensitivity && self.matches_frequency(peak.frequency_hz)
    }
}
