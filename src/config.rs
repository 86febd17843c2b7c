//! Playback tuning parameters.
//!
//! All values have defaults; a JSON document only needs to name the fields
//! it overrides.

use serde::{Deserialize, Serialize};

/// Tempo used when nothing else is known.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How far ahead of the host clock notes are committed, in seconds
    pub look_ahead: f64,
    /// Gain ramp from silence to peak at note start, in seconds
    pub attack: f64,
    /// Gain ramp from peak to silence ending at note stop, in seconds
    pub release: f64,
    /// Fade applied to sounding notes on seek and stop, in seconds
    pub seek_fade: f64,
    /// Envelope sustain level before the mix is applied
    pub peak_gain: f64,
    /// Longest a play-along note sounds while its key stays down, in seconds
    pub max_hold: f64,
    /// BPM change per tempo-up / tempo-down command
    pub tempo_step: f64,
    pub min_tempo: f64,
    pub max_tempo: f64,
    pub default_tempo: f64,
    /// Gain in dB at the bottom of the 0-100 volume range; volume 0 mutes
    pub min_db: f64,
    /// Gain in dB at volume 100
    pub max_db: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            look_ahead: 0.3,
            attack: 0.005,
            release: 0.03,
            seek_fade: 0.02,
            peak_gain: 0.8,
            max_hold: 8.0,
            tempo_step: 5.0,
            min_tempo: 20.0,
            max_tempo: 400.0,
            default_tempo: DEFAULT_TEMPO_BPM,
            min_db: -30.0,
            max_db: 5.0,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Clamp a requested tempo into the configured range.
    pub fn clamp_tempo(&self, bpm: f64) -> f64 {
        if !bpm.is_finite() {
            return self.default_tempo;
        }
        bpm.clamp(self.min_tempo, self.max_tempo)
    }
}
