//! Per-voice mix: volume, mute and solo.
//!
//! Volumes are 0-100 slider values. They are mapped to gain on a decibel
//! scale so equal slider steps sound like equal loudness steps. Mix changes
//! apply to notes scheduled afterwards; committed notes keep their gain.

use serde::{Deserialize, Serialize};

/// Default slider position for a voice.
pub const DEFAULT_VOICE_VOLUME: u32 = 70;

/// Map a 0-100 volume to a gain multiplier by interpolating between
/// `min_db` and `max_db`. Volume 0 is silence.
///
/// ```
/// # use scoreplay::volume_to_gain;
/// assert_eq!(volume_to_gain(0, -30.0, 5.0), 0.0);
/// assert!((volume_to_gain(100, -30.0, 0.0) - 1.0).abs() < 1e-12);
/// ```
pub fn volume_to_gain(volume: u32, min_db: f64, max_db: f64) -> f64 {
    if volume == 0 {
        return 0.0;
    }
    let factor = volume.min(100) as f64 / 100.0;
    let db = min_db + (max_db - min_db) * factor;
    // dB = 20 * log10(gain / 1.0)
    10f64.powf(db / 20.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMix {
    pub volume: u32,
    pub mute: bool,
    pub solo: bool,
}

impl Default for VoiceMix {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOICE_VOLUME,
            mute: false,
            solo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mix {
    pub overall_volume: u32,
    voices: Vec<VoiceMix>,
    min_db: f64,
    max_db: f64,
}

impl Mix {
    pub fn new(voice_count: usize, overall_volume: u32, min_db: f64, max_db: f64) -> Self {
        Self {
            overall_volume,
            voices: vec![VoiceMix::default(); voice_count],
            min_db,
            max_db,
        }
    }

    /// Match a new timeline's voice count, keeping settings of voices that
    /// still exist.
    pub fn resize(&mut self, voice_count: usize) {
        self.voices.resize(voice_count, VoiceMix::default());
    }

    pub fn voices(&self) -> &[VoiceMix] {
        &self.voices
    }

    pub fn voice_mut(&mut self, voice: usize) -> Option<&mut VoiceMix> {
        self.voices.get_mut(voice)
    }

    pub fn set_voice_volume(&mut self, voice: usize, volume: u32) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.volume = volume.min(100);
        }
    }

    /// Toggle mute; turning mute on clears the voice's solo.
    pub fn toggle_mute(&mut self, voice: usize) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.mute = !v.mute;
            if v.mute {
                v.solo = false;
            }
        }
    }

    /// Toggle solo; turning solo on clears the voice's mute.
    pub fn toggle_solo(&mut self, voice: usize) {
        if let Some(v) = self.voices.get_mut(voice) {
            v.solo = !v.solo;
            if v.solo {
                v.mute = false;
            }
        }
    }

    fn any_solo(&self) -> bool {
        self.voices.iter().any(|v| v.solo)
    }

    /// Muted voices are never heard; while any voice is soloed only soloed
    /// voices are. Voices beyond the mix's range play at default volume.
    pub fn is_audible(&self, voice: usize) -> bool {
        match self.voices.get(voice) {
            Some(v) => !v.mute && (v.solo || !self.any_solo()),
            None => !self.any_solo(),
        }
    }

    /// Combined overall and voice gain, `None` when the voice is inaudible.
    pub fn gain_for(&self, voice: usize) -> Option<f64> {
        if !self.is_audible(voice) {
            return None;
        }
        let volume = self.voices.get(voice).map(|v| v.volume).unwrap_or(DEFAULT_VOICE_VOLUME);
        let gain = volume_to_gain(self.overall_volume, self.min_db, self.max_db)
            * volume_to_gain(volume, self.min_db, self.max_db);
        (gain > 0.0).then_some(gain)
    }
}
