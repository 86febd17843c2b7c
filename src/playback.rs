//! Playback map: the timeline laid out in milliseconds for a host UI.
//!
//! Hosts that animate their own cursor (or draw a progress bar) need to know
//! when each timeline entry sounds at the current tempo without running the
//! scheduler. This is that table, serialisable to JSON.

use serde::Serialize;

use crate::clock::PlaybackClock;
use crate::error::PlaybackError;
use crate::timeline::ScoreTimeline;

/// Timing of every timeline entry at one tempo map.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackMap {
    /// Tempo at the start of the score (quarter-note BPM)
    pub tempo_bpm: f64,
    /// When the last note stops, in milliseconds
    pub end_ms: f64,
    pub entries: Vec<EntryTiming>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryTiming {
    /// Index in the timeline
    pub index: usize,
    /// Musical position, e.g. `"3/4"`
    pub position: String,
    /// Start time in milliseconds
    pub time_ms: f64,
    /// Time until the next entry (or the end), in milliseconds
    pub duration_ms: f64,
    /// Tempo at this entry (BPM)
    pub tempo_bpm: f64,
    /// MIDI numbers of the notes that start sounding here
    pub pitches: Vec<i32>,
}

/// Lay out a timeline under a tempo map.
pub fn generate_playback_map(timeline: &ScoreTimeline, clock: &PlaybackClock) -> Result<PlaybackMap, PlaybackError> {
    let end_ms = clock.to_real(timeline.end_time()?) * 1000.0;
    let entries = timeline
        .entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let time_ms = clock.to_real(entry.timestamp) * 1000.0;
            let next_ms = timeline
                .entry(index + 1)
                .map(|next| clock.to_real(next.timestamp) * 1000.0)
                .unwrap_or(end_ms);
            EntryTiming {
                index,
                position: entry.timestamp.to_string(),
                time_ms,
                duration_ms: next_ms - time_ms,
                tempo_bpm: clock.tempo_at(entry.timestamp),
                pitches: entry.sounding_notes().filter_map(|n| n.pitch).collect(),
            }
        })
        .collect();

    Ok(PlaybackMap {
        tempo_bpm: clock.tempo_at(crate::RationalTime::ZERO),
        end_ms,
        entries,
    })
}

/// Serialize a PlaybackMap to JSON.
pub fn playback_map_to_json(map: &PlaybackMap) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}
