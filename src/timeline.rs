//! Score timeline: the flattened, time-ordered view of every voice entry.
//!
//! Built in one pass over the [`ScoreGraph`]: each note is placed at its
//! absolute timestamp, notes are ordered by voice index, and everything
//! sharing a timestamp is merged into one [`TimelineEntry`]. Rests stay in
//! the timeline as silent notes so the cursor still stops on them.

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use crate::error::PlaybackError;
use crate::model::{NoteId, ScoreGraph, TempoMark};
use crate::rational::RationalTime;

/// One note (or rest) sounding at a timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEvent {
    /// MIDI semitone number, `None` for a rest
    pub pitch: Option<i32>,
    /// Sounding length; the head of a tie chain carries the whole chain
    pub duration: RationalTime,
    /// Position of the note's (staff, voice) key in [`ScoreGraph::voice_keys`]
    pub voice: usize,
    /// Notated continuation of a tie: advances the cursor, never sounds
    pub tie_continuation: bool,
}

impl NoteEvent {
    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }

    /// Whether this note produces audio when its entry is reached.
    pub fn sounds(&self) -> bool {
        !self.is_rest() && !self.tie_continuation
    }
}

/// Every note starting at one timestamp, across all voices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub timestamp: RationalTime,
    /// Ordered by voice index
    pub notes: Vec<NoteEvent>,
}

impl TimelineEntry {
    pub fn sounding_notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.notes.iter().filter(|n| n.sounds())
    }

    /// Whether the entry is pure silence (rests or tie continuations only).
    pub fn is_silent(&self) -> bool {
        !self.notes.iter().any(NoteEvent::sounds)
    }
}

/// Immutable, strictly time-ordered sequence of entries.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreTimeline {
    entries: Vec<TimelineEntry>,
    tempo_marks: Vec<TempoMark>,
    voice_count: usize,
}

/// A note before merging, in sort order.
struct Placed {
    timestamp: RationalTime,
    voice: usize,
    note: NoteId,
    event: NoteEvent,
}

impl ScoreTimeline {
    /// Flatten a score graph.
    ///
    /// Fails with [`PlaybackError::Arithmetic`] when a timestamp cannot be
    /// computed, and with [`PlaybackError::EmptyScore`] when the score holds
    /// no notes or rests at all.
    pub fn build(graph: &ScoreGraph) -> Result<Self, PlaybackError> {
        let keys = graph.voice_keys();
        let voice_index: HashMap<(u32, u32), usize> = keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();

        let mut placed = Vec::with_capacity(graph.note_count());
        for (i, note) in graph.notes.iter().enumerate() {
            let id = NoteId(i);
            let key = graph.voice_key_of_entry(note.entry);
            let voice = voice_index.get(&key).copied().unwrap_or(0);
            placed.push(Placed {
                timestamp: graph.note_timestamp(id)?,
                voice,
                note: id,
                event: NoteEvent {
                    pitch: note.pitch.as_ref().map(|p| p.to_midi()),
                    duration: note.length,
                    voice,
                    tie_continuation: false,
                },
            });
        }
        placed.sort_by(|a, b| (a.timestamp, a.voice, a.note).cmp(&(b.timestamp, b.voice, b.note)));

        resolve_ties(graph, &mut placed)?;

        let mut entries: Vec<TimelineEntry> = Vec::new();
        for p in placed {
            match entries.last_mut() {
                Some(last) if last.timestamp == p.timestamp => last.notes.push(p.event),
                _ => entries.push(TimelineEntry {
                    timestamp: p.timestamp,
                    notes: vec![p.event],
                }),
            }
        }

        if entries.is_empty() {
            return Err(PlaybackError::EmptyScore);
        }
        debug!(
            "timeline: {} entries from {} notes across {} voices",
            entries.len(),
            graph.note_count(),
            keys.len()
        );

        Ok(Self {
            entries,
            tempo_marks: graph.tempo_marks.clone(),
            voice_count: keys.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&TimelineEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn tempo_marks(&self) -> &[TempoMark] {
        &self.tempo_marks
    }

    /// Declared voices, including ones without entries.
    pub fn voice_count(&self) -> usize {
        self.voice_count
    }

    /// Index of the first entry at or after `position`; `len()` if none.
    pub fn first_at_or_after(&self, position: RationalTime) -> usize {
        self.entries.partition_point(|e| e.timestamp < position)
    }

    /// Position where the last note stops sounding.
    pub fn end_time(&self) -> Result<RationalTime, PlaybackError> {
        let mut end = RationalTime::ZERO;
        for entry in &self.entries {
            let longest = entry.notes.iter().map(|n| n.duration).max().unwrap_or(RationalTime::ZERO);
            end = end.max(entry.timestamp.add(longest)?);
        }
        Ok(end)
    }
}

/// Fold tie chains into their first note. Chains are followed per
/// (voice, pitch) in timeline order.
fn resolve_ties(graph: &ScoreGraph, placed: &mut [Placed]) -> Result<(), PlaybackError> {
    let mut open: HashMap<(usize, i32), usize> = HashMap::new();

    for i in 0..placed.len() {
        let Some(pitch) = placed[i].event.pitch else { continue };
        let note = graph.note(placed[i].note);
        let chain = (placed[i].voice, pitch);

        if note.tie_stop {
            if let Some(&head) = open.get(&chain) {
                let extended = placed[head].event.duration.add(placed[i].event.duration)?;
                placed[head].event.duration = extended;
                placed[i].event.tie_continuation = true;
                if !note.tie_start {
                    open.remove(&chain);
                }
                continue;
            }
        }
        if note.tie_start {
            open.insert(chain, i);
        }
    }
    Ok(())
}
