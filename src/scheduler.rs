//! Audio scheduler: turns timeline entries into committed audio events and
//! keeps the cursor in step with them.
//!
//! Each tick takes one `now` sample from the host clock and does two walks
//! over the timeline:
//!
//! 1. **Scheduling.** Entries whose start falls before `now + look_ahead` are
//!    submitted to the host graph, one event per sounding note, each with an
//!    attack/release envelope ending exactly at its stop time. The walk
//!    resumes from the first unscheduled entry, so a second tick at the same
//!    `now` submits nothing.
//! 2. **Cursor.** Every entry whose start is at or before `now` advances the
//!    cursor by one `next()`, in order, catching up if several were crossed
//!    since the last tick.
//!
//! Committed events cannot be withdrawn. Seeking and stopping fade the
//! sounding ones out instead; tempo changes only reach entries that are not
//! yet scheduled.
//!
//! Play-along notes are held apart from the schedule, keyed by the slot that
//! started them, until they are released.

use std::collections::HashMap;

use log::{debug, warn};

use crate::audio::{AudioGraph, GainEnvelope, SampleBank, ScheduledAudioEvent, VoiceHandle};
use crate::clock::PlaybackClock;
use crate::config::PlaybackConfig;
use crate::cursor::CursorController;
use crate::error::PlaybackError;
use crate::mix::Mix;
use crate::rational::RationalTime;
use crate::timeline::{ScoreTimeline, TimelineEntry};

/// A submitted event that may still be sounding.
#[derive(Debug, Clone, Copy)]
struct Sounding {
    handle: VoiceHandle,
    stop: f64,
}

/// Outcome of one scheduling tick.
#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    /// Audio events submitted during this tick
    pub scheduled: usize,
    /// `next()` calls made on the cursor
    pub advanced: usize,
    /// The cursor reached after-last
    pub finished: bool,
    /// Submissions the host rejected
    pub warnings: Vec<PlaybackError>,
}

#[derive(Debug)]
pub struct AudioScheduler {
    clock: PlaybackClock,
    look_ahead: f64,
    attack: f64,
    release: f64,
    peak_gain: f64,
    max_hold: f64,
    /// Host time at which score position zero sounds
    origin: f64,
    /// First entry not yet scheduled
    next_index: usize,
    /// First entry the cursor has not yet been advanced onto
    cursor_index: usize,
    end: RationalTime,
    sounding: Vec<Sounding>,
    held: HashMap<usize, Vec<Sounding>>,
    samples: SampleBank,
}

impl AudioScheduler {
    pub fn new(config: &PlaybackConfig, clock: PlaybackClock) -> Self {
        Self {
            clock,
            look_ahead: config.look_ahead,
            attack: config.attack,
            release: config.release,
            peak_gain: config.peak_gain,
            max_hold: config.max_hold,
            origin: 0.0,
            next_index: 0,
            cursor_index: 0,
            end: RationalTime::ZERO,
            sounding: Vec::new(),
            held: HashMap::new(),
            samples: SampleBank::new(),
        }
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Replace the tempo map; only valid while nothing is scheduled.
    pub fn set_clock(&mut self, clock: PlaybackClock) {
        self.clock = clock;
    }

    pub fn samples(&self) -> &SampleBank {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut SampleBank {
        &mut self.samples
    }

    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Index of the last entry committed to the host, if any.
    pub fn last_scheduled_index(&self) -> Option<usize> {
        self.next_index.checked_sub(1)
    }

    /// Host time of the last committed entry's start.
    pub fn last_scheduled_time(&self, timeline: &ScoreTimeline) -> Option<f64> {
        let entry = timeline.entry(self.last_scheduled_index()?)?;
        Some(self.host_time(entry.timestamp))
    }

    /// First entry not yet committed.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Number of submitted events that have not yet reached their stop time
    /// as of the last tick.
    pub fn sounding_count(&self) -> usize {
        self.sounding.len()
    }

    /// Notes held under `slot`.
    pub fn held_count(&self, slot: usize) -> usize {
        self.held.get(&slot).map_or(0, Vec::len)
    }

    /// Host time at which a musical position sounds.
    pub fn host_time(&self, position: RationalTime) -> f64 {
        self.origin + self.clock.to_real(position)
    }

    /// Anchor entry `from` at host time `at` and reset the bookkeeping.
    ///
    /// The cursor must be either on entry `from` or just before it; in the
    /// second case the first tick at or after `at` moves it onto `from`.
    pub fn start(
        &mut self,
        at: f64,
        timeline: &ScoreTimeline,
        from: usize,
        cursor: &CursorController,
    ) -> Result<(), PlaybackError> {
        let anchor = timeline.entry(from).map(|e| e.timestamp).unwrap_or(RationalTime::ZERO);
        self.origin = at - self.clock.to_real(anchor);
        self.next_index = from;
        self.cursor_index = match cursor.index() {
            Some(i) if i == from => from + 1,
            _ => from,
        };
        self.end = timeline.end_time()?;
        debug!("scheduler: start at entry {} (host {:.3}s)", from, at);
        Ok(())
    }

    /// Forget all bookkeeping. Sounding events must be faded first.
    pub fn clear(&mut self) {
        self.next_index = 0;
        self.cursor_index = 0;
        self.sounding.clear();
    }

    /// Ramp every still-sounding event to silence over `duration`.
    pub fn fade_all(&mut self, graph: &mut dyn AudioGraph, now: f64, duration: f64) {
        for s in self.sounding.drain(..) {
            if s.stop > now {
                graph.fade_out(s.handle, now, duration);
            }
        }
    }

    /// Scale the tempo of everything not yet scheduled by `factor`.
    ///
    /// The split sits at the first unscheduled entry, so the tempo map is
    /// unchanged for committed events and `origin` stays valid.
    pub fn rescale_unscheduled(&mut self, timeline: &ScoreTimeline, factor: f64) {
        let split = timeline
            .entry(self.next_index)
            .map(|e| e.timestamp)
            .unwrap_or(self.end);
        self.clock.rescale_from(split, factor);
        debug!("scheduler: tempo x{:.3} from {}", factor, split);
    }

    /// One refresh of the scheduling and cursor walks.
    pub fn tick(
        &mut self,
        now: f64,
        timeline: &ScoreTimeline,
        graph: &mut dyn AudioGraph,
        mix: &Mix,
        cursor: &mut CursorController,
    ) -> TickReport {
        let mut report = TickReport::default();
        self.sounding.retain(|s| s.stop > now);

        let horizon = now + self.look_ahead;
        while let Some(entry) = timeline.entry(self.next_index) {
            if self.host_time(entry.timestamp) >= horizon {
                break;
            }
            self.schedule_entry(self.next_index, entry, now, graph, mix, &mut report);
            self.next_index += 1;
        }

        while let Some(entry) = timeline.entry(self.cursor_index) {
            if self.host_time(entry.timestamp) > now {
                break;
            }
            cursor.next();
            self.cursor_index += 1;
            report.advanced += 1;
        }

        if self.cursor_index >= timeline.len() && now >= self.host_time(self.end) {
            cursor.next();
            report.finished = true;
        }

        if report.scheduled > 0 || report.advanced > 0 {
            debug!(
                "scheduler: tick at {:.3}s scheduled {} advanced {}",
                now, report.scheduled, report.advanced
            );
        }
        report
    }

    /// Sound one entry right now, outside of playback.
    pub fn audition(
        &mut self,
        now: f64,
        index: usize,
        timeline: &ScoreTimeline,
        graph: &mut dyn AudioGraph,
        mix: &Mix,
    ) -> TickReport {
        let mut report = TickReport::default();
        if let Some(entry) = timeline.entry(index) {
            let saved = self.origin;
            self.origin = now - self.clock.to_real(entry.timestamp);
            self.schedule_entry(index, entry, now, graph, mix, &mut report);
            self.origin = saved;
        }
        report
    }

    /// Start the sounding notes of entry `index` at `now` and keep them
    /// under `slot` until [`release_held`](Self::release_held), for at most
    /// the configured hold time. Notes already held under `slot` are released.
    pub fn hold(
        &mut self,
        slot: usize,
        now: f64,
        index: usize,
        timeline: &ScoreTimeline,
        graph: &mut dyn AudioGraph,
        mix: &Mix,
    ) -> TickReport {
        self.release_held(slot, graph, now);
        let mut report = TickReport::default();
        let Some(entry) = timeline.entry(index) else {
            return report;
        };

        let stop = now + self.max_hold;
        let mut notes = Vec::new();
        for note in entry.sounding_notes() {
            let (Some(pitch), Some(gain)) = (note.pitch, mix.gain_for(note.voice)) else {
                continue;
            };
            let event = ScheduledAudioEvent {
                entry: index,
                voice: note.voice,
                pitch,
                start: now,
                stop,
                source: self.samples.source_for(pitch),
                envelope: GainEnvelope::attack_release(now, stop, self.peak_gain * gain, self.attack, self.release),
            };
            match graph.submit(&event) {
                Ok(handle) => {
                    notes.push(Sounding { handle, stop });
                    report.scheduled += 1;
                }
                Err(e) => {
                    warn!("scheduler: host rejected held note {} of entry {}: {}", pitch, index, e);
                    report.warnings.push(e.into());
                }
            }
        }
        if !notes.is_empty() {
            debug!("scheduler: holding {} notes of entry {} on slot {}", notes.len(), index, slot);
            self.held.insert(slot, notes);
        }
        report
    }

    /// Fade out the notes held under `slot`; returns how many were faded.
    pub fn release_held(&mut self, slot: usize, graph: &mut dyn AudioGraph, now: f64) -> usize {
        let Some(notes) = self.held.remove(&slot) else {
            return 0;
        };
        let mut faded = 0;
        for n in notes.into_iter().filter(|n| n.stop > now) {
            graph.fade_out(n.handle, now, self.release);
            faded += 1;
        }
        faded
    }

    pub fn release_all_held(&mut self, graph: &mut dyn AudioGraph, now: f64) {
        let slots: Vec<usize> = self.held.keys().copied().collect();
        for slot in slots {
            self.release_held(slot, graph, now);
        }
    }

    fn schedule_entry(
        &mut self,
        index: usize,
        entry: &TimelineEntry,
        now: f64,
        graph: &mut dyn AudioGraph,
        mix: &Mix,
        report: &mut TickReport,
    ) {
        let start = self.host_time(entry.timestamp);
        for note in entry.sounding_notes() {
            let (Some(pitch), Some(gain)) = (note.pitch, mix.gain_for(note.voice)) else {
                continue;
            };
            let stop = match entry.timestamp.add(note.duration) {
                Ok(end) => self.host_time(end),
                Err(e) => {
                    report.warnings.push(e.into());
                    continue;
                }
            };
            // A late tick starts the note partway; a note already over is dropped.
            let start = start.max(now);
            if stop <= start {
                continue;
            }

            let event = ScheduledAudioEvent {
                entry: index,
                voice: note.voice,
                pitch,
                start,
                stop,
                source: self.samples.source_for(pitch),
                envelope: GainEnvelope::attack_release(start, stop, self.peak_gain * gain, self.attack, self.release),
            };
            match graph.submit(&event) {
                Ok(handle) => {
                    self.sounding.push(Sounding { handle, stop });
                    report.scheduled += 1;
                }
                Err(e) => {
                    warn!("scheduler: host rejected note {} of entry {}: {}", pitch, index, e);
                    report.warnings.push(e.into());
                }
            }
        }
    }
}
