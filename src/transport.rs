//! Transport state machine.
//!
//! ```text
//!            play                 pause
//! Stopped ─────────▶ Playing ─────────────▶ Paused
//!    ▲  ◀── stop ───┘  │  ▲ ◀──── resume ────┘ │
//!    │   / finished    │  │                    │
//!    │            seek ▼  │ (primed)      seek ▼
//!    │              Seeking{Playing}   Seeking{Paused}
//!    └──────── stop (from any state) ──────────┘
//! ```
//!
//! Commands that make no sense in the current state are ignored; user input
//! routinely races playback reaching the end, so this is not an error.
//! Everything the host should know about is queued as a [`TransportEvent`].
//!
//! While stopped the score can also be played along by hand: a slice command
//! holds the entry at `start + offset` until it is released, and the start
//! marker moves through the score independently of the cursor.

use std::collections::VecDeque;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::AudioResource;
use crate::clock::PlaybackClock;
use crate::config::PlaybackConfig;
use crate::cursor::{CursorController, CursorPosition, VisualCursor};
use crate::error::PlaybackError;
use crate::mix::Mix;
use crate::model::ScoreGraph;
use crate::preferences::{CursorOptions, DEFAULT_OVERALL_VOLUME};
use crate::rational::RationalTime;
use crate::scheduler::{AudioScheduler, TickReport};
use crate::timeline::ScoreTimeline;

/// State to return to once a seek has re-primed the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resume {
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
    Seeking { resume: Resume },
}

/// Everything the transport can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransportCommand {
    PlayPause,
    Play,
    Pause,
    Resume,
    Stop,
    SeekToStart,
    StepForward,
    StepBackward,
    TempoUp,
    TempoDown,
    Seek(RationalTime),
    SetTempo(f64),
    /// Hold the entry `offset` places after the start marker
    PlaySlice(usize),
    ReleaseSlice(usize),
    /// Move the start marker just past the most recent slice
    AdvanceStart,
    StartForward,
    StartBackward,
    ResetStart,
}

/// Notifications for the host, drained with [`Transport::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    /// New quarter-note tempo
    TempoChanged(f64),
    /// Something failed without stopping the session
    Warning(PlaybackError),
    /// Playback ran off the end of the score
    Finished,
    /// New start marker entry index
    StartChanged(usize),
}

pub struct Transport {
    config: PlaybackConfig,
    state: TransportState,
    timeline: Option<ScoreTimeline>,
    cursor: CursorController,
    scheduler: AudioScheduler,
    audio: AudioResource,
    mix: Mix,
    /// User tempo: quarter-note BPM at the start of the score
    tempo: f64,
    options: CursorOptions,
    /// Play-along start marker
    start_index: usize,
    /// Entry index of the last slice played
    last_slice: usize,
    events: VecDeque<TransportEvent>,
}

impl Transport {
    pub fn new(config: PlaybackConfig, audio: AudioResource, visual: Box<dyn VisualCursor>) -> Self {
        let tempo = config.default_tempo;
        let mix = Mix::new(0, DEFAULT_OVERALL_VOLUME, config.min_db, config.max_db);
        let scheduler = AudioScheduler::new(&config, PlaybackClock::constant(tempo));
        Self {
            config,
            state: TransportState::Stopped,
            timeline: None,
            cursor: CursorController::new(0, visual),
            scheduler,
            audio,
            mix,
            tempo,
            options: CursorOptions::default(),
            start_index: 0,
            last_slice: 0,
            events: VecDeque::new(),
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn timeline(&self) -> Option<&ScoreTimeline> {
        self.timeline.as_ref()
    }

    pub fn cursor(&self) -> &CursorController {
        &self.cursor
    }

    pub fn cursor_position(&self) -> CursorPosition {
        self.cursor.position()
    }

    pub fn scheduler(&self) -> &AudioScheduler {
        &self.scheduler
    }

    pub fn mix(&self) -> &Mix {
        &self.mix
    }

    /// Mix changes reach notes scheduled from now on.
    pub fn mix_mut(&mut self) -> &mut Mix {
        &mut self.mix
    }

    pub fn options(&self) -> CursorOptions {
        self.options
    }

    pub fn set_options(&mut self, options: CursorOptions) {
        self.options = options;
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Whether `play` can do anything: a non-empty score is loaded.
    pub fn can_play(&self) -> bool {
        self.timeline.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        self.events.drain(..).collect()
    }

    // ─── Score lifecycle ─────────────────────────────────────────────

    /// Build the timeline for a freshly loaded score and stop.
    ///
    /// On failure no score is loaded and `play` stays disabled.
    pub fn load_score(&mut self, graph: &ScoreGraph) -> Result<(), PlaybackError> {
        self.stop();
        match ScoreTimeline::build(graph) {
            Ok(timeline) => {
                info!("transport: loaded score with {} entries", timeline.len());
                self.install(timeline);
                Ok(())
            }
            Err(e) => {
                warn!("transport: score not playable: {}", e);
                self.timeline = None;
                self.cursor.rebind(0);
                Err(e)
            }
        }
    }

    /// Install an already-built timeline and stop.
    pub fn load_timeline(&mut self, timeline: ScoreTimeline) {
        self.stop();
        self.install(timeline);
    }

    /// Rebuild after a re-render. Playback stops; the cursor stays on the
    /// entry at the same musical position.
    pub fn relayout(&mut self, graph: &ScoreGraph) -> Result<(), PlaybackError> {
        let position = self
            .timeline
            .as_ref()
            .and_then(|t| self.cursor.current_entry(t))
            .map(|e| e.timestamp);
        self.load_score(graph)?;
        if let (Some(position), Some(timeline)) = (position, self.timeline.as_ref()) {
            self.cursor.seek(timeline, position);
        }
        Ok(())
    }

    /// A new score also releases held slices and puts the start marker
    /// back at the first entry, without a [`TransportEvent::StartChanged`].
    fn install(&mut self, timeline: ScoreTimeline) {
        self.release_all_slices();
        self.start_index = 0;
        self.last_slice = 0;
        self.cursor.rebind(timeline.len());
        self.mix.resize(timeline.voice_count());
        self.scheduler
            .set_clock(PlaybackClock::from_marks(timeline.tempo_marks(), self.tempo));
        self.scheduler.clear();
        self.timeline = Some(timeline);
    }

    // ─── Commands ────────────────────────────────────────────────────

    pub fn apply(&mut self, command: TransportCommand) {
        debug!("transport: {:?} in {:?}", command, self.state);
        match command {
            TransportCommand::PlayPause => self.play_pause(),
            TransportCommand::Play => self.play(),
            TransportCommand::Pause => self.pause(),
            TransportCommand::Resume => self.resume(),
            TransportCommand::Stop => self.stop(),
            TransportCommand::SeekToStart => self.seek_to_start(),
            TransportCommand::StepForward => self.step_forward(),
            TransportCommand::StepBackward => self.step_backward(),
            TransportCommand::TempoUp => self.set_tempo(self.tempo + self.config.tempo_step),
            TransportCommand::TempoDown => self.set_tempo(self.tempo - self.config.tempo_step),
            TransportCommand::Seek(position) => self.seek(position),
            TransportCommand::SetTempo(bpm) => self.set_tempo(bpm),
            TransportCommand::PlaySlice(offset) => self.play_slice(offset),
            TransportCommand::ReleaseSlice(offset) => self.release_slice(offset),
            TransportCommand::AdvanceStart => self.set_start(self.last_slice + 1),
            TransportCommand::StartForward => self.set_start(self.start_index + 1),
            TransportCommand::StartBackward => self.set_start(self.start_index.saturating_sub(1)),
            TransportCommand::ResetStart => self.set_start(0),
        }
    }

    pub fn play_pause(&mut self) {
        match self.state {
            TransportState::Stopped => self.play(),
            TransportState::Playing | TransportState::Seeking { resume: Resume::Playing } => self.pause(),
            TransportState::Paused | TransportState::Seeking { resume: Resume::Paused } => self.resume(),
        }
    }

    /// Start playback. Needs a loaded, non-empty score and a working audio
    /// context; otherwise nothing happens (a warning is queued when audio
    /// is the problem).
    pub fn play(&mut self) {
        if self.state != TransportState::Stopped {
            debug!("transport: play ignored in {:?}", self.state);
            return;
        }
        let Some(timeline) = self.timeline.as_ref().filter(|t| !t.is_empty()) else {
            debug!("transport: play ignored, no playable score");
            return;
        };
        let graph = match self.audio.acquire() {
            Ok(graph) => graph,
            Err(e) => {
                self.events.push_back(TransportEvent::Warning(e));
                return;
            }
        };

        let from = match self.cursor.index() {
            Some(i) if self.options.play_from_cursor => i,
            _ => {
                self.cursor.reset();
                0
            }
        };
        let now = graph.current_time();
        self.scheduler.clear();
        if let Err(e) = self.scheduler.start(now, timeline, from, &self.cursor) {
            self.events.push_back(TransportEvent::Warning(e));
            return;
        }
        self.set_state(TransportState::Playing);
        self.tick();
    }

    pub fn pause(&mut self) {
        let next = match self.state {
            TransportState::Playing => TransportState::Paused,
            TransportState::Seeking { resume: Resume::Playing } => TransportState::Seeking { resume: Resume::Paused },
            _ => {
                debug!("transport: pause ignored in {:?}", self.state);
                return;
            }
        };
        let Some(graph) = self.audio.get() else { return };
        if let Err(e) = graph.suspend() {
            warn!("transport: suspend failed: {}", e);
            self.events.push_back(TransportEvent::Warning(e.into()));
            return;
        }
        self.set_state(next);
    }

    pub fn resume(&mut self) {
        let next = match self.state {
            TransportState::Paused => TransportState::Playing,
            TransportState::Seeking { resume: Resume::Paused } => TransportState::Seeking { resume: Resume::Playing },
            _ => {
                debug!("transport: resume ignored in {:?}", self.state);
                return;
            }
        };
        let Some(graph) = self.audio.get() else { return };
        if let Err(e) = graph.resume() {
            warn!("transport: resume failed: {}", e);
            self.events.push_back(TransportEvent::Warning(e.into()));
            return;
        }
        self.set_state(next);
    }

    /// Fade out whatever is sounding, forget the schedule, reset the cursor.
    pub fn stop(&mut self) {
        if self.state == TransportState::Stopped {
            return;
        }
        let paused = matches!(
            self.state,
            TransportState::Paused | TransportState::Seeking { resume: Resume::Paused }
        );
        if let Some(graph) = self.audio.get() {
            if paused {
                if let Err(e) = graph.resume() {
                    warn!("transport: resume on stop failed: {}", e);
                }
            }
            let now = graph.current_time();
            self.scheduler.fade_all(graph, now, self.config.seek_fade);
        }
        self.scheduler.clear();
        self.reset_clock();
        self.cursor.reset();
        self.set_state(TransportState::Stopped);
    }

    /// Move to the first entry at or after `position`.
    pub fn seek(&mut self, position: RationalTime) {
        let Some(timeline) = self.timeline.as_ref() else { return };
        let index = timeline.first_at_or_after(position);
        self.seek_index(index);
    }

    pub fn seek_to_start(&mut self) {
        if self.state == TransportState::Stopped {
            self.cursor.reset();
        } else {
            self.seek_index(0);
        }
    }

    pub fn step_forward(&mut self) {
        let target = match self.cursor.position() {
            CursorPosition::BeforeFirst => 0,
            CursorPosition::At(i) => i + 1,
            CursorPosition::AfterLast => return,
        };
        if self.state == TransportState::Stopped {
            self.cursor.next();
            self.audition_current();
        } else {
            self.seek_index(target);
        }
    }

    pub fn step_backward(&mut self) {
        if self.state == TransportState::Stopped {
            if self.cursor.previous() != CursorPosition::BeforeFirst {
                self.audition_current();
            }
            return;
        }
        let target = match self.cursor.position() {
            CursorPosition::BeforeFirst => return,
            CursorPosition::At(i) => i.saturating_sub(1),
            CursorPosition::AfterLast => self.cursor.len().saturating_sub(1),
        };
        self.seek_index(target);
    }

    fn seek_index(&mut self, index: usize) {
        let Some(timeline) = self.timeline.as_ref() else { return };
        let resume = match self.state {
            TransportState::Stopped => {
                self.cursor.set_index(index);
                return;
            }
            TransportState::Playing | TransportState::Seeking { resume: Resume::Playing } => Resume::Playing,
            TransportState::Paused | TransportState::Seeking { resume: Resume::Paused } => Resume::Paused,
        };
        let Some(graph) = self.audio.get() else { return };
        let now = graph.current_time();
        let fade = self.config.seek_fade;
        self.scheduler.fade_all(graph, now, fade);
        // Nothing committed is left, so earlier tempo splits can go.
        self.scheduler
            .set_clock(PlaybackClock::from_marks(timeline.tempo_marks(), self.tempo));

        if index >= timeline.len() {
            self.scheduler.clear();
            self.cursor.set_index(index);
            self.finish();
            return;
        }

        self.cursor.set_index(index);
        // New notes start once the old ones have faded.
        if let Err(e) = self.scheduler.start(now + fade, timeline, index, &self.cursor) {
            self.events.push_back(TransportEvent::Warning(e));
            return;
        }
        self.set_state(TransportState::Seeking { resume });
    }

    /// Change the user tempo, clamped to the configured range.
    ///
    /// While playing, committed notes keep their timing and the change takes
    /// effect from the first entry not yet scheduled. The split lasts until
    /// the schedule is next discarded by a stop, seek or finish.
    pub fn set_tempo(&mut self, bpm: f64) {
        let bpm = self.config.clamp_tempo(bpm);
        if bpm == self.tempo {
            return;
        }
        let factor = bpm / self.tempo;
        match (self.state, self.timeline.as_ref()) {
            (TransportState::Stopped, _) | (_, None) => {}
            (_, Some(timeline)) => self.scheduler.rescale_unscheduled(timeline, factor),
        }
        info!("transport: tempo {} -> {}", self.tempo, bpm);
        self.tempo = bpm;
        if self.state == TransportState::Stopped {
            self.reset_clock();
        }
        self.events.push_back(TransportEvent::TempoChanged(bpm));
    }

    // ─── Play-along ──────────────────────────────────────────────────

    /// Hold the notes of the entry `offset` places after the start marker
    /// until [`release_slice`](Self::release_slice) with the same offset.
    /// Only while stopped; the cursor follows the slice.
    pub fn play_slice(&mut self, offset: usize) {
        if self.state != TransportState::Stopped {
            debug!("transport: slice ignored in {:?}", self.state);
            return;
        }
        let index = self.start_index + offset;
        self.last_slice = index;
        let Some(timeline) = self.timeline.as_ref().filter(|t| index < t.len()) else {
            return;
        };
        let graph = match self.audio.acquire() {
            Ok(graph) => graph,
            Err(e) => {
                self.events.push_back(TransportEvent::Warning(e));
                return;
            }
        };
        let now = graph.current_time();
        self.cursor.set_index(index);
        let report = self.scheduler.hold(offset, now, index, timeline, graph, &self.mix);
        self.push_warnings(report);
    }

    pub fn release_slice(&mut self, offset: usize) {
        let Some(graph) = self.audio.get() else { return };
        let now = graph.current_time();
        self.scheduler.release_held(offset, graph, now);
    }

    pub fn release_all_slices(&mut self) {
        let Some(graph) = self.audio.get() else { return };
        let now = graph.current_time();
        self.scheduler.release_all_held(graph, now);
    }

    /// Move the start marker, clamped to the last entry.
    pub fn set_start(&mut self, index: usize) {
        let last = self.timeline.as_ref().map_or(0, |t| t.len().saturating_sub(1));
        let index = index.min(last);
        if index == self.start_index {
            return;
        }
        debug!("transport: start marker {} -> {}", self.start_index, index);
        self.start_index = index;
        self.events.push_back(TransportEvent::StartChanged(index));
    }

    // ─── Refresh ─────────────────────────────────────────────────────

    /// The periodic refresh callback: schedule ahead, move the cursor,
    /// collect finished sample decodes.
    pub fn tick(&mut self) {
        for e in self.scheduler.samples_mut().poll() {
            self.events.push_back(TransportEvent::Warning(e));
        }

        let resume = match self.state {
            TransportState::Playing => None,
            TransportState::Seeking { resume } => Some(resume),
            TransportState::Stopped | TransportState::Paused => return,
        };
        let (Some(timeline), Some(graph)) = (self.timeline.as_ref(), self.audio.get()) else {
            return;
        };
        let now = graph.current_time();
        let report = self.scheduler.tick(now, timeline, graph, &self.mix, &mut self.cursor);
        let finished = report.finished;
        self.push_warnings(report);

        if finished {
            self.scheduler.clear();
            self.finish();
        } else if let Some(resume) = resume {
            self.set_state(match resume {
                Resume::Playing => TransportState::Playing,
                Resume::Paused => TransportState::Paused,
            });
        }
    }

    /// Queue the encoded sample for `note_name` (e.g. `"C4"`) for decoding.
    pub fn load_sample(&mut self, note_name: &str, bytes: Vec<u8>) -> Result<(), PlaybackError> {
        let graph = self.audio.acquire()?;
        self.scheduler.samples_mut().request(graph, note_name, bytes)
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn audition_current(&mut self) {
        if !self.options.audition_on_step {
            return;
        }
        let (Some(timeline), Some(index)) = (self.timeline.as_ref(), self.cursor.index()) else {
            return;
        };
        let graph = match self.audio.acquire() {
            Ok(graph) => graph,
            Err(e) => {
                self.events.push_back(TransportEvent::Warning(e));
                return;
            }
        };
        let now = graph.current_time();
        // Only one audition sounds at a time.
        self.scheduler.fade_all(graph, now, self.config.seek_fade);
        let report = self.scheduler.audition(now, index, timeline, graph, &self.mix);
        self.push_warnings(report);
    }

    fn finish(&mut self) {
        // A suspended host clock would hold back the fades.
        if let Some(graph) = self.audio.get() {
            if matches!(
                self.state,
                TransportState::Paused | TransportState::Seeking { resume: Resume::Paused }
            ) {
                if let Err(e) = graph.resume() {
                    warn!("transport: resume on finish failed: {}", e);
                }
            }
        }
        self.reset_clock();
        self.set_state(TransportState::Stopped);
        self.events.push_back(TransportEvent::Finished);
    }

    /// Rebuild the tempo map from the score marks at the current user
    /// tempo. Only valid once the schedule has been discarded.
    fn reset_clock(&mut self) {
        let marks = self.timeline.as_ref().map(|t| t.tempo_marks()).unwrap_or(&[]);
        self.scheduler.set_clock(PlaybackClock::from_marks(marks, self.tempo));
    }

    fn push_warnings(&mut self, report: TickReport) {
        self.events
            .extend(report.warnings.into_iter().map(TransportEvent::Warning));
    }

    fn set_state(&mut self, state: TransportState) {
        if state == self.state {
            return;
        }
        info!("transport: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.events.push_back(TransportEvent::StateChanged(state));
    }
}
