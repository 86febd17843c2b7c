//! Shared test doubles: a manually driven audio graph and a cursor that
//! records what it was told to do.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use scoreplay::{
    AudioError, AudioGraph, AudioResource, BufferHandle, DecodeTicket, Pitch, PlaybackConfig, RationalTime,
    ScheduledAudioEvent, ScoreGraph, Transport, VisualCursor, VoiceHandle,
};

/// Get the path to the sheetmusic directory.
pub fn sheetmusic_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sheetmusic")
}

pub fn r(n: i64, d: i64) -> RationalTime {
    RationalTime::new(n, d).unwrap()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ─── Audio ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FakeState {
    pub now: f64,
    pub suspended: bool,
    pub submitted: Vec<ScheduledAudioEvent>,
    /// (handle, at, duration)
    pub fades: Vec<(VoiceHandle, f64, f64)>,
    pub reject_submissions: bool,
    pub reject_resume: bool,
    pub decodes: Vec<flume::Sender<Result<BufferHandle, AudioError>>>,
}

/// Audio graph whose clock only moves when the test says so.
#[derive(Clone, Default)]
pub struct FakeAudioGraph {
    pub state: Rc<RefCell<FakeState>>,
}

impl FakeAudioGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the host clock forward, unless suspended.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.borrow_mut();
        if !state.suspended {
            state.now += seconds;
        }
    }

    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    pub fn submitted(&self) -> Vec<ScheduledAudioEvent> {
        self.state.borrow().submitted.clone()
    }

    pub fn fades(&self) -> Vec<(VoiceHandle, f64, f64)> {
        self.state.borrow().fades.clone()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.borrow().suspended
    }

    pub fn resource(&self) -> AudioResource {
        let graph = self.clone();
        AudioResource::lazy(move || Ok(Box::new(graph) as Box<dyn AudioGraph>))
    }
}

impl AudioGraph for FakeAudioGraph {
    fn current_time(&self) -> f64 {
        self.state.borrow().now
    }

    fn suspend(&mut self) -> Result<(), AudioError> {
        self.state.borrow_mut().suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        let mut state = self.state.borrow_mut();
        if state.reject_resume {
            return Err(AudioError::Unavailable("test graph is closed".to_string()));
        }
        state.suspended = false;
        Ok(())
    }

    fn submit(&mut self, event: &ScheduledAudioEvent) -> Result<VoiceHandle, AudioError> {
        let mut state = self.state.borrow_mut();
        if state.reject_submissions {
            return Err(AudioError::Rejected("test graph is full".to_string()));
        }
        state.submitted.push(event.clone());
        Ok(VoiceHandle(state.submitted.len() as u64))
    }

    fn fade_out(&mut self, handle: VoiceHandle, at: f64, duration: f64) {
        self.state.borrow_mut().fades.push((handle, at, duration));
    }

    fn decode(&mut self, _bytes: Vec<u8>) -> DecodeTicket {
        let (tx, ticket) = DecodeTicket::channel();
        self.state.borrow_mut().decodes.push(tx);
        ticket
    }
}

// ─── Cursor ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCall {
    Show,
    Hide,
    MoveTo(usize),
}

#[derive(Clone, Default)]
pub struct RecordingCursor {
    pub calls: Rc<RefCell<Vec<CursorCall>>>,
}

impl RecordingCursor {
    pub fn take(&self) -> Vec<CursorCall> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn moves(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, CursorCall::MoveTo(_)))
            .count()
    }
}

impl VisualCursor for RecordingCursor {
    fn show(&mut self) {
        self.calls.borrow_mut().push(CursorCall::Show);
    }

    fn hide(&mut self) {
        self.calls.borrow_mut().push(CursorCall::Hide);
    }

    fn move_to(&mut self, index: usize) {
        self.calls.borrow_mut().push(CursorCall::MoveTo(index));
    }
}

// ─── Scores ──────────────────────────────────────────────────────────

/// C4 quarter, quarter rest, E4 half, in one 4/4 measure.
pub fn scenario_graph() -> ScoreGraph {
    let mut g = ScoreGraph::new();
    let page = g.add_page();
    let system = g.add_system(page);
    let staff = g.add_staff(system, "P1", 1);
    let measure = g.add_measure(staff, 1, RationalTime::ZERO, r(1, 1));
    let voice = g.voice_in_measure(measure, 1);
    let e = g.add_entry(voice, RationalTime::ZERO);
    g.add_note(e, Some(Pitch::new("C", 4, None)), r(1, 4));
    let e = g.add_entry(voice, r(1, 4));
    g.add_note(e, None, r(1, 4));
    let e = g.add_entry(voice, r(1, 2));
    g.add_note(e, Some(Pitch::new("E", 4, None)), r(1, 2));
    g
}

/// A transport at 120 BPM (one whole note per 2 s) on the scenario score.
pub fn scenario_transport() -> (Transport, FakeAudioGraph, RecordingCursor) {
    transport_for(&scenario_graph(), PlaybackConfig::default())
}

pub fn transport_for(graph: &ScoreGraph, config: PlaybackConfig) -> (Transport, FakeAudioGraph, RecordingCursor) {
    let audio = FakeAudioGraph::new();
    let cursor = RecordingCursor::default();
    let mut transport = Transport::new(config, audio.resource(), Box::new(cursor.clone()));
    transport.load_score(graph).unwrap();
    transport.drain_events();
    (transport, audio, cursor)
}

/// Advance the host clock in `step` increments up to `until`, ticking after
/// each step. Stops early if the clock is suspended.
pub fn run_until(transport: &mut Transport, audio: &FakeAudioGraph, until: f64, step: f64) {
    while audio.now() + step <= until + 1e-9 {
        let before = audio.now();
        audio.advance(step);
        transport.tick();
        if audio.now() == before {
            break;
        }
    }
}
