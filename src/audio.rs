//! Host audio boundary.
//!
//! The host audio graph is modelled as a trait so the scheduler can run
//! against a real audio context or a manual test clock. Everything that
//! crosses the boundary is plain data: a [`ScheduledAudioEvent`] carries its
//! absolute start/stop times and the complete gain automation, and decode
//! requests resolve later through a channel ([`DecodeTicket`]).
//!
//! The audio context itself is a lazily-created singleton owned by an
//! [`AudioResource`] that the transport passes to the scheduler.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{AudioError, PlaybackError};

// ─── Handles ─────────────────────────────────────────────────────────

/// A submitted source node on the host graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VoiceHandle(pub u64);

/// A decoded audio buffer owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BufferHandle(pub u64);

// ─── Gain envelope ───────────────────────────────────────────────────

/// One gain automation call, in the host's terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AutomationPoint {
    SetValueAtTime { value: f64, time: f64 },
    LinearRampToValueAtTime { value: f64, time: f64 },
}

impl AutomationPoint {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationPoint::SetValueAtTime { time, .. } => time,
            AutomationPoint::LinearRampToValueAtTime { time, .. } => time,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            AutomationPoint::SetValueAtTime { value, .. } => value,
            AutomationPoint::LinearRampToValueAtTime { value, .. } => value,
        }
    }
}

/// Gain automation for one note, applied in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GainEnvelope {
    pub points: Vec<AutomationPoint>,
}

impl GainEnvelope {
    /// Attack to `peak`, hold, release to silence ending exactly at `stop`.
    ///
    /// Ramps are shortened for short notes: the attack takes at most half the
    /// note, and the release whatever remains after the attack.
    pub fn attack_release(start: f64, stop: f64, peak: f64, attack: f64, release: f64) -> Self {
        let span = stop - start;
        if span <= 0.0 {
            return Self {
                points: vec![AutomationPoint::SetValueAtTime { value: 0.0, time: start }],
            };
        }
        let attack = attack.max(0.0).min(span / 2.0);
        let release = release.max(0.0).min(span - attack);
        Self {
            points: vec![
                AutomationPoint::SetValueAtTime { value: 0.0, time: start },
                AutomationPoint::LinearRampToValueAtTime {
                    value: peak,
                    time: start + attack,
                },
                AutomationPoint::SetValueAtTime {
                    value: peak,
                    time: stop - release,
                },
                AutomationPoint::LinearRampToValueAtTime { value: 0.0, time: stop },
            ],
        }
    }

    /// Time of the last automation point.
    pub fn end_time(&self) -> Option<f64> {
        self.points.last().map(AutomationPoint::time)
    }

    /// Gain at time `t`, evaluated the way the host would.
    pub fn value_at(&self, t: f64) -> f64 {
        let mut value = 0.0;
        let mut last_time = f64::NEG_INFINITY;
        for point in &self.points {
            if point.time() <= t {
                value = point.value();
                last_time = point.time();
                continue;
            }
            if let AutomationPoint::LinearRampToValueAtTime { value: target, time } = *point {
                let from = last_time.max(f64::MIN);
                let frac = (t - from) / (time - from);
                return value + (target - value) * frac.clamp(0.0, 1.0);
            }
            break;
        }
        value
    }
}

// ─── Scheduled event ─────────────────────────────────────────────────

/// What the source node plays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SourceKind {
    /// A decoded sample, pitch-shifted by resampling
    Sample { buffer: BufferHandle, playback_rate: f64 },
    /// Fallback tone when no samples are loaded
    Oscillator { frequency: f64 },
}

/// A note committed to the host graph. Once submitted it can only be faded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledAudioEvent {
    /// Timeline entry the note belongs to
    pub entry: usize,
    pub voice: usize,
    /// MIDI note number
    pub pitch: i32,
    /// Host clock seconds
    pub start: f64,
    /// Host clock seconds
    pub stop: f64,
    pub source: SourceKind,
    pub envelope: GainEnvelope,
}

// ─── Host graph ──────────────────────────────────────────────────────

/// The host audio context: one clock, one output, fire-and-forget sources.
pub trait AudioGraph {
    /// Host clock in seconds. Does not advance while suspended.
    fn current_time(&self) -> f64;

    fn suspend(&mut self) -> Result<(), AudioError>;

    fn resume(&mut self) -> Result<(), AudioError>;

    /// Create a source and gain node for the event and start it.
    fn submit(&mut self, event: &ScheduledAudioEvent) -> Result<VoiceHandle, AudioError>;

    /// Ramp a submitted source to silence from `at` over `duration` seconds
    /// and stop it there. Later automation on the source is cancelled.
    fn fade_out(&mut self, handle: VoiceHandle, at: f64, duration: f64);

    /// Start decoding an encoded audio file; the result arrives on the ticket.
    fn decode(&mut self, bytes: Vec<u8>) -> DecodeTicket;
}

/// Pending decode result.
pub struct DecodeTicket {
    rx: flume::Receiver<Result<BufferHandle, AudioError>>,
}

impl DecodeTicket {
    /// A ticket and the sender the host resolves it with.
    pub fn channel() -> (flume::Sender<Result<BufferHandle, AudioError>>, DecodeTicket) {
        let (tx, rx) = flume::bounded(1);
        (tx, DecodeTicket { rx })
    }

    /// An already-resolved ticket.
    pub fn resolved(result: Result<BufferHandle, AudioError>) -> DecodeTicket {
        let (tx, ticket) = Self::channel();
        // The receiver is alive and the channel has room.
        let _ = tx.send(result);
        ticket
    }

    /// Non-blocking check; `None` while the decode is still running.
    pub fn poll(&self) -> Option<Result<BufferHandle, AudioError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(AudioError::Decode("decoder went away".to_string()))),
        }
    }
}

impl fmt::Debug for DecodeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeTicket").field("ready", &!self.rx.is_empty()).finish()
    }
}

// ─── Lazy resource ───────────────────────────────────────────────────

pub type AudioGraphFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioGraph>, AudioError>>;

enum ResourceState {
    Pending(AudioGraphFactory),
    Ready(Box<dyn AudioGraph>),
    Failed(String),
}

/// The process-wide audio context, created on first use.
///
/// Hosts create the context only in response to a user gesture, so the
/// transport acquires it from `play` (or an audition), never earlier. A
/// failed creation is remembered; later acquisitions fail without retrying.
pub struct AudioResource {
    state: ResourceState,
}

impl AudioResource {
    pub fn lazy<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn AudioGraph>, AudioError> + 'static,
    {
        Self {
            state: ResourceState::Pending(Box::new(factory)),
        }
    }

    /// A resource that is already up.
    pub fn ready(graph: Box<dyn AudioGraph>) -> Self {
        Self {
            state: ResourceState::Ready(graph),
        }
    }

    /// A resource that can never be acquired.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            state: ResourceState::Failed(reason.to_string()),
        }
    }

    /// The graph, creating it on first call.
    pub fn acquire(&mut self) -> Result<&mut dyn AudioGraph, PlaybackError> {
        if let ResourceState::Pending(_) = self.state {
            let pending = std::mem::replace(&mut self.state, ResourceState::Failed(String::new()));
            if let ResourceState::Pending(factory) = pending {
                self.state = match factory() {
                    Ok(graph) => {
                        debug!("audio: context created");
                        ResourceState::Ready(graph)
                    }
                    Err(e) => {
                        warn!("audio: context creation failed: {}", e);
                        ResourceState::Failed(e.to_string())
                    }
                };
            }
        }
        match &mut self.state {
            ResourceState::Ready(graph) => Ok(graph.as_mut()),
            ResourceState::Failed(reason) => Err(PlaybackError::AudioResource(reason.clone())),
            ResourceState::Pending(_) => Err(PlaybackError::AudioResource("not initialised".to_string())),
        }
    }

    /// The graph if it has already been created.
    pub fn get(&mut self) -> Option<&mut dyn AudioGraph> {
        match &mut self.state {
            ResourceState::Ready(graph) => Some(graph.as_mut()),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ResourceState::Ready(_))
    }
}

// ─── Sample bank ─────────────────────────────────────────────────────

/// Decoded instrument samples keyed by MIDI note.
///
/// Any note is played from the nearest sample, resampled by
/// `2^(semitones / 12)`. With no samples loaded notes fall back to a plain
/// oscillator at the equal-tempered frequency.
#[derive(Debug, Default)]
pub struct SampleBank {
    buffers: BTreeMap<i32, BufferHandle>,
    pending: Vec<(i32, DecodeTicket)>,
}

impl SampleBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sample named like `"C4"` or `"F#2"` for decoding.
    pub fn request(&mut self, graph: &mut dyn AudioGraph, note_name: &str, bytes: Vec<u8>) -> Result<(), PlaybackError> {
        let midi = note_name_to_midi(note_name)
            .ok_or_else(|| PlaybackError::AudioResource(format!("unrecognised sample name '{note_name}'")))?;
        self.pending.push((midi, graph.decode(bytes)));
        Ok(())
    }

    /// Collect finished decodes. Failures are returned and dropped from the
    /// queue; the rest of the bank keeps working.
    pub fn poll(&mut self) -> Vec<PlaybackError> {
        let mut failures = Vec::new();
        let buffers = &mut self.buffers;
        self.pending.retain(|(midi, ticket)| match ticket.poll() {
            None => true,
            Some(Ok(buffer)) => {
                buffers.insert(*midi, buffer);
                false
            }
            Some(Err(e)) => {
                warn!("audio: sample for note {} failed to decode: {}", midi, e);
                failures.push(PlaybackError::from(e));
                false
            }
        });
        failures
    }

    pub fn insert(&mut self, midi: i32, buffer: BufferHandle) {
        self.buffers.insert(midi, buffer);
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Source for a note; ties between samples above and below go up.
    pub fn source_for(&self, midi: i32) -> SourceKind {
        let above = self.buffers.range(midi..).next();
        let below = self.buffers.range(..=midi).next_back();
        let nearest = [above, below]
            .into_iter()
            .flatten()
            .map(|(&key, &buffer)| (midi - key, buffer))
            .min_by_key(|(diff, _)| diff.abs());

        match nearest {
            Some((diff, buffer)) => SourceKind::Sample {
                buffer,
                playback_rate: 2f64.powf(diff as f64 / 12.0),
            },
            None => SourceKind::Oscillator {
                frequency: midi_to_frequency(midi),
            },
        }
    }
}

/// Equal-tempered frequency, A4 = 440 Hz.
pub fn midi_to_frequency(midi: i32) -> f64 {
    440.0 * 2f64.powf((midi - 69) as f64 / 12.0)
}

/// Parse a note name such as `C4`, `D#1`, `Bb3`, `F##2`, `Ex-1`.
///
/// Accidentals are `#` (+1), `x` (+2) and `b` (-1), at most three semitones
/// either way. Middle C is `C4` = 60.
///
/// ```
/// # use scoreplay::note_name_to_midi;
/// assert_eq!(note_name_to_midi("C4"), Some(60));
/// assert_eq!(note_name_to_midi("bb3"), Some(58));
/// assert_eq!(note_name_to_midi("H2"), None);
/// ```
pub fn note_name_to_midi(name: &str) -> Option<i32> {
    let mut chars = name.chars().peekable();
    let scale_index = match chars.next()?.to_ascii_lowercase() {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return None,
    };

    let mut alter = 0i32;
    let mut symbols = 0;
    while let Some(&c) = chars.peek() {
        let step = match c.to_ascii_lowercase() {
            '#' => 1,
            'x' => 2,
            'b' => -1,
            _ => break,
        };
        alter += step;
        symbols += 1;
        chars.next();
    }
    if symbols > 3 || alter.abs() > 3 {
        return None;
    }

    let rest: String = chars.collect();
    let digits_end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let octave: i32 = rest[..digits_end].parse().ok()?;

    Some((octave + 1) * 12 + scale_index + alter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_release_ends_at_stop() {
        let env = GainEnvelope::attack_release(1.0, 2.0, 0.8, 0.005, 0.03);
        assert_eq!(env.end_time(), Some(2.0));
        assert_eq!(env.value_at(2.0), 0.0);
        assert!((env.value_at(1.5) - 0.8).abs() < 1e-12);
        assert_eq!(env.value_at(1.0), 0.0);
    }

    #[test]
    fn envelope_ramps_shrink_for_short_notes() {
        let env = GainEnvelope::attack_release(0.0, 0.01, 1.0, 0.05, 0.05);
        let times: Vec<f64> = env.points.iter().map(AutomationPoint::time).collect();
        assert_eq!(times, vec![0.0, 0.005, 0.005, 0.01]);
    }

    #[test]
    fn note_names() {
        assert_eq!(note_name_to_midi("A4"), Some(69));
        assert_eq!(note_name_to_midi("D#1"), Some(27));
        assert_eq!(note_name_to_midi("F##2"), Some(43));
        assert_eq!(note_name_to_midi("Cb4"), Some(59));
        assert_eq!(note_name_to_midi("C-1"), Some(0));
        assert_eq!(note_name_to_midi("c#x5"), Some(75));
        assert_eq!(note_name_to_midi("C####4"), None);
        assert_eq!(note_name_to_midi("C"), None);
    }

    #[test]
    fn nearest_sample_is_pitch_shifted() {
        let mut bank = SampleBank::new();
        bank.insert(60, BufferHandle(1));
        bank.insert(72, BufferHandle(2));
        match bank.source_for(62) {
            SourceKind::Sample { buffer, playback_rate } => {
                assert_eq!(buffer, BufferHandle(1));
                assert!((playback_rate - 2f64.powf(2.0 / 12.0)).abs() < 1e-12);
            }
            other => panic!("expected sample, got {:?}", other),
        }
        assert!(matches!(bank.source_for(66), SourceKind::Sample { buffer: BufferHandle(2), .. }));
        assert!(matches!(SampleBank::new().source_for(69), SourceKind::Oscillator { frequency } if frequency == 440.0));
    }

    #[test]
    fn decode_tickets_resolve_through_the_channel() {
        let (tx, ticket) = DecodeTicket::channel();
        assert!(ticket.poll().is_none());
        tx.send(Ok(BufferHandle(7))).unwrap();
        assert_eq!(ticket.poll(), Some(Ok(BufferHandle(7))));
        drop(tx);
        assert!(matches!(ticket.poll(), Some(Err(AudioError::Decode(_)))));
    }

    #[test]
    fn failed_resource_is_remembered() {
        let mut calls = 0;
        let mut resource = AudioResource::lazy(move || {
            calls += 1;
            assert_eq!(calls, 1);
            Err(AudioError::Unavailable("no device".into()))
        });
        assert!(resource.acquire().is_err());
        assert!(matches!(resource.acquire(), Err(PlaybackError::AudioResource(_))));
        assert!(!resource.is_ready());
    }
}
