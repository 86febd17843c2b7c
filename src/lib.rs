//! scoreplay: score playback core for a follow-the-cursor practice trainer.
//!
//! Loads MusicXML (.musicxml) and compressed MXL (.mxl) scores into a
//! cross-referenced score graph, flattens it into a time-ordered timeline,
//! and plays it: audio events are committed ahead of time to a host audio
//! graph while a cursor is stepped through the same entries in lock-step.
//!
//! # Example
//! ```no_run
//! use scoreplay::{parse_file, ScoreTimeline};
//!
//! let graph = parse_file("path/to/score.musicxml").unwrap();
//! let timeline = ScoreTimeline::build(&graph).unwrap();
//! println!("Title: {:?}", graph.title);
//! println!("Entries: {}", timeline.len());
//! ```

pub mod audio;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod input;
pub mod mix;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod playback;
pub mod preferences;
pub mod rational;
pub mod scheduler;
pub mod session;
pub mod timeline;
pub mod transport;

use std::path::Path;

pub use audio::{
    note_name_to_midi, AudioGraph, AudioResource, AutomationPoint, BufferHandle, DecodeTicket, GainEnvelope,
    SampleBank, ScheduledAudioEvent, SourceKind, VoiceHandle,
};
pub use clock::PlaybackClock;
pub use config::PlaybackConfig;
pub use cursor::{CursorController, CursorPosition, StepCursor, StepCursorAdapter, VisualCursor};
pub use error::{ArithmeticError, AudioError, PlaybackError, ScoreError, StoreError};
pub use input::{key_to_string, InputAdapter, InputMode, KeyEvent, Keybindings, SLICE_KEYS};
pub use mix::{volume_to_gain, Mix, VoiceMix};
pub use model::*;
pub use mxl::parse_mxl;
pub use parser::parse_musicxml;
pub use playback::generate_playback_map;
pub use preferences::{CursorOptions, JsonFileStore, MemoryStore, PreferenceStore, Preferences};
pub use rational::RationalTime;
pub use scheduler::AudioScheduler;
pub use session::Session;
pub use timeline::{NoteEvent, ScoreTimeline, TimelineEntry};
pub use transport::{Resume, Transport, TransportCommand, TransportEvent, TransportState};

/// Parse a score file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ScoreGraph, ScoreError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| ScoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse a score from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<ScoreGraph, ScoreError> {
    match extension {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => {
            let xml = std::str::from_utf8(data).map_err(|e| ScoreError::Xml(format!("invalid UTF-8: {e}")))?;
            parse_musicxml(xml)
        }
        _ => {
            // ZIP archives start with "PK"; anything else is treated as XML
            if data.starts_with(b"PK") {
                return parse_mxl(data);
            }
            let xml = std::str::from_utf8(data).map_err(|e| ScoreError::Xml(format!("invalid UTF-8: {e}")))?;
            parse_musicxml(xml)
        }
    }
}

/// Convert a timeline to a JSON string for host UIs.
pub fn timeline_to_json(timeline: &ScoreTimeline) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(timeline)
}
