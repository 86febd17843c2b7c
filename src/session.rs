//! Session: wires preferences, input and the transport together.
//!
//! A host creates one session, feeds it key events and refresh ticks, and
//! renders whatever events come back out.

use std::path::Path;

use log::{info, warn};

use crate::audio::AudioResource;
use crate::config::PlaybackConfig;
use crate::cursor::VisualCursor;
use crate::error::PlaybackError;
use crate::input::{InputAdapter, InputMode, KeyEvent, Keybindings};
use crate::model::ScoreGraph;
use crate::preferences::{CursorOptions, PreferenceStore, Preferences};
use crate::transport::{Transport, TransportCommand, TransportEvent};

pub struct Session<S: PreferenceStore> {
    transport: Transport,
    input: InputAdapter,
    store: S,
    preferences: Preferences,
}

impl<S: PreferenceStore> Session<S> {
    /// Read preferences from `store` and set up a stopped transport.
    pub fn new(
        config: PlaybackConfig,
        keybindings: &Keybindings,
        audio: AudioResource,
        visual: Box<dyn VisualCursor>,
        store: S,
    ) -> Self {
        let preferences = Preferences::load(&store);
        let mut transport = Transport::new(config, audio, visual);
        transport.set_tempo(preferences.tempo_bpm);
        transport.set_options(preferences.cursor);
        transport.mix_mut().overall_volume = preferences.overall_volume;
        // The stored tempo is already persisted.
        transport.drain_events();
        info!(
            "session: tempo {} volume {} cursor {:?}",
            transport.tempo(),
            preferences.overall_volume,
            preferences.cursor
        );

        Self {
            transport,
            input: InputAdapter::new(keybindings),
            store,
            preferences,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load_score(&mut self, graph: &ScoreGraph) -> Result<(), PlaybackError> {
        self.transport.load_score(graph)
    }

    /// Parse a score file and load it.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PlaybackError> {
        let graph = crate::parse_file(path)?;
        self.transport.load_score(&graph)
    }

    /// Route a key-down; returns the command it triggered, if any.
    pub fn key_down(&mut self, event: &KeyEvent) -> Option<TransportCommand> {
        let command = self.input.map(event)?;
        self.transport.apply(command);
        Some(command)
    }

    /// Route a key-up; only play-along slice keys react to it.
    pub fn key_up(&mut self, event: &KeyEvent) -> Option<TransportCommand> {
        let command = self.input.map_release(event)?;
        self.transport.apply(command);
        Some(command)
    }

    pub fn input_mode(&self) -> InputMode {
        self.input.mode()
    }

    /// Switch between transport keys and play-along keys. Held slices are
    /// released, since their key-ups would no longer be routed.
    pub fn set_input_mode(&mut self, mode: InputMode) {
        if mode == self.input.mode() {
            return;
        }
        self.transport.release_all_slices();
        self.input.set_mode(mode);
        info!("session: input mode {:?}", mode);
    }

    /// The refresh callback. Returns everything that happened since the
    /// previous call.
    pub fn tick(&mut self) -> Vec<TransportEvent> {
        self.transport.tick();
        self.drain_events()
    }

    /// Pending events; tempo changes are persisted on the way out.
    pub fn drain_events(&mut self) -> Vec<TransportEvent> {
        let events = self.transport.drain_events();
        for event in &events {
            if let TransportEvent::TempoChanged(bpm) = *event {
                self.preferences.tempo_bpm = bpm;
                if let Err(e) = Preferences::save_tempo(&mut self.store, bpm) {
                    warn!("session: could not save tempo: {}", e);
                }
            }
        }
        events
    }

    pub fn set_cursor_options(&mut self, options: CursorOptions) {
        self.transport.set_options(options);
        self.preferences.cursor = options;
        if let Err(e) = Preferences::save_cursor(&mut self.store, &options) {
            warn!("session: could not save cursor options: {}", e);
        }
    }

    pub fn set_overall_volume(&mut self, volume: u32) {
        let volume = volume.min(100);
        self.transport.mix_mut().overall_volume = volume;
        self.preferences.overall_volume = volume;
        if let Err(e) = Preferences::save_volume(&mut self.store, volume) {
            warn!("session: could not save volume: {}", e);
        }
    }
}
