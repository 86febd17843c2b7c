//! Input adapter: turns key events into transport commands.
//!
//! Keys are compared in a canonical text form: modifiers first in
//! `Shift+Ctrl+Alt+Meta+` order, then the key with browser names shortened
//! (`" "` is `Space`, `ArrowLeft` is `Left`, letters upper-case).
//!
//! In [`InputMode::PlayAlong`] the keyboard becomes an instrument: each
//! character of [`Keybindings::slice_keys`] holds one entry relative to the
//! start marker until its key comes back up, and the marker keys take
//! precedence over the transport keys they share.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::transport::TransportCommand;

/// A key-down event from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Key identifier as reported by the host (e.g. `"ArrowLeft"`, `" "`)
    pub key: String,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    /// Auto-repeat from a held key
    pub repeat: bool,
}

impl KeyEvent {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }
}

/// Canonical text for a key event.
///
/// ```
/// # use scoreplay::{key_to_string, KeyEvent};
/// assert_eq!(key_to_string(&KeyEvent::new(" ")), "Space");
/// assert_eq!(key_to_string(&KeyEvent::new("ArrowRight").with_shift()), "Shift+Right");
/// ```
pub fn key_to_string(event: &KeyEvent) -> String {
    let mut out = String::new();
    for (held, name) in [
        (event.shift, "Shift+"),
        (event.ctrl, "Ctrl+"),
        (event.alt, "Alt+"),
        (event.meta, "Meta+"),
    ] {
        if held {
            out.push_str(name);
        }
    }
    out.push_str(&normalize_key(&event.key));
    out
}

fn normalize_key(key: &str) -> String {
    match key {
        " " | "Spacebar" => "Space".to_string(),
        "Esc" => "Escape".to_string(),
        _ => {
            if let Some(direction) = key.strip_prefix("Arrow") {
                return direction.to_string();
            }
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c.to_uppercase().collect(),
                _ => key.to_string(),
            }
        }
    }
}

/// Canonical form of a binding string such as `"shift+arrowright"`.
fn canonical_binding(binding: &str) -> String {
    let (modifiers, key) = match binding.strip_suffix("++") {
        Some(modifiers) => (modifiers, "+"),
        None => match binding.rsplit_once('+') {
            Some((modifiers, key)) if !key.is_empty() => (modifiers, key),
            _ => ("", binding),
        },
    };
    let mut event = KeyEvent::new(key);
    for modifier in modifiers.split('+').filter(|m| !m.is_empty()) {
        match modifier.to_ascii_lowercase().as_str() {
            "shift" => event.shift = true,
            "ctrl" | "control" => event.ctrl = true,
            "alt" | "option" => event.alt = true,
            "meta" | "cmd" | "super" => event.meta = true,
            other => debug!("input: unknown modifier '{}' in '{}'", other, binding),
        }
    }
    key_to_string(&event)
}

/// One hand per block: `QWER ASDF ZXCV`, then `UIOP JKL; M,./`.
pub const SLICE_KEYS: &str = "qwerasdfzxcvuiopjkl;m,./";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMode {
    #[default]
    Transport,
    PlayAlong,
}

/// Which keys trigger which command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub play_pause: Vec<String>,
    pub stop: Vec<String>,
    pub seek_to_start: Vec<String>,
    pub step_forward: Vec<String>,
    pub step_backward: Vec<String>,
    pub tempo_up: Vec<String>,
    pub tempo_down: Vec<String>,
    /// Play-along: the n-th character holds the entry n places after the
    /// start marker
    pub slice_keys: String,
    pub advance_start: Vec<String>,
    pub start_forward: Vec<String>,
    pub start_backward: Vec<String>,
    pub reset_start: Vec<String>,
}

impl Default for Keybindings {
    fn default() -> Self {
        fn keys(list: &[&str]) -> Vec<String> {
            list.iter().map(|k| k.to_string()).collect()
        }
        Self {
            play_pause: keys(&["Space"]),
            stop: keys(&["Escape"]),
            seek_to_start: keys(&["`", "Home"]),
            step_forward: keys(&["Right"]),
            step_backward: keys(&["Left"]),
            tempo_up: keys(&["Up"]),
            tempo_down: keys(&["Down"]),
            slice_keys: SLICE_KEYS.to_string(),
            advance_start: keys(&["Space"]),
            start_forward: keys(&["Right"]),
            start_backward: keys(&["Left"]),
            reset_start: keys(&["`"]),
        }
    }
}

impl Keybindings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn pairs(&self) -> [(&[String], TransportCommand); 7] {
        [
            (self.play_pause.as_slice(), TransportCommand::PlayPause),
            (self.stop.as_slice(), TransportCommand::Stop),
            (self.seek_to_start.as_slice(), TransportCommand::SeekToStart),
            (self.step_forward.as_slice(), TransportCommand::StepForward),
            (self.step_backward.as_slice(), TransportCommand::StepBackward),
            (self.tempo_up.as_slice(), TransportCommand::TempoUp),
            (self.tempo_down.as_slice(), TransportCommand::TempoDown),
        ]
    }

    fn play_along_pairs(&self) -> [(&[String], TransportCommand); 4] {
        [
            (self.advance_start.as_slice(), TransportCommand::AdvanceStart),
            (self.start_forward.as_slice(), TransportCommand::StartForward),
            (self.start_backward.as_slice(), TransportCommand::StartBackward),
            (self.reset_start.as_slice(), TransportCommand::ResetStart),
        ]
    }
}

/// Resolves key events against a set of bindings.
#[derive(Debug, Clone)]
pub struct InputAdapter {
    bindings: HashMap<String, TransportCommand>,
    play_along: HashMap<String, TransportCommand>,
    /// Canonical slice key to offset
    slices: HashMap<String, usize>,
    mode: InputMode,
}

impl InputAdapter {
    /// When two commands claim the same key the one listed first wins.
    pub fn new(keybindings: &Keybindings) -> Self {
        let mut slices = HashMap::new();
        for (offset, c) in keybindings.slice_keys.chars().enumerate() {
            slices.entry(normalize_key(&c.to_string())).or_insert(offset);
        }
        Self {
            bindings: binding_map(keybindings.pairs()),
            play_along: binding_map(keybindings.play_along_pairs()),
            slices,
            mode: InputMode::default(),
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        self.mode = mode;
    }

    /// The command for a key-down, if any. Held-key repeats only count for
    /// stepping, tempo changes and start marker nudges.
    pub fn map(&self, event: &KeyEvent) -> Option<TransportCommand> {
        let key = key_to_string(event);
        let command = match self.play_along_command(&key) {
            Some(command) => command,
            None => *self.bindings.get(&key)?,
        };
        if event.repeat && !repeats(command) {
            return None;
        }
        Some(command)
    }

    /// The command for a key-up: releasing a slice key in play-along mode.
    /// Modifiers are ignored so a note never outlives its key.
    pub fn map_release(&self, event: &KeyEvent) -> Option<TransportCommand> {
        if self.mode != InputMode::PlayAlong {
            return None;
        }
        let offset = *self.slices.get(&normalize_key(&event.key))?;
        Some(TransportCommand::ReleaseSlice(offset))
    }

    fn play_along_command(&self, key: &str) -> Option<TransportCommand> {
        if self.mode != InputMode::PlayAlong {
            return None;
        }
        if let Some(&offset) = self.slices.get(key) {
            return Some(TransportCommand::PlaySlice(offset));
        }
        self.play_along.get(key).copied()
    }
}

fn binding_map<const N: usize>(pairs: [(&[String], TransportCommand); N]) -> HashMap<String, TransportCommand> {
    let mut bindings = HashMap::new();
    for (keys, command) in pairs {
        for key in keys {
            bindings.entry(canonical_binding(key)).or_insert(command);
        }
    }
    bindings
}

impl Default for InputAdapter {
    fn default() -> Self {
        Self::new(&Keybindings::default())
    }
}

fn repeats(command: TransportCommand) -> bool {
    matches!(
        command,
        TransportCommand::StepForward
            | TransportCommand::StepBackward
            | TransportCommand::TempoUp
            | TransportCommand::TempoDown
            | TransportCommand::StartForward
            | TransportCommand::StartBackward
    )
}
