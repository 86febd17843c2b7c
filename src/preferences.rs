//! Persisted user preferences.
//!
//! Preferences live in an external key-value store. Each key is read and
//! parsed on its own, so one bad value only resets that preference.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TEMPO_BPM;
use crate::error::StoreError;

pub const TEMPO_KEY: &str = "tempo_bpm";
pub const CURSOR_KEY: &str = "cursor_options";
pub const VOLUME_KEY: &str = "overall_volume";

/// Default overall volume slider position.
pub const DEFAULT_OVERALL_VOLUME: u32 = 80;

/// Key-value storage for preferences.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl JsonFileStore {
    /// Open a store; a missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// How the cursor behaves around playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorOptions {
    /// `play` starts at the entry under the cursor instead of the beginning
    pub play_from_cursor: bool,
    /// Stepping while stopped sounds the entry stepped onto
    pub audition_on_step: bool,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            play_from_cursor: true,
            audition_on_step: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub tempo_bpm: f64,
    pub cursor: CursorOptions,
    pub overall_volume: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            cursor: CursorOptions::default(),
            overall_volume: DEFAULT_OVERALL_VOLUME,
        }
    }
}

impl Preferences {
    /// Read every preference, falling back to the default for each one that
    /// is absent or unreadable.
    pub fn load(store: &dyn PreferenceStore) -> Self {
        let defaults = Self::default();
        Self {
            tempo_bpm: read(store, TEMPO_KEY)
                .filter(|t: &f64| t.is_finite() && *t > 0.0)
                .unwrap_or(defaults.tempo_bpm),
            cursor: read(store, CURSOR_KEY).unwrap_or(defaults.cursor),
            overall_volume: read(store, VOLUME_KEY)
                .map(|v: u32| v.min(100))
                .unwrap_or(defaults.overall_volume),
        }
    }

    pub fn save_tempo(store: &mut dyn PreferenceStore, bpm: f64) -> Result<(), StoreError> {
        write(store, TEMPO_KEY, &bpm)
    }

    pub fn save_cursor(store: &mut dyn PreferenceStore, options: &CursorOptions) -> Result<(), StoreError> {
        write(store, CURSOR_KEY, options)
    }

    pub fn save_volume(store: &mut dyn PreferenceStore, volume: u32) -> Result<(), StoreError> {
        write(store, VOLUME_KEY, &volume)
    }
}

fn read<T: for<'de> Deserialize<'de>>(store: &dyn PreferenceStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("preferences: ignoring unreadable '{}' ({}): {}", key, raw, e);
            None
        }
    }
}

fn write<T: Serialize + ?Sized>(store: &mut dyn PreferenceStore, key: &str, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
