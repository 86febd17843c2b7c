//! Score graph: the read-only structure handed over by the renderer.
//!
//! The rendered score is a web of cross references (notes know their voice
//! entry, entries know their voice, voices know their measure, and so on up
//! to the page). Here every node lives in a flat arena `Vec` on
//! [`ScoreGraph`] and refers to its relatives by typed index, so the graph
//! has a single owner and can be walked in either direction.
//!
//! ```text
//! pages → systems → staves → measures → voices → voice entries → notes
//! ```

use serde::{Deserialize, Serialize};

use crate::rational::RationalTime;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(
    /// Index into [`ScoreGraph::pages`].
    PageId
);
arena_id!(
    /// Index into [`ScoreGraph::systems`].
    SystemId
);
arena_id!(
    /// Index into [`ScoreGraph::staves`].
    StaffId
);
arena_id!(
    /// Index into [`ScoreGraph::measures`].
    MeasureId
);
arena_id!(
    /// Index into [`ScoreGraph::voices`].
    VoiceId
);
arena_id!(
    /// Index into [`ScoreGraph::voice_entries`].
    EntryId
);
arena_id!(
    /// Index into [`ScoreGraph::notes`].
    NoteId
);

/// A complete score as an arena of cross-referenced nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreGraph {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    pub pages: Vec<Page>,
    pub systems: Vec<System>,
    pub staves: Vec<Staff>,
    pub measures: Vec<Measure>,
    pub voices: Vec<Voice>,
    pub voice_entries: Vec<VoiceEntry>,
    pub notes: Vec<Note>,
    /// Tempo changes written in the score, ordered by position
    pub tempo_marks: Vec<TempoMark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub systems: Vec<SystemId>,
}

/// One line of music on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub page: PageId,
    pub staves: Vec<StaffId>,
}

/// One staff line within one system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub system: SystemId,
    /// Part identifier (e.g., "P1")
    pub part_id: String,
    /// Stable id of this staff across the whole sheet (same value in every
    /// system); ordering key for voices.
    pub id_in_music_sheet: u32,
    pub measures: Vec<MeasureId>,
}

/// A single measure (bar) on one staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    pub staff: StaffId,
    /// Measure number as written
    pub number: i32,
    /// Whether this is an implicit measure (pickup/anacrusis)
    pub implicit: bool,
    /// Start of the measure from the beginning of the score
    pub absolute_timestamp: RationalTime,
    /// Notated length of the measure
    pub duration: RationalTime,
    pub voices: Vec<VoiceId>,
}

/// The entries of one notated voice within one measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub measure: MeasureId,
    /// Voice number as written (1-based)
    pub voice_id: u32,
    pub entries: Vec<EntryId>,
}

/// A chord, single note, or rest at one position within one voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub voice: VoiceId,
    /// Offset from the start of the measure
    pub timestamp: RationalTime,
    pub notes: Vec<NoteId>,
}

/// A single note or rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub entry: EntryId,
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Notated length
    pub length: RationalTime,
    /// Tie continues into the next note of the same pitch
    pub tie_start: bool,
    /// Tie continues from the previous note of the same pitch
    pub tie_stop: bool,
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp, 0.0 = natural
    pub alter: Option<f64>,
}

/// A tempo written in the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoMark {
    pub position: RationalTime,
    /// Quarter notes per minute
    pub bpm: f64,
}

impl Pitch {
    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => 0,
        };
        let alter = self.alter.unwrap_or(0.0).round() as i32;
        (self.octave + 1) * 12 + step_semitone + alter
    }
}

impl ScoreGraph {
    /// Create a new empty score graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, id: PageId) -> &Page {
        &self.pages[id.0]
    }

    pub fn system(&self, id: SystemId) -> &System {
        &self.systems[id.0]
    }

    pub fn staff(&self, id: StaffId) -> &Staff {
        &self.staves[id.0]
    }

    pub fn measure(&self, id: MeasureId) -> &Measure {
        &self.measures[id.0]
    }

    pub fn voice(&self, id: VoiceId) -> &Voice {
        &self.voices[id.0]
    }

    pub fn voice_entry(&self, id: EntryId) -> &VoiceEntry {
        &self.voice_entries[id.0]
    }

    pub fn note(&self, id: NoteId) -> &Note {
        &self.notes[id.0]
    }

    /// The staff a voice entry sits on, following back references.
    pub fn staff_of_entry(&self, id: EntryId) -> &Staff {
        let voice = self.voice(self.voice_entry(id).voice);
        self.staff(self.measure(voice.measure).staff)
    }

    /// Ordering key of the voice an entry belongs to:
    /// `(staff id in sheet, voice number)`.
    pub fn voice_key_of_entry(&self, id: EntryId) -> (u32, u32) {
        let voice = self.voice(self.voice_entry(id).voice);
        let staff = self.staff(self.measure(voice.measure).staff);
        (staff.id_in_music_sheet, voice.voice_id)
    }

    /// Sorted, de-duplicated `(staff, voice)` keys across the whole sheet.
    /// A key's position in this list is its voice index.
    pub fn voice_keys(&self) -> Vec<(u32, u32)> {
        let mut keys: Vec<(u32, u32)> = self
            .voices
            .iter()
            .map(|v| {
                let staff = self.staff(self.measure(v.measure).staff);
                (staff.id_in_music_sheet, v.voice_id)
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Absolute timestamp of a note: measure start plus entry offset.
    pub fn note_timestamp(&self, id: NoteId) -> Result<RationalTime, crate::ArithmeticError> {
        let entry = self.voice_entry(self.note(id).entry);
        let measure = self.measure(self.voice(entry.voice).measure);
        measure.absolute_timestamp.add(entry.timestamp)
    }

    /// Total number of notes and rests in the graph.
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    // ─── Construction ────────────────────────────────────────────────
    // Each `add_*` links the new node into its parent's child list and
    // records the back reference, so the two directions never disagree.

    pub fn add_page(&mut self) -> PageId {
        self.pages.push(Page { systems: Vec::new() });
        PageId(self.pages.len() - 1)
    }

    pub fn add_system(&mut self, page: PageId) -> SystemId {
        let id = SystemId(self.systems.len());
        self.systems.push(System {
            page,
            staves: Vec::new(),
        });
        self.pages[page.0].systems.push(id);
        id
    }

    pub fn add_staff(&mut self, system: SystemId, part_id: &str, id_in_music_sheet: u32) -> StaffId {
        let id = StaffId(self.staves.len());
        self.staves.push(Staff {
            system,
            part_id: part_id.to_string(),
            id_in_music_sheet,
            measures: Vec::new(),
        });
        self.systems[system.0].staves.push(id);
        id
    }

    pub fn add_measure(
        &mut self,
        staff: StaffId,
        number: i32,
        absolute_timestamp: RationalTime,
        duration: RationalTime,
    ) -> MeasureId {
        let id = MeasureId(self.measures.len());
        self.measures.push(Measure {
            staff,
            number,
            implicit: false,
            absolute_timestamp,
            duration,
            voices: Vec::new(),
        });
        self.staves[staff.0].measures.push(id);
        id
    }

    /// Voice `voice_id` of a measure, created on first use.
    pub fn voice_in_measure(&mut self, measure: MeasureId, voice_id: u32) -> VoiceId {
        if let Some(existing) = self.measures[measure.0]
            .voices
            .iter()
            .copied()
            .find(|v| self.voices[v.0].voice_id == voice_id)
        {
            return existing;
        }
        let id = VoiceId(self.voices.len());
        self.voices.push(Voice {
            measure,
            voice_id,
            entries: Vec::new(),
        });
        self.measures[measure.0].voices.push(id);
        id
    }

    pub fn add_entry(&mut self, voice: VoiceId, timestamp: RationalTime) -> EntryId {
        let id = EntryId(self.voice_entries.len());
        self.voice_entries.push(VoiceEntry {
            voice,
            timestamp,
            notes: Vec::new(),
        });
        self.voices[voice.0].entries.push(id);
        id
    }

    pub fn add_note(&mut self, entry: EntryId, pitch: Option<Pitch>, length: RationalTime) -> NoteId {
        let id = NoteId(self.notes.len());
        self.notes.push(Note {
            entry,
            pitch,
            length,
            tie_start: false,
            tie_stop: false,
        });
        self.voice_entries[entry.0].notes.push(id);
        id
    }
}

impl Pitch {
    pub fn new(step: &str, octave: i32, alter: Option<f64>) -> Self {
        Self {
            step: step.to_string(),
            octave,
            alter,
        }
    }
}
