//! MusicXML parser: converts a partwise MusicXML document into the
//! [`ScoreGraph`] arena.
//!
//! Durations are read as exact fractions of a whole note
//! (`duration / (4 * divisions)`), so nothing here rounds. Layout hints
//! (`<print new-system>` / `<print new-page>`) decide which system and page a
//! measure lands on; every system carries one staff node per
//! (part, staff number).

use log::debug;
use roxmltree::{Document, Node};

use crate::error::ScoreError;
use crate::model::*;
use crate::rational::RationalTime;

/// Default time signature.
const DEFAULT_TIME_SIG: (i64, i64) = (4, 4);
/// Default divisions per quarter note.
const DEFAULT_DIVISIONS: i64 = 1;

/// Parse a MusicXML XML string into a score graph.
pub fn parse_musicxml(xml: &str) -> Result<ScoreGraph, ScoreError> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options).map_err(|e| ScoreError::Xml(e.to_string()))?;
    let root = doc.root_element();

    // Verify this is a score-partwise document
    if root.tag_name().name() != "score-partwise" {
        return Err(ScoreError::Unsupported(format!(
            "root element '{}', only 'score-partwise' is supported",
            root.tag_name().name()
        )));
    }

    let mut header = Header::default();
    let mut part_ids: Vec<String> = Vec::new();
    let mut parts: Vec<RawPart> = Vec::new();

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut header),
            "identification" => parse_identification(&child, &mut header),
            "credit" => parse_credit(&child, &mut header),
            "part-list" => parse_part_list(&child, &mut part_ids),
            "part" => {
                let id = child.attribute("id").unwrap_or("").to_string();
                // Parts missing from the part-list are ignored, as renderers do
                if part_ids.contains(&id) {
                    parts.push(parse_part(&child, id)?);
                }
            }
            _ => {}
        }
    }

    let graph = build_graph(header, parts)?;
    debug!(
        "parse_musicxml: {} staves, {} measures, {} voice entries, {} notes",
        graph.staves.len(),
        graph.measures.len(),
        graph.voice_entries.len(),
        graph.notes.len()
    );
    Ok(graph)
}

// ─── Intermediate form ───────────────────────────────────────────────

#[derive(Default)]
struct Header {
    title: Option<String>,
    credit_title: Option<String>,
    composer: Option<String>,
    credit_composer: Option<String>,
}

struct RawPart {
    id: String,
    staves: u32,
    measures: Vec<RawMeasure>,
}

struct RawMeasure {
    number: i32,
    implicit: bool,
    new_system: bool,
    new_page: bool,
    duration: RationalTime,
    notes: Vec<RawNote>,
    /// (offset in measure, quarter-note BPM)
    tempos: Vec<(RationalTime, f64)>,
}

struct RawNote {
    staff: u32,
    voice: u32,
    onset: RationalTime,
    length: RationalTime,
    pitch: Option<Pitch>,
    chord: bool,
    tie_start: bool,
    tie_stop: bool,
}

/// Attribute state carried from one measure to the next.
struct PartState {
    divisions: i64,
    time_sig: (i64, i64),
}

// ─── Header ──────────────────────────────────────────────────────────

fn parse_work(node: &Node, header: &mut Header) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" {
            header.title = child.text().map(|t| t.trim().to_string());
        }
    }
}

fn parse_identification(node: &Node, header: &mut Header) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "creator" && child.attribute("type") == Some("composer") {
            header.composer = child.text().map(|t| t.trim().to_string());
        }
    }
}

fn parse_credit(node: &Node, header: &mut Header) {
    let mut credit_type = String::new();
    let mut credit_text = String::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "credit-type" => {
                credit_type = child.text().unwrap_or("").trim().to_string();
            }
            "credit-words" => {
                let text = child.text().unwrap_or("").trim();
                if !text.is_empty() {
                    if !credit_text.is_empty() {
                        credit_text.push('\n');
                    }
                    credit_text.push_str(text);
                }
            }
            _ => {}
        }
    }

    if credit_text.is_empty() {
        return;
    }
    // <credit> values take priority over <work-title> / <creator>.
    match credit_type.as_str() {
        "title" => header.credit_title = Some(credit_text),
        "composer" => header.credit_composer = Some(credit_text),
        _ => {}
    }
}

fn parse_part_list(node: &Node, part_ids: &mut Vec<String>) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "score-part" {
            part_ids.push(child.attribute("id").unwrap_or("").to_string());
        }
    }
}

// ─── Part ────────────────────────────────────────────────────────────

fn parse_part(node: &Node, id: String) -> Result<RawPart, ScoreError> {
    let mut state = PartState {
        divisions: DEFAULT_DIVISIONS,
        time_sig: DEFAULT_TIME_SIG,
    };
    let mut staves = 1u32;
    let mut measures = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            let measure = parse_measure(&child, &mut state, &mut staves)?;
            measures.push(measure);
        }
    }

    Ok(RawPart { id, staves, measures })
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node, state: &mut PartState, staves: &mut u32) -> Result<RawMeasure, ScoreError> {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let implicit = node.attribute("implicit") == Some("yes");

    let mut measure = RawMeasure {
        number,
        implicit,
        new_system: false,
        new_page: false,
        duration: RationalTime::ZERO,
        notes: Vec::new(),
        tempos: Vec::new(),
    };

    // Position within the measure, moved by notes, <backup> and <forward>
    let mut position = RationalTime::ZERO;
    let mut last_onset = RationalTime::ZERO;
    let mut content_end = RationalTime::ZERO;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => parse_attributes(&child, state, staves),
            "note" => {
                let Some(mut note) = parse_note(&child, state.divisions)? else {
                    continue;
                };
                if note.chord {
                    note.onset = last_onset;
                } else {
                    note.onset = position;
                    last_onset = position;
                    position = position.add(note.length)?;
                }
                *staves = (*staves).max(note.staff);
                content_end = content_end.max(note.onset.add(note.length)?);
                measure.notes.push(note);
            }
            "backup" => {
                let d = child_duration(&child, state.divisions)?;
                position = position.subtract(d)?.max(RationalTime::ZERO);
            }
            "forward" => {
                let d = child_duration(&child, state.divisions)?;
                position = position.add(d)?;
                content_end = content_end.max(position);
            }
            "direction" => {
                if let Some(bpm) = parse_direction_tempo(&child) {
                    measure.tempos.push((position, bpm));
                }
            }
            "sound" => {
                // <sound> can appear directly in <measure> (not inside <direction>)
                if let Some(tempo) = child.attribute("tempo").and_then(|t| t.parse::<f64>().ok()) {
                    measure.tempos.push((position, tempo));
                }
            }
            "print" => {
                if child.attribute("new-system") == Some("yes") {
                    measure.new_system = true;
                }
                if child.attribute("new-page") == Some("yes") {
                    measure.new_page = true;
                }
            }
            _ => {}
        }
    }

    let nominal = RationalTime::new(state.time_sig.0, state.time_sig.1)?;
    // Pickup measures take their length from the content
    measure.duration = if measure.implicit && !content_end.is_zero() && content_end < nominal {
        content_end
    } else {
        nominal
    };

    Ok(measure)
}

fn child_duration(node: &Node, divisions: i64) -> Result<RationalTime, ScoreError> {
    let raw = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "duration")
        .and_then(|n| parse_i64(&n))
        .unwrap_or(0);
    Ok(RationalTime::new(raw, 4 * divisions)?)
}

// ─── Attributes ──────────────────────────────────────────────────────

fn parse_attributes(node: &Node, state: &mut PartState, staves: &mut u32) {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                if let Some(d) = parse_i64(&child) {
                    state.divisions = d;
                }
            }
            "time" => {
                let mut ts = DEFAULT_TIME_SIG;
                for tc in child.children().filter(|n| n.is_element()) {
                    match tc.tag_name().name() {
                        "beats" => ts.0 = parse_i64(&tc).unwrap_or(4),
                        "beat-type" => ts.1 = parse_i64(&tc).unwrap_or(4),
                        _ => {}
                    }
                }
                state.time_sig = ts;
            }
            "staves" => {
                if let Some(s) = parse_i64(&child) {
                    *staves = (*staves).max(s.max(1) as u32);
                }
            }
            _ => {}
        }
    }
}

// ─── Note ────────────────────────────────────────────────────────────

/// Parse one `<note>`. Grace notes have no duration and are skipped.
fn parse_note(node: &Node, divisions: i64) -> Result<Option<RawNote>, ScoreError> {
    let mut duration: i64 = 0;
    let mut note = RawNote {
        staff: 1,
        voice: 1,
        onset: RationalTime::ZERO,
        length: RationalTime::ZERO,
        pitch: None,
        chord: false,
        tie_start: false,
        tie_stop: false,
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "grace" => return Ok(None),
            "pitch" => note.pitch = Some(parse_pitch(&child)),
            "duration" => duration = parse_i64(&child).unwrap_or(0),
            "voice" => note.voice = parse_i64(&child).unwrap_or(1).max(1) as u32,
            "staff" => note.staff = parse_i64(&child).unwrap_or(1).max(1) as u32,
            "chord" => note.chord = true,
            "rest" => note.pitch = None,
            "tie" => match child.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            _ => {}
        }
    }

    note.length = RationalTime::new(duration, 4 * divisions)?;
    Ok(Some(note))
}

fn parse_pitch(node: &Node) -> Pitch {
    let mut pitch = Pitch {
        step: "C".to_string(),
        octave: 4,
        alter: None,
    };
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "step" => {
                pitch.step = child.text().unwrap_or("C").trim().to_string();
            }
            "octave" => pitch.octave = parse_i64(&child).unwrap_or(4) as i32,
            "alter" => pitch.alter = parse_f64(&child),
            _ => {}
        }
    }
    pitch
}

// ─── Direction ───────────────────────────────────────────────────────

/// Tempo carried by a `<direction>`, in quarter notes per minute.
/// `<sound tempo>` wins over a metronome mark.
fn parse_direction_tempo(node: &Node) -> Option<f64> {
    let mut metronome = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "sound" => {
                if let Some(tempo) = child.attribute("tempo").and_then(|t| t.parse::<f64>().ok()) {
                    return Some(tempo);
                }
            }
            "direction-type" => {
                for dt in child.children().filter(|n| n.is_element()) {
                    if dt.tag_name().name() == "metronome" {
                        metronome = parse_metronome(&dt);
                    }
                }
            }
            _ => {}
        }
    }
    metronome
}

fn parse_metronome(node: &Node) -> Option<f64> {
    let mut beat_unit = "quarter".to_string();
    let mut per_minute = None;
    let mut dotted = false;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                beat_unit = child.text().unwrap_or("quarter").trim().to_string();
            }
            "beat-unit-dot" => dotted = true,
            "per-minute" => per_minute = parse_f64(&child),
            _ => {}
        }
    }

    let quarters_per_unit = match beat_unit.as_str() {
        "whole" => 4.0,
        "half" => 2.0,
        "eighth" => 0.5,
        "16th" => 0.25,
        _ => 1.0,
    };
    let dot = if dotted { 1.5 } else { 1.0 };
    per_minute.map(|bpm| bpm * quarters_per_unit * dot)
}

// ─── Graph assembly ──────────────────────────────────────────────────

fn build_graph(header: Header, parts: Vec<RawPart>) -> Result<ScoreGraph, ScoreError> {
    let mut graph = ScoreGraph::new();
    graph.title = header.credit_title.or(header.title);
    graph.composer = header.credit_composer.or(header.composer);

    // Sheet-wide staff ids: parts in order, staves within a part in order
    let mut first_staff_id = Vec::with_capacity(parts.len());
    let mut next_id = 1u32;
    for part in &parts {
        first_staff_id.push(next_id);
        next_id += part.staves;
    }

    // Layout breaks and measure starts follow the first part
    let measure_count = parts.iter().map(|p| p.measures.len()).max().unwrap_or(0);
    let mut starts = Vec::with_capacity(measure_count);
    let mut cursor = RationalTime::ZERO;
    for i in 0..measure_count {
        starts.push(cursor);
        let length = parts
            .iter()
            .find_map(|p| p.measures.get(i).map(|m| m.duration))
            .unwrap_or(RationalTime::ZERO);
        cursor = cursor.add(length)?;
    }

    let mut page = None;
    let mut staff_nodes: Vec<Vec<StaffId>> = Vec::new();

    for i in 0..measure_count {
        let lead = parts.iter().find_map(|p| p.measures.get(i));
        let new_page = page.is_none() || lead.is_some_and(|m| m.new_page);
        let new_system = new_page || lead.is_some_and(|m| m.new_system);

        if new_page {
            page = Some(graph.add_page());
        }
        if new_system {
            let Some(page) = page else { break };
            let system = graph.add_system(page);
            staff_nodes = parts
                .iter()
                .enumerate()
                .map(|(p, part)| {
                    (0..part.staves)
                        .map(|s| graph.add_staff(system, &part.id, first_staff_id[p] + s))
                        .collect()
                })
                .collect();
        }

        for (p, part) in parts.iter().enumerate() {
            let Some(raw) = part.measures.get(i) else { continue };
            for (s, &staff) in staff_nodes[p].iter().enumerate() {
                let staff_number = s as u32 + 1;
                let measure = graph.add_measure(staff, raw.number, starts[i], raw.duration);
                graph.measures[measure.index()].implicit = raw.implicit;
                add_measure_notes(&mut graph, measure, raw, staff_number);
            }
            for &(offset, bpm) in &raw.tempos {
                let position = starts[i].add(offset)?;
                if bpm > 0.0 && !graph.tempo_marks.iter().any(|t| t.position == position) {
                    graph.tempo_marks.push(TempoMark { position, bpm });
                }
            }
        }
    }

    graph.tempo_marks.sort_by(|a, b| a.position.cmp(&b.position));
    Ok(graph)
}

fn add_measure_notes(graph: &mut ScoreGraph, measure: MeasureId, raw: &RawMeasure, staff_number: u32) {
    for note in raw.notes.iter().filter(|n| n.staff == staff_number) {
        let voice = graph.voice_in_measure(measure, note.voice);
        // Chord members, and notes returning to an onset after <backup>,
        // join the voice's entry at that onset.
        let existing = graph
            .voice(voice)
            .entries
            .iter()
            .copied()
            .find(|&e| graph.voice_entry(e).timestamp == note.onset);
        let entry = match existing {
            Some(e) => e,
            None => graph.add_entry(voice, note.onset),
        };
        let id = graph.add_note(entry, note.pitch.clone(), note.length);
        let added = &mut graph.notes[id.index()];
        added.tie_start = note.tie_start;
        added.tie_stop = note.tie_stop;
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn parse_i64(node: &Node) -> Option<i64> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: i64, d: i64) -> RationalTime {
        RationalTime::new(n, d).unwrap()
    }

    const TWO_VOICES: &str = r#"<?xml version="1.0"?>
<score-partwise version="3.1">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>2</divisions><time><beats>2</beats><beat-type>4</beat-type></time></attributes>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice></note>
      <note><chord/><pitch><step>E</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice></note>
      <note><rest/><duration>2</duration><voice>1</voice></note>
      <backup><duration>4</duration></backup>
      <note><pitch><step>G</step><octave>3</octave></pitch><duration>1</duration><voice>2</voice></note>
      <note><grace/><pitch><step>A</step><octave>3</octave></pitch><voice>2</voice></note>
      <note><pitch><step>A</step><octave>3</octave></pitch><duration>3</duration><voice>2</voice></note>
    </measure>
  </part>
</score-partwise>"#;

    #[test]
    fn backup_and_chords_place_entries() {
        let g = parse_musicxml(TWO_VOICES).unwrap();
        assert_eq!(g.measures.len(), 1);
        assert_eq!(g.measures[0].duration, r(1, 2));
        assert_eq!(g.voices.len(), 2);

        let v1 = &g.voices[0];
        assert_eq!(v1.voice_id, 1);
        let ts: Vec<_> = v1.entries.iter().map(|&e| g.voice_entry(e).timestamp).collect();
        assert_eq!(ts, vec![r(0, 1), r(1, 4)]);
        assert_eq!(g.voice_entry(v1.entries[0]).notes.len(), 2, "chord shares one entry");

        let v2 = &g.voices[1];
        let ts: Vec<_> = v2.entries.iter().map(|&e| g.voice_entry(e).timestamp).collect();
        assert_eq!(ts, vec![r(0, 1), r(1, 8)], "grace note is skipped");
    }

    #[test]
    fn zero_divisions_is_an_arithmetic_error() {
        let xml = TWO_VOICES.replace("<divisions>2</divisions>", "<divisions>0</divisions>");
        match parse_musicxml(&xml) {
            Err(ScoreError::Arithmetic(_)) => {}
            other => panic!("expected arithmetic error, got {:?}", other.map(|g| g.notes.len())),
        }
    }

    #[test]
    fn rejects_timewise_documents() {
        let err = parse_musicxml("<score-timewise/>").unwrap_err();
        assert!(matches!(err, ScoreError::Unsupported(_)));
    }

    #[test]
    fn metronome_units_convert_to_quarters() {
        let xml = r#"<direction><direction-type><metronome>
            <beat-unit>half</beat-unit><beat-unit-dot/><per-minute>40</per-minute>
            </metronome></direction-type></direction>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(parse_direction_tempo(&doc.root_element()), Some(120.0));
    }
}
