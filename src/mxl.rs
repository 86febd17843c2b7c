//! Compressed MusicXML (.mxl) container.
//!
//! An .mxl file is a ZIP archive whose `META-INF/container.xml` names the
//! root score document. Archives without a container fall back to the first
//! `.xml` / `.musicxml` member outside `META-INF/`.

use std::io::{Cursor, Read, Seek};

use log::debug;
use zip::ZipArchive;

use crate::error::ScoreError;
use crate::model::ScoreGraph;
use crate::parser;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Read and parse a .mxl archive from raw bytes.
pub fn parse_mxl(data: &[u8]) -> Result<ScoreGraph, ScoreError> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::parse_musicxml(&xml)
}

/// Extract the root MusicXML document from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String, ScoreError> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(|e| ScoreError::Archive(e.to_string()))?;

    let root_path = match read_member(&mut archive, CONTAINER_PATH)? {
        Some(container) => rootfile_path(&container)?,
        None => first_score_member(&mut archive)?,
    };
    debug!("mxl: root document '{}'", root_path);

    read_member(&mut archive, &root_path)?
        .ok_or_else(|| ScoreError::Archive(format!("root file '{root_path}' missing from archive")))
}

/// Read a member as UTF-8 text; `None` when the archive has no such member.
fn read_member<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>, ScoreError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ScoreError::Archive(e.to_string())),
    };
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| ScoreError::Archive(format!("failed to read '{name}': {e}")))?;
    Ok(Some(text))
}

fn rootfile_path(container: &str) -> Result<String, ScoreError> {
    let doc = roxmltree::Document::parse(container).map_err(|e| ScoreError::Xml(format!("container.xml: {e}")))?;
    doc.descendants()
        .filter(|n| n.tag_name().name() == "rootfile")
        .find_map(|n| n.attribute("full-path"))
        .map(str::to_string)
        .ok_or_else(|| ScoreError::Archive("container.xml names no rootfile".to_string()))
}

fn first_score_member<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, ScoreError> {
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names
        .iter()
        .find(|name| !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml")))
        .cloned()
        .ok_or_else(|| ScoreError::Archive(format!("no MusicXML document in archive; members: {names:?}")))
}
