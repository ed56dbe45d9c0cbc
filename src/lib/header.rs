//! SAM header program-record (@PG) management.
//!
//! Every output header gets a `@PG ID:DNMTOOLS VN:<version>
//! CL:<command line>` record appended, chained to the previous program
//! via PP and de-duplicated with a numeric ID suffix when the input was
//! already processed by this tool.

use bstr::BString;
use noodles::sam::Header;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::Program;
use noodles::sam::header::record::value::map::program::tag;
use std::collections::HashSet;

use crate::errors::{FormatError, Result};

/// Program ID written to output headers.
pub const PROGRAM_ID: &str = "DNMTOOLS";

/// ID of the last program in the @PG chain: the one no other program
/// references through its PP tag.
#[must_use]
pub fn last_program_id(header: &Header) -> Option<String> {
    let programs = header.programs();
    let program_map = programs.as_ref();
    if program_map.is_empty() {
        return None;
    }

    let mut referenced: HashSet<&[u8]> = HashSet::new();
    for (_id, pg) in program_map {
        if let Some(pp) = pg.other_fields().get(&tag::PREVIOUS_PROGRAM_ID) {
            referenced.insert(pp.as_ref());
        }
    }

    for (id, _pg) in program_map {
        if !referenced.contains(id.as_slice()) {
            return Some(String::from_utf8_lossy(id).to_string());
        }
    }
    // degenerate chain (a PP cycle); fall back to any program
    program_map.keys().next().map(|id| String::from_utf8_lossy(id).to_string())
}

/// A program ID not already present in the header, appending `.1`,
/// `.2`, ... to [`PROGRAM_ID`] as needed.
#[must_use]
pub fn unique_program_id(header: &Header) -> String {
    let programs = header.programs();
    let program_map = programs.as_ref();
    if !program_map.contains_key(PROGRAM_ID.as_bytes()) {
        return PROGRAM_ID.to_string();
    }
    for i in 1..=1000 {
        let candidate = format!("{PROGRAM_ID}.{i}");
        if !program_map.contains_key(candidate.as_bytes()) {
            return candidate;
        }
    }
    format!("{PROGRAM_ID}.{}", std::process::id())
}

/// Append the provenance @PG record for this run.
pub fn add_pg_record(mut header: Header, version: &str, command_line: &str) -> Result<Header> {
    let previous = last_program_id(&header);
    let id = unique_program_id(&header);

    let mut builder = Map::<Program>::builder()
        .insert(tag::VERSION, version)
        .insert(tag::COMMAND_LINE, command_line);
    if let Some(pp) = previous.as_deref() {
        builder = builder.insert(tag::PREVIOUS_PROGRAM_ID, pp);
    }
    let record = builder.build().map_err(|e| FormatError::InvalidHeader(e.to_string()))?;

    header
        .programs_mut()
        .add(BString::from(id), record)
        .map_err(|e| FormatError::InvalidHeader(e.to_string()))?;
    Ok(header)
}

/// Whether the header text mentions the mapper name, case-insensitively.
///
/// Used only for a verbose-mode warning; mappers normally leave their
/// own @PG line in the header.
pub fn mapper_named_in_header(header: &Header, mapper: &str) -> Result<bool> {
    let mut writer = noodles::sam::io::Writer::new(Vec::new());
    writer.write_header(header)?;
    let text = writer.into_inner();
    let needle: Vec<u8> = mapper.bytes().map(|b| b.to_ascii_lowercase()).collect();
    if needle.is_empty() {
        return Ok(true);
    }
    let haystack: Vec<u8> = text.iter().map(|b| b.to_ascii_lowercase()).collect();
    Ok(haystack.windows(needle.len()).any(|w| w == needle.as_slice()))
}
