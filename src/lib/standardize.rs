//! Per-mapper standardization to the canonical record form.
//!
//! Each supported mapper records bisulfite conversion status its own
//! way. Standardization rewrites that into the single `CV` tag
//! (`'T'` = T-rich, `'A'` = A-rich), keeps `NM`, drops every other aux
//! entry, restores reverse-strand sequences to read orientation, and
//! blanks the quality bytes.

use clap::ValueEnum;
use std::fmt;

use crate::errors::{FormatError, Result};
use crate::record::{RawRecord, flags};

/// The mapper that produced the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// abismal output; already canonical.
    Abismal,
    /// bsmap output; conversion status in the `ZS` strand string.
    Bsmap,
    /// bismark output; conversion status in the `XR` orientation string.
    Bismark,
    /// walt output; already canonical.
    Walt,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputFormat::Abismal => "abismal",
            InputFormat::Bsmap => "bsmap",
            InputFormat::Bismark => "bismark",
            InputFormat::Walt => "walt",
        };
        f.write_str(name)
    }
}

/// Rewrite a record from its mapper-specific form to the canonical one.
///
/// abismal and walt records pass through untouched apart from quality
/// blanking. bsmap and bismark records have their conversion tag read
/// (`ZS` second character `-` / `XR == "GA"` means A-rich), aux data
/// reduced to `NM` + `CV`, and reverse-strand sequences
/// reverse-complemented back to read orientation.
pub fn standardize(rec: &mut RawRecord, input_format: InputFormat) -> Result<()> {
    match input_format {
        InputFormat::Abismal | InputFormat::Walt => {}
        InputFormat::Bsmap => {
            let zs = rec
                .aux_str(b"ZS")
                .ok_or(FormatError::AuxMissing { tag: "ZS", context: "bsmap" })?;
            let cv = if zs.len() > 1 && zs[1] == b'-' { b'A' } else { b'T' };
            rewrite_tags(rec, cv, "bsmap")?;
        }
        InputFormat::Bismark => {
            let xr = rec
                .aux_str(b"XR")
                .ok_or(FormatError::AuxMissing { tag: "XR", context: "bismark" })?;
            let cv = if xr == b"GA" { b'A' } else { b'T' };
            rewrite_tags(rec, cv, "bismark")?;
        }
    }

    // does not depend on the mapper: quality scores are never used
    // downstream, so blank them for every record
    rec.qual_mut().fill(0xFF);
    Ok(())
}

fn rewrite_tags(rec: &mut RawRecord, cv: u8, context: &'static str) -> Result<()> {
    let nm = rec.aux_int(b"NM").ok_or(FormatError::AuxMissing { tag: "NM", context })?;
    rec.clear_aux();
    rec.push_aux_int(b"NM", nm);
    rec.push_aux_char(b"CV", cv);
    if rec.is_reverse() {
        rec.reverse_complement_seq();
    }
    Ok(())
}

/// Flip a record from A-rich to T-rich: toggle the reverse-strand flag,
/// reverse-complement the packed sequence, and set `CV` to `'T'`.
pub fn flip_conversion(rec: &mut RawRecord) -> Result<()> {
    rec.set_flag(rec.flag() ^ flags::REVERSE);
    rec.reverse_complement_seq();
    if !rec.set_aux_char(b"CV", b'T') {
        return Err(FormatError::AuxMissing { tag: "CV", context: "flip" });
    }
    Ok(())
}
