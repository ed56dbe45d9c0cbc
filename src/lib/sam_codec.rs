//! SAM text record lines to and from raw BAM record bytes.
//!
//! The pipeline operates exclusively on raw BAM records; SAM input is
//! encoded into that layout on read and decoded back on write. Only the
//! record lines live here; header parsing and container framing are in
//! [`crate::bam_io`].

use std::collections::HashMap;
use std::io::Write;

use noodles::sam::Header;

use crate::cigar;
use crate::errors::{FormatError, Result};
use crate::record::{RawRecord, tag_value_size};
use crate::seq;

/// Bidirectional reference-name / tid mapping built from a header.
#[derive(Debug, Default)]
pub struct RefIndex {
    names: Vec<Vec<u8>>,
    by_name: HashMap<Vec<u8>, usize>,
}

impl RefIndex {
    /// Build the index from the header's @SQ lines, in order.
    #[must_use]
    pub fn from_header(header: &Header) -> Self {
        let mut names = Vec::new();
        let mut by_name = HashMap::new();
        for (name, _map) in header.reference_sequences() {
            let name = <_ as AsRef<[u8]>>::as_ref(name).to_vec();
            by_name.insert(name.clone(), names.len());
            names.push(name);
        }
        Self { names, by_name }
    }

    /// tid for a reference name.
    #[must_use]
    pub fn tid(&self, name: &[u8]) -> Option<i32> {
        self.by_name.get(name).map(|&i| i as i32)
    }

    /// Reference name for a tid.
    #[must_use]
    pub fn name(&self, tid: i32) -> Option<&[u8]> {
        if tid < 0 { None } else { self.names.get(tid as usize).map(Vec::as_slice) }
    }
}

fn invalid(reason: impl Into<String>) -> FormatError {
    FormatError::InvalidSamRecord { reason: reason.into() }
}

/// Parse one SAM record line into a raw BAM record.
pub fn parse_record(line: &str, refs: &RefIndex) -> Result<RawRecord> {
    let mut fields = line.split('\t');
    let mut next = |what: &str| fields.next().ok_or_else(|| invalid(format!("missing {what}")));

    let qname = next("qname")?;
    let flag: u16 = next("flag")?.parse().map_err(|_| invalid("bad flag"))?;
    let rname = next("rname")?;
    let pos: i64 = next("pos")?.parse().map_err(|_| invalid("bad pos"))?;
    let mapq: u8 = next("mapq")?.parse().map_err(|_| invalid("bad mapq"))?;
    let cigar_ops = cigar::parse_cigar(next("cigar")?)?;
    let rnext = next("rnext")?;
    let pnext: i64 = next("pnext")?.parse().map_err(|_| invalid("bad pnext"))?;
    let tlen: i32 = next("tlen")?.parse().map_err(|_| invalid("bad tlen"))?;
    let seq_field = next("seq")?;
    let qual_field = next("qual")?;

    let tid = match rname {
        "*" => -1,
        name => refs
            .tid(name.as_bytes())
            .ok_or_else(|| invalid(format!("unknown reference '{name}'")))?,
    };
    let mate_tid = match rnext {
        "*" => -1,
        "=" => tid,
        name => refs
            .tid(name.as_bytes())
            .ok_or_else(|| invalid(format!("unknown mate reference '{name}'")))?,
    };

    let bases = if seq_field == "*" { &[] } else { seq_field.as_bytes() };
    if !cigar_ops.is_empty() && !bases.is_empty() && cigar::query_length(&cigar_ops) != bases.len()
    {
        return Err(invalid(format!(
            "sequence length {} does not match cigar query length {}",
            bases.len(),
            cigar::query_length(&cigar_ops)
        )));
    }

    let mut rec = RawRecord::build(
        qname.as_bytes(),
        flag,
        tid,
        (pos - 1) as i32,
        mapq,
        &cigar_ops,
        bases.len(),
        mate_tid,
        (pnext - 1) as i32,
        tlen,
    );
    seq::pack_slice(rec.seq_mut(), bases);

    if qual_field != "*" {
        if qual_field.len() != bases.len() {
            return Err(invalid("quality length does not match sequence length"));
        }
        for (q, &b) in rec.qual_mut().iter_mut().zip(qual_field.as_bytes()) {
            *q = b.wrapping_sub(33);
        }
    }

    for field in fields {
        push_aux_field(&mut rec, field)?;
    }
    Ok(rec)
}

fn push_aux_field(rec: &mut RawRecord, field: &str) -> Result<()> {
    let bytes = field.as_bytes();
    if bytes.len() < 5 || bytes[2] != b':' || bytes[4] != b':' {
        return Err(invalid(format!("malformed aux field '{field}'")));
    }
    let tag = [bytes[0], bytes[1]];
    let value = &field[5..];
    match bytes[3] {
        b'A' => {
            let [v] = value.as_bytes() else {
                return Err(invalid(format!("bad A value in '{field}'")));
            };
            rec.push_aux_char(&tag, *v);
        }
        b'i' => {
            let v: i64 = value.parse().map_err(|_| invalid(format!("bad int in '{field}'")))?;
            rec.push_aux_int(&tag, v);
        }
        b'f' => {
            let v: f32 = value.parse().map_err(|_| invalid(format!("bad float in '{field}'")))?;
            rec.push_aux_float(&tag, v);
        }
        b'Z' => rec.push_aux_str(&tag, b'Z', value.as_bytes()),
        b'H' => rec.push_aux_str(&tag, b'H', value.as_bytes()),
        b'B' => {
            let (sub, elems) = value
                .split_once(',')
                .map_or((value, ""), |(s, rest)| (s, rest));
            let sub = *sub.as_bytes().first().ok_or_else(|| invalid("empty B subtype"))?;
            let elems: Vec<&str> =
                if elems.is_empty() { Vec::new() } else { elems.split(',').collect() };
            let mut raw = vec![tag[0], tag[1], b'B', sub];
            raw.extend_from_slice(&(elems.len() as u32).to_le_bytes());
            for e in elems {
                let bad = || invalid(format!("bad B element in '{field}'"));
                match sub {
                    b'c' => raw.push(e.parse::<i8>().map_err(|_| bad())? as u8),
                    b'C' => raw.push(e.parse::<u8>().map_err(|_| bad())?),
                    b's' => {
                        raw.extend_from_slice(&e.parse::<i16>().map_err(|_| bad())?.to_le_bytes());
                    }
                    b'S' => {
                        raw.extend_from_slice(&e.parse::<u16>().map_err(|_| bad())?.to_le_bytes());
                    }
                    b'i' => {
                        raw.extend_from_slice(&e.parse::<i32>().map_err(|_| bad())?.to_le_bytes());
                    }
                    b'I' => {
                        raw.extend_from_slice(&e.parse::<u32>().map_err(|_| bad())?.to_le_bytes());
                    }
                    b'f' => {
                        raw.extend_from_slice(&e.parse::<f32>().map_err(|_| bad())?.to_le_bytes());
                    }
                    _ => return Err(invalid(format!("bad B subtype in '{field}'"))),
                }
            }
            rec.push_aux_raw(&raw);
        }
        other => return Err(invalid(format!("unknown aux type '{}'", other as char))),
    }
    Ok(())
}

/// Render a raw BAM record as one SAM line (with trailing newline).
pub fn write_record<W: Write>(out: &mut W, rec: &RawRecord, refs: &RefIndex) -> Result<()> {
    let mut line = Vec::with_capacity(128);

    let name = rec.name();
    line.extend_from_slice(if name.is_empty() { b"*" } else { name });
    write_field(&mut line, rec.flag().to_string().as_bytes());
    write_field(&mut line, refs.name(rec.tid()).unwrap_or(b"*"));
    write_field(&mut line, (i64::from(rec.pos()) + 1).to_string().as_bytes());
    write_field(&mut line, rec.mapq().to_string().as_bytes());
    write_field(&mut line, cigar::cigar_string(&rec.cigar_ops()).as_bytes());
    match (rec.mate_tid(), rec.tid()) {
        (-1, _) => write_field(&mut line, b"*"),
        (m, t) if m == t => write_field(&mut line, b"="),
        (m, _) => write_field(&mut line, refs.name(m).unwrap_or(b"*")),
    }
    write_field(&mut line, (i64::from(rec.mate_pos()) + 1).to_string().as_bytes());
    write_field(&mut line, rec.tlen().to_string().as_bytes());

    let l_seq = rec.l_seq();
    if l_seq == 0 {
        write_field(&mut line, b"*");
        write_field(&mut line, b"*");
    } else {
        write_field(&mut line, &seq::unpack(rec.seq(), l_seq));
        let qual = rec.qual();
        if qual.iter().all(|&q| q == 0xFF) {
            write_field(&mut line, b"*");
        } else {
            line.push(b'\t');
            line.extend(qual.iter().map(|&q| q.saturating_add(33)));
        }
    }

    write_aux(&mut line, rec.aux())?;
    line.push(b'\n');
    out.write_all(&line)?;
    Ok(())
}

fn write_field(line: &mut Vec<u8>, value: &[u8]) {
    line.push(b'\t');
    line.extend_from_slice(value);
}

fn write_aux(line: &mut Vec<u8>, aux: &[u8]) -> Result<()> {
    let mut p = 0;
    while p + 3 <= aux.len() {
        let tag = &aux[p..p + 2];
        let val_type = aux[p + 2];
        let size = tag_value_size(val_type, &aux[p + 3..])
            .ok_or_else(|| invalid("malformed aux data"))?;
        if p + 3 + size > aux.len() {
            return Err(invalid("truncated aux data"));
        }
        let value = &aux[p + 3..p + 3 + size];

        line.push(b'\t');
        line.extend_from_slice(tag);
        match val_type {
            b'A' => {
                line.extend_from_slice(b":A:");
                line.push(value[0]);
            }
            b'c' => write_int_field(line, i64::from(value[0] as i8)),
            b'C' => write_int_field(line, i64::from(value[0])),
            b's' => write_int_field(line, i64::from(i16::from_le_bytes([value[0], value[1]]))),
            b'S' => write_int_field(line, i64::from(u16::from_le_bytes([value[0], value[1]]))),
            b'i' => write_int_field(
                line,
                i64::from(i32::from_le_bytes([value[0], value[1], value[2], value[3]])),
            ),
            b'I' => write_int_field(
                line,
                i64::from(u32::from_le_bytes([value[0], value[1], value[2], value[3]])),
            ),
            b'f' => {
                let v = f32::from_le_bytes([value[0], value[1], value[2], value[3]]);
                line.extend_from_slice(b":f:");
                line.extend_from_slice(v.to_string().as_bytes());
            }
            b'Z' | b'H' => {
                line.push(b':');
                line.push(val_type);
                line.push(b':');
                line.extend_from_slice(&value[..value.len() - 1]); // drop NUL
            }
            b'B' => {
                line.extend_from_slice(b":B:");
                let sub = value[0];
                line.push(sub);
                let elem_size = match sub {
                    b'c' | b'C' => 1,
                    b's' | b'S' => 2,
                    _ => 4,
                };
                for chunk in value[5..].chunks_exact(elem_size) {
                    line.push(b',');
                    let rendered = match sub {
                        b'c' => (chunk[0] as i8).to_string(),
                        b'C' => chunk[0].to_string(),
                        b's' => i16::from_le_bytes([chunk[0], chunk[1]]).to_string(),
                        b'S' => u16::from_le_bytes([chunk[0], chunk[1]]).to_string(),
                        b'i' => {
                            i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string()
                        }
                        b'I' => {
                            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]).to_string()
                        }
                        b'f' => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                            .to_string(),
                        _ => return Err(invalid("bad B subtype in aux data")),
                    };
                    line.extend_from_slice(rendered.as_bytes());
                }
            }
            _ => return Err(invalid("unknown aux type in record")),
        }
        p += 3 + size;
    }
    Ok(())
}

fn write_int_field(line: &mut Vec<u8>, value: i64) {
    line.extend_from_slice(b":i:");
    line.extend_from_slice(value.to_string().as_bytes());
}
