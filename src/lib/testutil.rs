//! Construction of raw records for tests.

use crate::cigar;
use crate::record::{RawRecord, flags};
use crate::seq;

/// Builder for raw test records.
///
/// ```
/// use bsformat_lib::testutil::TestRecord;
///
/// let rec = TestRecord::new("r1/1").at(0, 100).cigar("4M").seq("ACGT").nm(1).cv(b'T').build();
/// assert_eq!(rec.pos(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct TestRecord {
    name: String,
    flag: u16,
    tid: i32,
    pos: i32,
    mapq: u8,
    cigar: Vec<u32>,
    bases: Vec<u8>,
    mate_tid: i32,
    mate_pos: i32,
    tlen: i32,
    aux: Vec<(Vec<u8>, AuxValue)>,
}

#[derive(Debug, Clone)]
enum AuxValue {
    Int(i64),
    Char(u8),
    Str(Vec<u8>),
}

impl TestRecord {
    /// Start a record with the given name; mapped forward at chr 0 pos 0
    /// with mapq 255 until overridden.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flag: 0,
            tid: 0,
            pos: 0,
            mapq: 255,
            cigar: Vec::new(),
            bases: Vec::new(),
            mate_tid: -1,
            mate_pos: -1,
            tlen: 0,
            aux: Vec::new(),
        }
    }

    /// Set reference and position.
    #[must_use]
    pub fn at(mut self, tid: i32, pos: i32) -> Self {
        self.tid = tid;
        self.pos = pos;
        self
    }

    /// Set the reverse-strand flag bit.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.flag |= flags::REVERSE;
        self
    }

    /// Set the whole flag word.
    #[must_use]
    pub fn flag(mut self, flag: u16) -> Self {
        self.flag = flag;
        self
    }

    /// Set the CIGAR from a string like "5S45M".
    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = cigar::parse_cigar(cigar).expect("test cigar");
        self
    }

    /// Set the sequence from ASCII bases.
    #[must_use]
    pub fn seq(mut self, bases: &str) -> Self {
        self.bases = bases.as_bytes().to_vec();
        self
    }

    /// Set mate coordinates.
    #[must_use]
    pub fn mate(mut self, tid: i32, pos: i32) -> Self {
        self.mate_tid = tid;
        self.mate_pos = pos;
        self
    }

    /// Set the template length.
    #[must_use]
    pub fn tlen(mut self, tlen: i32) -> Self {
        self.tlen = tlen;
        self
    }

    /// Add an `NM` edit-distance tag.
    #[must_use]
    pub fn nm(mut self, nm: i64) -> Self {
        self.aux.push((b"NM".to_vec(), AuxValue::Int(nm)));
        self
    }

    /// Add a `CV` conversion tag.
    #[must_use]
    pub fn cv(mut self, cv: u8) -> Self {
        self.aux.push((b"CV".to_vec(), AuxValue::Char(cv)));
        self
    }

    /// Add a bsmap `ZS` strand string.
    #[must_use]
    pub fn zs(mut self, zs: &str) -> Self {
        self.aux.push((b"ZS".to_vec(), AuxValue::Str(zs.as_bytes().to_vec())));
        self
    }

    /// Add a bismark `XR` orientation string.
    #[must_use]
    pub fn xr(mut self, xr: &str) -> Self {
        self.aux.push((b"XR".to_vec(), AuxValue::Str(xr.as_bytes().to_vec())));
        self
    }

    /// Build the raw record.
    #[must_use]
    pub fn build(&self) -> RawRecord {
        let mut rec = RawRecord::build(
            self.name.as_bytes(),
            self.flag,
            self.tid,
            self.pos,
            self.mapq,
            &self.cigar,
            self.bases.len(),
            self.mate_tid,
            self.mate_pos,
            self.tlen,
        );
        seq::pack_slice(rec.seq_mut(), &self.bases);
        for (tag, value) in &self.aux {
            let tag: &[u8; 2] = tag.as_slice().try_into().expect("two-char tag");
            match value {
                AuxValue::Int(v) => rec.push_aux_int(tag, *v),
                AuxValue::Char(v) => rec.push_aux_char(tag, *v),
                AuxValue::Str(v) => rec.push_aux_str(tag, b'Z', v),
            }
        }
        rec
    }
}

/// The record's sequence as ASCII bases.
#[must_use]
pub fn seq_of(rec: &RawRecord) -> Vec<u8> {
    seq::unpack(rec.seq(), rec.l_seq())
}
