//! Read-name preflight: suffix-length inference and adjacency checks.
//!
//! Mates carry the same read name up to a fixed-length suffix ("/1",
//! "/2", ".1", ...). Before streaming, the first N names from the input
//! are examined to learn that suffix length and to verify that mates
//! actually sit next to each other, since the driver keeps only one
//! record of lookback.

use std::collections::HashMap;

use crate::errors::{FormatError, Result};
use crate::record::RawRecord;

/// Compare two names after stripping `suff_len` trailing characters.
///
/// Names of differing lengths never match; a name no longer than the
/// suffix is compared whole.
#[must_use]
pub fn same_name(a: &RawRecord, b: &RawRecord, suff_len: usize) -> bool {
    let an = a.name();
    let bn = b.name();
    if an.len() != bn.len() {
        return false;
    }
    let cut = if an.len() > suff_len { an.len() - suff_len } else { an.len() };
    an[..cut] == bn[..cut]
}

/// Strip `suff_len` characters from the end of a name, leaving names no
/// longer than the suffix untouched.
#[must_use]
pub fn strip_suffix(name: &[u8], suff_len: usize) -> &[u8] {
    if name.len() > suff_len { &name[..name.len() - suff_len] } else { name }
}

/// Maximum run of consecutive sorted names agreeing on their
/// length-minus-`suff_len` prefix.
///
/// A run of 1 means pairs, a run of 2 means at least three reads would
/// be mutually considered mates; the scan stops as soon as 2 is
/// reached since larger runs carry no extra information.
fn max_repeat_run(sorted_names: &[Vec<u8>], suff_len: usize) -> usize {
    let mut run = 0;
    let mut current = 0;
    for pair in sorted_names.windows(2) {
        if run >= 2 {
            break;
        }
        let (a, b) = (&pair[0], &pair[1]);
        if a.len() == b.len() && a.len() > suff_len && a[..a.len() - suff_len] == b[..b.len() - suff_len]
        {
            current += 1;
        } else {
            current = 0;
        }
        run = run.max(current);
    }
    run
}

/// Infer the read-name suffix length from a sample of names.
///
/// Scanning candidate lengths upward, the answer is the largest s whose
/// maximum repeat run is exactly 1; the scan stops once a run reaches 2
/// (shorter prefixes only get more ambiguous). A run of 2 before any
/// run of 1 indicates triplets; no run at all indicates every name is
/// unique end-to-end, which looks like single-end data masquerading as
/// paired. Both fail with [`FormatError::SuffixIndeterminate`].
pub fn guess_suffix_len(names: &[Vec<u8>]) -> Result<usize> {
    if names.len() < 2 {
        return Ok(0);
    }
    let min_name_len = names.iter().map(Vec::len).min().expect("nonempty");
    debug_assert!(min_name_len > 0);

    let mut sorted = names.to_vec();
    sorted.sort_unstable();

    let mut best = None;
    for suff_len in 0..min_name_len {
        match max_repeat_run(&sorted, suff_len) {
            0 => {}
            1 => best = Some(suff_len),
            _ => return best.ok_or(FormatError::SuffixIndeterminate),
        }
    }
    best.ok_or(FormatError::SuffixIndeterminate)
}

/// Validate a user-supplied suffix length: it must be shorter than the
/// shortest name and must not group more than two reads as mates.
pub fn check_suffix_len(names: &[Vec<u8>], suff_len: usize) -> Result<()> {
    let min_name_len = names.iter().map(Vec::len).min().unwrap_or(0);
    if !names.is_empty() && min_name_len <= suff_len {
        return Err(FormatError::SuffixTooLong { suff_len, min_name_len });
    }
    let mut sorted = names.to_vec();
    sorted.sort_unstable();
    if max_repeat_run(&sorted, suff_len) >= 2 {
        return Err(FormatError::BadSuffixLength(suff_len));
    }
    Ok(())
}

/// Verify that every recurrence of a stripped name is adjacent to its
/// first occurrence.
///
/// Records each stripped name's first index; a later occurrence whose
/// stored index is not the immediately preceding position means mates
/// are separated (or a name occurs three times), which the one-record
/// lookback of the driver cannot pair.
pub fn check_mates_consecutive(names: &[Vec<u8>], suff_len: usize) -> Result<()> {
    let mut first_seen: HashMap<&[u8], usize> = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let stripped = strip_suffix(name, suff_len);
        match first_seen.get(stripped) {
            None => {
                first_seen.insert(stripped, i);
            }
            Some(&prev) if prev + 1 != i => return Err(FormatError::MatesNotConsecutive),
            Some(_) => {}
        }
    }
    Ok(())
}
