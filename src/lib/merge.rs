//! Merging consecutive mates into a single fragment record.
//!
//! Given two standardized mates with `one` on the left, the merger
//! chooses one of four strategies from the relative reference
//! coordinates:
//!
//! ```text
//! spacer >= 0: fragment longer than the two reads together
//!                               spacer
//!                              <======>
//! one_s                    one_e      two_s                    two_e
//! [------------end1------------]______[------------end2------------]
//!
//! spacer < 0, head > 0: ends overlap in the middle
//! <======= head =========>
//! one_s              two_s      one_e              two_e
//! [------------end1------[======]------end2------------]
//!
//! spacer < 0, head == 0: same start, keep the longer span
//!
//! spacer < 0, head < 0, overlap > 0: dovetail, 5' ends cross
//!                 <=== overlap ==>
//! two_s           one_s      two_e           one_e
//! [--end2---------[==============]---------end1--]
//! ```
//!
//! The merged record keeps `one`'s name, position, and mapping quality,
//! clears the mate fields, retains only the strand/read1/read2 flag
//! bits, and sets `isize` to the reference span of the stitched CIGAR.

use crate::cigar::{
    REF_SKIP, encode_op, full_and_partial_ops, op_code, op_len, query_length, reference_length,
};
use crate::errors::{FormatError, Result};
use crate::record::{RawRecord, flags};
use crate::seq;

/// Flag bits that survive a merge.
pub const KEPT_FLAGS: u16 = flags::REVERSE | flags::READ1 | flags::READ2;

/// Outcome of a merge attempt.
#[derive(Debug)]
pub enum MergeResult {
    /// The mates were fused; emit this record instead of the pair.
    Merged(RawRecord),
    /// Preconditions failed or the fragment span was out of range; emit
    /// both mates individually.
    Unmerged,
}

/// Mate preconditions: cross-referenced coordinates and opposite strands.
#[must_use]
pub fn are_mates(one: &RawRecord, two: &RawRecord) -> bool {
    one.mate_tid() == two.tid()
        && one.mate_pos() == two.pos()
        && one.is_reverse() != two.is_reverse()
}

/// Attempt to merge `one` (left mate) with `two` (right mate).
///
/// Returns [`MergeResult::Unmerged`] when the records are not mates or
/// the fragment span `two_e - one_s` falls outside
/// `(0, max_frag_len)`; otherwise builds the fused record, normalizes
/// its CIGAR, and returns it.
pub fn merge_mates(max_frag_len: i64, one: &RawRecord, two: &RawRecord) -> Result<MergeResult> {
    if !are_mates(one, two) {
        return Ok(MergeResult::Unmerged);
    }

    let one_s = i64::from(one.pos());
    let one_e = one.alignment_end();
    let two_s = i64::from(two.pos());
    let two_e = two.alignment_end();
    debug_assert!(one_s >= 0 && two_s >= 0);

    let span = two_e - one_s;
    if span <= 0 || span >= max_frag_len {
        return Ok(MergeResult::Unmerged);
    }

    let spacer = two_s - one_e;
    let head = two_s - one_s;
    let mut merged = if spacer >= 0 {
        merge_non_overlap(one, two, spacer as u32)?
    } else if head > 0 {
        merge_overlap(one, two, head as u32)?
    } else if head == 0 {
        keep_better_end(one, two)
    } else {
        // dovetail: span > 0 already established, truncate the left mate
        truncate_overlap(one, span as u32)?
    };

    // stitching can leave adjacent identical ops or interior clips
    merged.normalize_cigar()?;
    Ok(MergeResult::Merged(merged))
}

fn nm_of(rec: &RawRecord, context: &'static str) -> Result<i64> {
    rec.aux_int(b"NM").ok_or(FormatError::AuxMissing { tag: "NM", context })
}

fn cv_of(rec: &RawRecord, context: &'static str) -> Result<u8> {
    rec.aux_char(b"CV").ok_or(FormatError::AuxMissing { tag: "CV", context })
}

/// Fragment with space between the ends: concatenate the CIGARs with a
/// reference skip of `spacer` bases between them and both sequences
/// (the right mate reverse-complemented).
fn merge_non_overlap(one: &RawRecord, two: &RawRecord, spacer: u32) -> Result<RawRecord> {
    let a_ops = one.cigar_ops();
    let b_ops = two.cigar_ops();
    let mut c_ops = Vec::with_capacity(a_ops.len() + b_ops.len() + 1);
    c_ops.extend_from_slice(&a_ops);
    c_ops.push(encode_op(spacer, REF_SKIP));
    c_ops.extend_from_slice(&b_ops);

    let c_seq_len = one.l_seq() + two.l_seq();
    let isize = reference_length(&c_ops);
    let flag = one.flag() & KEPT_FLAGS;

    let mut c = RawRecord::build(
        one.name(),
        flag,
        one.tid(),
        one.pos(),
        one.mapq(),
        &c_ops,
        c_seq_len,
        -1,
        -1,
        isize as i32,
    );
    seq::merge_packed(one.seq(), one.l_seq(), two.seq(), two.l_seq(), c.seq_mut());

    c.push_aux_int(b"NM", nm_of(one, "merge")? + nm_of(two, "merge")?);
    c.push_aux_char(b"CV", cv_of(one, "merge")?);
    Ok(c)
}

/// Ends overlapping in the middle: keep the prefix of `one`'s CIGAR
/// covering the first `head` reference bases (splitting an op if
/// needed), then append all of `two`'s CIGAR, fusing the junction when
/// both sides carry the same op code.
fn merge_overlap(one: &RawRecord, two: &RawRecord, head: u32) -> Result<RawRecord> {
    debug_assert!(head > 0);
    let a_ops = one.cigar_ops();
    let b_ops = two.cigar_ops();

    let (full, partial) = full_and_partial_ops(&a_ops, head);
    let use_partial = full < a_ops.len() && partial > 0;

    let mut c_ops: Vec<u32> = a_ops[..full].to_vec();
    if use_partial {
        c_ops.push(encode_op(partial, op_code(a_ops[full])));
    }
    // everything from here on is decided by the kept-from-one cigar
    let a_seq_len = query_length(&c_ops);

    match (c_ops.last().copied(), b_ops.first().copied()) {
        (Some(last), Some(first)) if op_code(last) == op_code(first) => {
            *c_ops.last_mut().expect("nonempty") =
                encode_op(op_len(last) + op_len(first), op_code(first));
            c_ops.extend_from_slice(&b_ops[1..]);
        }
        _ => c_ops.extend_from_slice(&b_ops),
    }

    let c_seq_len = a_seq_len + two.l_seq();
    let isize = reference_length(&c_ops);
    let flag = one.flag() & KEPT_FLAGS;

    let mut c = RawRecord::build(
        one.name(),
        flag,
        one.tid(),
        one.pos(),
        one.mapq(),
        &c_ops,
        c_seq_len,
        -1,
        -1,
        isize as i32,
    );
    seq::merge_packed(one.seq(), a_seq_len, two.seq(), two.l_seq(), c.seq_mut());

    c.push_aux_int(b"NM", nm_of(one, "merge")? + nm_of(two, "merge")?);
    c.push_aux_char(b"CV", cv_of(one, "merge")?);
    Ok(c)
}

/// Same reference start: keep whichever mate spans more reference
/// bases, clear its mate fields, and mask its flags.
fn keep_better_end(one: &RawRecord, two: &RawRecord) -> RawRecord {
    let better = if one.reference_span() >= two.reference_span() { one } else { two };
    let mut c = better.clone();
    c.set_mate_tid(-1);
    c.set_mate_pos(-1);
    c.set_tlen(c.reference_span() as i32);
    c.set_flag(c.flag() & KEPT_FLAGS);
    c
}

/// Dovetail: truncate `one` to its first `overlap` reference bases and
/// discard `two` entirely.
fn truncate_overlap(one: &RawRecord, overlap: u32) -> Result<RawRecord> {
    let a_ops = one.cigar_ops();
    let (full, partial) = full_and_partial_ops(&a_ops, overlap);
    let use_partial = full < a_ops.len() && partial > 0;

    let mut c_ops: Vec<u32> = a_ops[..full].to_vec();
    if use_partial {
        c_ops.push(encode_op(partial, op_code(a_ops[full])));
    }

    let c_seq_len = query_length(&c_ops);
    let isize = reference_length(&c_ops);
    let flag = one.flag() & KEPT_FLAGS;

    let mut c = RawRecord::build(
        one.name(),
        flag,
        one.tid(),
        one.pos(),
        one.mapq(),
        &c_ops,
        c_seq_len,
        -1,
        -1,
        isize as i32,
    );
    let n_bytes = c_seq_len.div_ceil(2);
    c.seq_mut().copy_from_slice(&one.seq()[..n_bytes]);
    if c_seq_len % 2 == 1 {
        // the donor byte may carry a stale base in its low nibble
        c.seq_mut()[n_bytes - 1] &= 0xF0;
    }

    c.push_aux_int(b"NM", nm_of(one, "merge")?);
    c.push_aux_char(b"CV", cv_of(one, "merge")?);
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cigar::cigar_string;
    use crate::testutil::{TestRecord, seq_of};

    fn forward(name: &str, pos: i32, cigar: &str, seq: &str, nm: i64) -> TestRecord {
        TestRecord::new(name).at(0, pos).cigar(cigar).seq(seq).nm(nm).cv(b'T')
    }

    fn reverse(name: &str, pos: i32, cigar: &str, seq: &str, nm: i64) -> TestRecord {
        forward(name, pos, cigar, seq, nm).reverse()
    }

    fn merged(max_frag: i64, one: &RawRecord, two: &RawRecord) -> RawRecord {
        match merge_mates(max_frag, one, two).unwrap() {
            MergeResult::Merged(rec) => rec,
            MergeResult::Unmerged => panic!("expected a merged record"),
        }
    }

    // ========================================================================
    // are_mates preconditions
    // ========================================================================

    #[test]
    fn test_are_mates_requires_cross_coordinates() {
        let one = forward("r1", 100, "4M", "ACGT", 0).mate(0, 200).build();
        let two = reverse("r1", 200, "4M", "ACGT", 0).mate(0, 100).build();
        assert!(are_mates(&one, &two));

        let wrong_pos = reverse("r1", 201, "4M", "ACGT", 0).mate(0, 100).build();
        assert!(!are_mates(&one, &wrong_pos));
    }

    #[test]
    fn test_are_mates_requires_opposite_strands() {
        let one = forward("r1", 100, "4M", "ACGT", 0).mate(0, 200).build();
        let two = forward("r1", 200, "4M", "ACGT", 0).mate(0, 100).build();
        assert!(!are_mates(&one, &two));
        assert!(matches!(merge_mates(1000, &one, &two).unwrap(), MergeResult::Unmerged));
    }

    // ========================================================================
    // non-overlap merge
    // ========================================================================

    #[test]
    fn test_merge_non_overlap_inserts_ref_skip() {
        let one = forward("r1", 100, "8M", "AACCGGTT", 1).mate(0, 200).build();
        let two = reverse("r1", 200, "8M", "TTTTCCCC", 2).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);

        assert_eq!(cigar_string(&rec.cigar_ops()), "8M92N8M");
        assert_eq!(rec.pos(), 100);
        assert_eq!(rec.l_seq(), 16);
        assert_eq!(rec.tlen(), 108);
        assert_eq!(rec.mate_tid(), -1);
        assert_eq!(rec.mate_pos(), -1);
        assert_eq!(rec.aux_int(b"NM"), Some(3));
        assert_eq!(rec.aux_char(b"CV"), Some(b'T'));
        // left mate as stored, right mate reverse-complemented
        assert_eq!(seq_of(&rec), b"AACCGGTTGGGGAAAA");
        // only strand/read1/read2 bits survive
        assert_eq!(rec.flag() & !KEPT_FLAGS, 0);
    }

    #[test]
    fn test_merge_zero_spacer_touching_ends() {
        let one = forward("r1", 100, "4M", "AACC", 0).mate(0, 104).build();
        let two = reverse("r1", 104, "4M", "GGTT", 0).mate(0, 100).build();
        let rec = merged(1000, &one, &two);
        // the zero-length skip is retained: coalesce only fuses runs of
        // the same op code and never strips zero-length ops
        assert_eq!(cigar_string(&rec.cigar_ops()), "4M0N4M");
        assert_eq!(rec.tlen(), 8);
        assert_eq!(rec.l_seq(), 8);
    }

    #[test]
    fn test_merge_odd_length_mates() {
        let one = forward("r1", 100, "5M", "AACCG", 1).mate(0, 200).build();
        let two = reverse("r1", 200, "5M", "GTTAA", 1).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(rec.l_seq(), 10);
        assert_eq!(seq_of(&rec), b"AACCGTTAAC");
        assert_eq!(rec.aux_int(b"NM"), Some(2));
    }

    // ========================================================================
    // head-overlap merge
    // ========================================================================

    #[test]
    fn test_merge_overlap_splits_and_fuses() {
        // head = 30: keep 30 ref bases of one, then all of two; the
        // split 30M fuses with two's leading 50M into 80M
        let one = forward("r1", 100, "50M", &"A".repeat(50), 0).mate(0, 130).build();
        let two = reverse("r1", 130, "50M", &"C".repeat(50), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);

        assert_eq!(cigar_string(&rec.cigar_ops()), "80M");
        assert_eq!(rec.l_seq(), 80);
        assert_eq!(rec.tlen(), 80);
        let expected: Vec<u8> =
            b"A".repeat(30).into_iter().chain(b"G".repeat(50)).collect();
        assert_eq!(seq_of(&rec), expected);
    }

    #[test]
    fn test_merge_overlap_sums_nm() {
        let one = forward("r1", 100, "50M", &"A".repeat(50), 3).mate(0, 130).build();
        let two = reverse("r1", 130, "50M", &"C".repeat(50), 4).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(rec.aux_int(b"NM"), Some(7));
    }

    #[test]
    fn test_merge_overlap_head_inside_first_op_no_fuse() {
        // one: 20M5I20M, head 10 splits the first 20M; two starts with a
        // deletion so the junction does not fuse
        let one = forward("r1", 100, "20M5I20M", &"A".repeat(45), 0).mate(0, 110).build();
        let two = reverse("r1", 110, "2D40M", &"C".repeat(40), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(cigar_string(&rec.cigar_ops()), "10M2D40M");
        assert_eq!(rec.l_seq(), 50);
    }

    #[test]
    fn test_merge_overlap_exact_op_boundary() {
        // head 20 lands exactly on the end of one's first op: no split,
        // the kept 20M fuses with two's leading 30M
        let one = forward("r1", 100, "20M30M", &"A".repeat(50), 0).mate(0, 120).build();
        let two = reverse("r1", 120, "30M", &"C".repeat(30), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(cigar_string(&rec.cigar_ops()), "50M");
        assert_eq!(rec.l_seq(), 50);
        let expected: Vec<u8> =
            b"A".repeat(20).into_iter().chain(b"G".repeat(30)).collect();
        assert_eq!(seq_of(&rec), expected);
    }

    #[test]
    fn test_merge_overlap_query_only_ops_kept_whole() {
        // head 10 splits one's 20M; the insertion and trailing match are
        // dropped, so only 10 query bases of one survive
        let one = forward("r1", 100, "20M5I20M", &"A".repeat(45), 0).mate(0, 110).build();
        let two = reverse("r1", 110, "40M", &"C".repeat(40), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(cigar_string(&rec.cigar_ops()), "50M");
        assert_eq!(rec.l_seq(), 50);
    }

    // ========================================================================
    // equal start
    // ========================================================================

    #[test]
    fn test_equal_start_keeps_longer_span() {
        // e2 > e1: keep two
        let one = forward("r1", 100, "30M", &"A".repeat(30), 1).mate(0, 100).build();
        let two = reverse("r1", 100, "50M", &"C".repeat(50), 2).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(rec.l_seq(), 50);
        assert_eq!(rec.tlen(), 50);
        assert_eq!(rec.mate_tid(), -1);
        assert_eq!(rec.mate_pos(), -1);
        assert_eq!(rec.aux_int(b"NM"), Some(2));
        assert!(rec.is_reverse());
    }

    #[test]
    fn test_equal_start_tie_keeps_one() {
        let one = forward("r1", 100, "30M", &"A".repeat(30), 1).mate(0, 100).build();
        let two = reverse("r1", 100, "30M", &"C".repeat(30), 2).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(rec.aux_int(b"NM"), Some(1));
        assert!(!rec.is_reverse());
        assert_eq!(seq_of(&rec), b"A".repeat(30));
    }

    // ========================================================================
    // dovetail truncation
    // ========================================================================

    #[test]
    fn test_dovetail_truncates_left_mate() {
        // one at 100 (50M), two at 90 (50M): overlap = 140 - 100 = 40
        let one = forward("r1", 100, "50M", &"A".repeat(50), 2).mate(0, 90).build();
        let two = reverse("r1", 90, "50M", &"C".repeat(50), 5).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);

        assert_eq!(cigar_string(&rec.cigar_ops()), "40M");
        assert_eq!(rec.pos(), 100);
        assert_eq!(rec.l_seq(), 40);
        assert_eq!(rec.tlen(), 40);
        // NM comes from one alone; two is discarded
        assert_eq!(rec.aux_int(b"NM"), Some(2));
        assert_eq!(seq_of(&rec), b"A".repeat(40));
    }

    #[test]
    fn test_dovetail_odd_truncation_zeroes_trailing_nibble() {
        let one = forward("r1", 100, "49M", &"A".repeat(49), 0).mate(0, 90).build();
        let two = reverse("r1", 90, "47M", &"C".repeat(47), 0).mate(0, 100).build();
        // overlap = (90 + 47) - 100 = 37
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(rec.l_seq(), 37);
        assert_eq!(seq_of(&rec), b"A".repeat(37));
        assert_eq!(rec.seq()[18] & 0x0F, 0);
    }

    // ========================================================================
    // span gating
    // ========================================================================

    #[test]
    fn test_span_at_or_over_max_is_unmerged() {
        let one = forward("r1", 100, "50M", &"A".repeat(50), 0).mate(0, 10_100).build();
        let two = reverse("r1", 10_100, "50M", &"C".repeat(50), 0).mate(0, 100).build();
        // span = 10150 - 100 = 10050
        assert!(matches!(merge_mates(1000, &one, &two).unwrap(), MergeResult::Unmerged));
        assert!(matches!(merge_mates(10_050, &one, &two).unwrap(), MergeResult::Unmerged));
        assert!(matches!(merge_mates(10_051, &one, &two).unwrap(), MergeResult::Merged(_)));
    }

    #[test]
    fn test_nonpositive_span_is_unmerged() {
        // two ends at or before one starts
        let one = forward("r1", 200, "50M", &"A".repeat(50), 0).mate(0, 100).build();
        let two = reverse("r1", 100, "50M", &"C".repeat(50), 0).mate(0, 200).build();
        // span = 150 - 200 < 0
        assert!(matches!(
            merge_mates(i64::from(i32::MAX), &one, &two).unwrap(),
            MergeResult::Unmerged
        ));
    }

    // ========================================================================
    // output invariants
    // ========================================================================

    #[test]
    fn test_merged_cigar_is_normalized() {
        let one = forward("r1", 100, "25M25M", &"A".repeat(50), 0).mate(0, 130).build();
        let two = reverse("r1", 130, "50M", &"C".repeat(50), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        let ops = rec.cigar_ops();
        for pair in ops.windows(2) {
            assert_ne!(op_code(pair[0]), op_code(pair[1]), "adjacent ops share a code");
        }
        assert!(reference_length(&ops) > 0);
    }

    #[test]
    fn test_merged_isize_equals_rlen() {
        let one = forward("r1", 100, "30M", &"A".repeat(30), 0).mate(0, 150).build();
        let two = reverse("r1", 150, "30M", &"C".repeat(30), 0).mate(0, 100).build();
        let rec = merged(i64::from(i32::MAX), &one, &two);
        assert_eq!(i64::from(rec.tlen()), rec.reference_span());
        assert_eq!(rec.l_seq(), query_length(&rec.cigar_ops()));
    }
}
