//! The streaming formatting driver.
//!
//! One pass over the input with a single record of lookback: each
//! record is standardized, compared by name against the held previous
//! record, and either merged with it, emitted alongside it, or held in
//! turn. The preflight guarantees mates are adjacent, so no wider
//! window is ever needed.

use std::mem;
use std::path::PathBuf;

use log::info;

use crate::bam_io::{self, OutputDest};
use crate::errors::Result;
use crate::header;
use crate::merge::{MergeResult, merge_mates};
use crate::names::same_name;
use crate::record::RawRecord;
use crate::standardize::{InputFormat, flip_conversion, standardize};

/// Records between progress log lines.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Per-record processing options.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Mapper that produced the input.
    pub input_format: InputFormat,
    /// Read-name suffix length identifying mates.
    pub suffix_len: usize,
    /// Fragment spans at or above this are never merged.
    pub max_frag_len: i64,
    /// Disable pairing entirely.
    pub single_end: bool,
}

/// Counters reported after a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatStats {
    /// Records consumed from the input.
    pub records_in: u64,
    /// Records emitted to the output.
    pub records_out: u64,
    /// Mate pairs fused into one record.
    pub pairs_merged: u64,
}

/// Full configuration of a formatting run.
#[derive(Debug, Clone)]
pub struct FormatConfig {
    /// Input SAM/BAM path.
    pub input: PathBuf,
    /// Output destination.
    pub output: OutputDest,
    /// Emit BAM instead of SAM.
    pub bam_output: bool,
    /// BGZF worker threads.
    pub threads: usize,
    /// Version recorded in the @PG line.
    pub version: String,
    /// Command line recorded in the @PG line.
    pub command_line: String,
    /// Per-record options.
    pub options: FormatOptions,
}

/// Drive the state machine over an in-memory record stream.
///
/// `emit` receives every output record in input order. This is the
/// I/O-free core of [`format`].
pub fn process_records<I, E>(records: I, opts: &FormatOptions, emit: &mut E) -> Result<FormatStats>
where
    I: IntoIterator<Item = Result<RawRecord>>,
    E: FnMut(&RawRecord) -> Result<()>,
{
    let mut stats = FormatStats::default();
    let mut records = records.into_iter();

    let mut take = |stats: &mut FormatStats| -> Result<Option<RawRecord>> {
        match records.next() {
            Some(rec) => {
                let mut rec = rec?;
                standardize(&mut rec, opts.input_format)?;
                stats.records_in += 1;
                if stats.records_in % PROGRESS_INTERVAL == 0 {
                    info!("processed {} records", stats.records_in);
                }
                Ok(Some(rec))
            }
            None => Ok(None),
        }
    };

    if opts.single_end {
        while let Some(mut rec) = take(&mut stats)? {
            if rec.is_a_rich() {
                flip_conversion(&mut rec)?;
            }
            emit(&rec)?;
            stats.records_out += 1;
        }
        return Ok(stats);
    }

    let Some(mut prev) = take(&mut stats)? else {
        return Ok(stats);
    };
    let mut previous_was_merged = false;

    while let Some(mut cur) = take(&mut stats)? {
        if same_name(&prev, &cur, opts.suffix_len) {
            // make prev the left (forward) mate before merging
            if !cur.is_reverse() {
                mem::swap(&mut prev, &mut cur);
            }
            match merge_mates(opts.max_frag_len, &prev, &cur)? {
                MergeResult::Merged(mut merged) => {
                    if merged.is_a_rich() {
                        flip_conversion(&mut merged)?;
                    }
                    emit(&merged)?;
                    stats.records_out += 1;
                    stats.pairs_merged += 1;
                }
                MergeResult::Unmerged => {
                    if prev.is_a_rich() {
                        flip_conversion(&mut prev)?;
                    }
                    emit(&prev)?;
                    if cur.is_a_rich() {
                        flip_conversion(&mut cur)?;
                    }
                    emit(&cur)?;
                    stats.records_out += 2;
                }
            }
            previous_was_merged = true;
        } else {
            if !previous_was_merged {
                if prev.is_a_rich() {
                    flip_conversion(&mut prev)?;
                }
                emit(&prev)?;
                stats.records_out += 1;
            }
            previous_was_merged = false;
        }
        prev = cur;
    }

    if !previous_was_merged {
        if prev.is_a_rich() {
            flip_conversion(&mut prev)?;
        }
        emit(&prev)?;
        stats.records_out += 1;
    }

    Ok(stats)
}

/// Run a full formatting pass: open the input, append the provenance
/// @PG line, stream every record through [`process_records`], and
/// finalize the output.
pub fn format(config: &FormatConfig) -> Result<FormatStats> {
    let mut reader = bam_io::open_input(&config.input, config.threads)?;
    let out_header =
        header::add_pg_record(reader.header().clone(), &config.version, &config.command_line)?;
    let mut writer =
        bam_io::create_writer(&config.output, config.bam_output, &out_header, config.threads)?;

    let stats = {
        let records = std::iter::from_fn(|| reader.next_record().transpose());
        let mut emit = |rec: &RawRecord| writer.write_record(rec);
        process_records(records, &config.options, &mut emit)?
    };

    writer.finish()?;
    info!(
        "finished: {} records in, {} records out, {} pairs merged",
        stats.records_in, stats.records_out, stats.pairs_merged
    );
    Ok(stats)
}
