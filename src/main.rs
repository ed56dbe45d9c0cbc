#![deny(unsafe_code)]
mod version;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use env_logger::Env;
use log::{info, warn};

use bsformat_lib::bam_io::{self, OutputDest};
use bsformat_lib::header;
use bsformat_lib::names;
use bsformat_lib::pipeline::{self, FormatConfig, FormatOptions};
use bsformat_lib::standardize::InputFormat;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Convert SAM/BAM mapped bs-seq reads to the standard dnmtools format.
///
/// Output reads are T-rich (reverse-complemented and strand-switched
/// when the mapper emitted the A-rich orientation, with the `CV` tag
/// recording the conversion) and consecutive mates are merged into a
/// single fragment record.
#[derive(Parser, Debug)]
#[command(name = "bsformat", version = version::VERSION)]
struct Args {
    /// Number of BGZF compression/decompression threads
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    threads: usize,

    /// Output in BAM format
    #[arg(short = 'B', long = "bam")]
    bam: bool,

    /// Write to standard output
    #[arg(long = "stdout", conflicts_with = "output")]
    use_stdout: bool,

    /// Input mapper
    #[arg(short = 'f', long = "format", value_enum, default_value_t = InputFormat::Abismal)]
    input_format: InputFormat,

    /// Read name suffix length (0 = guess)
    #[arg(short = 's', long = "suff", default_value_t = 0, conflicts_with = "single_end")]
    suff_len: usize,

    /// Assume single-end reads [do not use with --suff]
    #[arg(long = "single-end")]
    single_end: bool,

    /// Maximum allowed fragment length
    #[arg(short = 'L', long = "max-frag", default_value_t = i64::from(i32::MAX))]
    max_frag_len: i64,

    /// Check this many reads to validate the read name suffix
    #[arg(short = 'c', long = "check", default_value_t = 1_000_000)]
    reads_to_check: usize,

    /// Force formatting for mixed single and paired reads
    #[arg(short = 'F', long = "force")]
    force: bool,

    /// Print more information
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Input SAM/BAM file
    input: PathBuf,

    /// Output file ("-" for stdout)
    #[arg(required_unless_present = "use_stdout")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    // capture the full command line before clap parsing for @PG records
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(());
        }
        Err(e) => {
            // argument problems exit 1, not clap's default 2
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    run(&args, command_line)
}

fn run(args: &Args, command_line: String) -> Result<()> {
    let output = match &args.output {
        Some(path) if path.as_os_str() != "-" => OutputDest::File(path.clone()),
        _ => OutputDest::Stdout,
    };

    info!("[input file: {}]", args.input.display());
    info!("[mapper: {}]", args.input_format);
    info!("[configuration: {}]", if args.single_end { "SE" } else { "PE" });
    let output_name = match &output {
        OutputDest::File(path) => path.display().to_string(),
        OutputDest::Stdout => "stdout".to_string(),
    };
    info!("[output file: {output_name}]");
    info!("[output type: {}]", if args.bam { "BAM" } else { "SAM" });
    info!("[force formatting: {}]", if args.force { "yes" } else { "no" });
    info!("[threads requested: {}]", args.threads);
    info!("[command line: \"{command_line}\"]");

    // reject non-SAM/BAM containers before any further reads
    bam_io::sniff_format(&args.input)?;

    if args.verbose {
        let input_header = bam_io::read_header(&args.input)?;
        if !header::mapper_named_in_header(&input_header, &args.input_format.to_string())? {
            warn!(
                "input format not found in header ({}, {})",
                args.input_format,
                args.input.display()
            );
        }
    }

    let mut suff_len = args.suff_len;
    if !args.single_end && !args.force {
        let name_sample = bam_io::load_read_names(&args.input, args.reads_to_check)
            .with_context(|| format!("failed reading names from {}", args.input.display()))?;
        if suff_len == 0 {
            suff_len = names::guess_suffix_len(&name_sample)?;
            info!("[read name suffix length guess: {suff_len}]");
        } else {
            names::check_suffix_len(&name_sample, suff_len)?;
        }
        names::check_mates_consecutive(&name_sample, suff_len)?;
    }
    if !args.single_end {
        info!("[read name suffix length: {suff_len}]");
    }

    let config = FormatConfig {
        input: args.input.clone(),
        output,
        bam_output: args.bam,
        threads: args.threads,
        version: version::VERSION.to_string(),
        command_line,
        options: FormatOptions {
            input_format: args.input_format,
            suffix_len: suff_len,
            max_frag_len: args.max_frag_len,
            single_end: args.single_end,
        },
    };

    pipeline::format(&config)
        .with_context(|| format!("failed formatting {}", args.input.display()))?;
    Ok(())
}
