//! SAM/BAM container I/O over raw records.
//!
//! Input is sniffed from its magic bytes: BGZF-compressed streams are
//! treated as BAM, plain text as SAM, anything else is rejected. BAM
//! records cross this boundary as raw `block_size`-framed byte blobs;
//! only the header goes through noodles' parsers. BGZF compression and
//! decompression can be handed a worker pool with `threads > 1`; the
//! record pipeline itself stays single-threaded.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use noodles::bgzf::{
    MultithreadedReader, MultithreadedWriter, Reader as BgzfReader, Writer as BgzfWriter,
};
use noodles::sam::Header;

use crate::errors::{FormatError, Result};
use crate::record::RawRecord;
use crate::sam_codec::{self, RefIndex};

/// Container format of an input file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Plain-text SAM.
    Sam,
    /// BGZF-compressed BAM.
    Bam,
}

/// Where output goes.
#[derive(Clone, Debug)]
pub enum OutputDest {
    /// A regular file.
    File(PathBuf),
    /// Standard output.
    Stdout,
}

fn open_error(path: &Path, err: &io::Error) -> FormatError {
    FormatError::Io(io::Error::new(err.kind(), format!("{}: {err}", path.display())))
}

/// Decide whether an input is SAM text or a BGZF/BAM stream.
///
/// Anything else (CRAM, plain gzip of something binary, arbitrary data)
/// fails with [`FormatError::UnsupportedFormat`].
pub fn sniff_format(path: &Path) -> Result<ContainerFormat> {
    let mut file = File::open(path).map_err(|e| open_error(path, &e))?;
    let mut magic = [0u8; 4];
    let mut n = 0;
    while n < magic.len() {
        let m = file.read(&mut magic[n..])?;
        if m == 0 {
            break;
        }
        n += m;
    }
    let unsupported = |reason: &str| FormatError::UnsupportedFormat {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    if n == 0 {
        return Err(unsupported("empty file"));
    }
    if n >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        return Ok(ContainerFormat::Bam);
    }
    if &magic[..n] == b"CRAM" {
        return Err(unsupported("CRAM container"));
    }
    if magic[..n].iter().all(|&b| b == b'\t' || b == b'\n' || b == b'\r' || (0x20..0x7f).contains(&b))
    {
        return Ok(ContainerFormat::Sam);
    }
    Err(unsupported("not SAM or BAM"))
}

/// Single- or multi-threaded BGZF decompression source.
enum BgzfIn {
    Single(BgzfReader<File>),
    Multi(MultithreadedReader<File>),
}

impl Read for BgzfIn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BgzfIn::Single(r) => r.read(buf),
            BgzfIn::Multi(r) => r.read(buf),
        }
    }
}

enum ReaderKind {
    Bam(BgzfIn),
    Sam { reader: BufReader<File>, pending: Option<String> },
}

/// An open input yielding raw records and exposing its header.
pub struct InputReader {
    header: Header,
    refs: RefIndex,
    kind: ReaderKind,
}

/// Open an input file, reading its header.
///
/// `threads > 1` attaches a BGZF decompression worker pool (BAM only).
pub fn open_input(path: &Path, threads: usize) -> Result<InputReader> {
    match sniff_format(path)? {
        ContainerFormat::Bam => {
            let file = File::open(path).map_err(|e| open_error(path, &e))?;
            let bgzf = if threads > 1 {
                let workers = NonZeroUsize::new(threads).expect("threads > 1 checked above");
                BgzfIn::Multi(MultithreadedReader::with_worker_count(workers, file))
            } else {
                BgzfIn::Single(BgzfReader::new(file))
            };
            let mut reader = noodles::bam::io::Reader::from(bgzf);
            let header = reader.read_header()?;
            let refs = RefIndex::from_header(&header);
            Ok(InputReader { header, refs, kind: ReaderKind::Bam(reader.into_inner()) })
        }
        ContainerFormat::Sam => {
            let file = File::open(path).map_err(|e| open_error(path, &e))?;
            let mut reader = BufReader::new(file);
            let mut header_text = String::new();
            let mut pending = None;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 {
                    break;
                }
                if line.starts_with('@') {
                    header_text.push_str(&line);
                } else {
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if !trimmed.is_empty() {
                        pending = Some(trimmed.to_string());
                    }
                    break;
                }
            }
            let header = if header_text.is_empty() {
                Header::default()
            } else {
                header_text
                    .parse::<Header>()
                    .map_err(|e| FormatError::InvalidHeader(e.to_string()))?
            };
            let refs = RefIndex::from_header(&header);
            Ok(InputReader { header, refs, kind: ReaderKind::Sam { reader, pending } })
        }
    }
}

/// Fill `buf` completely, distinguishing clean EOF (nothing read) from
/// a mid-item truncation.
fn read_exact_or_eof(r: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut n = 0;
    while n < buf.len() {
        let m = r.read(&mut buf[n..])?;
        if m == 0 {
            if n == 0 {
                return Ok(false);
            }
            return Err(FormatError::TruncatedRecord { len: n });
        }
        n += m;
    }
    Ok(true)
}

impl InputReader {
    /// The input header as read.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<RawRecord>> {
        match &mut self.kind {
            ReaderKind::Bam(inner) => {
                let mut len_buf = [0u8; 4];
                if !read_exact_or_eof(inner, &mut len_buf)? {
                    return Ok(None);
                }
                let block_size = u32::from_le_bytes(len_buf) as usize;
                let mut data = vec![0u8; block_size];
                inner.read_exact(&mut data)?;
                RawRecord::from_bytes(data).map(Some)
            }
            ReaderKind::Sam { reader, pending } => {
                if let Some(line) = pending.take() {
                    return sam_codec::parse_record(&line, &self.refs).map(Some);
                }
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line)? == 0 {
                        return Ok(None);
                    }
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    return sam_codec::parse_record(trimmed, &self.refs).map(Some);
                }
            }
        }
    }
}

/// Read the header of an input without consuming records.
pub fn read_header(path: &Path) -> Result<Header> {
    Ok(open_input(path, 1)?.header)
}

/// Load up to `limit` read names from the start of an input.
pub fn load_read_names(path: &Path, limit: usize) -> Result<Vec<Vec<u8>>> {
    let mut reader = open_input(path, 1)?;
    let mut names = Vec::new();
    while names.len() < limit {
        match reader.next_record()? {
            Some(rec) => names.push(rec.name().to_vec()),
            None => break,
        }
    }
    Ok(names)
}

/// Single- or multi-threaded BGZF compression sink.
enum BgzfOut {
    Single(BgzfWriter<Box<dyn Write + Send>>),
    Multi(MultithreadedWriter<Box<dyn Write + Send>>),
}

impl Write for BgzfOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BgzfOut::Single(w) => w.write(buf),
            BgzfOut::Multi(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BgzfOut::Single(w) => w.flush(),
            BgzfOut::Multi(w) => w.flush(),
        }
    }
}

enum WriterKind {
    Sam(BufWriter<Box<dyn Write + Send>>),
    Bam(BgzfOut),
}

/// An open output accepting raw records, bound to a header at creation.
pub struct RecordWriter {
    refs: RefIndex,
    kind: WriterKind,
}

/// Create an output writer and emit the header.
///
/// `threads > 1` attaches a BGZF compression worker pool (BAM only).
pub fn create_writer(
    dest: &OutputDest,
    bam_output: bool,
    header: &Header,
    threads: usize,
) -> Result<RecordWriter> {
    let sink: Box<dyn Write + Send> = match dest {
        OutputDest::File(path) => {
            Box::new(File::create(path).map_err(|e| open_error(path, &e))?)
        }
        OutputDest::Stdout => Box::new(io::stdout()),
    };
    let refs = RefIndex::from_header(header);

    if bam_output {
        let mut bgzf = if threads > 1 {
            let workers = NonZeroUsize::new(threads).expect("threads > 1 checked above");
            BgzfOut::Multi(MultithreadedWriter::with_worker_count(workers, sink))
        } else {
            BgzfOut::Single(BgzfWriter::new(sink))
        };
        write_bam_header(&mut bgzf, header)?;
        Ok(RecordWriter { refs, kind: WriterKind::Bam(bgzf) })
    } else {
        let mut sam_writer = noodles::sam::io::Writer::new(BufWriter::new(sink));
        sam_writer.write_header(header)?;
        Ok(RecordWriter { refs, kind: WriterKind::Sam(sam_writer.into_inner()) })
    }
}

/// BAM preamble: magic, header text, and the reference dictionary.
fn write_bam_header<W: Write>(out: &mut W, header: &Header) -> Result<()> {
    out.write_all(b"BAM\x01")?;

    let mut sam_writer = noodles::sam::io::Writer::new(Vec::new());
    sam_writer.write_header(header)?;
    let text = sam_writer.into_inner();
    out.write_all(&(text.len() as i32).to_le_bytes())?;
    out.write_all(&text)?;

    out.write_all(&(header.reference_sequences().len() as i32).to_le_bytes())?;
    for (name, map) in header.reference_sequences() {
        out.write_all(&((name.len() + 1) as u32).to_le_bytes())?;
        out.write_all(name)?;
        out.write_all(&[0u8])?;
        out.write_all(&(map.length().get() as i32).to_le_bytes())?;
    }
    Ok(())
}

impl RecordWriter {
    /// Write one record.
    pub fn write_record(&mut self, rec: &RawRecord) -> Result<()> {
        match &mut self.kind {
            WriterKind::Sam(w) => sam_codec::write_record(w, rec, &self.refs),
            WriterKind::Bam(w) => {
                let bytes = rec.as_bytes();
                w.write_all(&(bytes.len() as u32).to_le_bytes())?;
                w.write_all(bytes)?;
                Ok(())
            }
        }
    }

    /// Flush and finalize the output.
    ///
    /// The multithreaded BGZF writer must be finished explicitly so all
    /// blocks and the EOF marker land; the single-threaded writer
    /// finalizes on drop.
    pub fn finish(self) -> Result<()> {
        match self.kind {
            WriterKind::Sam(mut w) => {
                w.flush()?;
            }
            WriterKind::Bam(BgzfOut::Single(mut w)) => {
                w.flush()?;
            }
            WriterKind::Bam(BgzfOut::Multi(mut w)) => {
                w.finish().map_err(|e| io::Error::other(e.to_string()))?;
            }
        }
        Ok(())
    }
}
