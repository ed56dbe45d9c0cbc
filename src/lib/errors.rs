//! Error types for formatting operations.

use thiserror::Error;

/// Result type alias for formatting operations.
pub type Result<T> = std::result::Result<T, FormatError>;

/// Error type for formatting operations.
///
/// Every variant is fatal: nothing here is recovered locally, and any
/// per-record failure aborts the whole run.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Input container is neither SAM text nor BGZF/BAM.
    #[error("unsupported input format for '{path}': {reason}")]
    UnsupportedFormat {
        /// Path to the offending input
        path: String,
        /// What was detected instead
        reason: String,
    },

    /// No usable read-name suffix length could be inferred.
    #[error(
        "failed to identify read name suffix length\n\
         verify reads are not single-end\n\
         specify read name suffix length directly, or use --single-end / -F"
    )]
    SuffixIndeterminate,

    /// A user-supplied suffix length groups more than two reads as mates.
    #[error("read name suffix length {0} groups more than two reads as mates")]
    BadSuffixLength(usize),

    /// A user-supplied suffix length is not shorter than the shortest name.
    #[error("suffix length {suff_len} exceeds shortest read name length {min_name_len}")]
    SuffixTooLong {
        /// The requested suffix length
        suff_len: usize,
        /// The shortest observed read name length
        min_name_len: usize,
    },

    /// Mates with the same stripped name are not adjacent in the input.
    #[error("mates not consecutive in input")]
    MatesNotConsecutive,

    /// A CIGAR contains no reference-consuming operation.
    #[error("cigar eats no ref")]
    CigarEatsNoRef,

    /// An expected aux tag is absent from a record.
    #[error("required aux tag {tag} missing (invalid {context} record)")]
    AuxMissing {
        /// The two-character tag name
        tag: &'static str,
        /// Which consumer expected the tag
        context: &'static str,
    },

    /// A BAM record is shorter than its own declared layout.
    #[error("truncated BAM record ({len} bytes)")]
    TruncatedRecord {
        /// Observed record length in bytes
        len: usize,
    },

    /// A SAM record line failed to parse.
    #[error("invalid SAM record: {reason}")]
    InvalidSamRecord {
        /// What went wrong
        reason: String,
    },

    /// A SAM header failed to parse or be rewritten.
    #[error("invalid SAM header: {0}")]
    InvalidHeader(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
