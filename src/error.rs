//! Centralized error types for i18nmail.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the i18nmail library.
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Reading a body into a section failed.
    #[error("materialize {context}: {source}")]
    Materialize {
        context: &'static str,
        source: std::io::Error,
    },

    /// A header line is neither a field nor a continuation.
    #[error("malformed MIME header line: {0:?}")]
    MalformedHeader(String),

    /// The header block ended before any field was read.
    #[error("unterminated header block")]
    UnterminatedHeader,

    /// The header block is larger than the configured limit.
    #[error("header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// The `Content-Type` (or `Content-Disposition`) value cannot be parsed.
    #[error("invalid media type {value:?}: {reason}")]
    InvalidMediaType { value: String, reason: &'static str },

    /// A `multipart/*` entity has no `boundary` parameter.
    #[error("multipart entity {0:?} has no boundary parameter")]
    MissingBoundary(String),

    /// A non-empty `multipart/*` body contains no line matching its boundary.
    #[error("no delimiter line for boundary {0:?}")]
    NoDelimiter(String),

    /// Descending into a sub-part failed; `head` holds its leading bytes.
    #[error("descending into part {level}.{seq} (data={head:?}): {source}")]
    Descend {
        seq: u64,
        level: usize,
        head: String,
        source: Box<MailError>,
    },

    /// Nesting deeper than the walker allows.
    #[error("maximum walk depth {0} exceeded")]
    MaxDepthExceeded(usize),

    /// The visitor callback failed for the named part.
    #[error("todo({name:?}): {source}")]
    Callback {
        name: String,
        source: anyhow::Error,
    },

    /// Returned by a visitor to end the walk early. Never surfaces from `walk`.
    #[error("stop the walk")]
    Stop,

    /// The walk was cancelled through its token.
    #[error("walk cancelled")]
    Cancelled,

    /// I/O failure while handling a specific part.
    #[error("part {seq}: {source}")]
    Part {
        seq: u64,
        source: Box<MailError>,
    },

    /// `openssl` could not be started.
    #[error("spawn {program}: {source}")]
    SmimeSpawn {
        program: String,
        source: std::io::Error,
    },

    /// `openssl smime` exited unsuccessfully.
    #[error("openssl smime failed ({status}): {stderr}")]
    Smime { status: String, stderr: String },

    /// `openssl smime` did not finish within the configured timeout.
    #[error("openssl smime timed out after {0:?}")]
    SmimeTimeout(std::time::Duration),
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the sequence number of the part being processed.
    pub fn in_part(self, seq: u64) -> Self {
        match self {
            // Already identifies a part, or must stay recognisable to the walker.
            Self::Part { .. }
            | Self::Descend { .. }
            | Self::Callback { .. }
            | Self::Stop
            | Self::Cancelled
            | Self::MaxDepthExceeded(_) => self,
            other => Self::Part {
                seq,
                source: Box::new(other),
            },
        }
    }

    /// `true` for errors caused by malformed input rather than I/O or control flow.
    pub fn is_parse(&self) -> bool {
        match self {
            Self::MalformedHeader(_)
            | Self::UnterminatedHeader
            | Self::HeaderTooLarge { .. }
            | Self::InvalidMediaType { .. }
            | Self::MissingBoundary(_)
            | Self::NoDelimiter(_) => true,
            Self::Part { source, .. } => source.is_parse(),
            _ => false,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available.
impl From<std::io::Error> for MailError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<stream>"),
            source,
        }
    }
}
