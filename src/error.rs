//! Error taxonomy for the framer, parser, and connection pipeline.
//!
//! Framer and parser never panic; every failure mode returns as a value
//! here, classified as fatal to a packet, fatal to a connection, or merely
//! counted.

use thiserror::Error;

/// A Framer result, conveniently wrapping [`FramingError`].
pub type FramingResult<T> = std::result::Result<T, FramingError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while extracting frames from a connection's byte buffer.
pub enum FramingError {
    /// Fewer than 3 bytes buffered; not a failure, just "wait for more".
    #[error("not enough bytes buffered for a header")]
    TooShort,
    /// Declared payload length exceeds the configured maximum.
    #[error("declared payload length {0} exceeds max packet size {1}")]
    Oversize(usize, usize),
    /// CRC-16/IBM over the frame did not match the trailing CRC field.
    #[error("CRC mismatch: expected {expected:#06X}, computed {computed:#06X}")]
    CrcMismatch { expected: u16, computed: u16 },
    /// Buffer holds a partial frame; caller should wait for more bytes.
    #[error("frame truncated, {0} more bytes needed")]
    Truncated(usize),
}

/// A Record Parser result, conveniently wrapping [`ParseError`].
pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while decoding tag-length-value records from a payload.
pub enum ParseError {
    /// Tag id has no dictionary entry (recovered via the skip heuristic).
    #[error("unknown tag {0:#04X}")]
    UnknownTag(u16),
    /// Tag is known but its kind has no decoder (recovered by skip).
    #[error("unsupported kind for tag {0:#04X}")]
    UnsupportedKind(u16),
    /// A decoder tried to read past the end of the payload. Fatal for the
    /// current packet only; other frames on the connection are unaffected.
    #[error("buffer exhausted while decoding tag {0:#04X}")]
    BufferExhausted(u16),
    /// The record-boundary scan produced an inconsistent result.
    #[error("malformed record boundary at offset {0}")]
    MalformedBoundary(usize),
}

/// A Connection Pipeline result, conveniently wrapping [`PipelineError`].
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
/// Errors raised while driving a single TCP connection's pipeline.
pub enum PipelineError {
    /// Writing the acknowledgement frame failed; the connection is closed.
    #[error("failed to write confirmation frame")]
    AckWriteFailed(#[source] std::io::Error),
    /// The Work Queue was at capacity; the oldest pending job was dropped.
    #[error("work queue full, oldest job dropped")]
    QueueFull,
    /// The sink's `persist` call failed; the job is retried up to the cap.
    #[error("sink persist failed: {0}")]
    SinkPersistFailed(String),
    /// Reading from the socket failed outright.
    #[error("socket read failed")]
    ReadFailed(#[source] std::io::Error),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Timeouts observed by the Work Queue and connection pipeline.
pub enum TimeoutError {
    /// A queued job did not complete within `queue.perJobTimeoutMs`.
    #[error("job exceeded its per-job deadline")]
    JobTimeout,
    /// A connection sat idle past `pipeline.idleReadTimeoutSec`.
    #[error("connection idle past read timeout")]
    ReadIdle,
}
