//! A TCP ingestion gateway for Galileosky-family GPS/GNSS telemetry
//! trackers.
//!
//! The hard engineering lives in four pieces: [`framer`] reconstructs
//! length-prefixed, CRC-validated frames from a raw byte stream; [`record`]
//! and [`parser`] turn a frame's payload into one or more tag-length-value
//! [`record::Record`]s; [`pipeline`] owns a connection end to end (framing,
//! acking, and handing records to the queue); [`queue`] bounds memory and
//! concurrency in front of a pluggable [`sink::RecordSink`].
//!
//! Database schema, WebSocket fan-out, alert rules, and CSV logging are
//! external collaborators reached only through [`sink::RecordSink`] — they
//! are not part of this crate.

pub mod config;
pub mod crc;
pub mod dictionary;
pub mod error;
pub mod framer;
pub mod packet;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod sink;
pub mod stats;
pub mod value;
