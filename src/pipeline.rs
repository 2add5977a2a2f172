//! Connection Pipeline (§4.5): owns one socket for its lifetime, drives the
//! [`Framer`] over incoming bytes, writes confirmation frames, and hands
//! parsed records to the [`WorkQueue`].

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{FramingError, PipelineError, PipelineResult};
use crate::framer::{FrameOutcome, Framer};
use crate::packet::{HeaderKind, Packet};
use crate::parser::{ParserContext, RecordFormat};
use crate::queue::WorkQueue;
use crate::stats::Stats;

/// Connection-lifetime state (§4.5's state table collapses to these three:
/// `Idle`/`Draining` are both represented by the read loop's natural
/// iteration, since there is no distinct action to take between them here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Draining,
    Closed,
}

/// Per-connection configuration the pipeline needs, independent of the rest
/// of [`crate::config::GatewayConfig`] so it can be unit-constructed.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub max_packet_size: usize,
    pub validate_checksum: bool,
    pub record_format: RecordFormat,
    pub emit_raw_unknown_tags: bool,
    pub idle_read_timeout: Duration,
    pub send_incomplete_ack_probe: bool,
}

/// The canned nudge sent when a connection has held a partial header+length
/// for longer than a short grace period (§4.5, §6 `sendIncompleteAckProbe`
/// — a documented firmware workaround, feature-flagged by default).
const INCOMPLETE_PACKET_PROBE: [u8; 3] = [0x02, 0x3F, 0xFA];
const INCOMPLETE_PACKET_GRACE: Duration = Duration::from_secs(2);

/// Drives one TCP connection end to end: framing, parsing, acking, and
/// queue hand-off. Construct one per accepted socket.
pub struct ConnectionPipeline {
    framer: Framer,
    parser: ParserContext,
    config: PipelineConfig,
    state: ConnectionState,
}

impl ConnectionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            framer: Framer::with_checksum_validation(config.max_packet_size, config.validate_checksum),
            parser: ParserContext::new(),
            config,
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the read loop against `socket` until it closes or the idle
    /// timeout elapses, enqueuing decoded records onto `queue` and tracking
    /// framing/parse outcomes on `stats`.
    pub async fn run(
        mut self,
        mut socket: TcpStream,
        queue: WorkQueue,
        stats: Arc<Stats>,
    ) -> PipelineResult<()> {
        let mut read_buf = [0u8; 4096];
        let mut partial_header_since: Option<tokio::time::Instant> = None;

        loop {
            self.state = ConnectionState::Draining;
            while let Some(outcome) = self.framer.next_frame() {
                self.handle_outcome(outcome, &mut socket, &queue, &stats)
                    .await?;
                partial_header_since = None;
            }
            self.state = ConnectionState::Idle;

            if self.config.send_incomplete_ack_probe {
                if self.framer.buffered_len() > 0 && self.framer.buffered_len() < 3 {
                    let since = partial_header_since.get_or_insert_with(tokio::time::Instant::now);
                    if since.elapsed() >= INCOMPLETE_PACKET_GRACE {
                        let _ = socket.write_all(&INCOMPLETE_PACKET_PROBE).await;
                        partial_header_since = None;
                    }
                } else {
                    partial_header_since = None;
                }
            }

            let read = tokio::time::timeout(self.config.idle_read_timeout, socket.read(&mut read_buf));
            match read.await {
                Ok(Ok(0)) => break, // peer closed
                Ok(Ok(n)) => self.framer.feed(&read_buf[..n]),
                Ok(Err(err)) => return Err(PipelineError::ReadFailed(err)),
                Err(_) => break, // idle timeout
            }
        }

        for outcome in self.framer.drain() {
            self.handle_outcome(outcome, &mut socket, &queue, &stats)
                .await?;
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    async fn handle_outcome(
        &mut self,
        outcome: FrameOutcome,
        socket: &mut TcpStream,
        queue: &WorkQueue,
        stats: &Stats,
    ) -> PipelineResult<()> {
        match outcome {
            FrameOutcome::Frame(packet) => self.handle_frame(packet, socket, queue, stats).await,
            FrameOutcome::Error(err) => {
                stats.record_framing_error();
                tracing::debug!(error = %err, "framing error, resynced one byte");
                if matches!(err, FramingError::Oversize(..)) {
                    tracing::warn!("oversize payload declared, connection buffer resynced");
                }
                Ok(())
            }
        }
    }

    async fn handle_frame(
        &mut self,
        packet: Packet,
        socket: &mut TcpStream,
        queue: &WorkQueue,
        stats: &Stats,
    ) -> PipelineResult<()> {
        if packet.header.requires_ack() {
            let ack = build_ack(&packet.raw_frame);
            socket
                .write_all(&ack)
                .await
                .map_err(PipelineError::AckWriteFailed)?;
        }

        // The confirmation write above must happen before any sink call for
        // this frame's records (§5 ordering guarantee), which holds here
        // because `enqueue` only appends to the in-memory queue and never
        // itself calls the sink.
        if let HeaderKind::Main = packet.header {
            match self.parser.parse(
                &packet.payload,
                self.config.record_format,
                self.config.emit_raw_unknown_tags,
            ) {
                Ok(records) => {
                    for record in records {
                        let imei = record.imei.clone();
                        if queue.enqueue(imei, record).await
                            == crate::queue::EnqueueOutcome::Rejected(
                                crate::queue::RejectReason::QueueFull,
                            )
                        {
                            return Err(PipelineError::QueueFull);
                        }
                    }
                }
                Err(err) => {
                    stats.record_parse_error();
                    tracing::debug!(error = %err, "parse error, packet discarded");
                }
            }
        }
        Ok(())
    }
}

/// Additive 16-bit checksum ack, distinct from CRC-16/IBM: `0x02` followed
/// by the little-endian sum of every byte in the received frame (§4.5).
fn build_ack(frame: &[u8]) -> [u8; 3] {
    let sum: u32 = frame.iter().map(|&b| b as u32).sum();
    let checksum = (sum & 0xFFFF) as u16;
    let bytes = checksum.to_le_bytes();
    [0x02, bytes[0], bytes[1]]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crc::crc16_ibm;
    use crate::sink::{NullSink, SinkError, RecordSink};
    use crate::queue::QueueConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn build_frame(header: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(3 + payload.len() + 2);
        frame.push(header);
        frame.extend_from_slice(&((payload.len() as u16).to_le_bytes()));
        frame.extend_from_slice(payload);
        let crc = crc16_ibm(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn ack_is_additive_sum_not_crc() {
        let frame = build_frame(0x15, b"hello");
        let ack = build_ack(&frame);
        let sum: u32 = frame.iter().map(|&b| b as u32).sum();
        assert_eq!(ack[0], 0x02);
        assert_eq!(u16::from_le_bytes([ack[1], ack[2]]), (sum & 0xFFFF) as u16);
        assert_ne!(u16::from_le_bytes([ack[1], ack[2]]), crc16_ibm(&frame));
    }

    struct CountingSink {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl RecordSink for CountingSink {
        async fn persist(&self, _imei: Option<&str>, _record: &crate::record::Record) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn broadcast(&self, _imei: Option<&str>, _record: &crate::record::Record) -> Result<(), SinkError> {
            Ok(())
        }
        async fn evaluate_alerts(&self, _imei: Option<&str>, _record: &crate::record::Record) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn scenario_a_single_record_round_trip_acks_and_enqueues() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut payload = vec![0x03];
        payload.extend_from_slice(b"864173042101234");
        payload.push(0x20);
        payload.extend_from_slice(&1_721_631_869u32.to_le_bytes());
        let frame = build_frame(0x01, &payload);

        let calls = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn RecordSink> = Arc::new(CountingSink { calls: calls.clone() });
        let stats = Arc::new(Stats::default());
        let queue = WorkQueue::new(
            QueueConfig {
                max_concurrency: 1,
                ..QueueConfig::default()
            },
            stats.clone(),
        );
        let workers = queue.spawn_workers(sink);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let pipeline = ConnectionPipeline::new(PipelineConfig {
                max_packet_size: 65_535,
                validate_checksum: true,
                record_format: RecordFormat::Standard,
                emit_raw_unknown_tags: true,
                idle_read_timeout: Duration::from_millis(200),
                send_incomplete_ack_probe: false,
            });
            pipeline.run(socket, queue.clone(), stats).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame).await.unwrap();

        let mut ack = [0u8; 3];
        client.read_exact(&mut ack).await.unwrap();
        let expected = build_ack(&frame);
        assert_eq!(ack, expected);

        drop(client);
        let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        for handle in workers {
            handle.abort();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_f_crc_corruption_no_record_reaches_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut frame = build_frame(0x01, b"01234567890123456789012345678901");
        frame[10] ^= 0xFF; // corrupt one payload byte

        let calls = Arc::new(AtomicUsize::new(0));
        let sink: Arc<dyn RecordSink> = Arc::new(CountingSink { calls: calls.clone() });
        let stats = Arc::new(Stats::default());
        let queue = WorkQueue::new(
            QueueConfig {
                max_concurrency: 1,
                ..QueueConfig::default()
            },
            stats.clone(),
        );
        let workers = queue.spawn_workers(sink);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let pipeline = ConnectionPipeline::new(PipelineConfig {
                max_packet_size: 65_535,
                validate_checksum: true,
                record_format: RecordFormat::Standard,
                emit_raw_unknown_tags: true,
                idle_read_timeout: Duration::from_millis(200),
                send_incomplete_ack_probe: false,
            });
            pipeline.run(socket, queue.clone(), stats).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame).await.unwrap();
        drop(client);

        let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        for handle in workers {
            handle.abort();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn null_sink_is_a_valid_default() {
        let _sink: Arc<dyn RecordSink> = Arc::new(NullSink);
    }
}
