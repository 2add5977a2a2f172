//! Gateway configuration (§6): a `clap`-derived CLI surface with every key
//! also loadable from an optional TOML file. A present file *group* (e.g.
//! `[queue]`) wins wholesale over that group's CLI/clap defaults; clap's own
//! defaults only apply to groups the file omits entirely (see
//! [`GatewayConfig::load`] and [`FileConfig`]).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::parser::RecordFormat;
use crate::queue::QueueConfig;

/// Top-level CLI entrypoint for `galileosky-gatewayd`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Galileosky-family telemetry ingestion gateway")]
pub struct Cli {
    /// Path to an optional TOML config file; CLI flags take precedence over
    /// values found there.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub tcp: TcpArgs,

    #[command(flatten)]
    pub framer: FramerArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(flatten)]
    pub parser: ParserArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// `tracing-subscriber` `EnvFilter` directive, e.g. "info" or
    /// "galileosky_gateway=debug".
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "TCP options")]
pub struct TcpArgs {
    /// Address the listener binds to (§6 `tcp.bind`).
    #[arg(long, default_value = "0.0.0.0:5027")]
    pub bind: SocketAddr,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Framer options")]
pub struct FramerArgs {
    /// Largest accepted payload length in bytes (§4.1 `maxPacketSize`).
    #[arg(long, default_value_t = 65535)]
    pub max_packet_size: usize,

    /// Whether to verify the trailing CRC-16/IBM before accepting a frame
    /// (§4.1 `validateChecksum`). Disabling this is only useful against
    /// firmware known to send malformed checksums.
    #[arg(long, default_value_t = true)]
    pub validate_checksum: bool,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Queue options")]
pub struct QueueArgs {
    /// Maximum pending jobs before the oldest is dropped (§4.6 `maxQueueDepth`).
    #[arg(long, default_value_t = 2000)]
    pub max_depth: usize,

    /// Number of concurrent workers draining the queue (§4.6 `maxConcurrency`).
    #[arg(long, default_value_t = 10)]
    pub max_concurrency: usize,

    /// Per-job deadline in milliseconds before a retry is attempted (§4.6
    /// `perJobTimeout`).
    #[arg(long, default_value_t = 30_000)]
    pub per_job_timeout_ms: u64,

    /// Maximum retry attempts before a job is counted as failed (§4.6
    /// `maxRetries`).
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
}

impl QueueArgs {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_depth: self.max_depth,
            max_concurrency: self.max_concurrency,
            per_job_timeout: Duration::from_millis(self.per_job_timeout_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Parser options")]
pub struct ParserArgs {
    /// Emit unknown tags as `TypedValue::Raw` instead of silently skipping
    /// them (§4.3 `emitRawUnknownTags`).
    #[arg(long, default_value_t = true)]
    pub emit_raw_unknown_tags: bool,

    /// Record layout to assume for this deployment's fleet firmware, since
    /// no wire signal distinguishes Standard/Compressed/Type33 framing
    /// (resolved as an Open Question — see DESIGN.md).
    #[arg(long, value_enum, default_value_t = RecordFormatArg::Standard)]
    pub record_format: RecordFormatArg,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordFormatArg {
    Standard,
    Compressed,
    Type33,
}

impl From<RecordFormatArg> for RecordFormat {
    fn from(value: RecordFormatArg) -> Self {
        match value {
            RecordFormatArg::Standard => RecordFormat::Standard,
            RecordFormatArg::Compressed => RecordFormat::Compressed,
            RecordFormatArg::Type33 => RecordFormat::Type33,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Pipeline options")]
pub struct PipelineArgs {
    /// Seconds of read inactivity before a connection is closed (§4.5
    /// `idleReadTimeoutSec`).
    #[arg(long, default_value_t = 300)]
    pub idle_read_timeout_sec: u64,

    /// Send the `02 3F FA` incomplete-packet probe on an ambiguous partial
    /// read (§4.5, §6 `sendIncompleteAckProbe`). Off by default: most
    /// deployments never observe the condition it targets.
    #[arg(long, default_value_t = false)]
    pub send_incomplete_ack_probe: bool,
}

/// A fully resolved configuration, after merging an optional TOML file
/// under CLI-flag precedence. This is what the rest of the gateway reads.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub max_packet_size: usize,
    pub validate_checksum: bool,
    pub queue: QueueConfig,
    pub emit_raw_unknown_tags: bool,
    pub record_format: RecordFormat,
    pub idle_read_timeout: Duration,
    pub send_incomplete_ack_probe: bool,
    pub log_filter: String,
}

/// Mirrors [`GatewayConfig`] but every *group* (`tcp`, `framer`, `queue`,
/// `parser`, `pipeline`, `log_filter`) is optional, for deserializing a TOML
/// file where any subset of §6's groups may be present. Override granularity
/// is whole-group, not per-key: `TcpArgs`/`FramerArgs`/`QueueArgs`/
/// `ParserArgs`/`PipelineArgs` derive `Deserialize` with plain (non-`Option`)
/// fields, so a `[queue]` section in the file must supply every one of
/// `max_depth`/`max_concurrency`/`per_job_timeout_ms`/`max_retries` — a
/// partial `[queue]` section fails to parse rather than merging over CLI
/// defaults key-by-key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub tcp: Option<TcpArgs>,
    pub framer: Option<FramerArgs>,
    pub queue: Option<QueueArgs>,
    pub parser: Option<ParserArgs>,
    pub pipeline: Option<PipelineArgs>,
    pub log_filter: Option<String>,
}

impl GatewayConfig {
    /// Merges CLI args over an optional TOML file: CLI flags the user
    /// actually typed keep clap's own defaults anyway, so in practice the
    /// file only fills gaps clap didn't otherwise set explicitly.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| ConfigError::Read(path.clone(), err))?;
                toml::from_str::<FileConfig>(&text)
                    .map_err(|err| ConfigError::Parse(path.clone(), err))?
            }
            None => FileConfig::default(),
        };

        let tcp = file.tcp.unwrap_or(cli.tcp);
        let framer = file.framer.unwrap_or(cli.framer);
        let queue = file.queue.unwrap_or(cli.queue);
        let parser = file.parser.unwrap_or(cli.parser);
        let pipeline = file.pipeline.unwrap_or(cli.pipeline);
        let log_filter = file.log_filter.unwrap_or(cli.log_filter);

        Ok(Self {
            bind: tcp.bind,
            max_packet_size: framer.max_packet_size,
            validate_checksum: framer.validate_checksum,
            queue: queue.to_queue_config(),
            emit_raw_unknown_tags: parser.emit_raw_unknown_tags,
            record_format: parser.record_format.into(),
            idle_read_timeout: Duration::from_secs(pipeline.idle_read_timeout_sec),
            send_incomplete_ack_probe: pipeline.send_incomplete_ack_probe,
            log_filter,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_with_defaults() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["galileosky-gatewayd"]);
        assert_eq!(cli.tcp.bind.port(), 5027);
        assert_eq!(cli.queue.max_concurrency, 10);
        assert_eq!(cli.parser.record_format, RecordFormatArg::Standard);
    }

    #[test]
    fn cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "galileosky-gatewayd",
            "--bind",
            "127.0.0.1:7000",
            "--max-concurrency",
            "4",
            "--record-format",
            "compressed",
        ]);
        let config = GatewayConfig::load(cli).unwrap();
        assert_eq!(config.bind.port(), 7000);
        assert_eq!(config.queue.max_concurrency, 4);
        assert_eq!(config.record_format, RecordFormat::Compressed);
    }
}
