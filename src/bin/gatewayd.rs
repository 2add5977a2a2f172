//! Binary entrypoint: parses [`GatewayConfig`], binds the listener, and
//! spawns one [`ConnectionPipeline`] task per accepted socket against a
//! shared [`WorkQueue`] and [`Stats`].

use std::sync::Arc;

use clap::Parser;
use galileosky_gateway::config::{Cli, GatewayConfig};
use galileosky_gateway::pipeline::{ConnectionPipeline, PipelineConfig};
use galileosky_gateway::queue::WorkQueue;
use galileosky_gateway::sink::NullSink;
use galileosky_gateway::stats::Stats;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(cli).unwrap_or_else(|err| {
        eprintln!("failed to load configuration: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter.clone())
        .init();

    tracing::info!(bind = %config.bind, "galileosky-gatewayd starting");

    let stats = Arc::new(Stats::default());
    // TODO(sink-wiring): swap NullSink for a real persistence/broadcast/alert
    // sink once one exists; the queue and pipeline are already wired against
    // the trait object so this is a one-line change.
    let sink: Arc<dyn galileosky_gateway::sink::RecordSink> = Arc::new(NullSink);

    let queue = WorkQueue::new(config.queue, stats.clone());
    let workers = queue.spawn_workers(sink);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(bind = %config.bind, "listening");

    let pipeline_config = PipelineConfig {
        max_packet_size: config.max_packet_size,
        validate_checksum: config.validate_checksum,
        record_format: config.record_format,
        emit_raw_unknown_tags: config.emit_raw_unknown_tags,
        idle_read_timeout: config.idle_read_timeout,
        send_incomplete_ack_probe: config.send_incomplete_ack_probe,
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                tracing::debug!(%peer, "connection accepted");
                let queue = queue.clone();
                let stats = stats.clone();
                let pipeline = ConnectionPipeline::new(pipeline_config);
                tokio::spawn(async move {
                    if let Err(err) = pipeline.run(socket, queue, stats).await {
                        tracing::debug!(%peer, error = %err, "connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, draining work queue");
                queue.shutdown();
                break;
            }
        }
    }

    for handle in workers {
        let _ = handle.await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}
