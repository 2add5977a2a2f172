//! Sink Facade (§4.7): the narrow contract downstream persistence,
//! fan-out, and alerting are reached through. Only `persist` failures
//! count toward Work Queue retries; `broadcast` and `evaluate_alerts`
//! failures are logged but the job is still considered successful.

use async_trait::async_trait;

use crate::record::Record;

/// Downstream collaborator consumed by Work Queue workers. Database
/// schema, WebSocket fan-out, and alert rules are external and reached
/// only through this trait (§1 Non-goals, §4.7).
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persists a decoded record. Idempotent by `(imei, timestamp,
    /// recordNumber)` (§6) — duplicates are not errors.
    async fn persist(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError>;

    /// Best-effort fan-out to live subscribers.
    async fn broadcast(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError>;

    /// Best-effort alert-rule evaluation.
    async fn evaluate_alerts(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A `RecordSink` that discards everything. Useful as a default for tests
/// and as a documented extension point for embedding a real sink.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl RecordSink for NullSink {
    async fn persist(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError> {
        tracing::debug!(imei = ?imei, tags = record.len(), "null sink: persist");
        Ok(())
    }

    async fn broadcast(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError> {
        tracing::trace!(imei = ?imei, tags = record.len(), "null sink: broadcast");
        Ok(())
    }

    async fn evaluate_alerts(&self, imei: Option<&str>, record: &Record) -> Result<(), SinkError> {
        tracing::trace!(imei = ?imei, tags = record.len(), "null sink: evaluate_alerts");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn null_sink_always_succeeds() {
        let sink = NullSink;
        let record = Record::new();
        assert!(sink.persist(Some("123"), &record).await.is_ok());
        assert!(sink.broadcast(None, &record).await.is_ok());
        assert!(sink.evaluate_alerts(None, &record).await.is_ok());
    }
}
