use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
#[error("dead-letter sink failed: {0}")]
pub struct DeadLetterError(pub String);

/// The dead-letter destination (component out of scope beyond this write
/// contract). Bad rows already carry their own retry/backoff inside the
/// concrete sink; the pipeline only logs and moves on when this fails.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn sink_simple(&self, payloads: Vec<Vec<u8>>) -> Result<(), DeadLetterError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMetrics {
    pub good: usize,
    pub bad: usize,
    pub original: usize,
}

/// Per-batch counters (component out of scope beyond this contract). A
/// concrete implementation forwards these to a statsd client.
pub trait MetricsCollector: Send + Sync {
    fn record_batch(&self, metrics: BatchMetrics);
}

/// Out-of-band crash reporting (e.g. Sentry), invoked once before the
/// process exits on a fatal error.
pub trait CrashReporter: Send + Sync {
    fn report(&self, error: &(dyn std::error::Error + 'static));
}

/// A `CrashReporter` that does nothing, for deployments with
/// `monitoring.sentry.dsn` unset.
pub struct NullCrashReporter;

impl CrashReporter for NullCrashReporter {
    fn report(&self, _error: &(dyn std::error::Error + 'static)) {}
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingDeadLetterSink {
        pub sunk: Mutex<Vec<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingDeadLetterSink {
        async fn sink_simple(&self, payloads: Vec<Vec<u8>>) -> Result<(), DeadLetterError> {
            self.sunk.lock().unwrap().push(payloads);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingMetricsCollector {
        pub batches: Mutex<Vec<BatchMetrics>>,
    }

    impl MetricsCollector for RecordingMetricsCollector {
        fn record_batch(&self, metrics: BatchMetrics) {
            self.batches.lock().unwrap().push(metrics);
        }
    }
}
