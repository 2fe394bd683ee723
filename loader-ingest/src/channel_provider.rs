use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use loader_db::{Channel, ChannelIoError, ChannelOpener};
use loader_retry::{Alerter, Health, SetupRetryPolicy};

use crate::channel_holder::ChannelHolder;

/// Wraps an inner `ChannelOpener` so opening never simply fails: it retries
/// forever under the unbounded setup policy, alerting and flipping process
/// health at every attempt. Because `ChannelHolder` only ever calls this
/// from inside its exclusive transition section, every concurrent `opened`
/// caller blocks on the same retry loop rather than each starting its own.
struct RetryingOpener {
    inner: Arc<dyn ChannelOpener>,
    retry: SetupRetryPolicy,
    health: Arc<Health>,
    alerter: Arc<dyn Alerter>,
}

#[async_trait]
impl ChannelOpener for RetryingOpener {
    async fn open(&self) -> Result<Box<dyn Channel>, ChannelIoError> {
        let inner = self.inner.clone();
        Ok(self
            .retry
            .run(&self.health, &self.alerter, move || {
                let inner = inner.clone();
                async move { inner.open().await }
            })
            .await)
    }
}

/// Component G: the channel provider. A thin façade over `ChannelHolder`
/// that supplies the retrying opener and exposes `opened`/`reset` to the
/// insert stage.
pub struct ChannelProvider {
    holder: ChannelHolder,
}

impl ChannelProvider {
    pub fn new(
        opener: Arc<dyn ChannelOpener>,
        retry: SetupRetryPolicy,
        health: Arc<Health>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        let retrying = Arc::new(RetryingOpener {
            inner: opener,
            retry,
            health,
            alerter,
        });
        Self {
            holder: ChannelHolder::new(retrying),
        }
    }

    pub async fn opened<F, Fut, T>(&self, f: F) -> Result<T, ChannelIoError>
    where
        F: FnOnce(Arc<dyn Channel>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.holder.opened(f).await
    }

    /// Schema evolution landed on the warehouse table; the channel must be
    /// closed and reopened before any further write can see the new
    /// columns.
    pub async fn reset(&self) {
        self.holder.closed(|| async {}).await;
    }

    pub async fn shutdown(&self) {
        self.holder.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_db::{Row, WriteResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyChannel;
    #[async_trait]
    impl Channel for FlakyChannel {
        async fn write(&self, _rows: Vec<Row>) -> Result<WriteResult, ChannelIoError> {
            Ok(WriteResult::default())
        }
        async fn close(&self) -> Result<(), ChannelIoError> {
            Ok(())
        }
    }

    struct FlakyOpener {
        fail_next: AtomicUsize,
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelOpener for FlakyOpener {
        async fn open(&self) -> Result<Box<dyn Channel>, ChannelIoError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelIoError::new("setup error"));
            }
            Ok(Box::new(FlakyChannel))
        }
    }

    #[tokio::test]
    async fn opening_retries_past_setup_failures_transparently() {
        let opens = Arc::new(AtomicUsize::new(0));
        let provider = ChannelProvider::new(
            Arc::new(FlakyOpener {
                fail_next: AtomicUsize::new(2),
                opens: opens.clone(),
            }),
            SetupRetryPolicy::new(Duration::from_millis(0)),
            Arc::new(Health::new()),
            Arc::new(loader_retry::NullAlerter),
        );

        provider
            .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
            .await
            .unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reset_forces_a_reopen_on_next_use() {
        let opens = Arc::new(AtomicUsize::new(0));
        let provider = ChannelProvider::new(
            Arc::new(FlakyOpener {
                fail_next: AtomicUsize::new(0),
                opens: opens.clone(),
            }),
            SetupRetryPolicy::new(Duration::from_millis(0)),
            Arc::new(Health::new()),
            Arc::new(loader_retry::NullAlerter),
        );

        provider
            .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
            .await
            .unwrap();
        provider.reset().await;
        provider
            .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
            .await
            .unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }
}
