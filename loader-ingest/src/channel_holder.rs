use std::future::Future;
use std::sync::Arc;

use loader_db::{Channel, ChannelIoError, ChannelOpener};
use log::debug;
use tokio::sync::{Mutex, Semaphore};

/// Large enough that no real deployment ever has this many concurrent
/// `opened()` callers, small enough that `acquire_many_owned` doesn't
/// overflow (cap is `Semaphore::MAX_PERMITS`, `usize::MAX >> 3`).
const PERMITS: u32 = 1 << 20;

enum State {
    Closed,
    Open(Arc<dyn Channel>),
}

/// The cold-swap single-slot channel resource. At most one
/// `Channel` exists at a time; opening and closing it are mutually
/// exclusive with every in-flight write, enforced by a semaphore where
/// holding one permit means "shared/opened" and holding all of them means
/// "exclusive/transitioning".
///
/// `opener` already carries its own retry policy (see
/// `channel_provider::RetryingOpener`): concurrent callers racing to open a
/// closed channel all block on the same semaphore, so in effect they share
/// a single retry schedule without extra
/// machinery here.
pub struct ChannelHolder {
    semaphore: Arc<Semaphore>,
    state: Mutex<State>,
    opener: Arc<dyn ChannelOpener>,
}

impl ChannelHolder {
    pub fn new(opener: Arc<dyn ChannelOpener>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(PERMITS as usize)),
            state: Mutex::new(State::Closed),
            opener,
        }
    }

    /// Runs `f` against a guaranteed-open channel, opening one first if
    /// necessary. A caller that currently holds `opened` must not call
    /// `closed` from the same execution context — doing so deadlocks
    /// against itself, never against another caller.
    pub async fn opened<F, Fut, T>(&self, f: F) -> Result<T, ChannelIoError>
    where
        F: FnOnce(Arc<dyn Channel>) -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("channel semaphore is never closed");

            let existing = {
                let state = self.state.lock().await;
                match &*state {
                    State::Open(channel) => Some(channel.clone()),
                    State::Closed => None,
                }
            };

            if let Some(channel) = existing {
                let result = f(channel).await;
                drop(permit);
                return Ok(result);
            }

            drop(permit);
            self.transition_to_open().await?;
            // Loop back: another caller may win the exclusive section first,
            // but either way the channel is now observably open.
        }
    }

    /// Runs `f` with the guarantee that no channel is open for its
    /// duration, closing one first if necessary.
    pub async fn closed<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("channel semaphore is never closed");

            let is_closed = matches!(&*self.state.lock().await, State::Closed);
            if is_closed {
                let result = f().await;
                drop(permit);
                return result;
            }

            drop(permit);
            self.transition_to_closed().await;
        }
    }

    /// Closes any open channel. Called once, during graceful shutdown —
    /// `Drop` cannot run the async `Channel::close` call itself.
    pub async fn shutdown(&self) {
        self.closed(|| async {}).await;
    }

    async fn transition_to_open(&self) -> Result<(), ChannelIoError> {
        let all_permits = self
            .semaphore
            .clone()
            .acquire_many_owned(PERMITS)
            .await
            .expect("channel semaphore is never closed");

        let mut state = self.state.lock().await;
        if matches!(&*state, State::Closed) {
            let opener = self.opener.clone();
            debug!("opening channel");
            // Spawned so a cancelled caller can never abort a transition
            // already under way ("deferred until completion").
            let channel = tokio::spawn(async move { opener.open().await })
                .await
                .expect("channel open task panicked")?;
            *state = State::Open(Arc::from(channel));
        }
        drop(state);
        drop(all_permits);
        Ok(())
    }

    async fn transition_to_closed(&self) {
        let all_permits = self
            .semaphore
            .clone()
            .acquire_many_owned(PERMITS)
            .await
            .expect("channel semaphore is never closed");

        let mut state = self.state.lock().await;
        if let State::Open(channel) = &*state {
            let channel = channel.clone();
            debug!("closing channel");
            let _ = tokio::spawn(async move { channel.close().await }).await;
            *state = State::Closed;
        }
        drop(state);
        drop(all_permits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loader_db::{Row, WriteResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        writes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for CountingChannel {
        async fn write(&self, _rows: Vec<Row>) -> Result<WriteResult, ChannelIoError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(WriteResult::default())
        }

        async fn close(&self) -> Result<(), ChannelIoError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingOpener {
        opens: Arc<AtomicUsize>,
        writes: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelOpener for CountingOpener {
        async fn open(&self) -> Result<Box<dyn Channel>, ChannelIoError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingChannel {
                writes: self.writes.clone(),
                closes: self.closes.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn opens_once_and_reuses_across_calls() {
        let opens = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let holder = ChannelHolder::new(Arc::new(CountingOpener {
            opens: opens.clone(),
            writes: writes.clone(),
            closes: closes.clone(),
        }));

        for _ in 0..5 {
            holder
                .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
                .await
                .unwrap();
        }

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn closed_then_opened_reopens() {
        let opens = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let holder = ChannelHolder::new(Arc::new(CountingOpener {
            opens: opens.clone(),
            writes: writes.clone(),
            closes: closes.clone(),
        }));

        holder
            .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
            .await
            .unwrap();
        holder.closed(|| async {}).await;
        holder
            .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
            .await
            .unwrap();

        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_openers_converge_on_a_single_open_call() {
        let opens = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let holder = Arc::new(ChannelHolder::new(Arc::new(CountingOpener {
            opens: opens.clone(),
            writes: writes.clone(),
            closes: closes.clone(),
        })));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let holder = holder.clone();
            handles.push(tokio::spawn(async move {
                holder
                    .opened(|channel| async move { channel.write(vec![]).await.unwrap() })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(writes.load(Ordering::SeqCst), 16);
    }
}
