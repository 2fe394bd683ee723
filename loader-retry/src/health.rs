use tokio::sync::watch;

/// Two-state liveness flag, starting Unhealthy until the first successful
/// setup operation (table initialisation, channel open, ...) flips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}

/// Lock-free cell (a `tokio::sync::watch` channel) observers can snapshot.
/// Last writer wins; there is no fairness guarantee between concurrent
/// writers racing to flip the state.
pub struct Health {
    tx: watch::Sender<HealthState>,
}

impl Health {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HealthState::Unhealthy {
            reason: "starting up".to_string(),
        });
        Self { tx }
    }

    pub fn set_healthy(&self) {
        self.tx.send_if_modified(|s| {
            let changed = !s.is_healthy();
            *s = HealthState::Healthy;
            changed
        });
    }

    pub fn set_unhealthy(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_modify(|s| {
            *s = HealthState::Unhealthy { reason };
        });
    }

    /// A cheap, cloneable handle a liveness probe can poll.
    pub fn probe(&self) -> HealthProbe {
        HealthProbe(self.tx.subscribe())
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct HealthProbe(watch::Receiver<HealthState>);

impl HealthProbe {
    pub fn snapshot(&self) -> HealthState {
        self.0.borrow().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.snapshot().is_healthy()
    }
}
