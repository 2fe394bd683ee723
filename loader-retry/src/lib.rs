pub mod alert;
pub mod health;
pub mod retry;

pub use alert::{Alert, Alerter, NullAlerter, Severity, WebhookAlerter, WebhookError, WebhookTransport};
pub use health::{Health, HealthProbe, HealthState};
pub use retry::{AttemptsExhausted, SetupRetryPolicy, TransientRetryPolicy};
