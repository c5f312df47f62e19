//! Authentication events.
//!
//! Handlers publish on a broadcast channel; any number of listeners may
//! subscribe. The default listener only logs.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    Success { plugin: String, form: String },
    Failure { plugin: String, form: String, reason: String },
    Logout { plugin: String },
    CoSign { plugin: String, submission: Uuid },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    /// Publish `event`; having no listeners is fine.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.sender.send(event);
    }

    /// Spawn a task that logs every event.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(AuthEvent::Success { plugin, form }) => {
                        info!(%plugin, %form, "authentication succeeded");
                    }
                    Ok(AuthEvent::Failure { plugin, form, reason }) => {
                        warn!(%plugin, %form, %reason, "authentication failed");
                    }
                    Ok(AuthEvent::Logout { plugin }) => info!(%plugin, "logged out"),
                    Ok(AuthEvent::CoSign { plugin, submission }) => {
                        info!(%plugin, %submission, "submission co-signed");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("event logger lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
