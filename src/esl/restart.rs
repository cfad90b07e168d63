//! FreeSWITCH restart detection
//!
//! A restarted FreeSWITCH behind a stable address (a proxy, a container
//! restart with connection draining) does not necessarily drop our socket.
//! Every process instance has its own `Core-UUID`, reported in heartbeat
//! events and in the `status` API event, so a changed value means the
//! process behind the connection is new.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::message::{API_COMMAND, CORE_UUID, EslEvent};

const HEARTBEAT_EVENT: &str = "HEARTBEAT";
const API_EVENT: &str = "API";
const STATUS_COMMAND: &str = "status";

/// Emitted when the observed core identity changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSignal {
    pub previous: String,
    pub current: String,
}

#[derive(Debug)]
pub struct RestartDetector {
    core_uuid: Mutex<Option<String>>,
    signals: broadcast::Sender<RestartSignal>,
}

impl Default for RestartDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartDetector {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            core_uuid: Mutex::new(None),
            signals,
        }
    }

    /// Receive a [`RestartSignal`] every time the server identity changes
    pub fn subscribe(&self) -> broadcast::Receiver<RestartSignal> {
        self.signals.subscribe()
    }

    /// Currently recorded identity, if any has been observed
    pub fn core_uuid(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Record an observed identity token.
    ///
    /// The first token is stored silently; a different token afterwards is
    /// reported and replaces the stored one.
    pub fn observe(&self, token: &str) -> Option<RestartSignal> {
        let mut current = self.lock();

        let signal = match current.as_deref() {
            Some(known) if known == token => return None,
            Some(known) => Some(RestartSignal {
                previous: known.to_string(),
                current: token.to_string(),
            }),
            None => {
                debug!(core_uuid = %token, "Recorded FreeSWITCH Core-UUID");
                None
            }
        };
        *current = Some(token.to_string());
        drop(current);

        if let Some(signal) = &signal {
            warn!(
                old_uuid = %signal.previous,
                new_uuid = %signal.current,
                "FreeSWITCH Core-UUID changed, server restarted"
            );
            // No receivers is fine: nobody is interested yet.
            let _ = self.signals.send(signal.clone());
        }
        signal
    }

    /// Feed an event; only heartbeats and `status` API events carry a usable
    /// identity.
    pub fn observe_event(&self, event: &EslEvent) -> Option<RestartSignal> {
        let token = match event.name()? {
            HEARTBEAT_EVENT => event.header(CORE_UUID)?,
            API_EVENT if event.header(API_COMMAND) == Some(STATUS_COMMAND) => {
                event.header(CORE_UUID)?
            }
            _ => return None,
        };
        self.observe(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.core_uuid
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
