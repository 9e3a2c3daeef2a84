//! Observer that records event names for later assertions.

use std::sync::Mutex;

use wiremux::connection::{ConnectionEvent, ConnectionId, ConnectionObserver};

/// Records the name of every [`ConnectionEvent`] it sees, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    /// Names of all recorded events.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder of the lock panicked.
    #[must_use]
    pub fn events(&self) -> Vec<String> { self.events.lock().expect("observer poisoned").clone() }

    /// Number of recorded events named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|event| *event == name).count()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_event(&self, _connection: ConnectionId, event: &ConnectionEvent<'_>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.to_string());
        }
    }
}
