//! State, timestamps and notifications shared between a connection and the
//! tasks performing its I/O.

use std::{
    sync::{
        Arc,
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use log::{error, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{
    ConnectionError,
    ConnectionEvent,
    ConnectionId,
    ConnectionObserver,
    ConnectionSettings,
    ConnectionState,
    StateCell,
    counter::OpenCount,
};

/// Point in time stored as nanoseconds after `epoch`, offset by one so that
/// zero means "never".
#[derive(Debug, Default)]
struct Stamp(AtomicU64);

impl Stamp {
    fn encode(epoch: Instant, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX - 1).saturating_add(1)
    }

    fn set(&self, epoch: Instant, at: Instant) { self.0.store(Self::encode(epoch, at), Ordering::Release); }

    /// Move forward to `at`, never backwards.
    fn advance(&self, epoch: Instant, at: Instant) {
        self.0.fetch_max(Self::encode(epoch, at), Ordering::AcqRel);
    }

    fn get(&self, epoch: Instant) -> Option<Instant> {
        self.0
            .load(Ordering::Acquire)
            .checked_sub(1)
            .and_then(|nanos| epoch.checked_add(Duration::from_nanos(nanos)))
    }
}

pub(super) struct Lifecycle {
    local_id: u64,
    server_id: OnceLock<i32>,
    state: StateCell,
    settings: ConnectionSettings,
    epoch: Instant,
    opened_at: Stamp,
    last_used_at: Stamp,
    failure: OnceLock<ConnectionError>,
    observer: Option<Arc<dyn ConnectionObserver>>,
    state_tx: watch::Sender<ConnectionState>,
    background: CancellationToken,
    open_count: OpenCount,
}

impl Lifecycle {
    pub(super) fn new(
        settings: ConnectionSettings,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Initial);
        Self {
            local_id: ConnectionId::next_local().local,
            server_id: OnceLock::new(),
            state: StateCell::new(),
            settings,
            epoch: Instant::now(),
            opened_at: Stamp::default(),
            last_used_at: Stamp::default(),
            failure: OnceLock::new(),
            observer,
            state_tx,
            background: CancellationToken::new(),
            open_count: OpenCount::default(),
        }
    }

    pub(super) fn id(&self) -> ConnectionId {
        ConnectionId {
            local: self.local_id,
            server: self.server_id.get().copied(),
        }
    }

    pub(super) fn set_server_id(&self, server: i32) {
        if self.server_id.set(server).is_err() {
            warn!("server connection id already assigned: local={}", self.local_id);
        }
    }

    pub(super) fn state(&self) -> ConnectionState { self.state.load() }

    pub(super) fn settings(&self) -> &ConnectionSettings { &self.settings }

    pub(super) fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.state_tx.subscribe() }

    pub(super) fn failure(&self) -> Option<&ConnectionError> { self.failure.get() }

    /// Token cancelled when the connection is disposed; in-flight I/O
    /// tasks stop on it and nothing else.
    pub(super) fn background(&self) -> &CancellationToken { &self.background }

    /// Reject traffic unless the handshake is running or the connection is
    /// open.
    pub(super) fn ensure_traffic(&self) -> Result<(), ConnectionError> {
        let state = self.state();
        if state.carries_traffic() {
            Ok(())
        } else {
            Err(ConnectionError::for_state(state))
        }
    }

    /// Compare-and-swap `from → to`, publishing the new state on success.
    pub(super) fn advance(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionError> {
        if !from.can_advance_to(to) {
            return Err(ConnectionError::InvalidStateTransition { from, to });
        }
        self.state.transition(from, to).map_err(|observed| {
            if observed.is_terminal() {
                ConnectionError::for_state(observed)
            } else {
                ConnectionError::InvalidStateTransition { from: observed, to }
            }
        })?;
        self.state_tx.send_replace(to);
        if to == ConnectionState::Open {
            self.open_count.mark_open();
        }
        Ok(())
    }

    pub(super) fn mark_opening(&self, at: Instant) {
        self.opened_at.set(self.epoch, at);
        self.last_used_at.set(self.epoch, at);
    }

    pub(super) fn touch(&self) { self.last_used_at.advance(self.epoch, Instant::now()); }

    pub(super) fn opened_at(&self) -> Option<Instant> { self.opened_at.get(self.epoch) }

    pub(super) fn last_used_at(&self) -> Option<Instant> { self.last_used_at.get(self.epoch) }

    pub(super) fn is_expired_at(&self, now: Instant) -> bool {
        if self.state().is_terminal() {
            return true;
        }
        let exceeded = |since: Option<Instant>, limit: Option<Duration>| match (since, limit) {
            (Some(since), Some(limit)) => since.checked_add(limit).is_some_and(|end| now > end),
            _ => false,
        };
        exceeded(self.opened_at(), self.settings.max_lifetime())
            || exceeded(self.last_used_at(), self.settings.max_idle_time())
    }

    /// Move into the failed state, notifying once.
    ///
    /// Returns `true` if this call failed the connection. Calls on a failed
    /// or disposed connection are ignored. The first recorded cause is
    /// stored before the state reads `Failed`, so a failed connection always
    /// reports one.
    pub(super) fn fail(&self, cause: ConnectionError) -> bool {
        let current = self.state();
        if current == ConnectionState::Initial {
            error!(
                "refusing to fail a connection that never opened: id={}",
                self.id()
            );
            return false;
        }
        if !current.can_fail() {
            return false;
        }
        let _ = self.failure.set(cause);
        let Ok(previous) = self.state.fail() else {
            return false;
        };
        let Some(cause) = self.failure.get() else {
            return false;
        };
        self.state_tx.send_replace(ConnectionState::Failed);
        self.open_count.mark_closed();
        crate::metrics::inc_failures();
        warn!(
            "connection failed: id={}, previous={previous}, error={cause}",
            self.id()
        );
        self.emit(&ConnectionEvent::Failed { error: cause });
        true
    }

    /// Move into the disposed state. Returns the previous state, or `None`
    /// when already disposed.
    pub(super) fn dispose(&self) -> Option<ConnectionState> {
        let previous = self.state.dispose()?;
        self.state_tx.send_replace(ConnectionState::Disposed);
        self.open_count.mark_closed();
        self.background.cancel();
        Some(previous)
    }

    /// Time since the connection started opening.
    pub(super) fn age(&self) -> Duration {
        self.opened_at()
            .map_or(Duration::ZERO, |opened| opened.elapsed())
    }

    pub(super) fn emit(&self, event: &ConnectionEvent<'_>) {
        if let Some(observer) = &self.observer {
            observer.on_event(self.id(), event);
        }
    }
}
