//! Stream supervision and staleness watchdog
//!
//! The transport state machine is shared between the WebSocket task and
//! the depth apply loop: only `Streaming` permits diffs to be applied, and
//! reconnect requests while already `Reconnecting` are no-ops. The
//! watchdog runs after every apply-loop iteration (including timeouts) and
//! asserts the engine-wide `paused` flag whenever the book can no longer
//! be trusted. Consumers must treat paused as "do not trade".

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Transport lifecycle. Diffs are only applied in `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Connecting = 1,
    Streaming = 2,
    Reconnecting = 3,
    Terminated = 4,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => StreamState::Idle,
            1 => StreamState::Connecting,
            2 => StreamState::Streaming,
            3 => StreamState::Reconnecting,
            _ => StreamState::Terminated,
        }
    }
}

/// Shared handle between the WebSocket task (which drives the state) and
/// the supervisor (which requests reconnects and waits for recovery).
#[derive(Debug, Default)]
pub struct StreamLink {
    state: AtomicU8,
    changed: Notify,
}

impl StreamLink {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Idle as u8),
            changed: Notify::new(),
        }
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
        self.changed.notify_waiters();
    }

    /// Ask the WebSocket task to drop its connection and redial. Returns
    /// false (no-op) when already reconnecting or terminated.
    pub fn request_reconnect(&self) -> bool {
        let current = self.state();
        if matches!(current, StreamState::Reconnecting | StreamState::Terminated) {
            return false;
        }
        info!(?current, "Requesting transport reconnect");
        self.set_state(StreamState::Reconnecting);
        true
    }

    /// Wait until the predicate holds for the current state.
    pub async fn wait_for(&self, pred: impl Fn(StreamState) -> bool) -> StreamState {
        loop {
            let notified = self.changed.notified();
            let state = self.state();
            if pred(state) {
                return state;
            }
            notified.await;
        }
    }

    /// Block until the transport is streaming again (or terminated, so
    /// shutdown never deadlocks here).
    pub async fn wait_for_streaming(&self) -> StreamState {
        self.wait_for(|s| matches!(s, StreamState::Streaming | StreamState::Terminated))
            .await
    }
}

/// Watchdog over the depth apply loop.
pub struct Supervisor {
    paused: Arc<AtomicBool>,
    staleness: Duration,
    link: Arc<StreamLink>,
}

impl Supervisor {
    pub fn new(staleness_threshold_ms: u64, link: Arc<StreamLink>) -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(true)),
            staleness: Duration::from_millis(staleness_threshold_ms),
            link,
        }
    }

    /// Engine-wide health flag, shared with the signal detector so that
    /// signals produced from untrusted data are suppressed.
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self, reason: &str) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            warn!(reason, "Pausing: book data is untrustworthy");
        }
    }

    /// Called after each successfully applied diff.
    pub fn mark_recovered(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("Depth stream healthy again, resuming");
        }
    }

    /// Run the staleness / transport check for one loop iteration. When
    /// the book is stale or the transport left `Streaming`, pauses,
    /// requests a reconnect, and blocks until the transport recovers.
    /// Returns true when it intervened.
    pub async fn check(&self, last_applied: Option<Instant>) -> bool {
        let stale = match last_applied {
            Some(at) => at.elapsed() > self.staleness,
            None => true,
        };
        let state = self.link.state();

        if !stale && state == StreamState::Streaming {
            return false;
        }

        self.pause(if stale { "book staleness" } else { "transport not streaming" });
        self.link.request_reconnect();
        self.link.wait_for_streaming().await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_request_is_idempotent() {
        let link = StreamLink::new();
        link.set_state(StreamState::Streaming);

        assert!(link.request_reconnect());
        assert_eq!(link.state(), StreamState::Reconnecting);
        // A second request while reconnecting is a no-op.
        assert!(!link.request_reconnect());
    }

    #[test]
    fn test_terminated_refuses_reconnect() {
        let link = StreamLink::new();
        link.set_state(StreamState::Terminated);
        assert!(!link.request_reconnect());
        assert_eq!(link.state(), StreamState::Terminated);
    }

    #[tokio::test]
    async fn test_wait_for_streaming_wakes_on_transition() {
        let link = Arc::new(StreamLink::new());
        link.set_state(StreamState::Reconnecting);

        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.wait_for_streaming().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        link.set_state(StreamState::Streaming);
        assert_eq!(waiter.await.unwrap(), StreamState::Streaming);
    }

    #[tokio::test]
    async fn test_staleness_pauses_and_waits_for_recovery() {
        let link = Arc::new(StreamLink::new());
        link.set_state(StreamState::Streaming);
        let supervisor = Supervisor::new(500, Arc::clone(&link));

        // Flip back to streaming shortly after the reconnect request.
        let flipper = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                link.wait_for(|s| s == StreamState::Reconnecting).await;
                link.set_state(StreamState::Streaming);
            })
        };

        let stale_at = Instant::now() - Duration::from_millis(600);
        assert!(supervisor.check(Some(stale_at)).await);
        assert!(supervisor.is_paused());
        flipper.await.unwrap();

        // Next applied diff clears the pause.
        supervisor.mark_recovered();
        assert!(!supervisor.is_paused());
    }

    #[tokio::test]
    async fn test_fresh_book_passes_check() {
        let link = Arc::new(StreamLink::new());
        link.set_state(StreamState::Streaming);
        let supervisor = Supervisor::new(500, Arc::clone(&link));

        assert!(!supervisor.check(Some(Instant::now())).await);
    }
}
