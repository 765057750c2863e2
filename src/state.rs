use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

/// How often the idle monitor re-checks the connection counters.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared view of the relay's active sessions, driven by the session open and
/// close paths and read by the idle-shutdown monitor.
///
/// The mutex is synchronous and never held across an `await`, so open/close
/// updates cannot interleave with each other or with monitor reads.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Mutex<ConnectionState>>,
}

#[derive(Default)]
struct ConnectionState {
    active: usize,
    ever_connected: bool,
    last_disconnect: Option<Instant>,
}

impl ConnectionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        let mut state = self.inner.lock().expect("connection state poisoned");
        state.active += 1;
        state.ever_connected = true;
    }

    pub fn session_closed(&self) {
        let mut state = self.inner.lock().expect("connection state poisoned");
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            state.last_disconnect = Some(Instant::now());
        }
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.lock().expect("connection state poisoned").active
    }

    /// Instant of the last transition to zero sessions, if the relay is
    /// currently idle after having served at least one session.
    fn idle_since(&self) -> Option<Instant> {
        let state = self.inner.lock().expect("connection state poisoned");
        if state.ever_connected && state.active == 0 {
            state.last_disconnect
        } else {
            None
        }
    }

    fn ever_connected(&self) -> bool {
        self.inner
            .lock()
            .expect("connection state poisoned")
            .ever_connected
    }

    /// Resolves once the relay is allowed to shut down automatically: the last
    /// session has been closed for at least `grace`, or (when set) no session
    /// at all arrived within `first_connection_timeout`.
    ///
    /// Polls once per second so callers can race it against other shutdown
    /// triggers such as a terminal read.
    pub async fn idle_shutdown(
        &self,
        grace: Duration,
        first_connection_timeout: Option<Duration>,
    ) {
        let started = Instant::now();
        loop {
            sleep(POLL_INTERVAL).await;

            if let Some(since) = self.idle_since() {
                if since.elapsed() >= grace {
                    info!(
                        idle_secs = since.elapsed().as_secs(),
                        "All console sessions closed, shutting down"
                    );
                    return;
                }
            } else if !self.ever_connected() {
                if let Some(timeout) = first_connection_timeout {
                    if started.elapsed() >= timeout {
                        warn!(
                            waited_secs = started.elapsed().as_secs(),
                            "No console connection arrived, shutting down"
                        );
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const GRACE: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn does_not_exit_before_first_connection() {
        let tracker = ConnectionTracker::new();
        let result = timeout(Duration::from_secs(3600), tracker.idle_shutdown(GRACE, None)).await;
        assert!(result.is_err(), "must wait indefinitely without a timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn first_connection_timeout_bounds_the_wait() {
        let tracker = ConnectionTracker::new();
        let start = Instant::now();
        tracker
            .idle_shutdown(GRACE, Some(Duration::from_secs(120)))
            .await;
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert!(start.elapsed() < Duration::from_secs(125));
    }

    #[tokio::test(start_paused = true)]
    async fn exits_only_after_grace_period() {
        let tracker = ConnectionTracker::new();
        tracker.session_opened();
        tracker.session_closed();

        let start = Instant::now();
        tracker.idle_shutdown(GRACE, None).await;
        assert!(start.elapsed() >= GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn stays_alive_while_a_session_is_active() {
        let tracker = ConnectionTracker::new();
        tracker.session_opened();

        let result = timeout(Duration::from_secs(3600), tracker.idle_shutdown(GRACE, None)).await;
        assert!(result.is_err(), "must not exit with an active session");
        assert_eq!(tracker.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_resets_the_idle_clock() {
        let tracker = ConnectionTracker::new();
        tracker.session_opened();
        tracker.session_closed();

        let monitor = tracker.clone();
        let start = Instant::now();
        let handle = tokio::spawn(async move { monitor.idle_shutdown(GRACE, None).await });

        // Reconnect before the grace period elapses, hold the session open for
        // a while, then drop it again.
        sleep(Duration::from_secs(3)).await;
        tracker.session_opened();
        sleep(Duration::from_secs(10)).await;
        tracker.session_closed();

        handle.await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sessions_keep_the_relay_alive() {
        let tracker = ConnectionTracker::new();
        tracker.session_opened();
        tracker.session_opened();
        tracker.session_closed();
        assert_eq!(tracker.active_sessions(), 1);

        let result = timeout(Duration::from_secs(60), tracker.idle_shutdown(GRACE, None)).await;
        assert!(result.is_err(), "one session is still open");

        tracker.session_closed();
        tracker.idle_shutdown(GRACE, None).await;
    }
}
