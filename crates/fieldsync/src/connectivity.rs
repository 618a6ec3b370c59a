//! Connectivity monitoring.
//!
//! The coordinator asks [`ConnectivityMonitor::is_reachable_now`] at the
//! moment it needs an answer instead of trusting a flag that a background
//! network event may be about to change. Transitions are published on a
//! broadcast channel for the auto-sync task.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectivityConfig;

/// Capacity of the transition broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Overall reachability of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// The remote store can be reached.
    Online,
    /// The remote store cannot be reached.
    Offline,
}

impl Connectivity {
    /// Map a reachability flag to a state.
    #[must_use]
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Check if this is the online state.
    #[must_use]
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Source of reachability information.
///
/// Implementations fail closed: anything that prevents a definite answer
/// means "not reachable".
#[async_trait::async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    /// Perform a live reachability check.
    async fn is_reachable_now(&self) -> bool;

    /// Subscribe to online/offline transitions.
    ///
    /// Only flips are delivered. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<Connectivity>;
}

/// Edge detector shared by the monitor implementations.
#[derive(Debug)]
struct Transitions {
    /// 0 = unknown, 1 = online, 2 = offline.
    last: AtomicU8,
    tx: broadcast::Sender<Connectivity>,
}

impl Transitions {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            last: AtomicU8::new(0),
            tx,
        }
    }

    /// Record an observation; broadcast it if it differs from the last one.
    /// The first observation only seeds the state.
    fn observe(&self, state: Connectivity) {
        let encoded = if state.is_online() { 1 } else { 2 };
        let previous = self.last.swap(encoded, Ordering::SeqCst);
        if previous != 0 && previous != encoded {
            info!("Connectivity changed: {}", state);
            // No subscribers is fine.
            let _ = self.tx.send(state);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

/// Reachability reported by the embedding platform.
///
/// Mobile hosts receive network callbacks from the OS and forward them with
/// [`set_online`](Self::set_online).
#[derive(Debug)]
pub struct SignalledConnectivity {
    online: AtomicBool,
    transitions: Transitions,
}

impl SignalledConnectivity {
    /// Create a monitor with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let transitions = Transitions::new();
        transitions.observe(Connectivity::from_reachable(online));
        Self {
            online: AtomicBool::new(online),
            transitions,
        }
    }

    /// Update reachability; subscribers are notified on flips.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        self.transitions
            .observe(Connectivity::from_reachable(online));
    }
}

#[async_trait::async_trait]
impl ConnectivityMonitor for SignalledConnectivity {
    async fn is_reachable_now(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.transitions.subscribe()
    }
}

/// Reachability determined by opening a TCP connection to the backend.
#[derive(Debug)]
pub struct ProbeMonitor {
    host: String,
    port: u16,
    timeout: Duration,
    transitions: Transitions,
}

impl ProbeMonitor {
    /// Create a monitor probing `host:port`, giving up after `timeout`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            transitions: Transitions::new(),
        }
    }

    /// Create a monitor from the connectivity configuration.
    #[must_use]
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self::new(
            config.probe_host.clone(),
            config.probe_port,
            Duration::from_millis(config.probe_timeout_ms),
        )
    }

    async fn probe(&self) -> bool {
        let target = (self.host.as_str(), self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                trace!(host = %self.host, port = self.port, error = %e, "probe failed");
                false
            }
            Err(_) => {
                trace!(host = %self.host, port = self.port, "probe timed out");
                false
            }
        }
    }

    /// Probe on a fixed interval so transitions are noticed without a caller.
    ///
    /// The returned handle stops the polling task.
    #[must_use]
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let handle = MonitorHandle::new();
        let stop = handle.clone();
        let monitor = Arc::clone(self);

        debug!(
            "Polling {}:{} every {:?}",
            monitor.host, monitor.port, interval
        );
        let task = tokio::spawn(async move {
            while !stop.should_stop() {
                monitor.is_reachable_now().await;
                tokio::time::sleep(interval).await;
            }
            debug!("Connectivity polling stopped");
        });
        handle.attach(task);
        handle
    }
}

#[async_trait::async_trait]
impl ConnectivityMonitor for ProbeMonitor {
    async fn is_reachable_now(&self) -> bool {
        let reachable = self.probe().await;
        self.transitions
            .observe(Connectivity::from_reachable(reachable));
        reachable
    }

    fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.transitions.subscribe()
    }
}

/// A handle to stop a background polling task.
///
/// Cloneable; all clones share the same stop signal.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    stop_signal: Arc<AtomicBool>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl MonitorHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, task: JoinHandle<()>) {
        match self.task.lock() {
            Ok(mut slot) => *slot = Some(task),
            Err(_) => warn!("monitor handle lock poisoned; task left detached"),
        }
    }

    /// Signal the task to stop and abort it if it is sleeping.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_connectivity_display() {
        assert_eq!(Connectivity::Online.to_string(), "online");
        assert_eq!(Connectivity::Offline.to_string(), "offline");
        assert!(Connectivity::from_reachable(true).is_online());
        assert!(!Connectivity::from_reachable(false).is_online());
    }

    #[tokio::test]
    async fn test_signalled_reports_current_state() {
        let monitor = SignalledConnectivity::new(false);
        assert!(!monitor.is_reachable_now().await);

        monitor.set_online(true);
        assert!(monitor.is_reachable_now().await);
    }

    #[tokio::test]
    async fn test_signalled_broadcasts_only_flips() {
        let monitor = SignalledConnectivity::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(true);
        monitor.set_online(false);

        assert_eq!(rx.recv().await.unwrap(), Connectivity::Online);
        assert_eq!(rx.recv().await.unwrap(), Connectivity::Offline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_probe_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let monitor = ProbeMonitor::new("127.0.0.1", port, Duration::from_secs(2));
        assert!(monitor.is_reachable_now().await);
    }

    #[tokio::test]
    async fn test_probe_fails_closed_and_emits_transition() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let monitor = ProbeMonitor::new("127.0.0.1", port, Duration::from_secs(2));
        let mut rx = monitor.subscribe();

        assert!(monitor.is_reachable_now().await);
        drop(listener);
        assert!(!monitor.is_reachable_now().await);

        assert_eq!(rx.recv().await.unwrap(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn test_probe_unresolvable_host_is_unreachable() {
        let monitor = ProbeMonitor::new("host.invalid", 443, Duration::from_millis(500));
        assert!(!monitor.is_reachable_now().await);
    }

    #[tokio::test]
    async fn test_polling_broadcasts_flip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let monitor = Arc::new(ProbeMonitor::new(
            "127.0.0.1",
            port,
            Duration::from_millis(500),
        ));
        let mut rx = monitor.subscribe();
        assert!(monitor.is_reachable_now().await);

        let handle = monitor.start_polling(Duration::from_millis(10));
        drop(listener);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no transition broadcast")
            .unwrap();
        assert_eq!(event, Connectivity::Offline);

        handle.stop();
    }

    #[tokio::test]
    async fn test_polling_stops() {
        let monitor = Arc::new(ProbeMonitor::new(
            "127.0.0.1",
            9,
            Duration::from_millis(50),
        ));
        let handle = monitor.start_polling(Duration::from_millis(10));
        assert!(!handle.should_stop());

        handle.stop();
        assert!(handle.should_stop());
    }

    #[test]
    fn test_from_config() {
        let config = ConnectivityConfig::default();
        let monitor = ProbeMonitor::from_config(&config);
        assert_eq!(monitor.host, config.probe_host);
        assert_eq!(monitor.port, config.probe_port);
    }
}
