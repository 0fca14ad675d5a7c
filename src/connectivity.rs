//! Network reachability tracking.
//!
//! The current state is published through a `watch` channel: readers take a
//! snapshot with `is_connected()` or subscribe to transitions. State can
//! change at any time relative to in-flight work, so readers must not assume
//! it stays fixed across an operation.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Floor for the probe period; `tokio::time::interval` rejects zero
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

struct Inner {
  tx: watch::Sender<bool>,
  cancel: CancellationToken,
}

impl Drop for Inner {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Shared connectivity state. Clones observe the same state; the probe (if
/// any) stops when the last clone is dropped.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  inner: Arc<Inner>,
}

impl ConnectivityMonitor {
  /// A monitor driven only through `set_connected`.
  pub fn manual(initial: bool) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self {
      inner: Arc::new(Inner {
        tx,
        cancel: CancellationToken::new(),
      }),
    }
  }

  /// Start optimistic and probe `host:port` with a TCP connect every
  /// `interval`. Must be called from within a Tokio runtime.
  pub fn spawn_probe(host: String, port: u16, interval: Duration, timeout: Duration) -> Self {
    let monitor = Self::manual(true);
    let weak = Arc::downgrade(&monitor.inner);
    let cancel = monitor.inner.cancel.clone();

    tokio::spawn(run_probe(weak, cancel, host, port, interval, timeout));

    monitor
  }

  pub fn is_connected(&self) -> bool {
    *self.inner.tx.borrow()
  }

  /// Receiver notified on every transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.inner.tx.subscribe()
  }

  /// Record a new state. Subscribers are only woken on an actual change.
  pub fn set_connected(&self, connected: bool) {
    set_state(&self.inner.tx, connected);
  }

  /// Stop the background probe. The last observed state is kept.
  pub fn shutdown(&self) {
    self.inner.cancel.cancel();
  }
}

fn set_state(tx: &watch::Sender<bool>, connected: bool) {
  let changed = tx.send_if_modified(|current| {
    if *current == connected {
      false
    } else {
      *current = connected;
      true
    }
  });

  if changed {
    if connected {
      tracing::info!("network reachable");
    } else {
      tracing::warn!("network unreachable, serving cached data");
    }
  }
}

async fn run_probe(
  monitor: Weak<Inner>,
  cancel: CancellationToken,
  host: String,
  port: u16,
  interval: Duration,
  timeout: Duration,
) {
  tracing::debug!(
    host = %host,
    port,
    interval_secs = interval.as_secs(),
    "connectivity probe started"
  );

  let mut ticker = tokio::time::interval(interval.max(MIN_PROBE_INTERVAL));
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        tracing::debug!("connectivity probe stopping");
        break;
      }
      _ = ticker.tick() => {
        let reachable = probe(&host, port, timeout).await;
        match monitor.upgrade() {
          Some(inner) => set_state(&inner.tx, reachable),
          None => break,
        }
      }
    }
  }
}

/// Whether a TCP connection to `host:port` succeeds within `timeout`.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
  matches!(
    tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
    Ok(Ok(_))
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  #[tokio::test]
  async fn test_manual_transitions_notify_subscribers() {
    let monitor = ConnectivityMonitor::manual(true);
    let mut rx = monitor.subscribe();

    monitor.set_connected(true);
    assert!(!rx.has_changed().unwrap());

    monitor.set_connected(false);
    assert!(rx.has_changed().unwrap());
    assert!(!*rx.borrow_and_update());
    assert!(!monitor.is_connected());

    let clone = monitor.clone();
    clone.set_connected(true);
    assert!(monitor.is_connected());
  }

  #[tokio::test]
  async fn test_probe_detects_unreachable_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let monitor = ConnectivityMonitor::spawn_probe(
      "127.0.0.1".to_string(),
      port,
      Duration::from_millis(20),
      Duration::from_millis(200),
    );
    assert!(monitor.is_connected());

    let mut rx = monitor.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|c| !*c))
      .await
      .expect("probe should report offline")
      .unwrap();
  }

  #[tokio::test]
  async fn test_probe_keeps_reachable_host_online() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let monitor = ConnectivityMonitor::spawn_probe(
      "127.0.0.1".to_string(),
      port,
      Duration::from_millis(20),
      Duration::from_millis(200),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(monitor.is_connected());
  }

  #[tokio::test]
  async fn test_zero_interval_keeps_probing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let monitor = ConnectivityMonitor::spawn_probe(
      "127.0.0.1".to_string(),
      port,
      Duration::ZERO,
      Duration::from_millis(200),
    );
    let mut rx = monitor.subscribe();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(monitor.is_connected());

    // Transitions after startup are still observed
    drop(listener);
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|c| !*c))
      .await
      .expect("probe should still be running")
      .unwrap();
  }

  #[tokio::test]
  async fn test_dropping_monitor_closes_channel() {
    let monitor = ConnectivityMonitor::spawn_probe(
      "127.0.0.1".to_string(),
      9,
      Duration::from_secs(60),
      Duration::from_millis(50),
    );
    let mut rx = monitor.subscribe();
    drop(monitor);

    let closed = tokio::time::timeout(Duration::from_secs(1), async {
      while rx.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok());
  }
}
