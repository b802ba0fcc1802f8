//! Connectivity observation.

use tokio::sync::watch;
use tracing::info;

/// Reports whether the device can reach the backend.
pub trait ConnectivityObserver: Send + Sync {
    /// Current status.
    fn is_online(&self) -> bool;

    /// A receiver that sees every online/offline transition.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Connectivity driven by the host application's platform callbacks.
#[derive(Debug)]
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    /// Creates a signal with the given initial status.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Records a platform connectivity callback. Repeated reports of the same
    /// status do not wake watchers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }
}

impl ConnectivityObserver for ConnectivitySignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once `rx` reports offline. Never resolves if the observer is gone.
pub(crate) async fn went_offline(rx: &mut watch::Receiver<bool>) {
    loop {
        if !*rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn watchers_see_transitions() {
        let signal = ConnectivitySignal::new(false);
        let mut rx = signal.watch();
        assert!(!signal.is_online());

        signal.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(signal.is_online());

        signal.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn went_offline_waits_for_loss() {
        let signal = ConnectivitySignal::new(true);
        let mut rx = signal.watch();

        let still_online = tokio::time::timeout(Duration::from_secs(1), went_offline(&mut rx)).await;
        assert!(still_online.is_err());

        signal.set_online(false);
        tokio::time::timeout(Duration::from_secs(1), went_offline(&mut rx))
            .await
            .unwrap();
    }
}
