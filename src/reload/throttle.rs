//! Per-provider publisher lane.
//!
//! ```text
//! loop:
//!     value = mailbox.take()      (waits)
//!     publish(value)              (immediately)
//!     sleep(throttle)             (later puts coalesce in the mailbox)
//! ```
//! The first update of a burst goes out right away; the rest of the burst
//! is reduced to its last value, published at most once per interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::config::dynamic::Configuration;
use crate::reload::mailbox::Mailbox;

/// A configuration released by a lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub provider: String,
    pub configuration: Configuration,
}

/// Drain `mailbox` into `output` until shutdown or until `output` closes.
pub async fn run_lane(
    provider: String,
    mailbox: Arc<Mailbox<Configuration>>,
    throttle: Duration,
    output: mpsc::UnboundedSender<Published>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(provider = %provider, throttle = ?throttle, "Publisher lane started");
    loop {
        let configuration = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            configuration = mailbox.take() => configuration,
        };

        let published = Published {
            provider: provider.clone(),
            configuration,
        };
        if output.send(published).is_err() {
            break;
        }
        tracing::debug!(provider = %provider, "Configuration published");

        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(throttle) => {}
        }
    }
    tracing::debug!(provider = %provider, "Publisher lane stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::RouterSpec;
    use crate::lifecycle::Shutdown;
    use tokio::time::Instant;

    fn config(rule: &str) -> Configuration {
        let mut config = Configuration::default();
        config.routers.insert(
            "r".into(),
            RouterSpec {
                rule: rule.into(),
                entry_points: vec!["web".into()],
                middlewares: vec![],
                service: "s".into(),
                priority: 0,
            },
        );
        config
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce_to_latest() {
        let shutdown = Shutdown::new();
        let mailbox = Arc::new(Mailbox::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lane = tokio::spawn(run_lane(
            "file".into(),
            mailbox.clone(),
            Duration::from_secs(2),
            tx,
            shutdown.subscribe(),
        ));

        let start = Instant::now();
        mailbox.put(config("Path:/1"));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.configuration, config("Path:/1"));
        assert!(start.elapsed() < Duration::from_millis(100));

        for i in 2..=5 {
            mailbox.put(config(&format!("Path:/{i}")));
        }
        let second = rx.recv().await.unwrap();
        assert_eq!(second.configuration, config("Path:/5"));
        assert!(start.elapsed() >= Duration::from_secs(2));

        shutdown.trigger();
        lane.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_throttle_sleep() {
        let shutdown = Shutdown::new();
        let mailbox = Arc::new(Mailbox::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lane = tokio::spawn(run_lane(
            "file".into(),
            mailbox.clone(),
            Duration::from_secs(3600),
            tx,
            shutdown.subscribe(),
        ));

        mailbox.put(config("Path:/1"));
        rx.recv().await.unwrap();
        mailbox.put(config("Path:/2"));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), lane)
            .await
            .unwrap()
            .unwrap();
        // The pending value is dropped, never published after shutdown.
        assert!(rx.recv().await.is_none());
    }
}
