//! Provider messages to applied configuration.
//!
//! # Data Flow
//! ```text
//! providers ──ConfigMessage──▶ preload task (one, serializes all providers)
//!     apply default entry points
//!     skip empty / skip equal to last accepted
//!     put into the provider's mailbox (latest wins)
//!                                 │
//!          one lane per provider ◀┘ publish, then sleep(throttle)
//!                                 │
//!                  apply task ◀───┘ store per provider, merge, notify listeners
//! ```
//!
//! # Design Decisions
//! - A provider's burst never delays another provider: lanes are independent
//! - "Last accepted" is the last value put into the mailbox, published or not
//! - A listener panic is logged and does not stop the pipeline

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::dynamic::Configuration;
use crate::lifecycle::TaskPool;
use crate::provider::ConfigMessage;
use crate::reload::mailbox::Mailbox;
use crate::reload::merge::{merge, MergedConfiguration};
use crate::reload::throttle::{run_lane, Published};

/// Called with every newly merged configuration.
pub type Listener = Arc<dyn Fn(&MergedConfiguration) + Send + Sync>;

/// What the preload step did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    ProviderEnded,
    Empty,
    Unchanged,
    /// Put into an empty mailbox.
    Queued,
    /// Replaced a value that had not been published yet.
    Coalesced,
}

struct Lane {
    last_accepted: Option<Configuration>,
    mailbox: Arc<Mailbox<Configuration>>,
}

/// Filters messages and feeds the per-provider lanes.
pub struct Preloader {
    default_entry_points: Vec<String>,
    throttle: Duration,
    published: mpsc::UnboundedSender<Published>,
    tasks: TaskPool,
    lanes: HashMap<String, Lane>,
}

impl Preloader {
    pub fn new(
        default_entry_points: Vec<String>,
        throttle: Duration,
        published: mpsc::UnboundedSender<Published>,
        tasks: TaskPool,
    ) -> Self {
        Self {
            default_entry_points,
            throttle,
            published,
            tasks,
            lanes: HashMap::new(),
        }
    }

    pub fn handle(&mut self, message: ConfigMessage) -> PreloadOutcome {
        let ConfigMessage {
            provider_name,
            configuration,
        } = message;
        let Some(mut configuration) = configuration else {
            tracing::info!(provider = %provider_name, "Provider stream ended");
            return PreloadOutcome::ProviderEnded;
        };

        apply_default_entry_points(&mut configuration, &self.default_entry_points);
        if configuration.is_empty() {
            tracing::info!(provider = %provider_name, "Skipping empty configuration");
            return PreloadOutcome::Empty;
        }

        let lane = self.lane(&provider_name);
        if lane.last_accepted.as_ref() == Some(&configuration) {
            tracing::info!(provider = %provider_name, "Skipping same configuration");
            return PreloadOutcome::Unchanged;
        }
        lane.last_accepted = Some(configuration.clone());

        match lane.mailbox.put(configuration) {
            Some(_) => {
                tracing::debug!(provider = %provider_name, "Coalesced pending configuration");
                PreloadOutcome::Coalesced
            }
            None => PreloadOutcome::Queued,
        }
    }

    fn lane(&mut self, provider: &str) -> &mut Lane {
        let Self {
            lanes,
            tasks,
            throttle,
            published,
            ..
        } = self;
        lanes.entry(provider.to_string()).or_insert_with(|| {
            let mailbox = Arc::new(Mailbox::new());
            let lane_mailbox = mailbox.clone();
            let provider = provider.to_string();
            let throttle = *throttle;
            let output = published.clone();
            tasks.spawn(move |shutdown| run_lane(provider, lane_mailbox, throttle, output, shutdown));
            Lane {
                last_accepted: None,
                mailbox,
            }
        })
    }
}

/// Routers that name no entry point get the defaults.
pub fn apply_default_entry_points(configuration: &mut Configuration, defaults: &[String]) {
    for router in configuration.routers.values_mut() {
        if router.entry_points.is_empty() {
            router.entry_points = defaults.to_vec();
        }
    }
}

/// The reload pipeline.
pub struct ConfigurationWatcher {
    default_entry_points: Vec<String>,
    throttle: Duration,
    listeners: Vec<Listener>,
}

impl ConfigurationWatcher {
    pub fn new(default_entry_points: Vec<String>, throttle: Duration) -> Self {
        Self {
            default_entry_points,
            throttle,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&MergedConfiguration) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Spawn the preload and apply tasks on `tasks`.
    pub fn start(self, mut messages: mpsc::UnboundedReceiver<ConfigMessage>, tasks: &TaskPool) {
        let (published_tx, mut published_rx) = mpsc::unbounded_channel();
        let mut preloader = Preloader::new(
            self.default_entry_points,
            self.throttle,
            published_tx,
            tasks.clone(),
        );

        tasks.spawn(move |mut shutdown| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    message = messages.recv() => match message {
                        Some(message) => {
                            preloader.handle(message);
                        }
                        None => {
                            tracing::info!("All provider channels closed");
                            break;
                        }
                    },
                }
            }
        });

        let listeners = self.listeners;
        tasks.spawn(move |mut shutdown| async move {
            let mut configurations: BTreeMap<String, Configuration> = BTreeMap::new();
            loop {
                let published = tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    published = published_rx.recv() => match published {
                        Some(published) => published,
                        None => break,
                    },
                };

                configurations.insert(published.provider, published.configuration);
                let merged = merge(&configurations);
                for listener in &listeners {
                    if catch_unwind(AssertUnwindSafe(|| listener(&merged))).is_err() {
                        tracing::error!("Configuration listener panicked");
                    }
                }
            }
            tracing::debug!("Configuration watcher stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dynamic::{RouterSpec, ServerSpec, ServiceSpec};
    use crate::lifecycle::Shutdown;
    use std::sync::Mutex;

    fn config(rule: &str) -> Configuration {
        let mut config = Configuration::default();
        config.routers.insert(
            "foo".into(),
            RouterSpec {
                rule: rule.into(),
                entry_points: vec![],
                middlewares: vec![],
                service: "svc".into(),
                priority: 0,
            },
        );
        config.services.insert(
            "svc".into(),
            ServiceSpec {
                servers: vec![ServerSpec {
                    url: "http://127.0.0.1:9000".into(),
                    weight: 1,
                }],
                ..Default::default()
            },
        );
        config
    }

    fn message(provider: &str, configuration: Option<Configuration>) -> ConfigMessage {
        ConfigMessage {
            provider_name: provider.into(),
            configuration,
        }
    }

    struct Harness {
        tx: mpsc::UnboundedSender<ConfigMessage>,
        applied: Arc<Mutex<Vec<MergedConfiguration>>>,
        tasks: TaskPool,
    }

    fn start(throttle: Duration) -> Harness {
        let tasks = TaskPool::new(Shutdown::new());
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut watcher = ConfigurationWatcher::new(vec!["web".into()], throttle);
        let sink = applied.clone();
        watcher.add_listener(move |merged| sink.lock().unwrap().push(merged.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        watcher.start(rx, &tasks);
        Harness { tx, applied, tasks }
    }

    #[tokio::test(start_paused = true)]
    async fn preloader_filters_messages() {
        let (published_tx, _published_rx) = mpsc::unbounded_channel();
        let tasks = TaskPool::new(Shutdown::new());
        let mut preloader = Preloader::new(vec!["web".into()], Duration::from_secs(2), published_tx, tasks);

        assert_eq!(preloader.handle(message("file", None)), PreloadOutcome::ProviderEnded);
        assert_eq!(
            preloader.handle(message("file", Some(Configuration::default()))),
            PreloadOutcome::Empty
        );
        assert_eq!(preloader.handle(message("file", Some(config("Path:/a")))), PreloadOutcome::Queued);
        assert_eq!(
            preloader.handle(message("file", Some(config("Path:/a")))),
            PreloadOutcome::Unchanged
        );
        assert_eq!(
            preloader.handle(message("file", Some(config("Path:/b")))),
            PreloadOutcome::Coalesced
        );
        assert_eq!(preloader.handle(message("other", Some(config("Path:/b")))), PreloadOutcome::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn same_configuration_applies_once() {
        let harness = start(Duration::from_secs(2));
        harness.tx.send(message("file", Some(config("Path:/a")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        harness.tx.send(message("file", Some(config("Path:/a")))).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let applied = harness.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].routers["foo@file"].entry_points, vec!["web".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_publish_first_and_last() {
        let harness = start(Duration::from_secs(2));
        harness.tx.send(message("file", Some(config("Path:/1")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 2..=10 {
            harness.tx.send(message("file", Some(config(&format!("Path:/{i}"))))).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.applied.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let applied = harness.applied.lock().unwrap();
        let rules: Vec<_> = applied.iter().map(|m| m.routers["foo@file"].rule.clone()).collect();
        assert_eq!(rules, vec!["Path:/1".to_string(), "Path:/10".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn providers_do_not_delay_each_other() {
        let harness = start(Duration::from_secs(60));
        harness.tx.send(message("a", Some(config("Path:/a1")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        harness.tx.send(message("a", Some(config("Path:/a2")))).unwrap();
        harness.tx.send(message("b", Some(config("Path:/b1")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let applied = harness.applied.lock().unwrap();
        let last = applied.last().unwrap();
        assert_eq!(last.routers["foo@a"].rule, "Path:/a1");
        assert_eq!(last.routers["foo@b"].rule, "Path:/b1");
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_listener_does_not_stop_pipeline() {
        let tasks = TaskPool::new(Shutdown::new());
        let calls = Arc::new(Mutex::new(0));
        let mut watcher = ConfigurationWatcher::new(vec!["web".into()], Duration::from_millis(100));
        watcher.add_listener(|_| panic!("listener failure"));
        let counter = calls.clone();
        watcher.add_listener(move |_| *counter.lock().unwrap() += 1);
        let (tx, rx) = mpsc::unbounded_channel();
        watcher.start(rx, &tasks);

        tx.send(message("file", Some(config("Path:/1")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(message("file", Some(config("Path:/2")))).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_tasks() {
        let harness = start(Duration::from_secs(2));
        harness.tx.send(message("file", Some(config("Path:/1")))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        harness.tasks.shutdown().trigger();
        assert!(harness.tasks.join(Duration::from_secs(1)).await);
        assert!(harness.tx.send(message("file", Some(config("Path:/2")))).is_err());
    }
}
