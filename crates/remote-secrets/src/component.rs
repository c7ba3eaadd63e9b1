//! Secret watcher component.
//!
//! Ties a [`Watcher`] to the state a host observes: the last published
//! [`Exports`] and the current [`Health`]. Outcomes are applied one at a time
//! by [`Component::handle_outcome`], which is the only place that state changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Arguments;
use crate::error::ConfigError;
use crate::health::{Health, HealthType};
use crate::secret::{Secret, SecretContent};
use crate::store::{AwsStoreFactory, StoreFactory};
use crate::watcher::{FetchOutcome, WatchParameters, Watcher};

/// Health message recorded after a successful fetch.
pub const SECRETS_RETRIEVED: &str = "Secrets retrieved";

/// Values published after each successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exports {
    pub data: BTreeMap<String, Secret>,
}

/// Receives every newly published [`Exports`].
pub trait ExportSink: Send + Sync {
    fn on_state_change(&self, exports: Exports);
}

impl<F> ExportSink for F
where
    F: Fn(Exports) + Send + Sync,
{
    fn on_state_change(&self, exports: Exports) {
        self(exports)
    }
}

/// Host-provided context for a component instance.
#[derive(Clone)]
pub struct ComponentOptions {
    /// Identifier used in log lines.
    pub id: String,
    pub sink: Arc<dyn ExportSink>,
}

impl ComponentOptions {
    pub fn new(id: impl Into<String>, sink: impl ExportSink + 'static) -> Self {
        Self {
            id: id.into(),
            sink: Arc::new(sink),
        }
    }
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct State {
    args: Arguments,
    health: Health,
    exports: Option<Exports>,
}

pub struct Component {
    id: String,
    sink: Arc<dyn ExportSink>,
    factory: Arc<dyn StoreFactory>,
    watcher: Watcher,
    outcomes: Mutex<mpsc::Receiver<FetchOutcome>>,
    /// Serializes reconfiguration so watcher parameters and recorded
    /// arguments change together.
    updates: Mutex<()>,
    /// Held for the whole of one outcome application, sink call included.
    outcome_gate: StdMutex<()>,
    state: StdMutex<State>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Creates a component backed by Secrets Manager, using the AWS SDK default
    /// chain for anything `args.client` leaves unset.
    pub async fn new(options: ComponentOptions, args: Arguments) -> Result<Self, ConfigError> {
        Self::with_store_factory(options, args, Arc::new(AwsStoreFactory)).await
    }

    /// Creates a component and applies the outcome of one initial fetch.
    ///
    /// Fetch failures do not fail construction; they are reflected in
    /// [`Component::current_health`].
    pub async fn with_store_factory(
        options: ComponentOptions,
        args: Arguments,
        factory: Arc<dyn StoreFactory>,
    ) -> Result<Self, ConfigError> {
        args.validate()?;
        let store = factory.build(&args.client).await?;

        let (tx, rx) = mpsc::channel(1);
        let watcher = Watcher::new(
            WatchParameters {
                secret_id: args.secret_id.clone(),
                version_stage: args.version_stage.clone(),
                poll_interval: args.poll_interval,
                store,
            },
            tx,
        );

        let component = Self {
            id: options.id,
            sink: options.sink,
            factory,
            watcher,
            outcomes: Mutex::new(rx),
            updates: Mutex::new(()),
            outcome_gate: StdMutex::new(()),
            state: StdMutex::new(State {
                args,
                health: Health::default(),
                exports: None,
            }),
        };

        let outcome = component.watcher.fetch_once().await;
        component.handle_outcome(outcome);
        Ok(component)
    }

    /// Runs the poll loop and applies its outcomes until `cancel` fires.
    ///
    /// An outcome still queued from an earlier run is discarded; it may belong
    /// to parameters replaced since.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut outcomes = self.outcomes.lock().await;
        let mut discarded = 0;
        while outcomes.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(component = %self.id, discarded, "dropped outcomes left by a previous run");
        }
        debug!(component = %self.id, "secret watcher component running");
        tokio::join!(
            self.watcher.run(cancel.clone()),
            self.receive(&mut outcomes, &cancel)
        );
        debug!(component = %self.id, "secret watcher component stopped");
    }

    /// Applies new arguments without restarting the poll loop.
    ///
    /// Invalid arguments are rejected and leave the running configuration
    /// untouched. The new poll interval counts from this call.
    pub async fn update(&self, args: Arguments) -> Result<(), ConfigError> {
        let _updating = self.updates.lock().await;
        args.validate()?;
        let store = self.factory.build(&args.client).await?;

        self.watcher
            .update_parameters(WatchParameters {
                secret_id: args.secret_id.clone(),
                version_stage: args.version_stage.clone(),
                poll_interval: args.poll_interval,
                store,
            })
            .await;

        info!(
            component = %self.id,
            secret_id = %args.secret_id,
            version_stage = %args.version_stage,
            poll_interval = %humantime::format_duration(args.poll_interval),
            "secret watcher reconfigured"
        );
        self.state().args = args;
        Ok(())
    }

    pub fn current_health(&self) -> Health {
        self.state().health.clone()
    }

    /// Last published exports, if any fetch has succeeded.
    pub fn exports(&self) -> Option<Exports> {
        self.state().exports.clone()
    }

    pub fn arguments(&self) -> Arguments {
        self.state().args.clone()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Applies one fetch outcome: publish and mark healthy, or mark unhealthy.
    pub fn handle_outcome(&self, outcome: FetchOutcome) {
        let _gate = self
            .outcome_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match outcome {
            Ok(content) => {
                let exports = self.convert(content);
                debug!(
                    component = %self.id,
                    keys = exports.data.len(),
                    "publishing secret exports"
                );
                self.sink.on_state_change(exports.clone());

                let mut state = self.state();
                state.exports = Some(exports);
                state.health = state
                    .health
                    .transition(HealthType::Healthy, SECRETS_RETRIEVED);
            }
            Err(error) => {
                warn!(component = %self.id, %error, "failed to fetch secret");
                let mut state = self.state();
                state.health = state
                    .health
                    .transition(HealthType::Unhealthy, error.to_string());
            }
        }
    }

    async fn receive(
        &self,
        outcomes: &mut mpsc::Receiver<FetchOutcome>,
        cancel: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => self.handle_outcome(outcome),
                    None => break,
                },
            }
        }
    }

    fn convert(&self, content: SecretContent) -> Exports {
        let mut data = BTreeMap::new();
        for (key, value) in content {
            let kind = value.kind();
            match value.into_secret() {
                Some(secret) => {
                    data.insert(key, secret);
                }
                None => warn!(
                    component = %self.id,
                    key = %key,
                    kind,
                    "found field in secret which cannot be converted into a string"
                ),
            }
        }
        Exports { data }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use crate::secret::SecretValue;
    use crate::test_support::{FakeFactory, FakeStore, Reply};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    const TEN_MINUTES: Duration = Duration::from_secs(600);

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<StdMutex<Vec<Exports>>>,
    }

    impl RecordingSink {
        fn published(&self) -> Vec<Exports> {
            self.published.lock().unwrap().clone()
        }
    }

    impl ExportSink for RecordingSink {
        fn on_state_change(&self, exports: Exports) {
            self.published.lock().unwrap().push(exports);
        }
    }

    fn args(secret_id: &str) -> Arguments {
        Arguments {
            poll_interval: TEN_MINUTES,
            ..Arguments::new(secret_id)
        }
    }

    fn exports(pairs: &[(&str, &str)]) -> Exports {
        Exports {
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Secret::from(*v)))
                .collect(),
        }
    }

    async fn component_with(
        reply: Reply,
    ) -> (Component, Arc<FakeStore>, Arc<FakeFactory>, RecordingSink) {
        let store = FakeStore::new(reply);
        let factory = FakeFactory::new(store.clone());
        let sink = RecordingSink::default();
        let component = Component::with_store_factory(
            ComponentOptions::new("remote.secrets.test", sink.clone()),
            args("prod/db"),
            factory.clone(),
        )
        .await
        .unwrap();
        (component, store, factory, sink)
    }

    async fn wait_for_calls(store: &FakeStore, calls: usize) {
        while store.calls() < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn construction_fetches_once_and_reports_healthy() {
        let (component, store, factory, sink) =
            component_with(Reply::json(json!({ "password": "hunter2" }))).await;

        assert_eq!(store.calls(), 1);
        assert_eq!(factory.builds(), 1);
        let health = component.current_health();
        assert_eq!(health.health, HealthType::Healthy);
        assert_eq!(health.message, SECRETS_RETRIEVED);
        assert_eq!(sink.published(), vec![exports(&[("password", "hunter2")])]);
        assert_eq!(component.exports(), Some(exports(&[("password", "hunter2")])));
    }

    #[tokio::test]
    async fn construction_with_failing_fetch_reports_unhealthy() {
        let (component, store, _, sink) = component_with(Reply::Fail("no such secret".into())).await;

        assert_eq!(store.calls(), 1);
        let health = component.current_health();
        assert_eq!(health.health, HealthType::Unhealthy);
        assert_eq!(
            health.message,
            "ResourceNotFoundException: no such secret (status 400)"
        );
        assert!(sink.published().is_empty());
        assert_eq!(component.exports(), None);
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_fetching() {
        let store = FakeStore::new(Reply::json(json!({})));
        let factory = FakeFactory::new(store.clone());
        let result = Component::with_store_factory(
            ComponentOptions::new("remote.secrets.test", |_: Exports| {}),
            Arguments {
                poll_interval: Duration::from_secs(30),
                ..Arguments::new("prod/db")
            },
            factory,
        )
        .await;

        assert!(matches!(result, Err(ConfigError::PollIntervalTooShort(_))));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn successful_fetches_replace_previous_exports() {
        let (component, store, _, sink) =
            component_with(Reply::json(json!({ "a": "1", "b": "2" }))).await;

        store.set_reply(Reply::json(json!({ "b": "3", "c": "4" })));
        let outcome = component.watcher.fetch_once().await;
        component.handle_outcome(outcome);

        assert_eq!(component.exports(), Some(exports(&[("b", "3"), ("c", "4")])));
        assert_eq!(
            sink.published(),
            vec![
                exports(&[("a", "1"), ("b", "2")]),
                exports(&[("b", "3"), ("c", "4")]),
            ]
        );
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_exports_and_skips_sink() {
        let (component, store, _, sink) = component_with(Reply::json(json!({ "a": "1" }))).await;
        let before = component.current_health();

        store.set_reply(Reply::Fail("throttled".into()));
        let outcome = component.watcher.fetch_once().await;
        component.handle_outcome(outcome);

        let after = component.current_health();
        assert_eq!(after.health, HealthType::Unhealthy);
        assert!(after.update_time > before.update_time);
        assert_eq!(sink.published().len(), 1);
        assert_eq!(component.exports(), Some(exports(&[("a", "1")])));

        store.set_reply(Reply::json(json!({ "a": "2" })));
        let outcome = component.watcher.fetch_once().await;
        component.handle_outcome(outcome);
        assert!(component.current_health().is_healthy());
        assert_eq!(component.exports(), Some(exports(&[("a", "2")])));
    }

    #[tokio::test]
    #[traced_test]
    async fn unsupported_values_are_dropped_with_a_warning() {
        let (component, _, _, sink) =
            component_with(Reply::json(json!({ "a": "x", "b": 123 }))).await;

        assert_eq!(sink.published(), vec![exports(&[("a", "x")])]);
        assert!(component.current_health().is_healthy());
        assert!(logs_contain(
            "found field in secret which cannot be converted into a string"
        ));
        assert!(logs_contain("key=b"));
        assert!(logs_contain("kind=\"number\""));
    }

    #[tokio::test]
    async fn binary_values_are_exported() {
        let (component, _, _, _) = component_with(Reply::json(json!({}))).await;
        let content = SecretContent::from([
            ("cert".to_string(), SecretValue::Binary(b"-----BEGIN".to_vec())),
        ]);
        component.handle_outcome(Ok(content));
        assert_eq!(component.exports(), Some(exports(&[("cert", "-----BEGIN")])));
    }

    #[tokio::test]
    async fn binary_only_secret_is_unhealthy_and_publishes_nothing() {
        let (component, _, _, sink) = component_with(Reply::Binary(vec![0xde, 0xad])).await;

        let health = component.current_health();
        assert_eq!(health.health, HealthType::Unhealthy);
        assert_eq!(health.message, "SecretBinary is not supported");
        assert!(sink.published().is_empty());
        assert_eq!(component.exports(), None);
    }

    #[tokio::test]
    async fn binary_only_secret_keeps_last_published_exports() {
        let (component, store, _, _) = component_with(Reply::json(json!({ "a": "1" }))).await;

        store.set_reply(Reply::Binary(vec![1]));
        let outcome = component.watcher.fetch_once().await;
        component.handle_outcome(outcome);

        assert_eq!(
            component.current_health().message,
            "SecretBinary is not supported"
        );
        assert_eq!(component.exports(), Some(exports(&[("a", "1")])));
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_schedule_until_cancelled() {
        let (component, store, _, sink) = component_with(Reply::json(json!({ "a": "1" }))).await;
        let component = Arc::new(component);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let component = component.clone();
            let cancel = cancel.clone();
            async move { component.run(cancel).await }
        });

        // Construction fetch, run-start fetch, then two ticks.
        tokio::time::sleep(TEN_MINUTES * 2 + Duration::from_secs(1)).await;
        assert_eq!(store.calls(), 4);
        assert_eq!(sink.published().len(), 4);

        cancel.cancel();
        handle.await.unwrap();

        let health = component.current_health();
        tokio::time::sleep(TEN_MINUTES * 3).await;
        assert_eq!(store.calls(), 4);
        assert_eq!(sink.published().len(), 4);
        assert_eq!(component.current_health(), health);
    }

    #[tokio::test(start_paused = true)]
    async fn update_changes_interval_from_the_next_tick() {
        let (component, store, factory, _) = component_with(Reply::json(json!({ "a": "1" }))).await;
        let component = Arc::new(component);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn({
            let component = component.clone();
            let cancel = cancel.clone();
            async move { component.run(cancel).await }
        });
        wait_for_calls(&store, 2).await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        component
            .update(Arguments {
                poll_interval: Duration::from_secs(60),
                ..Arguments::new("prod/api")
            })
            .await
            .unwrap();
        assert_eq!(factory.builds(), 2);
        assert_eq!(store.calls(), 2);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(store.calls(), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(181));
        assert_eq!(store.requests()[2].0, "prod/api");
        assert_eq!(component.arguments().secret_id, "prod/api");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_update_keeps_previous_parameters() {
        let (component, store, factory, _) = component_with(Reply::json(json!({ "a": "1" }))).await;
        let component = Arc::new(component);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let component = component.clone();
            let cancel = cancel.clone();
            async move { component.run(cancel).await }
        });
        wait_for_calls(&store, 2).await;

        let err = component
            .update(Arguments {
                poll_interval: Duration::from_secs(60),
                client: StoreOptions {
                    access_key: Some("AKID".into()),
                    ..StoreOptions::default()
                },
                ..Arguments::new("prod/api")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteCredentials));
        assert_eq!(factory.builds(), 1);
        assert_eq!(component.arguments(), args("prod/db"));

        tokio::time::sleep(TEN_MINUTES - Duration::from_secs(1)).await;
        assert_eq!(store.calls(), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.calls(), 3);
        assert_eq!(store.requests()[2].0, "prod/db");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn restart_discards_outcome_queued_before_an_update() {
        let (component, store, _, sink) =
            component_with(Reply::json(json!({ "old": "1" }))).await;

        // A run that stops while its fetch result still sits in the queue.
        let stopped = CancellationToken::new();
        tokio::join!(component.watcher.run(stopped.clone()), async {
            wait_for_calls(&store, 2).await;
            tokio::task::yield_now().await;
            stopped.cancel();
        });
        assert_eq!(store.calls(), 2);

        store.set_reply(Reply::json(json!({ "new": "2" })));
        component.update(args("prod/api")).await.unwrap();

        let cancel = CancellationToken::new();
        tokio::join!(component.run(cancel.clone()), async {
            while sink.published().len() < 2 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        });

        assert_eq!(
            sink.published(),
            vec![exports(&[("old", "1")]), exports(&[("new", "2")])]
        );
        assert_eq!(component.exports(), Some(exports(&[("new", "2")])));
        assert_eq!(store.requests()[2].0, "prod/api");
    }

    #[tokio::test]
    async fn closures_can_be_sinks() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let store = FakeStore::new(Reply::json(json!({ "a": "1", "b": "2" })));
        let component = Component::with_store_factory(
            ComponentOptions::new("remote.secrets.test", {
                let seen = seen.clone();
                move |exports: Exports| {
                    seen.lock()
                        .unwrap()
                        .extend(exports.data.into_keys());
                }
            }),
            args("prod/db"),
            FakeFactory::new(store),
        )
        .await
        .unwrap();

        assert_eq!(component.id(), "remote.secrets.test");
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
