mod config;

use std::{sync::Arc, time::Duration};

pub use config::{Config, DEFAULT_TARGET_ENDPOINT, DEFAULT_USER_AGENT};
use hyper::Uri;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    broadcast::{MessageSink, ResultBroadcaster},
    probe::{
        models::{EvasionStrategy, ProbeOutcome},
        ProbeExecutor,
    },
    store::{KeyValueStore, ResultStore},
    transport::TransportFactory,
};

/// Requests accepted by the service queue.
#[derive(Debug)]
enum Command {
    Submit { urls: Vec<String>, strategy: i64 },
    Query,
}

/// Long-lived façade that probes candidate urls and reports the results.
///
/// Submissions and queries go through one FIFO queue handled by a single
/// task. Probes launched by a submission run on their own tasks and report
/// back through a channel; each outcome is recorded in the [`ResultStore`]
/// and then broadcast.
pub struct ProbeService {
    config: Config,
    target: Uri,
    factory: Arc<dyn TransportFactory>,
    store: Arc<ResultStore>,
    broadcaster: ResultBroadcaster,
    commands: Option<kanal::Sender<Command>>,
    handlers: Vec<JoinHandle<()>>,
}

/// Records every probe outcome, then broadcasts it.
async fn handle_outcomes(
    receiver: kanal::AsyncReceiver<ProbeOutcome>,
    store: Arc<ResultStore>,
    broadcaster: ResultBroadcaster,
) {
    while let Ok(outcome) = receiver.recv().await {
        match outcome {
            ProbeOutcome::Valid(request) => {
                let valid_urls = store.record_valid(&request.url, request.strategy);
                broadcaster.publish_success(valid_urls, &request.url, request.strategy);
            }
            ProbeOutcome::Invalid { request, reason } => {
                let invalid_urls = store.record_invalid(&request.url, request.strategy, &reason);
                broadcaster.publish_failure(invalid_urls, &request.url, request.strategy);
            }
        }
    }
}

/// Handles queued requests one at a time, in order.
async fn handle_commands(
    receiver: kanal::AsyncReceiver<Command>,
    executor: ProbeExecutor,
    store: Arc<ResultStore>,
    broadcaster: ResultBroadcaster,
    target: Uri,
) {
    while let Ok(command) = receiver.recv().await {
        match command {
            Command::Submit { urls, strategy } => {
                let strategy = EvasionStrategy::from_code(strategy);
                let launched = executor.submit(&urls, strategy, &target);
                #[cfg(feature = "log")]
                log::debug!(
                    "Launched {} probes for {} urls with strategy {}",
                    launched,
                    urls.len(),
                    strategy
                );
                #[cfg(not(feature = "log"))]
                let _ = launched;
            }
            Command::Query => {
                broadcaster.publish_query_result(store.current_valid_urls());
            }
        }
    }
}

impl ProbeService {
    /// Creates a stopped service.
    ///
    /// # Arguments
    ///
    /// * `config`: Service options.
    /// * `factory`: Builds the client of every probe.
    /// * `backend`: Durable storage for the valid url list.
    /// * `sink`: Receives every validation event.
    ///
    /// # Returns
    ///
    /// The service, or an error if `config.target_endpoint` is not an
    /// absolute uri.
    pub fn new(
        config: Config,
        factory: Arc<dyn TransportFactory>,
        backend: Arc<dyn KeyValueStore>,
        sink: Arc<dyn MessageSink>,
    ) -> anyhow::Result<Self> {
        let target = config.target_endpoint.parse::<Uri>()?;
        if target.scheme().is_none() || target.authority().is_none() {
            anyhow::bail!("Target endpoint must be absolute: {}", config.target_endpoint);
        }

        let store = Arc::new(ResultStore::with_key(backend, config.storage_key.clone()));
        Ok(Self {
            config,
            target,
            factory,
            store,
            broadcaster: ResultBroadcaster::new(sink),
            commands: None,
            handlers: vec![],
        })
    }

    /// Starts the request queue. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            anyhow::bail!("Service is already running");
        }
        let runtime = Handle::try_current()
            .map_err(|_| anyhow::anyhow!("Service must be started within a tokio runtime"))?;

        let (command_sender, command_receiver) = kanal::unbounded();
        let (outcome_sender, outcome_receiver) = kanal::unbounded_async();
        let executor = ProbeExecutor::new(
            Arc::clone(&self.factory),
            outcome_sender,
            self.config.user_agent.clone(),
            Duration::from_millis(self.config.request_timeout),
        );

        self.handlers.push(runtime.spawn(handle_outcomes(
            outcome_receiver,
            Arc::clone(&self.store),
            self.broadcaster.clone(),
        )));
        self.handlers.push(runtime.spawn(handle_commands(
            command_receiver.to_async(),
            executor,
            Arc::clone(&self.store),
            self.broadcaster.clone(),
            self.target.clone(),
        )));
        self.commands = Some(command_sender);

        #[cfg(feature = "log")]
        log::debug!("Probe service started, target {}", self.target);
        Ok(())
    }

    /// Stops the request queue.
    ///
    /// Probes already in flight are not cancelled, but outcomes arriving after
    /// this point are neither recorded nor broadcast.
    pub fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            commands.close().unwrap_or_default();
        }
        for handler in self.handlers.drain(..) {
            handler.abort();
        }
        #[cfg(feature = "log")]
        log::debug!("Probe service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.commands.is_some()
    }

    fn enqueue(&self, command: Command) -> anyhow::Result<()> {
        match &self.commands {
            Some(commands) => Ok(commands.send(command)?),
            None => anyhow::bail!("Service is not running"),
        }
    }

    /// Queues a probing round.
    ///
    /// The first url is probed with every strategy, the others with
    /// `strategy`. Codes outside `0..=5` are treated as `0`.
    pub fn submit(&self, urls: Vec<String>, strategy: i64) -> anyhow::Result<()> {
        self.enqueue(Command::Submit { urls, strategy })
    }

    /// Queues a broadcast of the current valid url list.
    pub fn query(&self) -> anyhow::Result<()> {
        self.enqueue(Command::Query)
    }

    /// Returns the valid urls, falling back to the persisted list while none
    /// have been recorded by this process.
    pub fn valid_urls(&self) -> Vec<String> {
        self.store.current_valid_urls()
    }

    /// Returns the invalid urls recorded by this process.
    pub fn invalid_urls(&self) -> Vec<String> {
        self.store.current_invalid_urls()
    }
}

impl Drop for ProbeService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::{ChannelSink, ValidationEvent},
        store::{MemoryStore, VALID_URLS_KEY},
        transport::mock::ScriptedFactory,
    };

    struct Harness {
        service: ProbeService,
        factory: Arc<ScriptedFactory>,
        backend: Arc<MemoryStore>,
        events: kanal::AsyncReceiver<ValidationEvent>,
    }

    fn harness(factory: ScriptedFactory, backend: MemoryStore) -> Harness {
        let factory = Arc::new(factory);
        let backend = Arc::new(backend);
        let sink = Arc::new(ChannelSink::new());
        let events = sink.subscribe().to_async();
        let mut service =
            ProbeService::new(Config::default(), factory.clone(), backend.clone(), sink).unwrap();
        service.start().unwrap();
        Harness {
            service,
            factory,
            backend,
            events,
        }
    }

    async fn next_events(events: &kanal::AsyncReceiver<ValidationEvent>, count: usize) -> Vec<ValidationEvent> {
        let mut received = Vec::with_capacity(count);
        for _ in 0..count {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event in time")
                .expect("sink open");
            received.push(event);
        }
        received
    }

    fn urls(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|url| url.to_string()).collect()
    }

    #[tokio::test]
    async fn test_out_of_range_strategy_behaves_as_unmodified() {
        for strategy in [-1, 6, 1000] {
            let h = harness(ScriptedFactory::default(), MemoryStore::default());
            h.service
                .submit(urls(&["https://u0/", "https://u1/"]), strategy)
                .unwrap();
            next_events(&h.events, 7).await;

            let built = h.factory.built();
            assert_eq!(built.len(), 7);
            let u1: Vec<_> = built.iter().filter(|(url, _)| url == "https://u1/").collect();
            assert_eq!(u1, vec![&("https://u1/".to_string(), EvasionStrategy::Unmodified)]);
        }
    }

    #[tokio::test]
    async fn test_outcomes_are_recorded_then_broadcast() {
        let h = harness(
            ScriptedFactory::default()
                .with_status("https://u1/", 404)
                .with_transport_error("https://u2/"),
            MemoryStore::default(),
        );
        h.service
            .submit(urls(&["https://u0/", "https://u1/", "https://u2/"]), 3)
            .unwrap();
        let events = next_events(&h.events, 8).await;

        let succeeded: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ValidationEvent::ValidationSucceeded {
                    valid_urls,
                    valid_url,
                    valid_strategy,
                } => Some((valid_urls.len(), valid_url.clone(), *valid_strategy)),
                _ => None,
            })
            .collect();
        assert_eq!(succeeded.len(), 6);
        // Each success carries the list accumulated so far.
        let mut sizes: Vec<_> = succeeded.iter().map(|(len, _, _)| *len).collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2, 3, 4, 5, 6]);
        assert!(succeeded
            .iter()
            .all(|(_, url, strategy)| url.as_deref() == Some("https://u0/") && strategy.is_some()));

        let failed: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                ValidationEvent::ValidationFailed {
                    invalid_url,
                    invalid_strategy,
                    ..
                } => Some((invalid_url.clone(), *invalid_strategy)),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.contains(&("https://u1/".to_string(), EvasionStrategy::MultiByte)));
        assert!(failed.contains(&("https://u2/".to_string(), EvasionStrategy::MultiByte)));

        assert_eq!(h.service.valid_urls(), vec!["https://u0/"; 6]);
        let mut invalid = h.service.invalid_urls();
        invalid.sort();
        assert_eq!(invalid, vec!["https://u1/", "https://u2/"]);

        let persisted: Vec<String> =
            serde_json::from_str(&h.backend.get(VALID_URLS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted, h.service.valid_urls());
    }

    #[tokio::test]
    async fn test_query_on_fresh_process_returns_persisted_list() {
        let backend = MemoryStore::default();
        backend
            .set(VALID_URLS_KEY, r#"["https://old-1/","https://old-2/"]"#)
            .unwrap();
        let h = harness(ScriptedFactory::default(), backend);

        h.service.query().unwrap();
        assert_eq!(
            next_events(&h.events, 1).await,
            vec![ValidationEvent::ValidationSucceeded {
                valid_urls: urls(&["https://old-1/", "https://old-2/"]),
                valid_url: None,
                valid_strategy: None,
            }]
        );
        assert_eq!(h.service.valid_urls(), vec!["https://old-1/", "https://old-2/"]);
    }

    #[tokio::test]
    async fn test_query_reflects_state_when_it_runs() {
        let backend = MemoryStore::default();
        backend.set(VALID_URLS_KEY, r#"["https://old/"]"#).unwrap();
        let h = harness(ScriptedFactory::default(), backend);

        h.service.submit(urls(&["https://u0/"]), 0).unwrap();
        next_events(&h.events, 6).await;

        h.service.query().unwrap();
        match next_events(&h.events, 1).await.pop() {
            Some(ValidationEvent::ValidationSucceeded {
                valid_urls,
                valid_url: None,
                ..
            }) => assert_eq!(valid_urls, vec!["https://u0/"; 6]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_require_a_running_service() {
        let sink = Arc::new(ChannelSink::new());
        let mut service = ProbeService::new(
            Config::default(),
            Arc::new(ScriptedFactory::default()),
            Arc::new(MemoryStore::default()),
            sink,
        )
        .unwrap();

        assert!(service.submit(urls(&["https://u0/"]), 0).is_err());
        assert!(service.query().is_err());

        service.start().unwrap();
        assert!(service.start().is_err());
        assert!(service.query().is_ok());

        service.stop();
        assert!(!service.is_running());
        assert!(service.submit(urls(&["https://u0/"]), 0).is_err());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let mut service = ProbeService::new(
            Config::default(),
            Arc::new(ScriptedFactory::default()),
            Arc::new(MemoryStore::default()),
            Arc::new(ChannelSink::new()),
        )
        .unwrap();
        assert!(service.start().is_err());
    }

    #[test]
    fn test_relative_target_is_rejected() {
        let config = Config {
            target_endpoint: "/generate_204".to_string(),
            ..Default::default()
        };
        assert!(ProbeService::new(
            config,
            Arc::new(ScriptedFactory::default()),
            Arc::new(MemoryStore::default()),
            Arc::new(ChannelSink::new()),
        )
        .is_err());
    }
}
