pub mod client;
pub mod models;

use std::{sync::Arc, time::Duration};

use hyper::Uri;

use crate::transport::TransportFactory;
use client::ProbeClient;
use models::{EvasionStrategy, ProbeOutcome, ProbeRequest};

/// Lists the probes a submission dispatches, in dispatch order.
///
/// The first url is tried with every strategy; every other url only with
/// `strategy`.
///
/// # Arguments
///
/// * `urls`: Candidate urls, the first one being the primary candidate.
/// * `strategy`: Strategy used for every url after the first.
///
/// # Returns
///
/// One `ProbeRequest` per probe to launch.
pub fn plan(urls: &[String], strategy: EvasionStrategy) -> Vec<ProbeRequest> {
    let mut requests = Vec::with_capacity(urls.len() + EvasionStrategy::ALL.len());
    for (index, url) in urls.iter().enumerate() {
        if index == 0 {
            requests.extend(
                EvasionStrategy::ALL
                    .iter()
                    .map(|strategy| ProbeRequest::new(url.as_str(), *strategy)),
            );
        } else {
            requests.push(ProbeRequest::new(url.as_str(), strategy));
        }
    }
    requests
}

/// Launches probes concurrently and forwards their outcomes to a channel.
pub struct ProbeExecutor {
    factory: Arc<dyn TransportFactory>,
    sender: kanal::AsyncSender<ProbeOutcome>,
    user_agent: String,
    request_timeout: Duration,
}

/// Builds the client for one request and runs it to completion.
async fn do_work(
    factory: Arc<dyn TransportFactory>,
    request: ProbeRequest,
    user_agent: &str,
    request_timeout: Duration,
    target: &Uri,
) -> ProbeOutcome {
    match ProbeClient::build(factory.as_ref(), request.clone(), user_agent, request_timeout) {
        Ok(client) => client.probe(target).await,
        Err(e) => {
            #[cfg(feature = "log")]
            log::error!("{}: failed to build client: {:#}", request, e);
            ProbeOutcome::Invalid {
                request,
                reason: format!("Failed to build client: {:#}", e),
            }
        }
    }
}

impl ProbeExecutor {
    /// Creates an executor sending every outcome to `sender`.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        sender: kanal::AsyncSender<ProbeOutcome>,
        user_agent: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            sender,
            user_agent,
            request_timeout,
        }
    }

    /// Launches every probe of a submission and returns immediately.
    ///
    /// Each probe runs on its own task with no concurrency cap, and sends
    /// exactly one outcome once it resolves.
    ///
    /// # Arguments
    ///
    /// * `urls`: Candidate urls.
    /// * `strategy`: Strategy for every url but the first.
    /// * `target`: Endpoint every probe requests.
    ///
    /// # Returns
    ///
    /// The number of probes launched.
    pub fn submit(&self, urls: &[String], strategy: EvasionStrategy, target: &Uri) -> usize {
        let requests = plan(urls, strategy);
        let launched = requests.len();

        for request in requests {
            #[cfg(feature = "log")]
            log::debug!(
                "Test url {} with strategy {} against {}",
                request.url,
                request.strategy,
                target
            );
            let factory = Arc::clone(&self.factory);
            let sender = self.sender.clone();
            let user_agent = self.user_agent.clone();
            let request_timeout = self.request_timeout;
            let target = target.clone();

            tokio::spawn(async move {
                let outcome =
                    do_work(factory, request, &user_agent, request_timeout, &target).await;
                sender.send(outcome).await.unwrap_or_default();
            });
        }
        launched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedFactory;

    fn urls(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|url| url.to_string()).collect()
    }

    #[test]
    fn test_plan_first_url_gets_every_strategy() {
        let requests = plan(
            &urls(&["https://u0/", "https://u1/", "https://u2/"]),
            EvasionStrategy::TruncatedReserved,
        );
        assert_eq!(requests.len(), 8);

        let first: Vec<_> = requests
            .iter()
            .filter(|r| r.url == "https://u0/")
            .map(|r| r.strategy)
            .collect();
        assert_eq!(first, EvasionStrategy::ALL.to_vec());

        for url in ["https://u1/", "https://u2/"] {
            let others: Vec<_> = requests.iter().filter(|r| r.url == url).collect();
            assert_eq!(others.len(), 1);
            assert_eq!(others[0].strategy, EvasionStrategy::TruncatedReserved);
        }
    }

    #[test]
    fn test_plan_edge_cases() {
        assert!(plan(&[], EvasionStrategy::Compressed).is_empty());
        assert_eq!(plan(&urls(&["https://u0/"]), EvasionStrategy::Compressed).len(), 6);
        // The same url twice is probed twice.
        assert_eq!(
            plan(&urls(&["https://u0/", "https://u0/"]), EvasionStrategy::Unmodified).len(),
            7
        );
    }

    async fn collect(receiver: &kanal::AsyncReceiver<ProbeOutcome>, count: usize) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            let outcome = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("outcome in time")
                .expect("channel open");
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test]
    async fn test_submit_launches_every_planned_probe() {
        let factory = Arc::new(ScriptedFactory::default());
        let (sender, receiver) = kanal::unbounded_async();
        let executor = ProbeExecutor::new(
            factory.clone(),
            sender,
            "test-agent".to_string(),
            Duration::from_secs(1),
        );

        let target: Uri = "https://www.google.com/generate_204".parse().unwrap();
        let launched = executor.submit(
            &urls(&["https://u0/", "https://u1/", "https://u2/"]),
            EvasionStrategy::MultiByte,
            &target,
        );
        assert_eq!(launched, 8);

        let outcomes = collect(&receiver, 8).await;
        assert!(outcomes.iter().all(ProbeOutcome::is_valid));

        let built = factory.built();
        let u0: Vec<_> = built.iter().filter(|(url, _)| url == "https://u0/").collect();
        assert_eq!(u0.len(), 6);
        assert_eq!(
            built.iter().filter(|(url, s)| url == "https://u1/" && *s == EvasionStrategy::MultiByte).count(),
            1
        );
        assert_eq!(
            built.iter().filter(|(url, s)| url == "https://u2/" && *s == EvasionStrategy::MultiByte).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_build_failure_is_isolated() {
        let factory = Arc::new(
            ScriptedFactory::default()
                .with_build_error("not-a-url")
                .with_status("https://u2/", 500),
        );
        let (sender, receiver) = kanal::unbounded_async();
        let executor =
            ProbeExecutor::new(factory, sender, "test-agent".to_string(), Duration::from_secs(1));

        let target: Uri = "https://www.google.com/generate_204".parse().unwrap();
        executor.submit(
            &urls(&["https://u0/", "not-a-url", "https://u2/"]),
            EvasionStrategy::Unmodified,
            &target,
        );

        let outcomes = collect(&receiver, 8).await;
        let valid = outcomes.iter().filter(|o| o.is_valid()).count();
        assert_eq!(valid, 6);

        let broken = outcomes
            .iter()
            .find(|o| o.request().url == "not-a-url")
            .expect("outcome for the broken url");
        match broken {
            ProbeOutcome::Invalid { reason, .. } => {
                assert!(reason.starts_with("Failed to build client"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
