mod front;

use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::{body::Bytes, Response, Uri};

pub use front::{HyperTransport, HyperTransportFactory};
use crate::probe::models::EvasionStrategy;

/// Body type returned by every transport.
pub type ProbeBody = UnsyncBoxBody<Bytes, anyhow::Error>;

/// Settings a transport is built with, one per probe.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Candidate url the request is routed through.
    pub proxy_url: String,
    /// Evasion strategy applied to outgoing traffic.
    pub strategy: EvasionStrategy,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Upper bound for a single request, headers included.
    pub request_timeout: Duration,
}

/// A configured HTTP client bound to one candidate url.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a single GET for `uri` without following redirects.
    ///
    /// A returned `Response` always carries a status; anything that prevents
    /// obtaining one is an error.
    async fn get(&self, uri: &Uri) -> anyhow::Result<Response<ProbeBody>>;
}

/// Builds a [`Transport`] for each probe.
pub trait TransportFactory: Send + Sync {
    /// Builds a client for `config`.
    ///
    /// Failing here only affects the probe the client was meant for.
    fn build(&self, config: &ClientConfig) -> anyhow::Result<Box<dyn Transport>>;

    /// Logs a trace message.
    ///
    /// # Arguments
    ///
    /// * `config`: The configuration the message relates to.
    /// * `msg`: The message to log.
    fn log_trace<S>(&self, config: &ClientConfig, msg: S)
    where
        S: Display,
        Self: Sized,
    {
        #[cfg(feature = "log")]
        log::trace!("{} [{}]: {}", config.proxy_url, config.strategy, msg);
        #[cfg(not(feature = "log"))]
        let _ = (config, msg);
    }
}
