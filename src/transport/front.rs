use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::{body::Bytes, header::USER_AGENT, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use native_tls::TlsConnector;
use tokio::time;

use super::{ClientConfig, ProbeBody, Transport, TransportFactory};
use crate::probe::models::EvasionStrategy;

/// Header carrying the full destination url to the front.
const URL_ORIG: &str = "Url-Orig";
/// Header carrying the destination host to the front.
const HOST_ORIG: &str = "Host-Orig";

/// Builds [`HyperTransport`] clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperTransportFactory;

impl TransportFactory for HyperTransportFactory {
    /// Builds a hyper client that routes every request through `config.proxy_url`.
    ///
    /// # Arguments
    ///
    /// * `config`: The client configuration.
    ///
    /// # Returns
    ///
    /// The transport, or an error if the url is not an absolute http(s) uri or
    /// the TLS backend cannot be initialized.
    fn build(&self, config: &ClientConfig) -> anyhow::Result<Box<dyn Transport>> {
        let front = config.proxy_url.parse::<Uri>()?;
        if !matches!(front.scheme_str(), Some("http") | Some("https")) {
            anyhow::bail!("Scheme is empty or not http(s): {}", config.proxy_url);
        }
        if front.authority().is_none() {
            anyhow::bail!("Missing host: {}", config.proxy_url);
        }

        let tls_connector = TlsConnector::builder().build()?;
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(config.request_timeout));
        let https_connector = HttpsConnector::from((
            http_connector,
            tokio_native_tls::TlsConnector::from(tls_connector),
        ));

        let client = Client::builder(TokioExecutor::new()).build(https_connector);
        self.log_trace(config, "Client built");

        Ok(Box::new(HyperTransport {
            front,
            client,
            user_agent: config.user_agent.clone(),
            strategy: config.strategy,
            request_timeout: config.request_timeout,
        }))
    }
}

/// Sends requests to a reverse-proxy front which forwards them to the
/// destination named in the `Url-Orig` header.
///
/// The evasion strategy is applied by the network layer underneath; here it
/// only labels the traffic in logs.
pub struct HyperTransport {
    front: Uri,
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    user_agent: String,
    strategy: EvasionStrategy,
    request_timeout: Duration,
}

#[async_trait]
impl Transport for HyperTransport {
    async fn get(&self, uri: &Uri) -> anyhow::Result<Response<ProbeBody>> {
        let host = uri.authority().map(|a| a.as_str()).unwrap_or_default();
        let req = Request::get(self.front.clone())
            .header(USER_AGENT, self.user_agent.as_str())
            .header(URL_ORIG, uri.to_string())
            .header(HOST_ORIG, host)
            .body(Empty::<Bytes>::new())?;

        #[cfg(feature = "log")]
        log::trace!(
            "{} [{}]: Sending GET {} via front",
            self.front,
            self.strategy,
            uri
        );
        let start_time = time::Instant::now();
        let response = time::timeout(self.request_timeout, self.client.request(req))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out after {:?}", self.request_timeout))??;

        #[cfg(feature = "log")]
        log::trace!(
            "{} [{}]: Got {} in {:?}",
            self.front,
            self.strategy,
            response.status(),
            start_time.elapsed()
        );
        #[cfg(not(feature = "log"))]
        let _ = (start_time, self.strategy);

        Ok(response.map(|body| body.map_err(anyhow::Error::from).boxed_unsync()))
    }
}
