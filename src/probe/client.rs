use std::time::Duration;

use http_body_util::BodyExt;
use hyper::{header::LOCATION, StatusCode, Uri};
use tokio::time;

use super::models::{ProbeOutcome, ProbeRequest};
use crate::transport::{ClientConfig, ProbeBody, Transport, TransportFactory};

/// Runs one GET against the target endpoint through one candidate url.
pub struct ProbeClient {
    request: ProbeRequest,
    transport: Box<dyn Transport>,
    request_timeout: Duration,
}

impl ProbeClient {
    /// Builds a client for `request` using `factory`.
    ///
    /// # Arguments
    ///
    /// * `factory`: Builds the underlying transport.
    /// * `request`: The (url, strategy) pair to probe.
    /// * `user_agent`: Value of the `User-Agent` header.
    /// * `request_timeout`: Upper bound for each request and for draining its body.
    ///
    /// # Returns
    ///
    /// The client, or the error raised while building the transport.
    pub fn build(
        factory: &dyn TransportFactory,
        request: ProbeRequest,
        user_agent: &str,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let transport = factory.build(&ClientConfig {
            proxy_url: request.url.clone(),
            strategy: request.strategy,
            user_agent: user_agent.to_string(),
            request_timeout,
        })?;
        Ok(Self {
            request,
            transport,
            request_timeout,
        })
    }

    /// Probes `target` and classifies the result.
    ///
    /// Only the final status counts: 2xx is valid, everything else, including
    /// transport errors, is invalid.
    pub async fn probe(self, target: &Uri) -> ProbeOutcome {
        let result = self.final_status(target).await;
        match result {
            Ok(status) if status.is_success() => {
                #[cfg(feature = "log")]
                log::info!(
                    "{}: got {} from {}, url is valid",
                    self.request,
                    status.as_u16(),
                    target
                );
                ProbeOutcome::Valid(self.request)
            }
            Ok(status) => {
                #[cfg(feature = "log")]
                log::error!(
                    "{}: got {} from {}, url is invalid",
                    self.request,
                    status.as_u16(),
                    target
                );
                ProbeOutcome::Invalid {
                    request: self.request,
                    reason: format!("HTTP {}", status.as_u16()),
                }
            }
            Err(e) => {
                #[cfg(feature = "log")]
                log::error!("{}: {} -> {:#}", self.request, target, e);
                ProbeOutcome::Invalid {
                    request: self.request,
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Follows redirects until a non-redirect response arrives, drains its
    /// body and returns its status.
    ///
    /// Redirects are followed without a hop limit.
    async fn final_status(&self, target: &Uri) -> anyhow::Result<StatusCode> {
        let mut uri = target.clone();
        loop {
            let mut response = self.transport.get(&uri).await?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    let next = resolve_location(&uri, location.to_str()?)?;
                    self.log_trace(format!("{} redirected to {}", uri, next));
                    uri = next;
                    continue;
                }
            }

            let received = time::timeout(self.request_timeout, drain(response.body_mut()))
                .await
                .map_err(|_| anyhow::anyhow!("Body read timed out after {:?}", self.request_timeout))??;
            self.log_trace(format!("{} answered {} ({} bytes)", uri, status, received));
            return Ok(status);
        }
    }

    fn log_trace(&self, msg: String) {
        #[cfg(feature = "log")]
        log::trace!("{}: {}", self.request, msg);
        #[cfg(not(feature = "log"))]
        let _ = msg;
    }
}

/// Reads the body frame by frame, discarding the data.
async fn drain(body: &mut ProbeBody) -> anyhow::Result<usize> {
    let mut received = 0;
    while let Some(next) = body.frame().await {
        let frame = next?;
        if let Some(chunk) = frame.data_ref() {
            received += chunk.len();
        }
    }
    Ok(received)
}

/// Resolves a `Location` header value against the uri that produced it.
fn resolve_location(base: &Uri, location: &str) -> anyhow::Result<Uri> {
    let location = location.split('#').next().unwrap_or_default();
    if location.is_empty() {
        return Ok(base.clone());
    }
    if has_scheme(location) {
        return Ok(location.parse()?);
    }
    if location.starts_with("//") {
        let scheme = base.scheme_str().unwrap_or("http");
        return Ok(format!("{}:{}", scheme, location).parse()?);
    }

    let base_path = base.path();
    let path_and_query = if location.starts_with('/') {
        location.to_string()
    } else if location.starts_with('?') {
        format!("{}{}", base_path, location)
    } else {
        let dir = base_path.rfind('/').map_or("/", |i| &base_path[..=i]);
        format!("{}{}", dir, location)
    };

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse()?);
    Ok(Uri::from_parts(parts)?)
}

/// True when `reference` starts with `scheme ":"`, where the scheme is a
/// letter followed by letters, digits, `+`, `-` or `.`.
fn has_scheme(reference: &str) -> bool {
    match reference.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
