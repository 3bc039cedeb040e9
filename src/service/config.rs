use crate::store::VALID_URLS_KEY;

/// Endpoint every probe requests by default; it answers 204 with no body.
pub const DEFAULT_TARGET_ENDPOINT: &str = "https://www.google.com/generate_204";

/// User agent sent with every probe.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
    AppleWebKit/537.36 (KHTML, like Gecko) \
    Chrome/52.0.2743.82 Safari/537.36";

/// Options for configuring the probe service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Url every probe requests through its candidate.
    pub target_endpoint: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Timeout for each request hop, in milliseconds.
    pub request_timeout: u64,
    /// Storage key the valid url list is persisted under.
    pub storage_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_endpoint: DEFAULT_TARGET_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: 10000,
            storage_key: VALID_URLS_KEY.to_string(),
        }
    }
}
