mod backend;

use std::sync::{Arc, Mutex, MutexGuard};

pub use backend::{FileStore, KeyValueStore, MemoryStore};

use crate::probe::models::EvasionStrategy;

/// Key the valid url list is persisted under.
pub const VALID_URLS_KEY: &str = "validUrls";

/// Accumulated probe results, in completion order.
#[derive(Debug, Default)]
struct ValidationState {
    valid_urls: Vec<String>,
    invalid_urls: Vec<String>,
}

/// Thread-safe record of valid and invalid urls.
///
/// Only the valid list is persisted, as a JSON array under a single key.
/// Once the in-memory valid list is non-empty it is authoritative; the
/// persisted copy is read only while nothing has been recorded yet.
pub struct ResultStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
    state: Mutex<ValidationState>,
}

impl ResultStore {
    /// Creates a store persisting to `backend` under [`VALID_URLS_KEY`].
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(backend, VALID_URLS_KEY)
    }

    /// Creates a store persisting to `backend` under `key`.
    pub fn with_key<S: Into<String>>(backend: Arc<dyn KeyValueStore>, key: S) -> Self {
        Self {
            backend,
            key: key.into(),
            state: Mutex::new(ValidationState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ValidationState> {
        // A panic while holding the lock cannot leave a half-appended list.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `url` to the valid list and persists the whole list.
    ///
    /// The write happens while the lock is held, so persisted snapshots follow
    /// the append order. A failed write is logged and leaves memory untouched.
    ///
    /// # Arguments
    ///
    /// * `url`: The url that was validated.
    /// * `strategy`: The strategy it was validated with.
    ///
    /// # Returns
    ///
    /// The valid list after the append.
    pub fn record_valid(&self, url: &str, strategy: EvasionStrategy) -> Vec<String> {
        let mut state = self.state();
        state.valid_urls.push(url.to_string());
        let snapshot = state.valid_urls.clone();

        if let Err(e) = self.persist(&snapshot) {
            #[cfg(feature = "log")]
            log::error!(
                "{} / {}: failed to persist {} valid urls: {:#}",
                url,
                strategy,
                snapshot.len(),
                e
            );
            #[cfg(not(feature = "log"))]
            let _ = (e, strategy);
        }
        snapshot
    }

    /// Appends `url` to the invalid list, which is never persisted.
    ///
    /// # Returns
    ///
    /// The invalid list after the append.
    pub fn record_invalid(&self, url: &str, strategy: EvasionStrategy, reason: &str) -> Vec<String> {
        let mut state = self.state();
        state.invalid_urls.push(url.to_string());

        #[cfg(feature = "log")]
        log::debug!("{} / {}: recorded as invalid ({})", url, strategy, reason);
        #[cfg(not(feature = "log"))]
        let _ = (strategy, reason);

        state.invalid_urls.clone()
    }

    /// Returns the in-memory valid list, or the persisted one while memory is
    /// empty. The two are never merged.
    pub fn current_valid_urls(&self) -> Vec<String> {
        {
            let state = self.state();
            if !state.valid_urls.is_empty() {
                return state.valid_urls.clone();
            }
        }

        match self.load() {
            Ok(urls) => urls,
            Err(e) => {
                #[cfg(feature = "log")]
                log::error!("Failed to load persisted valid urls: {:#}", e);
                #[cfg(not(feature = "log"))]
                let _ = e;
                Vec::new()
            }
        }
    }

    /// Returns the invalid urls recorded by this process.
    pub fn current_invalid_urls(&self) -> Vec<String> {
        self.state().invalid_urls.clone()
    }

    fn persist(&self, urls: &[String]) -> anyhow::Result<()> {
        let json = serde_json::to_string(urls)?;
        self.backend.set(&self.key, &json)
    }

    fn load(&self) -> anyhow::Result<Vec<String>> {
        match self.backend.get(&self.key)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }
}
