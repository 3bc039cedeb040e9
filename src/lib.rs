pub mod broadcast;
pub mod probe;
pub mod service;
pub mod store;
pub mod transport;

pub use broadcast::{ChannelSink, MessageSink, ResultBroadcaster, ValidationEvent};
pub use probe::models::{EvasionStrategy, ProbeOutcome, ProbeRequest};
pub use service::{Config, ProbeService};
pub use store::{FileStore, KeyValueStore, MemoryStore, ResultStore};
pub use transport::HyperTransportFactory;

/// Initializes the logging system for the application.
///
/// This function configures the logging system with the specified verbosity level.
///
/// # Arguments
///
/// * `log_level`: The desired verbosity level for logging. Determines which log messages will be displayed.
///
/// # Returns
///
/// A result indicating the success or failure of the logging setup.
#[cfg(feature = "log")]
pub fn initialize_logging(log_level: log::LevelFilter) -> anyhow::Result<()> {
    stderrlog::new()
        .module(module_path!()) // Configures the module path for log messages.
        .show_module_names(true) // Enables module names in log output.
        .verbosity(log_level) // Sets the specified log verbosity level.
        .init()?; // Initializes the logger.
    Ok(())
}
