use crate::error::RabbitResult;
pub use tracing::instrument;
pub use tracing::{debug, error, info, trace, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when the command line does not choose one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global subscriber, logging what `directives` selects (e.g. `info` or
/// `rabbit_engine=debug,info`). The environment is not consulted.
pub fn init_tracing(directives: &str) -> RabbitResult<()> {
    tracing_subscriber::registry()
        .with(log_filter(directives)?)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| crate::err!("Failed to initialize tracing: {}", e))?;
    Ok(())
}

fn log_filter(directives: &str) -> RabbitResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| crate::err!("Invalid log filter '{}': {}", directives, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter() {
        assert!(log_filter(DEFAULT_LOG_FILTER).is_ok());
        assert!(log_filter("rabbit_engine=debug,warn").is_ok());
        let err = log_filter("rabbit_engine=loudest").unwrap_err();
        assert!(err.to_string().starts_with("Invalid log filter 'rabbit_engine=loudest': "));
    }
}
