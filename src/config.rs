//! Configuration surface exposed to the outer system

use std::time::Duration;

use crate::track::DEFAULT_PAGE_SIZE;
use crate::worker::client::DEFAULT_REQUEST_TIMEOUT;
use crate::worker::protocol::WorkerLogLevel;

/// Settings for the persistence engine
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Page granularity for dirty tracking; positive power of two >= 512
    pub page_size: u32,
    /// When false, every persist writes the whole file
    pub incremental_enabled: bool,
    /// Worker-side log verbosity
    pub log_level: WorkerLogLevel,
    /// Per-request timeout on the worker channel
    pub request_timeout: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            incremental_enabled: true,
            log_level: WorkerLogLevel::Warn,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistConfig::default();
        assert_eq!(config.page_size, 4096);
        assert!(config.incremental_enabled);
        assert_eq!(config.log_level, WorkerLogLevel::Warn);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
