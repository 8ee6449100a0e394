use shared::{
    ServerFamily, DEFAULT_INITIAL_RECONCILE_DELAY, DEFAULT_LIST_COMMAND,
    DEFAULT_RECONCILE_INTERVAL,
};
use std::time::Duration;

/// Shortest reconciliation interval a session will honour.
pub const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for player tracking sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Delay before the one-shot roster request after tracking starts.
    pub initial_reconcile_delay: Duration,
    /// Interval between roster requests after the first one.
    pub reconcile_interval: Duration,
    /// Console command that makes the server print its player listing.
    pub list_command: String,
    /// Log dialect of the tracked servers; `None` recognises every dialect.
    pub family: Option<ServerFamily>,
}

impl TrackerConfig {
    pub fn with_family(mut self, family: Option<ServerFamily>) -> Self {
        self.family = family;
        self
    }

    pub fn with_reconcile_timing(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_reconcile_delay = initial_delay;
        self.reconcile_interval = interval;
        self
    }

    pub fn with_list_command(mut self, command: impl Into<String>) -> Self {
        self.list_command = command.into();
        self
    }

    /// Reconciliation interval clamped to [`MIN_RECONCILE_INTERVAL`].
    pub fn effective_reconcile_interval(&self) -> Duration {
        self.reconcile_interval.max(MIN_RECONCILE_INTERVAL)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            initial_reconcile_delay: DEFAULT_INITIAL_RECONCILE_DELAY,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            list_command: DEFAULT_LIST_COMMAND.to_string(),
            family: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.initial_reconcile_delay, Duration::from_secs(3));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(config.list_command, "list");
        assert_eq!(config.family, None);
    }

    #[test]
    fn test_builders() {
        let config = TrackerConfig::default()
            .with_family(Some(ServerFamily::Bedrock))
            .with_reconcile_timing(Duration::from_secs(1), Duration::from_secs(30))
            .with_list_command("players");

        assert_eq!(config.family, Some(ServerFamily::Bedrock));
        assert_eq!(config.initial_reconcile_delay, Duration::from_secs(1));
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert_eq!(config.list_command, "players");
    }

    #[test]
    fn test_interval_is_clamped() {
        let config = TrackerConfig::default()
            .with_reconcile_timing(Duration::ZERO, Duration::ZERO);
        assert_eq!(config.effective_reconcile_interval(), MIN_RECONCILE_INTERVAL);
    }
}
