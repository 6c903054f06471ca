use std::collections::HashMap;

use conduit_config::shared::StreamStatusConfig;
use tracing::info;

use crate::metrics::register_metrics;
use crate::stream_status::events::StreamStatusEventPublisher;
use crate::stream_status::tracker::StreamStatusTracker;
use crate::types::SyncContext;

/// Flag consulted before tracking stream status for a sync attempt.
pub const STREAM_STATUS_TRACKING_FLAG: &str = "stream-status-tracking";

/// Evaluates boolean feature flags for a sync attempt.
pub trait FeatureFlagClient {
    fn bool_variation(&self, flag: &str, context: &SyncContext) -> bool;
}

/// Flags read from configuration. Unknown flags evaluate to `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFeatureFlags {
    flags: HashMap<String, bool>,
    default: bool,
}

impl ConfigFeatureFlags {
    pub fn new(flags: HashMap<String, bool>, default: bool) -> Self {
        Self { flags, default }
    }
}

impl From<&StreamStatusConfig> for ConfigFeatureFlags {
    fn from(config: &StreamStatusConfig) -> Self {
        Self::new(config.flags.clone(), true)
    }
}

impl FeatureFlagClient for ConfigFeatureFlags {
    fn bool_variation(&self, flag: &str, _context: &SyncContext) -> bool {
        self.flags.get(flag).copied().unwrap_or(self.default)
    }
}

/// Builds one [`StreamStatusTracker`] per sync attempt, once its context is known.
#[derive(Debug, Clone)]
pub struct StreamStatusTrackerFactory<F, P> {
    config: StreamStatusConfig,
    flags: F,
    publisher: P,
}

impl<F, P> StreamStatusTrackerFactory<F, P>
where
    F: FeatureFlagClient,
    P: StreamStatusEventPublisher + Clone,
{
    pub fn new(config: StreamStatusConfig, flags: F, publisher: P) -> Self {
        register_metrics();

        Self {
            config,
            flags,
            publisher,
        }
    }

    /// Creates the tracker of the attempt identified by `context`.
    ///
    /// The tracker is disabled when tracking is switched off in configuration
    /// or by the feature flag. A disabled tracker accepts messages and drops them.
    pub fn create(&self, context: SyncContext) -> StreamStatusTracker<P> {
        let enabled = self.config.enabled
            && self
                .flags
                .bool_variation(STREAM_STATUS_TRACKING_FLAG, &context);

        if !enabled {
            info!(
                connection_id = %context.connection_id,
                job_id = context.job_id,
                attempt_number = context.attempt_number,
                "stream status tracking is disabled for this attempt"
            );
        }

        StreamStatusTracker::new(context, self.publisher.clone(), enabled)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;

    fn context() -> SyncContext {
        SyncContext::new(Uuid::new_v4(), Uuid::new_v4(), 3, 1)
    }

    #[test]
    fn test_tracker_enablement() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let factory = StreamStatusTrackerFactory::new(
            StreamStatusConfig::default(),
            ConfigFeatureFlags::from(&StreamStatusConfig::default()),
            tx.clone(),
        );
        let tracker = factory.create(context());
        assert!(tracker.is_enabled());
        assert_eq!(tracker.context().job_id, 3);

        let flags = ConfigFeatureFlags::new(
            HashMap::from([(STREAM_STATUS_TRACKING_FLAG.to_owned(), false)]),
            true,
        );
        let factory =
            StreamStatusTrackerFactory::new(StreamStatusConfig::default(), flags, tx.clone());
        assert!(!factory.create(context()).is_enabled());

        let config = StreamStatusConfig {
            enabled: false,
            ..Default::default()
        };
        let flags = ConfigFeatureFlags::new(HashMap::new(), true);
        let factory = StreamStatusTrackerFactory::new(config, flags, tx);
        assert!(!factory.create(context()).is_enabled());
    }
}
