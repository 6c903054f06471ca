use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    PgConnectionConfig, StreamStatusConfig, SyncPersistenceConfig, ValidationError,
    WorkloadConfig,
};

/// Top-level configuration of a conduit process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Database holding workloads, the dispatch queue and persisted snapshots.
    pub database: PgConnectionConfig,
    #[serde(default)]
    pub persistence: SyncPersistenceConfig,
    #[serde(default)]
    pub workloads: WorkloadConfig,
    #[serde(default)]
    pub stream_status: StreamStatusConfig,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.persistence.validate()?;
        self.workloads.validate()?;

        Ok(())
    }
}

impl Config for OrchestratorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "database": {
                "host": "localhost",
                "port": 5432,
                "name": "conduit",
                "username": "postgres",
                "password": null
            }
        }))
        .unwrap();

        assert_eq!(config.persistence, SyncPersistenceConfig::default());
        assert_eq!(config.workloads, WorkloadConfig::default());
        assert!(config.stream_status.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_flush_period() {
        let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "database": {
                "host": "localhost",
                "port": 5432,
                "name": "conduit",
                "username": "postgres",
                "password": "secret"
            },
            "persistence": { "flush_period_ms": 0 }
        }))
        .unwrap();

        assert_eq!(config.validate(), Err(ValidationError::FlushPeriodZero));
    }
}
