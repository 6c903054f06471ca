use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Settings of per-stream status tracking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatusConfig {
    /// Global switch. When false no tracker records anything.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Static feature flag values, keyed by flag name.
    #[serde(default)]
    pub flags: HashMap<String, bool>,
}

fn default_enabled() -> bool {
    true
}

impl Default for StreamStatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flags: HashMap::new(),
        }
    }
}
