use serde::{Deserialize, Serialize};

use crate::shared::{ClusterConfig, ValidationError};

/// Complete configuration for the provisioning agent.
///
/// Typically loaded from configuration files at startup via
/// [`crate::load_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Orchestration cluster settings.
    pub cluster: ClusterConfig,
}

impl AgentConfig {
    /// Validates the complete agent configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.cluster.validate()
    }
}
