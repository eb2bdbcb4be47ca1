use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default namespace hosting the per-tenant SQL Server workloads.
const DEFAULT_NAMESPACE: &str = "default";

/// Connection and workload settings for the orchestration cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterConfig {
    /// Namespace in which all managed resources live.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Container image used by the one-shot sqlcmd jobs.
    pub exec_sql_image: String,
}

impl ClusterConfig {
    /// Validates the cluster configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            return Err(ValidationError::NamespaceEmpty);
        }
        if self.exec_sql_image.is_empty() {
            return Err(ValidationError::ExecSqlImageEmpty);
        }

        Ok(())
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}
