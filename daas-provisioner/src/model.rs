//! Read-only records supplied by the persistence layer.
//!
//! The orchestration core never writes these; they are loaded by the owner
//! and passed in for the lifetime of a request.

use daas_config::SecretValue;
use serde::{Deserialize, Serialize};

/// A provisioned SQL Server instance managed by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseServer {
    /// Stable identifier of the server, also used in cluster resource names.
    pub id: String,
    /// Administrative password for the `sa` login.
    pub admin_password: SecretValue,
}

/// A database hosted on a [`DatabaseServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInstance {
    /// Stable identifier of the database record.
    pub id: String,
    /// Name of the database inside the target server.
    pub name: String,
    /// Identifier of the owning [`DatabaseServer`].
    pub server_id: String,
}
