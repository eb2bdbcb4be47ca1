use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The target namespace cannot be empty.
    #[error("`namespace` cannot be empty")]
    NamespaceEmpty,
    /// The sqlcmd job image cannot be empty.
    #[error("`exec_sql_image` cannot be empty")]
    ExecSqlImageEmpty,
}
