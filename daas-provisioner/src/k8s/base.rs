use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors emitted by the Kubernetes integration.
///
/// Variants wrap lower-level libraries where appropriate to preserve context.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// An error returned by the [`kube`] client when talking to the API
    /// server.
    #[error("An error occurred with kube when talking to the cluster: {0}")]
    Kube(#[from] kube::Error),

    /// An error item reported inline on a watch stream.
    #[error("The watch stream reported an error ({reason}): {message}")]
    Watch { reason: String, message: String },
}

/// The kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceChange {
    Added,
    Modified,
    Deleted,
}

/// A single change notification for a watched resource kind.
#[derive(Debug, Clone)]
pub struct ResourceEvent<K> {
    /// The kind of change that occurred.
    pub change: ResourceChange,
    /// The resource as reported by the API server after the change.
    pub resource: K,
}

/// Live sequence of change notifications for one resource kind.
///
/// The stream is infinite while the upstream watch is healthy and is
/// cancelled by dropping it.
pub type ResourceEventStream<K> = BoxStream<'static, Result<ResourceEvent<K>, ClusterError>>;

/// Client interface describing the cluster operations used by the
/// orchestration actors, generic over the resource kind.
///
/// Implementations are expected to scope all operations to a single
/// namespace fixed at construction time.
#[async_trait]
pub trait ResourceOps<K>: Send + Sync {
    /// Lists resources matching a label selector.
    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ClusterError>;

    /// Retrieves a resource by name, or [`None`] if it does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>, ClusterError>;

    /// Creates a resource from the given desired state.
    ///
    /// A name conflict surfaces as the platform's own conflict error.
    async fn create(&self, resource: &K) -> Result<K, ClusterError>;

    /// Deletes a resource by name if it exists ("ensure absent").
    async fn delete(&self, name: &str) -> Result<(), ClusterError>;

    /// Opens a watch over all resources of this kind in the namespace.
    async fn watch_all(&self) -> Result<ResourceEventStream<K>, ClusterError>;
}
