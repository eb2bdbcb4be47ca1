use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchParams};
use kube::core::WatchEvent;
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::k8s::base::{
    ClusterError, ResourceChange, ResourceEvent, ResourceEventStream, ResourceOps,
};

/// HTTP status returned by the API server for a missing resource.
const NOT_FOUND: u16 = 404;

/// Cluster client backed by the [`kube`] crate.
///
/// All operations are scoped to the namespace supplied at construction. The
/// client is cheap to clone and can be shared across actors.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    namespace: String,
}

impl KubeClusterClient {
    /// Creates a client around an existing [`kube::Client`].
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connects using the ambient configuration (in-cluster service account
    /// or local `~/.kube/config`).
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;

        Ok(Self::new(client, namespace))
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl<K> ResourceOps<K> for KubeClusterClient
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default,
{
    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        let resources = self.api::<K>().list(&params).await?;

        Ok(resources.items)
    }

    async fn get(&self, name: &str) -> Result<Option<K>, ClusterError> {
        let resource = self.api::<K>().get_opt(name).await?;

        Ok(resource)
    }

    async fn create(&self, resource: &K) -> Result<K, ClusterError> {
        let created = self
            .api::<K>()
            .create(&PostParams::default(), resource)
            .await?;

        Ok(created)
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        match self
            .api::<K>()
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            // Deleting a resource that is already gone is a no-op.
            Err(kube::Error::Api(response)) if response.code == NOT_FOUND => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn watch_all(&self) -> Result<ResourceEventStream<K>, ClusterError> {
        let watch = self
            .api::<K>()
            .watch(&WatchParams::default(), "0")
            .await?;

        let events = watch.filter_map(|item| async move {
            match item {
                Ok(WatchEvent::Added(resource)) => Some(Ok(ResourceEvent {
                    change: ResourceChange::Added,
                    resource,
                })),
                Ok(WatchEvent::Modified(resource)) => Some(Ok(ResourceEvent {
                    change: ResourceChange::Modified,
                    resource,
                })),
                Ok(WatchEvent::Deleted(resource)) => Some(Ok(ResourceEvent {
                    change: ResourceChange::Deleted,
                    resource,
                })),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(response)) => Some(Err(ClusterError::Watch {
                    reason: response.reason,
                    message: response.message,
                })),
                Err(err) => Some(Err(err.into())),
            }
        });

        Ok(events.boxed())
    }
}
