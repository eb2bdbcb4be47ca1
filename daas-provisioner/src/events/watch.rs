//! Actor owning the single upstream watch for one resource kind.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::fmt::Debug;
use std::marker::PhantomData;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::concurrency::shutdown::ShutdownRx;
use crate::events::bus::{EventSink, ResourceEventBus, ResourceEventFilter};
use crate::k8s::{ClusterError, ResourceOps};
use crate::workers::base::{Worker, WorkerHandle, WorkerWaitError};

/// Bounded depth of the subscription command mailbox.
const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum WatchError {
    /// An error raised while opening the upstream watch.
    #[error("An error occurred when watching the cluster: {0}")]
    Cluster(#[from] ClusterError),

    /// The actor task is gone and can no longer accept commands.
    #[error("The resource watch actor is no longer running")]
    Terminated,
}

enum WatchCommand<K> {
    Subscribe {
        sink: EventSink<K>,
        filter: ResourceEventFilter,
    },
    Unsubscribe {
        sink: EventSink<K>,
        filter: ResourceEventFilter,
    },
    UnsubscribeAll {
        sink: EventSink<K>,
    },
}

/// Actor distributing the change events of one resource kind to its
/// subscribers.
///
/// Exactly one upstream watch is held per actor no matter how many
/// subscriptions exist. Subscription management and event delivery are
/// serialized on the actor task, so a subscriber never misses an event that
/// arrives after its subscribe command was processed.
pub struct ResourceWatch<K, C> {
    cluster: C,
    shutdown_rx: ShutdownRx,
    _resource: PhantomData<K>,
}

/// Watch over the Services exposing tenant database servers.
pub type ServiceWatch<C> = ResourceWatch<Service, C>;

impl<K, C> ResourceWatch<K, C> {
    pub fn new(cluster: C, shutdown_rx: ShutdownRx) -> Self {
        Self {
            cluster,
            shutdown_rx,
            _resource: PhantomData,
        }
    }
}

impl<K, C> Worker<ResourceWatchHandle<K>, ()> for ResourceWatch<K, C>
where
    K: ResourceExt + Clone + Debug + Send + Sync + 'static,
    C: ResourceOps<K> + 'static,
{
    type Error = WatchError;

    async fn start(self) -> Result<ResourceWatchHandle<K>, Self::Error> {
        info!("starting resource watch");

        let mut events = self.cluster.watch_all().await?;
        let mut shutdown_rx = self.shutdown_rx;
        let (commands_tx, mut commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let handle = tokio::spawn(
            async move {
                let mut bus = ResourceEventBus::default();

                loop {
                    tokio::select! {
                        biased;

                        _ = shutdown_rx.changed() => {
                            info!("shutting down resource watch");
                            return Ok(());
                        }

                        command = commands_rx.recv() => {
                            match command {
                                Some(WatchCommand::Subscribe { sink, filter }) => {
                                    bus.subscribe(sink, filter);
                                }
                                Some(WatchCommand::Unsubscribe { sink, filter }) => {
                                    bus.unsubscribe(&sink, &filter);
                                }
                                Some(WatchCommand::UnsubscribeAll { sink }) => {
                                    bus.unsubscribe_all(&sink);
                                }
                                // All handles are gone, nobody can subscribe
                                // anymore.
                                None => {
                                    info!("all watch handles dropped, stopping resource watch");
                                    return Ok(());
                                }
                            }
                        }

                        event = events.next() => {
                            match event {
                                Some(Ok(event)) => bus.publish(&event),
                                Some(Err(err)) => {
                                    error!("the upstream watch reported an error: {err}");
                                }
                                None => {
                                    info!("the upstream watch ended, stopping resource watch");
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("resource_watch")),
        );

        Ok(ResourceWatchHandle {
            commands: commands_tx,
            handle: Some(handle),
        })
    }
}

/// Handle used to manage subscriptions on a running [`ResourceWatch`].
///
/// Cloning the handle is cheap; the actor stops once every handle is dropped
/// or the shutdown signal fires.
#[derive(Debug)]
pub struct ResourceWatchHandle<K> {
    commands: mpsc::Sender<WatchCommand<K>>,
    handle: Option<JoinHandle<Result<(), WatchError>>>,
}

impl<K> Clone for ResourceWatchHandle<K> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            handle: None,
        }
    }
}

impl<K> ResourceWatchHandle<K> {
    /// Registers a filter delivering matching events to `sink`.
    pub async fn subscribe(
        &self,
        sink: EventSink<K>,
        filter: ResourceEventFilter,
    ) -> Result<(), WatchError> {
        self.send(WatchCommand::Subscribe { sink, filter }).await
    }

    /// Removes a previously registered filter from `sink`.
    pub async fn unsubscribe(
        &self,
        sink: EventSink<K>,
        filter: ResourceEventFilter,
    ) -> Result<(), WatchError> {
        self.send(WatchCommand::Unsubscribe { sink, filter }).await
    }

    /// Removes every filter registered on `sink`.
    pub async fn unsubscribe_all(&self, sink: EventSink<K>) -> Result<(), WatchError> {
        self.send(WatchCommand::UnsubscribeAll { sink }).await
    }

    async fn send(&self, command: WatchCommand<K>) -> Result<(), WatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WatchError::Terminated)
    }
}

impl<K: Send + 'static> WorkerHandle<()> for ResourceWatchHandle<K> {
    fn state(&self) {}

    async fn wait(self) -> Result<(), WorkerWaitError> {
        if let Some(handle) = self.handle {
            handle.await??;
        }

        Ok(())
    }
}
