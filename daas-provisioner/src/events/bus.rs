//! In-memory subscription registry for resource change events.

use kube::ResourceExt;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::k8s::ResourceEvent;

/// Channel end on which a subscriber receives matching events.
pub type EventSink<K> = mpsc::Sender<ResourceEvent<K>>;

/// Criteria deciding whether an event is delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEventFilter {
    /// Matches a single resource by namespace and name.
    ///
    /// A [`None`] namespace matches resources in any namespace.
    Exact {
        namespace: Option<String>,
        name: String,
    },
    /// Matches any resource carrying all of the given labels.
    Labels(BTreeMap<String, String>),
}

impl ResourceEventFilter {
    /// Builds an [`ResourceEventFilter::Exact`] filter for the given resource,
    /// so a subscriber can track exactly the object it received an event for.
    pub fn exact_match<K: ResourceExt>(resource: &K) -> Self {
        Self::Exact {
            namespace: resource.namespace(),
            name: resource.name_any(),
        }
    }

    /// Whether this filter selects the given resource.
    pub fn matches<K: ResourceExt>(&self, resource: &K) -> bool {
        match self {
            Self::Exact { namespace, name } => {
                let namespace_matches = match namespace {
                    Some(namespace) => resource.namespace().as_deref() == Some(namespace),
                    None => true,
                };

                namespace_matches && resource.name_any() == *name
            }
            Self::Labels(labels) => {
                let resource_labels = resource.labels();

                labels
                    .iter()
                    .all(|(key, value)| resource_labels.get(key) == Some(value))
            }
        }
    }
}

struct Subscription<K> {
    sink: EventSink<K>,
    filters: Vec<ResourceEventFilter>,
}

/// Registry distributing each published event to every subscriber with at
/// least one matching filter.
///
/// Each subscriber receives an event at most once per publish, no matter how
/// many of its filters match. Delivery is lossy under backpressure: a
/// subscriber whose channel is full misses that event but keeps its
/// subscription, so the events it does receive stay in publish order.
/// Subscribers whose channel has closed are pruned on the next publish that
/// would have reached them.
pub struct ResourceEventBus<K> {
    subscriptions: Vec<Subscription<K>>,
}

impl<K> Default for ResourceEventBus<K> {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }
}

impl<K: Clone + ResourceExt> ResourceEventBus<K> {
    /// Registers a filter on a sink, creating the subscription if the sink is
    /// new. Adding the same filter twice is a no-op.
    pub fn subscribe(&mut self, sink: EventSink<K>, filter: ResourceEventFilter) {
        match self.subscription_mut(&sink) {
            Some(subscription) => {
                if !subscription.filters.contains(&filter) {
                    subscription.filters.push(filter);
                }
            }
            None => self.subscriptions.push(Subscription {
                sink,
                filters: vec![filter],
            }),
        }
    }

    /// Removes a filter from a sink, dropping the subscription entirely once
    /// its last filter is gone.
    pub fn unsubscribe(&mut self, sink: &EventSink<K>, filter: &ResourceEventFilter) {
        if let Some(subscription) = self.subscription_mut(sink) {
            subscription.filters.retain(|existing| existing != filter);
        }

        self.subscriptions
            .retain(|subscription| !subscription.filters.is_empty());
    }

    /// Drops every filter registered on a sink.
    pub fn unsubscribe_all(&mut self, sink: &EventSink<K>) {
        self.subscriptions
            .retain(|subscription| !subscription.sink.same_channel(sink));
    }

    /// Delivers an event to every subscriber with a matching filter.
    pub fn publish(&mut self, event: &ResourceEvent<K>) {
        let mut closed = Vec::new();

        for (index, subscription) in self.subscriptions.iter().enumerate() {
            let matched = subscription
                .filters
                .iter()
                .any(|filter| filter.matches(&event.resource));
            if !matched {
                continue;
            }

            match subscription.sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("dropping event for a subscriber whose channel is full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(index),
            }
        }

        // Remove in reverse so earlier indices stay valid.
        for index in closed.into_iter().rev() {
            debug!("removing event subscriber whose channel is closed");
            self.subscriptions.remove(index);
        }
    }

    /// Number of live subscriptions, mainly for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn subscription_mut(&mut self, sink: &EventSink<K>) -> Option<&mut Subscription<K>> {
        self.subscriptions
            .iter_mut()
            .find(|subscription| subscription.sink.same_channel(sink))
    }
}
