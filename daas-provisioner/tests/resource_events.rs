use std::collections::BTreeMap;
use tokio::sync::mpsc;

use daas_provisioner::concurrency::shutdown::create_shutdown_channel;
use daas_provisioner::events::bus::ResourceEventFilter;
use daas_provisioner::events::watch::ServiceWatch;
use daas_provisioner::k8s::ResourceChange;
use daas_provisioner::workers::base::{Worker, WorkerHandle};
use daas_telemetry::init_test_tracing;

use crate::common::cluster::{FakeCluster, service};

mod common;

#[tokio::test]
async fn events_are_routed_to_matching_subscribers_only() {
    init_test_tracing();

    let cluster = FakeCluster::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let watch = ServiceWatch::new(cluster.clone(), shutdown_rx);
    let handle = watch.start().await.expect("the watch should start");

    let (by_name_tx, mut by_name_rx) = mpsc::channel(4);
    handle
        .subscribe(
            by_name_tx,
            ResourceEventFilter::Exact {
                namespace: None,
                name: "sql-srv-a".to_owned(),
            },
        )
        .await
        .unwrap();

    let (by_label_tx, mut by_label_rx) = mpsc::channel(4);
    handle
        .subscribe(
            by_label_tx,
            ResourceEventFilter::Labels(BTreeMap::from([(
                "server-id".to_owned(),
                "srv-b".to_owned(),
            )])),
        )
        .await
        .unwrap();

    cluster.publish_service_event(ResourceChange::Added, service("sql-srv-b", "srv-b", 1433));
    cluster.publish_service_event(ResourceChange::Modified, service("sql-srv-a", "srv-a", 1433));

    let event = by_label_rx.recv().await.expect("label subscriber notified");
    assert_eq!(event.change, ResourceChange::Added);
    assert_eq!(event.resource.metadata.name.as_deref(), Some("sql-srv-b"));

    let event = by_name_rx.recv().await.expect("name subscriber notified");
    assert_eq!(event.change, ResourceChange::Modified);
    assert_eq!(event.resource.metadata.name.as_deref(), Some("sql-srv-a"));

    // Neither subscriber saw the event meant for the other.
    assert!(by_label_rx.try_recv().is_err());
    assert!(by_name_rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribed_sinks_stop_receiving_events() {
    init_test_tracing();

    let cluster = FakeCluster::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let watch = ServiceWatch::new(cluster.clone(), shutdown_rx);
    let handle = watch.start().await.expect("the watch should start");

    let filter = ResourceEventFilter::Exact {
        namespace: None,
        name: "sql-srv-a".to_owned(),
    };

    let (first_tx, mut first_rx) = mpsc::channel(4);
    handle
        .subscribe(first_tx.clone(), filter.clone())
        .await
        .unwrap();

    cluster.publish_service_event(ResourceChange::Added, service("sql-srv-a", "srv-a", 1433));
    first_rx.recv().await.expect("subscriber notified");

    handle.unsubscribe_all(first_tx).await.unwrap();

    // A control subscriber proves the later event was distributed.
    let (control_tx, mut control_rx) = mpsc::channel(4);
    handle.subscribe(control_tx, filter).await.unwrap();

    cluster.publish_service_event(ResourceChange::Modified, service("sql-srv-a", "srv-a", 1433));
    control_rx.recv().await.expect("control notified");

    assert!(first_rx.try_recv().is_err());
}

#[tokio::test]
async fn exact_match_filter_tracks_the_event_resource() {
    init_test_tracing();

    let cluster = FakeCluster::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let watch = ServiceWatch::new(cluster.clone(), shutdown_rx);
    let handle = watch.start().await.expect("the watch should start");

    let tracked = service("sql-srv-a", "srv-a", 1433);
    let (tx, mut rx) = mpsc::channel(4);
    handle
        .subscribe(tx, ResourceEventFilter::exact_match(&tracked))
        .await
        .unwrap();

    cluster.publish_service_event(ResourceChange::Deleted, tracked);

    let event = rx.recv().await.expect("subscriber notified");
    assert_eq!(event.change, ResourceChange::Deleted);
}

#[tokio::test]
async fn shutdown_signal_stops_the_watch() {
    init_test_tracing();

    let cluster = FakeCluster::new();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let watch = ServiceWatch::new(cluster, shutdown_rx);
    let handle = watch.start().await.expect("the watch should start");

    shutdown_tx.shutdown().expect("the watch is listening");

    handle.wait().await.expect("the watch stops cleanly");
}
