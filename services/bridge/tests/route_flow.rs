
use std::sync::Arc;

use harness::{registered, unregistered, RouteHarness, ROUTES};
use tether_bridge::collector::RouteCollector;
use tether_events::{RouteMessage, Routes};
use tether_lrp::Desirer;
use tether_testing::{lrp, FakeCluster};

#[tokio::test]
async fn collector_registers_ready_instance() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    cluster
        .desire(&lrp("odin", "v1", 1, Some(ROUTES)))
        .await
        .unwrap();

    let messages = RouteCollector::new(cluster).collect().await.unwrap();

    assert_eq!(
        messages,
        vec![RouteMessage {
            instance_id: "odin-v1-0".to_string(),
            name: "odin".to_string(),
            address: "10.0.0.5".to_string(),
            port: 8080,
            tls_port: 0,
            routes: Routes {
                registered_routes: vec!["foo.example.com".to_string()],
                unregistered_routes: vec![],
            },
        }]
    );
}

#[tokio::test]
async fn collector_skips_instances_without_address() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    cluster
        .desire(&lrp("odin", "v1", 3, Some(ROUTES)))
        .await
        .unwrap();
    let mut pod = cluster.pod("odin-v1-1").unwrap();
    pod.ip = None;
    cluster.apply_pod(pod);

    let messages = RouteCollector::new(cluster).collect().await.unwrap();

    let instances: Vec<_> = messages.iter().map(|m| m.instance_id.as_str()).collect();
    assert_eq!(instances, vec!["odin-v1-0", "odin-v1-2"]);
    assert!(messages
        .iter()
        .all(|m| m.routes.registered_routes == vec!["foo.example.com"]));
}

#[tokio::test]
async fn scale_down_unregisters_departing_instances() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    cluster
        .desire(&lrp("odin", "v1", 3, Some(ROUTES)))
        .await
        .unwrap();
    let mut harness = RouteHarness::start(cluster.clone()).await;

    cluster
        .update(&lrp("odin", "v1", 1, Some(ROUTES)))
        .await
        .unwrap();
    let messages = harness.drain().await;

    let gone = unregistered(&messages);
    assert_eq!(gone.len(), 2);
    assert!(registered(&messages).is_empty());

    let mut departed: Vec<_> = gone
        .iter()
        .map(|m| (m.instance_id.as_str(), m.address.as_str(), m.port))
        .collect();
    departed.sort();
    assert_eq!(
        departed,
        vec![("odin-v1-1", "10.0.0.6", 8080), ("odin-v1-2", "10.0.0.7", 8080)]
    );

    harness.stop().await;
}

#[tokio::test]
async fn stopping_one_instance_unregisters_only_that_instance() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    let app = lrp("odin", "v1", 2, Some(ROUTES));
    cluster.desire(&app).await.unwrap();
    let mut harness = RouteHarness::start(cluster.clone()).await;

    cluster.stop_instance(&app.identifier, 1).await.unwrap();
    let messages = harness.drain().await;

    let gone = unregistered(&messages);
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].instance_id, "odin-v1-1");
    assert_eq!(gone[0].address, "10.0.0.6");

    // The replacement registers under its new address.
    let back = registered(&messages);
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].instance_id, "odin-v1-1");
    assert_ne!(back[0].address, "10.0.0.6");

    harness.stop().await;
}

#[tokio::test]
async fn deleting_workload_unregisters_remaining_pods() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    let app = lrp("odin", "v1", 3, Some(ROUTES));
    cluster.desire(&app).await.unwrap();
    let mut harness = RouteHarness::start(cluster.clone()).await;

    cluster.delete_workload_only(&app.identifier).unwrap();
    let messages = harness.drain().await;

    assert_eq!(messages.len(), 3);
    assert_eq!(unregistered(&messages).len(), 3);

    harness.stop().await;
}

#[tokio::test]
async fn deleting_workload_without_pods_is_silent() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    let app = lrp("odin", "v1", 0, Some(ROUTES));
    cluster.desire(&app).await.unwrap();
    let mut harness = RouteHarness::start(cluster.clone()).await;

    cluster.delete_workload_only(&app.identifier).unwrap();
    assert!(harness.drain().await.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn route_annotation_change_moves_instances() {
    let cluster = Arc::new(FakeCluster::new("apps"));
    cluster
        .desire(&lrp("odin", "v1", 2, Some(ROUTES)))
        .await
        .unwrap();
    let mut harness = RouteHarness::start(cluster.clone()).await;

    cluster
        .update(&lrp(
            "odin",
            "v1",
            2,
            Some(r#"[{"hostname":"bar.example.com","port":8080}]"#),
        ))
        .await
        .unwrap();
    let messages = harness.drain().await;

    let gone = unregistered(&messages);
    let added = registered(&messages);
    assert_eq!(gone.len(), 2);
    assert_eq!(added.len(), 2);
    assert!(gone
        .iter()
        .all(|m| m.routes.unregistered_routes == vec!["foo.example.com"]));
    assert!(added
        .iter()
        .all(|m| m.routes.registered_routes == vec!["bar.example.com"]));

    harness.stop().await;
}
