//! Pod creation: pipeline ordering, partial failure, progress streaming.

mod common;

use can_api::proto::pods::{
    Container as ApiContainer, CreatePodRequest, DeletePodRequest, ListPodsRequest, Metadata,
    Pod as ApiPod, PodSpec as ApiPodSpec, StartPodRequest, pods_client::PodsClient,
};
use can_api::runtime::RuntimeClient;
use can_api::services::pod::pipeline::run_create;
use common::{Call, ClosedSink, CollectingSink, FakeRuntime, LAYER_BYTES, TestServer, pod};
use std::sync::Arc;
use std::time::Duration;
use tonic::Code;

const CADENCE: Duration = Duration::from_millis(100);

fn runtime(fake: FakeRuntime) -> (Arc<FakeRuntime>, Arc<dyn RuntimeClient>) {
    let fake = Arc::new(fake);
    let runtime: Arc<dyn RuntimeClient> = fake.clone();
    (fake, runtime)
}

#[tokio::test]
async fn all_containers_are_pulled_then_created_in_order() {
    let (fake, runtime) = runtime(FakeRuntime::new());
    let sink = CollectingSink::default();
    let spec = pod(
        "default",
        "web",
        &[("nginx", "nginx:1.25"), ("sidecar", "busybox:latest"), ("cache", "redis:7")],
    );

    let (result, summary) = run_create(runtime, spec, sink.clone(), CADENCE, "op-1").await;

    result.unwrap();
    assert!(summary.final_delivered);
    assert_eq!(
        fake.calls(),
        [
            Call::Pull("nginx:1.25".into()),
            Call::Create("nginx".into()),
            Call::Pull("busybox:latest".into()),
            Call::Create("sidecar".into()),
            Call::Pull("redis:7".into()),
            Call::Create("cache".into()),
        ]
    );

    let snapshots = sink.snapshots();
    let last = snapshots.last().unwrap();
    let names: Vec<_> = last.iter().map(|p| p.container_name.as_str()).collect();
    assert_eq!(names, ["nginx", "sidecar", "cache"]);
    assert!(last.iter().all(|p| p.done));
    assert!(last.iter().all(|p| p.bytes_fetched == 2 * LAYER_BYTES));
}

#[tokio::test]
async fn pull_failure_stops_before_later_containers() {
    let (fake, runtime) = runtime(FakeRuntime::new().fail_pull("busybox:latest"));
    let sink = CollectingSink::default();
    let spec = pod(
        "default",
        "web",
        &[("nginx", "nginx:1.25"), ("sidecar", "busybox:latest"), ("cache", "redis:7")],
    );

    let (result, _) = run_create(runtime, spec, sink.clone(), CADENCE, "op-2").await;

    let err = result.unwrap_err();
    assert!(
        err.to_string().starts_with("Failed to pull image [busybox:latest]"),
        "unexpected error: {err}"
    );
    assert!(!fake.calls().contains(&Call::Create("sidecar".into())));
    assert!(!fake.calls().contains(&Call::Pull("redis:7".into())));

    let last = sink.snapshots().pop().unwrap();
    assert_eq!(last.len(), 2, "nothing after the failing container");
    assert!(last[0].done);
    assert!(!last[1].done);
    assert_eq!(last[1].layers_fetched, 1);
}

#[tokio::test]
async fn create_failure_keeps_earlier_containers() {
    let (fake, runtime) = runtime(FakeRuntime::new().fail_create("sidecar"));
    let sink = CollectingSink::default();
    let spec = pod(
        "default",
        "web",
        &[("nginx", "nginx:1.25"), ("sidecar", "busybox:latest"), ("cache", "redis:7")],
    );

    let (result, _) = run_create(runtime, spec, sink.clone(), CADENCE, "op-3").await;

    let err = result.unwrap_err();
    assert!(
        err.to_string().starts_with("Failed to create container [sidecar]"),
        "unexpected error: {err}"
    );
    // No rollback: the first container is still there.
    let containers = fake.get_containers("default", "web").await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "nginx");

    let last = sink.snapshots().pop().unwrap();
    assert_eq!(last.len(), 2);
    assert!(last.iter().all(|p| p.done), "the failing pull itself completed");
}

#[tokio::test(start_paused = true)]
async fn progress_is_broadcast_while_pulls_run() {
    let (_fake, runtime) =
        runtime(FakeRuntime::new().pull_delay(Duration::from_millis(350)));
    let sink = CollectingSink::default();
    let spec = pod(
        "default",
        "web",
        &[("a", "alpine:3"), ("b", "busybox:1"), ("c", "caddy:2")],
    );

    let (result, summary) = run_create(runtime, spec, sink.clone(), CADENCE, "op-4").await;
    result.unwrap();

    // 1050ms of pulls at a 100ms cadence.
    assert!(
        (9..=11).contains(&summary.periodic),
        "periodic broadcasts: {}",
        summary.periodic
    );
    let snapshots = sink.snapshots();
    assert_eq!(snapshots.len(), summary.periodic + 1);
    assert!(
        snapshots.windows(2).all(|w| w[0].len() <= w[1].len()),
        "entries are only ever appended"
    );
    assert!(snapshots[..summary.periodic].iter().any(|s| s.iter().any(|p| !p.done)));
    assert!(snapshots.last().unwrap().iter().all(|p| p.done));
}

#[tokio::test]
async fn broadcast_failures_do_not_abort_creation() {
    let (fake, runtime) = runtime(FakeRuntime::new());
    let spec = pod("default", "web", &[("nginx", "nginx:1.25")]);

    let (result, summary) = run_create(runtime, spec, ClosedSink, CADENCE, "op-5").await;

    result.unwrap();
    assert!(!summary.final_delivered);
    assert_eq!(summary.failed, summary.periodic + 1);
    assert!(fake.calls().contains(&Call::Create("nginx".into())));
}

fn create_request(namespace: &str, name: &str, containers: &[(&str, &str)]) -> CreatePodRequest {
    CreatePodRequest {
        pod: Some(ApiPod {
            metadata: Some(Metadata {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            }),
            spec: Some(ApiPodSpec {
                containers: containers
                    .iter()
                    .map(|(name, image)| ApiContainer {
                        name: name.to_string(),
                        image: image.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            }),
            status: None,
        }),
    }
}

#[tokio::test]
async fn create_stream_ends_with_terminal_snapshot() {
    let fake = Arc::new(FakeRuntime::new());
    let server = TestServer::start(fake.clone()).await;
    let mut client = PodsClient::connect(server.addr.clone()).await.unwrap();

    let mut stream = client
        .create(create_request(
            "default",
            "web",
            &[("nginx", "nginx:1.25"), ("sidecar", "busybox:latest")],
        ))
        .await
        .unwrap()
        .into_inner();

    let mut responses = Vec::new();
    while let Some(response) = stream.message().await.unwrap() {
        responses.push(response);
    }

    let last = responses.last().unwrap();
    assert_eq!(last.images.len(), 2);
    assert!(last.images.iter().all(|i| i.resolved));
    assert_eq!(last.images[1].container_name, "sidecar");
    assert!(!last.operation_id.is_empty());
    assert!(responses.iter().all(|r| r.operation_id == last.operation_id));
}

#[tokio::test]
async fn create_stream_reports_failure_after_final_snapshot() {
    let fake = Arc::new(FakeRuntime::new().fail_pull("broken:latest"));
    let server = TestServer::start(fake.clone()).await;
    let mut client = PodsClient::connect(server.addr.clone()).await.unwrap();

    let mut stream = client
        .create(create_request(
            "default",
            "web",
            &[("nginx", "nginx:1.25"), ("app", "broken:latest")],
        ))
        .await
        .unwrap()
        .into_inner();

    let mut last = None;
    let status = loop {
        match stream.message().await {
            Ok(Some(response)) => last = Some(response),
            Ok(None) => panic!("stream ended without an error status"),
            Err(status) => break status,
        }
    };

    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("Failed to pull image [broken:latest]"));
    let last = last.unwrap();
    assert_eq!(last.images.len(), 2);
    assert!(last.images[0].resolved);
    assert!(!last.images[1].resolved);
}

#[tokio::test]
async fn invalid_pod_is_rejected_before_any_pull() {
    let fake = Arc::new(FakeRuntime::new());
    let server = TestServer::start(fake.clone()).await;
    let mut client = PodsClient::connect(server.addr.clone()).await.unwrap();

    let status = client
        .create(create_request("", "web", &[("nginx", "nginx:1.25")]))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn path_like_names_are_rejected() {
    let fake = Arc::new(FakeRuntime::new());
    let server = TestServer::start(fake.clone()).await;
    let mut client = PodsClient::connect(server.addr.clone()).await.unwrap();

    for (namespace, name, container) in [
        ("../x", "web", "nginx"),
        ("/abs", "web", "nginx"),
        ("default", "../web", "nginx"),
        ("default", "web", "../nginx"),
    ] {
        let status = client
            .create(create_request(namespace, name, &[(container, "nginx:1.25")]))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument, "{namespace}/{name}/{container}");
    }

    for namespace in ["../x", "/abs"] {
        let status = client
            .start(StartPodRequest {
                namespace: namespace.into(),
                name: "web".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        let status = client
            .delete(DeletePodRequest {
                namespace: "default".into(),
                name: format!("{namespace}/web"),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        let status = client
            .list(ListPodsRequest {
                namespace: namespace.into(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn created_pod_can_be_started_listed_and_deleted() {
    let fake = Arc::new(FakeRuntime::new());
    let server = TestServer::start(fake.clone()).await;
    let mut client = PodsClient::connect(server.addr.clone()).await.unwrap();

    let mut stream = client
        .create(create_request("default", "web", &[("nginx", "nginx:1.25")]))
        .await
        .unwrap()
        .into_inner();
    while stream.message().await.unwrap().is_some() {}

    let started = client
        .start(StartPodRequest {
            namespace: "default".into(),
            name: "web".into(),
        })
        .await
        .unwrap()
        .into_inner();
    let status = started.pod.unwrap().status.unwrap();
    assert_eq!(status.container_statuses[0].container_id, "web_nginx");
    assert!(fake.calls().contains(&Call::Start("web_nginx".into())));

    let listed = client
        .list(ListPodsRequest {
            namespace: "default".into(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.pods.len(), 1);

    client
        .delete(DeletePodRequest {
            namespace: "default".into(),
            name: "web".into(),
        })
        .await
        .unwrap();
    assert!(fake.calls().contains(&Call::Stop("web_nginx".into())));

    let status = client
        .start(StartPodRequest {
            namespace: "default".into(),
            name: "web".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}
