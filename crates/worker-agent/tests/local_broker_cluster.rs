//! Several workers sharing one in-process broker.
//!
//! Each worker runs its own supervisor over a `LocalBrokerLink`; the test
//! acts as a third node calling into them and publishing monitor events.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use worker_agent::broker::{
    BrokerCredentials, BrokerError, BrokerLink, LocalBroker, MonitorEvent, MonitorReason,
    RpcError,
};
use worker_agent::config::WorkerConfig;
use worker_agent::controllers::{Controller, ControllerFactories, Purpose};
use worker_agent::signals::ProcessSignal;
use worker_agent::supervisor::{ProcessSupervisor, SetupStage, SupervisorExit};
use worker_agent::upstream::{ParentChannel, UpstreamMessage};
use worker_test_utils::fixtures::{self, TEST_PARENT_ID};
use worker_test_utils::{RecordingController, RecordingLogger};

struct Worker {
    upstream: mpsc::UnboundedReceiver<UpstreamMessage>,
    signals: mpsc::Sender<ProcessSignal>,
    run: JoinHandle<SupervisorExit>,
}

fn start_worker(
    broker: &LocalBroker,
    purpose: &str,
    rpc_id: &str,
    factories: ControllerFactories,
) -> Worker {
    let (upstream_tx, upstream) = ParentChannel::from_test_channel();
    let (signals, signals_rx) = mpsc::channel(4);
    let supervisor = ProcessSupervisor::new(
        WorkerConfig::default(),
        fixtures::identity_with_rpc_id(purpose, rpc_id),
        Box::new(broker.link()),
        factories,
        upstream_tx,
        RecordingLogger::new(),
    );
    Worker {
        upstream,
        signals,
        run: tokio::spawn(supervisor.run(signals_rx)),
    }
}

fn credentials() -> BrokerCredentials {
    BrokerCredentials::from(&WorkerConfig::default().rabbit)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .context("condition not reached in time")
}

#[tokio::test]
async fn test_node_controllers_answer_node_info() -> anyhow::Result<()> {
    let broker = LocalBroker::new();
    let mut webrtc = start_worker(
        &broker,
        "webrtc",
        "webrtc-1",
        ControllerFactories::node_controllers(),
    );
    let mut conference = start_worker(
        &broker,
        "conference",
        "conference-1",
        ControllerFactories::node_controllers(),
    );
    assert_eq!(webrtc.upstream.recv().await, Some(UpstreamMessage::Ready));
    assert_eq!(conference.upstream.recv().await, Some(UpstreamMessage::Ready));

    let mut caller = broker.link();
    caller.connect(&credentials()).await?;
    let client = caller.as_rpc_client().await?;

    let info = client.call("webrtc-1", "getNodeInfo", vec![]).await?;
    assert_eq!(info.get("purpose"), Some(&json!("webrtc")));
    assert_eq!(info.get("rpcId"), Some(&json!("webrtc-1")));
    assert_eq!(info.get("agentId"), Some(&json!(TEST_PARENT_ID)));
    assert_eq!(
        info.pointer("/networkInterfaces/0/name"),
        Some(&json!("eth0"))
    );

    let info = client.call("conference-1", "getNodeInfo", vec![]).await?;
    assert_eq!(info.get("purpose"), Some(&json!("conference")));

    for worker in [webrtc, conference] {
        worker.signals.send(ProcessSignal::Terminate).await?;
        assert_eq!(
            worker.run.await?,
            SupervisorExit::Shutdown(ProcessSignal::Terminate)
        );
    }

    // Both identities were released on disconnect
    assert!(!broker.is_serving("webrtc-1"));
    assert!(!broker.is_serving("conference-1"));
    assert_eq!(
        client.call("webrtc-1", "getNodeInfo", vec![]).await,
        Err(RpcError::UnknownTarget("webrtc-1".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_monitor_events_fan_out_to_every_worker() -> anyhow::Result<()> {
    let broker = LocalBroker::new();
    let first = RecordingController::new(Purpose::Audio);
    let second = RecordingController::new(Purpose::Video);

    let mut audio = start_worker(&broker, "audio", "audio-1", first.factories());
    let mut video = start_worker(&broker, "video", "video-1", second.factories());
    assert_eq!(audio.upstream.recv().await, Some(UpstreamMessage::Ready));
    assert_eq!(video.upstream.recv().await, Some(UpstreamMessage::Ready));

    let fault = json!({"purpose": "webrtc", "id": "webrtc-3", "type": "node"});
    broker.publish_monitor(MonitorEvent::new(MonitorReason::Other, json!({})));
    broker.publish_monitor(MonitorEvent::new(MonitorReason::Quit, fault.clone()));

    eventually(|| first.faults().len() == 1 && second.faults().len() == 1).await?;
    assert_eq!(first.faults(), vec![fault.clone()]);
    assert_eq!(second.faults(), vec![fault]);

    for worker in [audio, video] {
        worker.signals.send(ProcessSignal::Interrupt).await?;
        worker.run.await?;
    }
    assert_eq!(first.close_count(), 1);
    assert_eq!(second.close_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_rpc_id_fails_second_worker() -> anyhow::Result<()> {
    let broker = LocalBroker::new();
    let mut original = start_worker(
        &broker,
        "streaming",
        "streaming-1",
        ControllerFactories::node_controllers(),
    );
    assert_eq!(original.upstream.recv().await, Some(UpstreamMessage::Ready));

    let mut duplicate = start_worker(
        &broker,
        "streaming",
        "streaming-1",
        ControllerFactories::node_controllers(),
    );
    assert_eq!(duplicate.upstream.recv().await, Some(UpstreamMessage::Error));
    assert_eq!(
        duplicate.run.await?,
        SupervisorExit::SetupFailed(SetupStage::ServerRole)
    );

    // The original registration survives the failed duplicate
    assert!(broker.is_serving("streaming-1"));

    original.signals.send(ProcessSignal::Terminate).await?;
    original.run.await?;
    Ok(())
}

#[tokio::test]
async fn test_closed_broker_fails_connect() -> anyhow::Result<()> {
    let broker = LocalBroker::new();
    broker.close();

    let mut worker = start_worker(
        &broker,
        "sip",
        "sip-1",
        ControllerFactories::node_controllers(),
    );
    assert_eq!(worker.upstream.recv().await, Some(UpstreamMessage::Error));
    assert_eq!(
        worker.run.await?,
        SupervisorExit::SetupFailed(SetupStage::Connect)
    );

    let mut link = broker.link();
    assert!(matches!(
        link.connect(&credentials()).await,
        Err(BrokerError::Connect(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_custom_controller_for_one_purpose() -> anyhow::Result<()> {
    let broker = LocalBroker::new();
    let recording = RecordingController::new(Purpose::Recording);
    let handle = Arc::clone(&recording);
    let factories = ControllerFactories::node_controllers()
        .with(Purpose::Recording, move |_| {
            Arc::clone(&handle) as Arc<dyn Controller>
        });

    let mut worker = start_worker(&broker, "recording", "recording-1", factories);
    assert_eq!(worker.upstream.recv().await, Some(UpstreamMessage::Ready));

    let mut caller = broker.link();
    caller.connect(&credentials()).await?;
    let client = caller.as_rpc_client().await?;
    let reply = client.call("recording-1", "echo", vec![json!("x")]).await?;
    assert_eq!(reply, json!({"purpose": "recording", "args": ["x"]}));
    assert!(recording.metadata().is_some());

    worker.signals.send(ProcessSignal::Terminate).await?;
    worker.run.await?;
    assert_eq!(recording.close_count(), 1);
    Ok(())
}
