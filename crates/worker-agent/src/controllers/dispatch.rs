//! Purpose-keyed controller construction.

use super::{Controller, DispatchError, NodeController, NodeMetadata, Purpose};
use crate::broker::RpcClient;
use crate::config::WorkerConfig;
use crate::identity::NodeIdentity;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::info;

/// What a controller constructor gets to work with.
///
/// Conference and recording controllers address themselves by `rpc_id`,
/// video uses `cluster_ip`, and sip needs both.
pub struct BuildContext {
    pub rpc_client: Arc<dyn RpcClient>,
    pub rpc_id: String,
    pub cluster_ip: String,
    pub config: Arc<WorkerConfig>,
}

pub type ControllerConstructor = Box<dyn Fn(&BuildContext) -> Arc<dyn Controller> + Send + Sync>;

/// One constructor per purpose.
pub struct ControllerFactories {
    conference: ControllerConstructor,
    audio: ControllerConstructor,
    video: ControllerConstructor,
    webrtc: ControllerConstructor,
    streaming: ControllerConstructor,
    recording: ControllerConstructor,
    sip: ControllerConstructor,
}

impl ControllerFactories {
    /// Use the same constructor for every purpose.
    pub fn uniform<F>(construct: F) -> Self
    where
        F: Fn(Purpose, &BuildContext) -> Arc<dyn Controller> + Send + Sync + 'static,
    {
        let construct = Arc::new(construct);
        let for_purpose = |purpose: Purpose| -> ControllerConstructor {
            let construct = Arc::clone(&construct);
            Box::new(move |ctx| construct(purpose, ctx))
        };

        Self {
            conference: for_purpose(Purpose::Conference),
            audio: for_purpose(Purpose::Audio),
            video: for_purpose(Purpose::Video),
            webrtc: for_purpose(Purpose::Webrtc),
            streaming: for_purpose(Purpose::Streaming),
            recording: for_purpose(Purpose::Recording),
            sip: for_purpose(Purpose::Sip),
        }
    }

    /// [`NodeController`] for every purpose.
    #[must_use]
    pub fn node_controllers() -> Self {
        Self::uniform(|purpose, ctx| Arc::new(NodeController::new(purpose, ctx)))
    }

    /// Node controllers that also answer `getMetrics` from `handle`.
    #[must_use]
    pub fn node_controllers_with_metrics(handle: PrometheusHandle) -> Self {
        Self::uniform(move |purpose, ctx| {
            Arc::new(NodeController::new(purpose, ctx).with_metrics(handle.clone()))
        })
    }

    /// Replace the constructor for one purpose.
    #[must_use]
    pub fn with<F>(mut self, purpose: Purpose, construct: F) -> Self
    where
        F: Fn(&BuildContext) -> Arc<dyn Controller> + Send + Sync + 'static,
    {
        *self.slot(purpose) = Box::new(construct);
        self
    }

    fn slot(&mut self, purpose: Purpose) -> &mut ControllerConstructor {
        match purpose {
            Purpose::Conference => &mut self.conference,
            Purpose::Audio => &mut self.audio,
            Purpose::Video => &mut self.video,
            Purpose::Webrtc => &mut self.webrtc,
            Purpose::Streaming => &mut self.streaming,
            Purpose::Recording => &mut self.recording,
            Purpose::Sip => &mut self.sip,
        }
    }

    /// Construct the controller for `purpose`.
    pub fn build(&self, purpose: Purpose, ctx: &BuildContext) -> Arc<dyn Controller> {
        let construct = match purpose {
            Purpose::Conference => &self.conference,
            Purpose::Audio => &self.audio,
            Purpose::Video => &self.video,
            Purpose::Webrtc => &self.webrtc,
            Purpose::Streaming => &self.streaming,
            Purpose::Recording => &self.recording,
            Purpose::Sip => &self.sip,
        };
        construct(ctx)
    }
}

impl Default for ControllerFactories {
    fn default() -> Self {
        Self::node_controllers()
    }
}

/// A constructed controller with its attached metadata.
pub struct Dispatched {
    pub purpose: Purpose,
    pub controller: Arc<dyn Controller>,
    pub metadata: Arc<NodeMetadata>,
}

/// Build the controller for `identity.purpose` and attach node metadata.
///
/// Each interface's `ip_address` filter is compiled here, once.
///
/// # Errors
///
/// Returns `DispatchError::AmbiguousPurpose` if the purpose matches no
/// variant. No controller is constructed in that case.
pub fn dispatch(
    factories: &ControllerFactories,
    rpc_client: Arc<dyn RpcClient>,
    identity: &NodeIdentity,
    config: Arc<WorkerConfig>,
) -> Result<Dispatched, DispatchError> {
    let purpose: Purpose = identity.purpose.parse()?;

    let ctx = BuildContext {
        rpc_client,
        rpc_id: identity.rpc_id.clone(),
        cluster_ip: identity.cluster_ip.clone(),
        config,
    };
    let controller = factories.build(purpose, &ctx);

    let mut network_interfaces = identity.network_interfaces.clone();
    for interface in &mut network_interfaces {
        interface.compile_match_pattern();
    }
    let metadata = Arc::new(NodeMetadata {
        network_interfaces,
        cluster_ip: identity.cluster_ip.clone(),
        agent_id: identity.parent_id.clone(),
    });
    controller.attach_metadata(Arc::clone(&metadata));

    info!(
        target: "worker.dispatch",
        purpose = %purpose,
        rpc_id = %identity.rpc_id,
        interfaces = metadata.network_interfaces.len(),
        "Controller constructed"
    );

    Ok(Dispatched {
        purpose,
        controller,
        metadata,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::{RpcClient, RpcError};
    use crate::identity::NetworkInterface;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock};

    struct NoopClient;

    #[async_trait::async_trait]
    impl RpcClient for NoopClient {
        async fn call(
            &self,
            target: &str,
            _method: &str,
            _args: Vec<Value>,
        ) -> Result<Value, RpcError> {
            Err(RpcError::UnknownTarget(target.to_string()))
        }
    }

    struct StubController {
        purpose: Purpose,
        metadata: OnceLock<Arc<NodeMetadata>>,
    }

    impl Controller for StubController {
        fn purpose(&self) -> Purpose {
            self.purpose
        }

        fn attach_metadata(&self, metadata: Arc<NodeMetadata>) {
            let _ = self.metadata.set(metadata);
        }
    }

    fn identity(purpose: &str) -> NodeIdentity {
        NodeIdentity {
            rpc_id: "worker-7".to_string(),
            parent_id: "agent-1".to_string(),
            purpose: purpose.to_string(),
            cluster_ip: "10.0.0.5".to_string(),
            network_interfaces: vec![
                NetworkInterface::new("eth0").with_ip_address(r"10\.0\.0\.\d+"),
                NetworkInterface::new("eth1"),
            ],
        }
    }

    fn run(factories: &ControllerFactories, purpose: &str) -> Result<Dispatched, DispatchError> {
        dispatch(
            factories,
            Arc::new(NoopClient),
            &identity(purpose),
            Arc::new(WorkerConfig::default()),
        )
    }

    #[test]
    fn test_every_purpose_dispatches_to_its_variant() {
        let factories = ControllerFactories::uniform(|purpose, ctx| {
            assert_eq!(ctx.rpc_id, "worker-7");
            Arc::new(StubController {
                purpose,
                metadata: OnceLock::new(),
            })
        });

        for purpose in Purpose::ALL {
            let dispatched = run(&factories, purpose.as_str()).unwrap();
            assert_eq!(dispatched.purpose, purpose);
            assert_eq!(dispatched.controller.purpose(), purpose);
        }
    }

    #[test]
    fn test_unknown_purpose_constructs_nothing() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let factories = ControllerFactories::uniform(move |purpose, ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(NodeController::new(purpose, ctx))
        });

        let result = run(&factories, "mixer");
        assert!(matches!(
            result,
            Err(DispatchError::AmbiguousPurpose(ref p)) if p == "mixer"
        ));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_metadata_is_attached_with_compiled_filters() {
        let stub = Arc::new(StubController {
            purpose: Purpose::Webrtc,
            metadata: OnceLock::new(),
        });
        let handle = Arc::clone(&stub);
        let factories = ControllerFactories::node_controllers()
            .with(Purpose::Webrtc, move |_| Arc::clone(&handle) as Arc<dyn Controller>);

        let dispatched = run(&factories, "webrtc").unwrap();

        let attached = stub.metadata.get().unwrap();
        assert!(Arc::ptr_eq(attached, &dispatched.metadata));
        assert_eq!(attached.cluster_ip, "10.0.0.5");
        assert_eq!(attached.agent_id, "agent-1");

        let eth0 = attached.network_interfaces.first().unwrap();
        assert!(eth0.matches_address("10.0.0.42"));
        assert!(!eth0.matches_address("192.168.0.1"));

        let eth1 = attached.network_interfaces.get(1).unwrap();
        assert!(eth1.match_pattern().is_none());
        assert!(eth1.ip_address.is_none());
    }

    #[test]
    fn test_build_context_carries_identity() {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let factories = ControllerFactories::node_controllers().with(Purpose::Sip, move |ctx| {
            *record.lock().unwrap() = Some(format!("{}@{}", ctx.rpc_id, ctx.cluster_ip));
            Arc::new(StubController {
                purpose: Purpose::Sip,
                metadata: OnceLock::new(),
            })
        });

        let ctx = BuildContext {
            rpc_client: Arc::new(NoopClient),
            rpc_id: "sip-1".to_string(),
            cluster_ip: "10.0.0.9".to_string(),
            config: Arc::new(WorkerConfig::default()),
        };
        let controller = factories.build(Purpose::Sip, &ctx);
        assert_eq!(controller.purpose(), Purpose::Sip);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("sip-1@10.0.0.9"));

        // Other purposes keep the default node controller
        let controller = factories.build(Purpose::Audio, &ctx);
        assert_eq!(controller.purpose(), Purpose::Audio);
    }
}
