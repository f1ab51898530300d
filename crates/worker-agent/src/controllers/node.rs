//! Default controller.
//!
//! Serves node introspection for any purpose until a purpose-specific
//! controller is plugged into [`super::ControllerFactories`].

use super::{BuildContext, Controller, NodeMetadata, Purpose};
use crate::broker::RpcError;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub struct NodeController {
    purpose: Purpose,
    rpc_id: String,
    metadata: OnceLock<Arc<NodeMetadata>>,
    metrics: Option<PrometheusHandle>,
    closed: AtomicBool,
}

impl NodeController {
    #[must_use]
    pub fn new(purpose: Purpose, ctx: &BuildContext) -> Self {
        Self {
            purpose,
            rpc_id: ctx.rpc_id.clone(),
            metadata: OnceLock::new(),
            metrics: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Serve the Prometheus scrape text through `getMetrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn node_info(&self) -> Value {
        let (cluster_ip, agent_id, interfaces) = match self.metadata.get() {
            Some(metadata) => (
                metadata.cluster_ip.as_str(),
                metadata.agent_id.as_str(),
                serde_json::to_value(&metadata.network_interfaces).unwrap_or(Value::Null),
            ),
            None => ("", "", Value::Array(Vec::new())),
        };

        json!({
            "purpose": self.purpose.as_str(),
            "rpcId": self.rpc_id,
            "clusterIP": cluster_ip,
            "agentId": agent_id,
            "networkInterfaces": interfaces,
        })
    }
}

#[async_trait::async_trait]
impl Controller for NodeController {
    fn purpose(&self) -> Purpose {
        self.purpose
    }

    fn attach_metadata(&self, metadata: Arc<NodeMetadata>) {
        if self.metadata.set(metadata).is_err() {
            warn!(target: "worker.controller.node", "Metadata already attached, ignoring");
        }
    }

    async fn handle_rpc(&self, method: &str, _args: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "getNodeInfo" => Ok(self.node_info()),
            "getMetrics" => match &self.metrics {
                Some(handle) => Ok(Value::String(handle.render())),
                None => Err(RpcError::MethodNotFound(method.to_string())),
            },
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    fn on_fault_detected(&self, message: &Value) {
        warn!(
            target: "worker.controller.node",
            purpose = %self.purpose,
            message = %message,
            "Fault reported by monitored node"
        );
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(target: "worker.controller.node", purpose = %self.purpose, "Controller closed");
        }
    }
}
