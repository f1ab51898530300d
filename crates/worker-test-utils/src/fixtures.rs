//! Launch argument and identity fixtures.

use serde_json::json;
use worker_agent::identity::{LaunchArgs, NodeIdentity};

pub const TEST_RPC_ID: &str = "worker-1@10.0.0.5";
pub const TEST_PARENT_ID: &str = "agent-1";
pub const TEST_CLUSTER_IP: &str = "10.0.0.5";

/// Node configuration JSON with one filtered and one unfiltered interface.
#[must_use]
pub fn node_config_json(purpose: &str) -> String {
    json!({
        "purpose": purpose,
        "clusterIP": TEST_CLUSTER_IP,
        "webrtc": {
            "network_interface": [
                { "name": "eth0", "ip_address": r"10\.0\.0\.\d+" },
                { "name": "eth1", "replaced_ip_address": "203.0.113.7" }
            ]
        }
    })
    .to_string()
}

#[must_use]
pub fn launch_args(purpose: &str) -> LaunchArgs {
    LaunchArgs {
        rpc_id: TEST_RPC_ID.to_string(),
        parent_id: TEST_PARENT_ID.to_string(),
        node_config: node_config_json(purpose),
    }
}

/// # Panics
///
/// Panics if the fixture JSON does not parse.
#[must_use]
pub fn identity(purpose: &str) -> NodeIdentity {
    NodeIdentity::from_launch(&launch_args(purpose)).expect("fixture node config parses")
}

/// Identity with a custom RPC id, for running several workers on one broker.
#[must_use]
pub fn identity_with_rpc_id(purpose: &str, rpc_id: &str) -> NodeIdentity {
    NodeIdentity {
        rpc_id: rpc_id.to_string(),
        ..identity(purpose)
    }
}
