//! Node identity from process launch arguments.
//!
//! The parent agent spawns each worker with three positional arguments:
//! the RPC identity, the parent (agent) identity, and a JSON node
//! configuration:
//!
//! ```json
//! {
//!   "purpose": "webrtc",
//!   "clusterIP": "10.0.0.5",
//!   "webrtc": { "network_interface": [{ "name": "eth0", "ip_address": "10\\.0\\..*" }] }
//! }
//! ```
//!
//! [`NodeIdentity`] is immutable for the process lifetime.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Invalid node configuration: {0}")]
    InvalidNodeConfig(String),
}

/// Raw positional launch arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub rpc_id: String,
    pub parent_id: String,
    pub node_config: String,
}

/// One network interface descriptor.
///
/// Fields other than `name`, `ip_address` and `replaced_ip_address` are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Address filter, compiled into a matcher when a controller is dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_ip_address: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    private_ip_match_pattern: Option<Regex>,
}

impl NetworkInterface {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ip_address(mut self, filter: impl Into<String>) -> Self {
        self.ip_address = Some(filter.into());
        self
    }

    /// Compile the `ip_address` filter, once. Entries without a filter are
    /// left untouched.
    ///
    /// A filter that is not a valid regular expression is matched literally.
    pub fn compile_match_pattern(&mut self) {
        if self.private_ip_match_pattern.is_some() {
            return;
        }
        let Some(filter) = self.ip_address.as_deref().filter(|f| !f.is_empty()) else {
            return;
        };
        self.private_ip_match_pattern = Regex::new(filter)
            .or_else(|_| Regex::new(&regex::escape(filter)))
            .ok();
    }

    #[must_use]
    pub fn match_pattern(&self) -> Option<&Regex> {
        self.private_ip_match_pattern.as_ref()
    }

    /// Whether `address` matches this interface's compiled filter.
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        self.private_ip_match_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(address))
    }
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    #[serde(default)]
    purpose: String,
    #[serde(rename = "clusterIP", default)]
    cluster_ip: String,
    #[serde(default)]
    webrtc: NodeWebrtcConfig,
}

#[derive(Debug, Default, Deserialize)]
struct NodeWebrtcConfig {
    #[serde(default, deserialize_with = "interface_list")]
    network_interface: Vec<NetworkInterface>,
}

/// Anything other than an array yields no interfaces. Entries that are not
/// interface objects are skipped.
fn interface_list<'de, D>(deserializer: D) -> Result<Vec<NetworkInterface>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(iface) => Some(iface),
            Err(e) => {
                warn!(
                    target: "worker.identity",
                    index = index,
                    error = %e,
                    "Skipping malformed network interface entry"
                );
                None
            }
        })
        .collect())
}

/// Identity of this worker node.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub rpc_id: String,
    pub parent_id: String,
    /// Declared purpose, unvalidated. Dispatch decides whether it is known.
    pub purpose: String,
    pub cluster_ip: String,
    pub network_interfaces: Vec<NetworkInterface>,
}

impl NodeIdentity {
    /// Build the identity from launch arguments.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::InvalidNodeConfig` if the node configuration is
    /// not a JSON object of the expected shape.
    pub fn from_launch(args: &LaunchArgs) -> Result<Self, LaunchError> {
        let node_config: NodeConfig = serde_json::from_str(&args.node_config)
            .map_err(|e| LaunchError::InvalidNodeConfig(e.to_string()))?;

        Ok(Self {
            rpc_id: args.rpc_id.clone(),
            parent_id: args.parent_id.clone(),
            purpose: node_config.purpose,
            cluster_ip: node_config.cluster_ip,
            network_interfaces: node_config.webrtc.network_interface,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn launch(node_config: &str) -> LaunchArgs {
        LaunchArgs {
            rpc_id: "webrtc-1@10.0.0.5".to_string(),
            parent_id: "agent-1".to_string(),
            node_config: node_config.to_string(),
        }
    }

    #[test]
    fn test_from_launch_full_config() {
        let identity = NodeIdentity::from_launch(&launch(
            r#"{
                "purpose": "webrtc",
                "clusterIP": "10.0.0.5",
                "webrtc": {
                    "network_interface": [
                        {"name": "eth0", "ip_address": "10\\.0\\..*", "mtu": 1500},
                        {"name": "eth1", "replaced_ip_address": "203.0.113.7"}
                    ]
                }
            }"#,
        ))
        .expect("identity should parse");

        assert_eq!(identity.rpc_id, "webrtc-1@10.0.0.5");
        assert_eq!(identity.parent_id, "agent-1");
        assert_eq!(identity.purpose, "webrtc");
        assert_eq!(identity.cluster_ip, "10.0.0.5");
        assert_eq!(identity.network_interfaces.len(), 2);

        let eth0 = identity.network_interfaces.first().unwrap();
        assert_eq!(eth0.name.as_deref(), Some("eth0"));
        assert_eq!(eth0.extra.get("mtu"), Some(&Value::from(1500)));
        // Not compiled until dispatch
        assert!(eth0.match_pattern().is_none());

        let eth1 = identity.network_interfaces.get(1).unwrap();
        assert_eq!(eth1.replaced_ip_address.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_missing_or_non_array_interfaces_yield_empty_list() {
        let identity =
            NodeIdentity::from_launch(&launch(r#"{"purpose":"audio","clusterIP":"10.0.0.6"}"#))
                .unwrap();
        assert!(identity.network_interfaces.is_empty());

        let identity = NodeIdentity::from_launch(&launch(
            r#"{"purpose":"audio","webrtc":{"network_interface":"eth0"}}"#,
        ))
        .unwrap();
        assert!(identity.network_interfaces.is_empty());
    }

    #[test]
    fn test_malformed_interface_entries_are_skipped() {
        let identity = NodeIdentity::from_launch(&launch(
            r#"{
                "purpose": "webrtc",
                "webrtc": {
                    "network_interface": [
                        "eth0",
                        42,
                        {"name": "eth1", "ip_address": "10\\.0\\..*"}
                    ]
                }
            }"#,
        ))
        .expect("malformed entries must not fail the launch");

        assert_eq!(identity.network_interfaces.len(), 1);
        let eth1 = identity.network_interfaces.first().unwrap();
        assert_eq!(eth1.name.as_deref(), Some("eth1"));
        assert_eq!(eth1.ip_address.as_deref(), Some(r"10\.0\..*"));
    }

    #[test]
    fn test_unknown_purpose_is_not_a_launch_error() {
        let identity = NodeIdentity::from_launch(&launch(r#"{"purpose":"mixer"}"#)).unwrap();
        assert_eq!(identity.purpose, "mixer");
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = NodeIdentity::from_launch(&launch("{purpose: webrtc")).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidNodeConfig(_)));
    }

    #[test]
    fn test_compile_match_pattern() {
        let mut iface = NetworkInterface::new("eth0").with_ip_address(r"^192\.168\.");
        iface.compile_match_pattern();

        assert!(iface.match_pattern().is_some());
        assert!(iface.matches_address("192.168.1.20"));
        assert!(!iface.matches_address("10.0.0.1"));
    }

    #[test]
    fn test_interface_without_filter_is_left_unmodified() {
        let mut iface = NetworkInterface::new("eth0");
        iface.compile_match_pattern();
        assert!(iface.match_pattern().is_none());
        assert!(!iface.matches_address("10.0.0.1"));

        let mut iface = NetworkInterface::new("eth1").with_ip_address("");
        iface.compile_match_pattern();
        assert!(iface.match_pattern().is_none());
    }

    #[test]
    fn test_invalid_filter_matches_literally() {
        let mut iface = NetworkInterface::new("eth0").with_ip_address("10.0.0.(");
        iface.compile_match_pattern();

        assert!(iface.matches_address("10.0.0.("));
        assert!(!iface.matches_address("10.0.0.1"));
    }

    #[test]
    fn test_serialize_skips_compiled_pattern() {
        let mut iface = NetworkInterface::new("eth0").with_ip_address("10.0.0.1");
        iface.compile_match_pattern();

        let json = serde_json::to_value(&iface).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "eth0", "ip_address": "10.0.0.1"})
        );
    }
}
