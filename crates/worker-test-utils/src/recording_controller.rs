//! Controller that records what the supervisor does to it.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use worker_agent::broker::RpcError;
use worker_agent::controllers::{Controller, ControllerFactories, NodeMetadata, Purpose};

pub struct RecordingController {
    purpose: Purpose,
    faults: Mutex<Vec<Value>>,
    closes: AtomicUsize,
    constructions: AtomicUsize,
    metadata: OnceLock<Arc<NodeMetadata>>,
}

impl RecordingController {
    #[must_use]
    pub fn new(purpose: Purpose) -> Arc<Self> {
        Arc::new(Self {
            purpose,
            faults: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            constructions: AtomicUsize::new(0),
            metadata: OnceLock::new(),
        })
    }

    /// Factories that hand out this controller for every purpose and count
    /// how often a controller was constructed.
    #[must_use]
    pub fn factories(self: &Arc<Self>) -> ControllerFactories {
        let controller = Arc::clone(self);
        ControllerFactories::uniform(move |_, _| {
            controller.constructions.fetch_add(1, Ordering::SeqCst);
            Arc::clone(&controller) as Arc<dyn Controller>
        })
    }

    /// Fault messages received, in order.
    #[must_use]
    pub fn faults(&self) -> Vec<Value> {
        self.faults.lock().unwrap().clone()
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn metadata(&self) -> Option<Arc<NodeMetadata>> {
        self.metadata.get().cloned()
    }
}

#[async_trait::async_trait]
impl Controller for RecordingController {
    fn purpose(&self) -> Purpose {
        self.purpose
    }

    fn attach_metadata(&self, metadata: Arc<NodeMetadata>) {
        let _ = self.metadata.set(metadata);
    }

    async fn handle_rpc(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "echo" => Ok(json!({ "purpose": self.purpose.as_str(), "args": args })),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    fn on_fault_detected(&self, message: &Value) {
        self.faults.lock().unwrap().push(message.clone());
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
