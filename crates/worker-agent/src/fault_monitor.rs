//! Forwards monitor events to the controller's fault hook.

use crate::broker::{MonitorEvent, MonitorHandler};
use crate::controllers::Controller;
use crate::observability::metrics;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Build the monitor handler for `controller`.
///
/// Only `abnormal`, `error` and `quit` reach
/// [`Controller::on_fault_detected`]. The handler holds a weak reference;
/// once the controller is gone, events are dropped.
#[must_use]
pub fn attach(controller: &Arc<dyn Controller>) -> MonitorHandler {
    let controller: Weak<dyn Controller> = Arc::downgrade(controller);
    Arc::new(move |event: MonitorEvent| forward(&controller, &event))
}

fn forward(controller: &Weak<dyn Controller>, event: &MonitorEvent) {
    let reason = event.reason.as_str();
    if !event.reason.is_fault() {
        metrics::record_monitor_event(reason, false);
        return;
    }

    let Some(controller) = controller.upgrade() else {
        debug!(target: "worker.fault_monitor", reason = reason, "Controller released, event dropped");
        metrics::record_monitor_event(reason, false);
        return;
    };

    debug!(target: "worker.fault_monitor", reason = reason, "Forwarding fault to controller");
    controller.on_fault_detected(&event.message);
    metrics::record_monitor_event(reason, true);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::MonitorReason;
    use crate::controllers::Purpose;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Faults {
        seen: Mutex<Vec<Value>>,
    }

    impl Controller for Faults {
        fn purpose(&self) -> Purpose {
            Purpose::Conference
        }

        fn on_fault_detected(&self, message: &Value) {
            self.seen.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn test_fault_reasons_are_forwarded() {
        let faults = Arc::new(Faults::default());
        let controller: Arc<dyn Controller> = faults.clone();
        let handler = attach(&controller);

        handler(MonitorEvent::new(MonitorReason::Abnormal, json!({"id": "a"})));
        handler(MonitorEvent::new(MonitorReason::Error, json!({"id": "b"})));
        handler(MonitorEvent::new(MonitorReason::Quit, json!({"id": "c"})));
        handler(MonitorEvent::new(MonitorReason::Other, json!({"id": "d"})));

        let seen = faults.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})]
        );
    }

    #[test]
    fn test_controller_without_hook_is_ignored() {
        struct Quiet;
        impl Controller for Quiet {
            fn purpose(&self) -> Purpose {
                Purpose::Audio
            }
        }

        let controller: Arc<dyn Controller> = Arc::new(Quiet);
        let handler = attach(&controller);
        handler(MonitorEvent::new(MonitorReason::Abnormal, Value::Null));
    }

    #[test]
    fn test_handler_does_not_keep_controller_alive() {
        let faults = Arc::new(Faults::default());
        let controller: Arc<dyn Controller> = faults.clone();
        let handler = attach(&controller);
        assert_eq!(Arc::strong_count(&faults), 2);

        drop(controller);
        assert_eq!(Arc::strong_count(&faults), 1);
        drop(faults);

        // No controller left to forward to
        handler(MonitorEvent::new(MonitorReason::Abnormal, Value::Null));
    }
}
