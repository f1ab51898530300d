//! Observability for the worker agent.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `worker_heartbeats_total` | Counter | none | `IMOK` messages sent |
//! | `worker_upstream_messages_total` | Counter | `message` | Parent channel traffic |
//! | `worker_monitor_events_total` | Counter | `reason`, `forwarded` | Fault monitor input |
//! | `worker_setup_failures_total` | Counter | `stage` | Setup chain failures |

pub mod logging;
pub mod metrics;

pub use logging::{LogReconfigure, LogReloader, LoggingError};
