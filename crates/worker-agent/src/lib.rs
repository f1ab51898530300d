//! Worker Agent Library
//!
//! Supervises one media-cluster worker process: resolves configuration,
//! connects to the control-plane broker, builds the controller for the
//! node's purpose, wires its RPC and fault-monitoring roles, and keeps the
//! parent agent informed until shutdown.
//!
//! # Architecture
//!
//! ```text
//! main
//!  └── ProcessSupervisor
//!       ├── BrokerLink (connect, rpc client/server, monitor)
//!       ├── ControllerDispatcher (purpose -> Controller + NodeMetadata)
//!       ├── FaultMonitor (monitor events -> Controller::on_fault_detected)
//!       ├── ParentChannel (READY / IMOK / ERROR / ambiguous purpose)
//!       └── signals (SIGINT/SIGTERM shutdown, SIGUSR2 log reload)
//! ```
//!
//! # Modules
//!
//! - `broker`: broker link trait, RPC roles, in-process broker
//! - `cli`: command line and unknown-flag overrides
//! - `config`: configuration file and defaults
//! - `controllers`: controller contract and purpose dispatch
//! - `errors`: error types and exit status mapping
//! - `fault_monitor`: monitor event forwarding
//! - `heartbeat`: `IMOK` liveness loop
//! - `identity`: launch arguments and node identity
//! - `observability`: logging and metrics
//! - `signals`: OS signal routing
//! - `supervisor`: the lifecycle state machine
//! - `upstream`: line protocol to the parent

pub mod broker;
pub mod cli;
pub mod config;
pub mod controllers;
pub mod errors;
pub mod fault_monitor;
pub mod heartbeat;
pub mod identity;
pub mod observability;
pub mod signals;
pub mod supervisor;
pub mod upstream;
