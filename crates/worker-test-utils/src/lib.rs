//! # Worker Test Utilities
//!
//! Mocks and fixtures for exercising the worker agent without a real
//! broker or parent process.
//!
//! ## Modules
//!
//! - `mock_broker` - Scriptable broker link with a handle for assertions
//! - `recording_controller` - Controller that records faults, closes and metadata
//! - `recording_logger` - Counts logging reconfigurations
//! - `fixtures` - Launch arguments and identities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use worker_test_utils::*;
//!
//! let broker = MockBroker::builder().fail_role(BrokerRole::Server, "in use").build();
//! let controller = RecordingController::new(Purpose::Webrtc);
//! let supervisor = ProcessSupervisor::new(
//!     WorkerConfig::default(),
//!     fixtures::identity("webrtc"),
//!     Box::new(broker.link()),
//!     controller.factories(),
//!     upstream,
//!     RecordingLogger::new(),
//! );
//! ```

pub mod fixtures;
pub mod mock_broker;
pub mod recording_controller;
pub mod recording_logger;

pub use mock_broker::{BrokerCall, MockBroker, MockBrokerBuilder, MockBrokerLink};
pub use recording_controller::RecordingController;
pub use recording_logger::RecordingLogger;
