//! Worker Agent Binary
//!
//! Launched by the cluster agent as
//! `worker-agent [FLAGS] <RPC_ID> <PARENT_ID> <NODE_CONFIG>`.
//!
//! # Startup
//!
//! 1. Parse the command line (`-h` exits 0 here)
//! 2. Resolve `./agent.toml` with command-line overrides
//! 3. Install logging from the configured logging file
//! 4. Install the Prometheus metrics recorder
//! 5. Start the parent channel on stdout
//! 6. Build the node identity from the launch arguments
//! 7. Hand over to the supervisor until a termination signal
//!
//! Stdout carries only the parent line protocol; logs go to stderr.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use worker_agent::broker::LocalBroker;
use worker_agent::cli::CommandLine;
use worker_agent::config::{self, DEFAULT_CONFIG_PATH};
use worker_agent::controllers::ControllerFactories;
use worker_agent::errors::WorkerError;
use worker_agent::identity::NodeIdentity;
use worker_agent::observability::{logging, metrics};
use worker_agent::signals;
use worker_agent::supervisor::ProcessSupervisor;
use worker_agent::upstream::{ParentChannel, UpstreamMessage};

/// Time allowed for queued parent messages to reach stdout on exit.
const UPSTREAM_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Exit status for clap usage errors that do not fit in a `u8`.
const USAGE_EXIT_CODE: u8 = 2;

/// Exit status for startup failures outside the supervisor.
const SETUP_FAILURE_EXIT_CODE: u8 = 1;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let command_line = match CommandLine::try_parse_from(std::env::args_os()) {
        Ok(command_line) => command_line,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(USAGE_EXIT_CODE));
        }
    };

    // Resolved before logging: the config names the logging file
    let config = match config::load(Path::new(DEFAULT_CONFIG_PATH), &command_line.overrides) {
        Ok(config) => config,
        Err(e) => {
            let e = WorkerError::from(e);
            eprintln!("worker-agent: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let logging = match logging::init(config.logging_config_path()) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("worker-agent: {e}");
            return ExitCode::from(WorkerError::from(e).exit_code());
        }
    };

    info!(target: "worker.main", "Starting worker agent");

    // Must happen before any metrics are recorded
    let prometheus_handle = match metrics::install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            error!(target: "worker.main", error = %e, "Failed to install Prometheus metrics recorder");
            return ExitCode::from(SETUP_FAILURE_EXIT_CODE);
        }
    };
    info!(target: "worker.main", "Prometheus metrics recorder initialized");

    let (upstream, writer) = ParentChannel::spawn(tokio::io::stdout());

    let identity = match NodeIdentity::from_launch(&command_line.launch_args()) {
        Ok(identity) => identity,
        Err(e) => {
            let e = WorkerError::from(e);
            error!(target: "worker.main", error = %e, "Invalid launch arguments");
            if let Some(message) = e.upstream_message() {
                upstream.send(message);
            }
            return finish(upstream, writer, e.exit_code()).await;
        }
    };

    info!(
        target: "worker.main",
        rpc_id = %identity.rpc_id,
        parent_id = %identity.parent_id,
        purpose = %identity.purpose,
        rabbit = %format!("{}:{}", config.rabbit.host, config.rabbit.port),
        "Worker identity resolved"
    );

    let signals = match signals::listen() {
        Ok(signals) => signals,
        Err(e) => {
            error!(target: "worker.main", error = %e, "Failed to install signal handlers");
            upstream.send(UpstreamMessage::Error);
            return finish(upstream, writer, SETUP_FAILURE_EXIT_CODE).await;
        }
    };

    let broker = LocalBroker::new();
    let supervisor = ProcessSupervisor::new(
        config,
        identity,
        Box::new(broker.link()),
        ControllerFactories::node_controllers_with_metrics(prometheus_handle),
        upstream.clone(),
        Arc::new(logging),
    );

    let exit = supervisor.run(signals).await;
    finish(upstream, writer, exit.exit_code()).await
}

/// Drain the parent channel, then exit with `code`.
async fn finish(
    upstream: ParentChannel,
    writer: JoinHandle<std::io::Result<()>>,
    code: u8,
) -> ExitCode {
    drop(upstream);
    match tokio::time::timeout(UPSTREAM_FLUSH_TIMEOUT, writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(target: "worker.main", error = %e, "Parent channel write failed"),
        Ok(Err(e)) => warn!(target: "worker.main", error = %e, "Parent channel writer failed"),
        Err(_) => warn!(target: "worker.main", "Timed out flushing parent channel"),
    }
    ExitCode::from(code)
}
