//! Worker process supervision.
//!
//! Drives one worker from launch to exit:
//!
//! ```text
//! Init -> Connecting -> AwaitingClientRole -> AwaitingServerRole
//!      -> AwaitingMonitorRole -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! Setup steps run strictly in that order and are never retried. A failure
//! at any step reports `ERROR` (or `ambiguous purpose`) to the parent and
//! ends the run; the process is expected to be restarted externally.
//!
//! Interrupt and terminate are honoured in every state. Reconfigure swaps
//! the log filter, hangup and broken pipe are logged and ignored. Broker
//! disconnect happens exactly once, whichever way the run ends.

use crate::broker::{BrokerCredentials, BrokerLink};
use crate::config::WorkerConfig;
use crate::controllers::{self, Controller, ControllerFactories};
use crate::errors::WorkerError;
use crate::fault_monitor;
use crate::heartbeat::{spawn_heartbeat, HEARTBEAT_INTERVAL};
use crate::identity::NodeIdentity;
use crate::observability::{metrics, LogReconfigure};
use crate::signals::ProcessSignal;
use crate::upstream::{ParentChannel, UpstreamMessage};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Connecting,
    AwaitingClientRole,
    AwaitingServerRole,
    AwaitingMonitorRole,
    Running,
    ShuttingDown,
    Terminated,
}

impl SupervisorState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Init => "init",
            SupervisorState::Connecting => "connecting",
            SupervisorState::AwaitingClientRole => "awaiting_client_role",
            SupervisorState::AwaitingServerRole => "awaiting_server_role",
            SupervisorState::AwaitingMonitorRole => "awaiting_monitor_role",
            SupervisorState::Running => "running",
            SupervisorState::ShuttingDown => "shutting_down",
            SupervisorState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Connect,
    ClientRole,
    Dispatch,
    ServerRole,
    MonitorRole,
}

impl SetupStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Connect => "connect",
            SetupStage::ClientRole => "rpc_client",
            SetupStage::Dispatch => "dispatch",
            SetupStage::ServerRole => "rpc_server",
            SetupStage::MonitorRole => "monitor",
        }
    }
}

/// How a supervision run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// A termination signal arrived.
    Shutdown(ProcessSignal),
    /// A setup step failed.
    SetupFailed(SetupStage),
    /// The declared purpose matched no controller.
    AmbiguousPurpose,
}

impl SupervisorExit {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            SupervisorExit::Shutdown(_) => 0,
            SupervisorExit::SetupFailed(_) | SupervisorExit::AmbiguousPurpose => 1,
        }
    }
}

struct SetupFailure {
    stage: SetupStage,
    error: WorkerError,
}

impl SetupFailure {
    fn at(stage: SetupStage) -> impl FnOnce(WorkerError) -> Self {
        move |error| Self { stage, error }
    }
}

pub struct ProcessSupervisor {
    config: Arc<WorkerConfig>,
    identity: NodeIdentity,
    broker: Box<dyn BrokerLink>,
    factories: ControllerFactories,
    upstream: ParentChannel,
    logging: Arc<dyn LogReconfigure>,
    state: watch::Sender<SupervisorState>,
    controller: Option<Arc<dyn Controller>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl ProcessSupervisor {
    pub fn new(
        config: WorkerConfig,
        identity: NodeIdentity,
        broker: Box<dyn BrokerLink>,
        factories: ControllerFactories,
        upstream: ParentChannel,
        logging: Arc<dyn LogReconfigure>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Init);
        Self {
            config: Arc::new(config),
            identity,
            broker,
            factories,
            upstream,
            logging,
            state,
            controller: None,
            heartbeat: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Run until a termination signal or a setup failure.
    ///
    /// If `signals` closes, the worker keeps running with no way to be
    /// signalled.
    pub async fn run(mut self, mut signals: mpsc::Receiver<ProcessSignal>) -> SupervisorExit {
        let logging = Arc::clone(&self.logging);

        let setup = {
            let bring_up = self.bring_up();
            tokio::pin!(bring_up);
            tokio::select! {
                result = &mut bring_up => Ok(result),
                signal = next_termination(&mut signals, logging.as_ref()) => Err(signal),
            }
        };

        let exit = match setup {
            Ok(Ok(())) => {
                let signal = next_termination(&mut signals, logging.as_ref()).await;
                SupervisorExit::Shutdown(signal)
            }
            Ok(Err(failure)) => self.report_failure(failure),
            Err(signal) => {
                info!(
                    target: "worker.supervisor",
                    signal = signal.name(),
                    state = %self.state(),
                    "Termination requested during setup"
                );
                SupervisorExit::Shutdown(signal)
            }
        };

        self.shut_down(exit);
        exit
    }

    async fn bring_up(&mut self) -> Result<(), SetupFailure> {
        self.set_state(SupervisorState::Connecting);
        let credentials = BrokerCredentials::from(&self.config.rabbit);
        self.broker
            .connect(&credentials)
            .await
            .map_err(WorkerError::from)
            .map_err(SetupFailure::at(SetupStage::Connect))?;

        self.set_state(SupervisorState::AwaitingClientRole);
        let rpc_client = self
            .broker
            .as_rpc_client()
            .await
            .map_err(WorkerError::from)
            .map_err(SetupFailure::at(SetupStage::ClientRole))?;

        let dispatched = controllers::dispatch(
            &self.factories,
            rpc_client,
            &self.identity,
            Arc::clone(&self.config),
        )
        .map_err(WorkerError::from)
        .map_err(SetupFailure::at(SetupStage::Dispatch))?;
        let controller = dispatched.controller;
        self.controller = Some(Arc::clone(&controller));

        self.set_state(SupervisorState::AwaitingServerRole);
        self.broker
            .as_rpc_server(&self.identity.rpc_id, controllers::exposed_api(&controller))
            .await
            .map_err(WorkerError::from)
            .map_err(SetupFailure::at(SetupStage::ServerRole))?;

        self.set_state(SupervisorState::AwaitingMonitorRole);
        self.broker
            .as_monitor(fault_monitor::attach(&controller))
            .await
            .map_err(WorkerError::from)
            .map_err(SetupFailure::at(SetupStage::MonitorRole))?;

        self.set_state(SupervisorState::Running);
        self.upstream.send(UpstreamMessage::Ready);
        self.heartbeat = Some(spawn_heartbeat(self.upstream.clone(), HEARTBEAT_INTERVAL));

        info!(
            target: "worker.supervisor",
            rpc_id = %self.identity.rpc_id,
            purpose = %dispatched.purpose,
            "Worker ready"
        );
        Ok(())
    }

    fn report_failure(&self, failure: SetupFailure) -> SupervisorExit {
        let SetupFailure { stage, error } = failure;
        error!(
            target: "worker.supervisor",
            stage = stage.as_str(),
            error = %error,
            "Worker setup failed"
        );
        metrics::record_setup_failure(stage.as_str());

        self.upstream
            .send(error.upstream_message().unwrap_or(UpstreamMessage::Error));

        match stage {
            SetupStage::Dispatch => SupervisorExit::AmbiguousPurpose,
            other => SupervisorExit::SetupFailed(other),
        }
    }

    fn shut_down(&mut self, exit: SupervisorExit) {
        if let SupervisorExit::Shutdown(signal) = exit {
            self.set_state(SupervisorState::ShuttingDown);
            if let Some(controller) = self.controller.take() {
                debug!(target: "worker.supervisor", signal = signal.name(), "Closing controller");
                controller.close();
            }
        }

        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        self.broker.disconnect();

        self.set_state(SupervisorState::Terminated);
        info!(
            target: "worker.supervisor",
            exit_code = exit.exit_code(),
            "Worker terminated"
        );
    }

    fn set_state(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        debug!(
            target: "worker.supervisor",
            from = %previous,
            to = %next,
            "State transition"
        );
    }
}

/// Wait for interrupt or terminate, handling every other signal in place.
async fn next_termination(
    signals: &mut mpsc::Receiver<ProcessSignal>,
    logging: &dyn LogReconfigure,
) -> ProcessSignal {
    loop {
        let Some(signal) = signals.recv().await else {
            warn!(target: "worker.supervisor", "Signal source closed");
            return std::future::pending().await;
        };

        match signal {
            signal if signal.is_termination() => return signal,
            ProcessSignal::Reconfigure => match logging.reconfigure() {
                Ok(()) => info!(target: "worker.supervisor", "Logging reconfigured on signal"),
                Err(e) => warn!(
                    target: "worker.supervisor",
                    error = %e,
                    "Logging reconfiguration failed, keeping previous settings"
                ),
            },
            ignored => {
                info!(target: "worker.supervisor", signal = ignored.name(), "Signal ignored");
            }
        }
    }
}
