//! OS signal routing.
//!
//! Signals are turned into [`ProcessSignal`] values on a channel, so the
//! supervisor consumes one stream and tests can inject signals directly.
//!
//! ## Unix
//! - **SIGINT**, **SIGTERM**: graceful shutdown
//! - **SIGUSR2**: logging reconfiguration
//! - **SIGHUP**, **SIGPIPE**: caught so they cannot kill the process, then
//!   logged and ignored
//!
//! ## Other platforms
//! Only Ctrl-C is observed, as an interrupt.

use tokio::sync::mpsc;

/// Buffered signals before the listener waits for the supervisor.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Interrupt,
    Terminate,
    Reconfigure,
    Hangup,
    BrokenPipe,
}

impl ProcessSignal {
    /// Interrupt and terminate shut the worker down.
    #[must_use]
    pub const fn is_termination(&self) -> bool {
        matches!(self, ProcessSignal::Interrupt | ProcessSignal::Terminate)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ProcessSignal::Interrupt => "SIGINT",
            ProcessSignal::Terminate => "SIGTERM",
            ProcessSignal::Reconfigure => "SIGUSR2",
            ProcessSignal::Hangup => "SIGHUP",
            ProcessSignal::BrokenPipe => "SIGPIPE",
        }
    }
}

/// Install the handlers and start forwarding signals.
///
/// # Errors
///
/// Returns the I/O error if a handler cannot be registered.
#[cfg(unix)]
pub fn listen() -> std::io::Result<mpsc::Receiver<ProcessSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigpipe = signal(SignalKind::pipe())?;

    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => ProcessSignal::Interrupt,
                Some(()) = sigterm.recv() => ProcessSignal::Terminate,
                Some(()) = sigusr2.recv() => ProcessSignal::Reconfigure,
                Some(()) = sighup.recv() => ProcessSignal::Hangup,
                Some(()) = sigpipe.recv() => ProcessSignal::BrokenPipe,
                else => break,
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

/// Install the handlers and start forwarding signals.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn listen() -> std::io::Result<mpsc::Receiver<ProcessSignal>> {
    let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(ProcessSignal::Interrupt).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}
