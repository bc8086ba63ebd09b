//! Attach retry loop
//!
//! The loop waits one interval, connects, writes the attach command, and
//! starts over on any failure until a write succeeds:
//!
//! ```text
//! Idle --(interval)--> Connecting --ok--> Writing --ok--> Attached
//!   ^                      |                  |
//!   +------- error --------+------ error -----+
//! ```
//!
//! Connect and write are blocking and run on tokio's blocking pool. The only
//! cancellation point is the wait in `Idle`; an attempt in progress always
//! runs to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::attach::{AttachCommand, AttachWriter};
use crate::error::{Result, VhciError};
use crate::session::VhciSession;
use crate::transport::{Connection, Connector};

/// Attach state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    /// Waiting before the next attempt
    Idle,
    /// Opening a connection to the device-serving endpoint
    Connecting,
    /// Writing the attach command
    Writing,
    /// Attach succeeded; terminal
    Attached,
}

/// Summary of a successful attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachReport {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Time from loop start until the attach was written
    pub elapsed: Duration,
    /// The command that was accepted
    pub command: AttachCommand,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(AttachReport),
    /// Shut down before an attempt succeeded
    Cancelled { attempts: u32 },
}

impl AttachOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, AttachOutcome::Attached(_))
    }

    pub fn attempts(&self) -> u32 {
        match self {
            AttachOutcome::Attached(report) => report.attempts,
            AttachOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

pub struct AttachLoop {
    session: Arc<VhciSession>,
    connector: Arc<dyn Connector>,
    writer: Arc<dyn AttachWriter>,
    interval: Duration,
}

impl AttachLoop {
    pub fn new(
        session: Arc<VhciSession>,
        connector: Arc<dyn Connector>,
        writer: Arc<dyn AttachWriter>,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            connector,
            writer,
            interval,
        }
    }

    /// Spawn the loop on the current tokio runtime
    pub fn spawn(self) -> Result<AttachTask> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| VhciError::NoRuntime)?;

        let (state_tx, state_rx) = watch::channel(AttachState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(self.run(state_tx, shutdown_rx));

        Ok(AttachTask {
            handle,
            shutdown: shutdown_tx,
            state: state_rx,
        })
    }

    /// Run until an attach succeeds or shutdown is requested
    ///
    /// Dropping the shutdown sender counts as a shutdown request.
    pub async fn run(
        self,
        state: watch::Sender<AttachState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AttachOutcome {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            state.send_replace(AttachState::Idle);
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Attach loop stopped after {} attempts", attempts);
                    return AttachOutcome::Cancelled { attempts };
                }
            }

            attempts += 1;
            match self.attempt(&state).await {
                Ok(command) => {
                    state.send_replace(AttachState::Attached);
                    info!("Attach successful (attempt {})", attempts);
                    return AttachOutcome::Attached(AttachReport {
                        attempts,
                        elapsed: started.elapsed(),
                        command,
                    });
                }
                Err(e) => {
                    warn!(
                        "Attach attempt {} failed: {}. Retrying in {:?}",
                        attempts, e, self.interval
                    );
                }
            }
        }
    }

    async fn attempt(&self, state: &watch::Sender<AttachState>) -> Result<AttachCommand> {
        state.send_replace(AttachState::Connecting);
        let connector = self.connector.clone();
        let connection = run_blocking(move || connector.connect()).await?;

        state.send_replace(AttachState::Writing);
        let command = AttachCommand {
            port: self.session.port(),
            connection_id: connection.id(),
            device_id: self.session.device_id(),
            speed: self.session.speed(),
        };

        let writer = self.writer.clone();
        let control_root: PathBuf = self.session.control_root().to_path_buf();
        // connection stays open until the write returns
        let written = run_blocking(move || writer.write_attach(&control_root, &command)).await;

        match written {
            Ok(()) => {
                let fd = Connection::hand_off(connection);
                debug!("Handed socket fd {} to the VHCI driver", fd);
                Ok(command)
            }
            Err(e) => {
                drop(connection);
                Err(e)
            }
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VhciError::Blocking(e.to_string()))?
}

/// Handle to a running attach loop
#[derive(Debug)]
pub struct AttachTask {
    handle: JoinHandle<AttachOutcome>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<AttachState>,
}

impl AttachTask {
    /// Current state of the loop
    pub fn state(&self) -> AttachState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<AttachState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to finish on its own
    pub async fn wait(self) -> Result<AttachOutcome> {
        let AttachTask {
            handle, shutdown, ..
        } = self;
        let outcome = handle
            .await
            .map_err(|e| VhciError::TaskFailed(e.to_string()));
        drop(shutdown);
        outcome
    }

    /// Request shutdown and wait for the loop to stop
    ///
    /// A loop that has already attached reports its attach.
    pub async fn shutdown(self) -> Result<AttachOutcome> {
        self.shutdown.send_replace(true);
        self.wait().await
    }
}
