//! Per-cover tick scheduler.
//!
//! Every virtual cover runs in its own tokio task that owns its
//! [`Orchestrator`]. Requests arrive over an mpsc channel and are answered
//! once the new plan is in place; between requests the task sleeps until the
//! orchestrator's next tick. An idle cover has no timer armed at all.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::command::MotorCommandSink;
use super::error::CoverError;
use super::orchestrator::Orchestrator;
use super::orchestrator::Tick;
use super::state::CoverSnapshot;

/// Requests queued per cover before senders wait.
const REQUEST_CHANNEL_SIZE: usize = 32;

/// Operations a cover accepts from the outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverCommand {
    SetPositionAndTilt {
        position: Option<f64>,
        tilt: Option<f64>,
    },
    Open,
    Close,
    Stop,
}

type Reply = oneshot::Sender<Result<CoverSnapshot, CoverError>>;

struct Request {
    command: CoverCommand,
    reply: Reply,
}

/// Handle to a running cover task.
pub struct CoverHandle {
    cover_id: String,
    unique_id: String,
    tx: mpsc::Sender<Request>,
    state_rx: watch::Receiver<CoverSnapshot>,
    task: JoinHandle<CoverSnapshot>,
}

impl CoverHandle {
    /// Move the orchestrator into a new task and start serving requests.
    pub fn spawn<S>(orchestrator: Orchestrator<S>) -> Self
    where
        S: MotorCommandSink + 'static,
    {
        let cover_id = orchestrator.settings().cover_id.clone();
        let unique_id = orchestrator.settings().unique_id.clone();
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(orchestrator.snapshot());

        let task = tokio::spawn(run(orchestrator, rx, state_tx));

        Self {
            cover_id,
            unique_id,
            tx,
            state_rx,
            task,
        }
    }

    pub fn cover_id(&self) -> &str {
        &self.cover_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Latest published state.
    pub fn snapshot(&self) -> CoverSnapshot {
        self.state_rx.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CoverSnapshot> {
        self.state_rx.clone()
    }

    /// Kill the task without stopping the motor, leaving a dead handle.
    #[cfg(test)]
    pub(crate) fn abort_task(&self) {
        self.task.abort();
    }

    /// Apply a command and wait until the cover has planned it.
    pub async fn request(&self, command: CoverCommand) -> Result<CoverSnapshot, CoverError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Request { command, reply })
            .await
            .map_err(|_| CoverError::Unavailable(self.cover_id.clone()))?;
        response
            .await
            .map_err(|_| CoverError::Unavailable(self.cover_id.clone()))?
    }

    /// Stop the cover and end its task, returning the final state.
    pub async fn shutdown(self) -> CoverSnapshot {
        let CoverHandle {
            cover_id,
            tx,
            state_rx,
            task,
            ..
        } = self;
        drop(tx);

        match task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[{}] cover task ended abnormally: {}", cover_id, e);
                let snapshot = state_rx.borrow().clone();
                snapshot
            }
        }
    }
}

fn apply<S: MotorCommandSink>(
    cover: &mut Orchestrator<S>,
    now: Instant,
    command: CoverCommand,
) -> Result<Tick, CoverError> {
    match command {
        CoverCommand::SetPositionAndTilt { position, tilt } => {
            cover.set_position_and_tilt(now, position, tilt)
        }
        CoverCommand::Open => Ok(cover.open(now)),
        CoverCommand::Close => Ok(cover.close(now)),
        CoverCommand::Stop => Ok(cover.stop(now)),
    }
}

async fn run<S: MotorCommandSink>(
    mut cover: Orchestrator<S>,
    mut rx: mpsc::Receiver<Request>,
    state_tx: watch::Sender<CoverSnapshot>,
) -> CoverSnapshot {
    let cover_id = cover.settings().cover_id.clone();
    debug!("[{}] scheduler started", cover_id);

    let sleep = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(sleep);
    let mut armed = false;

    loop {
        let (now, tick) = tokio::select! {
            request = rx.recv() => {
                let Some(Request { command, reply }) = request else {
                    break;
                };
                let now = Instant::now();
                match apply(&mut cover, now, command) {
                    Ok(tick) => {
                        let snapshot = cover.snapshot();
                        state_tx.send_replace(snapshot.clone());
                        let _ = reply.send(Ok(snapshot));
                        (now, tick)
                    }
                    Err(e) => {
                        debug!("[{}] rejected {:?}: {}", cover_id, command, e);
                        let _ = reply.send(Err(e));
                        // Nothing changed; keep whatever timer was running.
                        continue;
                    }
                }
            }
            () = &mut sleep, if armed => {
                let now = Instant::now();
                let tick = cover.tick(now);
                state_tx.send_replace(cover.snapshot());
                (now, tick)
            }
        };

        match tick.next {
            Some(delay) => {
                sleep.as_mut().reset(now + delay);
                armed = true;
            }
            None => armed = false,
        }
    }

    cover.stop(Instant::now());
    let snapshot = cover.snapshot();
    state_tx.send_replace(snapshot.clone());
    info!(
        "[{}] scheduler stopped at position {:.1}, tilt {:.1}",
        cover_id, snapshot.position, snapshot.tilt
    );
    snapshot
}
