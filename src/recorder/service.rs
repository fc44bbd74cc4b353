//! Recorder task
//!
//! One task owns the `Recorder`. User commands arrive over a channel and
//! display-frame ticks come from an interval in the same `select!`, so a
//! manual stop and the duration cap are linearized instead of racing.
//! Observers read a `watch` snapshot and the shared meter reading.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audio::{AudioArtifact, MeterReading};
use crate::{Result, SpeakingError};

use super::machine::{Recorder, StateKind, Tick};

/// User-initiated recorder operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderCommand {
    RequestAccess,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    /// Release the device and end the task
    Shutdown,
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone)]
pub struct RecorderSnapshot {
    pub state: StateKind,
    pub elapsed: Duration,
    pub max_duration: Duration,
    pub artifact: Option<AudioArtifact>,
    /// Error from the most recent command or tick, cleared by the next success
    pub error: Option<SpeakingError>,
    pub device: Option<String>,
}

impl RecorderSnapshot {
    fn of(recorder: &Recorder, error: Option<SpeakingError>) -> Self {
        Self {
            state: recorder.kind(),
            elapsed: recorder.elapsed(),
            max_duration: recorder.max_duration(),
            artifact: recorder.artifact(),
            error,
            device: recorder.device_name().map(str::to_string),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.max_duration.saturating_sub(self.elapsed)
    }
}

type Reply = oneshot::Sender<Result<Option<AudioArtifact>>>;
type Envelope = (RecorderCommand, Reply);

/// Cloneable handle to a running recorder task
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<Envelope>,
    snapshot: watch::Receiver<RecorderSnapshot>,
    level: MeterReading,
}

/// Move `recorder` onto its own task, ticking every `frame_interval`
pub fn spawn(recorder: Recorder, frame_interval: Duration) -> (RecorderHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Envelope>(32);
    let (state_tx, state_rx) = watch::channel(RecorderSnapshot::of(&recorder, None));
    let level = recorder.meter_reading();

    let task = tokio::spawn(run(recorder, cmd_rx, state_tx, frame_interval));

    (
        RecorderHandle {
            commands: cmd_tx,
            snapshot: state_rx,
            level,
        },
        task,
    )
}

impl RecorderHandle {
    pub async fn send(&self, command: RecorderCommand) -> Result<Option<AudioArtifact>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send((command, reply_tx))
            .await
            .map_err(|_| SpeakingError::InvalidState("recorder has shut down".into()))?;
        reply_rx
            .await
            .map_err(|_| SpeakingError::InvalidState("recorder has shut down".into()))?
    }

    pub async fn request_access(&self) -> Result<()> {
        self.send(RecorderCommand::RequestAccess).await.map(|_| ())
    }

    pub async fn start(&self) -> Result<()> {
        self.send(RecorderCommand::Start).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(RecorderCommand::Pause).await.map(|_| ())
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(RecorderCommand::Resume).await.map(|_| ())
    }

    /// Stop and return the new artifact; `None` if nothing was recording
    pub async fn stop(&self) -> Result<Option<AudioArtifact>> {
        self.send(RecorderCommand::Stop).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(RecorderCommand::Reset).await.map(|_| ())
    }

    /// Release the device and stop the task
    pub async fn shutdown(&self) {
        if let Err(e) = self.send(RecorderCommand::Shutdown).await {
            debug!("Recorder already stopped: {}", e);
        }
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecorderSnapshot> {
        self.snapshot.clone()
    }

    /// Latest meter level in [0, 1]
    pub fn level(&self) -> f32 {
        self.level.get()
    }
}

async fn run(
    mut recorder: Recorder,
    mut commands: mpsc::Receiver<Envelope>,
    state: watch::Sender<RecorderSnapshot>,
    frame_interval: Duration,
) {
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let recording = recorder.kind() == StateKind::Recording;

        tokio::select! {
            biased;

            envelope = commands.recv() => {
                let Some((command, reply)) = envelope else {
                    debug!("All recorder handles dropped");
                    break;
                };

                if command == RecorderCommand::Shutdown {
                    recorder.release();
                    publish(&recorder, &state, None);
                    let _ = reply.send(Ok(None));
                    break;
                }

                let result = apply(&mut recorder, command, &state).await;
                if let Err(e) = &result {
                    warn!("Recorder {:?} failed: {}", command, e);
                }
                publish(&recorder, &state, result.as_ref().err().cloned());
                let _ = reply.send(result);
            }

            _ = frames.tick(), if recording => {
                match recorder.tick() {
                    Ok(Tick::AutoStopped(artifact)) => {
                        info!("Recording auto-stopped at {:.1}s", artifact.duration_secs);
                        publish(&recorder, &state, None);
                    }
                    Ok(_) => publish(&recorder, &state, None),
                    Err(e) => publish(&recorder, &state, Some(e)),
                }
            }
        }
    }

    recorder.release();
    publish(&recorder, &state, None);
    info!("Recorder stopped");
}

async fn apply(
    recorder: &mut Recorder,
    command: RecorderCommand,
    state: &watch::Sender<RecorderSnapshot>,
) -> Result<Option<AudioArtifact>> {
    match command {
        RecorderCommand::RequestAccess => request_access(recorder, state).await.map(|_| None),
        RecorderCommand::Start => {
            recorder.ensure_startable()?;
            request_access(recorder, state).await?;
            recorder.begin_recording().map(|_| None)
        }
        RecorderCommand::Pause => recorder.pause().map(|_| None),
        RecorderCommand::Resume => {
            recorder.resume();
            Ok(None)
        }
        RecorderCommand::Stop => recorder.stop(),
        RecorderCommand::Reset => {
            recorder.reset();
            Ok(None)
        }
        RecorderCommand::Shutdown => {
            recorder.release();
            Ok(None)
        }
    }
}

/// Open the device, publishing `Requesting` while the prompt is pending.
///
/// Other commands wait in the channel until this returns.
async fn request_access(
    recorder: &mut Recorder,
    state: &watch::Sender<RecorderSnapshot>,
) -> Result<()> {
    if !recorder.begin_request()? {
        return Ok(());
    }
    publish(recorder, state, None);

    let device = recorder.device();
    let opened = device.open().await;
    recorder.complete_request(opened)
}

fn publish(recorder: &Recorder, state: &watch::Sender<RecorderSnapshot>, error: Option<SpeakingError>) {
    state.send_replace(RecorderSnapshot::of(recorder, error));
}
