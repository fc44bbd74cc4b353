//! Recorder state machine
//!
//! ```text
//! Idle -> Requesting -> Ready -> Recording <-> Paused -> Stopped
//! ```
//!
//! Elapsed time is always derived from the clock (start, accumulated pause
//! time, pause timestamp) rather than counted in ticks.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::audio::{
    negotiate, ArtifactSlot, AudioArtifact, AudioEncoder, CaptureDevice, CaptureSession,
    EncoderFactory, EncodingFormat, LevelMeter, MeterReading, PlaybackRef, StreamSpec,
};
use crate::config::Settings;
use crate::{Result, SpeakingError};

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Requesting,
    Ready,
    Recording {
        started_at: Instant,
        paused_total: Duration,
    },
    Paused {
        started_at: Instant,
        paused_total: Duration,
        paused_at: Instant,
    },
    Stopped,
}

/// State tag without timing data, for display and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Idle,
    Requesting,
    Ready,
    Recording,
    Paused,
    Stopped,
}

impl RecordingState {
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Requesting => StateKind::Requesting,
            Self::Ready => StateKind::Ready,
            Self::Recording { .. } => StateKind::Recording,
            Self::Paused { .. } => StateKind::Paused,
            Self::Stopped => StateKind::Stopped,
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub max_duration: Duration,
    /// Formats to try, in order
    pub encodings: Vec<EncodingFormat>,
    pub bitrate: u32,
    /// Where playback copies are written; `None` keeps artifacts in memory only
    pub playback_dir: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_duration: settings.recorder.max_duration(),
            encodings: settings.recorder.encodings.clone(),
            bitrate: settings.recorder.bitrate,
            playback_dir: settings
                .recorder
                .keep_local_copy
                .then(|| settings.recordings_dir()),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of one display-frame tick
#[derive(Debug, Clone)]
pub enum Tick {
    /// Not recording; nothing to do
    Idle,
    Running { elapsed: Duration, level: f32 },
    /// The duration cap was reached and the recording was finalized
    AutoStopped(AudioArtifact),
}

/// Active encoding run
struct Take {
    encoder: Box<dyn AudioEncoder>,
    sample_rate: u32,
    samples: u64,
    max_samples: u64,
}

impl Take {
    fn feed(&mut self, mut samples: Vec<f32>) -> Result<()> {
        let room = self.max_samples.saturating_sub(self.samples) as usize;
        samples.truncate(room);
        if samples.is_empty() {
            return Ok(());
        }
        self.samples += samples.len() as u64;
        self.encoder.encode(&samples)
    }
}

pub struct Recorder {
    config: RecorderConfig,
    device: Arc<dyn CaptureDevice>,
    encoders: Arc<dyn EncoderFactory>,
    session: Option<CaptureSession>,
    state: RecordingState,
    take: Option<Take>,
    meter: LevelMeter,
    artifacts: ArtifactSlot,
    stopped_elapsed: Duration,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        device: Arc<dyn CaptureDevice>,
        encoders: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            config,
            device,
            encoders,
            session: None,
            state: RecordingState::Idle,
            take: None,
            meter: LevelMeter::new(),
            artifacts: ArtifactSlot::new(),
            stopped_elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn max_duration(&self) -> Duration {
        self.config.max_duration
    }

    pub fn has_access(&self) -> bool {
        self.session.as_ref().map(|s| s.is_open()).unwrap_or(false)
    }

    pub fn device(&self) -> Arc<dyn CaptureDevice> {
        self.device.clone()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.device_name())
    }

    pub fn meter_reading(&self) -> MeterReading {
        self.meter.reading()
    }

    pub fn level(&self) -> f32 {
        self.meter.reading().get()
    }

    /// Current artifact, if the last recording finished
    pub fn artifact(&self) -> Option<AudioArtifact> {
        self.artifacts.get()
    }

    /// Elapsed recording time, never above the configured maximum
    pub fn elapsed(&self) -> Duration {
        let raw = match self.state {
            RecordingState::Recording {
                started_at,
                paused_total,
            } => Instant::now()
                .saturating_duration_since(started_at)
                .saturating_sub(paused_total),
            RecordingState::Paused {
                started_at,
                paused_total,
                paused_at,
            } => paused_at
                .saturating_duration_since(started_at)
                .saturating_sub(paused_total),
            RecordingState::Stopped => self.stopped_elapsed,
            _ => Duration::ZERO,
        };
        raw.min(self.config.max_duration)
    }

    /// Mark a permission request as in flight.
    ///
    /// Returns false when access is already held and nothing needs to be asked.
    pub fn begin_request(&mut self) -> Result<bool> {
        match self.state {
            RecordingState::Requesting => Err(SpeakingError::InvalidState(
                "a microphone request is already pending".into(),
            )),
            _ if self.has_access() => Ok(false),
            RecordingState::Recording { .. } | RecordingState::Paused { .. } => Ok(false),
            _ => {
                self.session = None;
                self.state = RecordingState::Requesting;
                Ok(true)
            }
        }
    }

    /// Apply the outcome of a permission request
    pub fn complete_request(&mut self, opened: Result<CaptureSession>) -> Result<()> {
        match opened {
            Ok(session) => {
                tracing::info!("Microphone access granted: {}", session.device_name());
                self.session = Some(session);
                self.state = RecordingState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Microphone access failed: {}", e);
                self.session = None;
                self.state = RecordingState::Idle;
                Err(e)
            }
        }
    }

    /// Open the microphone unless it is already open
    pub async fn request_access(&mut self) -> Result<()> {
        if !self.begin_request()? {
            return Ok(());
        }
        let device = self.device();
        let opened = device.open().await;
        self.complete_request(opened)
    }

    /// Start a new recording, asking for access first when needed
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_startable()?;
        self.request_access().await?;
        self.begin_recording()
    }

    /// Reject a start that would interrupt a recording or a pending request
    pub fn ensure_startable(&self) -> Result<()> {
        match self.state {
            RecordingState::Recording { .. } | RecordingState::Paused { .. } => {
                Err(SpeakingError::InvalidState("already recording".into()))
            }
            RecordingState::Requesting => Err(SpeakingError::InvalidState(
                "waiting for microphone access".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Start encoding on an already open session
    pub fn begin_recording(&mut self) -> Result<()> {
        if !matches!(self.state, RecordingState::Ready | RecordingState::Stopped) {
            return Err(SpeakingError::InvalidState(format!(
                "cannot start recording while {}",
                self.kind()
            )));
        }

        let Some(signal) = self.session.as_ref().map(|s| s.signal().clone()) else {
            return Err(SpeakingError::InvalidState("microphone is not open".into()));
        };

        // The previous recording is discarded before anything new is made
        self.artifacts.revoke();
        self.stopped_elapsed = Duration::ZERO;

        let spec = StreamSpec {
            sample_rate: signal.sample_rate(),
            bitrate: self.config.bitrate,
        };
        let encoder = match negotiate(self.encoders.as_ref(), &self.config.encodings, &spec) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.state = RecordingState::Ready;
                return Err(e);
            }
        };

        let max_samples =
            (self.config.max_duration.as_secs_f64() * f64::from(spec.sample_rate)).round() as u64;
        tracing::info!(
            "Recording started ({}, {} Hz)",
            encoder.format(),
            spec.sample_rate
        );

        self.take = Some(Take {
            encoder,
            sample_rate: spec.sample_rate,
            samples: 0,
            max_samples,
        });

        signal.discard_pending();
        signal.set_feeding(true);
        self.state = RecordingState::Recording {
            started_at: Instant::now(),
            paused_total: Duration::ZERO,
        };
        Ok(())
    }

    /// Pause the timer and the signal feed; no-op unless recording
    pub fn pause(&mut self) -> Result<()> {
        let RecordingState::Recording {
            started_at,
            paused_total,
        } = self.state
        else {
            return Ok(());
        };

        let paused_at = Instant::now();
        self.set_feeding(false);
        self.meter.halt();
        self.drain()?;

        self.state = RecordingState::Paused {
            started_at,
            paused_total,
            paused_at,
        };
        tracing::debug!("Recording paused at {:.1}s", self.elapsed().as_secs_f64());
        Ok(())
    }

    /// Resume after a pause; no-op unless paused
    pub fn resume(&mut self) {
        let RecordingState::Paused {
            started_at,
            paused_total,
            paused_at,
        } = self.state
        else {
            return;
        };

        if let Some(session) = &self.session {
            session.signal().discard_pending();
        }
        self.set_feeding(true);
        self.state = RecordingState::Recording {
            started_at,
            paused_total: paused_total + Instant::now().saturating_duration_since(paused_at),
        };
        tracing::debug!("Recording resumed");
    }

    /// Finalize the recording.
    ///
    /// Returns `None` when there was nothing to stop.
    pub fn stop(&mut self) -> Result<Option<AudioArtifact>> {
        if !matches!(
            self.state,
            RecordingState::Recording { .. } | RecordingState::Paused { .. }
        ) {
            return Ok(None);
        }

        let elapsed = self.elapsed();
        self.set_feeding(false);
        self.meter.halt();
        self.drain()?;

        let Some(take) = self.take.take() else {
            return Err(self.abort(SpeakingError::EncoderFailure(
                "recording has no encoder".into(),
            )));
        };
        let format = take.encoder.format();
        let payload = match take.encoder.finish() {
            Ok(payload) => payload,
            Err(e) => return Err(self.abort(e)),
        };

        let playback = match &self.config.playback_dir {
            Some(dir) => PlaybackRef::write(dir, format, &payload).unwrap_or_else(|e| {
                tracing::warn!("Could not write playback copy: {}", e);
                PlaybackRef::detached()
            }),
            None => PlaybackRef::detached(),
        };

        let artifact = AudioArtifact::new(payload, format, elapsed.as_secs_f64(), playback);
        self.artifacts.replace(artifact.clone());
        self.stopped_elapsed = elapsed;
        self.state = RecordingState::Stopped;

        tracing::info!(
            "Recording stopped: {:.1}s, {} bytes ({})",
            artifact.duration_secs,
            artifact.size_bytes(),
            format
        );
        Ok(Some(artifact))
    }

    /// Advance on a display frame: feed the encoder, sample the meter and
    /// enforce the duration cap.
    pub fn tick(&mut self) -> Result<Tick> {
        if !matches!(self.state, RecordingState::Recording { .. }) {
            return Ok(Tick::Idle);
        }

        if !self.has_access() {
            self.session = None;
            return Err(self.abort(SpeakingError::DeviceUnavailable(
                "microphone was disconnected".into(),
            )));
        }

        self.drain()?;

        if self.elapsed() >= self.config.max_duration {
            tracing::info!(
                "Maximum duration of {}s reached",
                self.config.max_duration.as_secs()
            );
            return Ok(match self.stop()? {
                Some(artifact) => Tick::AutoStopped(artifact),
                None => Tick::Idle,
            });
        }

        let level = self.meter.sample(self.session.as_ref());
        Ok(Tick::Running {
            elapsed: self.elapsed(),
            level,
        })
    }

    /// Drop the current artifact and timer, keeping the device open
    pub fn reset(&mut self) {
        self.take = None;
        self.set_feeding(false);
        if let Some(session) = &self.session {
            session.signal().discard_pending();
        }
        self.meter.halt();
        self.artifacts.revoke();
        self.stopped_elapsed = Duration::ZERO;
        self.state = if self.has_access() {
            RecordingState::Ready
        } else {
            RecordingState::Idle
        };
    }

    /// Reset and close the device
    pub fn release(&mut self) {
        self.reset();
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.state = RecordingState::Idle;
    }

    /// Abandon the current take after an error; partial data is discarded
    fn abort(&mut self, error: SpeakingError) -> SpeakingError {
        tracing::error!("Recording aborted: {}", error);
        self.take = None;
        self.set_feeding(false);
        if let Some(session) = &self.session {
            session.signal().discard_pending();
        }
        self.meter.halt();
        self.stopped_elapsed = Duration::ZERO;
        self.state = if self.has_access() {
            RecordingState::Ready
        } else {
            RecordingState::Idle
        };
        error
    }

    fn set_feeding(&self, feeding: bool) {
        if let Some(session) = &self.session {
            session.signal().set_feeding(feeding);
        }
    }

    /// Move captured samples into the encoder
    fn drain(&mut self) -> Result<()> {
        let pending = match &self.session {
            Some(session) => session.signal().take_pending(),
            None => return Ok(()),
        };
        let fed = match self.take.as_mut() {
            Some(take) => take.feed(pending),
            None => Ok(()),
        };
        fed.map_err(|e| self.abort(e))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("state", &self.state)
            .field("device", &self.device.display_name())
            .field("open", &self.has_access())
            .field(
                "sample_rate",
                &self.take.as_ref().map(|t| t.sample_rate),
            )
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{DeviceLease, DeviceTracks, LiveSignal, StandardEncoders};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoTracks;

    impl DeviceTracks for NoTracks {
        fn stop(&mut self) {}
    }

    /// Scriptable microphone; remembers the signal of the last opened session
    pub(crate) struct FakeDevice {
        key: String,
        pub opens: AtomicUsize,
        pub deny: Mutex<Option<SpeakingError>>,
        pub signal: Mutex<Option<LiveSignal>>,
        /// When set, `open` waits for a notification, like a pending prompt
        pub prompt: Mutex<Option<Arc<tokio::sync::Notify>>>,
    }

    impl FakeDevice {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                key: format!("fake-{}", uuid::Uuid::new_v4()),
                opens: AtomicUsize::new(0),
                deny: Mutex::new(None),
                signal: Mutex::new(None),
                prompt: Mutex::new(None),
            })
        }

        pub(crate) fn push(&self, samples: &[f32]) {
            if let Some(signal) = self.signal.lock().unwrap().as_ref() {
                signal.push(samples);
            }
        }
    }

    #[async_trait]
    impl CaptureDevice for FakeDevice {
        async fn open(&self) -> Result<CaptureSession> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let prompt = self.prompt.lock().unwrap().clone();
            if let Some(prompt) = prompt {
                prompt.notified().await;
            }
            if let Some(e) = self.deny.lock().unwrap().take() {
                return Err(e);
            }
            let lease = DeviceLease::acquire(&self.key)?;
            let signal = LiveSignal::new(16000);
            *self.signal.lock().unwrap() = Some(signal.clone());
            Ok(CaptureSession::new(
                lease,
                "fake".into(),
                signal,
                Box::new(NoTracks),
            ))
        }

        fn display_name(&self) -> String {
            "fake".into()
        }
    }

    struct FailingEncoder;

    impl AudioEncoder for FailingEncoder {
        fn format(&self) -> EncodingFormat {
            EncodingFormat::Wav
        }

        fn encode(&mut self, _: &[f32]) -> Result<()> {
            Err(SpeakingError::EncoderFailure("disk full".into()))
        }

        fn finish(self: Box<Self>) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct Failing;

    impl EncoderFactory for Failing {
        fn probe(&self, _: EncodingFormat, _: &StreamSpec) -> Option<Box<dyn AudioEncoder>> {
            Some(Box::new(FailingEncoder))
        }
    }

    struct Unsupported;

    impl EncoderFactory for Unsupported {
        fn probe(&self, _: EncodingFormat, _: &StreamSpec) -> Option<Box<dyn AudioEncoder>> {
            None
        }
    }

    pub(crate) fn config(max_secs: u64) -> RecorderConfig {
        RecorderConfig {
            max_duration: Duration::from_secs(max_secs),
            encodings: vec![EncodingFormat::OggOpus, EncodingFormat::Wav],
            bitrate: 24000,
            playback_dir: None,
        }
    }

    fn recorder(device: &Arc<FakeDevice>) -> Recorder {
        Recorder::new(config(180), device.clone(), Arc::new(StandardEncoders))
    }

    /// Feed one second of tone and let the clock move with it
    async fn speak(device: &FakeDevice, recorder: &mut Recorder, secs: u64) {
        for _ in 0..secs {
            device.push(&vec![0.25; 16000]);
            tokio::time::advance(Duration::from_secs(1)).await;
            recorder.tick().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_does_not_prompt_again() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);

        recorder.request_access().await.unwrap();
        recorder.request_access().await.unwrap();

        assert_eq!(device.opens.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.kind(), StateKind::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_access_leaves_idle() {
        let device = FakeDevice::new();
        *device.deny.lock().unwrap() = Some(SpeakingError::PermissionDenied("blocked".into()));
        let mut recorder = recorder(&device);

        let err = recorder.request_access().await.unwrap_err();
        assert!(matches!(err, SpeakingError::PermissionDenied(_)));
        assert_eq!(recorder.kind(), StateKind::Idle);

        // Not retried automatically, but a new request works
        recorder.request_access().await.unwrap();
        assert_eq!(device.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_excludes_paused_intervals() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);
        recorder.start().await.unwrap();

        speak(&device, &mut recorder, 3).await;
        recorder.pause().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(recorder.elapsed(), Duration::from_secs(3));

        recorder.resume();
        speak(&device, &mut recorder, 2).await;
        recorder.pause().unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        recorder.resume();
        speak(&device, &mut recorder, 1).await;

        let artifact = recorder.stop().unwrap().unwrap();
        assert_eq!(artifact.duration_secs, 6.0);
        assert_eq!(recorder.kind(), StateKind::Stopped);
        assert_eq!(artifact.format, EncodingFormat::OggOpus);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_are_noops_elsewhere() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);

        recorder.pause().unwrap();
        recorder.resume();
        assert_eq!(recorder.kind(), StateKind::Idle);

        recorder.start().await.unwrap();
        recorder.resume();
        assert_eq!(recorder.kind(), StateKind::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_stop_fires_once_at_the_cap() {
        let device = FakeDevice::new();
        let mut recorder = Recorder::new(config(180), device.clone(), Arc::new(StandardEncoders));
        recorder.start().await.unwrap();

        let mut auto_stops = 0;
        let mut artifact = None;
        for _ in 0..185 {
            device.push(&vec![0.25; 16000]);
            tokio::time::advance(Duration::from_secs(1)).await;
            if let Tick::AutoStopped(a) = recorder.tick().unwrap() {
                auto_stops += 1;
                artifact = Some(a);
            }
        }

        assert_eq!(auto_stops, 1);
        let artifact = artifact.unwrap();
        assert_eq!(artifact.duration_secs, 180.0);
        assert_eq!(recorder.elapsed(), Duration::from_secs(180));

        // A manual stop arriving afterwards changes nothing
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.kind(), StateKind::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_never_exceeds_cap_between_ticks() {
        let device = FakeDevice::new();
        let mut recorder = Recorder::new(config(5), device.clone(), Arc::new(StandardEncoders));
        recorder.start().await.unwrap();
        device.push(&vec![0.25; 16000]);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(recorder.elapsed(), Duration::from_secs(5));

        match recorder.tick().unwrap() {
            Tick::AutoStopped(artifact) => assert_eq!(artifact.duration_secs, 5.0),
            other => panic!("expected auto-stop, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_recording_is_rejected() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);
        recorder.start().await.unwrap();

        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, SpeakingError::InvalidState(_)));
        assert_eq!(recorder.kind(), StateKind::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_revokes_previous_artifact_and_reuses_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = FakeDevice::new();
        let mut cfg = config(180);
        cfg.playback_dir = Some(dir.path().to_path_buf());
        let mut recorder = Recorder::new(cfg, device.clone(), Arc::new(StandardEncoders));

        recorder.start().await.unwrap();
        speak(&device, &mut recorder, 1).await;
        let first = recorder.stop().unwrap().unwrap();
        let first_path = first.playback.path().unwrap().to_path_buf();
        assert!(first_path.exists());

        recorder.start().await.unwrap();
        assert!(first.playback.is_revoked());
        assert!(!first_path.exists());
        assert!(recorder.artifact().is_none());
        assert_eq!(device.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_revokes_artifact_and_keeps_device() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);
        recorder.start().await.unwrap();
        speak(&device, &mut recorder, 1).await;
        let artifact = recorder.stop().unwrap().unwrap();

        recorder.reset();
        assert!(artifact.playback.is_revoked());
        assert_eq!(recorder.elapsed(), Duration::ZERO);
        assert_eq!(recorder.kind(), StateKind::Ready);
        assert!(recorder.has_access());

        recorder.release();
        assert_eq!(recorder.kind(), StateKind::Idle);
        assert!(!recorder.has_access());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_encoders_return_to_ready() {
        let device = FakeDevice::new();
        let mut recorder = Recorder::new(config(180), device.clone(), Arc::new(Unsupported));

        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, SpeakingError::EncoderUnsupported { .. }));
        assert_eq!(recorder.kind(), StateKind::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn encoder_failure_discards_partial_take() {
        let device = FakeDevice::new();
        let mut recorder = Recorder::new(config(180), device.clone(), Arc::new(Failing));
        recorder.start().await.unwrap();

        device.push(&[0.1; 320]);
        tokio::time::advance(Duration::from_millis(20)).await;
        let err = recorder.tick().unwrap_err();

        assert!(matches!(err, SpeakingError::EncoderFailure(_)));
        assert_eq!(recorder.kind(), StateKind::Ready);
        assert!(recorder.artifact().is_none());
        assert!(recorder.stop().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_take_is_an_encoder_failure() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);
        recorder.start().await.unwrap();

        let err = recorder.stop().unwrap_err();
        assert!(matches!(err, SpeakingError::EncoderFailure(_)));
        assert_eq!(recorder.kind(), StateKind::Ready);
        assert!(recorder.artifact().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn meter_only_reads_while_recording() {
        let device = FakeDevice::new();
        let mut recorder = recorder(&device);
        recorder.start().await.unwrap();

        device.push(&vec![0.8; 16000]);
        tokio::time::advance(Duration::from_millis(16)).await;
        recorder.tick().unwrap();
        assert!(recorder.level() > 0.0);

        recorder.pause().unwrap();
        assert_eq!(recorder.level(), 0.0);
        device.push(&vec![0.8; 16000]);
        recorder.tick().unwrap();
        assert_eq!(recorder.level(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_recorders_cannot_share_a_device() {
        let device = FakeDevice::new();
        let mut first = recorder(&device);
        let mut second = recorder(&device);

        first.request_access().await.unwrap();
        let err = second.request_access().await.unwrap_err();
        assert!(matches!(err, SpeakingError::DeviceUnavailable(_)));

        drop(first);
        second.request_access().await.unwrap();
    }
}
