//! Finished recordings
//!
//! An `AudioArtifact` is produced once per recording. Its playback
//! reference points at a local copy that can be revoked when the recording
//! is superseded or discarded; every clone of the reference sees the
//! revocation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::encoder::EncodingFormat;
use crate::{Result, SpeakingError};

/// Revocable handle to a local playback copy
#[derive(Debug, Clone)]
pub struct PlaybackRef {
    inner: Arc<PlaybackInner>,
}

#[derive(Debug)]
struct PlaybackInner {
    id: Uuid,
    path: Option<PathBuf>,
    /// Whether the file was written by us and may be deleted
    owned: bool,
    revoked: AtomicBool,
}

impl PlaybackRef {
    /// Reference with no file behind it
    pub fn detached() -> Self {
        Self::with_path(None)
    }

    /// Write `payload` under `dir` and reference it
    pub fn write(dir: &Path, format: EncodingFormat, payload: &[u8]) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let id = Uuid::new_v4();
        let path = dir.join(format!("{}.{}", id, format.extension()));
        std::fs::write(&path, payload)?;

        Ok(Self {
            inner: Arc::new(PlaybackInner {
                id,
                path: Some(path),
                owned: true,
                revoked: AtomicBool::new(false),
            }),
        })
    }

    /// Reference an existing file owned by someone else (never deleted)
    fn borrowed(path: &Path) -> Self {
        Self::with_path(Some(path.to_path_buf()))
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(PlaybackInner {
                id: Uuid::new_v4(),
                path,
                owned: false,
                revoked: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Local file, unless revoked
    pub fn path(&self) -> Option<&Path> {
        if self.is_revoked() {
            None
        } else {
            self.inner.path.as_deref()
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.revoked.load(Ordering::SeqCst)
    }

    /// Invalidate the reference and remove the playback copy
    pub fn revoke(&self) {
        if self.inner.revoked.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(path), true) = (&self.inner.path, self.inner.owned) {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!("Could not remove playback copy {}: {}", path.display(), e);
            }
        }
    }
}

/// Encoded recording ready for playback or upload
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub payload: Arc<[u8]>,
    pub format: EncodingFormat,
    pub duration_secs: f64,
    pub playback: PlaybackRef,
}

impl AudioArtifact {
    pub fn new(payload: Vec<u8>, format: EncodingFormat, duration_secs: f64, playback: PlaybackRef) -> Self {
        Self {
            payload: payload.into(),
            format,
            duration_secs,
            playback,
        }
    }

    /// Load a recording from disk for submission.
    ///
    /// The duration must be supplied for Ogg files; WAV duration is read
    /// from the header when not given.
    pub fn from_file(path: &Path, duration_secs: Option<f64>) -> Result<Self> {
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(EncodingFormat::from_extension)
            .ok_or_else(|| {
                SpeakingError::InvalidState(format!(
                    "{}: unsupported file type (expected .ogg or .wav)",
                    path.display()
                ))
            })?;

        let payload = std::fs::read(path).map_err(|e| {
            SpeakingError::InvalidState(format!("cannot read {}: {}", path.display(), e))
        })?;

        let duration_secs = match (duration_secs, format) {
            (Some(d), _) => d,
            (None, EncodingFormat::Wav) => wav_duration(&payload)?,
            (None, EncodingFormat::OggOpus) => {
                return Err(SpeakingError::InvalidState(
                    "--duration is required for Ogg recordings".into(),
                ))
            }
        };

        Ok(Self::new(payload, format, duration_secs, PlaybackRef::borrowed(path)))
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    pub fn file_name(&self) -> String {
        format!("recording.{}", self.format.extension())
    }
}

fn wav_duration(payload: &[u8]) -> Result<f64> {
    let reader = hound::WavReader::new(std::io::Cursor::new(payload))
        .map_err(|e| SpeakingError::InvalidState(format!("invalid WAV file: {}", e)))?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Holds the current artifact; replacing or clearing it revokes the old reference
#[derive(Debug, Default)]
pub struct ArtifactSlot {
    current: Mutex<Option<AudioArtifact>>,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, artifact: AudioArtifact) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(old) = current.replace(artifact) {
                old.playback.revoke();
            }
        }
    }

    pub fn get(&self) -> Option<AudioArtifact> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    pub fn revoke(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(old) = current.take() {
                old.playback.revoke();
            }
        }
    }
}
