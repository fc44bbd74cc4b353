//! Audio capture module for avilingo
//!
//! - `capture`: owned microphone session and the live signal it feeds
//! - `cpal_capture`: cross-platform microphone backend
//! - `encoder`: Ogg Opus / WAV encoders with ordered format negotiation
//! - `meter`: spectrum-based level meter for the recording UI
//! - `artifact`: finished recordings and their revocable playback copies

mod artifact;
mod capture;
mod cpal_capture;
mod encoder;
mod meter;

pub use artifact::{ArtifactSlot, AudioArtifact, PlaybackRef};
pub use capture::{CaptureDevice, CaptureSession, DeviceLease, DeviceTracks, LiveSignal};
pub use cpal_capture::{list_input_devices, CpalDevice};
pub use encoder::{
    negotiate, AudioEncoder, EncoderFactory, EncodingFormat, OggOpusEncoder, StandardEncoders,
    StreamSpec, WavEncoder,
};
pub use meter::{LevelMeter, MeterReading, FFT_SIZE};

use std::sync::Arc;

use crate::config::Settings;

/// Create the capture device described by the settings
pub fn create_device(settings: &Settings) -> Arc<dyn CaptureDevice> {
    let device = CpalDevice::new(&settings.recorder.device, settings.recorder.sample_rate);
    tracing::info!("Using cpal capture device: {}", device.display_name());
    Arc::new(device)
}
