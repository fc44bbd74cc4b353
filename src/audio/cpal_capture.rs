//! Microphone capture using cpal
//!
//! `cpal::Stream` is not `Send`, so each open session owns a small thread
//! that builds the stream, reports whether the device could be opened and
//! then parks until the session is closed.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

use crate::{Result, SpeakingError};

use super::capture::{CaptureDevice, CaptureSession, DeviceLease, DeviceTracks, LiveSignal};

/// Cross-platform input device
#[derive(Debug, Clone)]
pub struct CpalDevice {
    /// Requested device name (empty = system default)
    device_name: String,
    /// Requested sample rate; the device may only offer another one
    sample_rate: u32,
}

impl CpalDevice {
    pub fn new(device_name: &str, sample_rate: u32) -> Self {
        Self {
            device_name: device_name.to_string(),
            sample_rate,
        }
    }

    fn lease_key(&self) -> String {
        format!("cpal:{}", self.display_name())
    }
}

#[async_trait]
impl CaptureDevice for CpalDevice {
    async fn open(&self) -> Result<CaptureSession> {
        let lease = DeviceLease::acquire(&self.lease_key())?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;

        let thread = std::thread::Builder::new()
            .name("avilingo-capture".into())
            .spawn(move || run_stream(&device_name, sample_rate, ready_tx, stop_rx))
            .map_err(|e| SpeakingError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        let (signal, actual_name) = match ready_rx.await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(SpeakingError::DeviceUnavailable(
                    "capture thread exited before the device opened".into(),
                ));
            }
        };

        tracing::info!(
            "cpal: Capturing from {} at {} Hz",
            actual_name,
            signal.sample_rate()
        );

        Ok(CaptureSession::new(
            lease,
            actual_name,
            signal,
            Box::new(CpalTracks {
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
        ))
    }

    fn display_name(&self) -> String {
        if self.device_name.is_empty() {
            "default".to_string()
        } else {
            self.device_name.clone()
        }
    }
}

/// Stream thread handle; stopping drops the stream and joins the thread
struct CpalTracks {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceTracks for CpalTracks {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("cpal: capture thread panicked");
            }
        }
    }
}

impl Drop for CpalTracks {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_stream(
    device_name: &str,
    sample_rate: u32,
    ready: oneshot::Sender<Result<(LiveSignal, String)>>,
    stop: mpsc::Receiver<()>,
) {
    let (stream, signal, name) = match open_stream(device_name, sample_rate) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok((signal.clone(), name))).is_err() {
        // Requester went away before the device was ready
        return;
    }

    // Either an explicit stop or the sender being dropped ends capture
    let _ = stop.recv();
    drop(stream);
}

fn open_stream(device_name: &str, sample_rate: u32) -> Result<(Stream, LiveSignal, String)> {
    let host = cpal::default_host();

    let device = if device_name.is_empty() {
        host.default_input_device()
    } else {
        host.input_devices()
            .map_err(|e| SpeakingError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
    }
    .ok_or_else(|| {
        SpeakingError::DeviceUnavailable(if device_name.is_empty() {
            "no default input device".to_string()
        } else {
            format!("input device '{}' not found", device_name)
        })
    })?;

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .supported_input_configs()
        .map_err(|e| match e {
            cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
                SpeakingError::DeviceUnavailable(name.clone())
            }
            other => SpeakingError::PermissionDenied(other.to_string()),
        })?;

    let config = find_suitable_config(supported, sample_rate)?;

    tracing::debug!(
        "cpal: Audio config: {} Hz, {} channels, {:?}",
        config.sample_rate().0,
        config.channels(),
        config.sample_format()
    );

    let stream_config = StreamConfig {
        channels: config.channels(),
        sample_rate: config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let signal = LiveSignal::new(config.sample_rate().0);
    let s = signal.clone();

    let stream = match config.sample_format() {
        SampleFormat::I8 => build_stream::<i8>(&device, &stream_config, s)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, s)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, s)?,
        SampleFormat::U8 => build_stream::<u8>(&device, &stream_config, s)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, s)?,
        SampleFormat::U32 => build_stream::<u32>(&device, &stream_config, s)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, s)?,
        SampleFormat::F64 => build_stream::<f64>(&device, &stream_config, s)?,
        format => {
            return Err(SpeakingError::DeviceUnavailable(format!(
                "unsupported sample format: {:?}",
                format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| SpeakingError::PermissionDenied(format!("failed to start stream: {}", e)))?;

    Ok((stream, signal, name))
}

/// Prefer mono at the requested rate, then any layout at that rate, then anything
fn find_suitable_config(
    configs: cpal::SupportedInputConfigs,
    target_sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = configs.collect();
    let covers = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate().0 <= target_sample_rate && c.max_sample_rate().0 >= target_sample_rate
    };

    if let Some(config) = configs
        .iter()
        .find(|c| c.channels() == 1 && covers(c))
        .or_else(|| configs.iter().find(|c| covers(c)))
    {
        return Ok(config
            .clone()
            .with_sample_rate(cpal::SampleRate(target_sample_rate)));
    }

    configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate())
        .ok_or_else(|| SpeakingError::DeviceUnavailable("no supported input configuration".into()))
}

/// Build an input stream that downmixes to mono and feeds the live signal
fn build_stream<T>(device: &cpal::Device, config: &StreamConfig, signal: LiveSignal) -> Result<Stream>
where
    T: cpal::Sample + cpal::SizedSample + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let err_fn = |err| tracing::error!("Audio stream error: {}", err);
    let mut mono = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(data.chunks(channels).map(|frame| {
                    frame
                        .iter()
                        .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                        .sum::<f32>()
                        / frame.len() as f32
                }));
                signal.push(&mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                SpeakingError::DeviceUnavailable("device disconnected".into())
            }
            other => SpeakingError::PermissionDenied(other.to_string()),
        })
}

/// Names of the available input devices
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::debug!("cpal: cannot enumerate input devices: {}", e);
            Vec::new()
        }
    }
}
