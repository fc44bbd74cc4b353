//! Microphone session ownership
//!
//! A `CaptureSession` is the only way to reach a live microphone signal.
//! It is created by a `CaptureDevice` when access is granted and is owned
//! by exactly one recorder until it is closed. Closing stops the device
//! tracks and tears down the analysis window in one step.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::{Result, SpeakingError};

use super::meter::FFT_SIZE;

/// A microphone that can be opened for exclusive capture
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Ask for access and open the device.
    ///
    /// Suspends while the platform resolves the permission request.
    async fn open(&self) -> Result<CaptureSession>;

    /// Human-readable device name for logging
    fn display_name(&self) -> String;
}

/// Running device tracks behind a capture session
pub trait DeviceTracks: Send {
    /// Stop the tracks and release the hardware
    fn stop(&mut self);
}

/// Live samples shared between the device callback, the encoder feed and the meter
#[derive(Clone)]
pub struct LiveSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    sample_rate: u32,
    open: AtomicBool,
    feeding: AtomicBool,
    pending: Mutex<Vec<f32>>,
    analysis: Mutex<VecDeque<f32>>,
}

impl LiveSignal {
    /// Create an open mono signal at the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                sample_rate,
                open: AtomicBool::new(true),
                feeding: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
                analysis: Mutex::new(VecDeque::with_capacity(FFT_SIZE)),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Deliver mono samples from the device
    pub fn push(&self, samples: &[f32]) {
        if !self.is_open() {
            return;
        }

        if let Ok(mut window) = self.inner.analysis.lock() {
            for &sample in samples.iter().rev().take(FFT_SIZE).rev() {
                if window.len() == FFT_SIZE {
                    window.pop_front();
                }
                window.push_back(sample);
            }
        }

        if self.inner.feeding.load(Ordering::SeqCst) {
            if let Ok(mut pending) = self.inner.pending.lock() {
                pending.extend_from_slice(samples);
            }
        }
    }

    /// Route incoming samples to the encoder feed (or stop doing so)
    pub fn set_feeding(&self, feeding: bool) {
        self.inner.feeding.store(feeding, Ordering::SeqCst);
    }

    /// Take every sample captured for the encoder since the last call
    pub fn take_pending(&self) -> Vec<f32> {
        match self.inner.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        }
    }

    /// Drop samples waiting for the encoder
    pub fn discard_pending(&self) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.clear();
        }
    }

    /// Copy the most recent analysis window into `out`.
    ///
    /// Returns false once the signal is closed.
    pub fn analysis_window(&self, out: &mut Vec<f32>) -> bool {
        out.clear();
        if !self.is_open() {
            return false;
        }
        if let Ok(window) = self.inner.analysis.lock() {
            out.extend(window.iter().copied());
        }
        true
    }

    fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.feeding.store(false, Ordering::SeqCst);
        self.discard_pending();
        if let Ok(mut window) = self.inner.analysis.lock() {
            window.clear();
        }
    }
}

fn held_devices() -> &'static Mutex<HashSet<String>> {
    static HELD: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claim on a physical device; at most one open session per device in this process
#[derive(Debug)]
pub struct DeviceLease {
    key: String,
}

impl DeviceLease {
    pub fn acquire(key: &str) -> Result<Self> {
        let mut held = held_devices()
            .lock()
            .map_err(|_| SpeakingError::DeviceUnavailable("device registry poisoned".into()))?;

        if !held.insert(key.to_string()) {
            return Err(SpeakingError::DeviceUnavailable(format!(
                "{} is already in use by another recorder",
                key
            )));
        }

        Ok(Self {
            key: key.to_string(),
        })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Ok(mut held) = held_devices().lock() {
            held.remove(&self.key);
        }
    }
}

/// Exclusive handle to an open microphone
pub struct CaptureSession {
    device_name: String,
    signal: LiveSignal,
    tracks: Option<Box<dyn DeviceTracks>>,
    lease: Option<DeviceLease>,
}

impl CaptureSession {
    pub fn new(
        lease: DeviceLease,
        device_name: String,
        signal: LiveSignal,
        tracks: Box<dyn DeviceTracks>,
    ) -> Self {
        Self {
            device_name,
            signal,
            tracks: Some(tracks),
            lease: Some(lease),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn signal(&self) -> &LiveSignal {
        &self.signal
    }

    pub fn is_open(&self) -> bool {
        self.tracks.is_some() && self.signal.is_open()
    }

    /// Stop the device tracks and the analysis window together
    pub fn close(&mut self) {
        if let Some(mut tracks) = self.tracks.take() {
            self.signal.close();
            tracks.stop();
            self.lease.take();
            tracing::info!("Released capture device: {}", self.device_name);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device_name", &self.device_name)
            .field("open", &self.is_open())
            .finish()
    }
}
