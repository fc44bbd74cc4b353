//! Loudness meter for the recording screen
//!
//! Each display frame takes the latest analysis window from the live
//! signal, runs a Hann-windowed real FFT and averages the per-bin level
//! over a fixed decibel range, giving a value in [0, 1].

use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::capture::CaptureSession;

/// Samples per analysis window
pub const FFT_SIZE: usize = 256;

const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Latest published level, readable from any thread
#[derive(Debug, Clone, Default)]
pub struct MeterReading(Arc<AtomicU32>);

impl MeterReading {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }
}

pub struct LevelMeter {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    samples: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    reading: MeterReading,
}

impl LevelMeter {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();

        let window = (0..FFT_SIZE)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        Self {
            fft,
            window,
            samples: Vec::with_capacity(FFT_SIZE),
            input,
            spectrum,
            reading: MeterReading::default(),
        }
    }

    /// Shared handle to the published level
    pub fn reading(&self) -> MeterReading {
        self.reading.clone()
    }

    /// Sample the session and publish the new level.
    ///
    /// A missing or closed session yields 0.
    pub fn sample(&mut self, session: Option<&CaptureSession>) -> f32 {
        let level = match session {
            Some(session) if session.is_open() => {
                if session.signal().analysis_window(&mut self.samples) {
                    self.level_of_window()
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        self.reading.set(level);
        level
    }

    /// Stop sampling; the published value drops to 0
    pub fn halt(&self) {
        self.reading.set(0.0);
    }

    fn level_of_window(&mut self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        // Right-align the window so a short history is zero-padded at the front
        let offset = FFT_SIZE - self.samples.len().min(FFT_SIZE);
        self.input.iter_mut().for_each(|x| *x = 0.0);
        for (i, &s) in self.samples.iter().take(FFT_SIZE).enumerate() {
            self.input[offset + i] = s * self.window[offset + i];
        }

        if let Err(e) = self.fft.process(&mut self.input, &mut self.spectrum) {
            tracing::debug!("Level meter FFT failed: {}", e);
            return 0.0;
        }

        let bins = FFT_SIZE / 2;
        let total: f32 = self.spectrum[..bins]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / FFT_SIZE as f32;
                let db = 20.0 * magnitude.max(1e-12).log10();
                ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0)
            })
            .sum();

        (total / bins as f32).clamp(0.0, 1.0)
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{DeviceLease, DeviceTracks, LiveSignal};

    struct NoTracks;

    impl DeviceTracks for NoTracks {
        fn stop(&mut self) {}
    }

    fn session(key: &str, samples: &[f32]) -> CaptureSession {
        let signal = LiveSignal::new(16000);
        signal.push(samples);
        CaptureSession::new(
            DeviceLease::acquire(key).unwrap(),
            key.into(),
            signal,
            Box::new(NoTracks),
        )
    }

    fn noise(amplitude: f32) -> Vec<f32> {
        // Deterministic pseudo-noise so every bin carries energy
        let mut state = 0x1234_5678u32;
        (0..FFT_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * amplitude
            })
            .collect()
    }

    #[test]
    fn silence_reads_zero() {
        let mut meter = LevelMeter::new();
        let s = session("meter-silence", &[0.0; FFT_SIZE]);
        assert_eq!(meter.sample(Some(&s)), 0.0);
    }

    #[test]
    fn louder_input_reads_higher() {
        let mut meter = LevelMeter::new();
        let quiet = session("meter-quiet", &noise(0.01));
        let loud = session("meter-loud", &noise(0.9));

        let q = meter.sample(Some(&quiet));
        let l = meter.sample(Some(&loud));
        assert!(l > q, "loud {} should exceed quiet {}", l, q);
        assert!(l > 0.5 && l <= 1.0);
    }

    #[test]
    fn closed_session_reads_zero() {
        let mut meter = LevelMeter::new();
        let mut s = session("meter-closed", &noise(0.9));
        assert!(meter.sample(Some(&s)) > 0.0);

        s.close();
        assert_eq!(meter.sample(Some(&s)), 0.0);
        assert_eq!(meter.sample(None), 0.0);
    }

    #[test]
    fn halt_publishes_zero() {
        let mut meter = LevelMeter::new();
        let reading = meter.reading();
        let s = session("meter-halt", &noise(0.9));
        meter.sample(Some(&s));
        assert!(reading.get() > 0.0);

        meter.halt();
        assert_eq!(reading.get(), 0.0);
    }
}
