//! Recording encoders
//!
//! Captured audio is encoded incrementally while recording. Ogg Opus is
//! preferred for upload size (speech at 24 kbps is roughly 3 KB/s); WAV is
//! the fallback when the capture rate is one Opus cannot take.

use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::{Result, SpeakingError};

/// Container/codec pair a recording can be encoded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingFormat {
    OggOpus,
    Wav,
}

impl EncodingFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OggOpus => "ogg-opus",
            Self::Wav => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::OggOpus => "audio/ogg",
            Self::Wav => "audio/wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::OggOpus => "ogg",
            Self::Wav => "wav",
        }
    }

    /// Guess the format of an existing file from its extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ogg" | "opus" => Some(Self::OggOpus),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }
}

impl std::fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the mono stream handed to an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    /// Target bitrate for compressed formats, in bits per second
    pub bitrate: u32,
}

/// Incremental encoder for one recording
pub trait AudioEncoder: Send {
    fn format(&self) -> EncodingFormat;

    /// Feed mono samples in [-1, 1]
    fn encode(&mut self, samples: &[f32]) -> Result<()>;

    /// Flush and return the complete file
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Source of encoders; `probe` returns `None` when a format is unsupported here
pub trait EncoderFactory: Send + Sync {
    fn probe(&self, format: EncodingFormat, spec: &StreamSpec) -> Option<Box<dyn AudioEncoder>>;
}

/// Encoders built into the crate
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEncoders;

impl EncoderFactory for StandardEncoders {
    fn probe(&self, format: EncodingFormat, spec: &StreamSpec) -> Option<Box<dyn AudioEncoder>> {
        match format {
            EncodingFormat::OggOpus => match OggOpusEncoder::new(spec) {
                Ok(encoder) => Some(Box::new(encoder)),
                Err(e) => {
                    tracing::debug!("Ogg Opus unavailable: {}", e);
                    None
                }
            },
            EncodingFormat::Wav => Some(Box::new(WavEncoder::new(spec))),
        }
    }
}

/// Pick the first format in `preferences` the factory supports
pub fn negotiate(
    factory: &dyn EncoderFactory,
    preferences: &[EncodingFormat],
    spec: &StreamSpec,
) -> Result<Box<dyn AudioEncoder>> {
    for format in preferences {
        if let Some(encoder) = factory.probe(*format, spec) {
            tracing::debug!("Encoding as {} at {} Hz", format, spec.sample_rate);
            return Ok(encoder);
        }
    }

    let tried = preferences
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(SpeakingError::EncoderUnsupported { tried })
}

const OPUS_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];
const OPUS_PRE_SKIP: u16 = 312;
const MAX_PACKET: usize = 4000;

/// Streaming Ogg Opus encoder (20 ms frames, VoIP tuning)
pub struct OggOpusEncoder {
    opus: opus::Encoder,
    sample_rate: u32,
    frame_size: usize,
    buffered: Vec<f32>,
    pages: OggPageWriter,
    held: Option<Vec<u8>>,
    granule: u64,
    frames: u64,
}

impl OggOpusEncoder {
    pub fn new(spec: &StreamSpec) -> Result<Self> {
        if !OPUS_RATES.contains(&spec.sample_rate) {
            return Err(SpeakingError::EncoderFailure(format!(
                "Opus does not support {} Hz input",
                spec.sample_rate
            )));
        }

        let mut opus = opus::Encoder::new(
            spec.sample_rate,
            opus::Channels::Mono,
            opus::Application::Voip,
        )
        .map_err(|e| SpeakingError::EncoderFailure(format!("Opus init: {}", e)))?;

        opus.set_bitrate(opus::Bitrate::Bits(spec.bitrate as i32))
            .map_err(|e| SpeakingError::EncoderFailure(format!("Opus bitrate: {}", e)))?;

        let mut pages = OggPageWriter::new(uuid::Uuid::new_v4().as_fields().0);
        pages.write_page(&opus_id_header(spec.sample_rate), 0, PAGE_BOS);
        pages.write_page(&opus_comment_header(), 0, 0);

        Ok(Self {
            opus,
            sample_rate: spec.sample_rate,
            frame_size: spec.sample_rate as usize / 50,
            buffered: Vec::new(),
            pages,
            held: None,
            granule: 0,
            frames: 0,
        })
    }

    fn encode_frame(&mut self, frame: &[f32]) -> Result<()> {
        let mut out = [0u8; MAX_PACKET];
        let len = self
            .opus
            .encode_float(frame, &mut out)
            .map_err(|e| SpeakingError::EncoderFailure(format!("Opus encode: {}", e)))?;

        // Previous packet is now known not to be the last one
        if let Some(packet) = self.held.take() {
            self.pages.write_page(&packet, self.granule, 0);
        }

        self.granule += (self.frame_size as u64) * u64::from(48000 / self.sample_rate);
        self.frames += 1;
        self.held = Some(out[..len].to_vec());
        Ok(())
    }
}

impl AudioEncoder for OggOpusEncoder {
    fn format(&self) -> EncodingFormat {
        EncodingFormat::OggOpus
    }

    fn encode(&mut self, samples: &[f32]) -> Result<()> {
        self.buffered.extend_from_slice(samples);

        let whole = self.buffered.len() / self.frame_size * self.frame_size;
        if whole == 0 {
            return Ok(());
        }

        let ready: Vec<f32> = self.buffered.drain(..whole).collect();
        for frame in ready.chunks(self.frame_size) {
            self.encode_frame(frame)?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        if !self.buffered.is_empty() {
            let mut frame = std::mem::take(&mut self.buffered);
            frame.resize(self.frame_size, 0.0);
            self.encode_frame(&frame)?;
        }

        let last = self
            .held
            .take()
            .ok_or_else(|| SpeakingError::EncoderFailure("no audio captured".into()))?;
        self.pages.write_page(&last, self.granule, PAGE_EOS);

        tracing::debug!(
            "Ogg Opus finished: {} frames, {} bytes",
            self.frames,
            self.pages.len()
        );
        Ok(self.pages.into_inner())
    }
}

/// 16-bit PCM WAV encoder
pub struct WavEncoder {
    sample_rate: u32,
    samples: Vec<i16>,
}

impl WavEncoder {
    pub fn new(spec: &StreamSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            samples: Vec::new(),
        }
    }
}

impl AudioEncoder for WavEncoder {
    fn format(&self) -> EncodingFormat {
        EncodingFormat::Wav
    }

    fn encode(&mut self, samples: &[f32]) -> Result<()> {
        self.samples
            .extend(samples.iter().map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16));
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        if self.samples.is_empty() {
            return Err(SpeakingError::EncoderFailure("no audio captured".into()));
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SpeakingError::EncoderFailure(format!("WAV header: {}", e)))?;
            for sample in &self.samples {
                writer
                    .write_sample(*sample)
                    .map_err(|e| SpeakingError::EncoderFailure(format!("WAV write: {}", e)))?;
            }
            writer
                .finalize()
                .map_err(|e| SpeakingError::EncoderFailure(format!("WAV finalize: {}", e)))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Opus ID header packet (RFC 7845 section 5.1)
fn opus_id_header(sample_rate: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(19);
    header.extend_from_slice(b"OpusHead");
    header.push(1);
    header.push(1); // mono
    header.extend_from_slice(&OPUS_PRE_SKIP.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.push(0);
    header
}

/// Opus comment header packet
fn opus_comment_header() -> Vec<u8> {
    let vendor = crate::APP_NAME.as_bytes();
    let mut header = Vec::with_capacity(16 + vendor.len());
    header.extend_from_slice(b"OpusTags");
    header.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    header.extend_from_slice(vendor);
    header.extend_from_slice(&0u32.to_le_bytes());
    header
}

const PAGE_BOS: u8 = 0x02;
const PAGE_EOS: u8 = 0x04;

/// In-memory Ogg page writer, one packet per page
struct OggPageWriter {
    serial: u32,
    sequence: u32,
    out: Vec<u8>,
}

impl OggPageWriter {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            out: Vec::new(),
        }
    }

    fn write_page(&mut self, packet: &[u8], granule: u64, flags: u8) {
        // Lacing: 255-byte segments, terminated by a short (possibly empty) one
        let mut lacing = vec![255u8; packet.len() / 255];
        lacing.push((packet.len() % 255) as u8);

        let start = self.out.len();
        self.out.extend_from_slice(b"OggS");
        self.out.push(0);
        self.out.push(flags);
        self.out.extend_from_slice(&granule.to_le_bytes());
        self.out.extend_from_slice(&self.serial.to_le_bytes());
        self.out.extend_from_slice(&self.sequence.to_le_bytes());
        self.out.extend_from_slice(&0u32.to_le_bytes());
        self.out.push(lacing.len() as u8);
        self.out.extend_from_slice(&lacing);
        self.out.extend_from_slice(packet);

        let crc = ogg_crc(&self.out[start..]);
        self.out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
        self.sequence += 1;
    }

    fn len(&self) -> usize {
        self.out.len()
    }

    fn into_inner(self) -> Vec<u8> {
        self.out
    }
}

/// Ogg CRC-32 over a page whose checksum field is zeroed
fn ogg_crc(page: &[u8]) -> u32 {
    const TABLE: [u32; 256] = crc_table();
    page.iter().fold(0u32, |crc, &byte| {
        (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ byte) as usize]
    })
}

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEECH: StreamSpec = StreamSpec {
        sample_rate: 16000,
        bitrate: 24000,
    };

    struct OnlyWav;

    impl EncoderFactory for OnlyWav {
        fn probe(&self, format: EncodingFormat, spec: &StreamSpec) -> Option<Box<dyn AudioEncoder>> {
            match format {
                EncodingFormat::Wav => Some(Box::new(WavEncoder::new(spec))),
                EncodingFormat::OggOpus => None,
            }
        }
    }

    struct Nothing;

    impl EncoderFactory for Nothing {
        fn probe(&self, _: EncodingFormat, _: &StreamSpec) -> Option<Box<dyn AudioEncoder>> {
            None
        }
    }

    #[test]
    fn negotiation_falls_back_in_order() {
        let prefs = [EncodingFormat::OggOpus, EncodingFormat::Wav];
        let encoder = negotiate(&OnlyWav, &prefs, &SPEECH).unwrap();
        assert_eq!(encoder.format(), EncodingFormat::Wav);
    }

    #[test]
    fn negotiation_reports_every_format_tried() {
        let prefs = [EncodingFormat::OggOpus, EncodingFormat::Wav];
        match negotiate(&Nothing, &prefs, &SPEECH) {
            Err(SpeakingError::EncoderUnsupported { tried }) => assert_eq!(tried, "ogg-opus, wav"),
            other => panic!("unexpected: {:?}", other.map(|e| e.format())),
        }
    }

    #[test]
    fn opus_rejects_cd_rate() {
        let spec = StreamSpec {
            sample_rate: 44100,
            bitrate: 24000,
        };
        assert!(StandardEncoders.probe(EncodingFormat::OggOpus, &spec).is_none());
        assert!(StandardEncoders.probe(EncodingFormat::Wav, &spec).is_some());
    }

    #[test]
    fn wav_output_is_readable() {
        let mut encoder: Box<dyn AudioEncoder> = Box::new(WavEncoder::new(&SPEECH));
        encoder.encode(&[0.0, 0.5, -0.5, 1.0]).unwrap();
        let bytes = encoder.finish().unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn empty_recording_is_an_encoder_failure() {
        let encoder: Box<dyn AudioEncoder> = Box::new(WavEncoder::new(&SPEECH));
        assert!(matches!(
            encoder.finish(),
            Err(SpeakingError::EncoderFailure(_))
        ));
    }

    #[test]
    fn opus_id_header_layout() {
        let header = opus_id_header(16000);
        assert_eq!(&header[..8], b"OpusHead");
        assert_eq!(header.len(), 19);
        assert_eq!(header[9], 1);
        assert_eq!(u16::from_le_bytes([header[10], header[11]]), 312);
    }

    #[test]
    fn ogg_pages_are_framed_and_flagged() {
        let mut pages = OggPageWriter::new(7);
        pages.write_page(b"first", 0, PAGE_BOS);
        pages.write_page(&[0u8; 300], 960, PAGE_EOS);
        let out = pages.into_inner();

        assert_eq!(&out[..4], b"OggS");
        assert_eq!(out[5], PAGE_BOS);
        // header (27) + 1 lacing byte + 5 payload bytes
        let second = 27 + 1 + 5;
        assert_eq!(&out[second..second + 4], b"OggS");
        assert_eq!(out[second + 5], PAGE_EOS);
        assert_eq!(out[second + 26], 2);
        assert_eq!(out[second + 27], 255);
        assert_eq!(out[second + 28], 45);
    }
}
