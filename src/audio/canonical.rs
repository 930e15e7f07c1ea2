//! # Canonical Audio Reader
//!
//! Opens the transcoder's output and enforces the format contract every
//! downstream consumer depends on:
//! - **Channels**: mono (1 channel)
//! - **Bit depth**: 16-bit samples
//! - **Encoding**: uncompressed integer PCM
//!
//! The sample rate is *not* assumed; it is read from the header and handed to
//! the recognizer as-is.

use crate::transcription::RecognitionError;
use hound::{SampleFormat, WavReader, WavSpec};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Validated reader over a canonical WAV file.
pub struct CanonicalAudio {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
}

impl CanonicalAudio {
    /// Open `path` and check the header against the format contract.
    ///
    /// ## Returns:
    /// - **Ok(CanonicalAudio)**: mono 16-bit PCM, ready for chunked reads
    /// - **Err(FormatViolation)**: readable WAV, wrong format
    /// - **Err(Wav / Io)**: missing file, corrupt or truncated header
    pub fn open(path: &Path) -> Result<Self, RecognitionError> {
        let reader = WavReader::open(path).map_err(classify_wav_error)?;
        let spec = reader.spec();
        validate_spec(&spec)?;

        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            frames = reader.duration(),
            "Opened canonical audio"
        );

        Ok(Self { reader, spec })
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    /// Total number of frames declared by the header.
    pub fn frames(&self) -> u32 {
        self.reader.duration()
    }

    /// Read up to `frames` frames into `buf`, replacing its contents.
    ///
    /// Returns the number of frames read; `0` means end of stream. Since the
    /// file is mono, one frame is exactly one sample.
    pub fn read_chunk(&mut self, buf: &mut Vec<i16>, frames: usize) -> Result<usize, RecognitionError> {
        buf.clear();
        for sample in self.reader.samples::<i16>().take(frames) {
            buf.push(sample.map_err(classify_wav_error)?);
        }
        Ok(buf.len())
    }
}

/// Check a WAV header against the canonical format.
pub fn validate_spec(spec: &WavSpec) -> Result<(), RecognitionError> {
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(RecognitionError::FormatViolation(format!(
            "got {} channel(s), {}-bit {}",
            spec.channels,
            spec.bits_per_sample,
            match spec.sample_format {
                SampleFormat::Int => "integer PCM",
                SampleFormat::Float => "float",
            }
        )));
    }
    Ok(())
}

/// Compressed and other non-PCM format tags surface from hound as
/// `Unsupported`; those are contract violations, not corrupt files.
fn classify_wav_error(err: hound::Error) -> RecognitionError {
    match err {
        hound::Error::Unsupported => {
            RecognitionError::FormatViolation("unsupported (non-PCM) WAV encoding".to_string())
        }
        hound::Error::IoError(io) => RecognitionError::Io(io),
        other => RecognitionError::Wav(other),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::Path;

    /// Write `frames` frames of a deterministic ramp.
    pub fn write_wav(path: &Path, channels: u16, sample_rate: u32, bits: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                match bits {
                    8 => writer.write_sample((i % 100) as i8).unwrap(),
                    16 => writer.write_sample(((i % 2000) as i16) - 1000).unwrap(),
                    _ => writer.write_sample((i % 2000) as i32).unwrap(),
                }
            }
        }
        writer.finalize().unwrap();
    }

    pub fn write_float_wav(path: &Path, frames: usize) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i as f32 / frames as f32) - 0.5).unwrap();
        }
        writer.finalize().unwrap();
    }

    /// In-memory mono 16 kHz 16-bit WAV, for multipart uploads.
    pub fn wav_bytes(channels: u16, frames: usize) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                for _ in 0..channels {
                    writer.write_sample(((i % 2000) as i16) - 1000).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// Hand-built header with the mu-law format tag (7), which is compressed.
    pub fn write_mulaw_wav(path: &Path, frames: usize) {
        let data_len = frames as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes()); // mu-law
        bytes.extend_from_slice(&1u16.to_le_bytes()); // channels
        bytes.extend_from_slice(&8000u32.to_le_bytes()); // sample rate
        bytes.extend_from_slice(&8000u32.to_le_bytes()); // byte rate
        bytes.extend_from_slice(&1u16.to_le_bytes()); // block align
        bytes.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.extend(std::iter::repeat(0x7fu8).take(frames));
        std::fs::write(path, bytes).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_reads_mono_pcm_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 16_000, 16, 10_000);

        let mut audio = CanonicalAudio::open(&path).unwrap();
        assert_eq!(audio.sample_rate(), 16_000);
        assert_eq!(audio.frames(), 10_000);

        let mut buf = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let n = audio.read_chunk(&mut buf, 4000).unwrap();
            if n == 0 {
                break;
            }
            sizes.push(n);
        }
        assert_eq!(sizes, vec![4000, 4000, 2000]);
    }

    #[test]
    fn test_sample_rate_comes_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8k.wav");
        write_wav(&path, 1, 8_000, 16, 100);

        let audio = CanonicalAudio::open(&path).unwrap();
        assert_eq!(audio.sample_rate(), 8_000);
    }

    #[test]
    fn test_stereo_is_format_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 16_000, 16, 1000);

        let err = CanonicalAudio::open(&path).err().unwrap();
        assert!(err.is_format_violation(), "unexpected error: {}", err);
    }

    #[test]
    fn test_wrong_bit_depth_is_format_violation() {
        let dir = tempfile::tempdir().unwrap();
        let eight = dir.path().join("8bit.wav");
        write_wav(&eight, 1, 16_000, 8, 1000);
        assert!(CanonicalAudio::open(&eight).err().unwrap().is_format_violation());

        let twenty_four = dir.path().join("24bit.wav");
        write_wav(&twenty_four, 1, 16_000, 24, 1000);
        assert!(CanonicalAudio::open(&twenty_four).err().unwrap().is_format_violation());
    }

    #[test]
    fn test_float_is_format_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        write_float_wav(&path, 1000);

        assert!(CanonicalAudio::open(&path).err().unwrap().is_format_violation());
    }

    #[test]
    fn test_compressed_is_format_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mulaw.wav");
        write_mulaw_wav(&path, 800);

        assert!(CanonicalAudio::open(&path).err().unwrap().is_format_violation());
    }

    #[test]
    fn test_garbage_is_not_format_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not a riff file").unwrap();

        let err = CanonicalAudio::open(&path).err().unwrap();
        assert!(!err.is_format_violation());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CanonicalAudio::open(&dir.path().join("absent.wav")).err().unwrap();
        assert!(matches!(err, RecognitionError::Io(_)));
    }
}
