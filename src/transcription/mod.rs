//! # Transcription Module
//!
//! Turns canonical audio (mono, 16-bit PCM WAV) into text using a process-wide
//! acoustic model that is loaded once at startup and shared read-only.
//!
//! ## Key Components:
//! - **AcousticModel**: the loaded model, shared by every request behind `Arc`
//! - **RecognitionSession**: per-request decoding state created from the model
//! - **Engine**: the chunked recognition loop that drives a session over a file
//! - **Backends**: Whisper via candle (default) and Vosk (cargo feature `vosk`)
//!
//! ## Session Contract:
//! A session accepts audio chunk by chunk. When it detects an utterance
//! boundary it returns `true` from `accept_waveform`, and the caller collects
//! that utterance with `result()`. At end of stream `final_result()` flushes
//! whatever has not been finalised yet.

pub mod engine;
pub mod whisper;
#[cfg(feature = "vosk")]
pub mod vosk;

pub use engine::{transcribe_file, RecognitionOptions};

use crate::config::{ModelsConfig, RecognizerBackend};
use std::fmt;
use std::sync::Arc;

/// Word-level detail reported by a recognizer.
///
/// Captured when the session is asked for it, but never included in the
/// HTTP response.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WordDetail {
    pub word: String,
    /// Start offset in seconds from the beginning of the audio
    pub start: f64,
    /// End offset in seconds from the beginning of the audio
    pub end: f64,
    /// Recognizer confidence, when the backend reports one
    pub confidence: Option<f32>,
}

/// One recognized fragment: a partial result at an utterance boundary or the final flush.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Utterance {
    pub text: String,
    pub words: Vec<WordDetail>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            words: Vec::new(),
        }
    }
}

/// Errors raised while recognizing canonical audio.
///
/// ## Error Categories:
/// - **FormatViolation**: the file is not mono / 16-bit / integer PCM
/// - **UnsupportedSampleRate**: the backend cannot decode at this rate
/// - **Wav**: the WAV container could not be read (corrupt header, truncated data)
/// - **Io**: filesystem failure
/// - **Model**: the recognizer itself failed
#[derive(Debug)]
pub enum RecognitionError {
    FormatViolation(String),
    UnsupportedSampleRate(u32),
    Wav(hound::Error),
    Io(std::io::Error),
    Model(String),
}

impl RecognitionError {
    pub fn is_format_violation(&self) -> bool {
        matches!(self, RecognitionError::FormatViolation(_))
    }
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::FormatViolation(msg) => {
                write!(f, "Audio file must be WAV format mono PCM: {}", msg)
            }
            RecognitionError::UnsupportedSampleRate(rate) => {
                write!(f, "Unsupported sample rate: {} Hz", rate)
            }
            RecognitionError::Wav(err) => write!(f, "Invalid WAV data: {}", err),
            RecognitionError::Io(err) => write!(f, "I/O error: {}", err),
            RecognitionError::Model(msg) => write!(f, "Recognizer error: {}", msg),
        }
    }
}

impl std::error::Error for RecognitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecognitionError::Wav(err) => Some(err),
            RecognitionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RecognitionError {
    fn from(err: std::io::Error) -> Self {
        RecognitionError::Io(err)
    }
}

impl From<candle_core::Error> for RecognitionError {
    fn from(err: candle_core::Error) -> Self {
        RecognitionError::Model(err.to_string())
    }
}

/// Per-request decoding state.
///
/// Sessions are never shared between requests; `&mut self` everywhere keeps
/// them single-owner.
pub trait RecognitionSession {
    /// Request word-level detail on subsequent results.
    fn set_words(&mut self, enabled: bool);

    /// Submit one chunk of mono 16-bit samples.
    ///
    /// Returns `true` when an utterance boundary was reached and `result()`
    /// has a finished utterance to hand out.
    fn accept_waveform(&mut self, samples: &[i16]) -> Result<bool, RecognitionError>;

    /// The utterance finished by the last boundary.
    fn result(&mut self) -> Result<Utterance, RecognitionError>;

    /// Flush everything not yet finalised. Called exactly once, at end of stream.
    fn final_result(&mut self) -> Result<Utterance, RecognitionError>;
}

/// A loaded acoustic/language model.
///
/// Implementations are immutable after loading and must be safe to share
/// across request workers (`Send + Sync`).
pub trait AcousticModel: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn name(&self) -> &str;

    /// Create a session scoped to audio sampled at `sample_rate` Hz.
    fn new_session(
        &self,
        sample_rate: u32,
    ) -> Result<Box<dyn RecognitionSession + '_>, RecognitionError>;
}

/// Load the configured recognition model.
///
/// ## Startup Contract:
/// Called once before the HTTP server binds. Any error here is fatal: the
/// caller propagates it out of `main` and the process exits.
pub async fn load_model(config: &ModelsConfig) -> anyhow::Result<Arc<dyn AcousticModel>> {
    tracing::info!(
        backend = %config.backend,
        model_dir = %config.model_dir,
        "Loading recognition model"
    );
    let start_time = std::time::Instant::now();

    let model: Arc<dyn AcousticModel> = match config.backend {
        RecognizerBackend::Whisper => Arc::new(whisper::WhisperModel::load(config).await?),
        RecognizerBackend::Vosk => load_vosk(config)?,
    };

    tracing::info!(
        backend = model.name(),
        "Recognition model loaded in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(model)
}

#[cfg(feature = "vosk")]
fn load_vosk(config: &ModelsConfig) -> anyhow::Result<Arc<dyn AcousticModel>> {
    Ok(Arc::new(vosk::VoskModel::load(&config.model_path())?))
}

#[cfg(not(feature = "vosk"))]
fn load_vosk(_config: &ModelsConfig) -> anyhow::Result<Arc<dyn AcousticModel>> {
    anyhow::bail!("Vosk backend requested but this binary was built without the `vosk` feature")
}

/// Deterministic in-memory model for tests.
///
/// Every `boundary_frames` accepted frames close an utterance named
/// `"segment N"`; `final_result` returns `"tail"` when frames are left over
/// and an empty text otherwise.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct ScriptedModel {
        pub boundary_frames: usize,
        pub sessions_created: AtomicUsize,
        pub finals: Arc<AtomicUsize>,
    }

    impl ScriptedModel {
        pub fn new(boundary_frames: usize) -> Self {
            Self {
                boundary_frames,
                sessions_created: AtomicUsize::new(0),
                finals: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    pub struct ScriptedSession {
        boundary_frames: usize,
        pending: usize,
        emitted: usize,
        words: bool,
        finals: Arc<AtomicUsize>,
    }

    impl AcousticModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn new_session(
            &self,
            _sample_rate: u32,
        ) -> Result<Box<dyn RecognitionSession + '_>, RecognitionError> {
            self.sessions_created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                boundary_frames: self.boundary_frames,
                pending: 0,
                emitted: 0,
                words: false,
                finals: self.finals.clone(),
            }))
        }
    }

    impl ScriptedSession {
        fn utterance(&self, text: String) -> Utterance {
            let words = if self.words {
                text.split_whitespace()
                    .map(|word| WordDetail {
                        word: word.to_string(),
                        start: 0.0,
                        end: 0.0,
                        confidence: Some(1.0),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            Utterance { text, words }
        }
    }

    impl RecognitionSession for ScriptedSession {
        fn set_words(&mut self, enabled: bool) {
            self.words = enabled;
        }

        fn accept_waveform(&mut self, samples: &[i16]) -> Result<bool, RecognitionError> {
            self.pending += samples.len();
            Ok(self.pending >= self.boundary_frames)
        }

        fn result(&mut self) -> Result<Utterance, RecognitionError> {
            self.pending = 0;
            self.emitted += 1;
            Ok(self.utterance(format!("segment {}", self.emitted)))
        }

        fn final_result(&mut self) -> Result<Utterance, RecognitionError> {
            self.finals.fetch_add(1, Ordering::SeqCst);
            if self.pending > 0 {
                self.pending = 0;
                Ok(self.utterance("tail".to_string()))
            } else {
                Ok(Utterance::default())
            }
        }
    }
}
