//! # Recognition Engine
//!
//! Drives one recognition session over one canonical audio file:
//!
//! ```text
//! Idle -> ReadingChunk -> { EmitPartial | ContinueReading } -> ... -> Finalizing -> Done
//! ```
//!
//! Finalizing runs exactly once per file, including files shorter than one
//! chunk and files with no frames at all.

use crate::audio::CanonicalAudio;
use crate::config::RecognitionConfig;
use crate::transcription::{AcousticModel, RecognitionError, Utterance};
use std::path::Path;
use std::time::Instant;

/// Knobs for the chunked loop.
#[derive(Debug, Clone)]
pub struct RecognitionOptions {
    /// Frames per `accept_waveform` call
    pub chunk_frames: usize,
    /// Ask the session for word-level detail
    pub enable_words: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            chunk_frames: 4000,
            enable_words: true,
        }
    }
}

impl From<&RecognitionConfig> for RecognitionOptions {
    fn from(config: &RecognitionConfig) -> Self {
        Self {
            chunk_frames: config.chunk_frames,
            enable_words: config.enable_words,
        }
    }
}

/// Transcribe the canonical audio at `path`.
///
/// ## Process:
/// 1. Open the file and enforce mono / 16-bit / PCM
/// 2. Create a session at the header's sample rate, word detail on
/// 3. Feed chunks; collect a result at every utterance boundary
/// 4. Collect the final result
/// 5. Join the non-empty texts with single spaces
///
/// ## Errors:
/// Every failure is logged here and returned unchanged, so the handler can
/// report the message.
pub fn transcribe_file(
    model: &dyn AcousticModel,
    path: &Path,
    options: &RecognitionOptions,
) -> Result<String, RecognitionError> {
    let start_time = Instant::now();

    match recognize(model, path, options) {
        Ok(fragments) => {
            let text = join_fragments(&fragments);
            tracing::info!(
                backend = model.name(),
                fragments = fragments.len(),
                chars = text.len(),
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Transcription completed"
            );
            Ok(text)
        }
        Err(err) => {
            tracing::error!(
                backend = model.name(),
                path = %path.display(),
                error = %err,
                "Transcription failed"
            );
            Err(err)
        }
    }
}

/// Run the loop and return every captured utterance in order, the final one last.
fn recognize(
    model: &dyn AcousticModel,
    path: &Path,
    options: &RecognitionOptions,
) -> Result<Vec<Utterance>, RecognitionError> {
    let mut audio = CanonicalAudio::open(path)?;
    let mut session = model.new_session(audio.sample_rate())?;
    session.set_words(options.enable_words);

    let mut fragments = Vec::new();
    let mut chunk = Vec::with_capacity(options.chunk_frames);
    let mut chunks = 0usize;

    while audio.read_chunk(&mut chunk, options.chunk_frames)? > 0 {
        chunks += 1;
        if session.accept_waveform(&chunk)? {
            let utterance = session.result()?;
            tracing::trace!(chunk = chunks, text = %utterance.text, "Utterance boundary");
            fragments.push(utterance);
        }
    }

    fragments.push(session.final_result()?);
    tracing::debug!(
        frames = audio.frames(),
        chunks,
        partials = fragments.len() - 1,
        "Recognition loop finished"
    );

    Ok(fragments)
}

/// Concatenate fragment texts with single spaces, skipping empty ones.
pub fn join_fragments(fragments: &[Utterance]) -> String {
    fragments
        .iter()
        .map(|utterance| utterance.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
