//! # Vosk Backend
//!
//! Kaldi-based recognition through libvosk. Only compiled with the `vosk`
//! cargo feature because the library has to be present at link time.
//!
//! Vosk does its own endpointing, so utterance boundaries come straight
//! from `accept_waveform` and the session works at any sample rate the
//! canonical header declares.

use crate::transcription::{
    AcousticModel, RecognitionError, RecognitionSession, Utterance, WordDetail,
};
use anyhow::{anyhow, Result};
use std::path::Path;
use vosk::{CompleteResult, DecodingState, Model, Recognizer};

pub struct VoskModel {
    model: Model,
}

impl VoskModel {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir
            .to_str()
            .ok_or_else(|| anyhow!("Model path is not valid UTF-8: {}", dir.display()))?;
        let model = Model::new(path)
            .ok_or_else(|| anyhow!("Failed to load Vosk model from {}", dir.display()))?;
        Ok(Self { model })
    }
}

impl AcousticModel for VoskModel {
    fn name(&self) -> &str {
        "vosk"
    }

    fn new_session(
        &self,
        sample_rate: u32,
    ) -> Result<Box<dyn RecognitionSession + '_>, RecognitionError> {
        let recognizer = Recognizer::new(&self.model, sample_rate as f32).ok_or_else(|| {
            RecognitionError::Model(format!(
                "Could not create recognizer at {} Hz",
                sample_rate
            ))
        })?;
        Ok(Box::new(VoskSession { recognizer }))
    }
}

pub struct VoskSession {
    recognizer: Recognizer,
}

impl RecognitionSession for VoskSession {
    fn set_words(&mut self, enabled: bool) {
        self.recognizer.set_words(enabled);
    }

    fn accept_waveform(&mut self, samples: &[i16]) -> Result<bool, RecognitionError> {
        match self.recognizer.accept_waveform(samples) {
            Ok(DecodingState::Finalized) => Ok(true),
            Ok(DecodingState::Running) => Ok(false),
            Ok(DecodingState::Failed) => {
                Err(RecognitionError::Model("Vosk failed to decode waveform".to_string()))
            }
            Err(err) => Err(RecognitionError::Model(format!("{:?}", err))),
        }
    }

    fn result(&mut self) -> Result<Utterance, RecognitionError> {
        Ok(to_utterance(self.recognizer.result()))
    }

    fn final_result(&mut self) -> Result<Utterance, RecognitionError> {
        Ok(to_utterance(self.recognizer.final_result()))
    }
}

fn to_utterance(result: CompleteResult<'_>) -> Utterance {
    match result {
        CompleteResult::Single(single) => Utterance {
            text: single.text.trim().to_string(),
            words: single
                .result
                .iter()
                .map(|w| WordDetail {
                    word: w.word.to_string(),
                    start: w.start as f64,
                    end: w.end as f64,
                    confidence: Some(w.conf),
                })
                .collect(),
        },
        // max_alternatives is never set, but take the best one if it is
        CompleteResult::Multiple(multiple) => match multiple.alternatives.first() {
            Some(best) => Utterance {
                text: best.text.trim().to_string(),
                words: best
                    .result
                    .iter()
                    .map(|w| WordDetail {
                        word: w.word.to_string(),
                        start: w.start as f64,
                        end: w.end as f64,
                        confidence: None,
                    })
                    .collect(),
            },
            None => Utterance::default(),
        },
    }
}
