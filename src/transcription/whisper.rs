//! # Whisper Backend
//!
//! Runs OpenAI Whisper weights through candle. The model directory must
//! contain `config.json`, `tokenizer.json` and `model.safetensors`; when it
//! does not and a HuggingFace repo is configured, the files are fetched with
//! hf-hub into that directory.
//!
//! ## Session Behaviour:
//! Whisper decodes fixed 30 second windows, so a session buffers incoming
//! chunks and treats every full window as an utterance boundary. Whatever is
//! left when the stream ends is decoded by `final_result`.
//!
//! ## Thread Safety:
//! The loaded weights are never mutated. Each session clones the model
//! handle, which shares the weight tensors but owns its own attention cache.

use crate::config::ModelsConfig;
use crate::device;
use crate::transcription::{
    AcousticModel, RecognitionError, RecognitionSession, Utterance, WordDetail,
};
use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Resolved locations of the three files a Whisper checkpoint needs.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn local(dir: &Path) -> Option<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        (files.config.is_file() && files.tokenizer.is_file() && files.weights.is_file())
            .then_some(files)
    }

    /// Fetch the checkpoint from HuggingFace, caching under `cache_dir`.
    async fn from_hub(repo_id: &str, cache_dir: &Path) -> Result<Self> {
        use hf_hub::api::tokio::ApiBuilder;

        tracing::info!(repo = repo_id, cache_dir = %cache_dir.display(), "Fetching Whisper model from HuggingFace");

        let mut builder = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        let api = builder.build().context("Failed to create HuggingFace API client")?;
        let repo = api.model(repo_id.to_string());

        let config = repo
            .get(CONFIG_FILE)
            .await
            .with_context(|| format!("Failed to download {} from {}", CONFIG_FILE, repo_id))?;
        let tokenizer = repo
            .get(TOKENIZER_FILE)
            .await
            .with_context(|| format!("Failed to download {} from {}", TOKENIZER_FILE, repo_id))?;
        let weights = repo
            .get(WEIGHTS_FILE)
            .await
            .with_context(|| format!("Failed to download {} from {}", WEIGHTS_FILE, repo_id))?;

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }
}

/// Special token ids that make up the decoder prompt.
#[derive(Debug, Clone)]
struct PromptTokens {
    sot: u32,
    language: Option<u32>,
    transcribe: u32,
    no_timestamps: u32,
    eot: u32,
}

impl PromptTokens {
    fn resolve(tokenizer: &Tokenizer, language: Option<&str>) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };

        // English-only checkpoints have no language tokens at all.
        let language = language.and_then(|lang| tokenizer.token_to_id(&format!("<|{}|>", lang)));

        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            language,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
        })
    }

    fn prompt(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot];
        tokens.extend(self.language);
        tokens.push(self.transcribe);
        tokens.push(self.no_timestamps);
        tokens
    }
}

/// A loaded Whisper checkpoint.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    /// Additive logit mask: `-inf` for tokens greedy decoding must never pick
    suppress: Tensor,
    tokens: PromptTokens,
    device: Device,
}

impl WhisperModel {
    /// Load the checkpoint described by `config`.
    ///
    /// ## Loading Process:
    /// 1. Use the files in `model_dir`, or fetch them from `hub_repo`
    /// 2. Pick the compute device
    /// 3. Parse the model config and tokenizer
    /// 4. Memory-map the safetensors weights
    /// 5. Build the mel filter bank and the token suppression mask
    pub async fn load(config: &ModelsConfig) -> Result<Self> {
        let dir = config.model_path();
        let files = match ModelFiles::local(&dir) {
            Some(files) => files,
            None => match config.hub_repo() {
                Some(repo) => ModelFiles::from_hub(repo, &dir).await?,
                None => bail!(
                    "Model directory {} must contain {}, {} and {} (or set models.hub_repo)",
                    dir.display(),
                    CONFIG_FILE,
                    TOKENIZER_FILE,
                    WEIGHTS_FILE
                ),
            },
        };

        let device = device::select_device(&config.device);

        let whisper_config: Config = serde_json::from_reader(
            std::fs::File::open(&files.config)
                .with_context(|| format!("Failed to open {}", files.config.display()))?,
        )
        .context("Invalid Whisper config.json")?;
        tracing::debug!(
            num_mel_bins = whisper_config.num_mel_bins,
            vocab_size = whisper_config.vocab_size,
            "Whisper config parsed"
        );

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        let tokens = PromptTokens::resolve(&tokenizer, config.language())?;

        // Safety: the weights file is not modified while the process runs.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, whisper_config.clone())?;

        let mel_filters = mel_filter_bank(m::SAMPLE_RATE, m::N_FFT, whisper_config.num_mel_bins);
        let suppress = suppress_mask(&whisper_config, tokens.no_timestamps, &device)?;

        Ok(Self {
            model,
            config: whisper_config,
            tokenizer,
            mel_filters,
            suppress,
            tokens,
            device,
        })
    }

    /// Greedy-decode one window of normalised samples.
    fn decode(
        &self,
        whisper: &mut m::model::Whisper,
        pcm: &[f32],
        offset_secs: f64,
        words: bool,
    ) -> Result<Utterance, RecognitionError> {
        if pcm.is_empty() {
            return Ok(Utterance::default());
        }

        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?;
        let mel = mel.narrow(2, 0, frames.min(m::N_FRAMES))?;

        let features = whisper.encoder.forward(&mel, true)?;

        let mut tokens = self.tokens.prompt();
        let prompt_len = tokens.len();
        let sample_len = self.config.max_target_positions / 2;

        for i in 0..sample_len {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = whisper.decoder.forward(&input, &features, i == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = whisper
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress)?;
            let next = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;
            if next == self.tokens.eot {
                break;
            }
            tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| RecognitionError::Model(format!("Tokenizer decode error: {}", e)))?;
        let text = text.trim().to_string();

        let duration = pcm.len() as f64 / m::SAMPLE_RATE as f64;
        let words = if words {
            segment_words(&text, offset_secs, offset_secs + duration)
        } else {
            Vec::new()
        };

        Ok(Utterance { text, words })
    }
}

impl AcousticModel for WhisperModel {
    fn name(&self) -> &str {
        "whisper"
    }

    fn new_session(
        &self,
        sample_rate: u32,
    ) -> Result<Box<dyn RecognitionSession + '_>, RecognitionError> {
        if sample_rate as usize != m::SAMPLE_RATE {
            return Err(RecognitionError::UnsupportedSampleRate(sample_rate));
        }

        Ok(Box::new(WhisperSession {
            model: self,
            whisper: self.model.clone(),
            pending: Vec::new(),
            decoded_samples: 0,
            ready: None,
            words: false,
        }))
    }
}

/// Per-request Whisper decoding state.
pub struct WhisperSession<'m> {
    model: &'m WhisperModel,
    whisper: m::model::Whisper,
    pending: Vec<f32>,
    decoded_samples: usize,
    ready: Option<Utterance>,
    words: bool,
}

impl WhisperSession<'_> {
    fn decode_samples(&mut self, pcm: &[f32]) -> Result<Utterance, RecognitionError> {
        let offset = self.decoded_samples as f64 / m::SAMPLE_RATE as f64;
        let model = self.model;
        let utterance = model.decode(&mut self.whisper, pcm, offset, self.words)?;
        self.decoded_samples += pcm.len();
        Ok(utterance)
    }
}

impl RecognitionSession for WhisperSession<'_> {
    fn set_words(&mut self, enabled: bool) {
        self.words = enabled;
    }

    fn accept_waveform(&mut self, samples: &[i16]) -> Result<bool, RecognitionError> {
        self.pending
            .extend(samples.iter().map(|&s| s as f32 / i16::MAX as f32));

        let mut finished: Option<Utterance> = None;
        while self.pending.len() >= m::N_SAMPLES {
            let window: Vec<f32> = self.pending.drain(..m::N_SAMPLES).collect();
            let utterance = self.decode_samples(&window)?;
            finished = Some(match finished {
                Some(mut previous) => {
                    if !utterance.text.is_empty() {
                        if !previous.text.is_empty() {
                            previous.text.push(' ');
                        }
                        previous.text.push_str(&utterance.text);
                    }
                    previous.words.extend(utterance.words);
                    previous
                }
                None => utterance,
            });
        }

        match finished {
            Some(utterance) => {
                self.ready = Some(utterance);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn result(&mut self) -> Result<Utterance, RecognitionError> {
        Ok(self.ready.take().unwrap_or_default())
    }

    fn final_result(&mut self) -> Result<Utterance, RecognitionError> {
        let rest = std::mem::take(&mut self.pending);
        self.decode_samples(&rest)
    }
}

/// Whisper gives no word timing in this decoding mode, so word spans are
/// spread evenly over the window they were decoded from.
fn segment_words(text: &str, start: f64, end: f64) -> Vec<WordDetail> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let step = (end - start) / words.len() as f64;
    words
        .iter()
        .enumerate()
        .map(|(i, word)| WordDetail {
            word: word.to_string(),
            start: start + step * i as f64,
            end: start + step * (i + 1) as f64,
            confidence: None,
        })
        .collect()
}

/// Mask out the configured suppress tokens plus `<|notimestamps|>` and every
/// timestamp token after it.
fn suppress_mask(config: &Config, no_timestamps: u32, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|id| {
            if id >= no_timestamps || config.suppress_tokens.contains(&id) {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    Tensor::new(mask.as_slice(), device)
}

/// Slaney-scale mel filter bank, laid out as `n_mels` rows of `n_fft / 2 + 1` bins.
fn mel_filter_bank(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (lower, center, upper) = (edges[band], edges[band + 1], edges[band + 2]);
        let norm = 2.0 / (upper - lower);
        for bin in 0..n_freqs {
            let freq = bin as f64 * sample_rate as f64 / n_fft as f64;
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            filters[band * n_freqs + bin] = (rising.min(falling).max(0.0) * norm) as f32;
        }
    }
    filters
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        hz / MEL_F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        MEL_F_SP * mel
    }
}
