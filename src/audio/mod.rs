//! # Audio Module
//!
//! Everything between the raw upload and the recognizer's input.
//!
//! ## Key Components:
//! - **Workspace**: per-request temporary paths with guaranteed cleanup
//! - **Transcoder**: external converter producing canonical audio
//! - **Canonical reader**: format-contract validation and chunked frame reads
//!
//! ## Canonical Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz), read back from the header
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Container**: uncompressed WAV

pub mod canonical;
pub mod transcoder;
pub mod workspace;

pub use canonical::CanonicalAudio;
pub use transcoder::Transcoder;
pub use workspace::RequestWorkspace;
