//! # sc-harness
//!
//! Correctness and stress rig for streaming lossless audio codecs.
//!
//! The rig synthesizes deterministic multi-band audio, drives an external
//! encoder, corrupts its output in flight when asked to, streams the bytes
//! through a bounded blocking channel to a concurrently running decoder, and
//! proves bit-exact (or error-bounded) round-trip fidelity by comparing
//! content hashes and sample counts.
//!
//! The codec itself is an external collaborator reached through exactly two
//! seams: a [`BlockSink`](codec::BlockSink) the encoder calls per finished
//! output block, and a [`ByteSource`](codec::ByteSource) the decoder pulls
//! bytes from. [`StreamChannel`](channel::StreamChannel) implements both.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sc_harness::{CaseConfig, run_case};
//!
//! let config = CaseConfig::lossless(16, 2).with_seconds(10);
//! let outcome = run_case(&my_codec, &config)?;
//! assert!(outcome.passed);
//! ```

pub mod case;
pub mod channel;
pub mod codec;
pub mod fuzz;
pub mod pcm;
pub mod prng;
pub mod report;
pub mod synth;

pub use case::{CaseConfig, CaseOutcome, run_case};
pub use channel::{ChannelStats, StreamChannel};
pub use codec::{BlockSink, ByteSource, Codec, CodecParams, Decoder, Encoder, SeekMode};
pub use fuzz::FaultInjector;
pub use pcm::SampleFormat;
pub use prng::Prng;
pub use report::{CaseReport, ReportFormat};
pub use synth::{ChannelMix, Generator, SpatialSweep};

use thiserror::Error;

/// Errors surfaced by the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
