//! Codec-facing contracts
//!
//! The harness never touches a codec's internals. It hands the encoder a
//! [`BlockSink`] per output stream and the decoder a [`ByteSource`] per input
//! stream, and drives both through the narrow [`Encoder`]/[`Decoder`]
//! surfaces below. Any codec that speaks these traits can sit under the rig.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

/// How a relative seek offset is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    FromStart,
    FromCurrent,
    FromEnd,
}

/// Destination for encoded blocks. The block is passed mutably so a
/// fault-injecting sink can corrupt it in place before forwarding.
pub trait BlockSink: Send + Sync {
    /// Deliver one encoded block. Returns `false` on a malformed (empty)
    /// block or a sink that can no longer accept data.
    fn write_block(&self, block: &mut [u8]) -> bool;
}

/// Sequential byte input with optional pushback and optional seeking.
///
/// The streaming channel implements only the mandatory pair of operations;
/// everything else defaults to "unsupported" so decoders query capabilities
/// instead of assuming them.
pub trait ByteSource: Send + Sync {
    /// Read up to `buf.len()` bytes, blocking until at least one byte is
    /// available or end-of-input. Zero means end-of-input.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Return one byte to the stream, to be produced by the next read.
    /// Returns `false` if the single pushback slot is occupied.
    fn push_back(&self, byte: u8) -> bool;

    /// Current position, when the source tracks one.
    fn position(&self) -> Option<u64> {
        None
    }

    /// Seek to an absolute offset. Streaming sources return `false`.
    fn seek_absolute(&self, _offset: u64) -> bool {
        false
    }

    /// Seek relative to the given anchor. Streaming sources return `false`.
    fn seek_relative(&self, _delta: i64, _mode: SeekMode) -> bool {
        false
    }

    /// Total length, when known up front.
    fn length(&self) -> Option<u64> {
        None
    }

    fn can_seek(&self) -> bool {
        false
    }
}

/// Stream parameters handed to the encoder at open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecParams {
    pub sample_rate: u32,
    pub num_channels: u32,
    /// Speaker-position bitmask for the channel layout.
    pub channel_mask: u32,
    pub bytes_per_sample: u32,
    pub bits_per_sample: u32,
    /// Samples are IEEE floats reinterpreted as their bit patterns.
    pub float_data: bool,
    /// Lossy primary stream at roughly `bitrate` bits per sample.
    pub hybrid: bool,
    /// Emit a correction stream restoring the hybrid mode's residual.
    pub correction: bool,
    pub bitrate: f32,
}

/// Packs interleaved samples into encoded blocks.
pub trait Encoder {
    /// Encode `frames` frames of interleaved samples. Samples beyond
    /// `frames * num_channels` are ignored. Returns `false` once the sink
    /// rejects a block; further calls are undefined.
    fn pack(&mut self, samples: &[i32], frames: u32) -> bool;

    /// Flush any buffered frames as a final short block.
    fn flush(&mut self) -> Result<()>;

    /// Record the uncompressed stream's digest in the output so decode-side
    /// verification is self-contained.
    fn store_stream_hash(&mut self, digest: [u8; 32]) -> Result<()>;

    /// Finalize the stream. No packing after this.
    fn finish(&mut self) -> Result<()>;
}

/// Unpacks encoded blocks back into interleaved samples.
pub trait Decoder {
    fn num_channels(&self) -> u32;
    fn bytes_per_sample(&self) -> u32;

    /// Decode up to `max_frames` frames into `samples`. Zero with the
    /// source at end-of-input means the stream is exhausted; zero on a
    /// live source is treated as a decode anomaly.
    fn unpack(&mut self, samples: &mut [i32], max_frames: u32) -> usize;

    /// Non-fatal errors (bad CRCs, skipped blocks) seen so far.
    fn error_count(&self) -> u64;

    /// Stream digest recovered from the trailer, when present and intact.
    fn stream_hash(&self) -> Option<[u8; 32]> {
        None
    }
}

/// A codec implementation the harness can exercise.
pub trait Codec {
    type Encoder: Encoder;
    type Decoder: Decoder;

    /// Open an encoder writing to `sink`, plus `correction_sink` when the
    /// parameters ask for a correction stream.
    fn open_encoder(
        &self,
        params: &CodecParams,
        sink: Arc<dyn BlockSink>,
        correction_sink: Option<Arc<dyn BlockSink>>,
    ) -> Result<Self::Encoder>;

    /// Open a decoder over `source`, plus `correction_source` when one is
    /// supplied. Fails if the stream header cannot be validated; the caller
    /// retries against a live stream until data runs out.
    fn open_decoder(
        &self,
        source: Arc<dyn ByteSource>,
        correction_source: Option<Arc<dyn ByteSource>>,
    ) -> Result<Self::Decoder>;
}

impl CodecParams {
    /// True when the round trip must reproduce input exactly: pure lossless,
    /// or hybrid with its correction stream applied.
    pub fn lossless(&self, ignore_correction: bool) -> bool {
        !self.hybrid || (self.correction && !ignore_correction)
    }
}
