//! # sc-blockcodec
//!
//! A deliberately simple framed block codec implementing the sc-harness
//! collaborator contracts: packed samples in CRC-32 protected blocks, a
//! lossy hybrid mode that diverts low sample bits to a correction stream,
//! and a trailer carrying the content digest. It does no compression; its
//! job is to be a transparent, fully verifiable codec for exercising the
//! harness itself.

pub mod block;
pub mod decoder;
pub mod encoder;

pub use decoder::BlockDecoder;
pub use encoder::BlockEncoder;

use std::sync::Arc;

use sc_harness::codec::{BlockSink, ByteSource, Codec, CodecParams};
use sc_harness::{HarnessError, Result};
use thiserror::Error;

/// Wire-level parse failures.
#[derive(Error, Debug)]
pub enum BlockCodecError {
    #[error("unrecognized stream magic")]
    BadMagic,

    #[error("unsupported wire version {0}")]
    BadVersion(u8),

    #[error("malformed header: {0}")]
    BadHeader(String),

    #[error("stream truncated")]
    Truncated,
}

impl From<BlockCodecError> for HarnessError {
    fn from(err: BlockCodecError) -> Self {
        HarnessError::Decoder(err.to_string())
    }
}

/// The codec handle; stateless, all state lives in the open streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCodec;

impl BlockCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for BlockCodec {
    type Encoder = BlockEncoder;
    type Decoder = BlockDecoder;

    fn open_encoder(
        &self,
        params: &CodecParams,
        sink: Arc<dyn BlockSink>,
        correction_sink: Option<Arc<dyn BlockSink>>,
    ) -> Result<Self::Encoder> {
        BlockEncoder::new(params, sink, correction_sink)
    }

    fn open_decoder(
        &self,
        source: Arc<dyn ByteSource>,
        correction_source: Option<Arc<dyn ByteSource>>,
    ) -> Result<Self::Decoder> {
        BlockDecoder::new(source, correction_source)
    }
}
