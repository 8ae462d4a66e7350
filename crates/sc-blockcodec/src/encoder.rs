//! Encode side: frame samples into CRC-protected blocks
//!
//! No compression is attempted; samples are stored in their packed byte
//! layout. In hybrid mode the low `shift` bits of every sample go to the
//! correction stream (or are simply dropped when none is attached).

use std::sync::Arc;

use sc_harness::codec::{BlockSink, CodecParams, Encoder};
use sc_harness::pcm::{self, SampleFormat};
use sc_harness::{HarnessError, Result};

use crate::block::{
    self, CORRECTION_MAGIC, DATA_MAGIC, StreamHeader, frame_block, frame_trailer,
};

pub struct BlockEncoder {
    sink: Arc<dyn BlockSink>,
    correction: Option<Arc<dyn BlockSink>>,
    num_channels: usize,
    format: SampleFormat,
    residual_format: SampleFormat,
    /// Mask of the low bits diverted to the correction stream.
    low_mask: i32,
    finished: bool,
    scratch: Vec<i32>,
    payload: Vec<u8>,
}

impl BlockEncoder {
    pub(crate) fn new(
        params: &CodecParams,
        sink: Arc<dyn BlockSink>,
        correction: Option<Arc<dyn BlockSink>>,
    ) -> Result<Self> {
        if !(1..=4).contains(&params.bytes_per_sample) || params.num_channels == 0 {
            return Err(HarnessError::Encoder(format!(
                "unusable stream parameters: {params:?}"
            )));
        }
        if params.correction && correction.is_none() {
            return Err(HarnessError::Encoder(
                "correction stream requested but no sink attached".into(),
            ));
        }

        let shift = block::hybrid_shift(params);
        let low_mask = ((1i64 << shift) - 1) as i32;
        let residual_bytes = (shift as u8).div_ceil(8).max(1);

        let mut header = StreamHeader::from_params(params, shift, false).encode();
        if !sink.write_block(&mut header) {
            return Err(HarnessError::Encoder("sink rejected the stream header".into()));
        }
        if let Some(corr) = &correction {
            let mut header = StreamHeader::from_params(params, shift, true).encode();
            if !corr.write_block(&mut header) {
                return Err(HarnessError::Encoder(
                    "correction sink rejected the stream header".into(),
                ));
            }
        }

        log::debug!(
            "encoder open: {} ch, {} bytes/sample, shift {shift}",
            params.num_channels,
            params.bytes_per_sample
        );

        Ok(Self {
            sink,
            correction: params.correction.then_some(()).and(correction),
            num_channels: params.num_channels as usize,
            format: SampleFormat::new(params.bytes_per_sample as u8),
            residual_format: SampleFormat::new(residual_bytes).with_signed(),
            low_mask,
            finished: false,
            scratch: Vec::new(),
            payload: Vec::new(),
        })
    }

    fn emit(&mut self, samples: &[i32], frames: u32) -> bool {
        self.payload.clear();
        if self.low_mask != 0 {
            self.scratch.clear();
            self.scratch.extend(samples.iter().map(|&s| s & !self.low_mask));
            pcm::store_samples(&self.scratch, self.format, &mut self.payload);
        } else {
            pcm::store_samples(samples, self.format, &mut self.payload);
        }

        let mut framed = frame_block(DATA_MAGIC, frames, &self.payload);
        if !self.sink.write_block(&mut framed) {
            return false;
        }

        if self.low_mask != 0 {
            if let Some(corr) = &self.correction {
                self.scratch.clear();
                self.scratch.extend(samples.iter().map(|&s| s & self.low_mask));
                self.payload.clear();
                pcm::store_samples(&self.scratch, self.residual_format, &mut self.payload);

                let mut framed = frame_block(CORRECTION_MAGIC, frames, &self.payload);
                if !corr.write_block(&mut framed) {
                    return false;
                }
            }
        }

        true
    }
}

impl Encoder for BlockEncoder {
    fn pack(&mut self, samples: &[i32], frames: u32) -> bool {
        if self.finished || frames == 0 {
            return false;
        }
        let needed = frames as usize * self.num_channels;
        if samples.len() < needed {
            return false;
        }

        self.emit(&samples[..needed], frames)
    }

    fn flush(&mut self) -> Result<()> {
        // Every pack call emits immediately; nothing is buffered.
        Ok(())
    }

    fn store_stream_hash(&mut self, digest: [u8; 32]) -> Result<()> {
        let mut trailer = frame_trailer(&digest);
        if self.sink.write_block(&mut trailer) {
            Ok(())
        } else {
            Err(HarnessError::Encoder("sink rejected the trailer".into()))
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}
