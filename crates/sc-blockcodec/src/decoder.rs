//! Decode side: block parsing with CRC verification and resync
//!
//! Corrupt framing never aborts the stream. A bad CRC drops the block and
//! bumps the error count; an unrecognizable magic triggers a forward scan
//! for the next plausible block boundary. Decoding ends only when the
//! source runs dry.

use std::sync::Arc;

use sc_harness::codec::{ByteSource, Decoder};
use sc_harness::pcm::{self, SampleFormat};
use sc_harness::{HarnessError, Result};

use crate::block::{
    BLOCK_PREFIX_LEN, CORRECTION_MAGIC, DATA_MAGIC, HEADER_LEN, MAX_BLOCK_FRAMES, StreamHeader,
    TRAILER_MAGIC,
};

/// Read until `buf` is full. False means the source ended first.
fn read_exact(source: &dyn ByteSource, buf: &mut [u8]) -> bool {
    let mut filled = 0;
    while filled < buf.len() {
        let got = source.read(&mut buf[filled..]);
        if got == 0 {
            return false;
        }
        filled += got;
    }
    true
}

fn known_magic(magic: &[u8; 4]) -> bool {
    *magic == DATA_MAGIC || *magic == CORRECTION_MAGIC || *magic == TRAILER_MAGIC
}

pub struct BlockDecoder {
    source: Arc<dyn ByteSource>,
    correction: Option<Arc<dyn ByteSource>>,
    header: StreamHeader,
    format: SampleFormat,
    residual_format: SampleFormat,
    /// Decoded samples not yet handed out.
    pending: Vec<i32>,
    cursor: usize,
    residuals: Vec<i32>,
    payload: Vec<u8>,
    errors: u64,
    hash: Option<[u8; 32]>,
    ended: bool,
}

impl BlockDecoder {
    pub(crate) fn new(
        source: Arc<dyn ByteSource>,
        correction: Option<Arc<dyn ByteSource>>,
    ) -> Result<Self> {
        let mut bytes = [0u8; HEADER_LEN];
        if !read_exact(&*source, &mut bytes) {
            return Err(HarnessError::Decoder("stream ended inside the header".into()));
        }
        let header = StreamHeader::decode(&bytes)?;
        if header.is_correction {
            return Err(HarnessError::Decoder(
                "correction stream supplied as the primary stream".into(),
            ));
        }

        // A correction header disagreeing with the primary cannot be merged
        // safely; refuse to open rather than apply residuals wrongly.
        if let Some(corr) = &correction {
            let mut bytes = [0u8; HEADER_LEN];
            if !read_exact(&**corr, &mut bytes) {
                return Err(HarnessError::Decoder(
                    "correction stream ended inside the header".into(),
                ));
            }
            let corr_header = StreamHeader::decode(&bytes)?;
            if !corr_header.is_correction || corr_header.shift != header.shift {
                return Err(HarnessError::Decoder(format!(
                    "correction header disagrees with the primary: {corr_header:?}"
                )));
            }
        }

        log::debug!(
            "decoder open: {} ch, {} bytes/sample, shift {}",
            header.num_channels,
            header.bytes_per_sample,
            header.shift
        );

        let format = SampleFormat::new(header.bytes_per_sample);
        // Signed storage with masking on merge: a residual filling its whole
        // stored width would not survive the unsigned bias round trip.
        let residual_format = SampleFormat::new(header.shift.div_ceil(8).max(1)).with_signed();

        Ok(Self {
            source,
            correction,
            header,
            format,
            residual_format,
            pending: Vec::new(),
            cursor: 0,
            residuals: Vec::new(),
            payload: Vec::new(),
            errors: 0,
            hash: None,
            ended: false,
        })
    }

    /// Next recognizable block magic, scanning past garbage if needed.
    fn next_magic(&mut self) -> Option<[u8; 4]> {
        let mut magic = [0u8; 4];
        if !read_exact(&*self.source, &mut magic) {
            return None;
        }
        if known_magic(&magic) {
            return Some(magic);
        }

        self.errors += 1;
        loop {
            let mut byte = [0u8; 1];
            loop {
                if !read_exact(&*self.source, &mut byte) {
                    return None;
                }
                if byte[0] == b'S' {
                    break;
                }
            }

            let mut rest = [0u8; 3];
            if !read_exact(&*self.source, &mut rest) {
                return None;
            }
            let candidate = [b'S', rest[0], rest[1], rest[2]];
            if known_magic(&candidate) {
                return Some(candidate);
            }
            // The discarded tail byte may itself open a magic.
            self.source.push_back(rest[2]);
        }
    }

    /// Pull one correction block in step with the primary stream. Any
    /// anomaly permanently detaches the correction stream.
    fn read_residuals(&mut self, expected_frames: u32) -> bool {
        let Some(corr) = self.correction.clone() else {
            return false;
        };
        let chans = self.header.num_channels as usize;
        let sample_bytes = self.residual_format.bytes_per_sample as usize;

        let mut prefix = [0u8; BLOCK_PREFIX_LEN];
        let ok = read_exact(&*corr, &mut prefix)
            && prefix[..4] == CORRECTION_MAGIC
            && u32::from_le_bytes(prefix[4..8].try_into().unwrap_or_default()) == expected_frames;

        let len = u32::from_le_bytes(prefix[8..12].try_into().unwrap_or_default()) as usize;
        let crc = u32::from_le_bytes(prefix[12..16].try_into().unwrap_or_default());

        if !ok || len != expected_frames as usize * chans * sample_bytes {
            self.errors += 1;
            self.correction = None;
            return false;
        }

        self.payload.resize(len, 0);
        if !read_exact(&*corr, &mut self.payload) || crc32fast::hash(&self.payload) != crc {
            self.errors += 1;
            self.correction = None;
            return false;
        }

        self.residuals.clear();
        pcm::load_samples(&self.payload, self.residual_format, &mut self.residuals);
        true
    }

    /// Decode the next data block into `pending`. False means end of stream.
    fn read_block(&mut self) -> bool {
        let chans = self.header.num_channels as usize;
        let sample_bytes = self.header.bytes_per_sample as usize;

        loop {
            let Some(magic) = self.next_magic() else {
                self.ended = true;
                return false;
            };

            match magic {
                TRAILER_MAGIC => {
                    let mut digest = [0u8; 32];
                    if read_exact(&*self.source, &mut digest) {
                        self.hash = Some(digest);
                    } else {
                        self.errors += 1;
                        self.ended = true;
                        return false;
                    }
                }
                CORRECTION_MAGIC => {
                    // Correction framing does not belong on this stream.
                    self.errors += 1;
                }
                _ => {
                    let mut prefix = [0u8; BLOCK_PREFIX_LEN - 4];
                    if !read_exact(&*self.source, &mut prefix) {
                        self.errors += 1;
                        self.ended = true;
                        return false;
                    }
                    let frames = u32::from_le_bytes(prefix[0..4].try_into().unwrap_or_default());
                    let len =
                        u32::from_le_bytes(prefix[4..8].try_into().unwrap_or_default()) as usize;
                    let crc = u32::from_le_bytes(prefix[8..12].try_into().unwrap_or_default());

                    if frames == 0
                        || frames > MAX_BLOCK_FRAMES
                        || len != frames as usize * chans * sample_bytes
                    {
                        self.errors += 1;
                        continue;
                    }

                    self.payload.resize(len, 0);
                    if !read_exact(&*self.source, &mut self.payload) {
                        self.errors += 1;
                        self.ended = true;
                        return false;
                    }

                    if crc32fast::hash(&self.payload) != crc {
                        self.errors += 1;
                        // Keep the correction stream in step even for a
                        // block we cannot use.
                        if self.header.shift > 0 {
                            self.read_residuals(frames);
                        }
                        continue;
                    }

                    self.pending.clear();
                    self.cursor = 0;
                    pcm::load_samples(&self.payload, self.format, &mut self.pending);

                    if self.header.shift > 0
                        && self.read_residuals(frames)
                        && self.residuals.len() == self.pending.len()
                    {
                        // Mask off the sign extension a full-width residual
                        // picks up during loading.
                        let low_mask = ((1i64 << self.header.shift) - 1) as i32;
                        for (sample, residual) in
                            self.pending.iter_mut().zip(self.residuals.iter())
                        {
                            *sample |= residual & low_mask;
                        }
                    }

                    return true;
                }
            }
        }
    }
}

impl Decoder for BlockDecoder {
    fn num_channels(&self) -> u32 {
        self.header.num_channels as u32
    }

    fn bytes_per_sample(&self) -> u32 {
        self.header.bytes_per_sample as u32
    }

    fn unpack(&mut self, samples: &mut [i32], max_frames: u32) -> usize {
        let chans = self.header.num_channels as usize;
        let want = (max_frames as usize).min(samples.len() / chans) * chans;
        let mut filled = 0;

        while filled < want {
            if self.cursor == self.pending.len() {
                if self.ended || !self.read_block() {
                    break;
                }
            }

            let take = (want - filled).min(self.pending.len() - self.cursor);
            samples[filled..filled + take]
                .copy_from_slice(&self.pending[self.cursor..self.cursor + take]);
            self.cursor += take;
            filled += take;
        }

        filled / chans
    }

    fn error_count(&self) -> u64 {
        self.errors
    }

    fn stream_hash(&self) -> Option<[u8; 32]> {
        self.hash
    }
}
