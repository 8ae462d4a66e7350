//! Wire format: framed blocks with CRC-32 integrity
//!
//! A stream is one header, any number of data blocks, and a trailer carrying
//! the uncompressed content digest. A hybrid stream's correction companion
//! uses the same framing with its own magics. All integers are little-endian.
//!
//! ```text
//! header:  "SCS1" version flags bytes bits chans:u16 mask:u32 rate:u32 shift
//! data:    "SCB1" frames:u32 payload_len:u32 crc32:u32 payload
//! trailer: "SCT1" digest[32]
//! ```

use sc_harness::CodecParams;

use crate::BlockCodecError;

pub const STREAM_MAGIC: [u8; 4] = *b"SCS1";
pub const DATA_MAGIC: [u8; 4] = *b"SCB1";
pub const CORRECTION_MAGIC: [u8; 4] = *b"SCC1";
pub const TRAILER_MAGIC: [u8; 4] = *b"SCT1";

pub const WIRE_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 19;
pub const BLOCK_PREFIX_LEN: usize = 16;

/// Refuse blocks claiming more frames than any sane encoder emits.
pub const MAX_BLOCK_FRAMES: u32 = 65536;

const FLAG_FLOAT: u8 = 0x01;
const FLAG_HYBRID: u8 = 0x02;
const FLAG_HAS_CORRECTION: u8 = 0x04;
const FLAG_IS_CORRECTION: u8 = 0x08;

/// Parsed stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub float_data: bool,
    pub hybrid: bool,
    pub has_correction: bool,
    pub is_correction: bool,
    pub bytes_per_sample: u8,
    pub bits_per_sample: u8,
    pub num_channels: u16,
    pub channel_mask: u32,
    pub sample_rate: u32,
    /// Low bits dropped from each stored sample in hybrid mode.
    pub shift: u8,
}

impl StreamHeader {
    pub fn from_params(params: &CodecParams, shift: u8, is_correction: bool) -> Self {
        Self {
            float_data: params.float_data,
            hybrid: params.hybrid,
            has_correction: params.correction,
            is_correction,
            bytes_per_sample: params.bytes_per_sample as u8,
            bits_per_sample: params.bits_per_sample as u8,
            num_channels: params.num_channels as u16,
            channel_mask: params.channel_mask,
            sample_rate: params.sample_rate,
            shift,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.float_data {
            flags |= FLAG_FLOAT;
        }
        if self.hybrid {
            flags |= FLAG_HYBRID;
        }
        if self.has_correction {
            flags |= FLAG_HAS_CORRECTION;
        }
        if self.is_correction {
            flags |= FLAG_IS_CORRECTION;
        }

        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&STREAM_MAGIC);
        out.push(WIRE_VERSION);
        out.push(flags);
        out.push(self.bytes_per_sample);
        out.push(self.bits_per_sample);
        out.extend_from_slice(&self.num_channels.to_le_bytes());
        out.extend_from_slice(&self.channel_mask.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.push(self.shift);
        out
    }

    /// Parse and sanity-check a header, magic included.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlockCodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(BlockCodecError::Truncated);
        }
        if bytes[..4] != STREAM_MAGIC {
            return Err(BlockCodecError::BadMagic);
        }
        if bytes[4] != WIRE_VERSION {
            return Err(BlockCodecError::BadVersion(bytes[4]));
        }

        let flags = bytes[5];
        let header = Self {
            float_data: flags & FLAG_FLOAT != 0,
            hybrid: flags & FLAG_HYBRID != 0,
            has_correction: flags & FLAG_HAS_CORRECTION != 0,
            is_correction: flags & FLAG_IS_CORRECTION != 0,
            bytes_per_sample: bytes[6],
            bits_per_sample: bytes[7],
            num_channels: u16::from_le_bytes([bytes[8], bytes[9]]),
            channel_mask: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
            sample_rate: u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]),
            shift: bytes[18],
        };

        if !(1..=4).contains(&header.bytes_per_sample)
            || header.bits_per_sample == 0
            || header.bits_per_sample > 32
            || header.num_channels == 0
            || header.shift as u32 >= header.bytes_per_sample as u32 * 8
        {
            return Err(BlockCodecError::BadHeader(format!(
                "implausible header fields: {header:?}"
            )));
        }

        Ok(header)
    }
}

/// Number of low bits dropped from each stored sample to approximate the
/// requested hybrid bitrate, in the canonical (left-justified) sample
/// domain. Zero when the stream is not hybrid.
pub fn hybrid_shift(params: &CodecParams) -> u8 {
    if !params.hybrid {
        return 0;
    }

    let depth = params.bits_per_sample as i64;
    let kept = params.bitrate.round() as i64;
    // Not clamp(): a 1-bit stream would invert the bounds and panic.
    let dropped = (depth - kept).max(1).min((depth - 1).max(1));

    // Integer depths below whole bytes are stored left-justified, so the
    // dropped-bit region moves up accordingly.
    let justify = if params.float_data {
        0
    } else {
        (8 - (params.bits_per_sample as i64 & 7)) & 7
    };

    (dropped + justify).min(params.bytes_per_sample as i64 * 8 - 1) as u8
}

/// Frame a payload as a data or correction block.
pub fn frame_block(magic: [u8; 4], frames: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_PREFIX_LEN + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&frames.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Frame the content-digest trailer.
pub fn frame_trailer(digest: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32);
    out.extend_from_slice(&TRAILER_MAGIC);
    out.extend_from_slice(digest);
    out
}
