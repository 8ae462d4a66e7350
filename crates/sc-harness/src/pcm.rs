//! Sample (de)serialization between canonical 32-bit integers and packed
//! byte buffers
//!
//! The adapter is applied symmetrically: on the encode side it produces the
//! exact bytes the codec is expected to reproduce (which is what gets
//! hashed as the reference digest), and on the decode side it normalizes
//! decoded samples into the same layout before hashing. The float helpers
//! quantize normalized samples into the integer domain at a target bit
//! depth.

use serde::{Deserialize, Serialize};

use crate::prng::Prng;

/// Byte layout of packed samples: 1-4 bytes per sample, either endianness,
/// signed or unsigned. Byte-sized samples default to unsigned and wider
/// samples to signed (WAV conventions), both overridable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    pub bytes_per_sample: u8,
    pub big_endian: bool,
    pub force_unsigned: bool,
    pub force_signed: bool,
}

impl SampleFormat {
    /// Default layout for the given width: little-endian, unsigned for
    /// byte-sized samples, signed otherwise.
    pub fn new(bytes_per_sample: u8) -> Self {
        debug_assert!((1..=4).contains(&bytes_per_sample));
        Self {
            bytes_per_sample,
            big_endian: false,
            force_unsigned: false,
            force_signed: false,
        }
    }

    pub fn with_big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn with_unsigned(mut self) -> Self {
        self.force_unsigned = true;
        self
    }

    pub fn with_signed(mut self) -> Self {
        self.force_signed = true;
        self
    }

    /// Whether values are stored biased by half the representable range.
    pub fn is_unsigned(&self) -> bool {
        self.force_unsigned || (self.bytes_per_sample == 1 && !self.force_signed)
    }

    fn bias(&self) -> u32 {
        if self.is_unsigned() {
            1u32 << (self.bytes_per_sample * 8 - 1)
        } else {
            0
        }
    }
}

/// Pack canonical 32-bit samples into `dst` using the given layout: the low
/// N bytes of the bias-adjusted value, in the chosen byte order.
pub fn store_samples(src: &[i32], format: SampleFormat, dst: &mut Vec<u8>) {
    let n = format.bytes_per_sample as usize;
    let bias = format.bias();
    dst.reserve(src.len() * n);

    for &sample in src {
        let value = (sample as u32).wrapping_add(bias);
        if format.big_endian {
            dst.extend_from_slice(&value.to_be_bytes()[4 - n..]);
        } else {
            dst.extend_from_slice(&value.to_le_bytes()[..n]);
        }
    }
}

/// Unpack bytes laid out by [`store_samples`] back into canonical 32-bit
/// samples: bias removal for unsigned layouts, sign extension for signed.
/// Trailing bytes that don't fill a whole sample are ignored.
pub fn load_samples(src: &[u8], format: SampleFormat, dst: &mut Vec<i32>) {
    let n = format.bytes_per_sample as usize;
    let bias = format.bias();
    let shift = 32 - 8 * n as u32;
    dst.reserve(src.len() / n);

    for chunk in src.chunks_exact(n) {
        let mut raw = [0u8; 4];
        if format.big_endian {
            raw[4 - n..].copy_from_slice(chunk);
        } else {
            raw[..n].copy_from_slice(chunk);
        }
        let value = if format.big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };

        let sample = if format.is_unsigned() {
            value.wrapping_sub(bias) as i32
        } else {
            // Sign-extend from the stored width.
            ((value << shift) as i32) >> shift
        };
        dst.push(sample);
    }
}

fn clamp_to_depth(sample: f32, scalar: f64, imin: i32, imax: i32) -> i32 {
    if sample >= 1.0 {
        imax
    } else if sample <= -1.0 {
        imin
    } else {
        (sample as f64 * scalar).floor() as i32
    }
}

/// Quantize normalized floats to `bits` of precision and rescale back into
/// the float domain, saturating at +/-1.0. Valid for depths up to 25 bits
/// (the f32 mantissa limit).
pub fn truncate_floats(samples: &mut [f32], bits: u32) {
    debug_assert!((1..=25).contains(&bits));
    let imax = (1i32 << (bits - 1)) - 1;
    let imin = -(1i32 << (bits - 1));
    let scalar = (1i64 << (bits - 1)) as f64;

    for sample in samples {
        let isample = clamp_to_depth(*sample, scalar, imin, imax);
        *sample = (isample as f64 / scalar) as f32;
    }
}

/// Quantize normalized floats to `bits`-deep integers (depths below 32),
/// left-justifying sub-byte depths into whole bytes.
pub fn quantize(src: &[f32], bits: u32, dst: &mut [i32]) {
    debug_assert!((1..32).contains(&bits));
    let imax = (1i32 << (bits - 1)) - 1;
    let imin = -(1i32 << (bits - 1));
    let scalar = (1i64 << (bits - 1)) as f64;
    let ishift = (8 - (bits & 0x7)) & 0x7;

    for (dst, &sample) in dst.iter_mut().zip(src) {
        let isample = clamp_to_depth(sample, scalar, imin, imax);
        *dst = ((isample as u32) << ishift) as i32;
    }
}

/// Quantize normalized floats to full 32-bit integers, back-filling trailing
/// zero bits of each value with random bits. This deliberately produces
/// pathological full-precision integer data that stresses a codec's
/// int/float boundary handling; it is not a general rounding rule.
pub fn quantize32(src: &[f32], prng: &mut Prng, dst: &mut [i32]) {
    const SCALAR: f64 = 2147483648.0;

    for (dst, &sample) in dst.iter_mut().zip(src) {
        let mut isample = clamp_to_depth(sample, SCALAR, i32::MIN, i32::MAX);

        if isample != 0 && isample & 1 == 0 {
            let tzeros = isample.trailing_zeros();
            isample >>= tzeros;
            for _ in 0..tzeros {
                isample = (isample << 1) | (prng.uniform() > 0.5) as i32;
            }
        }

        *dst = isample;
    }
}

/// Reinterpret float samples as their IEEE-754 bit patterns, for modes where
/// the codec consumes float data through the integer sample interface.
pub fn floats_to_bits(src: &[f32], dst: &mut [i32]) {
    for (dst, &sample) in dst.iter_mut().zip(src) {
        *dst = sample.to_bits() as i32;
    }
}
