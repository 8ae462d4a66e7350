//! Test-case orchestration
//!
//! [`run_case`] wires one full round trip together: synthesize deterministic
//! audio on the calling thread, push encoded blocks through a bounded
//! streaming channel (optionally with fault injection), and decode
//! concurrently on a scoped worker thread. Verification compares frame
//! counts and SHA-256 digests of the canonical stored form on both sides.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::channel::{ChannelStats, StreamChannel};
use crate::codec::{BlockSink, ByteSource, Codec, CodecParams, Decoder, Encoder};
use crate::fuzz::FaultInjector;
use crate::pcm::{self, SampleFormat};
use crate::prng::{self, DEFAULT_SEED};
use crate::synth::{SpatialSweep, channel_layout, generator_bank, mix_into};
use crate::{HarnessError, Result};

/// Nominal rate of the synthesized material.
pub const SAMPLE_RATE: u32 = 44100;
/// Frames handed to the encoder per pack call.
pub const ENCODE_FRAMES: usize = 128;
/// Frames requested from the decoder per unpack call.
pub const DECODE_FRAMES: usize = 1000;
/// Ring capacity of the streaming channels, in bytes.
pub const CHANNEL_CAPACITY: usize = 1_000_000;

/// Everything that defines one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseConfig {
    pub label: String,
    pub seed: u64,
    pub seconds: u32,
    pub bits_per_sample: u32,
    pub num_channels: u32,
    /// Synthesize floats and keep them as floats on the wire.
    pub float_data: bool,
    /// Synthesize floats but present their bit patterns as 32-bit integers.
    pub store_float_as_int32: bool,
    /// Quantize to 32-bit integers but flag the stream as float.
    pub store_int32_as_float: bool,
    pub hybrid: bool,
    pub bitrate: f32,
    pub correction: bool,
    /// Leave the correction stream unread, making a hybrid case lossy.
    pub ignore_correction: bool,
    /// Fault-injection period in encoded bytes per expected hit.
    pub fuzz_period: Option<u32>,
    /// False runs the encode side only; all writes are discarded.
    pub decode: bool,
    /// Mirror the primary stream verbatim to this file (and the correction
    /// stream, if any, to the same path with "c" appended).
    pub capture_path: Option<PathBuf>,
}

impl CaseConfig {
    /// A plain lossless integer case at the given depth and channel count.
    pub fn lossless(bits_per_sample: u32, num_channels: u32) -> Self {
        Self {
            label: format!("lossless {bits_per_sample}-bit {num_channels}ch"),
            seed: DEFAULT_SEED,
            seconds: 5,
            bits_per_sample,
            num_channels,
            float_data: false,
            store_float_as_int32: false,
            store_int32_as_float: false,
            hybrid: false,
            bitrate: 0.0,
            correction: false,
            ignore_correction: false,
            fuzz_period: None,
            decode: true,
            capture_path: None,
        }
    }

    /// A hybrid (lossy primary stream) case at roughly `bitrate` bits per
    /// sample, without a correction stream.
    pub fn hybrid(bits_per_sample: u32, num_channels: u32, bitrate: f32) -> Self {
        let mut config = Self::lossless(bits_per_sample, num_channels);
        config.label = format!("hybrid {bits_per_sample}-bit {num_channels}ch @{bitrate}bps");
        config.hybrid = true;
        config.bitrate = bitrate;
        config
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_seconds(mut self, seconds: u32) -> Self {
        self.seconds = seconds;
        self
    }

    pub fn with_float_data(mut self) -> Self {
        self.float_data = true;
        self
    }

    pub fn with_store_float_as_int32(mut self) -> Self {
        self.store_float_as_int32 = true;
        self
    }

    pub fn with_store_int32_as_float(mut self) -> Self {
        self.store_int32_as_float = true;
        self
    }

    /// Add a correction stream to a hybrid case, restoring losslessness
    /// unless `ignore` leaves it unread on the decode side.
    pub fn with_correction(mut self, ignore: bool) -> Self {
        self.correction = true;
        self.ignore_correction = ignore;
        self
    }

    pub fn with_fuzz(mut self, period: u32) -> Self {
        self.fuzz_period = Some(period);
        self
    }

    pub fn encode_only(mut self) -> Self {
        self.decode = false;
        self
    }

    pub fn with_capture(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_path = Some(path.into());
        self
    }

    /// Bytes each stored sample occupies on the wire.
    pub fn bytes_per_sample(&self) -> u32 {
        if self.float_data || self.store_float_as_int32 || self.store_int32_as_float {
            4
        } else {
            self.bits_per_sample.div_ceil(8)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.seconds == 0 {
            return Err(HarnessError::InvalidConfig("duration must be nonzero".into()));
        }
        if self.bits_per_sample == 0 || self.bits_per_sample > 32 {
            return Err(HarnessError::InvalidConfig(format!(
                "bits per sample out of range: {}",
                self.bits_per_sample
            )));
        }
        if self.float_data && self.bits_per_sample > 25 && self.bits_per_sample != 32 {
            return Err(HarnessError::InvalidConfig(
                "float truncation supports 1-25 significant bits (or 32 for none)".into(),
            ));
        }
        if (self.store_float_as_int32 || self.store_int32_as_float) && self.bits_per_sample != 32 {
            return Err(HarnessError::InvalidConfig(
                "32-bit reinterpretation modes require 32 bits per sample".into(),
            ));
        }
        if self.store_float_as_int32 && self.store_int32_as_float {
            return Err(HarnessError::InvalidConfig(
                "conflicting sample reinterpretation modes".into(),
            ));
        }
        if self.correction && !self.hybrid {
            return Err(HarnessError::InvalidConfig(
                "correction stream requires hybrid mode".into(),
            ));
        }
        if self.hybrid && !(self.bitrate > 0.0) {
            return Err(HarnessError::InvalidConfig(
                "hybrid mode requires a positive bitrate".into(),
            ));
        }
        if self.hybrid && self.bits_per_sample < 2 {
            return Err(HarnessError::InvalidConfig(
                "hybrid mode needs at least 2 bits per sample to split".into(),
            ));
        }
        if let Some(period) = self.fuzz_period {
            if FaultInjector::new(period).is_none() {
                return Err(HarnessError::InvalidConfig(format!(
                    "fuzz period out of range: {period}"
                )));
            }
        }
        // Rejects unsupported channel counts.
        channel_layout(self.num_channels as usize)?;
        Ok(())
    }

    fn codec_params(&self, channel_mask: u32) -> CodecParams {
        CodecParams {
            sample_rate: SAMPLE_RATE,
            num_channels: self.num_channels,
            channel_mask,
            bytes_per_sample: self.bytes_per_sample(),
            bits_per_sample: if self.store_float_as_int32 || self.store_int32_as_float {
                32
            } else {
                self.bits_per_sample
            },
            float_data: self.float_data || self.store_int32_as_float,
            hybrid: self.hybrid,
            correction: self.correction,
            bitrate: self.bitrate,
        }
    }
}

/// What one finished case looked like.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub label: String,
    pub passed: bool,
    pub failure: Option<String>,
    pub frames_generated: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub fuzz_hits: u64,
    pub hash_match: bool,
    /// Hex digest of the canonical bytes fed to the encoder.
    pub stream_digest: String,
    /// Hex digest of the decoded output, when a decode side ran.
    pub decoded_digest: Option<String>,
    pub source_bytes: u64,
    pub encoded_bytes: u64,
    /// Encoded size over source size.
    pub ratio: f64,
    /// Encoded bits per sample across all streams.
    pub stream_bps: f64,
    pub primary: ChannelStats,
    pub correction: Option<ChannelStats>,
    pub elapsed_ms: u64,
}

impl CaseOutcome {
    /// Convert a failed outcome into an error, keeping a passing one intact.
    pub fn into_result(self) -> Result<Self> {
        match &self.failure {
            Some(reason) => Err(HarnessError::Verification(format!(
                "{}: {reason}",
                self.label
            ))),
            None => Ok(self),
        }
    }
}

struct DecodeResult {
    frames: u64,
    errors: u64,
    digest: [u8; 32],
    trailer_hash: Option<[u8; 32]>,
}

fn decode_stream<C: Codec>(
    codec: &C,
    source: Arc<StreamChannel>,
    correction: Option<Arc<StreamChannel>>,
    format: SampleFormat,
    expected_channels: u32,
) -> DecodeResult {
    let mut errors = 0u64;

    // A fuzzed stream can destroy the header of the first block; keep trying
    // to open until it works or the stream runs dry. Each failed attempt
    // consumes at least one byte, so this terminates.
    let mut decoder = loop {
        let byte_source: Arc<dyn ByteSource> = source.clone();
        let corr_source = correction
            .clone()
            .map(|chan| -> Arc<dyn ByteSource> { chan });

        match codec.open_decoder(byte_source, corr_source) {
            Ok(decoder) => break Some(decoder),
            Err(err) => {
                errors += 1;
                log::debug!("decoder open failed, resyncing: {err}");
                if source.is_done() {
                    break None;
                }
            }
        }
    };

    let mut frames = 0u64;
    let mut hasher = Sha256::new();
    let mut trailer_hash = None;

    if let Some(decoder) = decoder.as_mut() {
        if decoder.num_channels() != expected_channels {
            errors += 1;
        }

        let chans = expected_channels as usize;
        let mut samples = vec![0i32; DECODE_FRAMES * chans];
        let mut stored = Vec::with_capacity(DECODE_FRAMES * chans * 4);

        loop {
            let got = decoder.unpack(&mut samples, DECODE_FRAMES as u32);
            if got == 0 {
                if source.is_done() {
                    break;
                }
                // Zero frames off a live stream means the decoder stalled;
                // count the anomaly and keep pulling.
                errors += 1;
                continue;
            }
            frames += got as u64;

            stored.clear();
            pcm::store_samples(&samples[..got * chans], format, &mut stored);
            hasher.update(&stored);
        }

        errors += decoder.error_count();
        trailer_hash = decoder.stream_hash();
    }

    DecodeResult {
        frames,
        errors,
        digest: hasher.finalize().into(),
        trailer_hash,
    }
}

fn finish_encoder<E: Encoder>(encoder: &mut E, digest: [u8; 32]) -> Result<()> {
    encoder.flush()?;
    encoder.store_stream_hash(digest)?;
    encoder.finish()
}

/// Run one case end to end and report what happened. Verification failures
/// land in the returned outcome, not in `Err`; only setup problems (bad
/// config, unopenable encoder, file I/O) error out.
pub fn run_case<C: Codec + Sync>(codec: &C, config: &CaseConfig) -> Result<CaseOutcome> {
    config.validate()?;
    let started = Instant::now();

    let chans = config.num_channels as usize;
    let (mut mixes, channel_mask) = channel_layout(chans)?;
    let params = config.codec_params(channel_mask);
    let format = SampleFormat::new(config.bytes_per_sample() as u8);

    log::info!("case start: {}", config.label);

    let prng = prng::shared(config.seed);

    // Validated above.
    let injector = match config.fuzz_period {
        Some(period) => Some(
            FaultInjector::new(period)
                .ok_or_else(|| HarnessError::InvalidConfig("fuzz period".into()))?,
        ),
        None => None,
    };

    // A zero-capacity channel swallows writes, which is exactly what an
    // encode-only run (or an ignored correction stream) needs. Fault
    // injection covers both streams, fed by the one shared generator.
    let make_channel = |capacity: usize| match (config.decode, injector) {
        (true, Some(injector)) => StreamChannel::with_fuzz(capacity, injector, prng.clone()),
        _ => StreamChannel::new(capacity),
    };

    let primary = Arc::new(make_channel(if config.decode { CHANNEL_CAPACITY } else { 0 }));

    let read_correction = config.correction && config.decode && !config.ignore_correction;
    let correction = config.correction.then(|| {
        Arc::new(make_channel(if read_correction { CHANNEL_CAPACITY } else { 0 }))
    });

    if let Some(path) = &config.capture_path {
        primary.set_capture(std::fs::File::create(path)?);
        // The correction stream mirrors to a companion file named by
        // appending "c" to the capture path.
        if let Some(corr) = &correction {
            let mut companion = path.clone().into_os_string();
            companion.push("c");
            corr.set_capture(std::fs::File::create(companion)?);
        }
    }

    let mut encoder = codec.open_encoder(
        &params,
        primary.clone() as Arc<dyn BlockSink>,
        correction.clone().map(|chan| chan as Arc<dyn BlockSink>),
    )?;

    let mut sweep = SpatialSweep::default();
    let mut generators = generator_bank(SAMPLE_RATE);
    let total_frames = config.seconds as u64 * SAMPLE_RATE as u64;

    let mut mono = vec![0.0f32; ENCODE_FRAMES];
    let mut float_block = vec![0.0f32; ENCODE_FRAMES * chans];
    let mut int_block = vec![0i32; ENCODE_FRAMES * chans];
    let mut stored = Vec::with_capacity(ENCODE_FRAMES * chans * 4);

    let mut hasher = Sha256::new();
    let mut frames_generated = 0u64;
    let mut frames_this_second = 0u64;
    let mut encode_failure: Option<String> = None;

    type ScopeResult = ([u8; 32], Option<DecodeResult>);
    let (produced_digest, decode_result) = std::thread::scope(|scope| -> Result<ScopeResult> {
        let consumer = config.decode.then(|| {
            let source = primary.clone();
            let corr = read_correction
                .then(|| correction.clone())
                .flatten();
            scope.spawn(move || {
                decode_stream(codec, source, corr, format, config.num_channels)
            })
        });

        while frames_generated < total_frames {
            {
                // Synthesis and fault injection share one generator, so the
                // guard must drop before pack reaches the fuzzing sink.
                let mut rng = prng.lock();

                // Gains for this frame come from the current sweep position;
                // the angle advances once the frame is mixed. The zeroed gain
                // history makes the very first frame fade in from silence.
                sweep.compute_gains(&mut mixes);

                float_block.fill(0.0);
                for (index, generator) in generators.iter_mut().enumerate() {
                    generator.run(&mut rng, &mut mono);
                    for (channel, mix) in mixes.iter().enumerate() {
                        if mix.takes_generator(index) {
                            mix_into(
                                &mut float_block,
                                &mono,
                                channel,
                                chans,
                                mix.gain_hist[index],
                                mix.gain[index],
                            );
                        }
                    }
                }
                for mix in mixes.iter_mut() {
                    mix.latch_gains();
                }
                sweep.advance_frame(ENCODE_FRAMES, SAMPLE_RATE);

                if config.float_data || config.store_float_as_int32 {
                    if config.bits_per_sample < 32 {
                        pcm::truncate_floats(&mut float_block, config.bits_per_sample);
                    }
                    pcm::floats_to_bits(&float_block, &mut int_block);
                } else if config.bits_per_sample == 32 {
                    pcm::quantize32(&float_block, &mut rng, &mut int_block);
                } else {
                    pcm::quantize(&float_block, config.bits_per_sample, &mut int_block);
                }
            }

            stored.clear();
            pcm::store_samples(&int_block, format, &mut stored);
            hasher.update(&stored);

            if !encoder.pack(&int_block, ENCODE_FRAMES as u32) {
                encode_failure = Some("encoder rejected a block".into());
                break;
            }

            frames_generated += ENCODE_FRAMES as u64;
            frames_this_second += ENCODE_FRAMES as u64;
            if frames_this_second >= SAMPLE_RATE as u64 {
                frames_this_second -= SAMPLE_RATE as u64;
                sweep.tick_second();
            }
        }

        let digest: [u8; 32] = hasher.finalize_reset().into();

        if encode_failure.is_none() {
            if let Err(err) = finish_encoder(&mut encoder, digest) {
                encode_failure = Some(format!("encoder finish failed: {err}"));
            }
        }

        primary.signal_end();
        if let Some(corr) = &correction {
            corr.signal_end();
        }

        let result = match consumer {
            Some(handle) => Some(handle.join().map_err(|_| {
                HarnessError::Decoder("decode thread panicked".into())
            })?),
            None => None,
        };

        Ok((digest, result))
    })?;

    let primary_stats = primary.stats();
    let correction_stats = correction.as_ref().map(|chan| chan.stats());
    let fuzz_hits =
        primary_stats.fuzz_hits + correction_stats.map_or(0, |stats| stats.fuzz_hits);
    primary.release();
    if let Some(corr) = &correction {
        corr.release();
    }

    let source_bytes =
        frames_generated * config.num_channels as u64 * config.bytes_per_sample() as u64;
    let encoded_bytes = primary_stats.bytes_written
        + correction_stats.map_or(0, |stats| stats.bytes_written);
    let total_samples = frames_generated * config.num_channels as u64;

    let lossless = params.lossless(config.ignore_correction);
    let fuzz_active = config.fuzz_period.is_some();

    let mut failure = encode_failure;
    let mut frames_decoded = 0;
    let mut decode_errors = 0;
    let mut hash_match = true;
    let mut decoded_digest = None;

    if let Some(decoded) = decode_result {
        frames_decoded = decoded.frames;
        decode_errors = decoded.errors;
        hash_match = decoded.digest == produced_digest;
        decoded_digest = Some(hex::encode(decoded.digest));

        // The trailer carries the encode-side digest; on a clean lossless
        // stream it must have survived transport intact.
        if let Some(trailer) = decoded.trailer_hash {
            if lossless && !fuzz_active && trailer != produced_digest {
                decode_errors += 1;
            }
        }

        if failure.is_none() {
            let count_ok = frames_decoded == frames_generated;
            let content_ok = !lossless || hash_match;

            if fuzz_active {
                // Corruption is allowed to damage the stream, but never
                // silently: wrong output with zero reported errors means the
                // codec failed to detect it.
                if decode_errors == 0 && !(count_ok && content_ok) {
                    failure = Some(format!(
                        "undetected corruption: {frames_decoded}/{frames_generated} frames, \
                         hash match {hash_match}"
                    ));
                }
            } else if decode_errors > 0 {
                failure = Some(format!("{decode_errors} decode errors on a clean stream"));
            } else if !count_ok {
                failure = Some(format!(
                    "frame count mismatch: decoded {frames_decoded} of {frames_generated}"
                ));
            } else if !content_ok {
                failure = Some(format!(
                    "content hash mismatch: encoded {} decoded {}",
                    hex::encode(produced_digest),
                    decoded_digest.as_deref().unwrap_or("-")
                ));
            }
        }
    }

    let outcome = CaseOutcome {
        label: config.label.clone(),
        passed: failure.is_none(),
        failure,
        frames_generated,
        frames_decoded,
        decode_errors,
        fuzz_hits,
        hash_match,
        stream_digest: hex::encode(produced_digest),
        decoded_digest,
        source_bytes,
        encoded_bytes,
        ratio: if source_bytes > 0 {
            encoded_bytes as f64 / source_bytes as f64
        } else {
            0.0
        },
        stream_bps: if total_samples > 0 {
            encoded_bytes as f64 * 8.0 / total_samples as f64
        } else {
            0.0
        },
        primary: primary_stats,
        correction: correction_stats,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    if outcome.passed {
        log::info!(
            "case pass: {} ({:.3}x, {:.2} bps, {} ms)",
            outcome.label,
            outcome.ratio,
            outcome.stream_bps,
            outcome.elapsed_ms
        );
    } else {
        log::error!(
            "case FAIL: {}: {}",
            outcome.label,
            outcome.failure.as_deref().unwrap_or("unknown")
        );
    }

    Ok(outcome)
}
