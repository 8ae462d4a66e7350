//! End-to-end round trips through the reference block codec.

use std::sync::Arc;

use sc_blockcodec::{BlockCodec, BlockDecoder, BlockEncoder};
use sc_harness::codec::{BlockSink, ByteSource, Codec, CodecParams, Decoder};
use sc_harness::{CaseConfig, CaseReport, run_case};

fn run(config: CaseConfig) -> sc_harness::CaseOutcome {
    run_case(&BlockCodec::new(), &config).unwrap()
}

/// A misbehaving codec: decodes wrong samples while swearing nothing went
/// wrong. The harness must catch it even when fault injection is active.
struct SilentlyWrongCodec;

struct SilentlyWrongDecoder(BlockDecoder);

impl Decoder for SilentlyWrongDecoder {
    fn num_channels(&self) -> u32 {
        self.0.num_channels()
    }

    fn bytes_per_sample(&self) -> u32 {
        self.0.bytes_per_sample()
    }

    fn unpack(&mut self, samples: &mut [i32], max_frames: u32) -> usize {
        let frames = self.0.unpack(samples, max_frames);
        if frames > 0 {
            samples[0] ^= 1;
        }
        frames
    }

    fn error_count(&self) -> u64 {
        0
    }
}

impl Codec for SilentlyWrongCodec {
    type Encoder = BlockEncoder;
    type Decoder = SilentlyWrongDecoder;

    fn open_encoder(
        &self,
        params: &CodecParams,
        sink: Arc<dyn BlockSink>,
        correction_sink: Option<Arc<dyn BlockSink>>,
    ) -> sc_harness::Result<Self::Encoder> {
        BlockCodec::new().open_encoder(params, sink, correction_sink)
    }

    fn open_decoder(
        &self,
        source: Arc<dyn ByteSource>,
        correction_source: Option<Arc<dyn ByteSource>>,
    ) -> sc_harness::Result<Self::Decoder> {
        BlockCodec::new()
            .open_decoder(source, correction_source)
            .map(SilentlyWrongDecoder)
    }
}

#[test]
fn test_lossless_depth_and_channel_matrix() {
    let mut report = CaseReport::new("lossless matrix");

    for bits in [8, 16, 24, 32] {
        for chans in [1, 2, 4, 6] {
            let outcome = run(CaseConfig::lossless(bits, chans).with_seconds(1));
            report.add_outcome(outcome);
        }
    }

    assert!(report.all_passed(), "{}", report.to_text());
    assert_eq!(report.summary.total_cases, 16);
    assert_eq!(report.summary.total_decode_errors, 0);
}

#[test]
fn test_lossless_verifies_count_and_hash() {
    let outcome = run(CaseConfig::lossless(16, 2).with_seconds(2));

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert_eq!(outcome.frames_decoded, outcome.frames_generated);
    assert!(outcome.hash_match);
    assert_eq!(outcome.decode_errors, 0);
    assert!(outcome.encoded_bytes > 0);
    assert!(outcome.primary.first_block_size > 0);
}

#[test]
fn test_float_modes() {
    let cases = [
        CaseConfig::lossless(32, 2).with_store_float_as_int32(),
        CaseConfig::lossless(32, 2).with_store_int32_as_float(),
    ];

    for config in cases {
        let label = config.label.clone();
        let outcome = run(config.with_seconds(1));
        assert!(outcome.passed, "{label}: {:?}", outcome.failure);
        assert!(outcome.hash_match, "{label}");
    }
}

#[test]
fn test_float_depth_and_channel_matrix() {
    for bits in [20, 32] {
        for chans in [1, 2, 4, 6] {
            let outcome = run(
                CaseConfig::lossless(bits, chans)
                    .with_float_data()
                    .with_seconds(1),
            );
            assert!(
                outcome.passed,
                "float {bits}-bit {chans}ch: {:?}",
                outcome.failure
            );
            assert!(outcome.hash_match);
        }
    }
}

#[test]
fn test_hybrid_without_correction_is_lossy_but_counted() {
    let outcome = run(CaseConfig::hybrid(16, 2, 4.0).with_seconds(1));

    // Lossy output passes on frame count alone; the hash must differ.
    assert!(outcome.passed, "{:?}", outcome.failure);
    assert_eq!(outcome.frames_decoded, outcome.frames_generated);
    assert!(!outcome.hash_match);
}

#[test]
fn test_hybrid_with_correction_restores_lossless() {
    let outcome = run(
        CaseConfig::hybrid(24, 2, 6.0)
            .with_correction(false)
            .with_seconds(1),
    );

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert!(outcome.hash_match);
    assert_eq!(outcome.decode_errors, 0);
    let correction = outcome.correction.unwrap();
    assert!(correction.bytes_written > 0);
    assert!(correction.bytes_read > 0);
}

#[test]
fn test_hybrid_ignoring_correction_is_lossy() {
    let outcome = run(
        CaseConfig::hybrid(16, 2, 4.0)
            .with_correction(true)
            .with_seconds(1),
    );

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert!(!outcome.hash_match);
    // The correction stream was produced but never consumed.
    let correction = outcome.correction.unwrap();
    assert!(correction.bytes_written > 0);
    assert_eq!(correction.bytes_read, 0);
}

#[test]
fn test_fuzzed_stream_corruption_is_detected() {
    let outcome = run(
        CaseConfig::lossless(16, 2)
            .with_fuzz(500)
            .with_seconds(2)
            .with_label("fuzzed 16-bit stereo"),
    );

    // The policy under fault injection: damage is fine, silence is not.
    assert!(outcome.passed, "{:?}", outcome.failure);
    assert!(outcome.fuzz_hits > 0);
    assert!(outcome.decode_errors > 0);
}

#[test]
fn test_undetected_corruption_fails_even_under_fuzz() {
    let config = CaseConfig::lossless(16, 1)
        .with_fuzz(1_000_000)
        .with_seconds(1)
        .with_label("silently wrong decoder");

    let outcome = run_case(&SilentlyWrongCodec, &config).unwrap();

    // Wrong output with zero reported errors can never pass, fuzzing or not.
    assert!(!outcome.passed);
    assert!(!outcome.hash_match);
    assert!(outcome.into_result().is_err());
}

#[test]
fn test_fuzz_reaches_correction_stream() {
    let outcome = run(
        CaseConfig::hybrid(16, 2, 4.0)
            .with_correction(false)
            .with_fuzz(500)
            .with_seconds(2)
            .with_label("fuzzed hybrid with correction"),
    );

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert!(outcome.primary.fuzz_hits > 0);
    let correction = outcome.correction.unwrap();
    assert!(correction.fuzz_hits > 0, "correction stream escaped fuzzing");
    assert_eq!(
        outcome.fuzz_hits,
        outcome.primary.fuzz_hits + correction.fuzz_hits
    );
    assert!(outcome.decode_errors > 0);
}

/// Delegates to the block codec but returns zero frames on the first unpack
/// call, the way a decoder mid-resync might.
struct StallingCodec;

struct StallingDecoder {
    inner: BlockDecoder,
    stalled: bool,
}

impl Decoder for StallingDecoder {
    fn num_channels(&self) -> u32 {
        self.inner.num_channels()
    }

    fn bytes_per_sample(&self) -> u32 {
        self.inner.bytes_per_sample()
    }

    fn unpack(&mut self, samples: &mut [i32], max_frames: u32) -> usize {
        if !self.stalled {
            self.stalled = true;
            return 0;
        }
        self.inner.unpack(samples, max_frames)
    }

    fn error_count(&self) -> u64 {
        self.inner.error_count()
    }

    fn stream_hash(&self) -> Option<[u8; 32]> {
        self.inner.stream_hash()
    }
}

impl Codec for StallingCodec {
    type Encoder = BlockEncoder;
    type Decoder = StallingDecoder;

    fn open_encoder(
        &self,
        params: &CodecParams,
        sink: Arc<dyn BlockSink>,
        correction_sink: Option<Arc<dyn BlockSink>>,
    ) -> sc_harness::Result<Self::Encoder> {
        BlockCodec::new().open_encoder(params, sink, correction_sink)
    }

    fn open_decoder(
        &self,
        source: Arc<dyn ByteSource>,
        correction_source: Option<Arc<dyn ByteSource>>,
    ) -> sc_harness::Result<Self::Decoder> {
        BlockCodec::new()
            .open_decoder(source, correction_source)
            .map(|inner| StallingDecoder {
                inner,
                stalled: false,
            })
    }
}

#[test]
fn test_transient_decode_stall_is_retried() {
    // Big enough that the producer cannot finish inside the channel ring,
    // so the stream is guaranteed live when the stall happens.
    let config = CaseConfig::lossless(32, 6)
        .with_seconds(2)
        .with_label("stalling decoder");

    let outcome = run_case(&StallingCodec, &config).unwrap();

    // The stall is retried rather than treated as end-of-stream, so every
    // frame still arrives; the anomaly itself is counted and fails the
    // clean run.
    assert_eq!(outcome.frames_decoded, outcome.frames_generated);
    assert!(outcome.decode_errors >= 1);
    assert!(!outcome.passed);
}

#[test]
fn test_fuzzed_runs_are_reproducible() {
    let config = || {
        CaseConfig::lossless(16, 2)
            .with_fuzz(1000)
            .with_seed(12345)
            .with_seconds(1)
    };

    let first = run(config());
    let second = run(config());

    assert_eq!(first.fuzz_hits, second.fuzz_hits);
    assert_eq!(first.encoded_bytes, second.encoded_bytes);
    assert_eq!(first.decode_errors, second.decode_errors);
    assert_eq!(first.frames_decoded, second.frames_decoded);
}

#[test]
fn test_same_seed_same_stream() {
    let first = run(CaseConfig::lossless(24, 2).with_seed(42).with_seconds(1));
    let second = run(CaseConfig::lossless(24, 2).with_seed(42).with_seconds(1));

    assert_eq!(first.encoded_bytes, second.encoded_bytes);
    assert_eq!(first.source_bytes, second.source_bytes);
    assert!(first.passed && second.passed);
}

#[test]
fn test_encode_only_run() {
    let outcome = run(CaseConfig::lossless(16, 2).encode_only().with_seconds(1));

    assert!(outcome.passed);
    assert_eq!(outcome.frames_decoded, 0);
    assert!(outcome.encoded_bytes > 0);
    // All writes were swallowed by the zero-capacity channel.
    assert_eq!(outcome.primary.full_waits, 0);
}

#[test]
fn test_capture_file_mirrors_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.scb");

    let outcome = run(
        CaseConfig::lossless(16, 1)
            .with_seconds(1)
            .with_capture(&path),
    );

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert!(!outcome.primary.capture_failed);
    let captured = std::fs::metadata(&path).unwrap().len();
    assert_eq!(captured, outcome.primary.bytes_written);

    // A hybrid case also mirrors the correction stream, to the companion
    // file with "c" appended.
    let path = dir.path().join("hybrid.scb");
    let outcome = run(
        CaseConfig::hybrid(16, 1, 4.0)
            .with_correction(false)
            .with_seconds(1)
            .with_capture(&path),
    );

    assert!(outcome.passed, "{:?}", outcome.failure);
    let correction = outcome.correction.unwrap();
    assert!(!correction.capture_failed);
    let companion = dir.path().join("hybrid.scbc");
    let captured = std::fs::metadata(&companion).unwrap().len();
    assert_eq!(captured, correction.bytes_written);
    assert_eq!(
        std::fs::metadata(dir.path().join("hybrid.scb")).unwrap().len(),
        outcome.primary.bytes_written
    );
}

#[test]
fn test_invalid_configs_rejected() {
    let codec = BlockCodec::new();
    assert!(run_case(&codec, &CaseConfig::lossless(16, 5)).is_err());
    assert!(run_case(&codec, &CaseConfig::lossless(40, 2)).is_err());
    assert!(run_case(&codec, &CaseConfig::lossless(16, 2).with_fuzz(2)).is_err());
    // 1-bit hybrid would leave no bits to keep; rejected before the codec.
    assert!(run_case(&codec, &CaseConfig::hybrid(1, 2, 0.5)).is_err());
}

#[test]
fn test_into_result_propagates_failures() {
    let outcome = run(CaseConfig::lossless(16, 2).with_seconds(1));
    assert!(outcome.into_result().is_ok());
}

#[test]
fn test_report_over_mixed_suite() {
    let mut report = CaseReport::new("mixed suite");
    report.add_outcome(run(CaseConfig::lossless(16, 2).with_seconds(1)));
    report.add_outcome(run(CaseConfig::hybrid(16, 2, 4.0).with_seconds(1)));

    assert!(report.all_passed());
    let json = report.to_json();
    assert!(json.contains("\"total_cases\": 2"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.txt");
    report.save(&path, sc_harness::ReportFormat::Text).unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("Summary"));
}
