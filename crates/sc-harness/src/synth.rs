//! Deterministic multi-band audio synthesis
//!
//! Six generators (alternating band-limited noise and frequency-swept tones
//! across three bands) are gain-mixed into an interleaved multi-channel
//! buffer. The per-channel gains follow a slowly evolving spatial envelope:
//! a sequencing angle sweeps a virtual source in a circle while a width
//! envelope cycles the image from wide to narrow and back, so the encoder
//! sees material that keeps changing in both spectrum and stereo placement.

use std::f64::consts::PI;

use crate::prng::Prng;
use crate::{HarnessError, Result};

/// Gain applied to the noise generators in the standard bank.
pub const NOISE_GAIN: f64 = 0.6667;
/// Gain applied to the tone generators in the standard bank.
pub const TONE_GAIN: f64 = 0.3333;

const NUM_GENERATORS: usize = 6;

/// Phase offset (in units of pi) of each generator around the circle.
const GENERATOR_PHASE: [f64; NUM_GENERATORS] = [1.6667, 0.6667, 0.3333, 1.3333, 1.0, 0.0];

/// Band-limited noise state: two cascaded leaky integrators plus the
/// previous second-stage output for differencing.
#[derive(Debug, Clone, Default)]
pub struct NoiseState {
    sum1: f32,
    sum2: f32,
    sum2p: f32,
    factor: f32,
    scalar: f32,
}

/// Frequency-modulated tone state: a phase accumulator whose velocity ramps
/// linearly toward a freshly drawn log-uniform target every
/// `samples_per_update` samples.
#[derive(Debug, Clone)]
pub struct ToneState {
    sample_rate: u32,
    samples_per_update: u32,
    low_frequency: u32,
    high_frequency: u32,
    angle: f32,
    velocity: f32,
    acceleration: f32,
    samples_left: u32,
}

/// One audio generator, polymorphic over the two oscillator kinds.
#[derive(Debug, Clone)]
pub enum Generator {
    Noise(NoiseState),
    Tone(ToneState),
}

impl Generator {
    /// Band-limited noise with the given shape factor.
    ///
    /// The energy scalar `factor^3.5 / (2 + factor^2)` keeps differently
    /// shaped generators at comparable output amplitude.
    pub fn noise(factor: f32) -> Self {
        Generator::Noise(NoiseState {
            scalar: factor * factor * factor * factor.sqrt() / (2.0 + factor * factor),
            factor,
            ..NoiseState::default()
        })
    }

    /// Tone sweeping log-uniformly within `[low_freq, high_freq]` Hz.
    pub fn tone(sample_rate: u32, low_freq: u32, high_freq: u32) -> Self {
        Generator::Tone(ToneState {
            sample_rate,
            samples_per_update: sample_rate / low_freq * 4,
            low_frequency: low_freq,
            high_frequency: high_freq,
            angle: 0.0,
            velocity: 0.0,
            acceleration: 0.0,
            samples_left: 0,
        })
    }

    /// Advance the oscillator by `samples.len()` samples.
    pub fn run(&mut self, prng: &mut Prng, samples: &mut [f32]) {
        match self {
            Generator::Noise(state) => {
                for sample in samples {
                    let source = (prng.uniform() as f32 - 0.5) * state.scalar;
                    state.sum1 += (source - state.sum1) / state.factor;
                    state.sum2 += (state.sum1 - state.sum2) / state.factor;
                    *sample = state.sum2 - state.sum2p;
                    state.sum2p = state.sum2;
                }
            }
            Generator::Tone(state) => {
                for sample in samples {
                    if state.samples_left == 0 {
                        state.samples_left = state.samples_per_update;

                        let ratio = state.high_frequency as f64 / state.low_frequency as f64;
                        let target_frequency =
                            state.low_frequency as f64 * ratio.powf(prng.uniform());
                        let target_velocity =
                            (PI * 2.0) / (state.sample_rate as f64 / target_frequency);
                        state.acceleration =
                            (target_velocity as f32 - state.velocity) / state.samples_left as f32;
                    }

                    state.velocity += state.acceleration;
                    state.angle += state.velocity;
                    *sample = state.angle.sin();
                    if state.angle as f64 > PI {
                        state.angle -= (PI * 2.0) as f32;
                    }
                    state.samples_left -= 1;
                }
            }
        }
    }
}

/// The standard six-generator bank: alternating noise/tone across the low,
/// mid and high bands.
pub fn generator_bank(sample_rate: u32) -> Vec<Generator> {
    vec![
        Generator::noise(128.0),
        Generator::tone(sample_rate, 20, 200),
        Generator::noise(12.0),
        Generator::tone(sample_rate, 200, 2000),
        Generator::noise(1.75),
        Generator::tone(sample_rate, 2000, 20000),
    ]
}

/// Per-channel mixing state: one gain (and one gain-history value for
/// frame-boundary interpolation) per generator, a placement angle, and an
/// LFE restriction flag.
#[derive(Debug, Clone, Default)]
pub struct ChannelMix {
    pub gain: [f32; NUM_GENERATORS],
    pub gain_hist: [f32; NUM_GENERATORS],
    pub angle_offset: f64,
    pub lfe: bool,
}

impl ChannelMix {
    /// True when generator `index` contributes to this channel. LFE channels
    /// take only the two lowest-band generators.
    pub fn takes_generator(&self, index: usize) -> bool {
        !self.lfe || index < 2
    }

    /// Roll the current gains into the history slots after a frame is mixed.
    pub fn latch_gains(&mut self) {
        self.gain_hist = self.gain;
    }
}

/// Speaker placements and channel mask for the supported channel counts
/// (mono, stereo, quad, 5.1).
pub fn channel_layout(num_chans: usize) -> Result<(Vec<ChannelMix>, u32)> {
    let mut channels = vec![ChannelMix::default(); num_chans];

    let mask = match num_chans {
        1 => 0x4,
        2 => {
            channels[0].angle_offset = -PI / 24.0;
            channels[1].angle_offset = PI / 24.0;
            0x3
        }
        4 => {
            channels[0].angle_offset = -PI / 24.0;
            channels[1].angle_offset = PI / 24.0;
            channels[2].angle_offset = -23.0 * PI / 24.0;
            channels[3].angle_offset = 23.0 * PI / 24.0;
            0x33
        }
        6 => {
            channels[0].angle_offset = -PI / 24.0;
            channels[1].angle_offset = PI / 24.0;
            channels[3].lfe = true;
            channels[4].angle_offset = -23.0 * PI / 24.0;
            channels[5].angle_offset = 23.0 * PI / 24.0;
            0x3F
        }
        other => {
            return Err(HarnessError::InvalidConfig(format!(
                "unsupported channel count: {other}"
            )));
        }
    };

    Ok((channels, mask))
}

/// The slowly evolving spatial envelope: a sequencing angle that sweeps the
/// virtual source in a circle, and a width value that cycles the image from
/// wide (200) down to point-source (0) and back.
#[derive(Debug, Clone)]
pub struct SpatialSweep {
    sequencing_angle: f64,
    speed: f64,
    width: f64,
    width_cycle: u32,
}

impl Default for SpatialSweep {
    fn default() -> Self {
        Self {
            sequencing_angle: 0.0,
            speed: 60.0,
            width: 200.0,
            width_cycle: 0,
        }
    }
}

impl SpatialSweep {
    /// Recompute every channel's per-generator gain from the current
    /// envelope position. Called once per output frame.
    pub fn compute_gains(&self, channels: &mut [ChannelMix]) {
        let translated_angle = self.sequencing_angle.cos() * 100.0;
        let width_scalar = 2f64.powf(-self.width);

        for chan in channels.iter_mut() {
            for (j, gain) in chan.gain.iter_mut().enumerate() {
                let band_gain = if j % 2 == 0 { NOISE_GAIN } else { TONE_GAIN };
                let phase = (translated_angle + chan.angle_offset - PI * GENERATOR_PHASE[j]).sin();
                *gain = ((phase + 1.0).powf(self.width) * width_scalar * band_gain) as f32;
            }
        }
    }

    /// Advance the sequencing angle by one frame of `frames` samples.
    pub fn advance_frame(&mut self, frames: usize, sample_rate: u32) {
        self.sequencing_angle += 2.0 * PI / sample_rate as f64 / self.speed * frames as f64;
        if self.sequencing_angle > PI {
            self.sequencing_angle -= PI * 2.0;
        }
    }

    /// Advance the width envelope by one second of elapsed audio: shrink on
    /// even cycles, grow on odd ones.
    pub fn tick_second(&mut self) {
        if self.width_cycle & 1 == 0 {
            if self.width > 1.0 {
                self.width *= 0.875;
            } else if self.width > 0.125 {
                self.width -= 0.125;
            } else {
                self.width = 0.0;
                self.width_cycle += 1;
            }
        } else if self.width < 1.0 {
            self.width += 0.125;
        } else if self.width < 200.0 {
            self.width *= 1.125;
        } else {
            self.width_cycle += 1;
        }
    }
}

/// Mix one generator's mono output into channel `channel` of the interleaved
/// `num_chans`-wide destination, interpolating gain linearly across the frame
/// so frame boundaries never click.
pub fn mix_into(
    destin: &mut [f32],
    source: &[f32],
    channel: usize,
    num_chans: usize,
    initial_gain: f32,
    final_gain: f32,
) {
    let delta_gain = (final_gain - initial_gain) / source.len() as f32;
    let mut gain = initial_gain - delta_gain;

    for (i, &sample) in source.iter().enumerate() {
        gain += delta_gain;
        destin[i * num_chans + channel] += sample * gain;
    }
}
