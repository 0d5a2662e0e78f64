//! Frame decoder: raw interleaved i16 words → complex [`RadarCube`].
//!
//! # Two-lane LVDS layout
//! The capture card emits groups of four words per two complex samples:
//!
//! ```text
//! raw:  I0 I1 Q0 Q1 | I2 I3 Q2 Q3 | ...
//!       lane0 lane1 lane0 lane1
//! ```
//!
//! so for group `g`: `I[2g + j] = raw[4g + j]`, `Q[2g + j] = raw[4g + 2 + j]`.
//! This is the word-interleaved layout of the card's raw stream, not a
//! block-wise split of the frame into four contiguous lanes.
//! The resulting complex stream is ordered (chirp, rx, sample), or
//! (chirp, sample, rx) when the channel-interleave flag is set.

use rustfft::num_complex::Complex64;
use sensor_models::RadarConfig;

use crate::error::{DetectError, Result};
use crate::types::RadarCube;

/// Cube dimensions expected by the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeDims {
    pub chirps: usize,
    pub rx: usize,
    pub samples: usize,
}

impl CubeDims {
    pub fn from_config(config: &RadarConfig) -> Self {
        Self {
            chirps: config.chirps_per_frame(),
            rx: config.num_rx,
            samples: config.num_adc_samples,
        }
    }

    pub fn complex_len(&self) -> usize {
        self.chirps * self.rx * self.samples
    }
}

/// Supported LVDS lane layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneLayout {
    TwoLane,
}

impl LaneLayout {
    pub fn from_lanes(lanes: usize) -> Result<Self> {
        match lanes {
            2 => Ok(LaneLayout::TwoLane),
            other => Err(DetectError::UnsupportedTopology { lanes: other }),
        }
    }

    /// Raw word index holding the (in-phase, quadrature) pair of complex sample `i`.
    #[inline]
    pub fn word_indices(self, i: usize) -> (usize, usize) {
        match self {
            LaneLayout::TwoLane => {
                let (g, j) = (i / 2, i % 2);
                (4 * g + j, 4 * g + 2 + j)
            }
        }
    }
}

/// Decoder bound to one configuration.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    pub layout: LaneLayout,
    pub iq_swap: bool,
    pub ch_interleave: bool,
    pub dims: CubeDims,
}

impl FrameDecoder {
    pub fn new(config: &RadarConfig) -> Result<Self> {
        Ok(Self {
            layout: LaneLayout::from_lanes(config.num_lvds_lanes)?,
            iq_swap: config.iq_swap,
            ch_interleave: config.ch_interleave,
            dims: CubeDims::from_config(config),
        })
    }

    pub fn decode(&self, raw: &[i16]) -> Result<RadarCube> {
        decode_with(self.layout, raw, self.iq_swap, self.ch_interleave, self.dims)
    }

    /// Inverse of [`decode`](Self::decode): lay a cube out as raw words.
    pub fn encode(&self, cube: &RadarCube) -> Result<Vec<i16>> {
        let (c, r, s) = cube.shape();
        if (c, r, s) != (self.dims.chirps, self.dims.rx, self.dims.samples) {
            return Err(DetectError::ShapeMismatch {
                stage: "encode",
                expected: vec![self.dims.chirps, self.dims.rx, self.dims.samples],
                actual: vec![c, r, s],
            });
        }
        let mut raw = vec![0i16; self.dims.complex_len() * 2];
        for i in 0..self.dims.complex_len() {
            let (chirp, rx, sample) = stream_position(i, self.dims, self.ch_interleave);
            let v = cube.get(chirp, rx, sample);
            let (re, im) = (saturate(v.re), saturate(v.im));
            let (wi, wq) = self.layout.word_indices(i);
            if self.iq_swap {
                raw[wi] = im;
                raw[wq] = re;
            } else {
                raw[wi] = re;
                raw[wq] = im;
            }
        }
        Ok(raw)
    }
}

/// Decode a raw frame with an explicit lane count.
pub fn decode(
    raw: &[i16],
    lanes: usize,
    iq_swap: bool,
    ch_interleave: bool,
    dims: CubeDims,
) -> Result<RadarCube> {
    decode_with(LaneLayout::from_lanes(lanes)?, raw, iq_swap, ch_interleave, dims)
}

fn decode_with(
    layout: LaneLayout,
    raw: &[i16],
    iq_swap: bool,
    ch_interleave: bool,
    dims: CubeDims,
) -> Result<RadarCube> {
    let n = dims.complex_len();
    if raw.len() != 2 * n {
        return Err(DetectError::ShapeMismatch {
            stage: "decode",
            expected: vec![2 * n],
            actual: vec![raw.len()],
        });
    }

    let mut cube = RadarCube::zeros(dims.chirps, dims.rx, dims.samples);
    for i in 0..n {
        let (wi, wq) = layout.word_indices(i);
        let (mut re, mut im) = (raw[wi] as f64, raw[wq] as f64);
        if iq_swap {
            std::mem::swap(&mut re, &mut im);
        }
        let (chirp, rx, sample) = stream_position(i, dims, ch_interleave);
        cube.set(chirp, rx, sample, Complex64::new(re, im));
    }
    Ok(cube)
}

/// (chirp, rx, sample) of the `i`-th complex sample in the raw stream.
#[inline]
fn stream_position(i: usize, dims: CubeDims, ch_interleave: bool) -> (usize, usize, usize) {
    let per_chirp = dims.rx * dims.samples;
    let (chirp, rem) = (i / per_chirp, i % per_chirp);
    if ch_interleave {
        // stream order (chirp, sample, rx)
        (chirp, rem % dims.rx, rem / dims.rx)
    } else {
        (chirp, rem / dims.samples, rem % dims.samples)
    }
}

fn saturate(v: f64) -> i16 {
    v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: CubeDims = CubeDims {
        chirps: 4,
        rx: 2,
        samples: 6,
    };

    fn ramp_raw(len: usize) -> Vec<i16> {
        (0..len).map(|i| i as i16).collect()
    }

    #[test]
    fn decode_shape_matches_config() {
        let raw = ramp_raw(DIMS.complex_len() * 2);
        let cube = decode(&raw, 2, false, false, DIMS).unwrap();
        assert_eq!(cube.shape(), (4, 2, 6));
    }

    #[test]
    fn two_lane_deinterleave() {
        let raw = ramp_raw(DIMS.complex_len() * 2);
        let cube = decode(&raw, 2, false, false, DIMS).unwrap();
        // first group: I0=0 I1=1 Q0=2 Q1=3
        assert_eq!(cube.get(0, 0, 0), Complex64::new(0.0, 2.0));
        assert_eq!(cube.get(0, 0, 1), Complex64::new(1.0, 3.0));
        assert_eq!(cube.get(0, 0, 2), Complex64::new(4.0, 6.0));
        // sample 6 of the stream is rx 1, sample 0
        assert_eq!(cube.get(0, 1, 0), Complex64::new(12.0, 14.0));
    }

    #[test]
    fn iq_swap_exchanges_components() {
        let raw = ramp_raw(DIMS.complex_len() * 2);
        let cube = decode(&raw, 2, true, false, DIMS).unwrap();
        assert_eq!(cube.get(0, 0, 0), Complex64::new(2.0, 0.0));
    }

    #[test]
    fn channel_interleave_transposes() {
        let raw = ramp_raw(DIMS.complex_len() * 2);
        let plain = decode(&raw, 2, false, false, DIMS).unwrap();
        let inter = decode(&raw, 2, false, true, DIMS).unwrap();
        assert_eq!(inter.shape(), (4, 2, 6));
        // stream index 1 is (sample 0, rx 1) when interleaved
        assert_eq!(inter.get(0, 1, 0), plain.get(0, 0, 1));
        assert_eq!(inter.get(0, 0, 1), plain.get(0, 0, 2));
    }

    #[test]
    fn wrong_length_is_shape_error() {
        let raw = ramp_raw(DIMS.complex_len() * 2 - 4);
        let err = decode(&raw, 2, false, false, DIMS).unwrap_err();
        assert!(matches!(err, DetectError::ShapeMismatch { stage: "decode", .. }));
    }

    #[test]
    fn unsupported_lane_count() {
        let raw = ramp_raw(DIMS.complex_len() * 2);
        for lanes in [1, 4] {
            let err = decode(&raw, lanes, false, false, DIMS).unwrap_err();
            assert!(matches!(err, DetectError::UnsupportedTopology { lanes: l } if l == lanes));
        }
    }

    #[test]
    fn encode_inverts_decode() {
        let cfg = RadarConfig {
            iq_swap: true,
            ch_interleave: true,
            ..RadarConfig::with_dimensions(6, 2, 2, 2)
        };
        let dec = FrameDecoder::new(&cfg).unwrap();
        let raw = ramp_raw(dec.dims.complex_len() * 2);
        let cube = dec.decode(&raw).unwrap();
        assert_eq!(dec.encode(&cube).unwrap(), raw);
    }
}
