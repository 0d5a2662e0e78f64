//! Range and Doppler compression.
//!
//! # Steps
//! 1. Range FFT: Hann window over the sample axis, FFT per (chirp, rx) row.
//! 2. Doppler FFT: chirps are split per transmitter (TDM-MIMO, chirp
//!    `l · tx + t` is loop `l` of transmitter `t`), optional clutter removal
//!    subtracts the slow-time mean, then an FFT over loops per
//!    (range bin, virtual antenna).
//! 3. The power matrix sums `log2 |X|` over virtual antennas.
//!
//! Both steps are pure: the same cube always yields bit-identical outputs.

use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use sensor_models::RadarConfig;

use crate::error::{DetectError, Result};
use crate::types::{AoaInput, DopplerMatrix, RadarCube};

/// Floor applied to magnitudes before taking logarithms.
const MAGNITUDE_FLOOR: f64 = 1e-12;

/// Output of [`RangeDopplerProcessor::process`].
#[derive(Clone, Debug)]
pub struct RangeDopplerOutput {
    pub doppler: DopplerMatrix,
    pub aoa: AoaInput,
    /// `20 log10 |X|` of the first chirp on the first receiver
    pub range_profile_db: Vec<f64>,
}

/// Holds the FFT plans and window for one cube shape.
pub struct RangeDopplerProcessor {
    chirps: usize,
    rx: usize,
    tx: usize,
    samples: usize,
    loops: usize,
    clutter_removal: bool,
    window: Vec<f64>,
    range_fft: Arc<dyn Fft<f64>>,
    doppler_fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for RangeDopplerProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeDopplerProcessor")
            .field("shape", &(self.chirps, self.rx, self.samples))
            .field("tx", &self.tx)
            .field("clutter_removal", &self.clutter_removal)
            .finish()
    }
}

impl RangeDopplerProcessor {
    pub fn new(config: &RadarConfig) -> Self {
        let mut planner = FftPlanner::new();
        let samples = config.num_adc_samples;
        let loops = config.num_loops_per_frame;
        Self {
            chirps: config.chirps_per_frame(),
            rx: config.num_rx,
            tx: config.num_tx,
            samples,
            loops,
            clutter_removal: config.detection.clutter_removal,
            window: hann_window(samples),
            range_fft: planner.plan_fft_forward(samples),
            doppler_fft: planner.plan_fft_forward(loops),
        }
    }

    pub fn num_range_bins(&self) -> usize {
        self.samples
    }

    pub fn num_doppler_bins(&self) -> usize {
        self.loops
    }

    pub fn num_virtual_antennas(&self) -> usize {
        self.tx * self.rx
    }

    fn check_shape(&self, stage: &'static str, cube: &RadarCube) -> Result<()> {
        let expected = (self.chirps, self.rx, self.samples);
        let actual = cube.shape();
        if actual != expected {
            return Err(DetectError::ShapeMismatch {
                stage,
                expected: vec![expected.0, expected.1, expected.2],
                actual: vec![actual.0, actual.1, actual.2],
            });
        }
        Ok(())
    }

    /// Windowed range FFT of every (chirp, rx) row.
    pub fn range_fft(&self, cube: &RadarCube) -> Result<RadarCube> {
        self.check_shape("range fft input", cube)?;
        let mut out = cube.clone();
        let window = &self.window;
        let fft = &self.range_fft;
        out.as_mut_slice()
            .par_chunks_mut(self.samples)
            .for_each(|row| {
                for (x, w) in row.iter_mut().zip(window) {
                    *x *= *w;
                }
                fft.process(row);
            });
        self.check_shape("range fft output", &out)?;
        Ok(out)
    }

    /// Doppler FFT over a range-compressed cube.
    pub fn doppler_fft(&self, range_cube: &RadarCube) -> Result<(DopplerMatrix, AoaInput)> {
        self.check_shape("doppler fft input", range_cube)?;
        let (n_range, n_va, n_dop) = (self.samples, self.num_virtual_antennas(), self.loops);
        let mut aoa = AoaInput::zeros(n_range, n_va, n_dop);
        let (tx, rx) = (self.tx, self.rx);
        let clutter = self.clutter_removal;
        let fft = &self.doppler_fft;

        // one chunk per range bin: n_va rows of n_dop bins
        let power_rows: Vec<Vec<f64>> = aoa
            .as_mut_slice()
            .par_chunks_mut(n_va * n_dop)
            .enumerate()
            .map(|(k, chunk)| {
                let mut power = vec![0.0; n_dop];
                for (v, series) in chunk.chunks_mut(n_dop).enumerate() {
                    let (t, r) = (v / rx, v % rx);
                    for (l, x) in series.iter_mut().enumerate() {
                        *x = range_cube.get(l * tx + t, r, k);
                    }
                    if clutter {
                        let mean = series.iter().sum::<Complex64>() / n_dop as f64;
                        series.iter_mut().for_each(|x| *x -= mean);
                    }
                    fft.process(series);
                    for (p, x) in power.iter_mut().zip(series.iter()) {
                        *p += x.norm().max(MAGNITUDE_FLOOR).log2();
                    }
                }
                power
            })
            .collect();

        let flat: Vec<f64> = power_rows.into_iter().flatten().collect();
        let doppler = DopplerMatrix::from_row_slice(n_range, n_dop, &flat);
        Ok((doppler, aoa))
    }

    /// Full range + Doppler processing of one cube.
    pub fn process(&self, cube: &RadarCube) -> Result<RangeDopplerOutput> {
        let range_cube = self.range_fft(cube)?;
        let range_profile_db = range_profile_db(&range_cube, 0, 0);
        let (doppler, aoa) = self.doppler_fft(&range_cube)?;
        Ok(RangeDopplerOutput {
            doppler,
            aoa,
            range_profile_db,
        })
    }
}

/// Symmetric Hann window scaled so that `Σ w² = n`.
pub fn hann_window(n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![1.0; n];
    }
    let raw: Vec<f64> = (0..n)
        .map(|i| 0.5 - 0.5 * (std::f64::consts::TAU * i as f64 / (n - 1) as f64).cos())
        .collect();
    let energy: f64 = raw.iter().map(|w| w * w).sum();
    let scale = (n as f64 / energy).sqrt();
    raw.into_iter().map(|w| w * scale).collect()
}

/// `20 log10 |X|` of one range-compressed (chirp, rx) row.
pub fn range_profile_db(range_cube: &RadarCube, chirp: usize, rx: usize) -> Vec<f64> {
    range_cube
        .row(chirp, rx)
        .iter()
        .map(|x| 20.0 * x.norm().max(MAGNITUDE_FLOOR).log10())
        .collect()
}

/// Range (m) of each bin: `linspace(0, range_res · bins, bins)`.
pub fn range_axis(config: &RadarConfig) -> Vec<f64> {
    let n = config.num_range_bins();
    let max_range = config.range_resolution() * n as f64;
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| max_range * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn tone_cube(cfg: &RadarConfig, range_bin: f64, doppler_bin: f64) -> RadarCube {
        let (chirps, rx, samples) = (cfg.chirps_per_frame(), cfg.num_rx, cfg.num_adc_samples);
        let mut cube = RadarCube::zeros(chirps, rx, samples);
        for c in 0..chirps {
            let l = (c / cfg.num_tx) as f64;
            for r in 0..rx {
                for s in 0..samples {
                    let phase = std::f64::consts::TAU
                        * (range_bin * s as f64 / samples as f64
                            + doppler_bin * l / cfg.num_loops_per_frame as f64);
                    cube.set(c, r, s, Complex64::from_polar(100.0, phase));
                }
            }
        }
        cube
    }

    #[test]
    fn hann_window_preserves_energy() {
        let w = hann_window(64);
        let energy: f64 = w.iter().map(|x| x * x).sum();
        assert_abs_diff_eq!(energy, 64.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w[0], 0.0);
        assert_abs_diff_eq!(w[63], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn range_fft_keeps_shape_and_finds_tone() {
        let cfg = RadarConfig::with_dimensions(32, 2, 2, 8);
        let proc = RangeDopplerProcessor::new(&cfg);
        let cube = tone_cube(&cfg, 5.0, 2.0);
        let rc = proc.range_fft(&cube).unwrap();
        assert_eq!(rc.shape(), cube.shape());
        let profile = range_profile_db(&rc, 0, 0);
        let peak = profile
            .iter()
            .enumerate()
            .fold(0, |best, (i, v)| if *v > profile[best] { i } else { best });
        assert_eq!(peak, 5);
    }

    #[test]
    fn range_fft_rejects_wrong_shape() {
        let cfg = RadarConfig::with_dimensions(32, 2, 2, 8);
        let proc = RangeDopplerProcessor::new(&cfg);
        let cube = RadarCube::zeros(16, 2, 32);
        assert!(matches!(
            proc.range_fft(&cube),
            Err(DetectError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn doppler_peak_lands_in_expected_cell() {
        let cfg = RadarConfig::with_dimensions(32, 4, 2, 16);
        let proc = RangeDopplerProcessor::new(&cfg);
        let out = proc.process(&tone_cube(&cfg, 7.0, 3.0)).unwrap();
        assert_eq!(out.doppler.shape(), (32, 16));
        assert_eq!(out.aoa.shape(), (32, 8, 16));
        let (mut best, mut best_v) = ((0, 0), f64::MIN);
        for r in 0..32 {
            for d in 0..16 {
                if out.doppler[(r, d)] > best_v {
                    best_v = out.doppler[(r, d)];
                    best = (r, d);
                }
            }
        }
        assert_eq!(best, (7, 3));
    }

    #[test]
    fn clutter_removal_suppresses_static_returns() {
        let cfg = RadarConfig::with_dimensions(32, 2, 2, 16);
        let proc = RangeDopplerProcessor::new(&cfg);
        let out = proc.process(&tone_cube(&cfg, 7.0, 0.0)).unwrap();
        let static_mag = out.aoa.get(7, 0, 0).norm();
        assert!(static_mag < 1e-6, "static return survived: {static_mag}");
    }

    #[test]
    fn process_is_idempotent() {
        let cfg = RadarConfig::with_dimensions(32, 4, 2, 16);
        let proc = RangeDopplerProcessor::new(&cfg);
        let cube = tone_cube(&cfg, 9.0, 5.0);
        let a = proc.process(&cube).unwrap();
        let b = proc.process(&cube).unwrap();
        assert_eq!(a.doppler, b.doppler);
        assert_eq!(a.aoa, b.aoa);
        assert_eq!(a.range_profile_db, b.range_profile_db);
    }

    #[test]
    fn range_axis_is_linspace() {
        let cfg = RadarConfig::with_dimensions(8, 1, 1, 2);
        let axis = range_axis(&cfg);
        assert_eq!(axis.len(), 8);
        assert_abs_diff_eq!(axis[0], 0.0);
        assert_abs_diff_eq!(axis[7], cfg.range_resolution() * 8.0, epsilon = 1e-12);
    }
}
