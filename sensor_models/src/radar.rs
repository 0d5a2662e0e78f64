//! Radar front-end configuration.
//!
//! [`RadarConfig`] is the single immutable parameter set shared by every
//! stage: chirp/antenna dimensions, ADC timing, LVDS link layout, and the
//! nested detection thresholds. The defaults describe a 2-TX / 4-RX board
//! streaming 256-sample chirps through a two-lane capture card.
//!
//! # Derived quantities
//! - range resolution: `c / (2 · B)`, `B = slope · (1000 / rate · samples)`
//! - Doppler resolution: `c / (2 · loops · tx · f_c · T_chirp)`, with
//!   `f_c = f_start + B / 2` and `T_chirp = idle + ramp_end`

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Speed of light (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

// ---------------------------------------------------------------------------
// Detection parameters
// ---------------------------------------------------------------------------

/// Cell-averaging CFAR window along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CfarParams {
    /// Cells skipped on each side of the cell under test
    pub guard_len: usize,
    /// Cells averaged on each side beyond the guard band
    pub noise_len: usize,
    /// Multiplicative bias applied to the averaged noise floor
    pub l_bound: f64,
}

/// One row of the range-bucketed SNR / peak-value threshold table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeBucket {
    /// Upper (exclusive) range edge of the bucket in meters
    pub max_range_m: f64,
    /// Minimum SNR a candidate must exceed
    pub min_snr: f64,
    /// Minimum peak value a candidate must reach
    pub min_peak: f64,
}

/// Parameters for the 2D detector and its pruning stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    pub range_cfar: CfarParams,
    pub doppler_cfar: CfarParams,
    /// Keep a Doppler runner-up that sits next to a stronger neighbor
    pub reserve_neighbor: bool,
    /// Candidates below this range bin are discarded
    pub min_range_bin: usize,
    /// Candidates above this range bin are discarded (`None`: no limit)
    pub max_range_bin: Option<usize>,
    /// SNR / peak table, evaluated by ascending `max_range_m`. Empty disables it.
    pub range_buckets: Vec<RangeBucket>,
    /// Subtract the slow-time mean before the Doppler FFT
    pub clutter_removal: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            range_cfar: CfarParams {
                guard_len: 4,
                noise_len: 16,
                l_bound: 1.25,
            },
            doppler_cfar: CfarParams {
                guard_len: 4,
                noise_len: 16,
                l_bound: 1.15,
            },
            reserve_neighbor: false,
            min_range_bin: 1,
            max_range_bin: None,
            range_buckets: vec![
                RangeBucket { max_range_m: 1.0, min_snr: 23.0, min_peak: 400.0 },
                RangeBucket { max_range_m: 2.0, min_snr: 23.0, min_peak: 275.0 },
                RangeBucket { max_range_m: 4.0, min_snr: 11.5, min_peak: 275.0 },
                RangeBucket { max_range_m: 10.0, min_snr: 11.5, min_peak: 0.0 },
                RangeBucket { max_range_m: f64::MAX, min_snr: 16.0, min_peak: 0.0 },
            ],
            clutter_removal: true,
        }
    }
}

/// Angle-of-arrival estimator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AoaParams {
    /// Zero-padded FFT size of the coarse azimuth estimate
    pub fft_size: usize,
    /// Azimuth scan half-span (degrees) for the beamformer
    pub azimuth_span_deg: f64,
    /// Azimuth scan step (degrees)
    pub azimuth_step_deg: f64,
    /// Elevation scan half-span (degrees); ignored without an elevation row
    pub elevation_span_deg: f64,
    /// Elevation scan step (degrees)
    pub elevation_step_deg: f64,
    /// Diagonal loading as a fraction of the mean covariance diagonal
    pub diagonal_loading: f64,
}

impl Default for AoaParams {
    fn default() -> Self {
        Self {
            fft_size: 64,
            azimuth_span_deg: 90.0,
            azimuth_step_deg: 1.0,
            elevation_span_deg: 30.0,
            elevation_step_deg: 2.0,
            diagonal_loading: 0.01,
        }
    }
}

/// Density-clustering settings over (x, y, z, velocity).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Neighborhood radius on each spatial axis (meters)
    pub eps_xyz: f64,
    /// Neighborhood radius in velocity, in Doppler bins
    pub eps_doppler_bins: f64,
    /// Neighborhood size (self included) that makes a core point
    pub min_samples: usize,
    /// Report unclustered points as size-1 clusters
    pub keep_noise: bool,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps_xyz: 0.5,
            eps_doppler_bins: 2.0,
            min_samples: 3,
            keep_noise: true,
        }
    }
}

/// Range-window power threshold used by the presence path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceParams {
    pub min_range_m: f64,
    pub max_range_m: f64,
    pub threshold_db: f64,
}

impl Default for PresenceParams {
    fn default() -> Self {
        Self {
            min_range_m: 0.1,
            max_range_m: 1.0,
            threshold_db: 80.0,
        }
    }
}

// ---------------------------------------------------------------------------
// RadarConfig
// ---------------------------------------------------------------------------

/// Physical configuration of the radar front-end and capture link.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// ADC samples per chirp
    pub num_adc_samples: usize,
    /// Receive antennas
    pub num_rx: usize,
    /// Transmit antennas (TDM-MIMO)
    pub num_tx: usize,
    /// Chirp loops per frame; chirps per frame = tx × loops
    pub num_loops_per_frame: usize,
    /// ADC output sample rate (ksps)
    pub sample_rate_ksps: f64,
    /// Chirp frequency slope (MHz/µs)
    pub freq_slope_mhz_per_us: f64,
    /// Chirp start frequency (GHz)
    pub start_freq_ghz: f64,
    /// Chirp idle time (µs)
    pub idle_time_us: f64,
    /// Chirp ramp end time (µs)
    pub ramp_end_time_us: f64,
    /// LVDS lanes used by the capture card
    pub num_lvds_lanes: usize,
    /// Quadrature stream is sent before in-phase
    pub iq_swap: bool,
    /// Raw stream is ordered (chirp, sample, rx) instead of (chirp, rx, sample)
    pub ch_interleave: bool,
    /// Payload bytes carried by one UDP data packet
    pub bytes_in_packet: usize,
    /// Raw bytes in one frame
    pub bytes_in_frame: usize,
    /// Largest datagram accepted from the data socket
    pub max_packet_size: usize,
    pub detection: DetectionParams,
    pub aoa: AoaParams,
    pub cluster: ClusterParams,
    pub presence: PresenceParams,
}

impl Default for RadarConfig {
    fn default() -> Self {
        let (samples, rx, tx, loops) = (256, 4, 2, 128);
        Self {
            num_adc_samples: samples,
            num_rx: rx,
            num_tx: tx,
            num_loops_per_frame: loops,
            sample_rate_ksps: 10_000.0,
            freq_slope_mhz_per_us: 60.012,
            start_freq_ghz: 77.0,
            idle_time_us: 100.0,
            ramp_end_time_us: 62.0,
            num_lvds_lanes: 2,
            iq_swap: false,
            ch_interleave: false,
            bytes_in_packet: 1456,
            // complex i16: 2 words × 2 bytes per sample
            bytes_in_frame: tx * loops * rx * samples * 4,
            max_packet_size: 4096,
            detection: DetectionParams::default(),
            aoa: AoaParams::default(),
            cluster: ClusterParams::default(),
            presence: PresenceParams::default(),
        }
    }
}

/// Reasons a [`RadarConfig`] cannot drive the pipeline.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigIssue {
    #[error("{0} must be non-zero")]
    ZeroDimension(&'static str),
    #[error("bytes_in_frame is {actual}, dimensions require {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("packet of {packet} bytes exceeds frame of {frame} bytes")]
    PacketLargerThanFrame { packet: usize, frame: usize },
    #[error("bytes_in_packet {0} is not a whole number of i16 words")]
    OddPacketSize(usize),
}

impl RadarConfig {
    /// Build a config for the given cube dimensions, with `bytes_in_frame`
    /// derived from them and everything else at its default.
    pub fn with_dimensions(samples: usize, rx: usize, tx: usize, loops: usize) -> Self {
        Self {
            num_adc_samples: samples,
            num_rx: rx,
            num_tx: tx,
            num_loops_per_frame: loops,
            bytes_in_frame: samples * rx * tx * loops * 4,
            ..Default::default()
        }
    }

    /// Check that dimensions and link sizes are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigIssue> {
        for (name, v) in [
            ("num_adc_samples", self.num_adc_samples),
            ("num_rx", self.num_rx),
            ("num_tx", self.num_tx),
            ("num_loops_per_frame", self.num_loops_per_frame),
            ("bytes_in_packet", self.bytes_in_packet),
        ] {
            if v == 0 {
                return Err(ConfigIssue::ZeroDimension(name));
            }
        }
        let expected = self.chirps_per_frame() * self.num_rx * self.num_adc_samples * 4;
        if self.bytes_in_frame != expected {
            return Err(ConfigIssue::FrameSize {
                expected,
                actual: self.bytes_in_frame,
            });
        }
        if self.bytes_in_packet > self.bytes_in_frame {
            return Err(ConfigIssue::PacketLargerThanFrame {
                packet: self.bytes_in_packet,
                frame: self.bytes_in_frame,
            });
        }
        if self.bytes_in_packet % 2 != 0 {
            return Err(ConfigIssue::OddPacketSize(self.bytes_in_packet));
        }
        Ok(())
    }

    pub fn chirps_per_frame(&self) -> usize {
        self.num_tx * self.num_loops_per_frame
    }

    pub fn num_range_bins(&self) -> usize {
        self.num_adc_samples
    }

    pub fn num_doppler_bins(&self) -> usize {
        self.num_loops_per_frame
    }

    pub fn num_virtual_antennas(&self) -> usize {
        self.num_tx * self.num_rx
    }

    /// ADC sampling window of one chirp (µs).
    pub fn adc_sample_time_us(&self) -> f64 {
        1000.0 / self.sample_rate_ksps * self.num_adc_samples as f64
    }

    /// Swept bandwidth covered by the ADC window (Hz).
    pub fn bandwidth_hz(&self) -> f64 {
        self.freq_slope_mhz_per_us * 1e12 * self.adc_sample_time_us() * 1e-6
    }

    /// Range bin size (m).
    pub fn range_resolution(&self) -> f64 {
        SPEED_OF_LIGHT / (2.0 * self.bandwidth_hz())
    }

    /// Doppler bin size (m/s).
    pub fn doppler_resolution(&self) -> f64 {
        let center_freq = self.start_freq_ghz * 1e9 + self.bandwidth_hz() / 2.0;
        let chirp_interval = (self.ramp_end_time_us + self.idle_time_us) * 1e-6;
        SPEED_OF_LIGHT
            / (2.0
                * self.num_loops_per_frame as f64
                * self.num_tx as f64
                * center_freq
                * chirp_interval)
    }

    /// Carrier wavelength at the chirp center (m).
    pub fn wavelength(&self) -> f64 {
        SPEED_OF_LIGHT / (self.start_freq_ghz * 1e9 + self.bandwidth_hz() / 2.0)
    }

    /// Start-to-start chirp period (s).
    pub fn chirp_period_s(&self) -> f64 {
        (self.idle_time_us + self.ramp_end_time_us) * 1e-6
    }

    /// Frame bytes rounded down to a whole number of packets.
    pub fn bytes_in_frame_clipped(&self) -> usize {
        (self.bytes_in_frame / self.bytes_in_packet) * self.bytes_in_packet
    }

    pub fn packets_per_frame(&self) -> usize {
        self.bytes_in_frame / self.bytes_in_packet
    }

    pub fn words_per_packet(&self) -> usize {
        self.bytes_in_packet / 2
    }

    pub fn words_per_frame(&self) -> usize {
        self.bytes_in_frame / 2
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn default_config_is_consistent() {
        let cfg = RadarConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.chirps_per_frame(), 256);
        assert_eq!(cfg.num_virtual_antennas(), 8);
        assert_eq!(cfg.words_per_frame(), 256 * 4 * 256 * 2);
    }

    #[test]
    fn resolutions_match_board_figures() {
        let cfg = RadarConfig::default();
        // 256 samples at 10 Msps → 25.6 µs × 60.012 MHz/µs ≈ 1.536 GHz
        assert_abs_diff_eq!(cfg.bandwidth_hz(), 1.536_307_2e9, epsilon = 1e3);
        assert_abs_diff_eq!(cfg.range_resolution(), 0.09757, epsilon = 1e-4);
        let dres = cfg.doppler_resolution();
        assert!(dres > 0.04 && dres < 0.05, "doppler res {dres}");
    }

    #[test]
    fn packet_clipping() {
        let cfg = RadarConfig::default();
        let clipped = cfg.bytes_in_frame_clipped();
        assert_eq!(clipped % cfg.bytes_in_packet, 0);
        assert!(clipped <= cfg.bytes_in_frame);
        assert!(cfg.bytes_in_frame - clipped < cfg.bytes_in_packet);
        assert_eq!(cfg.packets_per_frame() * cfg.bytes_in_packet, clipped);
    }

    #[test]
    fn validate_rejects_frame_size_mismatch() {
        let cfg = RadarConfig {
            bytes_in_frame: 1000,
            ..RadarConfig::with_dimensions(64, 4, 2, 16)
        };
        assert!(matches!(cfg.validate(), Err(ConfigIssue::FrameSize { .. })));

        let cfg = RadarConfig {
            num_rx: 0,
            ..RadarConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigIssue::ZeroDimension("num_rx")));
    }

    #[test]
    fn config_roundtrips_through_json_with_missing_fields() {
        let cfg: RadarConfig = serde_json::from_str(r#"{ "num_tx": 3 }"#).unwrap();
        assert_eq!(cfg.num_tx, 3);
        assert_eq!(cfg.num_adc_samples, 256);
        let text = serde_json::to_string(&cfg).unwrap();
        let back: RadarConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.num_tx, 3);
    }
}
