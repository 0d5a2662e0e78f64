//! Virtual antenna array geometry and steering vectors.
//!
//! With TDM-MIMO each (tx, rx) pair forms one virtual element, indexed
//! `tx · num_rx + rx` to match the Doppler processor's channel order.
//! Positions are in half-wavelength units:
//! - TX0 / TX1 form one horizontal row of `2 · num_rx` elements (z = 0)
//! - TX2, when present, is raised by one unit and shifted right by
//!   [`ELEVATION_ROW_OFFSET`] elements
//!
//! A plane wave arriving from azimuth θ / elevation φ produces the phase
//! `π (x_n · u + z_n · w)` at element `n`, with `u = sin θ cos φ`, `w = sin φ`.

use serde::{Deserialize, Serialize};

/// Horizontal shift of the elevated row relative to the azimuth row.
pub const ELEVATION_ROW_OFFSET: f64 = 2.0;

/// Position of one virtual element (half-wavelength units).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualElement {
    pub x: f64,
    pub z: f64,
}

/// Virtual array layout for a given TX/RX count.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayGeometry {
    pub num_tx: usize,
    pub num_rx: usize,
    pub elements: Vec<VirtualElement>,
}

impl ArrayGeometry {
    /// Standard evaluation-board layout for 1..=3 TX.
    pub fn for_topology(num_tx: usize, num_rx: usize) -> Self {
        let mut elements = Vec::with_capacity(num_tx * num_rx);
        for tx in 0..num_tx {
            for rx in 0..num_rx {
                let e = if tx < 2 {
                    VirtualElement {
                        x: (tx * num_rx + rx) as f64,
                        z: 0.0,
                    }
                } else {
                    VirtualElement {
                        x: ELEVATION_ROW_OFFSET + rx as f64,
                        z: 1.0,
                    }
                };
                elements.push(e);
            }
        }
        Self {
            num_tx,
            num_rx,
            elements,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of elements in the horizontal (azimuth) row.
    pub fn azimuth_len(&self) -> usize {
        self.num_tx.min(2) * self.num_rx
    }

    /// True when an elevated row gives vertical aperture.
    pub fn has_elevation(&self) -> bool {
        self.num_tx >= 3
    }

    /// Index range of the elevated row.
    pub fn elevation_range(&self) -> std::ops::Range<usize> {
        if self.has_elevation() {
            2 * self.num_rx..3 * self.num_rx
        } else {
            0..0
        }
    }

    /// Element phases `π (x u + z w)` for direction cosines `(u, w)`.
    pub fn steering_phases(&self, u: f64, w: f64) -> Vec<f64> {
        self.elements
            .iter()
            .map(|e| std::f64::consts::PI * (e.x * u + e.z * w))
            .collect()
    }
}

/// Direction cosines `(u, w)` for azimuth / elevation in radians.
pub fn direction_cosines(azimuth: f64, elevation: f64) -> (f64, f64) {
    (azimuth.sin() * elevation.cos(), elevation.sin())
}

/// Cartesian position for a range and azimuth / elevation (y = boresight).
pub fn to_cartesian(range: f64, azimuth: f64, elevation: f64) -> [f64; 3] {
    [
        range * azimuth.sin() * elevation.cos(),
        range * azimuth.cos() * elevation.cos(),
        range * elevation.sin(),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn two_tx_layout_is_a_uniform_row() {
        let g = ArrayGeometry::for_topology(2, 4);
        assert_eq!(g.len(), 8);
        assert_eq!(g.azimuth_len(), 8);
        assert!(!g.has_elevation());
        for (i, e) in g.elements.iter().enumerate() {
            assert_abs_diff_eq!(e.x, i as f64);
            assert_abs_diff_eq!(e.z, 0.0);
        }
    }

    #[test]
    fn three_tx_layout_has_raised_row() {
        let g = ArrayGeometry::for_topology(3, 4);
        assert!(g.has_elevation());
        assert_eq!(g.elevation_range(), 8..12);
        assert_abs_diff_eq!(g.elements[8].x, ELEVATION_ROW_OFFSET);
        assert_abs_diff_eq!(g.elements[8].z, 1.0);
        assert_abs_diff_eq!(g.elements[11].x, ELEVATION_ROW_OFFSET + 3.0);
    }

    #[test]
    fn boresight_is_along_y() {
        let p = to_cartesian(2.0, 0.0, 0.0);
        assert_abs_diff_eq!(p[0], 0.0);
        assert_abs_diff_eq!(p[1], 2.0);
        assert_abs_diff_eq!(p[2], 0.0);

        let (u, w) = direction_cosines(30f64.to_radians(), 0.0);
        assert_abs_diff_eq!(u, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(w, 0.0);
    }
}
