//! Cell-averaging CFAR along one axis.
//!
//! For every cell the noise floor is the mean of `noise_len` cells on each
//! side, beyond `guard_len` guard cells. Indices wrap around the line ends.
//! A cell is a detection when it exceeds `noise_floor · l_bound`. Log-domain
//! inputs can produce negative floors; those are divided by the bias instead,
//! so the threshold always rises with `l_bound`.

use sensor_models::CfarParams;

/// Per-cell CFAR result along one line.
#[derive(Clone, Debug, Default)]
pub struct CfarLine {
    pub detections: Vec<bool>,
    pub noise_floor: Vec<f64>,
}

/// Run CA-CFAR over a single line of cells.
pub fn ca_cfar(line: &[f64], params: &CfarParams) -> CfarLine {
    let n = line.len() as isize;
    let mut out = CfarLine {
        detections: Vec::with_capacity(line.len()),
        noise_floor: Vec::with_capacity(line.len()),
    };
    if n == 0 || params.noise_len == 0 {
        out.detections.resize(line.len(), false);
        out.noise_floor.resize(line.len(), 0.0);
        return out;
    }

    let guard = params.guard_len as isize;
    let noise = params.noise_len as isize;
    for i in 0..n {
        let mut sum = 0.0;
        for k in guard + 1..=guard + noise {
            sum += line[(i - k).rem_euclid(n) as usize];
            sum += line[(i + k).rem_euclid(n) as usize];
        }
        let floor = sum / (2 * noise) as f64;
        out.noise_floor.push(floor);
        out.detections.push(line[i as usize] > biased_threshold(floor, params.l_bound));
    }
    out
}

/// Noise floor scaled away from zero by `l_bound`.
#[inline]
pub fn biased_threshold(floor: f64, l_bound: f64) -> f64 {
    if floor >= 0.0 || l_bound <= 0.0 {
        floor * l_bound
    } else {
        floor / l_bound
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn params(l_bound: f64) -> CfarParams {
        CfarParams {
            guard_len: 2,
            noise_len: 4,
            l_bound,
        }
    }

    #[test]
    fn isolated_peak_is_detected() {
        let mut line = vec![10.0; 32];
        line[12] = 40.0;
        let out = ca_cfar(&line, &params(1.5));
        assert_eq!(out.detections.iter().filter(|d| **d).count(), 1);
        assert!(out.detections[12]);
        assert_abs_diff_eq!(out.noise_floor[12], 10.0);
    }

    #[test]
    fn guard_cells_exclude_peak_spread() {
        let mut line = vec![10.0; 32];
        line[12] = 40.0;
        line[13] = 40.0;
        let out = ca_cfar(&line, &params(1.5));
        // each peak sits in the other's guard band
        assert_abs_diff_eq!(out.noise_floor[12], 10.0);
        assert!(out.detections[12] && out.detections[13]);
    }

    #[test]
    fn window_wraps_at_edges() {
        let mut line = vec![10.0; 16];
        line[0] = 40.0;
        line[15] = 22.0;
        let out = ca_cfar(&line, &params(1.5));
        assert!(out.detections[0]);
        // left window of cell 4 is {1, 0, 15, 14}
        assert_abs_diff_eq!(out.noise_floor[4], (10.0 * 6.0 + 40.0 + 22.0) / 8.0);
    }

    #[test]
    fn negative_floor_threshold_rises_with_bias() {
        assert!(biased_threshold(-10.0, 1.5) > biased_threshold(-10.0, 1.0));
        assert!(biased_threshold(10.0, 1.5) > biased_threshold(10.0, 1.0));
    }

    #[test]
    fn higher_bias_never_adds_detections() {
        let line: Vec<f64> = (0..64).map(|i| ((i * 37) % 11) as f64 + 5.0).collect();
        let mut prev = usize::MAX;
        for l in [0.5, 0.9, 1.0, 1.2, 1.6, 2.5] {
            let n = ca_cfar(&line, &params(l)).detections.iter().filter(|d| **d).count();
            assert!(n <= prev, "l_bound {l} raised count to {n}");
            prev = n;
        }
    }
}
