use thiserror::Error;

/// How the z column of a particle seed is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthInterpretation {
    /// Distance below the instantaneous free surface; resolved as
    /// `z + zmax`.
    Cartesian,
    /// A sigma coordinate in [-1, 0]; resolved through [`sigma_to_z`].
    Sigma,
}

/// Geometric depth of the sigma coordinate `sigma` in a column bounded by
/// `zmin` (sea floor) and `zmax` (free surface).
pub fn sigma_to_z(sigma: f64, zmin: f64, zmax: f64) -> f64 {
    zmax + sigma * (zmax - zmin)
}

/// Sigma coordinate of the geometric depth `z` in a column bounded by
/// `zmin` and `zmax`.
pub fn z_to_sigma(z: f64, zmin: f64, zmax: f64) -> f64 {
    (z - zmax) / (zmax - zmin)
}

/// Initial particle positions, as parallel arrays of equal length.
#[derive(Debug, Clone)]
pub struct SeedArrays {
    pub group_ids: Vec<i32>,
    pub x_positions: Vec<f64>,
    pub y_positions: Vec<f64>,
    pub z_positions: Vec<f64>,
}

impl SeedArrays {
    pub fn new(
        group_ids: Vec<i32>,
        x_positions: Vec<f64>,
        y_positions: Vec<f64>,
        z_positions: Vec<f64>,
    ) -> Result<Self, SeedingError> {
        let n = group_ids.len();
        if x_positions.len() != n || y_positions.len() != n || z_positions.len() != n {
            return Err(SeedingError::MismatchedArrayLengths {
                group_ids: n,
                x: x_positions.len(),
                y: y_positions.len(),
                z: z_positions.len(),
            });
        }
        for (i, &v) in x_positions
            .iter()
            .chain(y_positions.iter())
            .chain(z_positions.iter())
            .enumerate()
        {
            if !v.is_finite() {
                return Err(SeedingError::NonFinitePosition { index: i % n });
            }
        }
        Ok(SeedArrays {
            group_ids,
            x_positions,
            y_positions,
            z_positions,
        })
    }

    pub fn len(&self) -> usize {
        self.group_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group_ids.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum SeedingError {
    #[error("seed arrays must share one length, got group_ids={group_ids}, x={x}, y={y}, z={z}")]
    MismatchedArrayLengths {
        group_ids: usize,
        x: usize,
        y: usize,
        z: usize,
    },
    #[error("seed position at index {index} is not finite")]
    NonFinitePosition { index: usize },
    #[error(
        "seed particle {id} at ({x}, {y}) has depth {z} outside the water column [{zmin}, {zmax}]"
    )]
    DepthOutOfRange {
        id: i32,
        x: f64,
        y: f64,
        z: f64,
        zmin: f64,
        zmax: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigma_spans_the_water_column() {
        assert_eq!(sigma_to_z(0.0, -10.0, 0.5), 0.5);
        assert_eq!(sigma_to_z(-1.0, -10.0, 0.5), -10.0);
        assert_eq!(sigma_to_z(-0.5, -10.0, 0.0), -5.0);
    }

    #[test]
    fn sigma_and_z_round_trip() {
        let h = 23.7;
        let zeta = 0.42;
        for i in 0..=20 {
            let z = -h + (zeta + h) * i as f64 / 20.0;
            let back = sigma_to_z(z_to_sigma(z, -h, zeta), -h, zeta);
            assert!((back - z).abs() < 1e-12);
        }
    }

    #[test]
    fn seed_arrays_must_be_parallel() {
        let result = SeedArrays::new(vec![0, 0], vec![1.0], vec![1.0, 2.0], vec![0.0, 0.0]);
        assert!(matches!(
            result,
            Err(SeedingError::MismatchedArrayLengths { .. })
        ));
    }

    #[test]
    fn seed_arrays_reject_non_finite_positions() {
        let result = SeedArrays::new(vec![0], vec![f64::NAN], vec![0.0], vec![0.0]);
        assert!(matches!(result, Err(SeedingError::NonFinitePosition { .. })));
    }
}
