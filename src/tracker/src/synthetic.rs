//! Self-contained triangulated domains with analytic flow fields. The test
//! suite and the demo mode of the binary run the full pipeline against these
//! instead of circulation-model output.

use crate::mediator::FieldSnapshot;
use crate::mediator::GridArrays;
use ndarray::Array1;
use ndarray::Array2;

/// Boundary types for the two ends of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBoundary {
    Land,
    Open,
}

impl EndBoundary {
    fn code(self) -> i32 {
        match self {
            EndBoundary::Land => -1,
            EndBoundary::Open => -2,
        }
    }
}

/// A rectangular channel of `n_columns` squares, each split into two
/// triangles along its south-west/north-east diagonal. The long sides are
/// land; the two ends are configurable.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub n_columns: usize,
    pub column_width: f64,
    pub channel_width: f64,
    pub depth: f64,
    pub n_siglay: usize,
    pub left_end: EndBoundary,
    pub right_end: EndBoundary,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            n_columns: 8,
            column_width: 1.0,
            channel_width: 1.0,
            depth: 10.0,
            n_siglay: 4,
            left_end: EndBoundary::Land,
            right_end: EndBoundary::Open,
        }
    }
}

/// Build the static grid arrays for a channel mesh.
pub fn channel_grid(options: &ChannelOptions) -> GridArrays {
    let nc = options.n_columns;
    let n_nodes = 2 * (nc + 1);
    let n_elems = 2 * nc;
    let n_siglay = options.n_siglay;
    let n_siglev = n_siglay + 1;

    let mut x = Array1::zeros(n_nodes);
    let mut y = Array1::zeros(n_nodes);
    for i in 0..=nc {
        x[i] = i as f64 * options.column_width;
        y[i] = 0.0;
        x[nc + 1 + i] = i as f64 * options.column_width;
        y[nc + 1 + i] = options.channel_width;
    }

    let mut nv = Array2::zeros((3, n_elems));
    let mut nbe = Array2::zeros((3, n_elems));
    for i in 0..nc {
        let lower = 2 * i;
        let upper = 2 * i + 1;
        let l_i = i as i32;
        let l_ip = (i + 1) as i32;
        let u_i = (nc + 1 + i) as i32;
        let u_ip = (nc + 2 + i) as i32;

        nv[[0, lower]] = l_i;
        nv[[1, lower]] = l_ip;
        nv[[2, lower]] = u_i;
        nbe[[0, lower]] = upper as i32;
        nbe[[1, lower]] = if i == 0 {
            options.left_end.code()
        } else {
            (2 * (i - 1) + 1) as i32
        };
        nbe[[2, lower]] = -1;

        nv[[0, upper]] = l_ip;
        nv[[1, upper]] = u_ip;
        nv[[2, upper]] = u_i;
        nbe[[0, upper]] = -1;
        nbe[[1, upper]] = lower as i32;
        nbe[[2, upper]] = if i == nc - 1 {
            options.right_end.code()
        } else {
            (2 * (i + 1)) as i32
        };
    }

    let mut xc = Array1::zeros(n_elems);
    let mut yc = Array1::zeros(n_elems);
    for e in 0..n_elems {
        let mut cx = 0.0;
        let mut cy = 0.0;
        for vertex in 0..3 {
            let n = nv[[vertex, e]] as usize;
            cx += x[n];
            cy += y[n];
        }
        xc[e] = cx / 3.0;
        yc[e] = cy / 3.0;
    }

    let mut siglev = Array2::zeros((n_siglev, n_nodes));
    let mut siglay = Array2::zeros((n_siglay, n_nodes));
    for node in 0..n_nodes {
        for level in 0..n_siglev {
            siglev[[level, node]] = -(level as f64) / n_siglay as f64;
        }
        for layer in 0..n_siglay {
            siglay[[layer, node]] = -(layer as f64 + 0.5) / n_siglay as f64;
        }
    }

    let h = Array1::from_elem(n_nodes, options.depth);

    GridArrays {
        nv,
        nbe,
        x,
        y,
        xc,
        yc,
        siglev,
        siglay,
        h,
    }
}

/// A spatially uniform flow with constant diffusivities, rendered into
/// snapshots of the input field set.
#[derive(Debug, Clone)]
pub struct UniformFlow {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    pub zeta: f64,
    pub kh: f64,
    pub viscofh: f64,
}

impl Default for UniformFlow {
    fn default() -> Self {
        UniformFlow {
            u: 0.0,
            v: 0.0,
            w: 0.0,
            zeta: 0.0,
            kh: 0.0,
            viscofh: 0.0,
        }
    }
}

impl UniformFlow {
    pub fn snapshot(&self, grid: &GridArrays, time_seconds: f64) -> FieldSnapshot {
        let n_nodes = grid.x.len();
        let n_elems = grid.nv.shape()[1];
        let n_siglay = grid.siglay.shape()[0];
        let n_siglev = grid.siglev.shape()[0];
        FieldSnapshot::new(time_seconds)
            .with_1d("zeta", Array1::from_elem(n_nodes, self.zeta))
            .with_1d("wet_cells", Array1::from_elem(n_elems, 1.0))
            .with_2d("u", Array2::from_elem((n_siglay, n_elems), self.u))
            .with_2d("v", Array2::from_elem((n_siglay, n_elems), self.v))
            .with_2d("ww", Array2::from_elem((n_siglay, n_elems), self.w))
            .with_2d("kh", Array2::from_elem((n_siglev, n_nodes), self.kh))
            .with_2d("viscofh", Array2::from_elem((n_siglay, n_nodes), self.viscofh))
    }

    /// Snapshots at `times`, identical up to the timestamp.
    pub fn snapshots(&self, grid: &GridArrays, times: &[f64]) -> Vec<FieldSnapshot> {
        times.iter().map(|&t| self.snapshot(grid, t)).collect()
    }
}

/// Solid-body rotation about a fixed centre, rendered onto the element
/// centres: u = -omega (yc - y0), v = omega (xc - x0), w = 0. Positive
/// omega turns anticlockwise.
#[derive(Debug, Clone)]
pub struct RotationalFlow {
    pub centre_x: f64,
    pub centre_y: f64,
    /// Angular velocity in rad/s.
    pub omega: f64,
    pub zeta: f64,
    pub kh: f64,
    pub viscofh: f64,
}

impl Default for RotationalFlow {
    fn default() -> Self {
        RotationalFlow {
            centre_x: 0.0,
            centre_y: 0.0,
            omega: 0.0,
            zeta: 0.0,
            kh: 0.0,
            viscofh: 0.0,
        }
    }
}

impl RotationalFlow {
    pub fn snapshot(&self, grid: &GridArrays, time_seconds: f64) -> FieldSnapshot {
        let n_nodes = grid.x.len();
        let n_elems = grid.nv.shape()[1];
        let n_siglay = grid.siglay.shape()[0];
        let n_siglev = grid.siglev.shape()[0];
        let mut u = Array2::zeros((n_siglay, n_elems));
        let mut v = Array2::zeros((n_siglay, n_elems));
        for e in 0..n_elems {
            let u_e = -self.omega * (grid.yc[e] - self.centre_y);
            let v_e = self.omega * (grid.xc[e] - self.centre_x);
            for layer in 0..n_siglay {
                u[[layer, e]] = u_e;
                v[[layer, e]] = v_e;
            }
        }
        FieldSnapshot::new(time_seconds)
            .with_1d("zeta", Array1::from_elem(n_nodes, self.zeta))
            .with_1d("wet_cells", Array1::from_elem(n_elems, 1.0))
            .with_2d("u", u)
            .with_2d("v", v)
            .with_2d("ww", Array2::zeros((n_siglay, n_elems)))
            .with_2d("kh", Array2::from_elem((n_siglev, n_nodes), self.kh))
            .with_2d("viscofh", Array2::from_elem((n_siglay, n_nodes), self.viscofh))
    }

    /// Snapshots at `times`; the rotation is steady, so frames differ only
    /// in their timestamp.
    pub fn snapshots(&self, grid: &GridArrays, times: &[f64]) -> Vec<FieldSnapshot> {
        times.iter().map(|&t| self.snapshot(grid, t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_connectivity_is_mutual() {
        let grid = channel_grid(&ChannelOptions::default());
        let n_elems = grid.nv.shape()[1];
        for e in 0..n_elems {
            for vertex in 0..3 {
                let neighbour = grid.nbe[[vertex, e]];
                if neighbour >= 0 {
                    let back: Vec<i32> = (0..3)
                        .map(|v| grid.nbe[[v, neighbour as usize]])
                        .collect();
                    assert!(
                        back.contains(&(e as i32)),
                        "element {} not seen from neighbour {}",
                        e,
                        neighbour
                    );
                }
            }
        }
    }

    #[test]
    fn channel_ends_carry_the_requested_codes() {
        let grid = channel_grid(&ChannelOptions::default());
        let n_elems = grid.nv.shape()[1];
        assert_eq!(grid.nbe[[1, 0]], -1);
        assert_eq!(grid.nbe[[2, n_elems - 1]], -2);
    }

    #[test]
    fn rotational_velocities_follow_the_analytic_profile() {
        let grid = channel_grid(&ChannelOptions::default());
        let flow = RotationalFlow {
            centre_x: 4.0,
            centre_y: 0.5,
            omega: 0.2,
            ..RotationalFlow::default()
        };
        let snapshot = flow.snapshot(&grid, 0.0);
        let u = &snapshot.fields_2d["u"];
        let v = &snapshot.fields_2d["v"];
        let n_elems = grid.nv.shape()[1];
        for e in 0..n_elems {
            assert!((u[[0, e]] + 0.2 * (grid.yc[e] - 0.5)).abs() < 1e-12);
            assert!((v[[0, e]] - 0.2 * (grid.xc[e] - 4.0)).abs() < 1e-12);
            // layers share the depth-independent rotation
            assert_eq!(u[[0, e]], u[[grid.siglay.shape()[0] - 1, e]]);
        }
        assert!(snapshot.fields_2d["ww"].iter().all(|&w| w == 0.0));
    }

    #[test]
    fn snapshot_shapes_match_the_grid() {
        let grid = channel_grid(&ChannelOptions::default());
        let flow = UniformFlow {
            u: 1.0,
            ..UniformFlow::default()
        };
        let snapshot = flow.snapshot(&grid, 0.0);
        assert_eq!(snapshot.fields_1d["zeta"].len(), grid.x.len());
        assert_eq!(
            snapshot.fields_2d["u"].shape(),
            [grid.siglay.shape()[0], grid.nv.shape()[1]]
        );
        assert_eq!(
            snapshot.fields_2d["kh"].shape(),
            [grid.siglev.shape()[0], grid.x.len()]
        );
    }
}
