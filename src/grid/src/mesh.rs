use log::debug;
use ndarray::Array1;
use ndarray::Array2;
use thiserror::Error;

/// Neighbour sentinel for an edge closed by land. Carried bit-exact from the
/// input `nbe` array.
pub const LAND_BOUNDARY: i32 = -1;
/// Neighbour sentinel for an edge through which particles leave the domain.
pub const OPEN_BOUNDARY: i32 = -2;

/// Barycentric acceptance tolerance, scaled by the triangle's characteristic
/// edge length.
const PHI_TOLERANCE_SCALE: f64 = 1e-14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSystem {
    Cartesian,
    Spherical,
}

/// Immutable horizontal/vertical mesh topology for a triangular,
/// terrain-following ocean model grid.
///
/// Node and centre coordinates are stored with the uniform `(xmin, ymin)`
/// offset already subtracted in cartesian mode; offsets are zero in spherical
/// mode. Outputs derived from the grid keep the offset coordinates.
#[derive(Debug)]
pub struct UnstructuredGrid {
    n_nodes: usize,
    n_elems: usize,
    n_siglay: usize,
    n_siglev: usize,
    nv: Array2<i32>,
    nbe: Array2<i32>,
    x: Array1<f64>,
    y: Array1<f64>,
    xc: Array1<f64>,
    yc: Array1<f64>,
    siglev: Array2<f64>,
    siglay: Array2<f64>,
    h: Array1<f64>,
    xmin: f64,
    ymin: f64,
}

impl UnstructuredGrid {
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }
    pub fn n_elems(&self) -> usize {
        self.n_elems
    }
    pub fn n_siglay(&self) -> usize {
        self.n_siglay
    }
    pub fn n_siglev(&self) -> usize {
        self.n_siglev
    }
    pub fn nbe(&self) -> &Array2<i32> {
        &self.nbe
    }
    pub fn offsets(&self) -> (f64, f64) {
        (self.xmin, self.ymin)
    }

    /// Node index of the `vertex`-th corner of `elem`.
    pub fn node(&self, vertex: usize, elem: usize) -> usize {
        self.nv[[vertex, elem]] as usize
    }

    /// The three node indices of `elem`.
    pub fn element_nodes(&self, elem: usize) -> [usize; 3] {
        [self.node(0, elem), self.node(1, elem), self.node(2, elem)]
    }

    pub fn node_coordinates(&self, node: usize) -> (f64, f64) {
        (self.x[node], self.y[node])
    }

    pub fn centroid(&self, elem: usize) -> (f64, f64) {
        (self.xc[elem], self.yc[elem])
    }

    pub fn bathymetry_at_node(&self, node: usize) -> f64 {
        self.h[node]
    }

    pub fn siglev_at_node(&self, level: usize, node: usize) -> f64 {
        self.siglev[[level, node]]
    }

    pub fn siglay_at_node(&self, layer: usize, node: usize) -> f64 {
        self.siglay[[layer, node]]
    }

    /// Nodes spanning the edge opposite the `vertex`-th corner of `elem`.
    pub fn edge_nodes(&self, elem: usize, vertex: usize) -> (usize, usize) {
        (
            self.node((vertex + 1) % 3, elem),
            self.node((vertex + 2) % 3, elem),
        )
    }

    fn vertex_coordinates(&self, elem: usize) -> [(f64, f64); 3] {
        let [a, b, c] = self.element_nodes(elem);
        [
            (self.x[a], self.y[a]),
            (self.x[b], self.y[b]),
            (self.x[c], self.y[c]),
        ]
    }

    /// Twice the signed area of `elem`. Vertex ordering is not assumed
    /// anticlockwise; the sign carries the orientation.
    fn determinant(&self, elem: usize) -> f64 {
        let [(x1, y1), (x2, y2), (x3, y3)] = self.vertex_coordinates(elem);
        (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3)
    }

    /// Barycentric coordinates of `(x, y)` within `elem`. The triple sums to
    /// one exactly by construction.
    pub fn phi(&self, x: f64, y: f64, elem: usize) -> [f64; 3] {
        let [(x1, y1), (x2, y2), (x3, y3)] = self.vertex_coordinates(elem);
        let det = (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3);
        let phi0 = ((y2 - y3) * (x - x3) + (x3 - x2) * (y - y3)) / det;
        let phi1 = ((y3 - y1) * (x - x3) + (x1 - x3) * (y - y3)) / det;
        [phi0, phi1, 1.0 - phi0 - phi1]
    }

    /// Acceptance tolerance for "inside" tests on `elem`.
    pub fn phi_tolerance(&self, elem: usize) -> f64 {
        PHI_TOLERANCE_SCALE * (1.0 + self.determinant(elem).abs().sqrt())
    }

    /// Barycentric coordinates of `(x, y)` within `elem`, with negative
    /// roundoff clamped to zero and the triple renormalised to sum to one.
    pub fn clamped_phi(&self, x: f64, y: f64, elem: usize) -> [f64; 3] {
        let mut phi = self.phi(x, y, elem);
        if phi.iter().any(|&p| p < 0.0) {
            for p in phi.iter_mut() {
                if *p < 0.0 {
                    *p = 0.0;
                }
            }
            let total: f64 = phi.iter().sum();
            for p in phi.iter_mut() {
                *p /= total;
            }
        }
        phi
    }

    /// Analytic gradients of the barycentric basis functions on `elem`,
    /// constant per triangle.
    pub fn grad_phi(&self, elem: usize) -> ([f64; 3], [f64; 3]) {
        let [(x1, y1), (x2, y2), (x3, y3)] = self.vertex_coordinates(elem);
        let det = (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3);
        let dphi_dx = [(y2 - y3) / det, (y3 - y1) / det, (y1 - y2) / det];
        let dphi_dy = [(x3 - x2) / det, (x1 - x3) / det, (x2 - x1) / det];
        (dphi_dx, dphi_dy)
    }
}

#[derive(Default)]
pub struct UnstructuredGridBuilder<'a> {
    nv: Option<&'a Array2<i32>>,
    nbe: Option<&'a Array2<i32>>,
    x: Option<&'a Array1<f64>>,
    y: Option<&'a Array1<f64>>,
    xc: Option<&'a Array1<f64>>,
    yc: Option<&'a Array1<f64>>,
    siglev: Option<&'a Array2<f64>>,
    siglay: Option<&'a Array2<f64>>,
    h: Option<&'a Array1<f64>>,
    coordinate_system: Option<&'a CoordinateSystem>,
}

impl<'a> UnstructuredGridBuilder<'a> {
    pub fn build(&self) -> Result<UnstructuredGrid, UnstructuredGridBuilderError> {
        let nv = self.nv.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("nv".to_string())
        })?;
        let nbe = self.nbe.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("nbe".to_string())
        })?;
        let x = self.x.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("x".to_string())
        })?;
        let y = self.y.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("y".to_string())
        })?;
        let xc = self.xc.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("xc".to_string())
        })?;
        let yc = self.yc.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("yc".to_string())
        })?;
        let siglev = self.siglev.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("siglev".to_string())
        })?;
        let siglay = self.siglay.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("siglay".to_string())
        })?;
        let h = self.h.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("h".to_string())
        })?;
        let coordinate_system = self.coordinate_system.ok_or_else(|| {
            UnstructuredGridBuilderError::UninitializedFieldError("coordinate_system".to_string())
        })?;
        let n_nodes = x.len();
        let n_elems = nv.shape()[1];
        let n_siglev = siglev.shape()[0];
        Self::validate_connectivity(nv, nbe, n_nodes, n_elems)?;
        Self::validate_coordinates(x, y, xc, yc, h, n_nodes, n_elems)?;
        Self::validate_sigma(siglev, siglay, n_nodes)?;
        let (xmin, ymin) = match coordinate_system {
            CoordinateSystem::Cartesian => (
                x.iter().cloned().fold(f64::INFINITY, f64::min),
                y.iter().cloned().fold(f64::INFINITY, f64::min),
            ),
            CoordinateSystem::Spherical => (0.0, 0.0),
        };
        debug!(
            "grid of {} elements over {} nodes; coordinate offsets ({}, {})",
            n_elems, n_nodes, xmin, ymin
        );
        Ok(UnstructuredGrid {
            n_nodes,
            n_elems,
            n_siglay: n_siglev - 1,
            n_siglev,
            nv: nv.clone(),
            nbe: nbe.clone(),
            x: x - xmin,
            y: y - ymin,
            xc: xc - xmin,
            yc: yc - ymin,
            siglev: siglev.clone(),
            siglay: siglay.clone(),
            h: h.clone(),
            xmin,
            ymin,
        })
    }

    fn validate_connectivity(
        nv: &Array2<i32>,
        nbe: &Array2<i32>,
        n_nodes: usize,
        n_elems: usize,
    ) -> Result<(), UnstructuredGridBuilderError> {
        if nv.shape() != [3, n_elems] || nbe.shape() != [3, n_elems] {
            return Err(UnstructuredGridBuilderError::InvalidConnectivityShape(
                nv.shape().to_vec(),
                nbe.shape().to_vec(),
            ));
        }
        for &node in nv.iter() {
            if node < 0 || node as usize >= n_nodes {
                return Err(UnstructuredGridBuilderError::InvalidNodeIndex(
                    node, n_nodes,
                ));
            }
        }
        for &neighbour in nbe.iter() {
            if neighbour < OPEN_BOUNDARY || neighbour as i64 >= n_elems as i64 {
                return Err(UnstructuredGridBuilderError::InvalidNeighbourIndex(
                    neighbour, n_elems,
                ));
            }
        }
        Ok(())
    }

    fn validate_coordinates(
        x: &Array1<f64>,
        y: &Array1<f64>,
        xc: &Array1<f64>,
        yc: &Array1<f64>,
        h: &Array1<f64>,
        n_nodes: usize,
        n_elems: usize,
    ) -> Result<(), UnstructuredGridBuilderError> {
        if y.len() != n_nodes || h.len() != n_nodes {
            return Err(UnstructuredGridBuilderError::InvalidNodeArrayLength(
                y.len().min(h.len()),
                n_nodes,
            ));
        }
        if xc.len() != n_elems || yc.len() != n_elems {
            return Err(UnstructuredGridBuilderError::InvalidCentreArrayLength(
                xc.len().min(yc.len()),
                n_elems,
            ));
        }
        for &v in x.iter().chain(y.iter()).chain(h.iter()) {
            if !v.is_finite() {
                return Err(UnstructuredGridBuilderError::NonFiniteCoordinate);
            }
        }
        Ok(())
    }

    fn validate_sigma(
        siglev: &Array2<f64>,
        siglay: &Array2<f64>,
        n_nodes: usize,
    ) -> Result<(), UnstructuredGridBuilderError> {
        let n_siglev = siglev.shape()[0];
        if n_siglev < 2 || siglev.shape()[1] != n_nodes {
            return Err(UnstructuredGridBuilderError::InvalidSigmaShape(
                siglev.shape().to_vec(),
                siglay.shape().to_vec(),
            ));
        }
        if siglay.shape() != [n_siglev - 1, n_nodes] {
            return Err(UnstructuredGridBuilderError::InvalidSigmaShape(
                siglev.shape().to_vec(),
                siglay.shape().to_vec(),
            ));
        }
        for node in 0..n_nodes {
            for level in 1..n_siglev {
                if siglev[[level, node]] >= siglev[[level - 1, node]] {
                    return Err(UnstructuredGridBuilderError::NonMonotonicSigma(node));
                }
            }
        }
        for &s in siglev.iter().chain(siglay.iter()) {
            if !(-1.0..=0.0).contains(&s) {
                return Err(UnstructuredGridBuilderError::SigmaOutOfRange(s));
            }
        }
        Ok(())
    }

    pub fn nv(&mut self, nv: &'a Array2<i32>) -> &mut Self {
        self.nv = Some(nv);
        self
    }
    pub fn nbe(&mut self, nbe: &'a Array2<i32>) -> &mut Self {
        self.nbe = Some(nbe);
        self
    }
    pub fn x(&mut self, x: &'a Array1<f64>) -> &mut Self {
        self.x = Some(x);
        self
    }
    pub fn y(&mut self, y: &'a Array1<f64>) -> &mut Self {
        self.y = Some(y);
        self
    }
    pub fn xc(&mut self, xc: &'a Array1<f64>) -> &mut Self {
        self.xc = Some(xc);
        self
    }
    pub fn yc(&mut self, yc: &'a Array1<f64>) -> &mut Self {
        self.yc = Some(yc);
        self
    }
    pub fn siglev(&mut self, siglev: &'a Array2<f64>) -> &mut Self {
        self.siglev = Some(siglev);
        self
    }
    pub fn siglay(&mut self, siglay: &'a Array2<f64>) -> &mut Self {
        self.siglay = Some(siglay);
        self
    }
    pub fn h(&mut self, h: &'a Array1<f64>) -> &mut Self {
        self.h = Some(h);
        self
    }
    pub fn coordinate_system(&mut self, coordinate_system: &'a CoordinateSystem) -> &mut Self {
        self.coordinate_system = Some(coordinate_system);
        self
    }
}

#[derive(Error, Debug)]
pub enum UnstructuredGridBuilderError {
    #[error("Unitialized field on UnstructuredGridBuilder: {0}")]
    UninitializedFieldError(String),
    #[error("nv and nbe must both have shape (3, n_elems), got {0:?} and {1:?}")]
    InvalidConnectivityShape(Vec<usize>, Vec<usize>),
    #[error("node index {0} outside 0..{1}")]
    InvalidNodeIndex(i32, usize),
    #[error("neighbour index {0} must be -2, -1 or an element index below {1}")]
    InvalidNeighbourIndex(i32, usize),
    #[error("node arrays must have length n_nodes = {1}, got {0}")]
    InvalidNodeArrayLength(usize, usize),
    #[error("element centre arrays must have length n_elems = {1}, got {0}")]
    InvalidCentreArrayLength(usize, usize),
    #[error("node coordinates and bathymetry must be finite")]
    NonFiniteCoordinate,
    #[error("siglev/siglay must have shapes (n_siglev, n_nodes) and (n_siglev - 1, n_nodes), got {0:?} and {1:?}")]
    InvalidSigmaShape(Vec<usize>, Vec<usize>),
    #[error("sigma levels must decrease monotonically from surface to seabed at node {0}")]
    NonMonotonicSigma(usize),
    #[error("sigma coordinate {0} outside [-1, 0]")]
    SigmaOutOfRange(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::two_triangle_grid;

    #[test]
    fn phi_sums_to_one() {
        let grid = two_triangle_grid();
        let phi = grid.phi(0.3, 0.2, 0);
        let total: f64 = phi.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn phi_is_one_at_a_vertex() {
        let grid = two_triangle_grid();
        let phi = grid.phi(0.0, 0.0, 0);
        assert!((phi[0] - 1.0).abs() < 1e-12);
        assert!(phi[1].abs() < 1e-12);
        assert!(phi[2].abs() < 1e-12);
    }

    #[test]
    fn clamped_phi_renormalises_roundoff() {
        let grid = two_triangle_grid();
        // marginally outside the bottom edge of element 0
        let phi = grid.clamped_phi(0.5, -1e-15, 0);
        assert!(phi.iter().all(|&p| p >= 0.0));
        let total: f64 = phi.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn grad_phi_matches_finite_differences() {
        let grid = two_triangle_grid();
        let (dphi_dx, dphi_dy) = grid.grad_phi(0);
        let d = 1e-6;
        let phi0 = grid.phi(0.3, 0.2, 0);
        let phi_x = grid.phi(0.3 + d, 0.2, 0);
        let phi_y = grid.phi(0.3, 0.2 + d, 0);
        for i in 0..3 {
            assert!((dphi_dx[i] - (phi_x[i] - phi0[i]) / d).abs() < 1e-6);
            assert!((dphi_dy[i] - (phi_y[i] - phi0[i]) / d).abs() < 1e-6);
        }
    }

    #[test]
    fn cartesian_offsets_are_subtracted() {
        let grid = two_triangle_grid();
        assert_eq!(grid.offsets(), (0.0, 0.0));
        let (x0, y0) = grid.node_coordinates(0);
        assert_eq!((x0, y0), (0.0, 0.0));
    }

    #[test]
    fn builder_rejects_missing_fields() {
        let result = UnstructuredGridBuilder::default().build();
        assert!(matches!(
            result,
            Err(UnstructuredGridBuilderError::UninitializedFieldError(_))
        ));
    }
}
