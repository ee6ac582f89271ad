use crate::mesh::UnstructuredGrid;
use crate::mesh::LAND_BOUNDARY;
use crate::mesh::OPEN_BOUNDARY;
use thiserror::Error;

/// Tolerance on the segment/edge intersection parameters, which live in
/// [0, 1] regardless of mesh scale.
const EDGE_PARAM_TOL: f64 = 1e-9;
/// Two crossings closer than this in pathline parameter count as simultaneous.
const TIE_TOL: f64 = 1e-12;

/// Outcome of a host-element search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    InDomain { host: usize },
    LandBoundaryCrossed { last_host: usize },
    OpenBoundaryCrossed { last_host: usize },
}

impl HostStatus {
    /// The element the search ended in: the containing element, or the last
    /// interior element before a boundary crossing.
    pub fn element(&self) -> usize {
        match *self {
            HostStatus::InDomain { host } => host,
            HostStatus::LandBoundaryCrossed { last_host } => last_host,
            HostStatus::OpenBoundaryCrossed { last_host } => last_host,
        }
    }
}

/// The endpoints of a crossed boundary edge and the parametric intersection
/// point of the pathline with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeIntersection {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub xi: f64,
    pub yi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathlineTrace {
    pub status: HostStatus,
    pub boundary: Option<EdgeIntersection>,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("barycentric walk from element {start} still searching after {hops} hops")]
    WalkStalled { start: usize, hops: usize },
    #[error("pathline trace from element {start} still crossing edges after {hops} elements")]
    TraceStalled { start: usize, hops: usize },
}

/// Intersection of the directed segment S->E with the segment A->B, as
/// parameters (s, u) along each. `None` when (anti)parallel.
fn segment_intersection(
    sx: f64,
    sy: f64,
    ex: f64,
    ey: f64,
    ax: f64,
    ay: f64,
    bx: f64,
    by: f64,
) -> Option<(f64, f64)> {
    let dx_se = ex - sx;
    let dy_se = ey - sy;
    let dx_ab = bx - ax;
    let dy_ab = by - ay;
    let det = dx_ab * dy_se - dx_se * dy_ab;
    if det.abs() < f64::MIN_POSITIVE.sqrt() {
        return None;
    }
    let rx = ax - sx;
    let ry = ay - sy;
    let s = (dx_ab * ry - dy_ab * rx) / det;
    let u = (dx_se * ry - dy_se * rx) / det;
    Some((s, u))
}

impl UnstructuredGrid {
    /// Locate the element containing `(x, y)` by walking the mesh from
    /// `first_guess`, stepping each time through the edge opposite the most
    /// negative barycentric coordinate. A guess that already contains the
    /// point is returned unchanged.
    pub fn find_host_using_local_search(
        &self,
        x: f64,
        y: f64,
        first_guess: usize,
    ) -> Result<HostStatus, SearchError> {
        let max_hops = self.n_elems() + 1;
        let mut host = first_guess;
        for _ in 0..max_hops {
            let phi = self.phi(x, y, host);
            let tol = self.phi_tolerance(host);
            let mut vertex = 0;
            let mut phi_min = phi[0];
            for i in 1..3 {
                if phi[i] < phi_min {
                    phi_min = phi[i];
                    vertex = i;
                }
            }
            if phi_min >= -tol {
                return Ok(HostStatus::InDomain { host });
            }
            match self.nbe()[[vertex, host]] {
                LAND_BOUNDARY => return Ok(HostStatus::LandBoundaryCrossed { last_host: host }),
                OPEN_BOUNDARY => return Ok(HostStatus::OpenBoundaryCrossed { last_host: host }),
                neighbour => host = neighbour as usize,
            }
        }
        Err(SearchError::WalkStalled {
            start: first_guess,
            hops: max_hops,
        })
    }

    /// Locate the element containing `(x, y)` by scanning every element.
    /// Returns `None` when the point lies outside the mesh.
    pub fn find_host_using_global_search(&self, x: f64, y: f64) -> Option<usize> {
        for elem in 0..self.n_elems() {
            let phi = self.phi(x, y, elem);
            let tol = self.phi_tolerance(elem);
            if phi.iter().all(|&p| p >= -tol) {
                return Some(elem);
            }
        }
        None
    }

    /// Follow the straight pathline from `(x_start, y_start)` in `host_start`
    /// to `(x_end, y_end)`, crossing adjacent elements through the
    /// earliest-parameter edge. The walk-based search can report an exit for
    /// moves that stay inside through a concave neighbourhood; tracing the
    /// pathline settles whether a boundary was genuinely crossed, and records
    /// the crossed edge when one was.
    ///
    /// When two edges are crossed at the same parameter, an edge with an
    /// interior neighbour wins; between two boundary edges, land wins over
    /// open.
    pub fn find_host_using_particle_tracing(
        &self,
        x_start: f64,
        y_start: f64,
        host_start: usize,
        x_end: f64,
        y_end: f64,
    ) -> Result<PathlineTrace, SearchError> {
        let max_hops = self.n_elems() + 1;
        let mut host = host_start;
        let mut entry_edge: Option<(usize, usize)> = None;
        for _ in 0..max_hops {
            let mut crossings: Vec<(f64, usize, f64)> = Vec::with_capacity(3);
            for vertex in 0..3 {
                let (na, nb) = self.edge_nodes(host, vertex);
                let edge_key = (na.min(nb), na.max(nb));
                if entry_edge == Some(edge_key) {
                    continue;
                }
                let (ax, ay) = self.node_coordinates(na);
                let (bx, by) = self.node_coordinates(nb);
                if let Some((s, u)) =
                    segment_intersection(x_start, y_start, x_end, y_end, ax, ay, bx, by)
                {
                    if (-EDGE_PARAM_TOL..=1.0 + EDGE_PARAM_TOL).contains(&s)
                        && (-EDGE_PARAM_TOL..=1.0 + EDGE_PARAM_TOL).contains(&u)
                    {
                        crossings.push((s, vertex, u));
                    }
                }
            }
            let chosen = self.choose_crossing(host, &crossings);
            let (vertex, u) = match chosen {
                None => {
                    return Ok(PathlineTrace {
                        status: HostStatus::InDomain { host },
                        boundary: None,
                    })
                }
                Some((vertex, u)) => (vertex, u),
            };
            let (na, nb) = self.edge_nodes(host, vertex);
            let (ax, ay) = self.node_coordinates(na);
            let (bx, by) = self.node_coordinates(nb);
            match self.nbe()[[vertex, host]] {
                LAND_BOUNDARY | OPEN_BOUNDARY => {
                    let neighbour = self.nbe()[[vertex, host]];
                    let intersection = EdgeIntersection {
                        x1: ax,
                        y1: ay,
                        x2: bx,
                        y2: by,
                        xi: ax + u * (bx - ax),
                        yi: ay + u * (by - ay),
                    };
                    let status = if neighbour == LAND_BOUNDARY {
                        HostStatus::LandBoundaryCrossed { last_host: host }
                    } else {
                        HostStatus::OpenBoundaryCrossed { last_host: host }
                    };
                    return Ok(PathlineTrace {
                        status,
                        boundary: Some(intersection),
                    });
                }
                neighbour => {
                    entry_edge = Some((na.min(nb), na.max(nb)));
                    host = neighbour as usize;
                }
            }
        }
        Err(SearchError::TraceStalled {
            start: host_start,
            hops: max_hops,
        })
    }

    /// Earliest crossing with the tie-breaking rules applied.
    fn choose_crossing(
        &self,
        host: usize,
        crossings: &[(f64, usize, f64)],
    ) -> Option<(usize, f64)> {
        let s_min = crossings.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        if !s_min.is_finite() {
            return None;
        }
        let tied: Vec<(f64, usize, f64)> = crossings
            .iter()
            .copied()
            .filter(|(s, _, _)| (s - s_min).abs() <= TIE_TOL)
            .collect();
        tied.iter()
            .copied()
            .find(|&(_, vertex, _)| self.nbe()[[vertex, host]] >= 0)
            .or_else(|| {
                tied.iter()
                    .copied()
                    .find(|&(_, vertex, _)| self.nbe()[[vertex, host]] == LAND_BOUNDARY)
            })
            .or_else(|| tied.first().copied())
            .map(|(_, vertex, u)| (vertex, u))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::two_triangle_grid;

    #[test]
    fn local_search_keeps_a_valid_first_guess() {
        let grid = two_triangle_grid();
        let status = grid.find_host_using_local_search(0.25, 0.25, 0).unwrap();
        assert_eq!(status, HostStatus::InDomain { host: 0 });
    }

    #[test]
    fn local_search_walks_to_the_neighbour() {
        let grid = two_triangle_grid();
        let status = grid.find_host_using_local_search(0.75, 0.75, 0).unwrap();
        assert_eq!(status, HostStatus::InDomain { host: 1 });
    }

    #[test]
    fn local_search_reports_land_crossings() {
        let grid = two_triangle_grid();
        let status = grid.find_host_using_local_search(0.25, -0.5, 0).unwrap();
        assert_eq!(status, HostStatus::LandBoundaryCrossed { last_host: 0 });
    }

    #[test]
    fn local_search_reports_open_crossings() {
        let grid = two_triangle_grid();
        let status = grid.find_host_using_local_search(1.5, 0.6, 1).unwrap();
        assert_eq!(status, HostStatus::OpenBoundaryCrossed { last_host: 1 });
    }

    #[test]
    fn global_search_finds_each_element() {
        let grid = two_triangle_grid();
        assert_eq!(grid.find_host_using_global_search(0.25, 0.25), Some(0));
        assert_eq!(grid.find_host_using_global_search(0.75, 0.75), Some(1));
        assert_eq!(grid.find_host_using_global_search(2.0, 2.0), None);
    }

    #[test]
    fn tracing_follows_a_move_between_elements() {
        let grid = two_triangle_grid();
        let trace = grid
            .find_host_using_particle_tracing(0.25, 0.25, 0, 0.75, 0.75)
            .unwrap();
        assert_eq!(trace.status, HostStatus::InDomain { host: 1 });
        assert!(trace.boundary.is_none());
    }

    #[test]
    fn tracing_reports_the_crossed_land_edge() {
        let grid = two_triangle_grid();
        let trace = grid
            .find_host_using_particle_tracing(0.25, 0.25, 0, 0.25, -0.25)
            .unwrap();
        assert_eq!(trace.status, HostStatus::LandBoundaryCrossed { last_host: 0 });
        let edge = trace.boundary.unwrap();
        // bottom edge of element 0 runs along y = 0
        assert!(edge.y1.abs() < 1e-12);
        assert!(edge.y2.abs() < 1e-12);
        assert!((edge.xi - 0.25).abs() < 1e-9);
        assert!(edge.yi.abs() < 1e-9);
    }

    #[test]
    fn tracing_reports_open_boundary_escapes() {
        let grid = two_triangle_grid();
        let trace = grid
            .find_host_using_particle_tracing(0.75, 0.75, 1, 1.5, 0.75)
            .unwrap();
        assert_eq!(trace.status, HostStatus::OpenBoundaryCrossed { last_host: 1 });
        let edge = trace.boundary.unwrap();
        assert!((edge.xi - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tracing_keeps_short_moves_in_place() {
        let grid = two_triangle_grid();
        let trace = grid
            .find_host_using_particle_tracing(0.25, 0.25, 0, 0.26, 0.25)
            .unwrap();
        assert_eq!(trace.status, HostStatus::InDomain { host: 0 });
    }
}
