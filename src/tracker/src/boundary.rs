use crate::config::HorizontalBoundaryKind;
use crate::config::VerticalBoundaryKind;
use crate::particle::Particle;
use crate::reader::DataReader;
use crate::reader::ReaderError;
use thiserror::Error;

/// Reflections alternating between two bounds converge immediately for any
/// sane column; the cap guards degenerate near-dry columns.
const VERTICAL_REFLECTION_CAP: usize = 100;

/// What a horizontal boundary calculator did with a land-crossing move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HorizBcOutcome {
    /// The proposal was moved; classify the new position again.
    Moved { x: f64, y: f64 },
    /// The horizontal move is cancelled; the particle keeps its previous
    /// position and host.
    Cancelled,
}

/// Arbitrates moves that cross a land edge.
pub trait HorizBoundary: Send + Sync {
    fn apply(
        &self,
        reader: &DataReader,
        particle_old: &Particle,
        x_new: f64,
        y_new: f64,
    ) -> Result<HorizBcOutcome, BoundaryError>;
}

/// Mirror the proposed end point across the crossed land edge. Motion
/// parallel to the edge is conserved.
pub struct ReflectingHorizBoundary;

impl HorizBoundary for ReflectingHorizBoundary {
    fn apply(
        &self,
        reader: &DataReader,
        particle_old: &Particle,
        x_new: f64,
        y_new: f64,
    ) -> Result<HorizBcOutcome, BoundaryError> {
        let edge = reader.boundary_intersection(particle_old, x_new, y_new)?;
        let ex = edge.x2 - edge.x1;
        let ey = edge.y2 - edge.y1;
        let length = (ex * ex + ey * ey).sqrt();
        if length == 0.0 {
            return Err(BoundaryError::DegenerateEdge {
                x: edge.x1,
                y: edge.y1,
            });
        }
        let tx = ex / length;
        let ty = ey / length;
        let dx = x_new - edge.xi;
        let dy = y_new - edge.yi;
        let along = dx * tx + dy * ty;
        Ok(HorizBcOutcome::Moved {
            x: edge.xi + 2.0 * along * tx - dx,
            y: edge.yi + 2.0 * along * ty - dy,
        })
    }
}

/// Return a land-crossing particle to its last in-domain horizontal
/// position.
pub struct RestoringHorizBoundary;

impl HorizBoundary for RestoringHorizBoundary {
    fn apply(
        &self,
        _reader: &DataReader,
        _particle_old: &Particle,
        _x_new: f64,
        _y_new: f64,
    ) -> Result<HorizBcOutcome, BoundaryError> {
        Ok(HorizBcOutcome::Cancelled)
    }
}

/// What the vertical boundary calculator did with an out-of-column depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VertBcOutcome {
    Position(f64),
    LeftDomain,
}

/// Arbitrates depths outside [zmin, zmax].
pub trait VertBoundary: Send + Sync {
    fn apply(&self, z: f64, zmin: f64, zmax: f64) -> VertBcOutcome;
}

/// Mirror the depth at whichever bound it violates until it lies inside the
/// column. Applying the calculator to an in-range depth returns it
/// unchanged, so repeated application is stable.
pub struct ReflectingVertBoundary;

impl VertBoundary for ReflectingVertBoundary {
    fn apply(&self, z: f64, zmin: f64, zmax: f64) -> VertBcOutcome {
        if zmax <= zmin {
            return VertBcOutcome::Position(zmin);
        }
        let mut z = z;
        let mut iterations = 0;
        while z < zmin || z > zmax {
            if z < zmin {
                z = 2.0 * zmin - z;
            } else {
                z = 2.0 * zmax - z;
            }
            iterations += 1;
            if iterations > VERTICAL_REFLECTION_CAP {
                z = z.clamp(zmin, zmax);
                break;
            }
        }
        VertBcOutcome::Position(z)
    }
}

/// Flag particles that pierce the surface or floor out of the domain.
pub struct AbsorbingVertBoundary;

impl VertBoundary for AbsorbingVertBoundary {
    fn apply(&self, z: f64, zmin: f64, zmax: f64) -> VertBcOutcome {
        if z < zmin || z > zmax {
            VertBcOutcome::LeftDomain
        } else {
            VertBcOutcome::Position(z)
        }
    }
}

/// Build the configured horizontal calculator; `none` leaves land crossings
/// unhandled, which the orchestrator treats as a particle error.
pub fn horizontal_boundary_from_config(
    kind: HorizontalBoundaryKind,
) -> Option<Box<dyn HorizBoundary>> {
    match kind {
        HorizontalBoundaryKind::Reflecting => Some(Box::new(ReflectingHorizBoundary)),
        HorizontalBoundaryKind::Restoring => Some(Box::new(RestoringHorizBoundary)),
        HorizontalBoundaryKind::None => None,
    }
}

pub fn vertical_boundary_from_config(kind: VerticalBoundaryKind) -> Box<dyn VertBoundary> {
    match kind {
        VerticalBoundaryKind::Reflecting => Box::new(ReflectingVertBoundary),
        VerticalBoundaryKind::Absorbing => Box::new(AbsorbingVertBoundary),
    }
}

#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("boundary edge at ({x}, {y}) has zero length")]
    DegenerateEdge { x: f64, y: f64 },
}
