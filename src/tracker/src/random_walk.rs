use crate::config::HorizontalRandomWalkKind;
use crate::config::VerticalRandomWalkKind;
use crate::num::Delta;
use crate::particle::Particle;
use crate::reader::DataReader;
use crate::reader::ReaderError;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Stochastic horizontal displacement added on top of advection. Models
/// draw Gaussian deviates from the generator threaded through the step
/// orchestrator; they never own random state.
pub trait HorizontalRandomWalk: Send + Sync {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError>;
}

/// Stochastic vertical displacement.
pub trait VerticalRandomWalk: Send + Sync {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError>;
}

/// Horizontal diffusion without a drift correction:
/// dx = sqrt(2 Ah dt) xi.
pub struct NaiveHorizontalRandomWalk {
    time_step: f64,
}

impl NaiveHorizontalRandomWalk {
    pub fn new(time_step: f64) -> Self {
        NaiveHorizontalRandomWalk { time_step }
    }
}

impl HorizontalRandomWalk for NaiveHorizontalRandomWalk {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError> {
        let ah = reader.get_horizontal_eddy_viscosity(t, particle)?;
        let amplitude = (2.0 * ah * self.time_step.abs()).sqrt();
        let xi_x: f64 = rng.sample(StandardNormal);
        let xi_y: f64 = rng.sample(StandardNormal);
        delta.x += amplitude * xi_x;
        delta.y += amplitude * xi_y;
        Ok(())
    }
}

/// Drift-corrected horizontal diffusion:
/// dx = (dAh/dx) dt + sqrt(2 Ah dt) xi, and likewise in y. The gradient
/// drift keeps particle densities well mixed where Ah varies in space.
pub struct VisserHorizontalRandomWalk {
    time_step: f64,
}

impl VisserHorizontalRandomWalk {
    pub fn new(time_step: f64) -> Self {
        VisserHorizontalRandomWalk { time_step }
    }
}

impl HorizontalRandomWalk for VisserHorizontalRandomWalk {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError> {
        let ah = reader.get_horizontal_eddy_viscosity(t, particle)?;
        let (dah_dx, dah_dy) = reader.get_horizontal_eddy_viscosity_derivative(t, particle)?;
        let amplitude = (2.0 * ah * self.time_step.abs()).sqrt();
        let xi_x: f64 = rng.sample(StandardNormal);
        let xi_y: f64 = rng.sample(StandardNormal);
        delta.x += dah_dx * self.time_step + amplitude * xi_x;
        delta.y += dah_dy * self.time_step + amplitude * xi_y;
        Ok(())
    }
}

/// Vertical diffusion without a drift correction:
/// dz = sqrt(2 Kh dt) xi. Accumulates particles where Kh is small; kept for
/// comparison runs.
pub struct NaiveVerticalRandomWalk {
    time_step: f64,
}

impl NaiveVerticalRandomWalk {
    pub fn new(time_step: f64) -> Self {
        NaiveVerticalRandomWalk { time_step }
    }
}

impl VerticalRandomWalk for NaiveVerticalRandomWalk {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError> {
        let kh = reader.get_vertical_eddy_diffusivity(t, particle)?;
        let xi: f64 = rng.sample(StandardNormal);
        delta.z += (2.0 * kh * self.time_step.abs()).sqrt() * xi;
        Ok(())
    }
}

/// Visser's drift-corrected vertical scheme:
/// dz = Kh'(z) dt + sqrt(2 dt Kh(z + Kh' dt / 2)) xi.
///
/// The diffusivity under the square root is sampled at the offset point
/// z + Kh' dt / 2, which is what preserves the well-mixed condition in a
/// vertically varying Kh.
pub struct VisserVerticalRandomWalk {
    time_step: f64,
}

impl VisserVerticalRandomWalk {
    pub fn new(time_step: f64) -> Self {
        VisserVerticalRandomWalk { time_step }
    }
}

impl VerticalRandomWalk for VisserVerticalRandomWalk {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError> {
        let dkh_dz = reader.get_vertical_eddy_diffusivity_derivative(t, particle)?;
        let zmin = reader.get_zmin(t, particle)?;
        let zmax = reader.get_zmax(t, particle)?;
        let mut probe = particle.clone();
        probe.x3 = offset_into_column(
            particle.x3 + 0.5 * dkh_dz * self.time_step,
            zmin,
            zmax,
        );
        reader.set_vertical_grid_vars(t, &mut probe)?;
        let kh = reader.get_vertical_eddy_diffusivity(t, &probe)?;
        let xi: f64 = rng.sample(StandardNormal);
        delta.z += dkh_dz * self.time_step + (2.0 * kh * self.time_step.abs()).sqrt() * xi;
        Ok(())
    }
}

/// Milstein scheme for the vertical diffusion SDE:
/// dz = Kh'/2 dt (xi^2 + 1) + sqrt(2 Kh dt) xi, with Kh and Kh' at the
/// current position.
pub struct MilsteinVerticalRandomWalk {
    time_step: f64,
}

impl MilsteinVerticalRandomWalk {
    pub fn new(time_step: f64) -> Self {
        MilsteinVerticalRandomWalk { time_step }
    }
}

impl VerticalRandomWalk for MilsteinVerticalRandomWalk {
    fn random_walk(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
        rng: &mut StdRng,
    ) -> Result<(), ReaderError> {
        let kh = reader.get_vertical_eddy_diffusivity(t, particle)?;
        let dkh_dz = reader.get_vertical_eddy_diffusivity_derivative(t, particle)?;
        let xi: f64 = rng.sample(StandardNormal);
        delta.z += 0.5 * dkh_dz * self.time_step * (xi * xi + 1.0)
            + (2.0 * kh * self.time_step.abs()).sqrt() * xi;
        Ok(())
    }
}

/// Mirror the drift-corrected sample point back into the water column.
fn offset_into_column(z: f64, zmin: f64, zmax: f64) -> f64 {
    if zmax <= zmin {
        return zmin;
    }
    if z < zmin {
        (2.0 * zmin - z).min(zmax)
    } else if z > zmax {
        (2.0 * zmax - z).max(zmin)
    } else {
        z
    }
}

pub fn horizontal_random_walk_from_config(
    kind: HorizontalRandomWalkKind,
    time_step: f64,
) -> Option<Box<dyn HorizontalRandomWalk>> {
    match kind {
        HorizontalRandomWalkKind::None => None,
        HorizontalRandomWalkKind::Naive => {
            Some(Box::new(NaiveHorizontalRandomWalk::new(time_step)))
        }
        HorizontalRandomWalkKind::Visser => {
            Some(Box::new(VisserHorizontalRandomWalk::new(time_step)))
        }
    }
}

pub fn vertical_random_walk_from_config(
    kind: VerticalRandomWalkKind,
    time_step: f64,
) -> Option<Box<dyn VerticalRandomWalk>> {
    match kind {
        VerticalRandomWalkKind::None => None,
        VerticalRandomWalkKind::Naive => Some(Box::new(NaiveVerticalRandomWalk::new(time_step))),
        VerticalRandomWalkKind::Visser => Some(Box::new(VisserVerticalRandomWalk::new(time_step))),
        VerticalRandomWalkKind::Milstein => {
            Some(Box::new(MilsteinVerticalRandomWalk::new(time_step)))
        }
    }
}
