use crate::config::NumIntegratorKind;
use crate::particle::Particle;
use crate::reader::DataReader;
use crate::reader::ReaderError;
use lagrs_grid::HostStatus;

/// A position increment accumulated over one time step. Integrators and
/// random-walk models write into this; the particle itself is only mutated
/// at commit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Delta {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Delta {
    pub fn reset(&mut self) {
        *self = Delta::default();
    }
}

/// Whether an advection call produced a displacement or found the particle
/// leaving the domain mid-integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Ok,
    LeftDomain,
}

/// An advection scheme composing velocity samples into a displacement. The
/// time step is signed; backward runs carry a negative step.
pub trait NumMethod: Send + Sync {
    fn advect(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
    ) -> Result<StageOutcome, ReaderError>;
}

/// Single velocity sample at the particle, scaled by the time step.
pub struct StandardEuler {
    time_step: f64,
}

impl StandardEuler {
    pub fn new(time_step: f64) -> Self {
        StandardEuler { time_step }
    }
}

impl NumMethod for StandardEuler {
    fn advect(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
    ) -> Result<StageOutcome, ReaderError> {
        let velocity = reader.get_velocity(t, particle)?;
        delta.x += velocity[0] * self.time_step;
        delta.y += velocity[1] * self.time_step;
        delta.z += velocity[2] * self.time_step;
        Ok(StageOutcome::Ok)
    }
}

/// A particle displaced to an intermediate integration point, relocated on
/// the grid, or `None` when the point falls outside the domain.
fn stage_particle(
    reader: &DataReader,
    base: &Particle,
    stage_time: f64,
    scale: f64,
    k: &[f64; 3],
) -> Result<Option<Particle>, ReaderError> {
    let mut stage = base.clone();
    stage.x1 = base.x1 + scale * k[0];
    stage.x2 = base.x2 + scale * k[1];
    stage.x3 = base.x3 + scale * k[2];
    match reader.find_host(base, &mut stage)? {
        HostStatus::InDomain { .. } => {}
        _ => return Ok(None),
    }
    reader.set_local_coordinates(&mut stage)?;
    let zmin = reader.get_zmin(stage_time, &stage)?;
    let zmax = reader.get_zmax(stage_time, &stage)?;
    stage.x3 = reflect_into_column(stage.x3, zmin, zmax);
    reader.set_vertical_grid_vars(stage_time, &mut stage)?;
    Ok(Some(stage))
}

/// One mirror at whichever bound is violated, clamped so the result is
/// always inside the column.
fn reflect_into_column(z: f64, zmin: f64, zmax: f64) -> f64 {
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

/// Classical four-stage Runge-Kutta on (u, v, w), with host relocation at
/// every intermediate point. Any stage falling outside the domain abandons
/// the displacement.
pub struct Rk4 {
    time_step: f64,
}

impl Rk4 {
    pub fn new(time_step: f64) -> Self {
        Rk4 { time_step }
    }
}

impl NumMethod for Rk4 {
    fn advect(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
    ) -> Result<StageOutcome, ReaderError> {
        let dt = self.time_step;
        let k1 = reader.get_velocity(t, particle)?;
        let stage2 = match stage_particle(reader, particle, t + 0.5 * dt, 0.5 * dt, &k1)? {
            Some(stage) => stage,
            None => return Ok(StageOutcome::LeftDomain),
        };
        let k2 = reader.get_velocity(t + 0.5 * dt, &stage2)?;
        let stage3 = match stage_particle(reader, particle, t + 0.5 * dt, 0.5 * dt, &k2)? {
            Some(stage) => stage,
            None => return Ok(StageOutcome::LeftDomain),
        };
        let k3 = reader.get_velocity(t + 0.5 * dt, &stage3)?;
        let stage4 = match stage_particle(reader, particle, t + dt, dt, &k3)? {
            Some(stage) => stage,
            None => return Ok(StageOutcome::LeftDomain),
        };
        let k4 = reader.get_velocity(t + dt, &stage4)?;
        delta.x += dt / 6.0 * (k1[0] + 2.0 * k2[0] + 2.0 * k3[0] + k4[0]);
        delta.y += dt / 6.0 * (k1[1] + 2.0 * k2[1] + 2.0 * k3[1] + k4[1]);
        delta.z += dt / 6.0 * (k1[2] + 2.0 * k2[2] + 2.0 * k3[2] + k4[2]);
        Ok(StageOutcome::Ok)
    }
}

/// Operator-split scheme: four-stage Runge-Kutta in the horizontal with the
/// vertical held fixed, and a single Euler sample for the vertical.
pub struct Rk4HorizEulerVert {
    time_step: f64,
}

impl Rk4HorizEulerVert {
    pub fn new(time_step: f64) -> Self {
        Rk4HorizEulerVert { time_step }
    }
}

impl NumMethod for Rk4HorizEulerVert {
    fn advect(
        &self,
        t: f64,
        particle: &Particle,
        reader: &DataReader,
        delta: &mut Delta,
    ) -> Result<StageOutcome, ReaderError> {
        let dt = self.time_step;
        let k1 = reader.get_velocity(t, particle)?;
        let horizontal = |k: &[f64; 3]| [k[0], k[1], 0.0];
        let stage2 =
            match stage_particle(reader, particle, t + 0.5 * dt, 0.5 * dt, &horizontal(&k1))? {
                Some(stage) => stage,
                None => return Ok(StageOutcome::LeftDomain),
            };
        let k2 = reader.get_velocity(t + 0.5 * dt, &stage2)?;
        let stage3 =
            match stage_particle(reader, particle, t + 0.5 * dt, 0.5 * dt, &horizontal(&k2))? {
                Some(stage) => stage,
                None => return Ok(StageOutcome::LeftDomain),
            };
        let k3 = reader.get_velocity(t + 0.5 * dt, &stage3)?;
        let stage4 = match stage_particle(reader, particle, t + dt, dt, &horizontal(&k3))? {
            Some(stage) => stage,
            None => return Ok(StageOutcome::LeftDomain),
        };
        let k4 = reader.get_velocity(t + dt, &stage4)?;
        delta.x += dt / 6.0 * (k1[0] + 2.0 * k2[0] + 2.0 * k3[0] + k4[0]);
        delta.y += dt / 6.0 * (k1[1] + 2.0 * k2[1] + 2.0 * k3[1] + k4[1]);
        delta.z += k1[2] * dt;
        Ok(StageOutcome::Ok)
    }
}

/// Build the configured advection scheme, or `None` for diffusion-only
/// runs. `time_step` is signed by the direction of integration.
pub fn num_method_from_config(
    kind: NumIntegratorKind,
    time_step: f64,
) -> Option<Box<dyn NumMethod>> {
    match kind {
        NumIntegratorKind::None => None,
        NumIntegratorKind::Euler => Some(Box::new(StandardEuler::new(time_step))),
        NumIntegratorKind::Rk4 => Some(Box::new(Rk4::new(time_step))),
        NumIntegratorKind::Rk4HorizEulerVert => {
            Some(Box::new(Rk4HorizEulerVert::new(time_step)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::InMemoryMediator;
    use crate::reader::ReaderOptions;
    use crate::synthetic::channel_grid;
    use crate::synthetic::ChannelOptions;
    use crate::synthetic::UniformFlow;

    fn uniform_reader(u: f64, v: f64, w: f64) -> DataReader {
        let grid = channel_grid(&ChannelOptions::default());
        let flow = UniformFlow {
            u,
            v,
            w,
            ..UniformFlow::default()
        };
        let snapshots = flow.snapshots(&grid, &[0.0, 1000.0]);
        let mediator = InMemoryMediator::new(grid, snapshots).unwrap();
        DataReader::new(Box::new(mediator), ReaderOptions::default(), 0.0, 1000.0).unwrap()
    }

    fn placed_particle(reader: &DataReader, x: f64, y: f64, z: f64) -> Particle {
        let mut particle = Particle::new(0, 0, x, y, z);
        particle.host = reader.grid().find_host_using_global_search(x, y);
        particle.in_domain = true;
        reader.set_local_coordinates(&mut particle).unwrap();
        reader.set_vertical_grid_vars(0.0, &mut particle).unwrap();
        particle
    }

    #[test]
    fn euler_scales_the_velocity_by_the_time_step() {
        let reader = uniform_reader(1.0, 0.5, -0.01);
        let particle = placed_particle(&reader, 1.0, 0.5, -5.0);
        let mut delta = Delta::default();
        let outcome = StandardEuler::new(2.0)
            .advect(0.0, &particle, &reader, &mut delta)
            .unwrap();
        assert_eq!(outcome, StageOutcome::Ok);
        assert!((delta.x - 2.0).abs() < 1e-12);
        assert!((delta.y - 1.0).abs() < 1e-12);
        assert!((delta.z + 0.02).abs() < 1e-12);
    }

    #[test]
    fn rk4_matches_euler_in_uniform_flow() {
        let reader = uniform_reader(0.8, 0.0, 0.0);
        let particle = placed_particle(&reader, 1.0, 0.5, -5.0);
        let mut delta = Delta::default();
        let outcome = Rk4::new(1.0)
            .advect(0.0, &particle, &reader, &mut delta)
            .unwrap();
        assert_eq!(outcome, StageOutcome::Ok);
        assert!((delta.x - 0.8).abs() < 1e-12);
        assert!(delta.y.abs() < 1e-12);
        assert!(delta.z.abs() < 1e-12);
    }

    #[test]
    fn rk4_reports_stages_that_leave_the_domain() {
        let reader = uniform_reader(4.0, 0.0, 0.0);
        // a half step of 2 m from x = 7.5 crosses the open end at x = 8
        let particle = placed_particle(&reader, 7.5, 0.5, -5.0);
        let mut delta = Delta::default();
        let outcome = Rk4::new(1.0)
            .advect(0.0, &particle, &reader, &mut delta)
            .unwrap();
        assert_eq!(outcome, StageOutcome::LeftDomain);
        assert_eq!(delta, Delta::default());
    }

    #[test]
    fn operator_split_keeps_the_vertical_euler() {
        let reader = uniform_reader(0.5, 0.0, -0.02);
        let particle = placed_particle(&reader, 1.0, 0.5, -5.0);
        let mut delta = Delta::default();
        Rk4HorizEulerVert::new(1.0)
            .advect(0.0, &particle, &reader, &mut delta)
            .unwrap();
        assert!((delta.x - 0.5).abs() < 1e-12);
        assert!((delta.z + 0.02).abs() < 1e-12);
    }

    #[test]
    fn reflect_into_column_stays_inside() {
        assert_eq!(reflect_into_column(-11.0, -10.0, 0.0), -9.0);
        assert_eq!(reflect_into_column(0.5, -10.0, 0.0), -0.5);
        assert_eq!(reflect_into_column(-5.0, -10.0, 0.0), -5.0);
    }
}
