use crate::config::SimulationSchedule;
use crate::model::Model;
use crate::model::ModelError;
use crate::particle::Particle;
use crate::seeding::SeedArrays;
use log::info;
use thiserror::Error;

/// Receives the population after seeding and after every committed step, in
/// particle-index order.
pub trait StepObserver {
    fn on_step(
        &mut self,
        release: u32,
        time_seconds: f64,
        particles: &[Particle],
    ) -> Result<(), std::io::Error>;
}

/// An observer that keeps per-step position records in memory.
#[derive(Debug, Default)]
pub struct PositionLog {
    pub records: Vec<PositionRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub release: u32,
    pub time_seconds: f64,
    pub id: i32,
    pub group_id: i32,
    pub x1: f64,
    pub x2: f64,
    pub x3: f64,
    pub in_domain: bool,
}

impl StepObserver for PositionLog {
    fn on_step(
        &mut self,
        release: u32,
        time_seconds: f64,
        particles: &[Particle],
    ) -> Result<(), std::io::Error> {
        for particle in particles {
            self.records.push(PositionRecord {
                release,
                time_seconds,
                id: particle.id,
                group_id: particle.group_id,
                x1: particle.x1,
                x2: particle.x2,
                x3: particle.x3,
                in_domain: particle.in_domain,
            });
        }
        Ok(())
    }
}

/// Drive the model through every release of the schedule: seed, then
/// advance t := t + dt until the release's end time, refreshing the reading
/// frames once per step before the particle loop. With `chunk_size` set,
/// the particle loop runs on worker threads in chunks of that size.
pub fn run(
    model: &mut Model,
    schedule: &SimulationSchedule,
    seeds: &SeedArrays,
    chunk_size: Option<usize>,
    observer: &mut dyn StepObserver,
) -> Result<(), SimulatorError> {
    let signed_step = schedule.time_step * schedule.time_direction;
    for release in 0..schedule.number_of_releases {
        let start = release as f64 * schedule.release_interval_seconds;
        model.set_particle_seed(start, seeds)?;
        info!(
            "release {}: {} particles seeded at t = {} s",
            release,
            model.particles().len(),
            start
        );
        observer.on_step(release, start, model.particles())?;
        let mut t = start;
        for _ in 0..schedule.steps_per_release {
            model.read_data(t)?;
            match chunk_size {
                None => model.update(t)?,
                Some(size) => model.update_parallel(t, size)?,
            }
            t += signed_step;
            observer.on_step(release, t, model.particles())?;
        }
        let in_domain = model
            .particles()
            .iter()
            .filter(|particle| particle.in_domain)
            .count();
        info!(
            "release {} finished at t = {} s with {} of {} particles in the domain",
            release,
            t,
            in_domain,
            model.particles().len()
        );
    }
    Ok(())
}

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Observer(#[from] std::io::Error),
}
