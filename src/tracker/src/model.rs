use crate::boundary::horizontal_boundary_from_config;
use crate::boundary::vertical_boundary_from_config;
use crate::boundary::BoundaryError;
use crate::boundary::HorizBcOutcome;
use crate::boundary::HorizBoundary;
use crate::boundary::VertBcOutcome;
use crate::boundary::VertBoundary;
use crate::config::ConfigError;
use crate::config::CoordinateSystemKind;
use crate::config::DepthCoordinatesKind;
use crate::config::HorizontalRandomWalkKind;
use crate::config::RunConfig;
use crate::config::VerticalRandomWalkKind;
use crate::mediator::Mediator;
use crate::num::num_method_from_config;
use crate::num::Delta;
use crate::num::NumMethod;
use crate::num::StageOutcome;
use crate::particle::Particle;
use crate::particle::ParticleStatus;
use crate::random_walk::horizontal_random_walk_from_config;
use crate::random_walk::vertical_random_walk_from_config;
use crate::random_walk::HorizontalRandomWalk;
use crate::random_walk::VerticalRandomWalk;
use crate::reader::DataReader;
use crate::reader::ReaderError;
use crate::reader::ReaderOptions;
use crate::seeding::sigma_to_z;
use crate::seeding::SeedArrays;
use crate::seeding::SeedingError;
use lagrs_grid::CoordinateSystem;
use lagrs_grid::HostStatus;
use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;

/// Reflections around a re-entrant land corner give up after this many
/// passes and snap the particle to its host centroid.
const LAND_BC_ITERATION_CAP: usize = 10;
/// Slack on the seed depth check, in metres.
const SEED_DEPTH_TOL: f64 = 1e-9;

/// The per-step particle update engine. Owns the active population, the
/// strategy objects resolved from configuration and the master random
/// generator; the reader, grid and frames are read-only during a step.
pub struct Model {
    reader: DataReader,
    num_method: Option<Box<dyn NumMethod>>,
    horizontal_random_walk: Option<Box<dyn HorizontalRandomWalk>>,
    vertical_random_walk: Option<Box<dyn VerticalRandomWalk>>,
    horizontal_boundary: Option<Box<dyn HorizBoundary>>,
    vertical_boundary: Box<dyn VertBoundary>,
    /// Signed step length in seconds.
    time_step: f64,
    depth_coordinates: DepthCoordinatesKind,
    depth_restoring: bool,
    fixed_depth_below_surface: f64,
    arrest_dry_cells: bool,
    master_seed: u64,
    rng: StdRng,
    step_index: u64,
    particles: Vec<Particle>,
    seed_particles: Vec<Particle>,
    land_snap_logged: Mutex<HashSet<i32>>,
}

/// Everything a single particle update needs, shared read-only across the
/// particle loop.
struct StepContext<'a> {
    reader: &'a DataReader,
    num_method: Option<&'a dyn NumMethod>,
    horizontal_random_walk: Option<&'a dyn HorizontalRandomWalk>,
    vertical_random_walk: Option<&'a dyn VerticalRandomWalk>,
    horizontal_boundary: Option<&'a dyn HorizBoundary>,
    vertical_boundary: &'a dyn VertBoundary,
    time: f64,
    time_next: f64,
    arrest_dry_cells: bool,
    depth_restoring: bool,
    fixed_depth_below_surface: f64,
    land_snap_logged: &'a Mutex<HashSet<i32>>,
}

impl Model {
    /// Ensure the reading frames bracket `t`. The only operation in a step
    /// that may block on the input provider; called once per step, outside
    /// the particle loop.
    pub fn read_data(&mut self, t: f64) -> Result<(), ModelError> {
        self.reader.read_data(t)?;
        Ok(())
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// The population as created by the last seeding, untouched by any
    /// step. Later releases and restarts start from this copy.
    pub fn seed_particles(&self) -> &[Particle] {
        &self.seed_particles
    }

    pub fn reader(&self) -> &DataReader {
        &self.reader
    }

    /// Create the particle population from seed arrays at time `time`. The
    /// built population is also retained as the seed copy, so later
    /// releases can restart from it. Seeds outside the mesh are created out
    /// of domain; seeds with depths outside the water column are fatal.
    pub fn set_particle_seed(&mut self, time: f64, seeds: &SeedArrays) -> Result<(), ModelError> {
        self.reader.read_data(time)?;
        let (x_offset, y_offset) = self.reader.grid().offsets();
        let mut particles = Vec::with_capacity(seeds.len());
        for i in 0..seeds.len() {
            let x = seeds.x_positions[i] - x_offset;
            let y = seeds.y_positions[i] - y_offset;
            let mut particle = Particle::new(seeds.group_ids[i], i as i32, x, y, 0.0);
            match self.reader.grid().find_host_using_global_search(x, y) {
                None => {
                    particle.in_domain = false;
                }
                Some(host) => {
                    particle.host = Some(host);
                    particle.in_domain = true;
                    self.reader.set_local_coordinates(&mut particle)?;
                    let zmin = self.reader.get_zmin(time, &particle)?;
                    let zmax = self.reader.get_zmax(time, &particle)?;
                    let z = match self.depth_coordinates {
                        DepthCoordinatesKind::Cartesian => seeds.z_positions[i] + zmax,
                        DepthCoordinatesKind::Sigma => {
                            sigma_to_z(seeds.z_positions[i], zmin, zmax)
                        }
                    };
                    if z < zmin - SEED_DEPTH_TOL || z > zmax + SEED_DEPTH_TOL {
                        return Err(ModelError::Seeding(SeedingError::DepthOutOfRange {
                            id: particle.id,
                            x: seeds.x_positions[i],
                            y: seeds.y_positions[i],
                            z,
                            zmin,
                            zmax,
                        }));
                    }
                    particle.x3 = z.clamp(zmin, zmax);
                    self.reader.set_vertical_grid_vars(time, &mut particle)?;
                }
            }
            particles.push(particle);
        }
        self.seed_particles = particles.clone();
        self.particles = particles;
        Ok(())
    }

    /// Advance every in-domain particle by one time step. Particle order has
    /// no observable effect on other particles; the population does not
    /// interact within a step.
    pub fn update(&mut self, time: f64) -> Result<(), ModelError> {
        let context = StepContext {
            reader: &self.reader,
            num_method: self.num_method.as_deref(),
            horizontal_random_walk: self.horizontal_random_walk.as_deref(),
            vertical_random_walk: self.vertical_random_walk.as_deref(),
            horizontal_boundary: self.horizontal_boundary.as_deref(),
            vertical_boundary: self.vertical_boundary.as_ref(),
            time,
            time_next: time + self.time_step,
            arrest_dry_cells: self.arrest_dry_cells,
            depth_restoring: self.depth_restoring,
            fixed_depth_below_surface: self.fixed_depth_below_surface,
            land_snap_logged: &self.land_snap_logged,
        };
        for particle in self.particles.iter_mut() {
            step_particle(&context, particle, &mut self.rng)?;
        }
        self.step_index += 1;
        Ok(())
    }

    /// As [`Model::update`], over worker threads. Each chunk draws from its
    /// own generator, derived from (master seed, step index, chunk index),
    /// so results are reproducible for a given chunk size.
    pub fn update_parallel(&mut self, time: f64, chunk_size: usize) -> Result<(), ModelError> {
        let context = StepContext {
            reader: &self.reader,
            num_method: self.num_method.as_deref(),
            horizontal_random_walk: self.horizontal_random_walk.as_deref(),
            vertical_random_walk: self.vertical_random_walk.as_deref(),
            horizontal_boundary: self.horizontal_boundary.as_deref(),
            vertical_boundary: self.vertical_boundary.as_ref(),
            time,
            time_next: time + self.time_step,
            arrest_dry_cells: self.arrest_dry_cells,
            depth_restoring: self.depth_restoring,
            fixed_depth_below_surface: self.fixed_depth_below_surface,
            land_snap_logged: &self.land_snap_logged,
        };
        let master_seed = self.master_seed;
        let step_index = self.step_index;
        self.particles
            .par_chunks_mut(chunk_size.max(1))
            .enumerate()
            .try_for_each(|(chunk_index, chunk)| -> Result<(), ModelError> {
                let mut rng = derive_rng(master_seed, step_index, chunk_index as u64);
                for particle in chunk.iter_mut() {
                    step_particle(&context, particle, &mut rng)?;
                }
                Ok(())
            })?;
        self.step_index += 1;
        Ok(())
    }
}

/// Stream-split a worker generator from the master seed. The scramble is
/// splitmix64, so adjacent chunk and step indices give unrelated streams.
fn derive_rng(master_seed: u64, step_index: u64, chunk_index: u64) -> StdRng {
    let mut state = master_seed
        ^ step_index.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ chunk_index.wrapping_mul(0xD1B5_4A32_D192_ED03);
    state = (state ^ (state >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    state = (state ^ (state >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(state ^ (state >> 31))
}

/// The per-particle pipeline: advect, add random-walk displacements,
/// classify the proposed move, arbitrate boundaries, commit.
fn step_particle(
    context: &StepContext<'_>,
    particle: &mut Particle,
    rng: &mut StdRng,
) -> Result<(), ModelError> {
    if !particle.in_domain || particle.status == ParticleStatus::Errored {
        return Ok(());
    }
    let mut delta = Delta::default();
    if let Some(num_method) = context.num_method {
        match num_method.advect(context.time, particle, context.reader, &mut delta)? {
            StageOutcome::Ok => {}
            StageOutcome::LeftDomain => {
                particle.in_domain = false;
                return Ok(());
            }
        }
    }
    if let Some(walk) = context.vertical_random_walk {
        walk.random_walk(context.time, particle, context.reader, &mut delta, rng)?;
    }
    if let Some(walk) = context.horizontal_random_walk {
        walk.random_walk(context.time, particle, context.reader, &mut delta, rng)?;
    }
    if context.arrest_dry_cells {
        if context.reader.is_wet(context.time, particle)? {
            particle.is_beached = false;
        } else {
            delta.x = 0.0;
            delta.y = 0.0;
            particle.is_beached = true;
        }
    }

    let z_proposed = particle.x3 + delta.z;
    let mut candidate = particle.clone();
    candidate.x1 = particle.x1 + delta.x;
    candidate.x2 = particle.x2 + delta.y;
    let mut flag = context.reader.find_host(particle, &mut candidate)?;

    let mut iterations = 0;
    loop {
        match flag {
            HostStatus::LandBoundaryCrossed { .. } => {}
            _ => break,
        }
        iterations += 1;
        if iterations > LAND_BC_ITERATION_CAP {
            let host = particle
                .host
                .ok_or(ModelError::MissingHost { id: particle.id })?;
            candidate.host = Some(host);
            context.reader.set_default_location(&mut candidate)?;
            flag = HostStatus::InDomain { host };
            if let Ok(mut logged) = context.land_snap_logged.lock() {
                if logged.insert(particle.id) {
                    warn!(
                        "particle {} trapped against land; snapped to its host centroid",
                        particle.id
                    );
                }
            }
            break;
        }
        match context.horizontal_boundary {
            None => {
                particle.status = ParticleStatus::Errored;
                particle.in_domain = false;
                return Ok(());
            }
            Some(boundary) => {
                match boundary.apply(context.reader, particle, candidate.x1, candidate.x2)? {
                    HorizBcOutcome::Moved { x, y } => {
                        candidate.x1 = x;
                        candidate.x2 = y;
                        flag = context.reader.find_host(particle, &mut candidate)?;
                    }
                    HorizBcOutcome::Cancelled => {
                        let host = particle
                            .host
                            .ok_or(ModelError::MissingHost { id: particle.id })?;
                        candidate.x1 = particle.x1;
                        candidate.x2 = particle.x2;
                        candidate.host = Some(host);
                        flag = HostStatus::InDomain { host };
                    }
                }
            }
        }
    }

    match flag {
        HostStatus::OpenBoundaryCrossed { .. } => {
            particle.in_domain = false;
            Ok(())
        }
        HostStatus::InDomain { host } => {
            particle.x1 = candidate.x1;
            particle.x2 = candidate.x2;
            particle.host = Some(host);
            context.reader.set_local_coordinates(particle)?;
            let zmin = context.reader.get_zmin(context.time_next, particle)?;
            let zmax = context.reader.get_zmax(context.time_next, particle)?;
            let mut z = z_proposed;
            if z < zmin || z > zmax {
                match context.vertical_boundary.apply(z, zmin, zmax) {
                    VertBcOutcome::Position(reflected) => z = reflected,
                    VertBcOutcome::LeftDomain => {
                        particle.in_domain = false;
                        return Ok(());
                    }
                }
            }
            if context.depth_restoring {
                z = (zmax + context.fixed_depth_below_surface).max(zmin);
            }
            particle.x3 = z;
            context.reader.set_vertical_grid_vars(context.time_next, particle)?;
            Ok(())
        }
        HostStatus::LandBoundaryCrossed { .. } => {
            Err(ModelError::UnresolvedLandCrossing { id: particle.id })
        }
    }
}

#[derive(Default)]
pub struct ModelBuilder<'a> {
    config: Option<&'a RunConfig>,
    mediator: Option<Box<dyn Mediator>>,
}

impl<'a> ModelBuilder<'a> {
    pub fn build(&mut self) -> Result<Model, ModelBuilderError> {
        let config = self
            .config
            .ok_or_else(|| ModelBuilderError::UninitializedFieldError("config".to_string()))?;
        let mediator = self
            .mediator
            .take()
            .ok_or_else(|| ModelBuilderError::UninitializedFieldError("mediator".to_string()))?;
        let schedule = config.schedule()?;
        let numerics = &config.numerics;
        let ocean = &config.ocean_circulation_model;
        if numerics.vertical_random_walk_model != VerticalRandomWalkKind::None && !ocean.has_kh {
            return Err(ModelBuilderError::VerticalRandomWalkWithoutKh);
        }
        if numerics.horizontal_random_walk_model != HorizontalRandomWalkKind::None && !ocean.has_ah
        {
            return Err(ModelBuilderError::HorizontalRandomWalkWithoutAh);
        }
        let options = ReaderOptions {
            coordinate_system: match ocean.coordinate_system {
                CoordinateSystemKind::Cartesian => CoordinateSystem::Cartesian,
                CoordinateSystemKind::Spherical => CoordinateSystem::Spherical,
            },
            has_kh: ocean.has_kh,
            has_ah: ocean.has_ah,
            has_is_wet: ocean.has_is_wet,
            environmental_variables: ocean.environmental_variables.clone(),
        };
        let end_seconds = (schedule.number_of_releases - 1) as f64
            * schedule.release_interval_seconds
            + schedule.time_direction * schedule.duration_seconds;
        let reader = DataReader::new(mediator, options, 0.0, end_seconds)?;
        let time_step = schedule.time_step * schedule.time_direction;
        let master_seed = config.simulation.seed;
        Ok(Model {
            reader,
            num_method: num_method_from_config(numerics.num_integrator, time_step),
            horizontal_random_walk: horizontal_random_walk_from_config(
                numerics.horizontal_random_walk_model,
                time_step,
            ),
            vertical_random_walk: vertical_random_walk_from_config(
                numerics.vertical_random_walk_model,
                time_step,
            ),
            horizontal_boundary: horizontal_boundary_from_config(
                config.boundary_conditions.horizontal,
            ),
            vertical_boundary: vertical_boundary_from_config(config.boundary_conditions.vertical),
            time_step,
            depth_coordinates: config.simulation.depth_coordinates,
            depth_restoring: config.simulation.depth_restoring,
            fixed_depth_below_surface: config.simulation.fixed_depth_below_surface,
            arrest_dry_cells: ocean.has_is_wet,
            master_seed,
            rng: StdRng::seed_from_u64(master_seed),
            step_index: 0,
            particles: Vec::new(),
            seed_particles: Vec::new(),
            land_snap_logged: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&mut self, config: &'a RunConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    pub fn mediator(&mut self, mediator: Box<dyn Mediator>) -> &mut Self {
        self.mediator = Some(mediator);
        self
    }
}

#[derive(Error, Debug)]
pub enum ModelBuilderError {
    #[error("Unitialized field on ModelBuilder: {0}")]
    UninitializedFieldError(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("a vertical random walk requires the circulation model to provide kh")]
    VerticalRandomWalkWithoutKh,
    #[error("a horizontal random walk requires the circulation model to provide viscofh")]
    HorizontalRandomWalkWithoutAh,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error(transparent)]
    Seeding(#[from] SeedingError),
    #[error("particle {id} has no host element")]
    MissingHost { id: i32 },
    #[error("land crossing of particle {id} was not arbitrated")]
    UnresolvedLandCrossing { id: i32 },
}
