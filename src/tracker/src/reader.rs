use crate::mediator::FrameSlot;
use crate::mediator::Mediator;
use crate::mediator::MediatorError;
use crate::particle::Particle;
use crate::seeding::sigma_to_z;
use crate::seeding::z_to_sigma;
use lagrs_grid::interp::interpolate_within_element;
use lagrs_grid::interp::linear_fraction;
use lagrs_grid::interp::linear_fraction_safe;
use lagrs_grid::interp::linear_interp;
use lagrs_grid::interp::shepard_interpolation;
use lagrs_grid::mesh::UnstructuredGridBuilderError;
use lagrs_grid::CoordinateSystem;
use lagrs_grid::EdgeIntersection;
use lagrs_grid::HostStatus;
use lagrs_grid::SearchError;
use lagrs_grid::UnstructuredGrid;
use lagrs_grid::UnstructuredGridBuilder;
use linked_hash_map::LinkedHashMap;
use log::debug;
use ndarray::Array1;
use ndarray::Array2;
use thiserror::Error;

/// Slack on sigma bracket tests; sigma is dimensionless.
const SIGMA_TOL: f64 = 1e-9;

/// Circulation-model capabilities and reader behaviour, resolved from
/// configuration.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub coordinate_system: CoordinateSystem,
    pub has_kh: bool,
    pub has_ah: bool,
    pub has_is_wet: bool,
    /// Names of tracer fields to carry through the reading frames.
    pub environmental_variables: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            coordinate_system: CoordinateSystem::Cartesian,
            has_kh: false,
            has_ah: false,
            has_is_wet: false,
            environmental_variables: Vec::new(),
        }
    }
}

/// One buffered reading frame.
#[derive(Debug, Clone)]
struct Frame {
    zeta: Array1<f64>,
    u: Array2<f64>,
    v: Array2<f64>,
    w: Array2<f64>,
    kh: Option<Array2<f64>>,
    viscofh: Option<Array2<f64>>,
    wet_cells: Option<Array1<f64>>,
    tracers: LinkedHashMap<String, Array2<f64>>,
}

impl Frame {
    fn load(
        mediator: &dyn Mediator,
        slot: FrameSlot,
        options: &ReaderOptions,
        grid: &UnstructuredGrid,
    ) -> Result<Frame, ReaderError> {
        let n_nodes = grid.n_nodes();
        let n_elems = grid.n_elems();
        let n_siglay = grid.n_siglay();
        let n_siglev = grid.n_siglev();
        let zeta = mediator.frame_variable_1d("zeta", slot)?;
        check_1d("zeta", &zeta, n_nodes)?;
        let u = mediator.frame_variable_2d("u", slot)?;
        check_2d("u", &u, [n_siglay, n_elems])?;
        let v = mediator.frame_variable_2d("v", slot)?;
        check_2d("v", &v, [n_siglay, n_elems])?;
        let w = mediator.frame_variable_2d("ww", slot)?;
        check_2d("ww", &w, [n_siglay, n_elems])?;
        let kh = if options.has_kh {
            let kh = mediator.frame_variable_2d("kh", slot)?;
            check_2d("kh", &kh, [n_siglev, n_nodes])?;
            Some(kh)
        } else {
            None
        };
        let viscofh = if options.has_ah {
            let viscofh = mediator.frame_variable_2d("viscofh", slot)?;
            check_2d("viscofh", &viscofh, [n_siglay, n_nodes])?;
            Some(viscofh)
        } else {
            None
        };
        let wet_cells = if options.has_is_wet && mediator.has_frame_variable("wet_cells") {
            let wet_cells = mediator.frame_variable_1d("wet_cells", slot)?;
            check_1d("wet_cells", &wet_cells, n_elems)?;
            Some(wet_cells)
        } else {
            None
        };
        let mut tracers = LinkedHashMap::new();
        for name in &options.environmental_variables {
            let values = mediator.frame_variable_2d(name, slot)?;
            check_2d(name, &values, [n_siglay, n_nodes])?;
            tracers.insert(name.clone(), values);
        }
        Ok(Frame {
            zeta,
            u,
            v,
            w,
            kh,
            viscofh,
            wet_cells,
            tracers,
        })
    }
}

fn check_1d(name: &str, values: &Array1<f64>, expected: usize) -> Result<(), ReaderError> {
    if values.len() != expected {
        return Err(ReaderError::BadFieldShape {
            name: name.to_string(),
            actual: vec![values.len()],
            expected: vec![expected],
        });
    }
    Ok(())
}

fn check_2d(name: &str, values: &Array2<f64>, expected: [usize; 2]) -> Result<(), ReaderError> {
    if values.shape() != expected {
        return Err(ReaderError::BadFieldShape {
            name: name.to_string(),
            actual: values.shape().to_vec(),
            expected: expected.to_vec(),
        });
    }
    Ok(())
}

/// Serves velocity, diffusivities, bathymetry, the free surface and tracers
/// at a particle's position and time by interpolation between the two
/// buffered frames, and locates host elements on the grid.
pub struct DataReader {
    grid: UnstructuredGrid,
    mediator: Box<dyn Mediator>,
    options: ReaderOptions,
    last: Frame,
    next: Frame,
    t_last: f64,
    t_next: f64,
    time_direction: f64,
}

impl DataReader {
    /// Build the grid from the mediator's static arrays, set up data access
    /// for `[start_seconds, end_seconds]` and buffer the first frame pair.
    pub fn new(
        mut mediator: Box<dyn Mediator>,
        options: ReaderOptions,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<DataReader, ReaderError> {
        let nv = mediator.grid_connectivity("nv")?;
        let nbe = mediator.grid_connectivity("nbe")?;
        let x = mediator.grid_variable_1d("x")?;
        let y = mediator.grid_variable_1d("y")?;
        let xc = mediator.grid_variable_1d("xc")?;
        let yc = mediator.grid_variable_1d("yc")?;
        let siglev = mediator.grid_variable_2d("siglev")?;
        let siglay = mediator.grid_variable_2d("siglay")?;
        let h = mediator.grid_variable_1d("h")?;
        let grid = UnstructuredGridBuilder::default()
            .nv(&nv)
            .nbe(&nbe)
            .x(&x)
            .y(&y)
            .xc(&xc)
            .yc(&yc)
            .siglev(&siglev)
            .siglay(&siglay)
            .h(&h)
            .coordinate_system(&options.coordinate_system)
            .build()?;
        debug!(
            "grid loaded: {} nodes, {} elements, {} sigma layers",
            grid.n_nodes(),
            grid.n_elems(),
            grid.n_siglay()
        );
        mediator.setup_data_access(start_seconds, end_seconds)?;
        let (t_last, t_next) = mediator.frame_times();
        let last = Frame::load(mediator.as_ref(), FrameSlot::Last, &options, &grid)?;
        let next = Frame::load(mediator.as_ref(), FrameSlot::Next, &options, &grid)?;
        let time_direction = if end_seconds < start_seconds { -1.0 } else { 1.0 };
        Ok(DataReader {
            grid,
            mediator,
            options,
            last,
            next,
            t_last,
            t_next,
            time_direction,
        })
    }

    pub fn grid(&self) -> &UnstructuredGrid {
        &self.grid
    }

    pub fn time_direction(&self) -> f64 {
        self.time_direction
    }

    pub fn has_kh(&self) -> bool {
        self.options.has_kh
    }

    pub fn has_ah(&self) -> bool {
        self.options.has_ah
    }

    pub fn has_is_wet(&self) -> bool {
        self.options.has_is_wet
    }

    /// Ensure the buffered frames bracket `t`, advancing them through the
    /// mediator when the interpolation fraction falls outside [0, 1). The
    /// check reads identically for forward and backward runs because the
    /// fraction is signed by the frame ordering.
    pub fn read_data(&mut self, t: f64) -> Result<(), ReaderError> {
        let tau = linear_fraction(t, self.t_last, self.t_next);
        if !(0.0..1.0).contains(&tau) {
            self.mediator.update_reading_frames(t)?;
            let (t_last, t_next) = self.mediator.frame_times();
            if (t_last, t_next) != (self.t_last, self.t_next) {
                self.t_last = t_last;
                self.t_next = t_next;
                self.last =
                    Frame::load(self.mediator.as_ref(), FrameSlot::Last, &self.options, &self.grid)?;
                self.next =
                    Frame::load(self.mediator.as_ref(), FrameSlot::Next, &self.options, &self.grid)?;
                debug!("reading frames advanced to [{}, {}] s", t_last, t_next);
            }
        }
        Ok(())
    }

    fn tau(&self, t: f64) -> f64 {
        linear_fraction_safe(t, self.t_last, self.t_next)
    }

    fn require_host(&self, particle: &Particle) -> Result<usize, ReaderError> {
        particle
            .host
            .ok_or(ReaderError::NoHostElement { id: particle.id })
    }

    /// Two-phase host search: the cheap barycentric walk first, with
    /// pathline tracing to separate genuine boundary crossings from walk
    /// failures around concave neighbourhoods. Sets the host on
    /// `particle_new`: the containing element, or the last interior element
    /// before a crossing.
    pub fn find_host(
        &self,
        particle_old: &Particle,
        particle_new: &mut Particle,
    ) -> Result<HostStatus, ReaderError> {
        let first_guess = self.require_host(particle_old)?;
        let status =
            self.grid
                .find_host_using_local_search(particle_new.x1, particle_new.x2, first_guess)?;
        if let HostStatus::InDomain { host } = status {
            particle_new.host = Some(host);
            return Ok(status);
        }
        let trace = self.grid.find_host_using_particle_tracing(
            particle_old.x1,
            particle_old.x2,
            first_guess,
            particle_new.x1,
            particle_new.x2,
        )?;
        particle_new.host = Some(trace.status.element());
        Ok(trace.status)
    }

    /// The edge crossed by the move from `particle_old` towards
    /// `(x_new, y_new)`, with its parametric intersection point.
    pub fn boundary_intersection(
        &self,
        particle_old: &Particle,
        x_new: f64,
        y_new: f64,
    ) -> Result<EdgeIntersection, ReaderError> {
        let host = self.require_host(particle_old)?;
        let trace = self.grid.find_host_using_particle_tracing(
            particle_old.x1,
            particle_old.x2,
            host,
            x_new,
            y_new,
        )?;
        trace
            .boundary
            .ok_or(ReaderError::NoBoundaryCrossed { id: particle_old.id })
    }

    /// Recompute the barycentric coordinates in the current host, clamping
    /// roundoff so the triple stays in range and sums to one.
    pub fn set_local_coordinates(&self, particle: &mut Particle) -> Result<(), ReaderError> {
        let host = self.require_host(particle)?;
        particle.phi = self.grid.clamped_phi(particle.x1, particle.x2, host);
        Ok(())
    }

    /// Snap the particle onto its host element's centroid.
    pub fn set_default_location(&self, particle: &mut Particle) -> Result<(), ReaderError> {
        let host = self.require_host(particle)?;
        let (xc, yc) = self.grid.centroid(host);
        particle.x1 = xc;
        particle.x2 = yc;
        self.set_local_coordinates(particle)
    }

    /// Sea-floor depth below the geoid at the particle, negative downward.
    pub fn get_zmin(&self, _t: f64, particle: &Particle) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = self.grid.bathymetry_at_node(*node);
        }
        Ok(-interpolate_within_element(&vals, &particle.phi))
    }

    /// Free-surface elevation at the particle and time.
    pub fn get_zmax(&self, t: f64, particle: &Particle) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let tau = self.tau(t);
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = linear_interp(tau, self.last.zeta[*node], self.next.zeta[*node]);
        }
        Ok(interpolate_within_element(&vals, &particle.phi))
    }

    fn sigma_at_level(&self, level: usize, host: usize, phi: &[f64; 3]) -> f64 {
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = self.grid.siglev_at_node(level, *node);
        }
        interpolate_within_element(&vals, phi)
    }

    fn sigma_at_layer(&self, layer: usize, host: usize, phi: &[f64; 3]) -> f64 {
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = self.grid.siglay_at_node(layer, *node);
        }
        interpolate_within_element(&vals, phi)
    }

    /// Place the particle in the vertical grid: host sigma layer, bounding
    /// layer midpoints and the interpolation fractions against levels and
    /// midpoints. Particles above the top midpoint or below the bottom one
    /// sit in a vertical boundary layer where interpolation collapses to
    /// the boundary layer's value.
    pub fn set_vertical_grid_vars(
        &self,
        t: f64,
        particle: &mut Particle,
    ) -> Result<(), ReaderError> {
        let host = self.require_host(particle)?;
        let zmin = self.get_zmin(t, particle)?;
        let zmax = self.get_zmax(t, particle)?;
        let sigma = z_to_sigma(particle.x3, zmin, zmax);
        let n_siglay = self.grid.n_siglay();
        let mut bracket = None;
        for k in 0..n_siglay {
            let sig_upper = self.sigma_at_level(k, host, &particle.phi);
            let sig_lower = self.sigma_at_level(k + 1, host, &particle.phi);
            if sigma <= sig_upper + SIGMA_TOL && sigma >= sig_lower - SIGMA_TOL {
                bracket = Some((k, sig_upper, sig_lower));
                break;
            }
        }
        let (k, sig_upper_level, sig_lower_level) = bracket.ok_or(ReaderError::NoSigmaBracket {
            id: particle.id,
            sigma,
        })?;
        particle.k_layer = k;
        particle.omega_interfaces =
            linear_fraction_safe(sigma, sig_lower_level, sig_upper_level);
        let sig_mid = self.sigma_at_layer(k, host, &particle.phi);
        if (k == 0 && sigma >= sig_mid) || (k == n_siglay - 1 && sigma <= sig_mid) {
            particle.in_vertical_boundary_layer = true;
            particle.k_upper_layer = k;
            particle.k_lower_layer = k;
            particle.omega_layers = if k == 0 { 1.0 } else { 0.0 };
        } else if sigma >= sig_mid {
            particle.in_vertical_boundary_layer = false;
            particle.k_upper_layer = k - 1;
            particle.k_lower_layer = k;
            let sig_mid_upper = self.sigma_at_layer(k - 1, host, &particle.phi);
            particle.omega_layers = linear_fraction_safe(sigma, sig_mid, sig_mid_upper);
        } else {
            particle.in_vertical_boundary_layer = false;
            particle.k_upper_layer = k;
            particle.k_lower_layer = k + 1;
            let sig_mid_lower = self.sigma_at_layer(k + 1, host, &particle.phi);
            particle.omega_layers = linear_fraction_safe(sigma, sig_mid_lower, sig_mid);
        }
        Ok(())
    }

    fn centre_velocity(&self, tau: f64, layer: usize, elem: usize) -> (f64, f64, f64) {
        (
            linear_interp(tau, self.last.u[[layer, elem]], self.next.u[[layer, elem]]),
            linear_interp(tau, self.last.v[[layer, elem]], self.next.v[[layer, elem]]),
            linear_interp(tau, self.last.w[[layer, elem]], self.next.w[[layer, elem]]),
        )
    }

    /// Shepard interpolation of the cell-centred velocity to the particle,
    /// over the host centre and its interior neighbours.
    fn shepard_velocity(
        &self,
        tau: f64,
        layer: usize,
        host: usize,
        particle: &Particle,
    ) -> [f64; 3] {
        let mut xs: Vec<f64> = Vec::with_capacity(4);
        let mut ys: Vec<f64> = Vec::with_capacity(4);
        let mut us: Vec<f64> = Vec::with_capacity(4);
        let mut vs: Vec<f64> = Vec::with_capacity(4);
        let mut ws: Vec<f64> = Vec::with_capacity(4);
        let push = |elem: usize,
                    xs: &mut Vec<f64>,
                    ys: &mut Vec<f64>,
                    us: &mut Vec<f64>,
                    vs: &mut Vec<f64>,
                    ws: &mut Vec<f64>| {
            let (xc, yc) = self.grid.centroid(elem);
            let (u, v, w) = self.centre_velocity(tau, layer, elem);
            xs.push(xc);
            ys.push(yc);
            us.push(u);
            vs.push(v);
            ws.push(w);
        };
        push(host, &mut xs, &mut ys, &mut us, &mut vs, &mut ws);
        for vertex in 0..3 {
            let neighbour = self.grid.nbe()[[vertex, host]];
            if neighbour >= 0 {
                push(
                    neighbour as usize,
                    &mut xs,
                    &mut ys,
                    &mut us,
                    &mut vs,
                    &mut ws,
                );
            }
        }
        [
            shepard_interpolation(particle.x1, particle.x2, &xs, &ys, &us),
            shepard_interpolation(particle.x1, particle.x2, &xs, &ys, &vs),
            shepard_interpolation(particle.x1, particle.x2, &xs, &ys, &ws),
        ]
    }

    /// Velocity (u, v, w) at the particle and time. `w` is the geometric
    /// vertical velocity served by the circulation model.
    pub fn get_velocity(&self, t: f64, particle: &Particle) -> Result<[f64; 3], ReaderError> {
        let host = self.require_host(particle)?;
        let tau = self.tau(t);
        if particle.in_vertical_boundary_layer {
            return Ok(self.shepard_velocity(tau, particle.k_layer, host, particle));
        }
        let lower = self.shepard_velocity(tau, particle.k_lower_layer, host, particle);
        let upper = self.shepard_velocity(tau, particle.k_upper_layer, host, particle);
        Ok([
            linear_interp(particle.omega_layers, lower[0], upper[0]),
            linear_interp(particle.omega_layers, lower[1], upper[1]),
            linear_interp(particle.omega_layers, lower[2], upper[2]),
        ])
    }

    fn nodal_layer_value(
        &self,
        tau: f64,
        last: &Array2<f64>,
        next: &Array2<f64>,
        layer: usize,
        host: usize,
        phi: &[f64; 3],
    ) -> f64 {
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = linear_interp(tau, last[[layer, *node]], next[[layer, *node]]);
        }
        interpolate_within_element(&vals, phi)
    }

    fn nodal_layer_gradient(
        &self,
        tau: f64,
        last: &Array2<f64>,
        next: &Array2<f64>,
        layer: usize,
        host: usize,
    ) -> (f64, f64) {
        let (dphi_dx, dphi_dy) = self.grid.grad_phi(host);
        let mut ddx = 0.0;
        let mut ddy = 0.0;
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            let value = linear_interp(tau, last[[layer, *node]], next[[layer, *node]]);
            ddx += value * dphi_dx[i];
            ddy += value * dphi_dy[i];
        }
        (ddx, ddy)
    }

    /// Horizontal eddy viscosity at the particle and time.
    pub fn get_horizontal_eddy_viscosity(
        &self,
        t: f64,
        particle: &Particle,
    ) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let last = self
            .last
            .viscofh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("viscofh"))?;
        let next = self
            .next
            .viscofh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("viscofh"))?;
        let tau = self.tau(t);
        if particle.in_vertical_boundary_layer {
            return Ok(self.nodal_layer_value(tau, last, next, particle.k_layer, host, &particle.phi));
        }
        let lower =
            self.nodal_layer_value(tau, last, next, particle.k_lower_layer, host, &particle.phi);
        let upper =
            self.nodal_layer_value(tau, last, next, particle.k_upper_layer, host, &particle.phi);
        Ok(linear_interp(particle.omega_layers, lower, upper))
    }

    /// Horizontal gradient of the eddy viscosity, from the analytic
    /// barycentric basis gradients.
    pub fn get_horizontal_eddy_viscosity_derivative(
        &self,
        t: f64,
        particle: &Particle,
    ) -> Result<(f64, f64), ReaderError> {
        let host = self.require_host(particle)?;
        let last = self
            .last
            .viscofh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("viscofh"))?;
        let next = self
            .next
            .viscofh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("viscofh"))?;
        let tau = self.tau(t);
        if particle.in_vertical_boundary_layer {
            return Ok(self.nodal_layer_gradient(tau, last, next, particle.k_layer, host));
        }
        let lower = self.nodal_layer_gradient(tau, last, next, particle.k_lower_layer, host);
        let upper = self.nodal_layer_gradient(tau, last, next, particle.k_upper_layer, host);
        Ok((
            linear_interp(particle.omega_layers, lower.0, upper.0),
            linear_interp(particle.omega_layers, lower.1, upper.1),
        ))
    }

    fn kh_at_level(
        &self,
        tau: f64,
        level: usize,
        host: usize,
        phi: &[f64; 3],
    ) -> Result<f64, ReaderError> {
        let last = self
            .last
            .kh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("kh"))?;
        let next = self
            .next
            .kh
            .as_ref()
            .ok_or(ReaderError::FieldUnavailable("kh"))?;
        let mut vals = [0.0; 3];
        for (i, node) in self.grid.element_nodes(host).iter().enumerate() {
            vals[i] = linear_interp(tau, last[[level, *node]], next[[level, *node]]);
        }
        Ok(interpolate_within_element(&vals, phi))
    }

    /// Vertical eddy diffusivity at the particle and time, interpolated on
    /// sigma levels and blended by the interface fraction.
    pub fn get_vertical_eddy_diffusivity(
        &self,
        t: f64,
        particle: &Particle,
    ) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let tau = self.tau(t);
        let upper = self.kh_at_level(tau, particle.k_layer, host, &particle.phi)?;
        let lower = self.kh_at_level(tau, particle.k_layer + 1, host, &particle.phi)?;
        Ok(linear_interp(particle.omega_interfaces, lower, upper))
    }

    /// dKh/dz at the particle, from central differences between bracketing
    /// levels in geometric z, one-sided at the surface and seabed.
    pub fn get_vertical_eddy_diffusivity_derivative(
        &self,
        t: f64,
        particle: &Particle,
    ) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let tau = self.tau(t);
        let zmin = self.get_zmin(t, particle)?;
        let zmax = self.get_zmax(t, particle)?;
        let n_siglev = self.grid.n_siglev();
        let k = particle.k_layer;
        let z_at = |level: usize| {
            sigma_to_z(
                self.sigma_at_level(level, host, &particle.phi),
                zmin,
                zmax,
            )
        };
        let d_upper = if k == 0 {
            (self.kh_at_level(tau, 0, host, &particle.phi)?
                - self.kh_at_level(tau, 1, host, &particle.phi)?)
                / (z_at(0) - z_at(1))
        } else {
            (self.kh_at_level(tau, k - 1, host, &particle.phi)?
                - self.kh_at_level(tau, k + 1, host, &particle.phi)?)
                / (z_at(k - 1) - z_at(k + 1))
        };
        let d_lower = if k + 2 >= n_siglev {
            (self.kh_at_level(tau, k, host, &particle.phi)?
                - self.kh_at_level(tau, k + 1, host, &particle.phi)?)
                / (z_at(k) - z_at(k + 1))
        } else {
            (self.kh_at_level(tau, k, host, &particle.phi)?
                - self.kh_at_level(tau, k + 2, host, &particle.phi)?)
                / (z_at(k) - z_at(k + 2))
        };
        Ok(linear_interp(particle.omega_interfaces, d_lower, d_upper))
    }

    /// A named tracer at the particle and time, by the sigma-layer rules.
    pub fn get_environmental_variable(
        &self,
        name: &str,
        t: f64,
        particle: &Particle,
    ) -> Result<f64, ReaderError> {
        let host = self.require_host(particle)?;
        let last = self
            .last
            .tracers
            .get(name)
            .ok_or_else(|| ReaderError::UnknownEnvironmentalVariable(name.to_string()))?;
        let next = self
            .next
            .tracers
            .get(name)
            .ok_or_else(|| ReaderError::UnknownEnvironmentalVariable(name.to_string()))?;
        let tau = self.tau(t);
        if particle.in_vertical_boundary_layer {
            return Ok(self.nodal_layer_value(tau, last, next, particle.k_layer, host, &particle.phi));
        }
        let lower =
            self.nodal_layer_value(tau, last, next, particle.k_lower_layer, host, &particle.phi);
        let upper =
            self.nodal_layer_value(tau, last, next, particle.k_upper_layer, host, &particle.phi);
        Ok(linear_interp(particle.omega_layers, lower, upper))
    }

    /// Whether the particle's host element is wet in both buffered frames.
    /// A dry cell in either frame reads as dry. The flag does not itself
    /// arrest motion.
    pub fn is_wet(&self, _t: f64, particle: &Particle) -> Result<bool, ReaderError> {
        let host = self.require_host(particle)?;
        let wet = |cells: &Option<Array1<f64>>| match cells {
            Some(cells) => cells[host] >= 0.5,
            None => true,
        };
        Ok(wet(&self.last.wet_cells) && wet(&self.next.wet_cells))
    }
}

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error(transparent)]
    Mediator(#[from] MediatorError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    GridBuilder(#[from] UnstructuredGridBuilderError),
    #[error("particle {id} has no host element")]
    NoHostElement { id: i32 },
    #[error("the move of particle {id} does not cross a boundary edge")]
    NoBoundaryCrossed { id: i32 },
    #[error("no sigma layer brackets sigma = {sigma} for particle {id}")]
    NoSigmaBracket { id: i32, sigma: f64 },
    #[error("the circulation model does not provide {0:?}")]
    FieldUnavailable(&'static str),
    #[error("no environmental variable {0:?} is loaded")]
    UnknownEnvironmentalVariable(String),
    #[error("frame variable {name:?} has shape {actual:?}, expected {expected:?}")]
    BadFieldShape {
        name: String,
        actual: Vec<usize>,
        expected: Vec<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::InMemoryMediator;
    use crate::synthetic::channel_grid;
    use crate::synthetic::ChannelOptions;
    use crate::synthetic::UniformFlow;

    fn channel_reader(flow_last: UniformFlow, flow_next: UniformFlow) -> DataReader {
        let grid = channel_grid(&ChannelOptions::default());
        let snapshots = vec![flow_last.snapshot(&grid, 0.0), flow_next.snapshot(&grid, 100.0)];
        let mediator = InMemoryMediator::new(grid, snapshots).unwrap();
        let options = ReaderOptions {
            has_kh: true,
            has_ah: true,
            has_is_wet: true,
            ..ReaderOptions::default()
        };
        DataReader::new(Box::new(mediator), options, 0.0, 100.0).unwrap()
    }

    fn particle_at(reader: &DataReader, x: f64, y: f64, z: f64) -> Particle {
        let mut particle = Particle::new(0, 0, x, y, z);
        let host = reader
            .grid()
            .find_host_using_global_search(x, y)
            .expect("seed position outside the test channel");
        particle.host = Some(host);
        particle.in_domain = true;
        reader.set_local_coordinates(&mut particle).unwrap();
        reader.set_vertical_grid_vars(0.0, &mut particle).unwrap();
        particle
    }

    #[test]
    fn time_interpolation_is_exact_for_linear_fields() {
        let last = UniformFlow {
            u: 1.0,
            kh: 2.0,
            viscofh: 1.0,
            ..UniformFlow::default()
        };
        let next = UniformFlow {
            u: 3.0,
            kh: 4.0,
            viscofh: 2.0,
            ..UniformFlow::default()
        };
        let reader = channel_reader(last, next);
        let particle = particle_at(&reader, 1.1, 0.4, -5.0);
        for i in 0..=4 {
            let t = 25.0 * i as f64;
            let velocity = reader.get_velocity(t, &particle).unwrap();
            let expected = 1.0 + 2.0 * t / 100.0;
            assert!(
                (velocity[0] - expected).abs() < 1e-12,
                "u at t = {} was {}",
                t,
                velocity[0]
            );
        }
    }

    #[test]
    fn uniform_fields_interpolate_to_the_constant() {
        let flow = UniformFlow {
            u: 0.7,
            v: -0.2,
            w: 0.05,
            kh: 1.5,
            viscofh: 2.5,
            ..UniformFlow::default()
        };
        let reader = channel_reader(flow.clone(), flow);
        let particle = particle_at(&reader, 2.3, 0.6, -3.7);
        let velocity = reader.get_velocity(30.0, &particle).unwrap();
        assert!((velocity[0] - 0.7).abs() < 1e-12);
        assert!((velocity[1] + 0.2).abs() < 1e-12);
        assert!((velocity[2] - 0.05).abs() < 1e-12);
        let kh = reader.get_vertical_eddy_diffusivity(30.0, &particle).unwrap();
        assert!((kh - 1.5).abs() < 1e-12);
        let ah = reader.get_horizontal_eddy_viscosity(30.0, &particle).unwrap();
        assert!((ah - 2.5).abs() < 1e-12);
    }

    #[test]
    fn constant_fields_have_zero_gradients() {
        let flow = UniformFlow {
            kh: 1.5,
            viscofh: 2.5,
            ..UniformFlow::default()
        };
        let reader = channel_reader(flow.clone(), flow);
        let particle = particle_at(&reader, 2.3, 0.6, -3.7);
        let (dah_dx, dah_dy) = reader
            .get_horizontal_eddy_viscosity_derivative(30.0, &particle)
            .unwrap();
        assert!(dah_dx.abs() < 1e-12);
        assert!(dah_dy.abs() < 1e-12);
        let dkh_dz = reader
            .get_vertical_eddy_diffusivity_derivative(30.0, &particle)
            .unwrap();
        assert!(dkh_dz.abs() < 1e-12);
    }

    #[test]
    fn water_column_bounds_follow_bathymetry_and_zeta() {
        let flow = UniformFlow {
            zeta: 0.5,
            ..UniformFlow::default()
        };
        let reader = channel_reader(flow.clone(), flow);
        let particle = particle_at(&reader, 1.0, 0.5, -5.0);
        assert!((reader.get_zmin(0.0, &particle).unwrap() + 10.0).abs() < 1e-12);
        assert!((reader.get_zmax(0.0, &particle).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn vertical_grid_vars_bracket_the_particle() {
        let flow = UniformFlow::default();
        let reader = channel_reader(flow.clone(), flow);
        // four uniform layers over h = 10: layer boundaries every 2.5 m
        let particle = particle_at(&reader, 1.0, 0.5, -3.0);
        assert_eq!(particle.k_layer, 1);
        assert!(!particle.in_vertical_boundary_layer);
        assert_eq!(particle.k_upper_layer, 0);
        assert_eq!(particle.k_lower_layer, 1);
        assert!(particle.omega_interfaces > 0.0 && particle.omega_interfaces < 1.0);
    }

    #[test]
    fn near_surface_particles_sit_in_the_boundary_layer() {
        let flow = UniformFlow::default();
        let reader = channel_reader(flow.clone(), flow);
        let particle = particle_at(&reader, 1.0, 0.5, -0.1);
        assert!(particle.in_vertical_boundary_layer);
        assert_eq!(particle.k_layer, 0);
        let deep = particle_at(&reader, 1.0, 0.5, -9.9);
        assert!(deep.in_vertical_boundary_layer);
        assert_eq!(deep.k_layer, 3);
    }

    #[test]
    fn find_host_follows_a_move_and_sets_the_host() {
        let flow = UniformFlow::default();
        let reader = channel_reader(flow.clone(), flow);
        let particle = particle_at(&reader, 0.4, 0.3, -5.0);
        let mut moved = particle.clone();
        moved.x1 = 2.6;
        moved.x2 = 0.7;
        let status = reader.find_host(&particle, &mut moved).unwrap();
        assert!(matches!(status, HostStatus::InDomain { .. }));
        let direct = reader.grid().find_host_using_global_search(2.6, 0.7);
        assert_eq!(moved.host, direct);
    }

    #[test]
    fn tracers_are_served_by_name() {
        let grid = channel_grid(&ChannelOptions::default());
        let n_nodes = grid.x.len();
        let n_siglay = grid.siglay.shape()[0];
        let flow = UniformFlow::default();
        let snapshots: Vec<_> = [0.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                flow.snapshot(&grid, t).with_2d(
                    "thetao",
                    ndarray::Array2::from_elem((n_siglay, n_nodes), 10.0 + i as f64),
                )
            })
            .collect();
        let mediator = InMemoryMediator::new(grid, snapshots).unwrap();
        let options = ReaderOptions {
            environmental_variables: vec!["thetao".to_string()],
            ..ReaderOptions::default()
        };
        let reader = DataReader::new(Box::new(mediator), options, 0.0, 100.0).unwrap();
        let particle = particle_at(&reader, 1.0, 0.5, -5.0);
        let mid = reader
            .get_environmental_variable("thetao", 50.0, &particle)
            .unwrap();
        assert!((mid - 10.5).abs() < 1e-12);
        assert!(matches!(
            reader.get_environmental_variable("so", 50.0, &particle),
            Err(ReaderError::UnknownEnvironmentalVariable(_))
        ));
    }

    #[test]
    fn dry_cells_read_as_dry_in_either_frame() {
        let grid = channel_grid(&ChannelOptions::default());
        let flow = UniformFlow::default();
        let mut snapshot_last = flow.snapshot(&grid, 0.0);
        let wet = snapshot_last.fields_1d.get_mut("wet_cells").unwrap();
        wet[0] = 0.0;
        let snapshot_next = flow.snapshot(&grid, 100.0);
        let mediator = InMemoryMediator::new(grid, vec![snapshot_last, snapshot_next]).unwrap();
        let options = ReaderOptions {
            has_is_wet: true,
            ..ReaderOptions::default()
        };
        let reader = DataReader::new(Box::new(mediator), options, 0.0, 100.0).unwrap();
        let particle = particle_at(&reader, 0.2, 0.2, -5.0);
        assert_eq!(particle.host, Some(0));
        assert!(!reader.is_wet(0.0, &particle).unwrap());
        let downstream = particle_at(&reader, 2.6, 0.7, -5.0);
        assert!(reader.is_wet(0.0, &downstream).unwrap());
    }
}
