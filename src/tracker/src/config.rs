use chrono::DateTime;
use chrono::Utc;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Toml;
use figment::providers::Yaml;
use figment::Figment;
use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;
use strum_macros::Display;
use strum_macros::EnumString;
use thiserror::Error;

/// Relative slack allowed when checking that the run duration is a whole
/// number of time steps.
const DIVISOR_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NumIntegratorKind {
    None,
    Euler,
    Rk4,
    Rk4HorizEulerVert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HorizontalRandomWalkKind {
    None,
    Naive,
    Visser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerticalRandomWalkKind {
    None,
    Naive,
    Visser,
    Milstein,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HorizontalBoundaryKind {
    Reflecting,
    Restoring,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerticalBoundaryKind {
    Reflecting,
    Absorbing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinateSystemKind {
    Cartesian,
    Spherical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DepthCoordinatesKind {
    Cartesian,
    Sigma,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Step length in seconds.
    pub time_step: f64,
    #[serde(default = "SimulationConfig::default_depth_coordinates")]
    pub depth_coordinates: DepthCoordinatesKind,
    pub start_datetime: String,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub duration_in_days: Option<f64>,
    #[serde(default = "SimulationConfig::default_releases")]
    pub number_of_particle_releases: u32,
    #[serde(default)]
    pub particle_release_interval_in_hours: f64,
    #[serde(default)]
    pub depth_restoring: bool,
    /// Restoration target in metres below the free surface; zero or
    /// negative.
    #[serde(default)]
    pub fixed_depth_below_surface: f64,
    #[serde(default = "SimulationConfig::default_seed")]
    pub seed: u64,
}

impl SimulationConfig {
    fn default_depth_coordinates() -> DepthCoordinatesKind {
        DepthCoordinatesKind::Cartesian
    }
    fn default_releases() -> u32 {
        1
    }
    fn default_seed() -> u64 {
        1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NumericsConfig {
    #[serde(default = "NumericsConfig::default_integrator")]
    pub num_integrator: NumIntegratorKind,
    #[serde(default = "NumericsConfig::default_horizontal")]
    pub horizontal_random_walk_model: HorizontalRandomWalkKind,
    #[serde(default = "NumericsConfig::default_vertical")]
    pub vertical_random_walk_model: VerticalRandomWalkKind,
}

impl NumericsConfig {
    fn default_integrator() -> NumIntegratorKind {
        NumIntegratorKind::Rk4
    }
    fn default_horizontal() -> HorizontalRandomWalkKind {
        HorizontalRandomWalkKind::None
    }
    fn default_vertical() -> VerticalRandomWalkKind {
        VerticalRandomWalkKind::None
    }
}

impl Default for NumericsConfig {
    fn default() -> Self {
        NumericsConfig {
            num_integrator: Self::default_integrator(),
            horizontal_random_walk_model: Self::default_horizontal(),
            vertical_random_walk_model: Self::default_vertical(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryConditionsConfig {
    #[serde(default = "BoundaryConditionsConfig::default_horizontal")]
    pub horizontal: HorizontalBoundaryKind,
    #[serde(default = "BoundaryConditionsConfig::default_vertical")]
    pub vertical: VerticalBoundaryKind,
}

impl BoundaryConditionsConfig {
    fn default_horizontal() -> HorizontalBoundaryKind {
        HorizontalBoundaryKind::Reflecting
    }
    fn default_vertical() -> VerticalBoundaryKind {
        VerticalBoundaryKind::Reflecting
    }
}

impl Default for BoundaryConditionsConfig {
    fn default() -> Self {
        BoundaryConditionsConfig {
            horizontal: Self::default_horizontal(),
            vertical: Self::default_vertical(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OceanCirculationModelConfig {
    pub coordinate_system: CoordinateSystemKind,
    #[serde(rename = "has_Kh", alias = "has_kh", default)]
    pub has_kh: bool,
    #[serde(rename = "has_Ah", alias = "has_ah", default)]
    pub has_ah: bool,
    #[serde(default)]
    pub has_is_wet: bool,
    /// Tracer fields to carry through the reading frames for sampling along
    /// trajectories.
    #[serde(default)]
    pub environmental_variables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub numerics: NumericsConfig,
    #[serde(default)]
    pub boundary_conditions: BoundaryConditionsConfig,
    pub ocean_circulation_model: OceanCirculationModelConfig,
}

/// The resolved time axis of a run: seconds are measured from the first
/// release, signed by the direction of integration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSchedule {
    pub start: DateTime<Utc>,
    pub time_step: f64,
    pub time_direction: f64,
    pub duration_seconds: f64,
    pub steps_per_release: u64,
    pub number_of_releases: u32,
    pub release_interval_seconds: f64,
}

impl RunConfig {
    /// Validate the time axis and multi-release settings. Everything here is
    /// fatal at startup.
    pub fn schedule(&self) -> Result<SimulationSchedule, ConfigError> {
        let simulation = &self.simulation;
        if !(simulation.time_step.is_finite() && simulation.time_step > 0.0) {
            return Err(ConfigError::InvalidTimeStep(simulation.time_step));
        }
        let start = parse_datetime("simulation.start_datetime", &simulation.start_datetime)?;
        let duration_seconds = match (&simulation.end_datetime, simulation.duration_in_days) {
            (Some(end), _) => {
                let end = parse_datetime("simulation.end_datetime", end)?;
                (end - start).num_milliseconds() as f64 / 1000.0
            }
            (None, Some(days)) => days * 86400.0,
            (None, None) => return Err(ConfigError::MissingDuration),
        };
        if duration_seconds == 0.0 || !duration_seconds.is_finite() {
            return Err(ConfigError::InvalidDuration(duration_seconds));
        }
        let steps = duration_seconds.abs() / simulation.time_step;
        if (steps - steps.round()).abs() > DIVISOR_TOL * steps.max(1.0) {
            return Err(ConfigError::TimeStepNotDivisor {
                duration_seconds: duration_seconds.abs(),
                time_step: simulation.time_step,
            });
        }
        if simulation.number_of_particle_releases == 0 {
            return Err(ConfigError::NoReleases);
        }
        let release_interval_seconds = simulation.particle_release_interval_in_hours * 3600.0;
        if simulation.number_of_particle_releases > 1 && release_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidReleaseInterval(
                simulation.particle_release_interval_in_hours,
            ));
        }
        if simulation.depth_restoring && simulation.fixed_depth_below_surface > 0.0 {
            return Err(ConfigError::InvalidRestoringDepth(
                simulation.fixed_depth_below_surface,
            ));
        }
        Ok(SimulationSchedule {
            start,
            time_step: simulation.time_step,
            time_direction: duration_seconds.signum(),
            duration_seconds: duration_seconds.abs(),
            steps_per_release: steps.round() as u64,
            number_of_releases: simulation.number_of_particle_releases,
            release_interval_seconds,
        })
    }
}

fn parse_datetime(field: &'static str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    dateparser::parse(value).map_err(|e| ConfigError::UnreadableDatetime {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// Load a run configuration from a YAML, TOML or JSON file, with
/// `LAGRS_`-prefixed environment variables layered on top.
pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Figment::from(Yaml::file(path)),
        Some("toml") => Figment::from(Toml::file(path)),
        Some("json") => Figment::from(Json::file(path)),
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };
    let config: RunConfig = figment
        .merge(Env::prefixed("LAGRS_").split("__"))
        .extract()?;
    config.schedule()?;
    Ok(config)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] figment::Error),
    #[error("configuration files must end in .yaml, .yml, .toml or .json, got {0}")]
    UnsupportedFormat(PathBuf),
    #[error("could not read {field} from {value:?}: {message}")]
    UnreadableDatetime {
        field: &'static str,
        value: String,
        message: String,
    },
    #[error("simulation.time_step must be a positive number of seconds, got {0}")]
    InvalidTimeStep(f64),
    #[error("one of simulation.end_datetime or simulation.duration_in_days is required")]
    MissingDuration,
    #[error("simulation duration must be a non-zero number of seconds, got {0}")]
    InvalidDuration(f64),
    #[error("run duration of {duration_seconds} s is not a whole number of {time_step} s steps")]
    TimeStepNotDivisor {
        duration_seconds: f64,
        time_step: f64,
    },
    #[error("simulation.number_of_particle_releases must be at least 1")]
    NoReleases,
    #[error("simulation.particle_release_interval_in_hours must be positive for multiple releases, got {0}")]
    InvalidReleaseInterval(f64),
    #[error("simulation.fixed_depth_below_surface must be zero or negative, got {0}")]
    InvalidRestoringDepth(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = "
simulation:
  time_step: 60.0
  start_datetime: \"2024-01-01 00:00:00\"
  duration_in_days: 1.0
ocean_circulation_model:
  coordinate_system: cartesian
";

    fn extract(yaml: &str) -> Result<RunConfig, ConfigError> {
        let config: RunConfig = Figment::from(Yaml::string(yaml)).extract()?;
        config.schedule()?;
        Ok(config)
    }

    #[test]
    fn minimal_configuration_resolves() {
        let config = extract(MINIMAL_YAML).unwrap();
        let schedule = config.schedule().unwrap();
        assert_eq!(schedule.time_step, 60.0);
        assert_eq!(schedule.steps_per_release, 1440);
        assert_eq!(schedule.time_direction, 1.0);
        assert_eq!(config.numerics.num_integrator, NumIntegratorKind::Rk4);
        assert_eq!(
            config.boundary_conditions.horizontal,
            HorizontalBoundaryKind::Reflecting
        );
    }

    #[test]
    fn unknown_multi_choice_values_are_fatal() {
        let yaml = MINIMAL_YAML.replace("cartesian", "cylindrical");
        assert!(matches!(extract(&yaml), Err(ConfigError::Figment(_))));
    }

    #[test]
    fn non_divisor_time_steps_are_fatal() {
        let yaml = MINIMAL_YAML.replace("60.0", "57.0");
        assert!(matches!(
            extract(&yaml),
            Err(ConfigError::TimeStepNotDivisor { .. })
        ));
    }

    #[test]
    fn backward_runs_have_negative_direction() {
        let yaml = MINIMAL_YAML.replace("duration_in_days: 1.0", "duration_in_days: -1.0");
        let config = extract(&yaml).unwrap();
        let schedule = config.schedule().unwrap();
        assert_eq!(schedule.time_direction, -1.0);
        assert_eq!(schedule.duration_seconds, 86400.0);
    }

    #[test]
    fn multiple_releases_need_an_interval() {
        let yaml = "
simulation:
  time_step: 60.0
  start_datetime: \"2024-01-01 00:00:00\"
  duration_in_days: 1.0
  number_of_particle_releases: 3
ocean_circulation_model:
  coordinate_system: cartesian
";
        assert!(matches!(
            extract(yaml),
            Err(ConfigError::InvalidReleaseInterval(_))
        ));
    }

    #[test]
    fn integrator_names_parse_from_strings() {
        use std::str::FromStr;
        assert_eq!(
            NumIntegratorKind::from_str("rk4").unwrap(),
            NumIntegratorKind::Rk4
        );
        assert!(NumIntegratorKind::from_str("leapfrog").is_err());
    }
}
