use linked_hash_map::LinkedHashMap;
use ndarray::Array1;
use ndarray::Array2;
use thiserror::Error;

/// Slack when matching a requested time against the first/final snapshot.
const TIME_TOL: f64 = 1e-6;

/// Which of the two bracket frames a field is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSlot {
    Last,
    Next,
}

/// The seam to the external input provider. Implementations own the two
/// reading frames that straddle the current simulation time and serve grid
/// and field arrays by name; `update_reading_frames` is the only operation
/// that may block on I/O.
///
/// Times are seconds relative to the provider's own epoch; the tracker uses
/// seconds since the first particle release throughout.
pub trait Mediator: Send + Sync {
    fn setup_data_access(&mut self, start_seconds: f64, end_seconds: f64)
        -> Result<(), MediatorError>;
    fn update_reading_frames(&mut self, time_seconds: f64) -> Result<(), MediatorError>;
    /// Times of the (last, next) reading frames.
    fn frame_times(&self) -> (f64, f64);
    fn dimension(&self, name: &str) -> Result<usize, MediatorError>;
    fn grid_variable_1d(&self, name: &str) -> Result<Array1<f64>, MediatorError>;
    fn grid_variable_2d(&self, name: &str) -> Result<Array2<f64>, MediatorError>;
    fn grid_connectivity(&self, name: &str) -> Result<Array2<i32>, MediatorError>;
    fn has_frame_variable(&self, name: &str) -> bool;
    fn frame_variable_1d(&self, name: &str, slot: FrameSlot) -> Result<Array1<f64>, MediatorError>;
    fn frame_variable_2d(&self, name: &str, slot: FrameSlot) -> Result<Array2<f64>, MediatorError>;
}

#[derive(Error, Debug)]
pub enum MediatorError {
    #[error("unknown dimension {0:?}")]
    UnknownDimension(String),
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("no input frames bracket t = {time} s")]
    NoBracketingFrames { time: f64 },
    #[error("data access has not been set up")]
    AccessNotConfigured,
    #[error("input snapshots must carry strictly increasing times")]
    UnorderedSnapshots,
    #[error("at least two input snapshots are required")]
    TooFewSnapshots,
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Static grid arrays in the shapes of the input format.
#[derive(Debug, Clone)]
pub struct GridArrays {
    pub nv: Array2<i32>,
    pub nbe: Array2<i32>,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub xc: Array1<f64>,
    pub yc: Array1<f64>,
    pub siglev: Array2<f64>,
    pub siglay: Array2<f64>,
    pub h: Array1<f64>,
}

/// One timestamped set of time-dependent fields. Field names follow the
/// input format: `zeta`, `u`, `v`, `ww`, `kh`, `viscofh`, `wet_cells` and
/// any tracers.
#[derive(Debug, Clone)]
pub struct FieldSnapshot {
    pub time_seconds: f64,
    pub fields_1d: LinkedHashMap<String, Array1<f64>>,
    pub fields_2d: LinkedHashMap<String, Array2<f64>>,
}

impl FieldSnapshot {
    pub fn new(time_seconds: f64) -> Self {
        FieldSnapshot {
            time_seconds,
            fields_1d: LinkedHashMap::new(),
            fields_2d: LinkedHashMap::new(),
        }
    }

    pub fn with_1d(mut self, name: &str, values: Array1<f64>) -> Self {
        self.fields_1d.insert(name.to_string(), values);
        self
    }

    pub fn with_2d(mut self, name: &str, values: Array2<f64>) -> Self {
        self.fields_2d.insert(name.to_string(), values);
        self
    }
}

/// A [`Mediator`] serving pre-built snapshots from memory. Used by the test
/// suite and the synthetic demo domain; file-backed providers plug in behind
/// the same trait.
pub struct InMemoryMediator {
    grid: GridArrays,
    snapshots: Vec<FieldSnapshot>,
    index_last: usize,
    index_next: usize,
    time_direction: f64,
    configured: bool,
}

impl InMemoryMediator {
    pub fn new(grid: GridArrays, snapshots: Vec<FieldSnapshot>) -> Result<Self, MediatorError> {
        if snapshots.len() < 2 {
            return Err(MediatorError::TooFewSnapshots);
        }
        for pair in snapshots.windows(2) {
            if pair[1].time_seconds <= pair[0].time_seconds {
                return Err(MediatorError::UnorderedSnapshots);
            }
        }
        Ok(InMemoryMediator {
            grid,
            snapshots,
            index_last: 0,
            index_next: 1,
            time_direction: 1.0,
            configured: false,
        })
    }

    fn time(&self, index: usize) -> f64 {
        self.snapshots[index].time_seconds
    }

    fn snapshot(&self, slot: FrameSlot) -> &FieldSnapshot {
        match slot {
            FrameSlot::Last => &self.snapshots[self.index_last],
            FrameSlot::Next => &self.snapshots[self.index_next],
        }
    }

    /// Locate the bracketing pair for `t`, honouring the direction of
    /// integration.
    fn locate(&self, t: f64) -> Result<(usize, usize), MediatorError> {
        let n = self.snapshots.len();
        if self.time_direction >= 0.0 {
            if t < self.time(0) - TIME_TOL || t > self.time(n - 1) + TIME_TOL {
                return Err(MediatorError::NoBracketingFrames { time: t });
            }
            let mut i = 0;
            while i + 2 < n && self.time(i + 1) <= t {
                i += 1;
            }
            Ok((i, i + 1))
        } else {
            if t > self.time(n - 1) + TIME_TOL || t < self.time(0) - TIME_TOL {
                return Err(MediatorError::NoBracketingFrames { time: t });
            }
            let mut i = n - 1;
            while i >= 2 && self.time(i - 1) >= t {
                i -= 1;
            }
            Ok((i, i - 1))
        }
    }
}

impl Mediator for InMemoryMediator {
    fn setup_data_access(
        &mut self,
        start_seconds: f64,
        end_seconds: f64,
    ) -> Result<(), MediatorError> {
        self.time_direction = if end_seconds < start_seconds { -1.0 } else { 1.0 };
        let (last, next) = self.locate(start_seconds)?;
        self.index_last = last;
        self.index_next = next;
        self.configured = true;
        Ok(())
    }

    fn update_reading_frames(&mut self, time_seconds: f64) -> Result<(), MediatorError> {
        if !self.configured {
            return Err(MediatorError::AccessNotConfigured);
        }
        let (last, next) = self.locate(time_seconds)?;
        self.index_last = last;
        self.index_next = next;
        Ok(())
    }

    fn frame_times(&self) -> (f64, f64) {
        (self.time(self.index_last), self.time(self.index_next))
    }

    fn dimension(&self, name: &str) -> Result<usize, MediatorError> {
        match name {
            "n_nodes" => Ok(self.grid.x.len()),
            "n_elems" => Ok(self.grid.nv.shape()[1]),
            "n_siglev" => Ok(self.grid.siglev.shape()[0]),
            "n_siglay" => Ok(self.grid.siglay.shape()[0]),
            _ => Err(MediatorError::UnknownDimension(name.to_string())),
        }
    }

    fn grid_variable_1d(&self, name: &str) -> Result<Array1<f64>, MediatorError> {
        match name {
            "x" => Ok(self.grid.x.clone()),
            "y" => Ok(self.grid.y.clone()),
            "xc" => Ok(self.grid.xc.clone()),
            "yc" => Ok(self.grid.yc.clone()),
            "h" => Ok(self.grid.h.clone()),
            _ => Err(MediatorError::UnknownVariable(name.to_string())),
        }
    }

    fn grid_variable_2d(&self, name: &str) -> Result<Array2<f64>, MediatorError> {
        match name {
            "siglev" => Ok(self.grid.siglev.clone()),
            "siglay" => Ok(self.grid.siglay.clone()),
            _ => Err(MediatorError::UnknownVariable(name.to_string())),
        }
    }

    fn grid_connectivity(&self, name: &str) -> Result<Array2<i32>, MediatorError> {
        match name {
            "nv" => Ok(self.grid.nv.clone()),
            "nbe" => Ok(self.grid.nbe.clone()),
            _ => Err(MediatorError::UnknownVariable(name.to_string())),
        }
    }

    fn has_frame_variable(&self, name: &str) -> bool {
        let first = &self.snapshots[0];
        first.fields_1d.contains_key(name) || first.fields_2d.contains_key(name)
    }

    fn frame_variable_1d(&self, name: &str, slot: FrameSlot) -> Result<Array1<f64>, MediatorError> {
        self.snapshot(slot)
            .fields_1d
            .get(name)
            .cloned()
            .ok_or_else(|| MediatorError::UnknownVariable(name.to_string()))
    }

    fn frame_variable_2d(&self, name: &str, slot: FrameSlot) -> Result<Array2<f64>, MediatorError> {
        self.snapshot(slot)
            .fields_2d
            .get(name)
            .cloned()
            .ok_or_else(|| MediatorError::UnknownVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use ndarray::arr2;

    fn tiny_grid() -> GridArrays {
        GridArrays {
            nv: arr2(&[[0], [1], [2]]),
            nbe: arr2(&[[-1], [-1], [-1]]),
            x: arr1(&[0.0, 1.0, 0.0]),
            y: arr1(&[0.0, 0.0, 1.0]),
            xc: arr1(&[1.0 / 3.0]),
            yc: arr1(&[1.0 / 3.0]),
            siglev: arr2(&[[0.0, 0.0, 0.0], [-1.0, -1.0, -1.0]]),
            siglay: arr2(&[[-0.5, -0.5, -0.5]]),
            h: arr1(&[5.0, 5.0, 5.0]),
        }
    }

    fn snapshots() -> Vec<FieldSnapshot> {
        (0..4)
            .map(|i| {
                FieldSnapshot::new(i as f64 * 100.0)
                    .with_1d("zeta", arr1(&[i as f64, i as f64, i as f64]))
            })
            .collect()
    }

    #[test]
    fn forward_frames_bracket_the_requested_time() {
        let mut mediator = InMemoryMediator::new(tiny_grid(), snapshots()).unwrap();
        mediator.setup_data_access(0.0, 300.0).unwrap();
        mediator.update_reading_frames(150.0).unwrap();
        assert_eq!(mediator.frame_times(), (100.0, 200.0));
    }

    #[test]
    fn the_final_instant_keeps_the_last_bracket() {
        let mut mediator = InMemoryMediator::new(tiny_grid(), snapshots()).unwrap();
        mediator.setup_data_access(0.0, 300.0).unwrap();
        mediator.update_reading_frames(300.0).unwrap();
        assert_eq!(mediator.frame_times(), (200.0, 300.0));
    }

    #[test]
    fn backward_frames_are_reversed() {
        let mut mediator = InMemoryMediator::new(tiny_grid(), snapshots()).unwrap();
        mediator.setup_data_access(300.0, 0.0).unwrap();
        mediator.update_reading_frames(250.0).unwrap();
        assert_eq!(mediator.frame_times(), (300.0, 200.0));
    }

    #[test]
    fn times_outside_the_snapshots_fail() {
        let mut mediator = InMemoryMediator::new(tiny_grid(), snapshots()).unwrap();
        mediator.setup_data_access(0.0, 300.0).unwrap();
        assert!(matches!(
            mediator.update_reading_frames(400.0),
            Err(MediatorError::NoBracketingFrames { .. })
        ));
    }

    #[test]
    fn snapshots_must_be_ordered() {
        let mut frames = snapshots();
        frames.swap(0, 1);
        assert!(matches!(
            InMemoryMediator::new(tiny_grid(), frames),
            Err(MediatorError::UnorderedSnapshots)
        ));
    }
}
