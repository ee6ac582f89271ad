pub mod interp;
pub mod mesh;
pub mod search;
#[cfg(test)]
mod test_support;

pub use mesh::CoordinateSystem;
pub use mesh::UnstructuredGrid;
pub use mesh::UnstructuredGridBuilder;
pub use mesh::LAND_BOUNDARY;
pub use mesh::OPEN_BOUNDARY;
pub use search::EdgeIntersection;
pub use search::HostStatus;
pub use search::PathlineTrace;
pub use search::SearchError;
