//! Hand-built meshes shared by the unit tests.

use crate::mesh::CoordinateSystem;
use crate::mesh::UnstructuredGrid;
use crate::mesh::UnstructuredGridBuilder;
use ndarray::arr1;
use ndarray::arr2;

/// A unit square split along the (1, 1)-(0, 0) diagonal:
///
/// - element 0 spans nodes (0,0), (1,0), (0,1) with its bottom and left
///   edges on land;
/// - element 1 spans nodes (1,0), (1,1), (0,1) with its top edge on land
///   and its right edge open.
pub fn two_triangle_grid() -> UnstructuredGrid {
    let nv = arr2(&[[0, 1], [1, 2], [3, 3]]);
    let nbe = arr2(&[[1, -1], [-1, 0], [-1, -2]]);
    let x = arr1(&[0.0, 1.0, 1.0, 0.0]);
    let y = arr1(&[0.0, 0.0, 1.0, 1.0]);
    let xc = arr1(&[1.0 / 3.0, 2.0 / 3.0]);
    let yc = arr1(&[1.0 / 3.0, 2.0 / 3.0]);
    let siglev = arr2(&[
        [0.0, 0.0, 0.0, 0.0],
        [-0.5, -0.5, -0.5, -0.5],
        [-1.0, -1.0, -1.0, -1.0],
    ]);
    let siglay = arr2(&[
        [-0.25, -0.25, -0.25, -0.25],
        [-0.75, -0.75, -0.75, -0.75],
    ]);
    let h = arr1(&[10.0, 10.0, 10.0, 10.0]);
    let coordinate_system = CoordinateSystem::Cartesian;
    UnstructuredGridBuilder::default()
        .nv(&nv)
        .nbe(&nbe)
        .x(&x)
        .y(&y)
        .xc(&xc)
        .yc(&yc)
        .siglev(&siglev)
        .siglay(&siglay)
        .h(&h)
        .coordinate_system(&coordinate_system)
        .build()
        .unwrap()
}
