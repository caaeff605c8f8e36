//! Regular grids and the interpolation kernels that evaluate functions stored on them.
//!
//! A grid function is stored as one value and D gradient components per point, which is
//! what the spline kernel needs and what the grid file format persists.

mod coordinates;
mod interpolation;

pub use coordinates::{CellLocation, GridAxis, GridCoordinates};
pub use interpolation::{GridSample, Interpolation, evaluate};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("Grid must have at least one dimension")]
    NoDimensions,
    #[error("Grid axis must have at least one bin")]
    NoBins,
    #[error("Invalid grid bounds [{min}, {max}]")]
    InvalidBounds { min: f64, max: f64 },
    #[error("Coordinate {coordinate} outside grid bounds [{min}, {max}] in dimension {dimension}")]
    OutOfBounds {
        dimension: usize,
        coordinate: f64,
        min: f64,
        max: f64,
    },
    #[error("Expected a point of dimension {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Grid holds {expected} points but {found} values were supplied")]
    DataMismatch { expected: usize, found: usize },
    #[error("Unknown interpolation type '{0}'")]
    UnknownInterpolation(String),
}

/// A grid function: geometry plus per-point values and gradients.
#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    pub coordinates: GridCoordinates,
    pub values: Vec<f64>,
    /// Row-major `point_count × dimension` gradient components.
    pub gradients: Vec<f64>,
}

impl GridData {
    pub fn new(
        coordinates: GridCoordinates,
        values: Vec<f64>,
        gradients: Vec<f64>,
    ) -> Result<Self, GridError> {
        let points = coordinates.point_count();
        if values.len() != points {
            return Err(GridError::DataMismatch {
                expected: points,
                found: values.len(),
            });
        }
        if gradients.len() != points * coordinates.dimension() {
            return Err(GridError::DataMismatch {
                expected: points * coordinates.dimension(),
                found: gradients.len(),
            });
        }
        Ok(Self {
            coordinates,
            values,
            gradients,
        })
    }

    /// Samples `function` (returning value and gradient) at every grid point.
    pub fn tabulate<F>(coordinates: GridCoordinates, mut function: F) -> Self
    where
        F: FnMut(&[f64]) -> (f64, Vec<f64>),
    {
        let points = coordinates.point_count();
        let dimension = coordinates.dimension();
        let mut values = Vec::with_capacity(points);
        let mut gradients = Vec::with_capacity(points * dimension);
        for flat in 0..points {
            let (value, gradient) = function(&coordinates.point_of(flat));
            values.push(value);
            gradients.extend(gradient.into_iter().chain(std::iter::repeat(0.0)).take(dimension));
        }
        Self {
            coordinates,
            values,
            gradients,
        }
    }
}
