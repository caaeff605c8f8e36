use super::value::ValueError;
use crate::core::grid::GridCoordinates;
use std::fmt;

/// The shape of a [`Value`](super::value::Value).
///
/// Grid shapes carry their full coordinate system so that consumers can map grid points
/// back to positions in the function domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix { rows: usize, cols: usize },
    Grid(GridCoordinates),
}

impl Shape {
    pub fn rank(&self) -> usize {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Matrix { .. } => 2,
            Shape::Grid(grid) => grid.dimension(),
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => *n,
            Shape::Matrix { rows, cols } => rows * cols,
            Shape::Grid(grid) => grid.point_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Shape::Scalar => Vec::new(),
            Shape::Vector(n) => vec![*n],
            Shape::Matrix { rows, cols } => vec![*rows, *cols],
            Shape::Grid(grid) => grid.points_per_dimension(),
        }
    }

    pub fn grid(&self) -> Option<&GridCoordinates> {
        match self {
            Shape::Grid(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Shape::Matrix { .. })
    }

    /// Row-major flat index of a multi-index.
    pub fn flat_index(&self, index: &[usize]) -> Result<usize, ValueError> {
        let dims = self.dims();
        if index.len() != dims.len() {
            return Err(ValueError::RankMismatch {
                expected: dims.len(),
                found: index.len(),
            });
        }
        let mut flat = 0;
        for (&i, &n) in index.iter().zip(&dims) {
            if i >= n {
                return Err(ValueError::IndexOutOfBounds {
                    index: index.to_vec(),
                    shape: dims.clone(),
                });
            }
            flat = flat * n + i;
        }
        Ok(flat)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "vector({n})"),
            Shape::Matrix { rows, cols } => write!(f, "matrix({rows}x{cols})"),
            Shape::Grid(grid) => {
                let dims: Vec<String> = grid
                    .points_per_dimension()
                    .iter()
                    .map(|n| n.to_string())
                    .collect();
                write!(f, "grid({})", dims.join("x"))
            }
        }
    }
}

/// Domain of a value: either the real line or a periodic interval `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Periodicity {
    #[default]
    NonPeriodic,
    Periodic {
        min: f64,
        max: f64,
    },
}

impl Periodicity {
    pub fn periodic(min: f64, max: f64) -> Result<Self, ValueError> {
        if !(max > min) || !min.is_finite() || !max.is_finite() {
            return Err(ValueError::InvalidDomain { min, max });
        }
        Ok(Periodicity::Periodic { min, max })
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self, Periodicity::Periodic { .. })
    }

    pub fn period(&self) -> Option<f64> {
        match self {
            Periodicity::NonPeriodic => None,
            Periodicity::Periodic { min, max } => Some(max - min),
        }
    }

    /// Shortest signed displacement from `from` to `to` in this domain.
    pub fn difference(&self, from: f64, to: f64) -> f64 {
        match self {
            Periodicity::NonPeriodic => to - from,
            Periodicity::Periodic { min, max } => {
                let period = max - min;
                let mut s = (to - from) / period;
                s -= (s + 0.5).floor();
                s * period
            }
        }
    }

    /// Maps `x` into `[min, max)` for periodic domains.
    pub fn bring_back(&self, x: f64) -> f64 {
        match self {
            Periodicity::NonPeriodic => x,
            Periodicity::Periodic { min, max } => {
                let period = max - min;
                let shifted = (x - min) / period;
                min + (shifted - shifted.floor()) * period
            }
        }
    }
}
