use super::GridError;

/// One dimension of a regular grid.
///
/// `bins` counts intervals. A periodic axis stores one point per bin (the point at `max`
/// coincides with the one at `min`); a non-periodic axis stores `bins + 1` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridAxis {
    pub min: f64,
    pub max: f64,
    pub bins: usize,
    pub periodic: bool,
}

impl GridAxis {
    pub fn new(min: f64, max: f64, bins: usize, periodic: bool) -> Result<Self, GridError> {
        if !(max > min) || !min.is_finite() || !max.is_finite() {
            return Err(GridError::InvalidBounds { min, max });
        }
        if bins == 0 {
            return Err(GridError::NoBins);
        }
        Ok(Self {
            min,
            max,
            bins,
            periodic,
        })
    }

    pub fn spacing(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    pub fn points(&self) -> usize {
        if self.periodic {
            self.bins
        } else {
            self.bins + 1
        }
    }

    pub fn coordinate(&self, index: usize) -> f64 {
        self.min + index as f64 * self.spacing()
    }

    /// Index of the neighbouring point above `index`, wrapping on periodic axes.
    pub fn next(&self, index: usize) -> usize {
        if self.periodic {
            (index + 1) % self.bins
        } else {
            (index + 1).min(self.bins)
        }
    }

    /// Finds the cell containing `x`: the lower point index and the fractional offset in `[0, 1]`.
    fn locate(&self, dimension: usize, x: f64) -> Result<(usize, f64), GridError> {
        let dx = self.spacing();
        if self.periodic {
            let period = self.max - self.min;
            let shifted = (x - self.min) / period;
            let wrapped = (shifted - shifted.floor()) * period;
            let cell = ((wrapped / dx).floor() as usize).min(self.bins - 1);
            let fraction = (wrapped - cell as f64 * dx) / dx;
            return Ok((cell, fraction.clamp(0.0, 1.0)));
        }
        let tolerance = 1e-9 * dx;
        if x < self.min - tolerance || x > self.max + tolerance || !x.is_finite() {
            return Err(GridError::OutOfBounds {
                dimension,
                coordinate: x,
                min: self.min,
                max: self.max,
            });
        }
        let offset = (x - self.min).max(0.0);
        let cell = ((offset / dx).floor() as usize).min(self.bins - 1);
        let fraction = (offset - cell as f64 * dx) / dx;
        Ok((cell, fraction.clamp(0.0, 1.0)))
    }
}

/// Cell of a grid that contains a query point.
#[derive(Debug, Clone, PartialEq)]
pub struct CellLocation {
    pub lower: Vec<usize>,
    pub upper: Vec<usize>,
    pub fraction: Vec<f64>,
}

/// Geometry of a D-dimensional regular grid with row-major point storage.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCoordinates {
    axes: Vec<GridAxis>,
}

impl GridCoordinates {
    pub fn new(axes: Vec<GridAxis>) -> Result<Self, GridError> {
        if axes.is_empty() {
            return Err(GridError::NoDimensions);
        }
        Ok(Self { axes })
    }

    pub fn dimension(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    pub fn axis(&self, dimension: usize) -> &GridAxis {
        &self.axes[dimension]
    }

    pub fn points_per_dimension(&self) -> Vec<usize> {
        self.axes.iter().map(GridAxis::points).collect()
    }

    pub fn point_count(&self) -> usize {
        self.axes.iter().map(GridAxis::points).product()
    }

    pub fn spacing(&self) -> Vec<f64> {
        self.axes.iter().map(GridAxis::spacing).collect()
    }

    pub fn flat_index(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .zip(&self.axes)
            .fold(0, |flat, (&i, axis)| flat * axis.points() + i)
    }

    pub fn indices(&self, mut flat: usize) -> Vec<usize> {
        let mut indices = vec![0; self.axes.len()];
        for (slot, axis) in indices.iter_mut().zip(&self.axes).rev() {
            let n = axis.points();
            *slot = flat % n;
            flat /= n;
        }
        indices
    }

    pub fn point(&self, indices: &[usize]) -> Vec<f64> {
        indices
            .iter()
            .zip(&self.axes)
            .map(|(&i, axis)| axis.coordinate(i))
            .collect()
    }

    pub fn point_of(&self, flat: usize) -> Vec<f64> {
        self.point(&self.indices(flat))
    }

    /// Locates the cell containing `x`. Periodic coordinates wrap; non-periodic
    /// coordinates outside the bounds are an error.
    pub fn locate(&self, x: &[f64]) -> Result<CellLocation, GridError> {
        if x.len() != self.axes.len() {
            return Err(GridError::DimensionMismatch {
                expected: self.axes.len(),
                found: x.len(),
            });
        }
        let mut lower = Vec::with_capacity(x.len());
        let mut upper = Vec::with_capacity(x.len());
        let mut fraction = Vec::with_capacity(x.len());
        for (dimension, (axis, &coordinate)) in self.axes.iter().zip(x).enumerate() {
            let (cell, t) = axis.locate(dimension, coordinate)?;
            lower.push(cell);
            upper.push(axis.next(cell));
            fraction.push(t);
        }
        Ok(CellLocation {
            lower,
            upper,
            fraction,
        })
    }

    /// Whether two grids share the same geometry up to a relative tolerance.
    pub fn same_geometry(&self, other: &GridCoordinates) -> bool {
        self.axes.len() == other.axes.len()
            && self.axes.iter().zip(&other.axes).all(|(a, b)| {
                a.bins == b.bins
                    && a.periodic == b.periodic
                    && (a.min - b.min).abs() <= 1e-12 * (1.0 + a.min.abs())
                    && (a.max - b.max).abs() <= 1e-12 * (1.0 + a.max.abs())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_2d() -> GridCoordinates {
        GridCoordinates::new(vec![
            GridAxis::new(0.0, 1.0, 4, false).unwrap(),
            GridAxis::new(-std::f64::consts::PI, std::f64::consts::PI, 6, true).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn point_counts_follow_periodicity() {
        let grid = grid_2d();
        assert_eq!(grid.points_per_dimension(), vec![5, 6]);
        assert_eq!(grid.point_count(), 30);
        assert!((grid.axis(0).spacing() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn flat_index_and_indices_are_inverse() {
        let grid = grid_2d();
        assert_eq!(grid.flat_index(&[2, 3]), 15);
        assert_eq!(grid.indices(15), vec![2, 3]);
        assert_eq!(grid.indices(29), vec![4, 5]);
    }

    #[test]
    fn locate_wraps_periodic_coordinates() {
        let grid = grid_2d();
        let location = grid.locate(&[0.3, 0.1]).unwrap();
        assert_eq!(location.lower, vec![1, 3]);
        let wrapped = grid.locate(&[0.3, std::f64::consts::PI + 0.1]).unwrap();
        assert_eq!(wrapped.lower, vec![1, 0]);
        assert!((location.fraction[0] - 0.2).abs() < 1e-12);
        let location = grid.locate(&[0.3, std::f64::consts::PI - 0.1]).unwrap();
        assert_eq!(location.lower[1], 5);
        assert_eq!(location.upper[1], 0);
    }

    #[test]
    fn locate_rejects_non_periodic_out_of_bounds() {
        let grid = grid_2d();
        assert!(matches!(
            grid.locate(&[1.2, 0.0]),
            Err(GridError::OutOfBounds { dimension: 0, .. })
        ));
        assert!(grid.locate(&[1.0, 0.0]).is_ok());
    }

    #[test]
    fn upper_bound_of_non_periodic_axis_lands_in_last_cell() {
        let grid = grid_2d();
        let location = grid.locate(&[1.0, 0.0]).unwrap();
        assert_eq!(location.lower[0], 3);
        assert_eq!(location.upper[0], 4);
        assert!((location.fraction[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_axes_are_rejected() {
        assert!(matches!(GridAxis::new(1.0, 0.0, 3, false), Err(GridError::InvalidBounds { .. })));
        assert!(matches!(GridAxis::new(0.0, 1.0, 0, false), Err(GridError::NoBins)));
        assert!(matches!(GridCoordinates::new(Vec::new()), Err(GridError::NoDimensions)));
    }
}
