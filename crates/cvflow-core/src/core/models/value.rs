use super::shape::{Periodicity, Shape};
use super::sparse::SparseRow;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("Element {index} is outside value '{name}' with {len} elements")]
    ElementOutOfBounds {
        name: String,
        index: usize,
        len: usize,
    },
    #[error("Index {index:?} is outside shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },
    #[error("Expected a multi-index of rank {expected}, found rank {found}")]
    RankMismatch { expected: usize, found: usize },
    #[error("Shape mismatch for value '{name}': declared {expected}, received {found} elements")]
    ShapeMismatch {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("Invalid periodic domain [{min}, {max})")]
    InvalidDomain { min: f64, max: f64 },
}

/// Per-element sparse Jacobian of a value with respect to its producer's inputs.
///
/// For matrices, `row_indices[r]` lists every input index touched by any element of row
/// `r`, which lets the reverse pass revisit exactly those indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Jacobian {
    rows: Vec<SparseRow>,
    row_indices: Vec<Vec<usize>>,
}

impl Jacobian {
    fn resize(&mut self, elements: usize, matrix_rows: usize) {
        self.rows.resize_with(elements, SparseRow::default);
        self.row_indices.resize_with(matrix_rows, Vec::new);
    }

    pub fn row(&self, element: usize) -> Option<&SparseRow> {
        self.rows.get(element)
    }

    pub fn row_indices(&self, row: usize) -> &[usize] {
        self.row_indices.get(row).map_or([].as_slice(), |v| v.as_slice())
    }

    pub(crate) fn row_mut(&mut self, element: usize) -> Option<&mut SparseRow> {
        self.rows.get_mut(element)
    }

    pub(crate) fn set_row_indices(&mut self, row: usize, indices: &[usize]) {
        if let Some(slot) = self.row_indices.get_mut(row) {
            slot.clear();
            slot.extend_from_slice(indices);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.rows.iter_mut().for_each(SparseRow::clear);
        self.row_indices.iter_mut().for_each(Vec::clear);
    }
}

/// A named, shaped numeric output of an action.
///
/// A value owns its data, an optional sparse Jacobian, optional per-point grid gradients,
/// and the force buffer filled during the reverse pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    name: String,
    shape: Shape,
    periodicity: Periodicity,
    derivatives: bool,
    data: Vec<f64>,
    grid_gradients: Vec<f64>,
    jacobian: Jacobian,
    forces: Vec<f64>,
    forces_added: bool,
}

impl Value {
    pub fn new(
        name: impl Into<String>,
        shape: Shape,
        periodicity: Periodicity,
        derivatives: bool,
    ) -> Self {
        let mut value = Self {
            name: name.into(),
            shape: Shape::Scalar,
            periodicity,
            derivatives,
            data: Vec::new(),
            grid_gradients: Vec::new(),
            jacobian: Jacobian::default(),
            forces: Vec::new(),
            forces_added: false,
        };
        value.reshape(shape);
        value
    }

    pub fn scalar(name: impl Into<String>, derivatives: bool) -> Self {
        Self::new(name, Shape::Scalar, Periodicity::NonPeriodic, derivatives)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.name = name;
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn periodicity(&self) -> Periodicity {
        self.periodicity
    }

    pub fn is_periodic(&self) -> bool {
        self.periodicity.is_periodic()
    }

    pub fn has_derivatives(&self) -> bool {
        self.derivatives
    }

    /// Resizes every buffer to `shape`. Only called from setup callbacks.
    pub(crate) fn reshape(&mut self, shape: Shape) {
        let len = shape.len();
        let gradient_len = shape.grid().map_or(0, |g| g.dimension() * len);
        let matrix_rows = match shape {
            Shape::Matrix { rows, .. } => rows,
            _ => 0,
        };
        self.data.resize(len, 0.0);
        self.forces.resize(len, 0.0);
        self.grid_gradients.resize(gradient_len, 0.0);
        if self.derivatives {
            self.jacobian.resize(len, matrix_rows);
        }
        self.shape = shape;
    }

    fn check(&self, index: usize) -> Result<(), ValueError> {
        if index >= self.data.len() {
            return Err(ValueError::ElementOutOfBounds {
                name: self.name.clone(),
                index,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<f64, ValueError> {
        self.check(index)?;
        Ok(self.data[index])
    }

    pub fn get_at(&self, index: &[usize]) -> Result<f64, ValueError> {
        let flat = self.shape.flat_index(index)?;
        self.get(flat)
    }

    pub fn set(&mut self, index: usize, value: f64) -> Result<(), ValueError> {
        self.check(index)?;
        self.data[index] = value;
        Ok(())
    }

    /// Overwrites all elements; `values` must match the declared shape.
    pub fn set_all(&mut self, values: &[f64]) -> Result<(), ValueError> {
        if values.len() != self.data.len() {
            return Err(ValueError::ShapeMismatch {
                name: self.name.clone(),
                expected: self.shape.to_string(),
                found: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Zeroes data, grid gradients and partials ahead of a fresh evaluation.
    pub(crate) fn reset_data(&mut self) {
        self.data.iter_mut().for_each(|d| *d = 0.0);
        self.grid_gradients.iter_mut().for_each(|g| *g = 0.0);
        self.jacobian.clear();
    }

    /// Gradient of a grid function at one grid point.
    pub fn grid_gradient(&self, point: usize) -> &[f64] {
        let dim = self.shape.grid().map_or(0, |g| g.dimension());
        self.grid_gradients
            .get(point * dim..(point + 1) * dim)
            .unwrap_or(&[])
    }

    pub fn grid_gradients(&self) -> &[f64] {
        &self.grid_gradients
    }

    pub(crate) fn set_grid_gradient(&mut self, point: usize, gradient: &[f64]) {
        let dim = gradient.len();
        if let Some(slot) = self.grid_gradients.get_mut(point * dim..(point + 1) * dim) {
            slot.copy_from_slice(gradient);
        }
    }

    pub fn jacobian(&self) -> &Jacobian {
        &self.jacobian
    }

    pub(crate) fn jacobian_mut(&mut self) -> &mut Jacobian {
        &mut self.jacobian
    }

    /// Accumulates `delta` into the partial of element `task` with respect to `index`.
    pub fn add_partial(&mut self, task: usize, index: usize, delta: f64) -> Result<(), ValueError> {
        self.check(task)?;
        if let Some(row) = self.jacobian.row_mut(task) {
            row.add(index, delta);
        }
        Ok(())
    }

    pub fn clear_derivatives(&mut self) {
        self.jacobian.clear();
    }

    /// Distance from `from` to `to` in this value's domain.
    pub fn difference(&self, from: f64, to: f64) -> f64 {
        self.periodicity.difference(from, to)
    }

    pub fn add_force(&mut self, index: usize, force: f64) -> Result<(), ValueError> {
        self.check(index)?;
        self.forces[index] += force;
        self.forces_added = true;
        Ok(())
    }

    pub fn force(&self, index: usize) -> f64 {
        self.forces.get(index).copied().unwrap_or(0.0)
    }

    pub fn forces(&self) -> &[f64] {
        &self.forces
    }

    pub fn forces_added(&self) -> bool {
        self.forces_added
    }

    pub(crate) fn clear_forces(&mut self) {
        if self.forces_added {
            self.forces.iter_mut().for_each(|f| *f = 0.0);
        }
        self.forces_added = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_value_is_zeroed_with_shape_length() {
        let value = Value::new(
            "d",
            Shape::Vector(3),
            Periodicity::NonPeriodic,
            true,
        );
        assert_eq!(value.len(), 3);
        assert_eq!(value.data(), &[0.0, 0.0, 0.0]);
        assert!(value.has_derivatives());
        assert!(value.jacobian().row(2).is_some());
    }

    #[test]
    fn get_outside_shape_is_an_error() {
        let value = Value::scalar("x", false);
        assert!(matches!(
            value.get(1),
            Err(ValueError::ElementOutOfBounds { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn get_at_uses_row_major_multi_index() {
        let mut value = Value::new(
            "m",
            Shape::Matrix { rows: 2, cols: 3 },
            Periodicity::NonPeriodic,
            false,
        );
        value.set_all(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(value.get_at(&[1, 0]).unwrap(), 3.0);
        assert!(value.get_at(&[2, 0]).is_err());
    }

    #[test]
    fn set_all_rejects_mismatched_length() {
        let mut value = Value::new("v", Shape::Vector(2), Periodicity::NonPeriodic, false);
        assert!(matches!(
            value.set_all(&[1.0]),
            Err(ValueError::ShapeMismatch { found: 1, .. })
        ));
    }

    #[test]
    fn add_partial_accumulates_into_one_entry_per_index() {
        let mut value = Value::new("v", Shape::Vector(2), Periodicity::NonPeriodic, true);
        value.add_partial(1, 4, 0.5).unwrap();
        value.add_partial(1, 4, 0.25).unwrap();
        let row = value.jacobian().row(1).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row.get(4), 0.75);
    }

    #[test]
    fn add_force_marks_value_and_clear_resets_it() {
        let mut value = Value::new("v", Shape::Vector(2), Periodicity::NonPeriodic, true);
        assert!(!value.forces_added());
        value.add_force(0, 2.0).unwrap();
        value.add_force(0, 1.0).unwrap();
        assert!(value.forces_added());
        assert_eq!(value.force(0), 3.0);
        value.clear_forces();
        assert!(!value.forces_added());
        assert_eq!(value.force(0), 0.0);
    }

    #[test]
    fn difference_respects_periodic_domain() {
        let value = Value::new(
            "phi",
            Shape::Scalar,
            Periodicity::periodic(0.0, 1.0).unwrap(),
            false,
        );
        assert!((value.difference(0.9, 0.1) - 0.2).abs() < 1e-12);
    }
}
