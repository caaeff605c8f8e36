use super::sparse::SparseRow;

/// Per-worker scratch record for the tasks of one action.
///
/// A task writes one value per output slot together with the sparse partial derivatives
/// of that value. The set of derivative indices touched since the last [`reset`] is kept
/// as the active set; for matrix rows the active set survives element resets so that the
/// row's end-of-row bookkeeping can see every index touched by the row.
///
/// [`reset`]: MultiValue::reset
#[derive(Debug, Clone)]
pub struct MultiValue {
    task: usize,
    values: Vec<f64>,
    derivatives: Vec<SparseRow>,
    gradients: Vec<Vec<f64>>,
    active: Vec<usize>,
    is_active: Vec<bool>,
    split_index: usize,
}

impl MultiValue {
    /// Creates scratch for `slots` outputs over a derivative space of `derivatives` indices.
    /// `grid_dimension` is the number of gradient components stored per slot (0 if none).
    pub fn new(slots: usize, derivatives: usize, grid_dimension: usize) -> Self {
        Self {
            task: 0,
            values: vec![0.0; slots],
            derivatives: (0..slots).map(|_| SparseRow::with_capacity(16)).collect(),
            gradients: vec![vec![0.0; grid_dimension]; slots],
            active: Vec::with_capacity(derivatives.min(64)),
            is_active: vec![false; derivatives],
            split_index: 0,
        }
    }

    /// Clears everything and starts work on `task`.
    pub fn reset(&mut self, task: usize) {
        self.reset_element();
        for &index in &self.active {
            self.is_active[index] = false;
        }
        self.active.clear();
        self.split_index = 0;
        self.task = task;
    }

    /// Clears values and partials but keeps the active set.
    pub fn reset_element(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.derivatives.iter_mut().for_each(SparseRow::clear);
        for gradient in &mut self.gradients {
            gradient.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    pub fn task_index(&self) -> usize {
        self.task
    }

    pub fn slot_count(&self) -> usize {
        self.values.len()
    }

    pub fn number_of_derivatives(&self) -> usize {
        self.is_active.len()
    }

    pub fn set_value(&mut self, slot: usize, value: f64) {
        self.values[slot] = value;
    }

    pub fn add_value(&mut self, slot: usize, value: f64) {
        self.values[slot] += value;
    }

    pub fn value(&self, slot: usize) -> f64 {
        self.values[slot]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Accumulates `delta` into the partial of `slot` with respect to `index`.
    pub fn add_derivative(&mut self, slot: usize, index: usize, delta: f64) {
        self.derivatives[slot].add(index, delta);
        self.mark_active(index);
    }

    pub fn mark_active(&mut self, index: usize) {
        if !self.is_active[index] {
            self.is_active[index] = true;
            self.active.push(index);
        }
    }

    pub fn derivative(&self, slot: usize, index: usize) -> f64 {
        self.derivatives[slot].get(index)
    }

    pub fn derivatives(&self, slot: usize) -> &SparseRow {
        &self.derivatives[slot]
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.active
    }

    pub fn set_gradient(&mut self, slot: usize, gradient: &[f64]) {
        self.gradients[slot].copy_from_slice(gradient);
    }

    pub fn gradient(&self, slot: usize) -> &[f64] {
        &self.gradients[slot]
    }

    pub fn set_split_index(&mut self, split: usize) {
        self.split_index = split;
    }

    pub fn split_index(&self) -> usize {
        self.split_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_derivative_accumulates_and_tracks_active_indices_once() {
        let mut mv = MultiValue::new(2, 10, 0);
        mv.add_derivative(0, 3, 1.0);
        mv.add_derivative(1, 3, 2.0);
        mv.add_derivative(0, 3, 0.5);
        mv.add_derivative(0, 7, -1.0);
        assert_eq!(mv.derivative(0, 3), 1.5);
        assert_eq!(mv.derivative(1, 3), 2.0);
        assert_eq!(mv.derivatives(0).len(), 2);
        assert_eq!(mv.active_indices(), &[3, 7]);
    }

    #[test]
    fn reset_clears_active_set_between_tasks() {
        let mut mv = MultiValue::new(1, 5, 0);
        mv.set_value(0, 2.0);
        mv.add_derivative(0, 4, 1.0);
        mv.reset(1);
        assert_eq!(mv.task_index(), 1);
        assert_eq!(mv.value(0), 0.0);
        assert!(mv.derivatives(0).is_empty());
        assert!(mv.active_indices().is_empty());
        mv.add_derivative(0, 4, 1.0);
        assert_eq!(mv.active_indices(), &[4]);
    }

    #[test]
    fn reset_element_keeps_row_activity() {
        let mut mv = MultiValue::new(1, 5, 2);
        mv.add_derivative(0, 1, 1.0);
        mv.set_gradient(0, &[1.0, 2.0]);
        mv.reset_element();
        mv.add_derivative(0, 2, 1.0);
        assert_eq!(mv.active_indices(), &[1, 2]);
        assert_eq!(mv.gradient(0), &[0.0, 0.0]);
    }
}
