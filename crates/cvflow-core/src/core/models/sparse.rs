/// A sparse list of `(input index, partial derivative)` pairs.
///
/// Each input index appears at most once; adding to an index that is already present
/// accumulates in place. Clearing keeps the allocation so that rows can be reused from
/// one step to the next without reallocating.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
    entries: Vec<(usize, f64)>,
}

impl SparseRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Accumulates `delta` into the entry for `index`, appending it if absent.
    ///
    /// Returns `true` when a new entry was created.
    pub fn add(&mut self, index: usize, delta: f64) -> bool {
        match self.entries.iter_mut().find(|(i, _)| *i == index) {
            Some((_, partial)) => {
                *partial += delta;
                false
            }
            None => {
                self.entries.push((index, delta));
                true
            }
        }
    }

    pub fn get(&self, index: usize) -> f64 {
        self.entries
            .iter()
            .find(|(i, _)| *i == index)
            .map_or(0.0, |(_, partial)| *partial)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    /// Replaces the contents with `entries`, which must not repeat an index.
    pub(crate) fn assign(&mut self, entries: &[(usize, f64)]) {
        self.entries.clear();
        self.entries.extend_from_slice(entries);
    }

    pub(crate) fn merge(&mut self, other: &SparseRow) {
        for (index, delta) in other.iter() {
            self.add(index, delta);
        }
    }
}
