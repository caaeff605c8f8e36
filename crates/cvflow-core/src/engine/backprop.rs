//! Reverse-mode force propagation through stored Jacobians.

use super::action::ApplyIo;
use super::error::EngineError;
use crate::core::models::shape::Shape;
use crate::core::models::value::Value;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Contracts the forces on every output with its Jacobian and hands the resulting forces to
/// the arguments and atoms the derivative indices refer to.
pub fn apply_jacobian(io: &mut ApplyIo<'_>) -> Result<(), EngineError> {
    let total = io.layout().total();
    let parallel = io.tasks().is_parallel();
    let forces = accumulate(io.outputs(), total, parallel);
    trace!(label = io.label(), total, "Back-propagating forces");
    for (index, &force) in forces.iter().enumerate() {
        if force != 0.0 {
            io.add_derivative_force(index, force)?;
        }
    }
    Ok(())
}

/// Dense buffer of `sum_e f_e * dv_e/dx_i` over all outputs, indexed by derivative index.
pub fn accumulate(outputs: &[Value], total: usize, parallel: bool) -> Vec<f64> {
    let mut buffer = vec![0.0; total];
    for value in outputs
        .iter()
        .filter(|v| v.forces_added() && v.has_derivatives())
    {
        let contributions = match *value.shape() {
            Shape::Matrix { rows, cols } => matrix_contributions(value, rows, cols, parallel),
            _ => element_contributions(value, parallel),
        };
        for (index, force) in contributions {
            if let Some(slot) = buffer.get_mut(index) {
                *slot += force;
            }
        }
    }
    buffer
}

fn element_contributions(value: &Value, parallel: bool) -> Vec<(usize, f64)> {
    let per_element = |element: usize| -> Vec<(usize, f64)> {
        let force = value.force(element);
        if force == 0.0 {
            return Vec::new();
        }
        value
            .jacobian()
            .row(element)
            .map(|row| row.iter().map(|(i, d)| (i, force * d)).collect())
            .unwrap_or_default()
    };

    #[cfg(feature = "parallel")]
    if parallel {
        return (0..value.len())
            .into_par_iter()
            .flat_map_iter(per_element)
            .collect();
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    (0..value.len()).flat_map(per_element).collect()
}

fn matrix_contributions(value: &Value, rows: usize, cols: usize, parallel: bool) -> Vec<(usize, f64)> {
    let per_row = |row: usize| -> Vec<(usize, f64)> {
        let jacobian = value.jacobian();
        let start = row * cols;
        if (start..start + cols).all(|e| value.force(e) == 0.0) {
            return Vec::new();
        }
        // Element-wise producers record no row indices.
        if jacobian.row_indices(row).is_empty() {
            return (start..start + cols)
                .filter_map(|e| Some((value.force(e), jacobian.row(e)?)))
                .flat_map(|(force, r)| r.iter().map(move |(i, d)| (i, force * d)))
                .collect();
        }
        jacobian
            .row_indices(row)
            .iter()
            .filter_map(|&index| {
                let total: f64 = (start..start + cols)
                    .map(|e| value.force(e) * jacobian.row(e).map_or(0.0, |r| r.get(index)))
                    .sum();
                (total != 0.0).then_some((index, total))
            })
            .collect()
    };

    #[cfg(feature = "parallel")]
    if parallel {
        return (0..rows).into_par_iter().flat_map_iter(per_row).collect();
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    (0..rows).flat_map(per_row).collect()
}
