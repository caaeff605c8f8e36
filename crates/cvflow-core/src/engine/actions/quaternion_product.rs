use crate::core::models::multi_value::MultiValue;
use crate::core::models::shape::{Periodicity, Shape};
use crate::core::models::value::Value;
use crate::core::utils::quaternion::{Quaternion, conjugate_product};
use crate::engine::action::{ActionKernel, ActionParts, CalcIo, SetupIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{RowKernel, TaskContext};

const COMPONENTS: [&str; 4] = ["w", "i", "j", "k"];

/// Relative orientation `conj(q1[row]) * q2[col]` for every pair of quaternions.
///
/// Arguments 0..4 are the components of the first set, 4..8 those of the second.
#[derive(Debug, Default)]
pub struct QuaternionProductKernel;

fn quaternion(ctx: &TaskContext<'_>, first: usize, index: usize) -> Result<Quaternion, ComputationError> {
    let mut q = [0.0; 4];
    for (n, c) in q.iter_mut().enumerate() {
        *c = ctx.arguments[first + n].get(index)?;
    }
    Ok(q)
}

impl RowKernel for QuaternionProductKernel {
    fn row_count(&self, ctx: &TaskContext<'_>) -> usize {
        ctx.arguments[0].len()
    }

    fn setup_for_row(&self, _row: usize, ctx: &TaskContext<'_>, columns: &mut Vec<usize>) {
        columns.extend(0..ctx.arguments[4].len());
    }

    fn perform_element(
        &self,
        row: usize,
        column: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        let q1 = quaternion(ctx, 0, row)?;
        let q2 = quaternion(ctx, 4, column)?;
        let product = conjugate_product(&q1, &q2);
        for c in 0..4 {
            mv.set_value(c, product.components[c]);
            for n in 0..4 {
                mv.add_derivative(c, ctx.layout.argument(n, row), product.wrt_first[c][n]);
                mv.add_derivative(c, ctx.layout.argument(4 + n, column), product.wrt_second[c][n]);
            }
        }
        Ok(())
    }

    fn end_of_row(
        &self,
        row: usize,
        columns: &[usize],
        ctx: &TaskContext<'_>,
        indices: &mut Vec<usize>,
    ) {
        indices.clear();
        indices.extend((0..4).map(|n| ctx.layout.argument(n, row)));
        for n in 0..4 {
            indices.extend(columns.iter().map(|&col| ctx.layout.argument(4 + n, col)));
        }
        indices.sort_unstable();
    }
}

fn check_lengths(label: &str, lengths: &[usize]) -> Result<(usize, usize), EngineError> {
    let (first, second) = lengths.split_at(4);
    if first.iter().any(|&n| n != first[0]) || second.iter().any(|&n| n != second[0]) {
        return Err(EngineError::configuration(
            label,
            format!("the components of each quaternion set must have equal lengths, found {lengths:?}"),
        ));
    }
    Ok((first[0], second[0]))
}

impl ActionKernel for QuaternionProductKernel {
    fn setup(&mut self, io: &mut SetupIo<'_>) -> Result<(), EngineError> {
        let lengths: Vec<usize> = io.arguments().iter().map(|a| a.len()).collect();
        let (rows, cols) = check_lengths(io.label(), &lengths)?;
        for output in 0..4 {
            io.reshape(output, Shape::Matrix { rows, cols });
        }
        Ok(())
    }

    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_rows(&*self)
    }
}

pub fn keywords() -> Keywords {
    let mut keywords = Keywords::new(
        "QUATERNION_PRODUCT_MATRIX",
        "Compute the relative orientation of every pair taken from two sets of quaternions",
    )
    .compulsory(
        "ARG",
        "eight vectors: w, i, j and k of the first set, then w, i, j and k of the second",
    );
    for component in COMPONENTS {
        keywords = keywords.component(component, "this component of the product matrix");
    }
    keywords
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let arguments = ctx.arguments(kw, "ARG")?;
    if arguments.len() != 8 {
        return Err(EngineError::configuration(
            label,
            format!("expected eight arguments, found {}", arguments.len()),
        ));
    }
    let mut lengths = Vec::with_capacity(8);
    for r in &arguments {
        let value = ctx
            .value(*r)
            .ok_or_else(|| EngineError::Internal(format!("dangling argument of '{label}'")))?;
        if value.rank() > 1 {
            return Err(EngineError::configuration(
                label,
                format!("quaternion components must be vectors, found {}", value.shape()),
            ));
        }
        lengths.push(value.len());
    }
    let (rows, cols) = check_lengths(label, &lengths)?;

    let outputs = COMPONENTS
        .iter()
        .map(|c| Value::new(*c, Shape::Matrix { rows, cols }, Periodicity::NonPeriodic, true))
        .collect();
    Ok(ActionParts::new(QuaternionProductKernel)
        .arguments(arguments)
        .outputs(outputs))
}
