use crate::core::models::multi_value::MultiValue;
use crate::core::models::shape::Shape;
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo, SetupIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{Reduction, TaskContext, TaskKernel};
use itertools::Itertools;

/// Argument positions of the masks; argument 0 is always the masked value.
#[derive(Debug, Clone, Copy)]
enum Masks {
    Vector(usize),
    Matrix {
        rows: Option<usize>,
        columns: Option<usize>,
    },
}

/// Keeps the elements whose mask entries are zero.
#[derive(Debug)]
pub struct SelectWithMaskKernel {
    masks: Masks,
    kept: Vec<usize>,
}

fn unmasked(mask: &Value) -> Vec<usize> {
    mask.data()
        .iter()
        .enumerate()
        .filter(|(_, m)| **m == 0.0)
        .map(|(i, _)| i)
        .collect()
}

impl TaskKernel for SelectWithMaskKernel {
    fn task_count(&self, _ctx: &TaskContext<'_>) -> usize {
        self.kept.len()
    }

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        let element = self.kept[task];
        mv.set_value(0, ctx.arguments[0].get(element)?);
        mv.add_derivative(0, ctx.layout.argument(0, element), 1.0);
        Ok(())
    }
}

impl ActionKernel for SelectWithMaskKernel {
    fn setup(&mut self, io: &mut SetupIo<'_>) -> Result<(), EngineError> {
        let arguments = io.arguments();
        let data = arguments[0];
        let shape = match self.masks {
            Masks::Vector(m) => {
                let mask = arguments[m];
                if mask.len() != data.len() {
                    return Err(EngineError::configuration(
                        io.label(),
                        format!("mask has {} elements but the value has {}", mask.len(), data.len()),
                    ));
                }
                self.kept = unmasked(mask);
                Shape::Vector(self.kept.len())
            }
            Masks::Matrix { rows, columns } => {
                let Shape::Matrix { rows: nrows, cols: ncols } = *data.shape() else {
                    return Err(EngineError::configuration(
                        io.label(),
                        format!("ROW_MASK and COLUMN_MASK need a matrix, found {}", data.shape()),
                    ));
                };
                let select = |mask: Option<usize>, n: usize, what: &str| match mask {
                    None => Ok((0..n).collect::<Vec<_>>()),
                    Some(m) if arguments[m].len() == n => Ok(unmasked(arguments[m])),
                    Some(m) => Err(EngineError::configuration(
                        io.label(),
                        format!("{what} mask has {} elements but the matrix has {n}", arguments[m].len()),
                    )),
                };
                let kept_rows = select(rows, nrows, "row")?;
                let kept_columns = select(columns, ncols, "column")?;
                self.kept = kept_rows
                    .iter()
                    .cartesian_product(&kept_columns)
                    .map(|(r, c)| r * ncols + c)
                    .collect();
                Shape::Matrix {
                    rows: kept_rows.len(),
                    cols: kept_columns.len(),
                }
            }
        };
        io.reshape(0, shape);
        Ok(())
    }

    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_tasks(&*self, Reduction::Disjoint)
    }
}

pub fn keywords() -> Keywords {
    Keywords::new(
        "SELECT_WITH_MASK",
        "Keep the elements of a vector or matrix whose mask entries are zero",
    )
    .compulsory("ARG", "the value from which elements are selected")
    .optional("MASK", "the mask of a vector argument")
    .optional("ROW_MASK", "the mask for the rows of a matrix argument")
    .optional("COLUMN_MASK", "the mask for the columns of a matrix argument")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let mut arguments = ctx.arguments(kw, "ARG")?;
    if arguments.len() != 1 {
        return Err(EngineError::configuration(
            label,
            format!("expected exactly one argument, found {}", arguments.len()),
        ));
    }
    let data = ctx
        .value(arguments[0])
        .ok_or_else(|| EngineError::Internal(format!("dangling argument of '{label}'")))?;

    let mut mask = |key: &str| -> Result<Option<usize>, EngineError> {
        let refs = ctx.arguments(kw, key)?;
        match refs.as_slice() {
            [] => Ok(None),
            [r] => {
                arguments.push(*r);
                Ok(Some(arguments.len() - 1))
            }
            _ => Err(EngineError::configuration(label, format!("{key} takes a single value"))),
        }
    };

    let (masks, shape) = if data.shape().is_matrix() {
        if kw.contains("MASK") {
            return Err(EngineError::configuration(label, "use ROW_MASK and COLUMN_MASK for matrices"));
        }
        let masks = Masks::Matrix {
            rows: mask("ROW_MASK")?,
            columns: mask("COLUMN_MASK")?,
        };
        (masks, data.shape().clone())
    } else {
        let m = mask("MASK")?
            .ok_or_else(|| EngineError::configuration(label, "MASK is required for a vector argument"))?;
        (Masks::Vector(m), Shape::Vector(data.len()))
    };

    let kernel = SelectWithMaskKernel {
        masks,
        kept: Vec::new(),
    };
    let output = Value::new("", shape, data.periodicity(), true);
    Ok(ActionParts::new(kernel).arguments(arguments).outputs(vec![output]))
}

#[cfg(test)]
mod tests {
    use crate::core::models::shape::Shape;
    use crate::engine::actions::test_support::{build_graph, constant};
    use crate::engine::config::ActionInput;

    #[test]
    fn keeps_elements_with_zero_mask_and_routes_forces_back() {
        let inputs = vec![
            constant("v", "10,20,30,40"),
            constant("m", "0,1,0,1"),
            ActionInput::new("SELECT_WITH_MASK")
                .label("s")
                .keyword("ARG", "v")
                .keyword("MASK", "m"),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("s").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        assert_eq!(graph.value("s").unwrap().data(), &[10.0, 30.0]);
        graph.add_force("s", 1, 2.0).unwrap();
        graph.apply(&mut arena).unwrap();
        assert_eq!(graph.value("v").unwrap().forces(), &[0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn matrix_rows_and_columns_are_masked_independently() {
        let inputs = vec![
            ActionInput::new("CONSTANT")
                .label("x")
                .keyword("VALUES", "1,2,3,4,5,6")
                .keyword("NROWS", 2i64),
            constant("rows", "1,0"),
            ActionInput::new("SELECT_WITH_MASK")
                .label("s")
                .keyword("ARG", "x")
                .keyword("ROW_MASK", "rows"),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("s").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        let s = graph.value("s").unwrap();
        assert_eq!(*s.shape(), Shape::Matrix { rows: 1, cols: 3 });
        assert_eq!(s.data(), &[4.0, 5.0, 6.0]);
        graph.add_force("s", 2, 1.0).unwrap();
        graph.apply(&mut arena).unwrap();
        assert_eq!(graph.value("x").unwrap().forces(), &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn vector_argument_needs_a_mask() {
        let inputs = vec![
            constant("v", "1,2"),
            ActionInput::new("SELECT_WITH_MASK").label("s").keyword("ARG", "v"),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }
}
