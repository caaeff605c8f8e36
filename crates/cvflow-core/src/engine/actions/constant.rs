use crate::core::models::shape::{Periodicity, Shape};
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;

#[derive(Debug, Default)]
pub struct ConstantKernel {
    data: Vec<f64>,
}

impl ActionKernel for ConstantKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let result = io.outputs_mut()[0].set_all(&self.data);
        result.map_err(|e| io.fail(e))
    }

    fn carries_forces(&self) -> bool {
        false
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("CONSTANT", "Create a constant scalar, vector or matrix value")
        .optional("VALUE", "the single number held by a scalar constant")
        .optional("VALUES", "the numbers held by a vector or matrix constant")
        .optional("NROWS", "the number of rows when VALUES describes a matrix")
        .optional("NCOLS", "the number of columns when VALUES describes a matrix")
        .optional("PERIODIC", "the domain of a periodic constant as min,max")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let (data, vector) = match (kw.f64("VALUE")?, kw.f64_vec("VALUES")?) {
        (Some(x), None) => (vec![x], false),
        (None, Some(values)) if !values.is_empty() => (values, true),
        (Some(_), Some(_)) => {
            return Err(EngineError::configuration(label, "use either VALUE or VALUES, not both"));
        }
        _ => return Err(EngineError::configuration(label, "one of VALUE or VALUES is required")),
    };

    let n = data.len();
    let shape = match (kw.usize("NROWS")?, kw.usize("NCOLS")?) {
        (None, None) if vector => Shape::Vector(n),
        (None, None) => Shape::Scalar,
        (rows, cols) => {
            let rows = rows.unwrap_or_else(|| n / cols.unwrap_or(1).max(1));
            let cols = cols.unwrap_or_else(|| n / rows.max(1));
            if rows * cols != n {
                return Err(EngineError::configuration(
                    label,
                    format!("{n} values cannot fill a {rows}x{cols} matrix"),
                ));
            }
            Shape::Matrix { rows, cols }
        }
    };

    let periodicity = match kw.f64_vec("PERIODIC")? {
        None => Periodicity::NonPeriodic,
        Some(domain) if domain.len() == 2 => Periodicity::periodic(domain[0], domain[1])
            .map_err(|e| EngineError::configuration(label, e.to_string()))?,
        Some(_) => {
            return Err(EngineError::configuration(label, "PERIODIC expects min,max"));
        }
    };

    Ok(ActionParts::new(ConstantKernel { data })
        .outputs(vec![Value::new("", shape, periodicity, false)]))
}

#[cfg(test)]
mod tests {
    use crate::core::models::shape::Shape;
    use crate::engine::actions::test_support::{build_graph, constant};
    use crate::engine::config::ActionInput;

    #[test]
    fn matrix_constant_is_filled_row_major() {
        let inputs = vec![
            ActionInput::new("CONSTANT")
                .label("m")
                .keyword("VALUES", "1,2,3,4,5,6")
                .keyword("NROWS", 2i64),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("m").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        let m = graph.value("m").unwrap();
        assert_eq!(*m.shape(), Shape::Matrix { rows: 2, cols: 3 });
        assert_eq!(m.get_at(&[1, 0]).unwrap(), 4.0);
    }

    #[test]
    fn scalar_and_vector_constants() {
        let inputs = vec![constant("s", "2.5"), constant("v", "1,2")];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("s").unwrap();
        graph.watch("v").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        assert_eq!(graph.value("s").unwrap().data(), &[2.5]);
        assert_eq!(*graph.value("v").unwrap().shape(), Shape::Vector(2));
    }

    #[test]
    fn inconsistent_matrix_dimensions_are_rejected() {
        let inputs = vec![
            ActionInput::new("CONSTANT")
                .label("m")
                .keyword("VALUES", "1,2,3")
                .keyword("NROWS", 2i64)
                .keyword("NCOLS", 2i64),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
        let inputs = vec![ActionInput::new("CONSTANT").label("x")];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }
}
