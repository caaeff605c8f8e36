use crate::core::models::multi_value::MultiValue;
use crate::core::models::shape::Shape;
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo, DerivativeTarget, SetupIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{Reduction, TaskContext, TaskKernel};

/// Joins scalars and vectors into one vector. Element `t` of the output is derivative
/// index `t`, so each task copies exactly one argument element.
#[derive(Debug, Default)]
pub struct ConcatenateKernel;

impl TaskKernel for ConcatenateKernel {
    fn task_count(&self, ctx: &TaskContext<'_>) -> usize {
        ctx.arguments.iter().map(|a| a.len()).sum()
    }

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        if let Some(DerivativeTarget::Argument { argument, element }) = ctx.layout.resolve(task) {
            mv.set_value(0, ctx.arguments[argument].get(element)?);
            mv.add_derivative(0, task, 1.0);
        }
        Ok(())
    }
}

impl ActionKernel for ConcatenateKernel {
    fn setup(&mut self, io: &mut SetupIo<'_>) -> Result<(), EngineError> {
        let total = io.arguments().iter().map(|a| a.len()).sum();
        io.reshape(0, Shape::Vector(total));
        Ok(())
    }

    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_tasks(&*self, Reduction::Disjoint)
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("CONCATENATE", "Join a set of scalars and vectors into a single vector")
        .numbered("ARG", "the values to join; ARG1, ARG2, ... are joined in numeric order")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let mut arguments = ctx.arguments(kw, "ARG")?;
    for (_, key) in kw.numbered_keys("ARG") {
        arguments.extend(ctx.arguments(kw, &key)?);
    }
    if arguments.is_empty() {
        return Err(EngineError::configuration(label, "no arguments were specified"));
    }

    let values: Vec<&Value> = arguments.iter().filter_map(|r| ctx.value(*r)).collect();
    if let Some(matrix) = values.iter().find(|v| v.rank() > 1) {
        return Err(EngineError::configuration(
            label,
            format!("cannot concatenate {} '{}'", matrix.shape(), matrix.name()),
        ));
    }
    let periodicity = values[0].periodicity();
    if values.iter().any(|v| v.periodicity() != periodicity) {
        return Err(EngineError::configuration(
            label,
            "all concatenated values must have the same periodicity",
        ));
    }

    let total = values.iter().map(|v| v.len()).sum();
    Ok(ActionParts::new(ConcatenateKernel)
        .arguments(arguments)
        .outputs(vec![Value::new("", Shape::Vector(total), periodicity, true)]))
}
