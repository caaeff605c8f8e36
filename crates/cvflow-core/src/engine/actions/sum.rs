use crate::core::models::multi_value::MultiValue;
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{Reduction, TaskContext, TaskKernel};

/// Adds every element of its argument into a scalar, one task per element.
#[derive(Debug, Default)]
pub struct SumKernel;

impl TaskKernel for SumKernel {
    fn task_count(&self, ctx: &TaskContext<'_>) -> usize {
        ctx.arguments[0].len()
    }

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        mv.set_value(0, ctx.arguments[0].get(task)?);
        mv.add_derivative(0, ctx.layout.argument(0, task), 1.0);
        Ok(())
    }
}

impl ActionKernel for SumKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_tasks(&*self, Reduction::Sum)
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("SUM", "Calculate the sum of the elements of a vector or matrix")
        .compulsory("ARG", "the value whose elements are added up")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let arguments = ctx.arguments(kw, "ARG")?;
    if arguments.len() != 1 {
        return Err(EngineError::configuration(
            ctx.label(),
            format!("expected exactly one argument, found {}", arguments.len()),
        ));
    }
    if ctx.value(arguments[0]).is_some_and(Value::is_periodic) {
        return Err(EngineError::configuration(
            ctx.label(),
            "cannot sum the elements of a periodic value",
        ));
    }
    Ok(ActionParts::new(SumKernel)
        .arguments(arguments)
        .outputs(vec![Value::scalar("", true)]))
}

#[cfg(test)]
mod tests {
    use crate::engine::actions::test_support::{build_graph, constant};
    use crate::engine::config::{ActionInput, EngineConfigBuilder};
    use crate::engine::graph::GraphBuilder;
    use crate::engine::registry::ActionRegistry;
    use crate::core::models::arena::AtomArena;

    #[test]
    fn sums_elements_and_spreads_force_back() {
        let inputs = vec![
            constant("v", "1.0,2.5,-0.5"),
            ActionInput::new("SUM").label("s").keyword("ARG", "v"),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("s").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        assert_eq!(graph.value("s").unwrap().data(), &[3.0]);
        graph.add_force("s", 0, 2.0).unwrap();
        graph.apply(&mut arena).unwrap();
        assert_eq!(graph.value("v").unwrap().forces(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn parallel_and_serial_sums_agree() {
        let values: Vec<String> = (0..1000).map(|i| format!("{}", (i as f64 * 0.37).sin())).collect();
        let inputs = vec![
            constant("v", &values.join(",")),
            ActionInput::new("SUM").label("s").keyword("ARG", "v"),
        ];
        let registry = ActionRegistry::with_builtins();
        let mut results = Vec::new();
        for parallel in [false, true] {
            let config = EngineConfigBuilder::new()
                .natoms(1)
                .parallel(parallel)
                .min_parallel_tasks(8)
                .watch("s")
                .build()
                .unwrap();
            let mut arena = AtomArena::new(1);
            let mut graph = GraphBuilder::new(&registry, config)
                .build(&inputs, &mut arena)
                .unwrap();
            graph.calculate(&mut arena, 0).unwrap();
            results.push(graph.value("s").unwrap().get(0).unwrap());
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn exactly_one_argument_is_required() {
        let inputs = vec![
            constant("a", "1.0"),
            constant("b", "1.0"),
            ActionInput::new("SUM").label("s").keyword("ARG", "a,b"),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }
}
