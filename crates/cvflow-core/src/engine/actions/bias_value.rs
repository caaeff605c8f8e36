use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, ApplyIo, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;

/// Uses the sum of the elements of its arguments as a bias.
#[derive(Debug, Default)]
pub struct BiasValueKernel;

impl ActionKernel for BiasValueKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let bias: f64 = io.arguments().iter().flat_map(|a| a.data()).sum();
        let result = io.outputs_mut()[0].set(0, bias);
        result.map_err(|e| io.fail(e))
    }

    fn apply(&self, io: &mut ApplyIo<'_>) -> Result<(), EngineError> {
        if !io.on_step() {
            return Ok(());
        }
        let force = -(io.stride() as f64);
        for argument in 0..io.argument_count() {
            let len = io.argument(argument).map_or(0, Value::len);
            for element in 0..len {
                io.add_argument_force(argument, element, force)?;
            }
        }
        Ok(())
    }

    fn demands_forces(&self) -> bool {
        true
    }

    fn energy(&self, outputs: &[Value]) -> Option<f64> {
        outputs.first().and_then(|v| v.get(0).ok())
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("BIASVALUE", "Take the values of the arguments and use their sum as a bias")
        .compulsory("ARG", "the values to use as a bias")
        .with_stride()
        .component("bias", "the instantaneous value of the bias potential")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let arguments = ctx.arguments(kw, "ARG")?;
    if arguments.is_empty() {
        return Err(EngineError::configuration(ctx.label(), "no arguments were specified"));
    }
    let stride = kw.usize("STRIDE")?.unwrap_or(1);
    Ok(ActionParts::new(BiasValueKernel)
        .pilot(stride)
        .arguments(arguments)
        .outputs(vec![Value::scalar("bias", false)]))
}
