use crate::core::models::arena::AccessIntent;
use crate::core::models::multi_value::MultiValue;
use crate::core::models::shape::{Periodicity, Shape};
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{Reduction, TaskContext, TaskKernel};

/// Distances between atom pairs; task `t` handles local atoms `2t` and `2t + 1`.
#[derive(Debug)]
pub struct DistanceKernel {
    pairs: usize,
    components: bool,
    nopbc: bool,
}

impl TaskKernel for DistanceKernel {
    fn task_count(&self, _ctx: &TaskContext<'_>) -> usize {
        self.pairs
    }

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        let (a, b) = (2 * task, 2 * task + 1);
        let d = if self.nopbc {
            ctx.positions[b] - ctx.positions[a]
        } else {
            ctx.pbc.distance(&ctx.positions[a], &ctx.positions[b])
        };

        if self.components {
            for k in 0..3 {
                mv.set_value(k, d[k]);
                mv.add_derivative(k, ctx.layout.atom(a, k), -1.0);
                mv.add_derivative(k, ctx.layout.atom(b, k), 1.0);
            }
            return Ok(());
        }

        let r = d.norm();
        mv.set_value(0, r);
        if r > 0.0 {
            for k in 0..3 {
                mv.add_derivative(0, ctx.layout.atom(a, k), -d[k] / r);
                mv.add_derivative(0, ctx.layout.atom(b, k), d[k] / r);
            }
        }
        Ok(())
    }
}

impl ActionKernel for DistanceKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_tasks(&*self, Reduction::Disjoint)
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("DISTANCE", "Calculate the distance between pairs of atoms")
        .numbered(
            "ATOMS",
            "the pair of atoms; ATOMS1, ATOMS2, ... calculate a vector of distances",
        )
        .flag("COMPONENTS", "calculate the x, y and z components of the distance vector")
        .flag("NOPBC", "ignore the periodic boundary conditions")
        .component("x", "the x component of the distance vector")
        .component("y", "the y component of the distance vector")
        .component("z", "the z component of the distance vector")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let (pairs, scalar) = match kw.atoms("ATOMS")? {
        Some(atoms) => (vec![atoms], true),
        None => (kw.numbered_atoms("ATOMS")?, false),
    };
    if pairs.is_empty() {
        return Err(EngineError::configuration(label, "no atoms were specified"));
    }
    if let Some(bad) = pairs.iter().position(|p| p.len() != 2) {
        return Err(EngineError::configuration(
            label,
            format!("atom list {} should contain exactly two atoms", bad + 1),
        ));
    }

    let components = kw.flag("COMPONENTS");
    let shape = if scalar {
        Shape::Scalar
    } else {
        Shape::Vector(pairs.len())
    };
    let outputs = if components {
        ["x", "y", "z"]
            .iter()
            .map(|c| Value::new(*c, shape.clone(), Periodicity::NonPeriodic, true))
            .collect()
    } else {
        vec![Value::new("", shape, Periodicity::NonPeriodic, true)]
    };

    let kernel = DistanceKernel {
        pairs: pairs.len(),
        components,
        nopbc: kw.flag("NOPBC"),
    };
    let atoms = pairs.into_iter().flatten().collect();
    Ok(ActionParts::new(kernel)
        .atoms(atoms, AccessIntent::Read)
        .outputs(outputs))
}
