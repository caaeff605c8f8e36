use crate::core::models::arena::AtomArena;
use crate::core::models::value::Value;
use crate::core::structure::reference::ReferenceStructure;
use crate::engine::config::{ActionInput, EngineConfig};
use crate::engine::error::EngineError;
use crate::engine::graph::{ActionGraph, GraphBuilder};
use crate::engine::registry::ActionRegistry;
use nalgebra::{Matrix3, Vector3};
use tracing::{info, instrument, trace};

/// What a driver receives back after one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: u64,
    /// Sum of the energies of every bias evaluated on this step.
    pub bias: f64,
    /// Forces on all atoms, in global index order.
    pub forces: Vec<Vector3<f64>>,
}

/// A built graph bound to the arena it evaluates.
///
/// The driver pushes positions (and the cell, if it changes) before each call to
/// [`Session::step`]. Actions holding write leases may move atoms during the step; the
/// rewritten positions stay in the arena and are visible through [`Session::positions`].
#[derive(Debug)]
pub struct Session {
    graph: ActionGraph,
    arena: AtomArena,
}

impl Session {
    pub fn new(
        registry: &ActionRegistry,
        config: EngineConfig,
        inputs: &[ActionInput],
        structures: impl IntoIterator<Item = (String, ReferenceStructure)>,
    ) -> Result<Self, EngineError> {
        let mut arena = AtomArena::new(config.natoms);
        let mut builder = GraphBuilder::new(registry, config);
        for (name, structure) in structures {
            builder = builder.structure(name, structure);
        }
        let graph = builder.build(inputs, &mut arena)?;
        info!(
            actions = graph.len(),
            atoms = arena.natoms(),
            "Session ready"
        );
        Ok(Self { graph, arena })
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ActionGraph {
        &mut self.graph
    }

    pub fn natoms(&self) -> usize {
        self.arena.natoms()
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        self.arena.positions()
    }

    pub fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), EngineError> {
        Ok(self.arena.set_positions(positions)?)
    }

    /// Sets the simulation cell; rows are the lattice vectors, all zeros means no PBC.
    pub fn set_cell(&mut self, cell: Matrix3<f64>) -> Result<(), EngineError> {
        Ok(self.arena.set_cell(cell)?)
    }

    pub fn value(&self, name: &str) -> Result<&Value, EngineError> {
        self.graph.value(name)
    }

    /// Forward pass, reverse pass and force handoff for one MD step.
    #[instrument(skip_all, name = "session_step", fields(step))]
    pub fn step(&mut self, step: u64) -> Result<StepOutcome, EngineError> {
        self.graph.calculate(&mut self.arena, step)?;
        self.graph.apply(&mut self.arena)?;
        let bias = self.graph.total_bias();
        trace!(bias, "Step complete");
        Ok(StepOutcome {
            step,
            bias,
            forces: self.arena.forces().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfigBuilder;

    fn wall_session() -> Session {
        let inputs = vec![
            ActionInput::new("DISTANCE").label("d").keyword("ATOMS", "1,2"),
            ActionInput::new("UPPER_WALLS")
                .label("uw")
                .keyword("ARG", "d")
                .keyword("AT", 1.0)
                .keyword("KAPPA", 2.0),
        ];
        let config = EngineConfigBuilder::new()
            .natoms(2)
            .parallel(false)
            .watch("d")
            .build()
            .unwrap();
        Session::new(&ActionRegistry::with_builtins(), config, &inputs, Vec::new()).unwrap()
    }

    #[test]
    fn step_returns_bias_and_forces_in_global_order() {
        let mut session = wall_session();
        session
            .set_positions(&[Vector3::zeros(), Vector3::new(3.0, 0.0, 0.0)])
            .unwrap();
        let outcome = session.step(0).unwrap();
        // E = kappa (d - at)^2 = 2 * 2^2, pulling the atoms together.
        assert!((outcome.bias - 8.0).abs() < 1e-12);
        assert_eq!(outcome.forces.len(), 2);
        assert!((outcome.forces[0].x - 8.0).abs() < 1e-12);
        assert!((outcome.forces[1].x + 8.0).abs() < 1e-12);
        assert!((session.value("d").unwrap().get(0).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn forces_do_not_accumulate_across_steps() {
        let mut session = wall_session();
        session
            .set_positions(&[Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)])
            .unwrap();
        let first = session.step(0).unwrap();
        assert_eq!(first.bias, 0.0);
        session
            .set_positions(&[Vector3::zeros(), Vector3::new(2.0, 0.0, 0.0)])
            .unwrap();
        let second = session.step(1).unwrap();
        assert!((second.forces[1].x + 4.0).abs() < 1e-12);
        let third = session.step(2).unwrap();
        assert_eq!(second.forces, third.forces);
    }

    #[test]
    fn wrong_number_of_positions_is_an_input_error() {
        let mut session = wall_session();
        let err = session.set_positions(&[Vector3::zeros()]).unwrap_err();
        assert!(matches!(err, EngineError::Input(_)));
    }
}
