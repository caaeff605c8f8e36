use super::action::{ActionNode, ApplyIo, AtomAccessor, CalcIo, DerivativeLayout, SetupIo};
use super::config::{ActionInput, EngineConfig};
use super::error::EngineError;
use super::registry::{ActionRegistry, BuildContext, component_of};
use super::scheduler::TaskLoop;
use crate::core::models::arena::{ArenaError, AtomArena};
use crate::core::models::ids::{ActionId, ValueRef};
use crate::core::models::shape::Shape;
use crate::core::models::value::Value;
use crate::core::structure::reference::ReferenceStructure;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Assembles an [`ActionGraph`] from action inputs in script order.
pub struct GraphBuilder<'a> {
    registry: &'a ActionRegistry,
    config: EngineConfig,
    structures: HashMap<String, Arc<ReferenceStructure>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a ActionRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            structures: HashMap::new(),
        }
    }

    /// Makes a reference structure available to `MOLINFO STRUCTURE=<name>`.
    pub fn structure(mut self, name: impl Into<String>, structure: ReferenceStructure) -> Self {
        self.structures.insert(name.into(), Arc::new(structure));
        self
    }

    #[instrument(skip_all, name = "graph_build", fields(actions = inputs.len()))]
    pub fn build(self, inputs: &[ActionInput], arena: &mut AtomArena) -> Result<ActionGraph, EngineError> {
        if arena.natoms() != self.config.natoms {
            return Err(EngineError::Input(ArenaError::CountMismatch {
                expected: self.config.natoms,
                found: arena.natoms(),
            }));
        }
        arena.release_all();

        let mut assigned = Vec::with_capacity(inputs.len());
        let mut pending = HashMap::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let label = input.label.clone().unwrap_or_else(|| format!("@{index}"));
            if label.is_empty() || label.contains('.') || label.contains(char::is_whitespace) {
                return Err(EngineError::configuration(
                    &label,
                    "labels must be non-empty and contain neither dots nor whitespace",
                ));
            }
            if pending
                .insert(label.clone(), input.name.to_ascii_uppercase())
                .is_some()
            {
                return Err(EngineError::DuplicateLabel(label));
            }
            assigned.push(label);
        }

        let mut nodes: Vec<ActionNode> = Vec::with_capacity(inputs.len());
        let mut labels = HashMap::with_capacity(inputs.len());
        let mut dependencies = DiGraph::with_capacity(inputs.len(), inputs.len());

        for (index, (input, label)) in inputs.iter().zip(assigned).enumerate() {
            pending.remove(&label);
            let registered = self
                .registry
                .get(&input.name)
                .ok_or_else(|| EngineError::UnknownAction(input.name.clone()))?;
            let keywords = registered.keywords().parse(&label, &input.keywords)?;
            let ctx = BuildContext {
                label: &label,
                nodes: &nodes,
                labels: &labels,
                pending: &pending,
                natoms: self.config.natoms,
                structures: &self.structures,
            };
            let mut parts = registered.construct(&ctx, &keywords)?;

            let atoms = match parts.atoms.take() {
                Some((atoms, writes)) => {
                    let (lease, token) = arena
                        .request_writing_first(&label, atoms, writes)
                        .map_err(|e| EngineError::configuration(&label, e.to_string()))?;
                    Some(AtomAccessor::new(lease, token))
                }
                None => None,
            };
            let id = ActionId(index);
            let node = parts.into_node(id, &label, registered.keywords().action, atoms);
            debug!(
                label = %node.label(),
                action = %node.name(),
                values = node.values().len(),
                arguments = node.arguments().len(),
                pilot = node.is_pilot(),
                "Action added to graph"
            );

            let vertex = dependencies.add_node(id);
            for argument in node.arguments() {
                dependencies.update_edge(NodeIndex::new(argument.action.index()), vertex, ());
            }
            labels.insert(label, id);
            nodes.push(node);
        }

        if let Err(cycle) = toposort(&dependencies, None) {
            let id = dependencies[cycle.node_id()];
            return Err(EngineError::ordering(&nodes[id.index()].label, "dependency cycle"));
        }

        let mut graph = ActionGraph {
            active: vec![false; nodes.len()],
            nodes,
            labels,
            dependencies,
            watched: Vec::new(),
            tasks: TaskLoop::new(self.config.parallel, self.config.min_parallel_tasks),
            step: 0,
        };
        for name in &self.config.watch {
            graph.watch(name)?;
        }
        info!(actions = graph.nodes.len(), "Action graph built");
        Ok(graph)
    }
}

/// The ordered set of actions and the dataflow between them.
///
/// Evaluation follows script order; the reverse pass visits active actions in reverse order
/// so that every action sees the complete forces on its outputs before propagating them.
#[derive(Debug)]
pub struct ActionGraph {
    nodes: Vec<ActionNode>,
    labels: HashMap<String, ActionId>,
    dependencies: DiGraph<ActionId, ()>,
    watched: Vec<ActionId>,
    active: Vec<bool>,
    tasks: TaskLoop,
    step: u64,
}

impl ActionGraph {
    pub fn nodes(&self) -> &[ActionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ActionId) -> Option<&ActionNode> {
        self.nodes.get(id.index())
    }

    pub fn find(&self, label: &str) -> Option<&ActionNode> {
        self.labels.get(label).map(|id| &self.nodes[id.index()])
    }

    pub fn dependencies(&self) -> &DiGraph<ActionId, ()> {
        &self.dependencies
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Looks a value up by `label` or `label.component`.
    pub fn value_ref(&self, name: &str) -> Result<ValueRef, EngineError> {
        let label = name.split_once('.').map_or(name, |(l, _)| l);
        let node = self
            .find(label)
            .ok_or_else(|| EngineError::UnknownValue(name.to_string()))?;
        component_of(node, name, label)
            .map(|c| ValueRef::new(node.id(), c))
            .ok_or_else(|| EngineError::UnknownValue(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<&Value, EngineError> {
        let r = self.value_ref(name)?;
        self.resolve(r)
            .ok_or_else(|| EngineError::UnknownValue(name.to_string()))
    }

    pub fn resolve(&self, r: ValueRef) -> Option<&Value> {
        self.nodes.get(r.action.index())?.value(r.component)
    }

    /// Keeps the action producing `name` (and everything it needs) active on every step.
    pub fn watch(&mut self, name: &str) -> Result<(), EngineError> {
        let r = self.value_ref(name)?;
        if !self.watched.contains(&r.action) {
            self.watched.push(r.action);
        }
        Ok(())
    }

    pub fn is_active(&self, id: ActionId) -> bool {
        self.active.get(id.index()).copied().unwrap_or(false)
    }

    /// Pilots due on `step` and watched actions, together with every action they depend on.
    pub fn active_set(&self, step: u64) -> Vec<bool> {
        let mut active = vec![false; self.nodes.len()];
        let seeds = self
            .nodes
            .iter()
            .filter(|n| n.pilot().is_some_and(|p| p.on_step(step)))
            .map(ActionNode::id)
            .chain(self.watched.iter().copied());
        let upstream = Reversed(&self.dependencies);
        for seed in seeds {
            if active[seed.index()] {
                continue;
            }
            let mut dfs = Dfs::new(upstream, NodeIndex::new(seed.index()));
            while let Some(vertex) = dfs.next(upstream) {
                active[vertex.index()] = true;
            }
        }
        active
    }

    /// Forward pass: evaluates every active action in script order.
    #[instrument(skip_all, name = "graph_calculate", fields(step))]
    pub fn calculate(&mut self, arena: &mut AtomArena, step: u64) -> Result<(), EngineError> {
        self.step = step;
        self.active = self.active_set(step);
        arena.clear_forces();
        for node in &mut self.nodes {
            node.clear_forces();
        }

        for index in 0..self.nodes.len() {
            if !self.active[index] {
                continue;
            }
            let (upstream, rest) = self.nodes.split_at_mut(index);
            evaluate(&mut rest[0], upstream, arena, step, &self.tasks)?;
        }
        Ok(())
    }

    /// Adds an external force to one element of a value before the reverse pass.
    pub fn add_force(&mut self, name: &str, element: usize, force: f64) -> Result<(), EngineError> {
        let r = self.value_ref(name)?;
        let node = &mut self.nodes[r.action.index()];
        let label = node.label.clone();
        let value = node
            .value_mut(r.component)
            .ok_or_else(|| EngineError::UnknownValue(name.to_string()))?;
        value
            .add_force(element, force)
            .map_err(|e| EngineError::computation(&label, e))
    }

    /// Reverse pass: propagates forces from biases (and external forces) down to the atoms,
    /// then adds each action's atom forces into the arena.
    #[instrument(skip_all, name = "graph_apply", fields(step = self.step))]
    pub fn apply(&mut self, arena: &mut AtomArena) -> Result<(), EngineError> {
        let step = self.step;
        for index in (0..self.nodes.len()).rev() {
            if !self.active[index] {
                continue;
            }
            let (upstream, rest) = self.nodes.split_at_mut(index);
            let node = &mut rest[0];
            if !node.kernel.carries_forces() {
                continue;
            }
            if !node.kernel.demands_forces() && !node.values().iter().any(Value::forces_added) {
                continue;
            }
            trace!(label = %node.label, "Applying forces");
            let ActionNode {
                label,
                kernel,
                outputs,
                arguments,
                atoms,
                layout,
                pilot,
                ..
            } = node;
            let mut io = ApplyIo {
                label: label.as_str(),
                on_step: pilot.is_none_or(|p| p.on_step(step)),
                stride: pilot.map_or(1, |p| p.stride()),
                outputs: outputs.as_ref().map_or([].as_slice(), |p| p.values()),
                arguments: arguments.as_ref().map_or([].as_slice(), |a| a.refs()),
                upstream,
                atoms: atoms.as_mut(),
                layout,
                tasks: &self.tasks,
            };
            kernel.apply(&mut io)?;
        }

        for node in &self.nodes {
            if let Some(accessor) = node.atoms.as_ref().filter(|a| a.forces_added()) {
                arena
                    .add_forces(accessor.lease(), accessor.forces())
                    .map_err(|e| EngineError::computation(&node.label, e))?;
            }
        }
        Ok(())
    }

    /// Sum of the energies of the biases evaluated on the current step.
    pub fn total_bias(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| self.is_active(n.id()))
            .filter_map(|n| n.kernel.energy(n.values()))
            .sum()
    }

    /// Mermaid flowchart of the graph. With `forces` the arrows follow the reverse pass.
    pub fn to_mermaid(&self, forces: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "flowchart {}", if forces { "BT" } else { "TB" });
        let _ = writeln!(out, "MD(positions from MD)");
        for node in &self.nodes {
            let _ = writeln!(out, "{}([\"label={}\n {}\"])", mermaid_id(node), node.label, node.name);
        }
        let mut links = 0;
        let mut styles = Vec::new();
        for node in &self.nodes {
            if forces && !node.kernel.carries_forces() {
                continue;
            }
            if let Some(atoms) = node.atoms() {
                if forces {
                    let _ = writeln!(out, "{} -- {} atoms --> MD", mermaid_id(node), atoms.len());
                } else if !atoms.is_writer() {
                    let _ = writeln!(out, "MD --> {}", mermaid_id(node));
                } else {
                    let _ = writeln!(out, "{} -. rewrites .-> MD", mermaid_id(node));
                }
                links += 1;
            }
            for r in node.arguments() {
                let source = &self.nodes[r.action.index()];
                let value = source.value(r.component);
                let name = value.map_or("?", |v| v.name());
                if forces {
                    let _ = writeln!(out, "{} -- {} --> {}", mermaid_id(node), name, mermaid_id(source));
                } else {
                    let _ = writeln!(out, "{} -- {} --> {}", mermaid_id(source), name, mermaid_id(node));
                }
                if let Some(value) = value {
                    styles.push((links, rank_colour(value)));
                }
                links += 1;
            }
        }
        for (link, colour) in styles {
            let _ = writeln!(out, "linkStyle {link} stroke:{colour},color:{colour};");
        }
        out
    }
}

/// Edge colour of a value in flowcharts: scalars, vectors, matrices and grids differ.
fn rank_colour(value: &Value) -> &'static str {
    match value.shape() {
        Shape::Scalar => "orange",
        Shape::Vector(_) => "blue",
        Shape::Matrix { .. } => "red",
        Shape::Grid(_) => "green",
    }
}

fn mermaid_id(node: &ActionNode) -> String {
    format!("n{}", node.id().index())
}

fn evaluate(
    node: &mut ActionNode,
    upstream: &[ActionNode],
    arena: &mut AtomArena,
    step: u64,
    tasks: &TaskLoop,
) -> Result<(), EngineError> {
    let ActionNode {
        label,
        kernel,
        outputs,
        arguments,
        atoms,
        layout,
        ..
    } = node;
    let label = label.as_str();
    let refs = arguments.as_ref().map_or([].as_slice(), |a| a.refs());
    let args: Vec<&Value> = refs
        .iter()
        .map(|r| {
            upstream
                .get(r.action.index())
                .and_then(|n| n.value(r.component))
                .ok_or_else(|| EngineError::Internal(format!("dangling argument {r:?} of '{label}'")))
        })
        .collect::<Result<_, _>>()?;
    let values: &mut [Value] = match outputs {
        Some(publisher) => publisher.values_mut(),
        None => &mut [],
    };

    kernel.setup(&mut SetupIo {
        label,
        arguments: &args,
        outputs: &mut *values,
    })?;

    let lens: Vec<usize> = args.iter().map(|v| v.len()).collect();
    *layout = DerivativeLayout::new(&lens, atoms.as_ref().map_or(0, AtomAccessor::len));
    if let Some(accessor) = atoms.as_mut().filter(|a| !a.is_writer()) {
        accessor
            .retrieve(arena)
            .map_err(|e| EngineError::computation(label, e))?;
    }

    kernel.calculate(&mut CalcIo {
        label,
        step,
        arguments: &args,
        outputs: values,
        atoms: atoms.as_mut(),
        arena,
        layout,
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfigBuilder;
    use nalgebra::Vector3;

    fn positions() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 2.0, 0.0),
            Vector3::new(0.0, 0.0, 3.0),
        ]
    }

    fn build(inputs: &[ActionInput], watch: &[&str]) -> Result<(ActionGraph, AtomArena), EngineError> {
        let registry = ActionRegistry::with_builtins();
        let mut builder = EngineConfigBuilder::new().natoms(4).parallel(false);
        for w in watch {
            builder = builder.watch(*w);
        }
        let mut arena = AtomArena::new(4);
        arena.set_positions(&positions()).unwrap();
        let graph = GraphBuilder::new(&registry, builder.build().unwrap()).build(inputs, &mut arena)?;
        Ok((graph, arena))
    }

    fn distance(label: &str, atoms: &str) -> ActionInput {
        ActionInput::new("DISTANCE").label(label).keyword("ATOMS", atoms)
    }

    #[test]
    fn forward_reference_is_an_ordering_error() {
        let inputs = vec![
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "d")
                .keyword("AT", 1.0)
                .keyword("KAPPA", 1.0),
            distance("d", "1,2"),
        ];
        let err = build(&inputs, &[]).unwrap_err();
        assert!(err.is_ordering(), "{err}");
    }

    #[test]
    fn unknown_label_and_action_are_configuration_errors() {
        let inputs = vec![ActionInput::new("SUM").label("s").keyword("ARG", "nothing")];
        assert!(build(&inputs, &[]).unwrap_err().is_configuration());
        let inputs = vec![ActionInput::new("NOT_AN_ACTION")];
        assert!(matches!(build(&inputs, &[]), Err(EngineError::UnknownAction(_))));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let inputs = vec![distance("d", "1,2"), distance("d", "2,3")];
        assert!(matches!(build(&inputs, &[]), Err(EngineError::DuplicateLabel(l)) if l == "d"));
    }

    #[test]
    fn unlabelled_actions_get_positional_labels() {
        let inputs = vec![ActionInput::new("DISTANCE").keyword("ATOMS", "1,2")];
        let (graph, _) = build(&inputs, &[]).unwrap();
        assert_eq!(graph.nodes()[0].label(), "@0");
    }

    #[test]
    fn only_actions_needed_by_pilots_or_watches_are_active() {
        let inputs = vec![
            distance("d1", "1,2"),
            distance("d2", "1,3"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "d1")
                .keyword("AT", 5.0)
                .keyword("KAPPA", 1.0)
                .keyword("STRIDE", 2i64),
        ];
        let (mut graph, mut arena) = build(&inputs, &[]).unwrap();
        graph.calculate(&mut arena, 1).unwrap();
        assert!(!graph.is_active(ActionId(0)));
        graph.calculate(&mut arena, 2).unwrap();
        assert!(graph.is_active(ActionId(0)));
        assert!(!graph.is_active(ActionId(1)));
        assert!(graph.is_active(ActionId(2)));
        assert_eq!(graph.value("d1").unwrap().data(), &[1.0]);

        graph.watch("d2").unwrap();
        graph.calculate(&mut arena, 3).unwrap();
        assert!(graph.is_active(ActionId(1)));
        assert!((graph.value("d2").unwrap().get(0).unwrap() - 5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn wall_forces_reach_atoms_through_distance() {
        let inputs = vec![
            distance("d", "1,2"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "d")
                .keyword("AT", 2.0)
                .keyword("KAPPA", 10.0),
        ];
        let (mut graph, mut arena) = build(&inputs, &[]).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.apply(&mut arena).unwrap();
        // d = 1, bias = 10 * (1 - 2)^2 = 10, dB/dd = -20
        assert!((graph.total_bias() - 10.0).abs() < 1e-12);
        let forces = arena.forces();
        assert!((forces[1].x - 20.0).abs() < 1e-12);
        assert!((forces[0].x + 20.0).abs() < 1e-12);
        assert_eq!(forces[2], Vector3::zeros());
    }

    #[test]
    fn external_forces_propagate_without_a_bias() {
        let inputs = vec![distance("d", "1,3")];
        let (mut graph, mut arena) = build(&inputs, &["d"]).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.add_force("d", 0, 1.0).unwrap();
        graph.apply(&mut arena).unwrap();
        let r = 5f64.sqrt();
        assert!((arena.forces()[2].y - 2.0 / r).abs() < 1e-12);
        assert!((arena.forces()[0].x + 1.0 / r).abs() < 1e-12);
    }

    #[test]
    fn forces_are_cleared_between_steps() {
        let inputs = vec![distance("d", "1,2")];
        let (mut graph, mut arena) = build(&inputs, &["d"]).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.add_force("d", 0, 1.0).unwrap();
        graph.apply(&mut arena).unwrap();
        graph.calculate(&mut arena, 1).unwrap();
        assert!(!graph.value("d").unwrap().forces_added());
        graph.apply(&mut arena).unwrap();
        assert!(arena.forces().iter().all(|f| *f == Vector3::zeros()));
    }

    #[test]
    fn mermaid_lists_actions_and_value_edges() {
        let inputs = vec![
            distance("d", "1,2"),
            ActionInput::new("UPPER_WALLS")
                .label("uw")
                .keyword("ARG", "d")
                .keyword("AT", 2.0)
                .keyword("KAPPA", 1.0),
        ];
        let (graph, _) = build(&inputs, &[]).unwrap();
        let chart = graph.to_mermaid(false);
        assert!(chart.starts_with("flowchart TB"));
        assert!(chart.contains("MD --> n0"));
        assert!(chart.contains("n0 -- d --> n1"));
        assert!(chart.contains("linkStyle 1 stroke:orange,color:orange;"));
        let chart = graph.to_mermaid(true);
        assert!(chart.contains("n1 -- d --> n0"));
        assert!(chart.contains("n0 -- 2 atoms --> MD"));
    }
}
