use super::error::{ComputationError, EngineError};
use super::scheduler::{Reduction, RowKernel, TaskContext, TaskKernel, TaskLoop};
use crate::core::models::arena::{AccessIntent, ArenaError, AtomArena, AtomLease, AtomWriter, WriteToken};
use crate::core::models::ids::{ActionId, ValueRef};
use crate::core::models::value::Value;
use crate::core::utils::pbc::Pbc;
use nalgebra::Vector3;
use std::any::Any;
use std::fmt;

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Behaviour of an action type.
///
/// `setup` runs before every evaluation of the action and is the only place where output
/// shapes may change. `calculate` fills the outputs; `apply` turns forces on the outputs
/// into forces on arguments and atoms and defaults to contracting the stored Jacobians.
pub trait ActionKernel: AsAny + Send + Sync + fmt::Debug {
    fn setup(&mut self, _io: &mut SetupIo<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError>;

    fn apply(&self, io: &mut ApplyIo<'_>) -> Result<(), EngineError> {
        super::backprop::apply_jacobian(io)
    }

    /// Whether forces on this action's outputs propagate further up the graph.
    fn carries_forces(&self) -> bool {
        true
    }

    /// Bias actions request a reverse pass even without forces on their outputs.
    fn demands_forces(&self) -> bool {
        false
    }

    /// Energy added to the simulation by a bias action.
    fn energy(&self, _outputs: &[Value]) -> Option<f64> {
        None
    }
}

/// Stride-driven scheduling: the action runs whenever the step is a multiple of the stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pilot {
    stride: usize,
}

impl Pilot {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn on_step(&self, step: u64) -> bool {
        step % self.stride as u64 == 0
    }
}

/// Atom access of one action: its lease, an optional write token, the local position
/// copy used by tasks, and the local force buffer filled by the reverse pass.
#[derive(Debug)]
pub struct AtomAccessor {
    lease: AtomLease,
    token: Option<WriteToken>,
    positions: Vec<Vector3<f64>>,
    forces: Vec<Vector3<f64>>,
    forces_added: bool,
}

impl AtomAccessor {
    pub(crate) fn new(lease: AtomLease, token: Option<WriteToken>) -> Self {
        let n = lease.len();
        Self {
            lease,
            token,
            positions: Vec::with_capacity(n),
            forces: vec![Vector3::zeros(); n],
            forces_added: false,
        }
    }

    pub fn lease(&self) -> &AtomLease {
        &self.lease
    }

    pub fn len(&self) -> usize {
        self.lease.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lease.is_empty()
    }

    pub fn is_writer(&self) -> bool {
        self.token.is_some()
    }

    pub fn intent(&self) -> AccessIntent {
        if self.is_writer() {
            AccessIntent::Write
        } else {
            AccessIntent::Read
        }
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn forces(&self) -> &[Vector3<f64>] {
        &self.forces
    }

    pub(crate) fn retrieve(&mut self, arena: &AtomArena) -> Result<(), ArenaError> {
        arena.gather(&self.lease, &mut self.positions)
    }

    pub(crate) fn add_force(&mut self, local: usize, force: Vector3<f64>) {
        if let Some(slot) = self.forces.get_mut(local) {
            *slot += force;
            self.forces_added = true;
        }
    }

    pub(crate) fn forces_added(&self) -> bool {
        self.forces_added
    }

    pub(crate) fn clear_forces(&mut self) {
        if self.forces_added {
            self.forces.iter_mut().for_each(|f| *f = Vector3::zeros());
        }
        self.forces_added = false;
    }
}

/// Output values owned by an action.
#[derive(Debug, Default)]
pub struct ValuePublisher {
    values: Vec<Value>,
}

impl ValuePublisher {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }
}

/// Ordered references to the values an action reads.
#[derive(Debug, Default)]
pub struct ArgumentReader {
    refs: Vec<ValueRef>,
}

impl ArgumentReader {
    pub fn refs(&self) -> &[ValueRef] {
        &self.refs
    }
}

/// Maps the flat derivative index space of an action to arguments and atoms.
///
/// Indices `[0, n_args)` are the concatenated elements of every argument, followed by
/// three Cartesian components per requested atom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivativeLayout {
    offsets: Vec<usize>,
    lens: Vec<usize>,
    atom_offset: usize,
    natoms: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeTarget {
    Argument { argument: usize, element: usize },
    Atom { atom: usize, component: usize },
}

impl DerivativeLayout {
    pub fn new(argument_lens: &[usize], natoms: usize) -> Self {
        let mut offsets = Vec::with_capacity(argument_lens.len());
        let mut total = 0;
        for len in argument_lens {
            offsets.push(total);
            total += len;
        }
        Self {
            offsets,
            lens: argument_lens.to_vec(),
            atom_offset: total,
            natoms,
        }
    }

    pub fn total(&self) -> usize {
        self.atom_offset + 3 * self.natoms
    }

    pub fn argument_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn argument(&self, argument: usize, element: usize) -> usize {
        self.offsets[argument] + element
    }

    pub fn argument_offset(&self, argument: usize) -> usize {
        self.offsets[argument]
    }

    pub fn atom(&self, local: usize, component: usize) -> usize {
        self.atom_offset + 3 * local + component
    }

    pub fn resolve(&self, index: usize) -> Option<DerivativeTarget> {
        if index >= self.total() {
            return None;
        }
        if index >= self.atom_offset {
            let local = index - self.atom_offset;
            return Some(DerivativeTarget::Atom {
                atom: local / 3,
                component: local % 3,
            });
        }
        let argument = self.offsets.partition_point(|&o| o <= index) - 1;
        let element = index - self.offsets[argument];
        (element < self.lens[argument]).then_some(DerivativeTarget::Argument { argument, element })
    }
}

/// A node of the action graph, assembled from optional capabilities.
#[derive(Debug)]
pub struct ActionNode {
    pub(crate) id: ActionId,
    pub(crate) label: String,
    pub(crate) name: String,
    pub(crate) pilot: Option<Pilot>,
    pub(crate) atoms: Option<AtomAccessor>,
    pub(crate) outputs: Option<ValuePublisher>,
    pub(crate) arguments: Option<ArgumentReader>,
    pub(crate) layout: DerivativeLayout,
    pub(crate) kernel: Box<dyn ActionKernel>,
}

impl ActionNode {
    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pilot(&self) -> Option<&Pilot> {
        self.pilot.as_ref()
    }

    pub fn is_pilot(&self) -> bool {
        self.pilot.is_some()
    }

    pub fn atoms(&self) -> Option<&AtomAccessor> {
        self.atoms.as_ref()
    }

    pub fn owns_atoms(&self) -> bool {
        self.atoms.is_some()
    }

    pub fn publishes_values(&self) -> bool {
        self.outputs.as_ref().is_some_and(|p| !p.values.is_empty())
    }

    pub fn reads_arguments(&self) -> bool {
        self.arguments.as_ref().is_some_and(|a| !a.refs.is_empty())
    }

    pub fn values(&self) -> &[Value] {
        self.outputs.as_ref().map_or([].as_slice(), |p| p.values())
    }

    pub fn value(&self, component: usize) -> Option<&Value> {
        self.values().get(component)
    }

    pub(crate) fn value_mut(&mut self, component: usize) -> Option<&mut Value> {
        self.outputs.as_mut()?.values.get_mut(component)
    }

    pub fn arguments(&self) -> &[ValueRef] {
        self.arguments.as_ref().map_or([].as_slice(), |a| a.refs())
    }

    pub fn kernel(&self) -> &dyn ActionKernel {
        self.kernel.as_ref()
    }

    pub fn kernel_as<T: ActionKernel + 'static>(&self) -> Option<&T> {
        // Downcast the kernel itself, not its box.
        self.kernel.as_ref().as_any().downcast_ref::<T>()
    }

    pub fn layout(&self) -> &DerivativeLayout {
        &self.layout
    }

    pub(crate) fn clear_forces(&mut self) {
        if let Some(outputs) = self.outputs.as_mut() {
            outputs.values.iter_mut().for_each(Value::clear_forces);
        }
        if let Some(atoms) = self.atoms.as_mut() {
            atoms.clear_forces();
        }
    }
}

/// What an action constructor hands to the graph.
#[derive(Debug)]
pub struct ActionParts {
    pub(crate) kernel: Box<dyn ActionKernel>,
    pub(crate) stride: Option<usize>,
    /// Requested atoms and how many of them, from the front, are written.
    pub(crate) atoms: Option<(Vec<usize>, usize)>,
    pub(crate) outputs: Vec<Value>,
    pub(crate) arguments: Vec<ValueRef>,
}

impl ActionParts {
    pub fn new(kernel: impl ActionKernel + 'static) -> Self {
        Self {
            kernel: Box::new(kernel),
            stride: None,
            atoms: None,
            outputs: Vec::new(),
            arguments: Vec::new(),
        }
    }

    pub fn pilot(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    pub fn atoms(mut self, atoms: Vec<usize>, intent: AccessIntent) -> Self {
        let writes = match intent {
            AccessIntent::Write => atoms.len(),
            AccessIntent::Read => 0,
        };
        self.atoms = Some((atoms, writes));
        self
    }

    /// Leases `atoms` but claims write access only to the first `writes` of them.
    pub fn atoms_writing_first(mut self, atoms: Vec<usize>, writes: usize) -> Self {
        let writes = writes.min(atoms.len());
        self.atoms = Some((atoms, writes));
        self
    }

    /// Output values named by component; an empty name marks the single unnamed output.
    pub fn outputs(mut self, values: Vec<Value>) -> Self {
        self.outputs = values;
        self
    }

    pub fn arguments(mut self, arguments: Vec<ValueRef>) -> Self {
        self.arguments = arguments;
        self
    }

    pub(crate) fn into_node(
        self,
        id: ActionId,
        label: &str,
        name: &str,
        atoms: Option<AtomAccessor>,
    ) -> ActionNode {
        let outputs: Vec<Value> = self
            .outputs
            .into_iter()
            .map(|mut value| {
                let full = if value.name().is_empty() {
                    label.to_string()
                } else {
                    format!("{label}.{}", value.name())
                };
                value.rename(full);
                value
            })
            .collect();
        ActionNode {
            id,
            label: label.to_string(),
            name: name.to_string(),
            pilot: self.stride.map(Pilot::new),
            atoms,
            outputs: (!outputs.is_empty()).then_some(ValuePublisher { values: outputs }),
            arguments: (!self.arguments.is_empty()).then_some(ArgumentReader {
                refs: self.arguments,
            }),
            layout: DerivativeLayout::default(),
            kernel: self.kernel,
        }
    }
}

/// Access granted to `ActionKernel::setup`.
pub struct SetupIo<'a> {
    pub(crate) label: &'a str,
    pub(crate) arguments: &'a [&'a Value],
    pub(crate) outputs: &'a mut [Value],
}

impl SetupIo<'_> {
    pub fn label(&self) -> &str {
        self.label
    }

    pub fn arguments(&self) -> &[&Value] {
        self.arguments
    }

    pub fn outputs(&self) -> &[Value] {
        self.outputs
    }

    pub fn reshape(&mut self, output: usize, shape: crate::core::models::shape::Shape) {
        if let Some(value) = self.outputs.get_mut(output) {
            if value.shape() != &shape {
                value.reshape(shape);
            }
        }
    }
}

/// Access granted to `ActionKernel::calculate`.
pub struct CalcIo<'a> {
    pub(crate) label: &'a str,
    pub(crate) step: u64,
    pub(crate) arguments: &'a [&'a Value],
    pub(crate) outputs: &'a mut [Value],
    pub(crate) atoms: Option<&'a mut AtomAccessor>,
    pub(crate) arena: &'a mut AtomArena,
    pub(crate) layout: &'a DerivativeLayout,
    pub(crate) tasks: &'a TaskLoop,
}

impl CalcIo<'_> {
    pub fn label(&self) -> &str {
        self.label
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn arguments(&self) -> &[&Value] {
        self.arguments
    }

    pub fn argument(&self, index: usize) -> &Value {
        self.arguments[index]
    }

    pub fn outputs(&self) -> &[Value] {
        self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut [Value] {
        self.outputs
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        self.atoms.as_deref().map_or([].as_slice(), |a| a.positions())
    }

    pub fn pbc(&self) -> &Pbc {
        self.arena.pbc()
    }

    pub fn layout(&self) -> &DerivativeLayout {
        self.layout
    }

    /// Position writer for actions holding a write token.
    pub fn writer(&mut self) -> Result<AtomWriter<'_>, EngineError> {
        let token = self
            .atoms
            .as_deref()
            .and_then(|a| a.token.as_ref())
            .ok_or_else(|| EngineError::Internal(format!("action '{}' has no write token", self.label)))?;
        self.arena
            .writer(token)
            .map_err(|e| EngineError::computation(self.label, e))
    }

    pub fn fail(&self, error: impl Into<ComputationError>) -> EngineError {
        EngineError::computation(self.label, error)
    }

    /// Runs the kernel's tasks and scatters the results into the outputs.
    pub fn run_tasks<K: TaskKernel + ?Sized>(
        &mut self,
        kernel: &K,
        reduction: Reduction,
    ) -> Result<(), EngineError> {
        let ctx = TaskContext {
            arguments: self.arguments,
            positions: self.atoms.as_deref().map_or([].as_slice(), |a| a.positions()),
            pbc: self.arena.pbc(),
            layout: self.layout,
        };
        self.tasks
            .run(kernel, &ctx, self.outputs, reduction)
            .map_err(|e| EngineError::computation(self.label, e))
    }

    /// Runs a matrix kernel row by row and scatters the results into the outputs.
    pub fn run_rows<K: RowKernel + ?Sized>(&mut self, kernel: &K) -> Result<(), EngineError> {
        let ctx = TaskContext {
            arguments: self.arguments,
            positions: self.atoms.as_deref().map_or([].as_slice(), |a| a.positions()),
            pbc: self.arena.pbc(),
            layout: self.layout,
        };
        self.tasks
            .run_rows(kernel, &ctx, self.outputs)
            .map_err(|e| EngineError::computation(self.label, e))
    }
}

/// Access granted to `ActionKernel::apply`.
pub struct ApplyIo<'a> {
    pub(crate) label: &'a str,
    pub(crate) on_step: bool,
    pub(crate) stride: usize,
    pub(crate) outputs: &'a [Value],
    pub(crate) arguments: &'a [ValueRef],
    pub(crate) upstream: &'a mut [ActionNode],
    pub(crate) atoms: Option<&'a mut AtomAccessor>,
    pub(crate) layout: &'a DerivativeLayout,
    pub(crate) tasks: &'a TaskLoop,
}

impl ApplyIo<'_> {
    pub fn label(&self) -> &str {
        self.label
    }

    /// Whether the action's pilot fires on this step (always true without a pilot).
    pub fn on_step(&self) -> bool {
        self.on_step
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn outputs(&self) -> &[Value] {
        self.outputs
    }

    pub fn layout(&self) -> &DerivativeLayout {
        self.layout
    }

    pub(crate) fn tasks(&self) -> &TaskLoop {
        self.tasks
    }

    pub fn argument_count(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        let r = self.arguments.get(index)?;
        self.upstream.get(r.action.index())?.value(r.component)
    }

    pub fn add_argument_force(
        &mut self,
        argument: usize,
        element: usize,
        force: f64,
    ) -> Result<(), EngineError> {
        let r = *self.arguments.get(argument).ok_or_else(|| {
            EngineError::Internal(format!("action '{}' has no argument {argument}", self.label))
        })?;
        let value = self
            .upstream
            .get_mut(r.action.index())
            .and_then(|node| node.value_mut(r.component))
            .ok_or_else(|| EngineError::Internal(format!("dangling argument of '{}'", self.label)))?;
        value
            .add_force(element, force)
            .map_err(|e| EngineError::computation(self.label, e))
    }

    pub fn add_atom_force(&mut self, local: usize, force: Vector3<f64>) {
        if let Some(atoms) = self.atoms.as_deref_mut() {
            atoms.add_force(local, force);
        }
    }

    /// Routes a force on one derivative index to its argument element or atom component.
    pub fn add_derivative_force(&mut self, index: usize, force: f64) -> Result<(), EngineError> {
        match self.layout.resolve(index) {
            Some(DerivativeTarget::Argument { argument, element }) => {
                self.add_argument_force(argument, element, force)
            }
            Some(DerivativeTarget::Atom { atom, component }) => {
                let mut f = Vector3::zeros();
                f[component] = force;
                self.add_atom_force(atom, f);
                Ok(())
            }
            None => Err(EngineError::Internal(format!(
                "derivative index {index} outside the layout of '{}'",
                self.label
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_atoms_after_argument_elements() {
        let layout = DerivativeLayout::new(&[3, 1, 4], 2);
        assert_eq!(layout.total(), 8 + 6);
        assert_eq!(layout.argument(1, 0), 3);
        assert_eq!(layout.argument(2, 3), 7);
        assert_eq!(layout.atom(1, 2), 13);
        assert_eq!(
            layout.resolve(5),
            Some(DerivativeTarget::Argument { argument: 2, element: 1 })
        );
        assert_eq!(
            layout.resolve(9),
            Some(DerivativeTarget::Atom { atom: 0, component: 1 })
        );
        assert_eq!(layout.resolve(14), None);
    }

    #[test]
    fn layout_skips_empty_arguments() {
        let layout = DerivativeLayout::new(&[2, 0, 1], 0);
        assert_eq!(
            layout.resolve(2),
            Some(DerivativeTarget::Argument { argument: 2, element: 0 })
        );
    }

    #[test]
    fn pilot_fires_on_multiples_of_stride() {
        let pilot = Pilot::new(3);
        assert!(pilot.on_step(0));
        assert!(!pilot.on_step(1));
        assert!(pilot.on_step(6));
        assert!(Pilot::new(0).on_step(5));
    }
}
