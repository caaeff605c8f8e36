use super::action::DerivativeLayout;
use super::error::ComputationError;
use crate::core::models::multi_value::MultiValue;
use crate::core::models::value::{Value, ValueError};
use crate::core::utils::pbc::Pbc;
use nalgebra::Vector3;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Read-only inputs shared by every task of one action evaluation.
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    pub arguments: &'a [&'a Value],
    pub positions: &'a [Vector3<f64>],
    pub pbc: &'a Pbc,
    pub layout: &'a DerivativeLayout,
}

/// An action whose outputs decompose into independent element tasks.
///
/// Each task fills one [`MultiValue`] slot per output; the slot's value becomes element
/// `task` of the output, together with its partial derivatives and grid gradient.
pub trait TaskKernel: Sync {
    fn task_count(&self, ctx: &TaskContext<'_>) -> usize;

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError>;
}

/// An action producing matrices, evaluated one row at a time.
pub trait RowKernel: Sync {
    fn row_count(&self, ctx: &TaskContext<'_>) -> usize;

    /// Lists the columns of `row` that need evaluating.
    fn setup_for_row(&self, row: usize, ctx: &TaskContext<'_>, columns: &mut Vec<usize>);

    fn perform_element(
        &self,
        row: usize,
        column: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError>;

    /// Adjusts the derivative indices recorded for `row`. They default to every index
    /// touched by the row's elements, sorted.
    fn end_of_row(
        &self,
        _row: usize,
        _columns: &[usize],
        _ctx: &TaskContext<'_>,
        _indices: &mut Vec<usize>,
    ) {
    }
}

/// How task results combine into the outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Task `t` owns element `t` of every output.
    Disjoint,
    /// Every task adds into element 0 of every output.
    Sum,
}

struct Scratch {
    mv: MultiValue,
    columns: Vec<usize>,
}

/// Results of a batch of tasks, kept in task order until scattered into the outputs.
struct TaskBuffer {
    slots: usize,
    grid_dim: usize,
    elements: Vec<usize>,
    values: Vec<f64>,
    gradients: Vec<f64>,
    bounds: Vec<usize>,
    entries: Vec<(usize, f64)>,
    rows: Vec<(usize, Vec<usize>)>,
}

impl TaskBuffer {
    fn new(slots: usize, grid_dim: usize) -> Self {
        Self {
            slots,
            grid_dim,
            elements: Vec::new(),
            values: Vec::new(),
            gradients: Vec::new(),
            bounds: Vec::new(),
            entries: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn record(&mut self, element: usize, mv: &MultiValue) {
        self.elements.push(element);
        self.values.extend_from_slice(mv.values());
        for slot in 0..self.slots {
            if self.grid_dim > 0 {
                self.gradients.extend_from_slice(mv.gradient(slot));
            }
            self.entries.extend_from_slice(mv.derivatives(slot).entries());
            self.bounds.push(self.entries.len());
        }
    }

    fn record_row(&mut self, row: usize, indices: Vec<usize>) {
        self.rows.push((row, indices));
    }

    fn merge(mut self, other: TaskBuffer) -> TaskBuffer {
        let offset = self.entries.len();
        self.elements.extend(other.elements);
        self.values.extend(other.values);
        self.gradients.extend(other.gradients);
        self.bounds.extend(other.bounds.into_iter().map(|b| b + offset));
        self.entries.extend(other.entries);
        self.rows.extend(other.rows);
        self
    }

    fn entries_of(&self, record: usize, slot: usize) -> &[(usize, f64)] {
        let k = record * self.slots + slot;
        let start = if k == 0 { 0 } else { self.bounds[k - 1] };
        &self.entries[start..self.bounds[k]]
    }

    fn scatter(self, outputs: &mut [Value], reduction: Reduction) -> Result<(), ValueError> {
        outputs.iter_mut().for_each(Value::reset_data);
        for (record, &element) in self.elements.iter().enumerate() {
            let target = match reduction {
                Reduction::Disjoint => element,
                Reduction::Sum => 0,
            };
            for (slot, output) in outputs.iter_mut().enumerate() {
                let value = self.values[record * self.slots + slot];
                match reduction {
                    Reduction::Disjoint => output.set(target, value)?,
                    Reduction::Sum => output.set(target, output.get(target)? + value)?,
                }
                if self.grid_dim > 0 {
                    let start = (record * self.slots + slot) * self.grid_dim;
                    output.set_grid_gradient(target, &self.gradients[start..start + self.grid_dim]);
                }
                if output.has_derivatives() {
                    let entries = self.entries_of(record, slot);
                    for &(index, delta) in entries {
                        output.add_partial(target, index, delta)?;
                    }
                }
            }
        }
        for (row, indices) in &self.rows {
            for output in outputs.iter_mut().filter(|o| o.has_derivatives()) {
                output.jacobian_mut().set_row_indices(*row, indices);
            }
        }
        Ok(())
    }
}

/// Runs the tasks of an action, in parallel when enabled and worthwhile.
///
/// Workers fill private buffers that are concatenated in task order and scattered into the
/// outputs serially, so results do not depend on the number of threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLoop {
    parallel: bool,
    min_parallel_tasks: usize,
}

impl Default for TaskLoop {
    fn default() -> Self {
        Self::new(true, 64)
    }
}

impl TaskLoop {
    pub fn new(parallel: bool, min_parallel_tasks: usize) -> Self {
        Self {
            parallel,
            min_parallel_tasks,
        }
    }

    pub fn serial() -> Self {
        Self::new(false, usize::MAX)
    }

    pub fn is_parallel(&self) -> bool {
        cfg!(feature = "parallel") && self.parallel
    }

    pub(crate) fn use_parallel(&self, tasks: usize) -> bool {
        self.is_parallel() && tasks >= self.min_parallel_tasks.max(2)
    }

    pub fn run<K: TaskKernel + ?Sized>(
        &self,
        kernel: &K,
        ctx: &TaskContext<'_>,
        outputs: &mut [Value],
        reduction: Reduction,
    ) -> Result<(), ComputationError> {
        let tasks = kernel.task_count(ctx);
        let slots = outputs.len();
        let grid_dim = grid_dimension(outputs);
        let derivatives = ctx.layout.total();
        trace!(tasks, slots, derivatives, "Running task loop");

        let buffer = self.drive(
            tasks,
            || TaskBuffer::new(slots, grid_dim),
            || Scratch {
                mv: MultiValue::new(slots, derivatives, grid_dim),
                columns: Vec::new(),
            },
            |task, scratch, buffer| {
                scratch.mv.reset(task);
                kernel.perform_task(task, ctx, &mut scratch.mv)?;
                buffer.record(task, &scratch.mv);
                Ok(())
            },
        )?;
        buffer.scatter(outputs, reduction)?;
        Ok(())
    }

    pub fn run_rows<K: RowKernel + ?Sized>(
        &self,
        kernel: &K,
        ctx: &TaskContext<'_>,
        outputs: &mut [Value],
    ) -> Result<(), ComputationError> {
        let rows = kernel.row_count(ctx);
        let slots = outputs.len();
        let cols = match outputs.first().map(Value::shape) {
            Some(crate::core::models::shape::Shape::Matrix { cols, .. }) => *cols,
            _ => 1,
        };
        let derivatives = ctx.layout.total();
        trace!(rows, cols, slots, derivatives, "Running row loop");

        let buffer = self.drive(
            rows,
            || TaskBuffer::new(slots, 0),
            || Scratch {
                mv: MultiValue::new(slots, derivatives, 0),
                columns: Vec::new(),
            },
            |row, scratch, buffer| {
                let Scratch { mv, columns } = scratch;
                mv.reset(row);
                columns.clear();
                kernel.setup_for_row(row, ctx, columns);
                mv.set_split_index(columns.len());
                for &column in columns.iter() {
                    mv.reset_element();
                    kernel.perform_element(row, column, ctx, mv)?;
                    buffer.record(row * cols + column, mv);
                }
                let mut indices = mv.active_indices().to_vec();
                indices.sort_unstable();
                kernel.end_of_row(row, columns, ctx, &mut indices);
                buffer.record_row(row, indices);
                Ok(())
            },
        )?;
        buffer.scatter(outputs, Reduction::Disjoint)?;
        Ok(())
    }

    fn drive<B, W>(
        &self,
        tasks: usize,
        make_buffer: B,
        make_scratch: impl Fn() -> Scratch + Sync + Send,
        work: W,
    ) -> Result<TaskBuffer, ComputationError>
    where
        B: Fn() -> TaskBuffer + Sync + Send,
        W: Fn(usize, &mut Scratch, &mut TaskBuffer) -> Result<(), ComputationError> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        if self.use_parallel(tasks) {
            return (0..tasks)
                .into_par_iter()
                .try_fold(
                    || (make_buffer(), make_scratch()),
                    |(mut buffer, mut scratch), task| {
                        work(task, &mut scratch, &mut buffer)?;
                        Ok::<_, ComputationError>((buffer, scratch))
                    },
                )
                .map(|result| result.map(|(buffer, _)| buffer))
                .try_reduce(&make_buffer, |left, right| Ok(left.merge(right)));
        }

        let mut buffer = make_buffer();
        let mut scratch = make_scratch();
        for task in 0..tasks {
            work(task, &mut scratch, &mut buffer)?;
        }
        Ok(buffer)
    }
}

fn grid_dimension(outputs: &[Value]) -> usize {
    outputs
        .first()
        .and_then(|v| v.shape().grid())
        .map_or(0, |g| g.dimension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::shape::{Periodicity, Shape};

    struct Squares;

    impl TaskKernel for Squares {
        fn task_count(&self, ctx: &TaskContext<'_>) -> usize {
            ctx.arguments[0].len()
        }

        fn perform_task(
            &self,
            task: usize,
            ctx: &TaskContext<'_>,
            mv: &mut MultiValue,
        ) -> Result<(), ComputationError> {
            let x = ctx.arguments[0].get(task)?;
            mv.set_value(0, x * x);
            mv.add_derivative(0, ctx.layout.argument(0, task), 2.0 * x);
            Ok(())
        }
    }

    struct OuterProduct;

    impl RowKernel for OuterProduct {
        fn row_count(&self, ctx: &TaskContext<'_>) -> usize {
            ctx.arguments[0].len()
        }

        fn setup_for_row(&self, _row: usize, ctx: &TaskContext<'_>, columns: &mut Vec<usize>) {
            columns.extend(0..ctx.arguments[1].len());
        }

        fn perform_element(
            &self,
            row: usize,
            column: usize,
            ctx: &TaskContext<'_>,
            mv: &mut MultiValue,
        ) -> Result<(), ComputationError> {
            let a = ctx.arguments[0].get(row)?;
            let b = ctx.arguments[1].get(column)?;
            mv.set_value(0, a * b);
            mv.add_derivative(0, ctx.layout.argument(0, row), b);
            mv.add_derivative(0, ctx.layout.argument(1, column), a);
            Ok(())
        }
    }

    fn vector(data: &[f64]) -> Value {
        let mut value = Value::new("x", Shape::Vector(data.len()), Periodicity::NonPeriodic, true);
        value.set_all(data).unwrap();
        value
    }

    fn run_squares(tasks: TaskLoop, reduction: Reduction, n: usize) -> Value {
        let data: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        let input = vector(&data);
        let arguments = [&input];
        let layout = DerivativeLayout::new(&[n], 0);
        let pbc = Pbc::none();
        let ctx = TaskContext {
            arguments: &arguments,
            positions: &[],
            pbc: &pbc,
            layout: &layout,
        };
        let shape = match reduction {
            Reduction::Disjoint => Shape::Vector(n),
            Reduction::Sum => Shape::Scalar,
        };
        let mut outputs = vec![Value::new("y", shape, Periodicity::NonPeriodic, true)];
        tasks.run(&Squares, &ctx, &mut outputs, reduction).unwrap();
        outputs.pop().unwrap()
    }

    #[test]
    fn disjoint_tasks_fill_their_own_elements() {
        let out = run_squares(TaskLoop::serial(), Reduction::Disjoint, 4);
        assert_eq!(out.data(), &[0.0, 0.25, 1.0, 2.25]);
        assert_eq!(out.jacobian().row(3).unwrap().get(3), 3.0);
        assert!(out.jacobian().row(3).unwrap().get(2) == 0.0);
    }

    #[test]
    fn sum_reduction_adds_into_first_element() {
        let out = run_squares(TaskLoop::serial(), Reduction::Sum, 4);
        assert_eq!(out.data(), &[3.5]);
        let row = out.jacobian().row(0).unwrap();
        assert_eq!(row.get(1), 1.0);
        assert_eq!(row.get(3), 3.0);
    }

    #[test]
    fn parallel_and_serial_loops_agree_exactly() {
        let parallel = TaskLoop::new(true, 1);
        for reduction in [Reduction::Disjoint, Reduction::Sum] {
            let a = run_squares(TaskLoop::serial(), reduction, 500);
            let b = run_squares(parallel, reduction, 500);
            assert_eq!(a.data(), b.data());
            assert_eq!(a.jacobian(), b.jacobian());
        }
    }

    #[test]
    fn row_loop_records_touched_indices_per_row() {
        let a = vector(&[1.0, 2.0]);
        let b = vector(&[3.0, 4.0, 5.0]);
        let arguments = [&a, &b];
        let layout = DerivativeLayout::new(&[2, 3], 0);
        let pbc = Pbc::none();
        let ctx = TaskContext {
            arguments: &arguments,
            positions: &[],
            pbc: &pbc,
            layout: &layout,
        };
        let mut outputs = vec![Value::new(
            "m",
            Shape::Matrix { rows: 2, cols: 3 },
            Periodicity::NonPeriodic,
            true,
        )];
        TaskLoop::serial()
            .run_rows(&OuterProduct, &ctx, &mut outputs)
            .unwrap();
        let m = &outputs[0];
        assert_eq!(m.data(), &[3.0, 4.0, 5.0, 6.0, 8.0, 10.0]);
        assert_eq!(m.jacobian().row_indices(1), &[1, 2, 3, 4]);
        assert_eq!(m.jacobian().row(5).unwrap().get(1), 5.0);
        assert_eq!(m.jacobian().row(5).unwrap().get(4), 2.0);
    }
}
