use crate::core::grid::{self, GridAxis, GridCoordinates, GridError, Interpolation};
use crate::core::models::multi_value::MultiValue;
use crate::core::models::shape::{Periodicity, Shape};
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo, SetupIo};
use crate::engine::error::{ComputationError, EngineError};
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::engine::scheduler::{Reduction, TaskContext, TaskKernel};
use tracing::warn;

const SPACING_ROUNDING: f64 = 1e-9;

/// How the output grid is derived from the input grid.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Points halfway between the input points.
    Midpoints,
    Bins(Vec<usize>),
    /// Finest grid whose spacing does not exceed the request.
    Spacing(Vec<f64>),
    /// Both given; they must describe the same grid.
    BinsAndSpacing(Vec<usize>, Vec<f64>),
}

impl Resolution {
    /// Output grid geometry for an input grid.
    ///
    /// Midpoints keep the bin count of periodic axes and shift their bounds by half a
    /// spacing; non-periodic axes lose one bin and shrink by half a spacing at each end.
    pub fn output_grid(&self, input: &GridCoordinates) -> Result<GridCoordinates, String> {
        let dimension = input.dimension();
        let check_len = |n: usize, key: &str| {
            if n == dimension {
                Ok(())
            } else {
                Err(format!("{key} has {n} entries but the grid has {dimension} dimensions"))
            }
        };
        let grid_error = |e: GridError| e.to_string();

        let axes = match self {
            Resolution::Midpoints => input
                .axes()
                .iter()
                .map(|axis| {
                    let half = 0.5 * axis.spacing();
                    if axis.periodic {
                        GridAxis::new(axis.min + half, axis.max + half, axis.bins, true)
                    } else if axis.bins < 2 {
                        Err(GridError::NoBins)
                    } else {
                        GridAxis::new(axis.min + half, axis.max - half, axis.bins - 1, false)
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(grid_error)?,
            Resolution::Bins(bins) => {
                check_len(bins.len(), "GRID_BIN")?;
                input
                    .axes()
                    .iter()
                    .zip(bins)
                    .map(|(axis, &n)| GridAxis::new(axis.min, axis.max, n, axis.periodic))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(grid_error)?
            }
            Resolution::Spacing(spacing) => {
                check_len(spacing.len(), "GRID_SPACING")?;
                let bins = input
                    .axes()
                    .iter()
                    .zip(spacing)
                    .map(|(axis, &dx)| bins_for_spacing(axis, dx))
                    .collect::<Result<Vec<_>, _>>()?;
                return Resolution::Bins(bins).output_grid(input);
            }
            Resolution::BinsAndSpacing(bins, spacing) => {
                check_len(bins.len(), "GRID_BIN")?;
                check_len(spacing.len(), "GRID_SPACING")?;
                for (k, ((axis, &n), &dx)) in input.axes().iter().zip(bins).zip(spacing).enumerate() {
                    if dx <= 0.0 {
                        return Err(format!("GRID_SPACING must be positive, found {dx}"));
                    }
                    let implied = ((axis.max - axis.min) / dx).round() as usize;
                    if implied != n {
                        return Err(format!(
                            "dimension {k}: GRID_BIN={n} disagrees with GRID_SPACING={dx}, which gives {implied} bins"
                        ));
                    }
                }
                return Resolution::Bins(bins.clone()).output_grid(input);
            }
        };
        GridCoordinates::new(axes).map_err(grid_error)
    }
}

fn bins_for_spacing(axis: &GridAxis, spacing: f64) -> Result<usize, String> {
    if !(spacing > 0.0) {
        return Err(format!("GRID_SPACING must be positive, found {spacing}"));
    }
    let bins = ((axis.max - axis.min) / spacing - SPACING_ROUNDING).ceil();
    Ok((bins as usize).max(1))
}

/// Evaluates the input grid function at every point of the output grid.
#[derive(Debug)]
pub struct InterpolateGridKernel {
    kind: Interpolation,
    resolution: Resolution,
    output: GridCoordinates,
}

impl TaskKernel for InterpolateGridKernel {
    fn task_count(&self, _ctx: &TaskContext<'_>) -> usize {
        self.output.point_count()
    }

    fn perform_task(
        &self,
        task: usize,
        ctx: &TaskContext<'_>,
        mv: &mut MultiValue,
    ) -> Result<(), ComputationError> {
        let input = ctx.arguments[0];
        let Some(geometry) = input.shape().grid() else {
            return Ok(());
        };
        let x = self.output.point_of(task);
        let sample = grid::evaluate(geometry, input.data(), input.grid_gradients(), self.kind, &x)?;
        mv.set_value(0, sample.value);
        mv.set_gradient(0, &sample.gradient);
        for (point, weight) in sample.weights {
            mv.add_derivative(0, ctx.layout.argument(0, point), weight);
        }
        Ok(())
    }
}

impl ActionKernel for InterpolateGridKernel {
    fn setup(&mut self, io: &mut SetupIo<'_>) -> Result<(), EngineError> {
        let Some(input) = io.arguments()[0].shape().grid() else {
            return Err(EngineError::configuration(io.label(), "the argument is no longer a grid"));
        };
        let output = self
            .resolution
            .output_grid(input)
            .map_err(|message| EngineError::configuration(io.label(), message))?;
        self.output = output;
        io.reshape(0, Shape::Grid(self.output.clone()));
        Ok(())
    }

    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        io.run_tasks(&*self, Reduction::Disjoint)
    }
}

pub fn keywords() -> Keywords {
    Keywords::new(
        "INTERPOLATE_GRID",
        "Interpolate a grid function onto a grid with a different resolution",
    )
    .compulsory("ARG", "the grid to interpolate")
    .compulsory_with_default(
        "INTERPOLATION_TYPE",
        "spline",
        "the interpolation kernel: spline, linear, floor, ceiling or nearest",
    )
    .optional("GRID_BIN", "the number of bins of the output grid in each dimension")
    .optional("GRID_SPACING", "the largest acceptable spacing of the output grid")
    .flag(
        "MIDPOINTS",
        "place the output points halfway between the input points; overrides GRID_BIN and GRID_SPACING",
    )
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let arguments = ctx.arguments(kw, "ARG")?;
    let [argument] = arguments.as_slice() else {
        return Err(EngineError::configuration(
            label,
            format!("expected exactly one argument, found {}", arguments.len()),
        ));
    };
    let input = ctx
        .value(*argument)
        .and_then(|v| v.shape().grid())
        .ok_or_else(|| EngineError::configuration(label, "the argument must be a grid"))?;

    let kind: Interpolation = kw
        .required_text("INTERPOLATION_TYPE")?
        .parse()
        .map_err(|e: GridError| EngineError::configuration(label, e.to_string()))?;

    let bins = kw.usize_vec("GRID_BIN")?;
    let spacing = kw.f64_vec("GRID_SPACING")?;
    let resolution = if kw.flag("MIDPOINTS") {
        if bins.is_some() || spacing.is_some() {
            warn!(label, "MIDPOINTS overrides GRID_BIN and GRID_SPACING");
        }
        Resolution::Midpoints
    } else {
        match (bins, spacing) {
            (Some(b), Some(s)) => Resolution::BinsAndSpacing(b, s),
            (Some(b), None) => Resolution::Bins(b),
            (None, Some(s)) => Resolution::Spacing(s),
            (None, None) => {
                return Err(EngineError::configuration(
                    label,
                    "one of GRID_BIN, GRID_SPACING or MIDPOINTS is required",
                ));
            }
        }
    };
    let output = resolution
        .output_grid(input)
        .map_err(|message| EngineError::configuration(label, message))?;

    let value = Value::new("", Shape::Grid(output.clone()), Periodicity::NonPeriodic, true);
    Ok(ActionParts::new(InterpolateGridKernel {
        kind,
        resolution,
        output,
    })
    .arguments(arguments)
    .outputs(vec![value]))
}
