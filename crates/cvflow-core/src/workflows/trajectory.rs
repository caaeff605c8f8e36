use super::session::Session;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::{Matrix3, Vector3};
use tracing::{info, instrument};

/// One stored configuration of the system.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub step: u64,
    /// Replaces the current cell when present.
    pub cell: Option<Matrix3<f64>>,
    pub positions: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub step: u64,
    pub bias: f64,
    /// Elements of each watched value, in the order the names were given.
    pub values: Vec<Vec<f64>>,
    pub forces: Vec<Vector3<f64>>,
}

/// Evaluates `frames` in order, recording the bias, forces and the `watch`ed values of
/// each step.
#[instrument(skip_all, name = "trajectory_workflow", fields(frames = frames.len()))]
pub fn run(
    session: &mut Session,
    frames: &[Frame],
    watch: &[String],
    reporter: &ProgressReporter,
) -> Result<Vec<FrameRecord>, EngineError> {
    for name in watch {
        session.graph_mut().watch(name)?;
    }
    reporter.report(Progress::RunStart {
        frames: frames.len() as u64,
    });
    info!(watched = watch.len(), "Starting trajectory evaluation");

    let mut records = Vec::with_capacity(frames.len());
    for frame in frames {
        if let Some(cell) = frame.cell {
            session.set_cell(cell)?;
        }
        session.set_positions(&frame.positions)?;
        let outcome = session.step(frame.step)?;
        let values = watch
            .iter()
            .map(|name| session.value(name).map(|v| v.data().to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        reporter.report(Progress::StepFinished {
            step: outcome.step,
            bias: outcome.bias,
        });
        records.push(FrameRecord {
            step: outcome.step,
            bias: outcome.bias,
            values,
            forces: outcome.forces,
        });
    }

    reporter.report(Progress::RunFinish);
    info!(steps = records.len(), "Trajectory evaluation finished");
    Ok(records)
}
