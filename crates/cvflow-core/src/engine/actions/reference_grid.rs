use crate::core::grid::GridData;
use crate::core::io::grid::GridTextFile;
use crate::core::io::traits::GridFile;
use crate::core::models::shape::{Periodicity, Shape};
use crate::core::models::value::Value;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use tracing::debug;

/// Publishes a grid function read once from disk.
#[derive(Debug)]
pub struct ReferenceGridKernel {
    grid: GridData,
}

impl ReferenceGridKernel {
    pub fn grid(&self) -> &GridData {
        &self.grid
    }
}

impl ActionKernel for ReferenceGridKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let dim = self.grid.coordinates.dimension();
        let output = &mut io.outputs_mut()[0];
        let result = output.set_all(&self.grid.values);
        for (point, gradient) in self.grid.gradients.chunks(dim).enumerate() {
            output.set_grid_gradient(point, gradient);
        }
        result.map_err(|e| io.fail(e))
    }

    fn carries_forces(&self) -> bool {
        false
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("REFERENCE_GRID", "Read a grid function from a file")
        .compulsory("FILE", "the file holding the grid")
        .optional(
            "PERIODIC",
            "the expected periodicity of each dimension, checked against the file",
        )
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let path = kw.required_text("FILE")?;
    let grid = GridTextFile::read_from_path(&path)
        .map_err(|e| EngineError::configuration(label, format!("cannot read grid from '{path}': {e}")))?;
    let axes = grid.coordinates.axes();

    if kw.contains("PERIODIC") {
        let flags = kw.texts("PERIODIC");
        if flags.len() != axes.len() {
            return Err(EngineError::configuration(
                label,
                format!("PERIODIC has {} entries but the grid has {} dimensions", flags.len(), axes.len()),
            ));
        }
        for (k, (flag, axis)) in flags.iter().zip(axes).enumerate() {
            let expected = match flag.to_ascii_lowercase().as_str() {
                "yes" | "true" => true,
                "no" | "false" => false,
                _ => {
                    return Err(EngineError::configuration(
                        label,
                        format!("PERIODIC entries must be YES or NO, found '{flag}'"),
                    ));
                }
            };
            if expected != axis.periodic {
                return Err(EngineError::configuration(
                    label,
                    format!("dimension {k} of '{path}' does not have the requested periodicity"),
                ));
            }
        }
    }

    debug!(
        label,
        path = %path,
        points = grid.coordinates.point_count(),
        dimension = grid.coordinates.dimension(),
        "Loaded reference grid"
    );
    let shape = Shape::Grid(grid.coordinates.clone());
    Ok(ActionParts::new(ReferenceGridKernel { grid })
        .outputs(vec![Value::new("", shape, Periodicity::NonPeriodic, false)]))
}

#[cfg(test)]
mod tests {
    use crate::core::grid::{GridAxis, GridCoordinates, GridData};
    use crate::core::io::grid::GridTextFile;
    use crate::core::io::traits::GridFile;
    use crate::engine::actions::test_support::build_graph;
    use crate::engine::config::ActionInput;

    fn write_grid(dir: &tempfile::TempDir) -> String {
        let coords = GridCoordinates::new(vec![
            GridAxis::new(0.0, 1.0, 2, false).unwrap(),
            GridAxis::new(-3.0, 3.0, 3, true).unwrap(),
        ])
        .unwrap();
        let grid = GridData::tabulate(coords, |p| (p[0] + p[1], vec![1.0, 1.0]));
        let path = dir.path().join("g.grid");
        GridTextFile::write_to_path(&grid, &path).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn publishes_values_and_gradients_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(&dir);
        let inputs = vec![
            ActionInput::new("REFERENCE_GRID")
                .label("g")
                .keyword("FILE", path.as_str())
                .keyword("PERIODIC", "NO,YES"),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.watch("g").unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        let g = graph.value("g").unwrap();
        assert_eq!(g.len(), 9);
        assert_eq!(g.rank(), 2);
        assert_eq!(g.get(4).unwrap(), -0.5);
        assert_eq!(g.grid_gradient(4), &[1.0, 1.0]);
    }

    #[test]
    fn mismatched_periodicity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_grid(&dir);
        let inputs = vec![
            ActionInput::new("REFERENCE_GRID")
                .label("g")
                .keyword("FILE", path.as_str())
                .keyword("PERIODIC", "NO,NO"),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let inputs = vec![
            ActionInput::new("REFERENCE_GRID")
                .label("g")
                .keyword("FILE", "/nonexistent/cvflow.grid"),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }
}
