use crate::cli::RunArgs;
use crate::config::PartialRunConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use cvflow::engine::progress::ProgressReporter;
use cvflow::engine::registry::ActionRegistry;
use cvflow::workflows::session::Session;
use cvflow::workflows::trajectory::{self, FrameRecord};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    let base = args.config.parent().unwrap_or(Path::new("."));
    let config = PartialRunConfig::from_file(&args.config)?.resolve(base, args.serial)?;
    if config.frames.is_empty() {
        warn!("The run file lists no [[frame]] tables; nothing will be evaluated.");
    }

    let registry = ActionRegistry::with_builtins();
    let watch = config.engine.watch.clone();
    let mut session = Session::new(&registry, config.engine, &config.actions, config.structures)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    info!("Evaluating {} frame(s)", config.frames.len());
    let records = trajectory::run(&mut session, &config.frames, &watch, &reporter)?;

    match &args.output {
        Some(path) => {
            info!("Writing values to {:?}", path);
            write_values(File::create(path)?, &watch, &records)?;
        }
        None => write_values(io::stdout().lock(), &watch, &records)?,
    }
    if let Some(path) = &args.forces {
        info!("Writing forces to {:?}", path);
        write_forces(File::create(path)?, &records)?;
    }
    Ok(())
}

/// Column names for the watched values, one per element of the first record.
fn value_columns(watch: &[String], first: Option<&FrameRecord>) -> Vec<String> {
    let mut columns = vec!["step".to_string(), "bias".to_string()];
    for (k, name) in watch.iter().enumerate() {
        let len = first.and_then(|r| r.values.get(k)).map_or(1, Vec::len);
        if len == 1 {
            columns.push(name.clone());
        } else {
            columns.extend((0..len).map(|i| format!("{name}[{i}]")));
        }
    }
    columns
}

/// One row per step. Values whose length changes between steps produce ragged rows.
pub fn write_values<W: Write>(writer: W, watch: &[String], records: &[FrameRecord]) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    csv.write_record(value_columns(watch, records.first()))?;
    for record in records {
        let mut row = vec![record.step.to_string(), record.bias.to_string()];
        row.extend(record.values.iter().flatten().map(f64::to_string));
        csv.write_record(&row)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_forces<W: Write>(writer: W, records: &[FrameRecord]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["step", "atom", "fx", "fy", "fz"])?;
    for record in records {
        for (atom, force) in record.forces.iter().enumerate() {
            csv.write_record(&[
                record.step.to_string(),
                (atom + 1).to_string(),
                force.x.to_string(),
                force.y.to_string(),
                force.z.to_string(),
            ])?;
        }
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RunArgs;
    use nalgebra::Vector3;

    fn record(step: u64, values: Vec<Vec<f64>>) -> FrameRecord {
        FrameRecord {
            step,
            bias: 0.5,
            values,
            forces: vec![Vector3::new(1.0, 0.0, -1.0)],
        }
    }

    #[test]
    fn vector_values_get_one_column_per_element() {
        let mut out = Vec::new();
        let watch = vec!["d".to_string(), "s".to_string()];
        write_values(&mut out, &watch, &[record(0, vec![vec![1.5], vec![1.0, 2.0]])]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "step,bias,d,s[0],s[1]\n0,0.5,1.5,1,2\n");
    }

    #[test]
    fn forces_are_listed_per_atom_with_serial_numbers() {
        let mut out = Vec::new();
        write_forces(&mut out, &[record(4, Vec::new())]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "step,atom,fx,fy,fz\n4,1,1,0,-1\n");
    }

    #[test]
    fn run_file_is_evaluated_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("run.toml");
        std::fs::write(
            &config,
            r#"
natoms = 2
watch = ["d"]

[[action]]
label = "d"
name = "DISTANCE"
ATOMS = "1,2"

[[action]]
name = "LOWER_WALLS"
ARG = "d"
AT = 1.0
KAPPA = 1.0

[[frame]]
step = 0
positions = [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]]
"#,
        )
        .unwrap();
        let output = dir.path().join("values.csv");
        let forces = dir.path().join("forces.csv");
        run(RunArgs {
            config,
            output: Some(output.clone()),
            forces: Some(forces.clone()),
            serial: true,
        })
        .unwrap();

        let values = std::fs::read_to_string(output).unwrap();
        assert_eq!(values, "step,bias,d\n0,0.25,0.5\n");
        let forces = std::fs::read_to_string(forces).unwrap();
        let lines: Vec<&str> = forces.lines().collect();
        assert_eq!(lines.len(), 3);
        // The wall pushes the atoms apart along x.
        assert!(lines[1].starts_with("0,1,-1,"));
        assert!(lines[2].starts_with("0,2,1,"));
    }
}
