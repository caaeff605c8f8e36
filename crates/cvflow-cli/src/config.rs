use crate::error::{CliError, Result};
use cvflow::core::structure::reference::ReferenceStructure;
use cvflow::engine::config::{ActionInput, EngineConfig, EngineConfigBuilder};
use cvflow::workflows::trajectory::Frame;
use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialStructure {
    path: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialFrame {
    step: u64,
    /// Lattice vectors as rows.
    cell: Option<[[f64; 3]; 3]>,
    positions: Vec<[f64; 3]>,
}

impl From<PartialFrame> for Frame {
    fn from(p: PartialFrame) -> Self {
        Self {
            step: p.step,
            cell: p.cell.map(|rows| Matrix3::from_fn(|r, c| rows[r][c])),
            positions: p.positions.into_iter().map(Vector3::from).collect(),
        }
    }
}

/// The contents of a run file, before command-line overrides.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialRunConfig {
    natoms: Option<usize>,
    #[serde(default)]
    watch: Vec<String>,
    parallel: Option<bool>,
    min_parallel_tasks: Option<usize>,
    #[serde(default)]
    structures: BTreeMap<String, PartialStructure>,
    #[serde(default)]
    action: Vec<ActionInput>,
    #[serde(default)]
    frame: Vec<PartialFrame>,
}

/// Everything needed to build a session and drive it.
#[derive(Debug)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub actions: Vec<ActionInput>,
    pub structures: Vec<(String, ReferenceStructure)>,
    pub frames: Vec<Frame>,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading run file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolves structure paths against `base` and applies the `--serial` override.
    pub fn resolve(self, base: &Path, serial: bool) -> Result<RunConfig> {
        if self.action.is_empty() {
            return Err(CliError::Config("the run file defines no [[action]] tables".to_string()));
        }

        let mut builder = EngineConfigBuilder::new().watch_all(self.watch);
        if let Some(natoms) = self.natoms {
            builder = builder.natoms(natoms);
        }
        if serial {
            builder = builder.parallel(false);
        } else if let Some(parallel) = self.parallel {
            builder = builder.parallel(parallel);
        }
        if let Some(tasks) = self.min_parallel_tasks {
            builder = builder.min_parallel_tasks(tasks);
        }
        let engine = builder.build().map_err(|e| CliError::Config(e.to_string()))?;

        let structures = self
            .structures
            .into_iter()
            .map(|(name, s)| {
                let path = base.join(&s.path);
                debug!("Loading reference structure '{}' from {:?}", name, path);
                ReferenceStructure::load(&path)
                    .map(|structure| (name, structure))
                    .map_err(|e| CliError::FileParsing {
                        path,
                        source: e.into(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let frames: Vec<Frame> = self.frame.into_iter().map(Frame::from).collect();
        if let Some(frame) = frames.iter().find(|f| f.positions.len() != engine.natoms) {
            return Err(CliError::Config(format!(
                "frame at step {} has {} positions but natoms is {}",
                frame.step,
                frame.positions.len(),
                engine.natoms
            )));
        }

        Ok(RunConfig {
            engine,
            actions: self.action,
            structures,
            frames,
        })
    }
}
