use super::backbone::{backbone_atom_names, is_known_moltype};
use nalgebra::Vector3;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Unknown molecule type '{0}'")]
    UnknownMoltype(String),
    #[error("Residue {residue} not found in reference structure")]
    ResidueNotFound { residue: isize },
    #[error("Atom '{atom}' missing from residue {residue_name}{residue}")]
    MissingAtom {
        residue: isize,
        residue_name: String,
        atom: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReferenceAtom {
    pub name: String,
    pub residue: isize,
    pub residue_name: String,
    #[serde(default = "default_chain")]
    pub chain: char,
    pub position: [f64; 3],
}

fn default_chain() -> char {
    'A'
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferenceFile {
    atom: Vec<ReferenceAtom>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResidueSelection {
    All,
    Numbers(Vec<isize>),
}

/// A whole copy of the simulated molecule, indexed like the simulation's atoms.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceStructure {
    atoms: Vec<ReferenceAtom>,
}

impl ReferenceStructure {
    pub fn new(atoms: Vec<ReferenceAtom>) -> Self {
        Self { atoms }
    }

    pub fn load(path: &Path) -> Result<Self, StructureError> {
        let content = std::fs::read_to_string(path).map_err(|e| StructureError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let file: ReferenceFile = toml::from_str(&content).map_err(|e| StructureError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Ok(Self { atoms: file.atom })
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[ReferenceAtom] {
        &self.atoms
    }

    pub fn position(&self, index: usize) -> Option<Vector3<f64>> {
        self.atoms.get(index).map(|a| Vector3::from(a.position))
    }

    /// Backbone atom indices grouped into one list per chain, in residue order.
    pub fn backbone(
        &self,
        moltype: &str,
        selection: &ResidueSelection,
    ) -> Result<Vec<Vec<usize>>, StructureError> {
        if !is_known_moltype(moltype) {
            return Err(StructureError::UnknownMoltype(moltype.to_string()));
        }

        let mut residues: Vec<(char, isize, String)> = Vec::new();
        for atom in &self.atoms {
            let key = (atom.chain, atom.residue);
            if !residues.iter().any(|(c, r, _)| (*c, *r) == key) {
                residues.push((atom.chain, atom.residue, atom.residue_name.clone()));
            }
        }
        if let ResidueSelection::Numbers(numbers) = selection {
            for &n in numbers {
                if !residues.iter().any(|(_, r, _)| *r == n) {
                    return Err(StructureError::ResidueNotFound { residue: n });
                }
            }
            residues.retain(|(_, r, _)| numbers.contains(r));
        }

        let mut groups: Vec<(char, Vec<usize>)> = Vec::new();
        for (chain, residue, residue_name) in residues {
            let names = backbone_atom_names(moltype, &residue_name)
                .ok_or_else(|| StructureError::UnknownMoltype(moltype.to_string()))?;
            let mut indices = Vec::with_capacity(names.len());
            for &name in names {
                let index = self
                    .atoms
                    .iter()
                    .position(|a| a.chain == chain && a.residue == residue && a.name == name)
                    .ok_or_else(|| StructureError::MissingAtom {
                        residue,
                        residue_name: residue_name.clone(),
                        atom: name.to_string(),
                    })?;
                indices.push(index);
            }
            match groups.iter_mut().find(|(c, _)| *c == chain) {
                Some((_, group)) => group.extend(indices),
                None => groups.push((chain, indices)),
            }
        }
        Ok(groups.into_iter().map(|(_, group)| group).collect())
    }
}
