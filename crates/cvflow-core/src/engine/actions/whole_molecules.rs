use super::molinfo::MolinfoKernel;
use crate::core::models::arena::{AccessIntent, ArenaError, AtomWriter};
use crate::core::structure::reference::ResidueSelection;
use crate::core::structure::tree::minimum_spanning_tree;
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use nalgebra::Vector3;
use std::collections::HashMap;
use tracing::debug;

/// One molecule, listed in reconstruction order.
#[derive(Debug, Clone, PartialEq)]
struct Entity {
    /// Local lease indices.
    atoms: Vec<usize>,
    /// `anchors[k - 1]` is the position in `atoms` of the atom `atoms[k]` is placed next to.
    anchors: Vec<usize>,
    reference: Option<Vector3<f64>>,
}

impl Entity {
    fn sequential(atoms: Vec<usize>) -> Self {
        let anchors = (0..atoms.len().saturating_sub(1)).collect();
        Self {
            atoms,
            anchors,
            reference: None,
        }
    }
}

/// Rebuilds molecules broken by periodic boundaries, one minimum-image step at a time.
#[derive(Debug)]
pub struct WholeMoleculesKernel {
    entities: Vec<Entity>,
}

impl WholeMoleculesKernel {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn rebuild(&self, writer: &mut AtomWriter<'_>) -> Result<(), ArenaError> {
        let pbc = writer.pbc().clone();
        let mut rebuilt = Vec::new();
        for entity in &self.entities {
            let Some((&head, rest)) = entity.atoms.split_first() else {
                continue;
            };
            let mut first = writer.get(head)?;
            if let Some(reference) = entity.reference {
                first = reference + pbc.distance(&reference, &first);
                writer.set(head, first)?;
            }
            rebuilt.clear();
            rebuilt.push(first);
            for (&local, &anchor) in rest.iter().zip(&entity.anchors) {
                let anchor = rebuilt[anchor];
                let position = anchor + pbc.distance(&anchor, &writer.get(local)?);
                writer.set(local, position)?;
                rebuilt.push(position);
            }
        }
        Ok(())
    }
}

impl ActionKernel for WholeMoleculesKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let result = {
            let mut writer = io.writer()?;
            self.rebuild(&mut writer)
        };
        result.map_err(|e| io.fail(e))
    }

    fn carries_forces(&self) -> bool {
        false
    }
}

pub fn keywords() -> Keywords {
    Keywords::new(
        "WHOLEMOLECULES",
        "Make molecules whole again after they have been broken by periodic boundaries",
    )
    .numbered("ENTITY", "the atoms of one molecule, ENTITY0, ENTITY1, ...")
    .optional(
        "RESIDUES",
        "take one molecule per chain from the backbone of these residues (or all) of the latest MOLINFO",
    )
    .optional("MOLTYPE", "the molecule type used with RESIDUES (protein, rna or dna)")
    .flag(
        "ADDREFERENCE",
        "place the first atom of each molecule at its image closest to the MOLINFO reference",
    )
    .with_stride()
}

fn residue_selection(label: &str, items: &[String]) -> Result<ResidueSelection, EngineError> {
    if items.iter().any(|s| s.eq_ignore_ascii_case("all")) {
        return Ok(ResidueSelection::All);
    }
    items
        .iter()
        .map(|s| {
            s.trim()
                .parse::<isize>()
                .map_err(|_| EngineError::configuration(label, format!("invalid residue number '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(ResidueSelection::Numbers)
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let molinfo = ctx.latest::<MolinfoKernel>();
    let require_molinfo = |key: &str| {
        molinfo.ok_or_else(|| {
            let message = format!("{key} needs an earlier MOLINFO action");
            if ctx.is_pending("MOLINFO") {
                EngineError::ordering(label, format!("{message}, but MOLINFO is defined after this action"))
            } else {
                EngineError::configuration(label, message)
            }
        })
    };

    let groups = if kw.contains("RESIDUES") {
        let moltype = kw.text("MOLTYPE").ok_or_else(|| {
            EngineError::configuration(label, "RESIDUES needs MOLTYPE to name the molecule type")
        })?;
        let molinfo = require_molinfo("RESIDUES")?;
        let selection = residue_selection(label, &kw.texts("RESIDUES"))?;
        molinfo
            .backbone(&moltype, &selection)
            .map_err(|e| EngineError::configuration(label, e.to_string()))?
    } else {
        kw.numbered_atoms("ENTITY")?
    };
    if groups.is_empty() || groups.iter().any(Vec::is_empty) {
        return Err(EngineError::configuration(label, "no atoms were specified for at least one entity"));
    }

    let mut lease = Vec::new();
    let mut local_of = HashMap::new();
    for &atom in groups.iter().flatten() {
        local_of.entry(atom).or_insert_with(|| {
            lease.push(atom);
            lease.len() - 1
        });
    }

    let use_tree = molinfo.is_some_and(MolinfoKernel::is_whole);
    let add_reference = kw.flag("ADDREFERENCE");
    let reference_molinfo = if add_reference || use_tree {
        Some(require_molinfo("ADDREFERENCE")?)
    } else {
        None
    };
    let reference_position = |atom: usize| {
        reference_molinfo
            .and_then(|m| m.structure().position(atom))
            .ok_or_else(|| EngineError::configuration(label, format!("atom {} is missing from the reference", atom + 1)))
    };

    let mut entities = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut entity = if use_tree {
            let positions = group
                .iter()
                .map(|&a| reference_position(a))
                .collect::<Result<Vec<_>, _>>()?;
            let tree = minimum_spanning_tree(&positions);
            let slot: HashMap<usize, usize> = tree.order.iter().enumerate().map(|(k, &i)| (i, k)).collect();
            Entity {
                atoms: tree.order.iter().map(|&i| local_of[&group[i]]).collect(),
                anchors: tree.parents.iter().map(|p| slot[p]).collect(),
                reference: None,
            }
        } else {
            Entity::sequential(group.iter().map(|a| local_of[a]).collect())
        };
        if add_reference {
            let head = lease[entity.atoms[0]];
            entity.reference = Some(reference_position(head)?);
        }
        entities.push(entity);
    }

    debug!(
        label,
        entities = entities.len(),
        atoms = lease.len(),
        tree = use_tree,
        add_reference,
        "Configured molecule reconstruction"
    );
    let stride = kw.usize("STRIDE")?.unwrap_or(1);
    Ok(ActionParts::new(WholeMoleculesKernel { entities })
        .atoms(lease, AccessIntent::Write)
        .pilot(stride))
}
