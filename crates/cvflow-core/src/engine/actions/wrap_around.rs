use crate::core::models::arena::{ArenaError, AtomWriter};
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use nalgebra::Vector3;
use std::collections::HashMap;
use tracing::debug;

/// Brings groups of atoms to the periodic image closest to a set of reference atoms.
///
/// Moved atoms lead the lease and are the only ones claimed for writing; the reference
/// atoms follow and are read before anything moves.
#[derive(Debug)]
pub struct WrapAroundKernel {
    /// Local indices of the moved atoms, `group_by` per group.
    atoms: Vec<usize>,
    /// Local indices of the reference atoms.
    around: Vec<usize>,
    group_by: usize,
    pair: bool,
}

impl WrapAroundKernel {
    fn wrap(&self, writer: &mut AtomWriter<'_>) -> Result<(), ArenaError> {
        let pbc = writer.pbc().clone();
        let references = self
            .around
            .iter()
            .map(|&local| writer.get(local))
            .collect::<Result<Vec<_>, _>>()?;

        for (g, group) in self.atoms.chunks(self.group_by).enumerate() {
            let first = writer.get(group[0])?;
            let image = if self.pair {
                references[g] + pbc.distance(&references[g], &first)
            } else {
                let mut best: Option<(f64, Vector3<f64>)> = None;
                for reference in &references {
                    let d = pbc.distance(reference, &first);
                    let d2 = d.norm_squared();
                    if best.is_none_or(|(b, _)| d2 < b) {
                        best = Some((d2, reference + d));
                    }
                }
                match best {
                    Some((_, image)) => image,
                    None => first,
                }
            };
            let shift = image - first;
            for &local in group {
                let position = writer.get(local)?;
                writer.set(local, position + shift)?;
            }
        }
        Ok(())
    }
}

impl ActionKernel for WrapAroundKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let result = {
            let mut writer = io.writer()?;
            self.wrap(&mut writer)
        };
        result.map_err(|e| io.fail(e))
    }

    fn carries_forces(&self) -> bool {
        false
    }
}

pub fn keywords() -> Keywords {
    Keywords::new(
        "WRAPAROUND",
        "Move atoms to the periodic image closest to a set of reference atoms",
    )
    .atoms("ATOMS", "the atoms to be moved")
    .atoms("AROUND", "the reference atoms")
    .compulsory_with_default("GROUPBY", "1", "move atoms in groups of this size, following the first")
    .flag("PAIR", "pair each group with one reference atom instead of the closest")
    .with_stride()
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let label = ctx.label();
    let atoms = kw.atoms("ATOMS")?.unwrap_or_default();
    let around = kw.atoms("AROUND")?.unwrap_or_default();
    let group_by = kw.usize("GROUPBY")?.unwrap_or(1);
    let pair = kw.flag("PAIR");

    if atoms.is_empty() || around.is_empty() {
        return Err(EngineError::configuration(label, "both ATOMS and AROUND must list atoms"));
    }
    if group_by == 0 || atoms.len() % group_by != 0 {
        return Err(EngineError::configuration(
            label,
            format!("the number of atoms ({}) must be a multiple of GROUPBY ({group_by})", atoms.len()),
        ));
    }
    if pair && atoms.len() != around.len() * group_by {
        return Err(EngineError::configuration(
            label,
            format!(
                "with PAIR the number of atoms ({}) must equal the number of AROUND atoms ({}) times GROUPBY ({group_by})",
                atoms.len(),
                around.len()
            ),
        ));
    }

    let mut lease = Vec::new();
    let mut local_of = HashMap::new();
    let mut local = |atom: usize| {
        *local_of.entry(atom).or_insert_with(|| {
            lease.push(atom);
            lease.len() - 1
        })
    };
    let moved: Vec<usize> = atoms.iter().map(|&a| local(a)).collect();
    let referenced: Vec<usize> = around.iter().map(|&a| local(a)).collect();
    let writes = moved.iter().max().map_or(0, |&m| m + 1);
    let kernel = WrapAroundKernel {
        atoms: moved,
        around: referenced,
        group_by,
        pair,
    };

    debug!(
        label,
        groups = atoms.len() / group_by,
        references = around.len(),
        pair,
        "Configured wrapping"
    );
    let stride = kw.usize("STRIDE")?.unwrap_or(1);
    Ok(ActionParts::new(kernel)
        .atoms_writing_first(lease, writes)
        .pilot(stride))
}
