use crate::core::structure::reference::{ReferenceStructure, ResidueSelection, StructureError};
use crate::engine::action::{ActionKernel, ActionParts, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use std::sync::Arc;
use tracing::info;

/// Makes a reference structure available to later actions.
///
/// Nothing is computed per step; consumers look the latest `MOLINFO` up while they are
/// being constructed.
#[derive(Debug)]
pub struct MolinfoKernel {
    structure: Arc<ReferenceStructure>,
    whole: bool,
}

impl MolinfoKernel {
    pub fn structure(&self) -> &ReferenceStructure {
        &self.structure
    }

    /// Whether the reference holds whole molecules, so that its spanning tree can guide
    /// reconstruction.
    pub fn is_whole(&self) -> bool {
        self.whole
    }

    pub fn backbone(
        &self,
        moltype: &str,
        selection: &ResidueSelection,
    ) -> Result<Vec<Vec<usize>>, StructureError> {
        self.structure.backbone(moltype, selection)
    }
}

impl ActionKernel for MolinfoKernel {
    fn calculate(&mut self, _io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        Ok(())
    }

    fn carries_forces(&self) -> bool {
        false
    }
}

pub fn keywords() -> Keywords {
    Keywords::new("MOLINFO", "Provide information on the molecules in the system")
        .compulsory("STRUCTURE", "the name of a reference structure supplied by the driver")
        .flag("WHOLE", "the reference structure is whole, i.e. not broken by PBC")
}

pub fn build(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let name = kw.required_text("STRUCTURE")?;
    let structure = ctx.structure(&name)?;
    if structure.len() != ctx.natoms() {
        return Err(EngineError::configuration(
            ctx.label(),
            format!(
                "reference structure '{name}' has {} atoms but the system has {}",
                structure.len(),
                ctx.natoms()
            ),
        ));
    }
    let whole = kw.flag("WHOLE");
    info!(label = ctx.label(), structure = %name, whole, "Reference structure bound");
    Ok(ActionParts::new(MolinfoKernel { structure, whole }))
}
