use phf::{Map, phf_map};

static PROTEIN_BACKBONE: &[&str] = &["N", "CA", "CB", "C", "O"];
static GLYCINE_BACKBONE: &[&str] = &["N", "CA", "HA1", "C", "O"];
static NUCLEIC_BACKBONE: &[&str] = &["P", "O5'", "C5'", "C4'", "C3'", "O3'"];

static BACKBONE_BY_MOLTYPE: Map<&'static str, &'static [&'static str]> = phf_map! {
    "protein" => PROTEIN_BACKBONE,
    "rna" => NUCLEIC_BACKBONE,
    "dna" => NUCLEIC_BACKBONE,
};

/// Backbone atom names of one residue, or `None` for an unknown molecule type.
pub fn backbone_atom_names(moltype: &str, residue_name: &str) -> Option<&'static [&'static str]> {
    let names = BACKBONE_BY_MOLTYPE.get(moltype.to_ascii_lowercase().as_str())?;
    if moltype.eq_ignore_ascii_case("protein") && residue_name.eq_ignore_ascii_case("GLY") {
        return Some(GLYCINE_BACKBONE);
    }
    Some(names)
}

pub fn is_known_moltype(moltype: &str) -> bool {
    BACKBONE_BY_MOLTYPE.contains_key(moltype.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glycine_uses_alpha_hydrogen_in_place_of_beta_carbon() {
        assert_eq!(backbone_atom_names("protein", "GLY").unwrap()[2], "HA1");
        assert_eq!(backbone_atom_names("protein", "ALA").unwrap()[2], "CB");
    }

    #[test]
    fn nucleic_acids_share_sugar_phosphate_backbone() {
        assert_eq!(backbone_atom_names("rna", "A"), backbone_atom_names("DNA", "DG"));
        assert_eq!(backbone_atom_names("dna", "DT").unwrap().len(), 6);
    }

    #[test]
    fn unknown_moltype_has_no_backbone() {
        assert!(backbone_atom_names("lipid", "POPC").is_none());
        assert!(!is_known_moltype("lipid"));
    }
}
