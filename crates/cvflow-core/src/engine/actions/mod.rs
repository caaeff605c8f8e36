//! Built-in action types.
//!
//! Every module exposes a keyword schema and a constructor; [`register_builtins`] wires
//! them into an [`ActionRegistry`].

pub mod bias_value;
pub mod concatenate;
pub mod constant;
pub mod distance;
pub mod interpolate_grid;
pub mod molinfo;
pub mod quaternion_product;
pub mod reference_grid;
pub mod select_with_mask;
pub mod sum;
pub mod walls;
pub mod whole_molecules;
pub mod wrap_around;

use super::registry::ActionRegistry;

pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.insert(bias_value::keywords(), bias_value::build);
    registry.insert(concatenate::keywords(), concatenate::build);
    registry.insert(constant::keywords(), constant::build);
    registry.insert(distance::keywords(), distance::build);
    registry.insert(interpolate_grid::keywords(), interpolate_grid::build);
    registry.insert(walls::lower_keywords(), walls::build_lower);
    registry.insert(molinfo::keywords(), molinfo::build);
    registry.insert(quaternion_product::keywords(), quaternion_product::build);
    registry.insert(reference_grid::keywords(), reference_grid::build);
    registry.insert(select_with_mask::keywords(), select_with_mask::build);
    registry.insert(sum::keywords(), sum::build);
    registry.insert(walls::upper_keywords(), walls::build_upper);
    registry.insert(whole_molecules::keywords(), whole_molecules::build);
    registry.insert(wrap_around::keywords(), wrap_around::build);
}
