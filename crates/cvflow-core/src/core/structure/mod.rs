//! Reference structures and the topology helpers built on them.
//!
//! A reference structure is a whole (unwrapped) copy of the molecule supplied by the
//! driver. It is used to select backbone atoms by residue and to derive the spanning
//! tree that guides molecule reconstruction.

pub mod backbone;
pub mod reference;
pub mod tree;
