//! Geometric utilities: periodic boundary conditions and quaternion algebra.

pub mod pbc;
pub mod quaternion;
