//! # Core Module
//!
//! Fundamental data structures and numerics shared by every action in the graph.
//!
//! ## Overview
//!
//! Nothing in this module knows about scheduling or actions. It provides the shaped
//! values actions publish, the scratch records tasks write into, and the geometric and
//! numerical building blocks those tasks need.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - `Value`, `MultiValue`, shapes, sparse derivative rows,
//!   the atom arena and identifiers
//! - **Grids** ([`grid`]) - grid geometry, point/index mapping and interpolation kernels
//! - **File I/O** ([`io`]) - the grid persistence format
//! - **Structures** ([`structure`]) - reference structures, backbone tables and spanning trees
//! - **Utilities** ([`utils`]) - periodic boundary conditions and quaternion algebra
//!
//! ## Key Capabilities
//!
//! - **Heterogeneous value shapes** (scalar, vector, matrix, D-dimensional grid)
//! - **Sparse per-element Jacobians** with a no-duplicate accumulation invariant
//! - **Minimum-image distances** for orthorhombic and triclinic cells
//! - **Value and gradient interpolation** on regular grids

pub mod grid;
pub mod io;
pub mod models;
pub mod structure;
pub mod utils;
