//! # cvflow Core Library
//!
//! A differentiable computation graph for collective variables in molecular simulations.
//! Actions produce typed, shaped values with sparse derivative tracking, biases turn those
//! values into energies, and a reverse pass carries the resulting forces back onto atoms.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Value`, `MultiValue`, `Grid`),
//!   periodic boundary arithmetic, interpolation kernels, quaternion algebra, reference
//!   structures, the atom arena, and grid file I/O.
//!
//! - **[`engine`]: The Logic Core.** The action graph itself: keyword schemas, the action
//!   registry, the per-action task scheduler, force back-propagation, and the built-in
//!   actions (walls, quaternion products, grid interpolation, molecule reconstruction, ...).
//!
//! - **[`workflows`]: The Public API.** Per-step sessions for MD-engine integrations and a
//!   trajectory driver that evaluates a graph over a sequence of frames.

pub mod core;
pub mod engine;
pub mod workflows;
