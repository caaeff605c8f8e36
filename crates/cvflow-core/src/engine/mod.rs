//! # Engine Module
//!
//! This module implements the action graph: the ordered network of computation nodes that
//! turn atomic coordinates into collective variables, biases and, on the way back, forces.
//!
//! ## Overview
//!
//! Actions are built once from keyword inputs and evaluated every step. Each action owns the
//! values it publishes; downstream actions read them through value references. During the
//! forward pass every action records the sparse partial derivatives of its outputs, which
//! the reverse pass contracts with the forces requested by biases until they reach atoms.
//!
//! ## Architecture
//!
//! - **Actions** ([`action`]) - Capability composition (pilot, atom accessor, value
//!   publisher, argument reader) and the `ActionKernel` trait implemented by every action type
//! - **Graph** ([`graph`]) - Construction, activity per step, forward and reverse passes
//! - **Scheduling** ([`scheduler`]) - Task loops over elements or matrix rows, optionally parallel
//! - **Back-propagation** ([`backprop`]) - Jacobian contraction shared by most action types
//! - **Registry & Keywords** ([`registry`], [`keywords`]) - Action types, their keyword schema
//!   and constructors
//! - **Built-in actions** ([`actions`]) - Walls, quaternion products, grid interpolation,
//!   molecule reconstruction and the supporting value manipulations
//! - **Configuration** ([`config`]) - Engine settings and action inputs
//! - **Progress Monitoring** ([`progress`]) - Progress callbacks for long trajectories
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! ## Key Capabilities
//!
//! - **Sparse derivative bookkeeping** per task, merged deterministically across workers
//! - **Exact reverse-mode forces** through scalar, vector, matrix and grid values
//! - **Stride-driven scheduling** evaluating only what due biases and watched values need
//! - **Guarded atom writes** through leases and write tokens checked when the graph is built

pub mod action;
pub mod actions;
pub mod backprop;
pub mod config;
pub mod error;
pub mod graph;
pub mod keywords;
pub mod progress;
pub mod registry;
pub mod scheduler;
