//! # Workflows Module
//!
//! High-level entry points that drive an action graph through a simulation.
//!
//! ## Overview
//!
//! A [`session::Session`] owns a built graph together with the atom arena it reads and
//! rewrites. MD-engine integrations hand it positions and a cell once per step and receive
//! the total bias and the per-atom forces back. The [`trajectory`] workflow runs a session
//! over a sequence of stored frames, reporting progress as it goes, and is what the
//! command-line driver uses.

pub mod session;
pub mod trajectory;
