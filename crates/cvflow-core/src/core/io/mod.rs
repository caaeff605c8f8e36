//! Input/output for grid functions.
//!
//! Grids are persisted in a small text format: a header describing each axis followed by
//! one line per grid point in row-major order.

pub mod grid;
pub mod traits;
