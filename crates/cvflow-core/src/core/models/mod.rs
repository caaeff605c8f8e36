//! Data models for values, per-task scratch records and atom storage.
//!
//! A [`value::Value`] is the unit of data flowing along the edges of the action graph.
//! Tasks never write to values directly: they fill a [`multi_value::MultiValue`] which the
//! scheduler later scatters into the owning values.

pub mod arena;
pub mod ids;
pub mod multi_value;
pub mod shape;
pub mod sparse;
pub mod value;
