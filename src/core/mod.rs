//! Core deployment logic: types, parsing, interpolation, references, planning, execution.

pub mod defaults;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod interpolate;
pub mod parser;
pub mod planner;
pub mod refs;
pub mod target;
pub mod types;
