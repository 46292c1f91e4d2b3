//! Core model logic: types, parsing, resolution, composition, planning.

pub mod catalog;
pub mod error;
pub mod fingerprint;
pub mod overlay;
pub mod parser;
pub mod paths;
pub mod planner;
pub mod resolver;
pub mod types;
