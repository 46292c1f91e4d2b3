//! Beamplan: beamline model definition resolver.
//!
//! Parses declarative accelerator model definitions (sequences, ranges,
//! optics, beams, call-files), binds their named references, and emits a
//! deterministic load plan for an external beam-dynamics simulator.

pub mod cli;
pub mod core;

pub use crate::core::catalog::Catalog;
pub use crate::core::error::Error;
pub use crate::core::parser::{parse, parse_document, parse_document_file, DocumentFormat};
pub use crate::core::planner::{build_plan, PlanRequest};
pub use crate::core::resolver::{resolve, ResolvedModel};
pub use crate::core::types::{LoadAction, LoadPlan, ModelDefinition};
