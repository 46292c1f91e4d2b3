//! Schema model and load plan types.
//!
//! Defines the entity graph of a beamline model definition (sequences,
//! ranges, optics, beams, file references) and the typed actions of the load
//! plan handed to the simulator. Output types derive Serialize for JSON
//! rendering.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;

// ============================================================================
// Model definition
// ============================================================================

/// Root entity: one beamline model as declared in a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDefinition {
    /// Model name
    pub name: String,

    /// Revision of the source definition (metadata only)
    pub svn_revision: Option<String>,

    /// Optic used when the caller names none
    pub default_optic: String,

    /// Sequence used when the caller names none
    pub default_sequence: String,

    /// Prefixes per location kind
    pub path_offsets: PathOffsets,

    /// Files loaded before anything sequence-specific
    pub init_files: Vec<FileRef>,

    /// Optic declarations (declaration order)
    pub optics: Vec<Optic>,

    /// Sequence declarations (declaration order)
    pub sequences: Vec<Sequence>,

    /// Named beams that sequences may reference
    pub beams: Vec<Beam>,
}

// ============================================================================
// Files and locations
// ============================================================================

/// Where a referenced file lives. Open set: unknown kinds are carried as
/// `Other` and rejected by the path resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Resource,
    Repository,
    Absolute,
    Other(String),
}

impl LocationKind {
    /// Parse a location kind name (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "RESOURCE" => Self::Resource,
            "REPOSITORY" => Self::Repository,
            "ABSOLUTE" => Self::Absolute,
            _ => Self::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "RESOURCE"),
            Self::Repository => write!(f, "REPOSITORY"),
            Self::Absolute => write!(f, "ABSOLUTE"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

impl Serialize for LocationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// How the simulator should read a file. Open set like [`LocationKind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ParseKind {
    #[default]
    Plain,
    Strengths,
    Other(String),
}

impl ParseKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Self::Plain,
            "STRENGTHS" => Self::Strengths,
            _ => Self::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for ParseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::Strengths => write!(f, "STRENGTHS"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

impl Serialize for ParseKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A file the simulator must load, relative to its location kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileRef {
    pub path: String,
    pub location: LocationKind,
    pub parse: ParseKind,
}

impl FileRef {
    /// A plain file under the resource root.
    pub fn resource(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            location: LocationKind::Resource,
            parse: ParseKind::Plain,
        }
    }

    pub fn with_location(mut self, location: LocationKind) -> Self {
        self.location = location;
        self
    }

    pub fn with_parse(mut self, parse: ParseKind) -> Self {
        self.parse = parse;
        self
    }
}

/// Offset prefix per location kind (declaration order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathOffsets(IndexMap<LocationKind, String>);

impl PathOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: LocationKind, offset: impl Into<String>) {
        self.0.insert(kind, offset.into());
    }

    pub fn with(mut self, kind: LocationKind, offset: impl Into<String>) -> Self {
        self.insert(kind, offset);
        self
    }

    pub fn get(&self, kind: &LocationKind) -> Option<&str> {
        self.0.get(kind).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocationKind, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Concrete locator produced by the path resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceLocator {
    pub kind: LocationKind,
    pub path: String,
}

impl ResourceLocator {
    pub fn as_str(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl Serialize for ResourceLocator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

// ============================================================================
// Parameters and beams
// ============================================================================

/// A scalar parameter value carried verbatim to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Ordered parameter bag.
pub type ParamBag = IndexMap<String, ParamValue>;

/// Render a bag as `key=value, key=value`.
pub fn format_params(params: &ParamBag) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Beam keys whose values must be finite numbers.
pub const NUMERIC_BEAM_KEYS: [&str; 17] = [
    "energy", "pc", "gamma", "beta", "brho", "mass", "charge", "npart", "kbunch", "bcurrent",
    "ex", "ey", "exn", "eyn", "et", "sigt", "sige",
];

/// Physical beam parameters. `particle` is free-form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Beam {
    /// Set for model-level named beams
    pub name: Option<String>,
    pub params: ParamBag,
}

impl Beam {
    pub fn particle(&self) -> Option<&str> {
        match self.params.get("particle") {
            Some(ParamValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// A sequence's beam, declared inline or by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BeamSpec {
    Inline(Beam),
    Named(String),
}

// ============================================================================
// Sequences and ranges
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sequence {
    pub name: String,
    pub beam: BeamSpec,
    pub ranges: Vec<Range>,
    pub default_range: String,

    /// Loaded only for aperture plans
    pub aperture_files: Vec<FileRef>,
}

/// First/last element markers of a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeBounds {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Range {
    pub name: String,
    pub bounds: RangeBounds,
    pub twiss: Option<TwissInitialConditions>,
    pub corrector_invert_filters: Vec<RegexFilter>,
    pub aperture_offset: Option<FileRef>,
}

/// Numeric twiss keys, in the order they are emitted.
pub const TWISS_NUMERIC_KEYS: [&str; 15] = [
    "betx", "alfx", "mux", "bety", "alfy", "muy", "x", "px", "y", "py", "dx", "dpx", "dy", "dpy",
    "deltap",
];

/// Boolean twiss keys, in the order they are emitted.
pub const TWISS_FLAG_KEYS: [&str; 3] = ["chrom", "centre", "closed-orbit"];

pub const DEFAULT_TWISS_NAME: &str = "default-twiss";

/// Linear optics seed for a range. Only declared keys are stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwissInitialConditions {
    pub name: String,
    pub numbers: IndexMap<String, f64>,
    pub flags: IndexMap<String, bool>,
}

impl TwissInitialConditions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            numbers: IndexMap::new(),
            flags: IndexMap::new(),
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.numbers.get(key).copied()
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.flags.get(key).copied()
    }

    /// Numbers first, then flags.
    pub fn params(&self) -> ParamBag {
        let numbers = self
            .numbers
            .iter()
            .map(|(k, v)| (k.clone(), ParamValue::Number(*v)));
        let flags = self
            .flags
            .iter()
            .map(|(k, v)| (k.clone(), ParamValue::Flag(*v)));
        numbers.chain(flags).collect()
    }
}

/// Transverse plane of a corrector filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Plane {
    H,
    V,
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H => write!(f, "H"),
            Self::V => write!(f, "V"),
        }
    }
}

/// Corrector-invert filter as declared (pattern not yet compiled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegexFilter {
    pub plane: Plane,
    pub pattern: String,
}

// ============================================================================
// Optics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Optic {
    pub name: String,

    /// Appends to the overlaid optic instead of replacing it
    pub overlay: bool,

    /// Name of the overlaid optic (required when `overlay` is set)
    pub overlays: Option<String>,

    pub init_files: Vec<FileRef>,
}

// ============================================================================
// Load plan
// ============================================================================

/// Corrector pattern compiled with the `regex` crate.
#[derive(Debug, Clone)]
pub struct CompiledPattern(pub regex::Regex);

impl CompiledPattern {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, element: &str) -> bool {
        self.0.is_match(element)
    }
}

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for CompiledPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One step the simulator must execute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoadAction {
    LoadFile {
        locator: ResourceLocator,
        parse_kind: ParseKind,
    },
    SetBeamParameters {
        params: ParamBag,
    },
    SetTwissInitialConditions {
        name: String,
        params: ParamBag,
    },
    RegisterCorrectorFilter {
        plane: Plane,
        pattern: CompiledPattern,
    },
    LoadApertureOffsets {
        locator: ResourceLocator,
    },
}

impl fmt::Display for LoadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFile {
                locator,
                parse_kind,
            } => write!(f, "load-file {} [{}]", locator, parse_kind),
            Self::SetBeamParameters { params } => write!(f, "beam {}", format_params(params)),
            Self::SetTwissInitialConditions { name, params } => {
                write!(f, "twiss {} {}", name, format_params(params))
            }
            Self::RegisterCorrectorFilter { plane, pattern } => {
                write!(f, "corrector-filter {} {}", plane, pattern.as_str())
            }
            Self::LoadApertureOffsets { locator } => write!(f, "aperture-offsets {}", locator),
        }
    }
}

/// The range a plan was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSelection {
    pub name: String,
    pub first: String,
    pub last: String,
}

/// Fully resolved, ordered load plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadPlan {
    pub model: String,
    pub svn_revision: Option<String>,
    pub sequence: String,
    pub range: RangeSelection,
    pub optic: String,
    pub actions: Vec<LoadAction>,
}

impl LoadPlan {
    /// Locators of every `LoadFile` action, in plan order.
    pub fn loaded_files(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                LoadAction::LoadFile { locator, .. } => Some(locator.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
