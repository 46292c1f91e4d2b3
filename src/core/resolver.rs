//! Reference resolution: binds every name reference to a direct handle.
//!
//! Resolves `default-optic`, `default-sequence`, each sequence's
//! `default-range`, named beam references and optic overlay targets in one
//! eager pass. A name that is absent is a dangling reference; a name shared by
//! two entries of the same collection is ambiguous. The parser already rejects
//! duplicates, but a [`ModelDefinition`] can also be built in code, so the
//! check is repeated here.

use super::error::{ResolutionError, ResolutionErrorKind};
use super::types::*;
use rustc_hash::FxHashMap;
use tracing::debug;

// Handles are issued only by a `ResolvedModel` and are valid for that model.

/// Index of an optic within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpticId(pub(crate) usize);

/// Index of a sequence within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(pub(crate) usize);

/// Index of a range within its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeId {
    pub(crate) sequence: SequenceId,
    pub(crate) index: usize,
}

impl RangeId {
    pub fn sequence(&self) -> SequenceId {
        self.sequence
    }
}

/// Name index over one collection. Duplicated names map to `None`.
#[derive(Debug, Clone, Default)]
struct NameIndex(FxHashMap<String, Option<usize>>);

impl NameIndex {
    fn build<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut map: FxHashMap<String, Option<usize>> = FxHashMap::default();
        for (i, name) in names.enumerate() {
            map.entry(name.to_string())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(i));
        }
        Self(map)
    }

    fn find(&self, name: &str) -> Result<usize, ResolutionErrorKind> {
        match self.0.get(name) {
            Some(Some(i)) => Ok(*i),
            Some(None) => Err(ResolutionErrorKind::AmbiguousReference),
            None => Err(ResolutionErrorKind::DanglingReference),
        }
    }

    fn bind(&self, name: &str, referenced_from: &str) -> Result<usize, ResolutionError> {
        self.find(name).map_err(|kind| ResolutionError {
            kind,
            ref_name: name.to_string(),
            referenced_from: referenced_from.to_string(),
        })
    }
}

/// Where a sequence's beam comes from after binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BeamBinding {
    Inline,
    Named(usize),
}

/// An immutable model with every reference bound.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    model: ModelDefinition,
    optic_index: NameIndex,
    sequence_index: NameIndex,
    range_indexes: Vec<NameIndex>,
    default_optic: OpticId,
    default_sequence: SequenceId,
    default_ranges: Vec<usize>,
    beams: Vec<BeamBinding>,
    overlay_targets: Vec<Option<OpticId>>,
}

/// Bind every name reference in the model.
pub fn resolve(model: ModelDefinition) -> Result<ResolvedModel, ResolutionError> {
    let optic_index = NameIndex::build(model.optics.iter().map(|o| o.name.as_str()));
    let sequence_index = NameIndex::build(model.sequences.iter().map(|s| s.name.as_str()));
    let beam_index = NameIndex::build(
        model
            .beams
            .iter()
            .map(|b| b.name.as_deref().unwrap_or_default()),
    );

    let default_optic = OpticId(optic_index.bind(&model.default_optic, "default-optic")?);
    let default_sequence =
        SequenceId(sequence_index.bind(&model.default_sequence, "default-sequence")?);

    let mut range_indexes = Vec::with_capacity(model.sequences.len());
    let mut default_ranges = Vec::with_capacity(model.sequences.len());
    let mut beams = Vec::with_capacity(model.sequences.len());
    for seq in &model.sequences {
        let ranges = NameIndex::build(seq.ranges.iter().map(|r| r.name.as_str()));
        let origin = format!("sequences.{}", seq.name);
        let default_range = format!("{}.default-range", origin);
        default_ranges.push(ranges.bind(&seq.default_range, &default_range)?);
        range_indexes.push(ranges);

        beams.push(match &seq.beam {
            BeamSpec::Inline(_) => BeamBinding::Inline,
            BeamSpec::Named(name) => {
                BeamBinding::Named(beam_index.bind(name, &format!("{}.beam", origin))?)
            }
        });
    }

    let overlay_targets = model
        .optics
        .iter()
        .map(|optic| {
            let origin = format!("optics.{}.overlays", optic.name);
            match (optic.overlay, &optic.overlays) {
                (true, Some(target)) => optic_index.bind(target, &origin).map(|i| Some(OpticId(i))),
                // an overlay must name its base
                (true, None) => Err(ResolutionError {
                    kind: ResolutionErrorKind::DanglingReference,
                    ref_name: String::new(),
                    referenced_from: origin,
                }),
                (false, _) => Ok(None),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        model = %model.name,
        default_optic = %model.default_optic,
        default_sequence = %model.default_sequence,
        "resolved model references"
    );

    Ok(ResolvedModel {
        model,
        optic_index,
        sequence_index,
        range_indexes,
        default_optic,
        default_sequence,
        default_ranges,
        beams,
        overlay_targets,
    })
}

impl ResolvedModel {
    pub fn model(&self) -> &ModelDefinition {
        &self.model
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    // -- lookups by name --

    /// Distinguishes an absent name from one declared twice.
    pub fn find_sequence(&self, name: &str) -> Result<SequenceId, ResolutionErrorKind> {
        self.sequence_index.find(name).map(SequenceId)
    }

    pub fn find_optic(&self, name: &str) -> Result<OpticId, ResolutionErrorKind> {
        self.optic_index.find(name).map(OpticId)
    }

    pub fn find_range(
        &self,
        sequence: SequenceId,
        name: &str,
    ) -> Result<RangeId, ResolutionErrorKind> {
        self.range_indexes
            .get(sequence.0)
            .ok_or(ResolutionErrorKind::DanglingReference)?
            .find(name)
            .map(|index| RangeId { sequence, index })
    }

    /// `None` for absent and for ambiguous names; see [`Self::find_sequence`].
    pub fn sequence_id(&self, name: &str) -> Option<SequenceId> {
        self.find_sequence(name).ok()
    }

    pub fn optic_id(&self, name: &str) -> Option<OpticId> {
        self.find_optic(name).ok()
    }

    pub fn range_id(&self, sequence: SequenceId, name: &str) -> Option<RangeId> {
        self.find_range(sequence, name).ok()
    }

    // -- handles --

    pub fn sequence(&self, id: SequenceId) -> &Sequence {
        &self.model.sequences[id.0]
    }

    pub fn optic(&self, id: OpticId) -> &Optic {
        &self.model.optics[id.0]
    }

    pub fn range(&self, id: RangeId) -> &Range {
        &self.model.sequences[id.sequence.0].ranges[id.index]
    }

    pub fn default_optic(&self) -> OpticId {
        self.default_optic
    }

    pub fn default_sequence(&self) -> SequenceId {
        self.default_sequence
    }

    pub fn default_range(&self, sequence: SequenceId) -> RangeId {
        RangeId {
            sequence,
            index: self.default_ranges[sequence.0],
        }
    }

    /// The beam of a sequence, inline or bound by name.
    pub fn beam_for(&self, sequence: SequenceId) -> &Beam {
        match (&self.beams[sequence.0], &self.sequence(sequence).beam) {
            (BeamBinding::Named(i), _) => &self.model.beams[*i],
            (BeamBinding::Inline, BeamSpec::Inline(beam)) => beam,
            // `resolve` binds every named beam
            (BeamBinding::Inline, BeamSpec::Named(_)) => unreachable!("named beam left unbound"),
        }
    }

    /// The optic this one overlays, if it is an overlay.
    pub fn overlay_target(&self, optic: OpticId) -> Option<OpticId> {
        self.overlay_targets[optic.0]
    }

    // -- listings (declaration order) --

    pub fn sequence_names(&self) -> Vec<&str> {
        self.model.sequences.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn optic_names(&self) -> Vec<&str> {
        self.model.optics.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn range_names(&self, sequence: SequenceId) -> Vec<&str> {
        self.sequence(sequence)
            .ranges
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn beam_names(&self) -> Vec<&str> {
        self.model
            .beams
            .iter()
            .filter_map(|b| b.name.as_deref())
            .collect()
    }

    pub fn sequence_ids(&self) -> impl Iterator<Item = SequenceId> {
        (0..self.model.sequences.len()).map(SequenceId)
    }

    pub fn optic_ids(&self) -> impl Iterator<Item = OpticId> {
        (0..self.model.optics.len()).map(OpticId)
    }
}
