//! Load plan generation: walk a resolved model into ordered simulator actions.
//!
//! Fixed emission order:
//! 1. global init-files
//! 2. composed optic files (base optics first)
//! 3. beam parameters of the sequence
//! 4. twiss initial conditions of the range, if any
//! 5. corrector-invert filters of the range, in declaration order
//! 6. aperture files and offsets, only when requested
//!
//! The builder performs no I/O and iterates only ordered collections, so the
//! same request always yields the same plan.

use super::error::{BuildError, ResolutionErrorKind};
use super::overlay;
use super::paths::resolve_path;
use super::resolver::{OpticId, RangeId, ResolvedModel, SequenceId};
use super::types::*;
use regex::Regex;
use tracing::debug;

/// Which sequence, range and optic to plan for. `None` selects the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanRequest {
    pub sequence: Option<String>,
    pub range: Option<String>,
    pub optic: Option<String>,

    /// Also load aperture files and the range's aperture offsets
    pub aperture: bool,
}

impl PlanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(mut self, name: impl Into<String>) -> Self {
        self.sequence = Some(name.into());
        self
    }

    pub fn range(mut self, name: impl Into<String>) -> Self {
        self.range = Some(name.into());
        self
    }

    pub fn optic(mut self, name: impl Into<String>) -> Self {
        self.optic = Some(name.into());
        self
    }

    pub fn with_aperture(mut self, aperture: bool) -> Self {
        self.aperture = aperture;
        self
    }
}

/// Build the load plan for a request.
pub fn build_plan(
    resolved: &ResolvedModel,
    request: &PlanRequest,
) -> Result<LoadPlan, BuildError> {
    let (sequence_id, range_id, optic_id) = select(resolved, request)?;
    let model = resolved.model();
    let sequence = resolved.sequence(sequence_id);
    let range = resolved.range(range_id);
    let optic = resolved.optic(optic_id);

    let mut actions = Vec::new();

    for file in &model.init_files {
        actions.push(load_file(file, &model.path_offsets)?);
    }
    for file in &overlay::compose(resolved, optic_id)? {
        actions.push(load_file(file, &model.path_offsets)?);
    }

    actions.push(LoadAction::SetBeamParameters {
        params: resolved.beam_for(sequence_id).params.clone(),
    });

    if let Some(twiss) = &range.twiss {
        actions.push(LoadAction::SetTwissInitialConditions {
            name: twiss.name.clone(),
            params: twiss.params(),
        });
    }

    for filter in &range.corrector_invert_filters {
        actions.push(LoadAction::RegisterCorrectorFilter {
            plane: filter.plane,
            pattern: compile_filter(&filter.pattern)?,
        });
    }

    if request.aperture {
        for file in &sequence.aperture_files {
            actions.push(load_file(file, &model.path_offsets)?);
        }
        if let Some(offsets) = &range.aperture_offset {
            actions.push(LoadAction::LoadApertureOffsets {
                locator: resolve_path(offsets, &model.path_offsets)?,
            });
        }
    }

    debug!(
        model = %model.name,
        sequence = %sequence.name,
        range = %range.name,
        optic = %optic.name,
        actions = actions.len(),
        "built load plan"
    );

    Ok(LoadPlan {
        model: model.name.clone(),
        svn_revision: model.svn_revision.clone(),
        sequence: sequence.name.clone(),
        range: RangeSelection {
            name: range.name.clone(),
            first: range.bounds.first.clone(),
            last: range.bounds.last.clone(),
        },
        optic: optic.name.clone(),
        actions,
    })
}

/// Look up the requested entities, falling back to declared defaults.
fn select(
    resolved: &ResolvedModel,
    request: &PlanRequest,
) -> Result<(SequenceId, RangeId, OpticId), BuildError> {
    let sequence = match &request.sequence {
        Some(name) => resolved
            .find_sequence(name)
            .map_err(|kind| lookup_error(kind, "sequence", name, || {
                BuildError::UnknownSequence { name: name.clone() }
            }))?,
        None => resolved.default_sequence(),
    };

    let range = match &request.range {
        Some(name) => resolved
            .find_range(sequence, name)
            .map_err(|kind| lookup_error(kind, "range", name, || BuildError::UnknownRange {
                sequence: resolved.sequence(sequence).name.clone(),
                name: name.clone(),
            }))?,
        None => resolved.default_range(sequence),
    };

    let optic = match &request.optic {
        Some(name) => resolved
            .find_optic(name)
            .map_err(|kind| lookup_error(kind, "optic", name, || {
                BuildError::UnknownOptic { name: name.clone() }
            }))?,
        None => resolved.default_optic(),
    };

    Ok((sequence, range, optic))
}

fn lookup_error(
    kind: ResolutionErrorKind,
    entity: &'static str,
    name: &str,
    unknown: impl FnOnce() -> BuildError,
) -> BuildError {
    match kind {
        ResolutionErrorKind::AmbiguousReference => BuildError::AmbiguousName {
            entity,
            name: name.to_string(),
        },
        ResolutionErrorKind::DanglingReference => unknown(),
    }
}

fn load_file(file: &FileRef, offsets: &PathOffsets) -> Result<LoadAction, BuildError> {
    Ok(LoadAction::LoadFile {
        locator: resolve_path(file, offsets)?,
        parse_kind: file.parse.clone(),
    })
}

fn compile_filter(pattern: &str) -> Result<CompiledPattern, BuildError> {
    Regex::new(pattern)
        .map(CompiledPattern)
        .map_err(|e| BuildError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Check that every sequence/range pairs into a plan with every optic.
///
/// Returns the first failure. Used by `validate` to surface overlay cycles,
/// unsupported locations and bad patterns that a default plan would miss.
pub fn check_all(resolved: &ResolvedModel) -> Result<usize, BuildError> {
    let mut plans = 0;
    for sequence in resolved.sequence_ids() {
        for range in resolved.range_names(sequence) {
            for optic in resolved.optic_ids() {
                let request = PlanRequest::new()
                    .sequence(resolved.sequence(sequence).name.clone())
                    .range(range)
                    .optic(resolved.optic(optic).name.clone())
                    .with_aperture(true);
                build_plan(resolved, &request)?;
                plans += 1;
            }
        }
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::{parse_document, DocumentFormat};
    use crate::core::resolver::resolve;
    use proptest::prelude::*;

    const TI2: &str = include_str!("../../models/ti2.json");

    fn ti2_model() -> ModelDefinition {
        parse_document(TI2, DocumentFormat::Json).unwrap().remove(0)
    }

    fn ti2() -> ResolvedModel {
        resolve(ti2_model()).unwrap()
    }

    #[test]
    fn test_planner_ti2_default_plan() {
        let plan = build_plan(&ti2(), &PlanRequest::new()).unwrap();
        assert_eq!(plan.model, "ti2");
        assert_eq!(plan.sequence, "ti2");
        assert_eq!(plan.range.name, "ALL");
        assert_eq!(plan.optic, "default optics");
        assert_eq!(plan.actions.len(), 8);

        assert_eq!(
            plan.loaded_files(),
            vec![
                "ti2/ti2-2009/ti2.seq",
                "ti2/ti2-2009/setb2b3.madx",
                "ti2/ti2-2009/ti2.str",
                "ti2/ti2-2009/b2b3.str",
            ]
        );
        match &plan.actions[2] {
            LoadAction::LoadFile { parse_kind, .. } => {
                assert_eq!(*parse_kind, ParseKind::Strengths)
            }
            other => panic!("expected strength file, got {:?}", other),
        }
        match &plan.actions[4] {
            LoadAction::SetBeamParameters { params } => {
                assert_eq!(params["particle"], ParamValue::Text("PROTON".into()));
                assert_eq!(params["energy"], ParamValue::Number(450.0));
            }
            other => panic!("expected beam, got {:?}", other),
        }
        match &plan.actions[5] {
            LoadAction::SetTwissInitialConditions { params, .. } => {
                match params["betx"] {
                    ParamValue::Number(b) => assert!((b - 17.02748544).abs() < 1e-9),
                    ref other => panic!("betx: {:?}", other),
                }
                match params["bety"] {
                    ParamValue::Number(b) => assert!((b - 123.9323528).abs() < 1e-9),
                    ref other => panic!("bety: {:?}", other),
                }
                assert_eq!(params["chrom"], ParamValue::Flag(true));
            }
            other => panic!("expected twiss, got {:?}", other),
        }
        let filters: Vec<_> = plan.actions[6..]
            .iter()
            .map(|a| match a {
                LoadAction::RegisterCorrectorFilter { plane, pattern } => {
                    (*plane, pattern.as_str().to_string())
                }
                other => panic!("expected filter, got {:?}", other),
            })
            .collect();
        assert_eq!(
            filters,
            vec![
                (Plane::H, "(?i)^MDL.*".to_string()),
                (Plane::V, "(?i)^MDL.*".to_string()),
            ]
        );
    }

    #[test]
    fn test_planner_explicit_names_match_defaults() {
        let resolved = ti2();
        let explicit = PlanRequest::new()
            .sequence("ti2")
            .range("ALL")
            .optic("default optics");
        assert_eq!(
            build_plan(&resolved, &explicit).unwrap(),
            build_plan(&resolved, &PlanRequest::new()).unwrap()
        );
    }

    #[test]
    fn test_planner_unknown_sequence() {
        let err = build_plan(&ti2(), &PlanRequest::new().sequence("lhcb1")).unwrap_err();
        assert_eq!(err, BuildError::UnknownSequence { name: "lhcb1".into() });
    }

    #[test]
    fn test_planner_unknown_range() {
        let err = build_plan(&ti2(), &PlanRequest::new().range("INJ")).unwrap_err();
        assert_eq!(
            err,
            BuildError::UnknownRange {
                sequence: "ti2".into(),
                name: "INJ".into()
            }
        );
    }

    #[test]
    fn test_planner_unknown_optic() {
        let err = build_plan(&ti2(), &PlanRequest::new().optic("nominal")).unwrap_err();
        assert_eq!(err, BuildError::UnknownOptic { name: "nominal".into() });
    }

    #[test]
    fn test_planner_ambiguous_optic() {
        let mut model = ti2_model();
        let spare = Optic {
            name: "spare".into(),
            overlay: false,
            overlays: None,
            init_files: vec![],
        };
        model.optics.push(spare.clone());
        model.optics.push(spare);
        let err = build_plan(&resolve(model).unwrap(), &PlanRequest::new().optic("spare"))
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::AmbiguousName {
                entity: "optic",
                name: "spare".into()
            }
        );
    }

    #[test]
    fn test_planner_invalid_regex() {
        let mut model = ti2_model();
        model.sequences[0].ranges[0].corrector_invert_filters[1].pattern = "(?i)^MDL[".into();
        let err = build_plan(&resolve(model).unwrap(), &PlanRequest::new()).unwrap_err();
        assert!(
            matches!(err, BuildError::InvalidRegex { ref pattern, .. } if pattern == "(?i)^MDL[")
        );
    }

    #[test]
    fn test_planner_range_without_twiss() {
        let mut model = ti2_model();
        model.sequences[0].ranges[0].twiss = None;
        let plan = build_plan(&resolve(model).unwrap(), &PlanRequest::new()).unwrap();
        assert_eq!(plan.actions.len(), 7);
        assert!(!plan
            .actions
            .iter()
            .any(|a| matches!(a, LoadAction::SetTwissInitialConditions { .. })));
    }

    #[test]
    fn test_planner_overlay_optic_order() {
        let mut model = ti2_model();
        model.optics.push(Optic {
            name: "bumped".into(),
            overlay: true,
            overlays: Some("default optics".into()),
            init_files: vec![FileRef::resource("bump.str").with_parse(ParseKind::Strengths)],
        });
        let resolved = resolve(model).unwrap();
        let plan = build_plan(&resolved, &PlanRequest::new().optic("bumped")).unwrap();
        assert_eq!(
            plan.loaded_files()[2..],
            [
                "ti2/ti2-2009/ti2.str",
                "ti2/ti2-2009/b2b3.str",
                "ti2/ti2-2009/bump.str"
            ]
        );
    }

    #[test]
    fn test_planner_overlay_cycle_fails() {
        let mut model = ti2_model();
        for (name, target) in [("a", "b"), ("b", "a")] {
            model.optics.push(Optic {
                name: name.into(),
                overlay: true,
                overlays: Some(target.into()),
                init_files: vec![],
            });
        }
        let resolved = resolve(model).unwrap();
        let err = build_plan(&resolved, &PlanRequest::new().optic("a")).unwrap_err();
        assert!(matches!(err, BuildError::OverlayCycle(ref e) if e.chain == ["a", "b", "a"]));
        assert!(check_all(&resolved).is_err());
    }

    #[test]
    fn test_planner_unsupported_location() {
        let mut model = ti2_model();
        model.init_files[1].location = LocationKind::from_name("URL");
        let err = build_plan(&resolve(model).unwrap(), &PlanRequest::new()).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedLocation(_)));
    }

    #[test]
    fn test_planner_aperture_only_when_requested() {
        let mut model = ti2_model();
        model.sequences[0].aperture_files = vec![FileRef::resource("aperture/ti2.aper")];
        model.sequences[0].ranges[0].aperture_offset =
            Some(FileRef::resource("aperture/offsets.tfs"));
        let resolved = resolve(model).unwrap();

        let plain = build_plan(&resolved, &PlanRequest::new()).unwrap();
        assert_eq!(plain.actions.len(), 8);

        let plan = build_plan(&resolved, &PlanRequest::new().with_aperture(true)).unwrap();
        assert_eq!(plan.actions.len(), 10);
        assert_eq!(plan.loaded_files().last(), Some(&"ti2/ti2-2009/aperture/ti2.aper"));
        assert_eq!(
            plan.actions[9],
            LoadAction::LoadApertureOffsets {
                locator: ResourceLocator {
                    kind: LocationKind::Resource,
                    path: "ti2/ti2-2009/aperture/offsets.tfs".into(),
                }
            }
        );
    }

    #[test]
    fn test_planner_idempotent() {
        let resolved = ti2();
        let a = build_plan(&resolved, &PlanRequest::new()).unwrap();
        let b = build_plan(&resolved, &PlanRequest::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_planner_concurrent_builds() {
        let resolved = ti2();
        let expected = build_plan(&resolved, &PlanRequest::new()).unwrap();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| build_plan(&resolved, &PlanRequest::new()).unwrap()))
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn test_planner_check_all_counts_combinations() {
        assert_eq!(check_all(&ti2()).unwrap(), 1);
    }

    #[test]
    fn test_planner_json_output() {
        let plan = build_plan(&ti2(), &PlanRequest::new()).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"action\":\"load_file\""));
        assert!(json.contains("\"locator\":\"ti2/ti2-2009/ti2.seq\""));
        assert!(json.contains("\"parse_kind\":\"STRENGTHS\""));
        assert!(json.contains("\"first\":\"#s\""));
    }

    /// A model with `globals` init-files, a linear overlay chain of `depth`
    /// optics (`o0` overlays `o1`, ...) and `filters` corrector filters.
    fn generated_model(globals: usize, depth: usize, filters: usize) -> ModelDefinition {
        let optics = (0..depth)
            .map(|i| {
                let overlays = (i + 1 < depth).then(|| format!("o{}", i + 1));
                Optic {
                    name: format!("o{}", i),
                    overlay: overlays.is_some(),
                    overlays,
                    init_files: vec![
                        FileRef::resource(format!("o{}-a.str", i)).with_parse(ParseKind::Strengths),
                        FileRef::resource(format!("o{}-b.str", i)).with_parse(ParseKind::Strengths),
                    ],
                }
            })
            .collect();
        let corrector_invert_filters = (0..filters)
            .map(|i| RegexFilter {
                plane: if i % 2 == 0 { Plane::H } else { Plane::V },
                pattern: format!("^MC{}.*", i),
            })
            .collect();
        ModelDefinition {
            name: "gen".into(),
            svn_revision: None,
            default_optic: "o0".into(),
            default_sequence: "line".into(),
            path_offsets: PathOffsets::new().with(LocationKind::Resource, "gen/2024"),
            init_files: (0..globals)
                .map(|i| FileRef::resource(format!("global-{}.madx", i)))
                .collect(),
            optics,
            sequences: vec![Sequence {
                name: "line".into(),
                beam: BeamSpec::Inline(Beam {
                    name: None,
                    params: ParamBag::new(),
                }),
                ranges: vec![Range {
                    name: "ALL".into(),
                    bounds: RangeBounds {
                        first: "#s".into(),
                        last: "#e".into(),
                    },
                    twiss: None,
                    corrector_invert_filters,
                    aperture_offset: None,
                }],
                default_range: "ALL".into(),
                aperture_files: vec![],
            }],
            beams: vec![],
        }
    }

    proptest! {
        /// Files load in declared order, deepest base optic first, and
        /// rebuilding gives the same plan and fingerprint.
        #[test]
        fn prop_planner_declared_order_and_determinism(
            globals in 0usize..6,
            depth in 1usize..6,
            filters in 0usize..5,
        ) {
            let resolved = resolve(generated_model(globals, depth, filters)).unwrap();
            let plan = build_plan(&resolved, &PlanRequest::new()).unwrap();

            let mut expected: Vec<String> = (0..globals)
                .map(|i| format!("gen/2024/global-{}.madx", i))
                .collect();
            for i in (0..depth).rev() {
                expected.push(format!("gen/2024/o{}-a.str", i));
                expected.push(format!("gen/2024/o{}-b.str", i));
            }
            let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
            prop_assert_eq!(plan.loaded_files(), expected);

            let patterns: Vec<String> = plan
                .actions
                .iter()
                .filter_map(|a| match a {
                    LoadAction::RegisterCorrectorFilter { pattern, .. } => {
                        Some(pattern.as_str().to_string())
                    }
                    _ => None,
                })
                .collect();
            let declared: Vec<String> = (0..filters).map(|i| format!("^MC{}.*", i)).collect();
            prop_assert_eq!(patterns, declared);

            let again = build_plan(&resolved, &PlanRequest::new()).unwrap();
            prop_assert_eq!(plan.fingerprint(), again.fingerprint());
            prop_assert_eq!(plan, again);
        }
    }
}
