//! Optic overlay composition.
//!
//! A plain optic contributes its own init-files. An overlay optic contributes
//! the composed files of the optic it overlays followed by its own, so every
//! overlay loads after its base. Duplicate files are kept in place; the
//! simulator decides what re-applying a file means.

use super::error::OverlayCycleError;
use super::resolver::{OpticId, ResolvedModel};
use super::types::FileRef;
use rustc_hash::FxHashSet;
use tracing::debug;

/// Ordered init-files of an optic, base optics first.
pub fn compose(
    resolved: &ResolvedModel,
    optic: OpticId,
) -> Result<Vec<FileRef>, OverlayCycleError> {
    let chain = overlay_chain(resolved, optic)?;
    let files: Vec<FileRef> = chain
        .iter()
        .rev()
        .flat_map(|id| resolved.optic(*id).init_files.iter().cloned())
        .collect();
    debug!(
        optic = %resolved.optic(optic).name,
        depth = chain.len(),
        files = files.len(),
        "composed optic"
    );
    Ok(files)
}

/// The optic followed by each optic it (transitively) overlays.
pub fn overlay_chain(
    resolved: &ResolvedModel,
    optic: OpticId,
) -> Result<Vec<OpticId>, OverlayCycleError> {
    let mut chain = vec![optic];
    let mut seen = FxHashSet::default();
    seen.insert(optic);

    let mut current = optic;
    while let Some(target) = resolved.overlay_target(current) {
        if !seen.insert(target) {
            let mut names: Vec<String> = chain
                .iter()
                .map(|id| resolved.optic(*id).name.clone())
                .collect();
            names.push(resolved.optic(target).name.clone());
            return Err(OverlayCycleError { chain: names });
        }
        chain.push(target);
        current = target;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::resolve;
    use crate::core::types::*;
    use proptest::prelude::*;

    fn optic(name: &str, overlays: Option<&str>, files: &[&str]) -> Optic {
        Optic {
            name: name.to_string(),
            overlay: overlays.is_some(),
            overlays: overlays.map(str::to_string),
            init_files: files
                .iter()
                .map(|f| FileRef::resource(*f).with_parse(ParseKind::Strengths))
                .collect(),
        }
    }

    fn model(optics: Vec<Optic>) -> ResolvedModel {
        let default_optic = optics[0].name.clone();
        resolve(ModelDefinition {
            name: "m".into(),
            svn_revision: None,
            default_optic,
            default_sequence: "line".into(),
            path_offsets: PathOffsets::new(),
            init_files: vec![],
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
                    corrector_invert_filters: vec![],
                    aperture_offset: None,
                }],
                default_range: "ALL".into(),
                aperture_files: vec![],
            }],
            beams: vec![],
        })
        .unwrap()
    }

    fn id(m: &ResolvedModel, name: &str) -> OpticId {
        m.optic_id(name).unwrap()
    }

    fn paths(files: &[FileRef]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_overlay_plain_optic_own_files() {
        let m = model(vec![optic("base", None, &["ti2.str", "b2b3.str"])]);
        let files = compose(&m, id(&m, "base")).unwrap();
        assert_eq!(paths(&files), vec!["ti2.str", "b2b3.str"]);
    }

    #[test]
    fn test_overlay_appends_after_base() {
        let m = model(vec![
            optic("base", None, &["base.str"]),
            optic("tweak", Some("base"), &["tweak.str"]),
        ]);
        let base = compose(&m, id(&m, "base")).unwrap();
        let tweak = compose(&m, id(&m, "tweak")).unwrap();
        let mut expected = base.clone();
        expected.extend(m.optic(id(&m, "tweak")).init_files.iter().cloned());
        assert_eq!(tweak, expected);
    }

    #[test]
    fn test_overlay_three_level_chain() {
        let m = model(vec![
            optic("a", Some("b"), &["a.str"]),
            optic("b", Some("c"), &["b1.str", "b2.str"]),
            optic("c", None, &["c.str"]),
        ]);
        let files = compose(&m, id(&m, "a")).unwrap();
        assert_eq!(paths(&files), vec!["c.str", "b1.str", "b2.str", "a.str"]);
    }

    #[test]
    fn test_overlay_keeps_duplicates() {
        let m = model(vec![
            optic("base", None, &["common.str"]),
            optic("tweak", Some("base"), &["common.str"]),
        ]);
        let files = compose(&m, id(&m, "tweak")).unwrap();
        assert_eq!(paths(&files), vec!["common.str", "common.str"]);
    }

    #[test]
    fn test_overlay_two_cycle() {
        let m = model(vec![
            optic("a", Some("b"), &["a.str"]),
            optic("b", Some("a"), &["b.str"]),
        ]);
        let err = compose(&m, id(&m, "a")).unwrap_err();
        assert_eq!(err.chain, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_overlay_self_cycle() {
        let m = model(vec![optic("a", Some("a"), &["a.str"])]);
        let err = compose(&m, id(&m, "a")).unwrap_err();
        assert_eq!(err.chain, vec!["a", "a"]);
    }

    #[test]
    fn test_overlay_cycle_reached_through_tail() {
        let m = model(vec![
            optic("top", Some("x"), &[]),
            optic("x", Some("y"), &[]),
            optic("y", Some("x"), &[]),
        ]);
        let err = compose(&m, id(&m, "top")).unwrap_err();
        assert_eq!(err.chain, vec!["top", "x", "y", "x"]);
    }

    proptest! {
        /// A linear chain of any depth loads the deepest base first.
        #[test]
        fn prop_overlay_chain_order(depth in 1usize..12) {
            let names: Vec<String> = (0..depth).map(|i| format!("o{}", i)).collect();
            let optics: Vec<Optic> = (0..depth)
                .map(|i| {
                    let file = format!("{}.str", names[i]);
                    let target = names.get(i + 1).map(String::as_str);
                    optic(&names[i], target, &[file.as_str()])
                })
                .collect();
            let m = model(optics);
            let files = compose(&m, id(&m, "o0")).unwrap();
            let expected: Vec<String> =
                names.iter().rev().map(|n| format!("{}.str", n)).collect();
            let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
            prop_assert_eq!(paths(&files), expected);
        }
    }
}
