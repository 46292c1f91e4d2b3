//! Document parsing and structural validation.
//!
//! Reads JSON, YAML or TOML into an untyped, order-preserving tree and walks
//! it into a [`ModelDefinition`]. Checks are purely structural:
//! - required fields present
//! - primitive types correct (numbers finite, flags exactly true/false)
//! - names non-empty and unique within their collection
//!
//! List-valued fields accept a single item or a list; both normalize to a
//! `Vec`. Named collections (optics, sequences, ranges, beams) may also be
//! written as a mapping keyed by name. Errors carry the dotted tree path of
//! the offending node.

use super::error::{Error, ParseError};
use super::types::*;
use rustc_hash::FxHashSet;
use serde_yaml_ng::{Mapping, Value};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

/// Surface syntax of a model document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from the file extension. Unknown extensions read as
    /// YAML, which also accepts JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// Parse every model in a document file.
pub fn parse_document_file(path: &Path) -> Result<Vec<ModelDefinition>, Error> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "parsing model document");
    Ok(parse_document(&content, DocumentFormat::from_path(path))?)
}

/// Parse every model in a document. The root is one model or a list.
pub fn parse_document(
    text: &str,
    format: DocumentFormat,
) -> Result<Vec<ModelDefinition>, ParseError> {
    let tree = load_tree(text, format)?;
    let roots = items(Some(&tree));
    if roots.is_empty() {
        return Err(ParseError::mismatch("", "at least one model"));
    }
    let single = roots.len() == 1 && !matches!(tree, Value::Sequence(_));

    let mut seen = FxHashSet::default();
    let mut models = Vec::with_capacity(roots.len());
    for (i, root) in roots.into_iter().enumerate() {
        let path = if single {
            String::new()
        } else {
            item_path("", root, i)
        };
        let model = parse_model(root, &path)?;
        if !seen.insert(model.name.clone()) {
            return Err(ParseError::duplicate(path, model.name));
        }
        models.push(model);
    }
    Ok(models)
}

/// Decode text into the untyped tree.
pub fn load_tree(text: &str, format: DocumentFormat) -> Result<Value, ParseError> {
    match format {
        DocumentFormat::Json => serde_json::from_str(text).map_err(ParseError::syntax),
        DocumentFormat::Yaml => serde_yaml_ng::from_str(text).map_err(ParseError::syntax),
        DocumentFormat::Toml => toml::from_str(text).map_err(ParseError::syntax),
    }
}

/// Build one model definition from its tree.
pub fn parse(document: &Value) -> Result<ModelDefinition, ParseError> {
    parse_model(document, "")
}

// ============================================================================
// Entities
// ============================================================================

const MODEL_KEYS: [&str; 9] = [
    "name",
    "svn-revision",
    "default-optic",
    "default-sequence",
    "path-offsets",
    "init-files",
    "optics",
    "sequences",
    "beams",
];

fn parse_model(value: &Value, path: &str) -> Result<ModelDefinition, ParseError> {
    let map = as_mapping(value, path)?;
    warn_unknown_keys(map, path, &MODEL_KEYS);

    let model = ModelDefinition {
        name: required_str(map, path, "name")?,
        svn_revision: match map.get("svn-revision") {
            None | Some(Value::Null) => None,
            Some(v) => Some(scalar_text(v, &join(path, "svn-revision"))?),
        },
        default_optic: required_str(map, path, "default-optic")?,
        default_sequence: required_str(map, path, "default-sequence")?,
        path_offsets: parse_path_offsets(map.get("path-offsets"), &join(path, "path-offsets"))?,
        init_files: parse_file_list(map, path, "init-files")?,
        optics: parse_named(map, path, "optics", parse_optic, |o| o.name.as_str())?,
        sequences: parse_named(map, path, "sequences", parse_sequence, |s| s.name.as_str())?,
        beams: parse_named(
            map,
            path,
            "beams",
            |v, p| parse_beam(v, p, true),
            |b| b.name.as_deref().unwrap_or_default(),
        )?,
    };
    debug!(
        model = %model.name,
        sequences = model.sequences.len(),
        optics = model.optics.len(),
        "parsed model"
    );
    Ok(model)
}

fn parse_path_offsets(value: Option<&Value>, path: &str) -> Result<PathOffsets, ParseError> {
    let mut offsets = PathOffsets::new();
    let map = match value {
        None | Some(Value::Null) => return Ok(offsets),
        Some(v) => as_mapping(v, path)?,
    };
    for (key, offset) in map {
        let key = key
            .as_str()
            .ok_or_else(|| ParseError::mismatch(path, "string keys"))?;
        let kind = LocationKind::from_name(strip_suffix_ignore_case(key, "-offset"));
        if offsets.get(&kind).is_some() {
            return Err(ParseError::duplicate(join(path, key), kind.to_string()));
        }
        let offset = offset
            .as_str()
            .ok_or_else(|| ParseError::mismatch(join(path, key), "string"))?;
        offsets.insert(kind, offset);
    }
    Ok(offsets)
}

fn parse_file_ref(value: &Value, path: &str) -> Result<FileRef, ParseError> {
    let map = as_mapping(value, path)?;
    let location = optional_str(map, path, "location")?
        .map(|s| LocationKind::from_name(&s))
        .unwrap_or(LocationKind::Resource);
    let parse = optional_str(map, path, "parse")?
        .map(|s| ParseKind::from_name(&s))
        .unwrap_or_default();
    Ok(FileRef {
        path: required_str(map, path, "path")?,
        location,
        parse,
    })
}

fn parse_file_list(map: &Mapping, path: &str, key: &str) -> Result<Vec<FileRef>, ParseError> {
    let list_path = join(path, key);
    items(map.get(key))
        .into_iter()
        .enumerate()
        .map(|(i, v)| parse_file_ref(v, &format!("{}[{}]", list_path, i)))
        .collect()
}

fn parse_optic(value: &Value, path: &str) -> Result<Optic, ParseError> {
    let map = as_mapping(value, path)?;
    let name = required_str(map, path, "name")?;
    let overlay = match map.get("overlay") {
        None | Some(Value::Null) => false,
        Some(v) => parse_flag(v, &join(path, "overlay"))?,
    };
    let overlays = optional_str(map, path, "overlays")?;
    if overlay && overlays.is_none() {
        return Err(ParseError::missing(join(path, "overlays")));
    }
    if !overlay && overlays.is_some() {
        warn!(optic = %name, "'overlays' ignored because 'overlay' is false");
    }
    Ok(Optic {
        name,
        overlay,
        overlays: if overlay { overlays } else { None },
        init_files: parse_file_list(map, path, "init-files")?,
    })
}

fn parse_sequence(value: &Value, path: &str) -> Result<Sequence, ParseError> {
    let map = as_mapping(value, path)?;
    let beam_path = join(path, "beam");
    let beam = match map.get("beam") {
        None | Some(Value::Null) => return Err(ParseError::missing(beam_path)),
        Some(Value::String(name)) if !name.trim().is_empty() => BeamSpec::Named(name.clone()),
        Some(v @ Value::Mapping(_)) => BeamSpec::Inline(parse_beam(v, &beam_path, false)?),
        Some(_) => return Err(ParseError::mismatch(beam_path, "beam mapping or beam name")),
    };
    Ok(Sequence {
        name: required_str(map, path, "name")?,
        beam,
        ranges: parse_named(map, path, "ranges", parse_range, |r| r.name.as_str())?,
        default_range: required_str(map, path, "default-range")?,
        aperture_files: parse_aperture_files(map, path)?,
    })
}

/// `aperture-files`, also spelled `aperfiles`. Declaring both is an error.
fn parse_aperture_files(map: &Mapping, path: &str) -> Result<Vec<FileRef>, ParseError> {
    match (map.contains_key("aperture-files"), map.contains_key("aperfiles")) {
        (true, true) => Err(ParseError::duplicate(
            join(path, "aperfiles"),
            "aperture-files",
        )),
        (false, true) => parse_file_list(map, path, "aperfiles"),
        _ => parse_file_list(map, path, "aperture-files"),
    }
}

fn parse_beam(value: &Value, path: &str, named: bool) -> Result<Beam, ParseError> {
    let map = as_mapping(value, path)?;
    let name = if named {
        Some(required_str(map, path, "name")?)
    } else {
        optional_str(map, path, "name")?
    };

    let mut params = ParamBag::new();
    for (key, v) in map {
        let key = key
            .as_str()
            .ok_or_else(|| ParseError::mismatch(path, "string keys"))?;
        if key == "name" {
            continue;
        }
        let param_path = join(path, key);
        let param = if NUMERIC_BEAM_KEYS.contains(&key) {
            ParamValue::Number(parse_number(v, &param_path)?)
        } else {
            parse_scalar(v, &param_path)?
        };
        params.insert(key.to_string(), param);
    }
    Ok(Beam { name, params })
}

fn parse_range(value: &Value, path: &str) -> Result<Range, ParseError> {
    let map = as_mapping(value, path)?;
    let name = required_str(map, path, "name")?;

    let bounds_path = join(path, "madx-range");
    let bounds = match map.get("madx-range") {
        None | Some(Value::Null) => return Err(ParseError::missing(bounds_path)),
        Some(v) => {
            let b = as_mapping(v, &bounds_path)?;
            RangeBounds {
                first: required_str(b, &bounds_path, "first")?,
                last: required_str(b, &bounds_path, "last")?,
            }
        }
    };

    let twiss_path = join(path, "twiss-initial-conditions");
    let twiss = match items(map.get("twiss-initial-conditions")).as_slice() {
        [] => None,
        [one] => Some(parse_twiss(one, &twiss_path)?),
        _ => {
            return Err(ParseError::mismatch(
                twiss_path,
                "at most one twiss-initial-conditions block",
            ))
        }
    };

    let filters_path = join(path, "corrector-invert-filters");
    let corrector_invert_filters = items(map.get("corrector-invert-filters"))
        .into_iter()
        .enumerate()
        .map(|(i, v)| parse_filter(v, &format!("{}[{}]", filters_path, i)))
        .collect::<Result<Vec<_>, _>>()?;

    let aperture_offset = match map.get("aper-offset") {
        None | Some(Value::Null) => None,
        Some(v) => Some(parse_file_ref(v, &join(path, "aper-offset"))?),
    };

    Ok(Range {
        name,
        bounds,
        twiss,
        corrector_invert_filters,
        aperture_offset,
    })
}

fn parse_twiss(value: &Value, path: &str) -> Result<TwissInitialConditions, ParseError> {
    let map = as_mapping(value, path)?;
    let name = optional_str(map, path, "name")?.unwrap_or_else(|| DEFAULT_TWISS_NAME.to_string());
    let mut twiss = TwissInitialConditions::new(name);

    for key in TWISS_NUMERIC_KEYS {
        match map.get(key) {
            None | Some(Value::Null) => {}
            Some(v) => {
                twiss
                    .numbers
                    .insert(key.to_string(), parse_number(v, &join(path, key))?);
            }
        }
    }
    for key in TWISS_FLAG_KEYS {
        match map.get(key) {
            None | Some(Value::Null) => {}
            Some(v) => {
                twiss
                    .flags
                    .insert(key.to_string(), parse_flag(v, &join(path, key))?);
            }
        }
    }

    let known: Vec<&str> = std::iter::once("name")
        .chain(TWISS_NUMERIC_KEYS)
        .chain(TWISS_FLAG_KEYS)
        .collect();
    warn_unknown_keys(map, path, &known);
    Ok(twiss)
}

fn parse_filter(value: &Value, path: &str) -> Result<RegexFilter, ParseError> {
    let map = as_mapping(value, path)?;
    let plane = match required_str(map, path, "plane")?.trim() {
        p if p.eq_ignore_ascii_case("H") => Plane::H,
        p if p.eq_ignore_ascii_case("V") => Plane::V,
        _ => return Err(ParseError::mismatch(join(path, "plane"), "plane H or V")),
    };
    Ok(RegexFilter {
        plane,
        pattern: required_str(map, path, "pattern")?,
    })
}

// ============================================================================
// Tree helpers
// ============================================================================

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// Path of a collection item: its name when it has one, else its index.
fn item_path(collection: &str, item: &Value, index: usize) -> String {
    match item.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => join(collection, name),
        _ => format!("{}[{}]", collection, index),
    }
}

/// Normalize a single item or a list to a list. Absent and null are empty.
fn items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(seq)) => seq.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Entries of a mapping keyed by entity name, e.g. `optics: {nominal: {..}}`.
///
/// `None` unless the mapping has no `name` key and every value is a mapping.
fn keyed_entities(map: &Mapping) -> Option<Vec<(&Value, &Mapping)>> {
    if map.is_empty() || map.contains_key("name") {
        return None;
    }
    map.iter()
        .map(|(key, value)| value.as_mapping().map(|entity| (key, entity)))
        .collect()
}

/// Normalize a collection of named entities: a single item, a list, or a
/// mapping keyed by name. Keyed entities take their key as `name`.
fn named_items<'a>(
    value: Option<&'a Value>,
    path: &str,
) -> Result<Vec<Cow<'a, Value>>, ParseError> {
    let entries = match value {
        Some(Value::Mapping(map)) => keyed_entities(map),
        _ => None,
    };
    let Some(entries) = entries else {
        return Ok(items(value).into_iter().map(Cow::Borrowed).collect());
    };

    entries
        .into_iter()
        .map(|(key, entity)| {
            let name = key
                .as_str()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ParseError::mismatch(path, "non-empty string keys"))?;
            let mut entity = entity.clone();
            match entity.get("name") {
                None | Some(Value::Null) => {
                    entity.insert(Value::String("name".into()), Value::String(name.into()));
                }
                Some(declared) if declared.as_str() == Some(name) => {}
                Some(_) => {
                    let name_path = join(&join(path, name), "name");
                    return Err(ParseError::mismatch(name_path, "name matching its key"));
                }
            }
            Ok(Cow::Owned(Value::Mapping(entity)))
        })
        .collect()
}

/// Parse a collection of named entities, rejecting duplicate names.
fn parse_named<T>(
    map: &Mapping,
    path: &str,
    key: &str,
    parse_item: impl Fn(&Value, &str) -> Result<T, ParseError>,
    name_of: impl Fn(&T) -> &str,
) -> Result<Vec<T>, ParseError> {
    let collection = join(path, key);
    let mut seen = FxHashSet::default();
    let mut parsed = Vec::new();
    for (i, item) in named_items(map.get(key), &collection)?.iter().enumerate() {
        let item: &Value = item;
        let item_path = item_path(&collection, item, i);
        let entity = parse_item(item, &item_path)?;
        let name = name_of(&entity).to_string();
        if !seen.insert(name.clone()) {
            return Err(ParseError::duplicate(item_path, name));
        }
        parsed.push(entity);
    }
    Ok(parsed)
}

fn as_mapping<'a>(value: &'a Value, path: &str) -> Result<&'a Mapping, ParseError> {
    value
        .as_mapping()
        .ok_or_else(|| ParseError::mismatch(path, "mapping"))
}

fn required_str(map: &Mapping, path: &str, key: &str) -> Result<String, ParseError> {
    optional_str(map, path, key)?.ok_or_else(|| ParseError::missing(join(path, key)))
}

fn optional_str(map: &Mapping, path: &str, key: &str) -> Result<Option<String>, ParseError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(Value::String(_)) => Err(ParseError::mismatch(join(path, key), "non-empty string")),
        Some(_) => Err(ParseError::mismatch(join(path, key), "string")),
    }
}

/// Text of an opaque scalar (string, number or bool).
fn scalar_text(value: &Value, path: &str) -> Result<String, ParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ParseError::mismatch(path, "scalar")),
    }
}

/// A finite real, written as a number or a numeric string.
fn parse_number(value: &Value, path: &str) -> Result<f64, ParseError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
        .ok_or_else(|| ParseError::mismatch(path, "finite number"))
}

/// Exactly `true` or `false`, as a bool or a string.
fn parse_flag(value: &Value, path: &str) -> Result<bool, ParseError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(ParseError::mismatch(path, "true or false")),
    }
}

fn parse_scalar(value: &Value, path: &str) -> Result<ParamValue, ParseError> {
    match value {
        Value::Bool(b) => Ok(ParamValue::Flag(*b)),
        Value::Number(_) => parse_number(value, path).map(ParamValue::Number),
        Value::String(s) => Ok(ParamValue::Text(s.clone())),
        _ => Err(ParseError::mismatch(path, "scalar")),
    }
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> &'a str {
    if s.len() >= suffix.len() && s.is_char_boundary(s.len() - suffix.len()) {
        let (head, tail) = s.split_at(s.len() - suffix.len());
        if tail.eq_ignore_ascii_case(suffix) {
            return head;
        }
    }
    s
}

fn warn_unknown_keys(map: &Mapping, path: &str, known: &[&str]) {
    for key in map.keys() {
        if let Some(key) = key.as_str() {
            if !known.contains(&key) {
                warn!(path = %path, key = %key, "ignoring unknown key");
            }
        }
    }
}
