//! Path resolution: (location kind, relative path) to a concrete locator.
//!
//! Offsets make a model portable across installations with different
//! resource roots. Joins always use `/`, whatever the host separator.

use super::error::UnsupportedLocationKind;
use super::types::{FileRef, LocationKind, PathOffsets, ResourceLocator};

/// Resolve a file reference against the model's path offsets.
pub fn resolve_path(
    file: &FileRef,
    offsets: &PathOffsets,
) -> Result<ResourceLocator, UnsupportedLocationKind> {
    let path = match &file.location {
        LocationKind::Resource | LocationKind::Repository => {
            join_offset(offsets.get(&file.location), &file.path)
        }
        LocationKind::Absolute => file.path.clone(),
        LocationKind::Other(kind) => {
            return Err(UnsupportedLocationKind { kind: kind.clone() });
        }
    };
    Ok(ResourceLocator {
        kind: file.location.clone(),
        path,
    })
}

/// Join with exactly one `/`. A missing or empty offset leaves the path as is.
fn join_offset(offset: Option<&str>, path: &str) -> String {
    match offset.map(|o| o.trim_end_matches('/')) {
        Some(offset) if !offset.is_empty() => {
            format!("{}/{}", offset, path.trim_start_matches('/'))
        }
        _ => path.to_string(),
    }
}
