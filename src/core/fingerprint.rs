//! BLAKE3 fingerprints of load plans.
//!
//! Two plans with the same fingerprint execute the same actions in the same
//! order. Useful for caching plans and for asserting that planning is
//! deterministic across runs and hosts.

use super::types::LoadPlan;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

impl LoadPlan {
    /// Canonical text: header lines then one line per action.
    pub fn canonical_text(&self) -> String {
        let mut lines = vec![
            format!("model {}", self.model),
            format!("revision {}", self.svn_revision.as_deref().unwrap_or("-")),
            format!("sequence {}", self.sequence),
            format!(
                "range {} {} {}",
                self.range.name, self.range.first, self.range.last
            ),
            format!("optic {}", self.optic),
        ];
        lines.extend(self.actions.iter().map(|a| a.to_string()));
        lines.join("\n")
    }

    /// `"blake3:{hex}"` of the canonical text.
    pub fn fingerprint(&self) -> String {
        hash_string(&self.canonical_text())
    }
}
