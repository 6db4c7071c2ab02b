//! Open-request normalization
//!
//! Older builds of the application opened the store under several names
//! (`PersonalHub`, `personal-hub-db`, `StudyHub_DB`, ...) and at versions that
//! predate the current schema. Every open request goes through
//! [`StoreNormalizer::normalize`] so all of them land on the canonical store,
//! never below its minimum version.

use crate::engine::OpenRequest;

/// Name of the single physical store
pub const CANONICAL_STORE_NAME: &str = "unistore";

/// Lowest version a versioned open of the canonical store may request
pub const MIN_STORE_VERSION: u32 = 3;

/// Legacy identifiers, already folded (see [`fold_name`])
pub const LEGACY_STORE_NAMES: &[&str] = &[
    "personalhub",
    "personalhubdb",
    "hubdb",
    "studyhub",
    "studyhubdb",
];

/// Reduce a store name to lowercase alphanumerics so spellings that differ
/// only in case, punctuation or separators compare equal.
pub fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Rewrites open requests to target the canonical store.
#[derive(Debug, Clone)]
pub struct StoreNormalizer {
    canonical_name: String,
    min_version: u32,
    legacy_names: Vec<String>,
}

impl Default for StoreNormalizer {
    fn default() -> Self {
        Self::new(CANONICAL_STORE_NAME, MIN_STORE_VERSION, LEGACY_STORE_NAMES)
    }
}

impl StoreNormalizer {
    pub fn new(canonical_name: &str, min_version: u32, legacy_names: &[&str]) -> Self {
        let mut folded: Vec<String> = legacy_names.iter().map(|n| fold_name(n)).collect();
        folded.push(fold_name(canonical_name));
        folded.retain(|n| !n.is_empty());
        folded.sort();
        folded.dedup();

        Self {
            canonical_name: canonical_name.to_string(),
            min_version,
            legacy_names: folded,
        }
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn min_version(&self) -> u32 {
        self.min_version
    }

    /// Whether `name` is any accepted spelling of the canonical store.
    pub fn is_canonical(&self, name: &str) -> bool {
        name == self.canonical_name || self.legacy_names.contains(&fold_name(name))
    }

    /// Rewrite `request` so it targets the canonical store.
    ///
    /// - legacy names become the canonical name; other names pass through
    /// - an absent version stays absent
    /// - a version below the floor is raised to it, never lowered otherwise
    ///
    /// The floor only applies to the canonical store.
    pub fn normalize(&self, request: OpenRequest) -> OpenRequest {
        if !self.is_canonical(&request.name) {
            return request;
        }

        OpenRequest {
            name: self.canonical_name.clone(),
            version: request.version.map(|v| v.max(self.min_version)),
        }
    }
}
