use serde::{Deserialize, Serialize};

use crate::resolver::ResolverKind;

/// Placeholder name for values whose binding could not be determined.
pub const SENTINEL: &str = "<unnamed>";

/// Default upper bound on instructions the store-target decoder examines for
/// one construction.
pub const DEFAULT_MAX_SCAN_INSTRUCTIONS: usize = 4096;

/// Default maximum VM call depth.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Tunables for name resolution and the host VM.
///
/// ```
/// use autoname::{ResolveConfig, ResolverKind};
///
/// let config = ResolveConfig::default()
///     .with_max_scan_instructions(64)
///     .with_fallbacks(vec![ResolverKind::NamespaceScanner]);
/// assert_eq!(config.max_scan_instructions, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Scan budget per construction; exceeding it degrades to the sentinel.
    pub max_scan_instructions: usize,
    /// Maximum number of live frames in the VM.
    pub max_call_depth: usize,
    /// Resolvers consulted, in order, when the instruction scanner is unavailable.
    pub fallbacks: Vec<ResolverKind>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_scan_instructions: DEFAULT_MAX_SCAN_INSTRUCTIONS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            fallbacks: vec![ResolverKind::LexicalScanner, ResolverKind::NamespaceScanner],
        }
    }
}

impl ResolveConfig {
    #[must_use]
    pub fn with_max_scan_instructions(mut self, limit: usize) -> Self {
        self.max_scan_instructions = limit;
        self
    }

    #[must_use]
    pub fn with_max_call_depth(mut self, limit: usize) -> Self {
        self.max_call_depth = limit;
        self
    }

    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: Vec<ResolverKind>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
