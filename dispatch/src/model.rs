//! Static table describing what each known model can do.
//!
//! A [`CapabilityRegistry`] is built once at startup, either in code or from a
//! JSON document, and shared read-only with the [`crate::pool::BackendPool`].
//! Models missing from the registry are never selected.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::traits::{Capability, DispatchError};

/// Mapping of model name to its capability set.
///
/// ```
/// use dispatch::{Capability, CapabilityRegistry};
/// let registry = CapabilityRegistry::from_json(r#"{"m1": ["Fast", "Chat"]}"#).unwrap();
/// assert!(registry.supports("m1", Capability::Chat));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityRegistry {
    models: HashMap<String, BTreeSet<Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(
        mut self,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        self.insert(name, capabilities);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) {
        self.models
            .insert(name.into(), capabilities.into_iter().collect());
    }

    /// Parse a `{"model": ["Cap", ...]}` document.
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        serde_json::from_str(json)
            .map_err(|e| DispatchError::Config(format!("invalid capability table: {e}")))
    }

    /// Read a capability table from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// A table covering common models served by Ollama.
    pub fn ollama_defaults() -> Self {
        use Capability::*;
        Self::new()
            .with_model("gemma3:27b", [Smart, Chat, Generate, Vision])
            .with_model("gemma3:4b", [Fast, Chat, Generate, Vision])
            .with_model("llama3.2:3b", [Fast, Chat, Generate])
            .with_model("llama3.3:70b", [Smart, Huge, Chat, Generate])
            .with_model("llava:13b", [Vision, Chat, Generate])
            .with_model("nomic-embed-text", [Fast, Embed])
            .with_model("mxbai-embed-large", [Smart, Embed])
    }

    pub fn capabilities(&self, name: &str) -> Option<&BTreeSet<Capability>> {
        self.models.get(name)
    }

    pub fn supports(&self, name: &str, capability: Capability) -> bool {
        self.capabilities(name)
            .is_some_and(|caps| caps.contains(&capability))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Position in fastest-first order. The slowest tag present wins.
pub fn speed_rank(capabilities: &BTreeSet<Capability>) -> u8 {
    if capabilities.contains(&Capability::Huge) {
        3
    } else if capabilities.contains(&Capability::Smart) {
        2
    } else if capabilities.contains(&Capability::Fast) {
        0
    } else {
        1
    }
}

/// Higher is better. `Smart` and `Huge` weigh double, `Vision` adds one.
pub fn quality_rank(capabilities: &BTreeSet<Capability>) -> u8 {
    capabilities
        .iter()
        .map(|cap| match cap {
            Capability::Smart | Capability::Huge => 2,
            Capability::Vision => 1,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_table() {
        let registry =
            CapabilityRegistry::from_json(r#"{"m1": ["Fast", "Chat"], "m2": ["Smart", "Chat"]}"#)
                .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.supports("m2", Capability::Smart));
        assert!(!registry.supports("m2", Capability::Fast));
        assert!(!registry.contains("m3"));
    }

    #[test]
    fn rejects_unknown_capability() {
        let err = CapabilityRegistry::from_json(r#"{"m1": ["Telepathy"]}"#).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn ranks_order_tags() {
        let fast: BTreeSet<_> = [Capability::Fast].into();
        let plain: BTreeSet<_> = [Capability::Chat].into();
        let smart: BTreeSet<_> = [Capability::Smart].into();
        let huge: BTreeSet<_> = [Capability::Huge, Capability::Smart].into();
        assert!(speed_rank(&fast) < speed_rank(&plain));
        assert!(speed_rank(&plain) < speed_rank(&smart));
        assert!(speed_rank(&smart) < speed_rank(&huge));
        assert!(quality_rank(&huge) > quality_rank(&smart));
        assert!(quality_rank(&smart) > quality_rank(&plain));
        assert_eq!(quality_rank(&plain), quality_rank(&fast));
    }

    #[test]
    fn quality_rank_adds_tag_weights() {
        use Capability::*;
        let score =
            |caps: &[Capability]| quality_rank(&caps.iter().copied().collect::<BTreeSet<_>>());
        assert_eq!(score(&[]), 0);
        assert_eq!(score(&[Fast, Chat]), 0);
        assert_eq!(score(&[Vision]), 1);
        assert_eq!(score(&[Smart, Chat]), 2);
        assert_eq!(score(&[Smart, Chat, Vision]), 3);
        assert_eq!(score(&[Smart, Huge]), 4);
        assert_eq!(score(&[Smart, Huge, Vision]), 5);
    }

    #[test]
    fn defaults_cover_embeddings() {
        let registry = CapabilityRegistry::ollama_defaults();
        assert!(registry.supports("nomic-embed-text", Capability::Embed));
        assert!(registry.supports("gemma3:27b", Capability::Vision));
    }
}
