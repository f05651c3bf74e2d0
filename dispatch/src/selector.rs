//! Pure model selection against a [`CapabilityRegistry`].

use std::cmp::Reverse;

use tracing::warn;

use crate::model::{quality_rank, speed_rank, CapabilityRegistry};
use crate::task::ModelConstraints;

/// Pick the best model among `candidates` for `constraints`.
///
/// A present `required_model` always wins. Otherwise forbidden and
/// unregistered names are dropped, capability constraints are applied and the
/// survivors are ranked fastest first, then highest quality, then by name.
pub fn choose_model(
    registry: &CapabilityRegistry,
    constraints: &ModelConstraints,
    candidates: &[String],
) -> Option<String> {
    if let Some(required) = &constraints.required_model {
        if candidates.iter().any(|c| c == required) {
            return Some(required.clone());
        }
    }

    let mut survivors = Vec::new();
    for name in candidates {
        if constraints.forbidden_models.contains(name) {
            continue;
        }
        let Some(caps) = registry.capabilities(name) else {
            warn!(model = %name, "model missing from capability registry");
            continue;
        };
        if !constraints.required.is_subset(caps) || !constraints.forbidden.is_disjoint(caps) {
            continue;
        }
        survivors.push((name, caps));
    }

    survivors
        .into_iter()
        .min_by_key(|(name, caps)| (speed_rank(caps), Reverse(quality_rank(caps)), *name))
        .map(|(name, _)| name.clone())
}
