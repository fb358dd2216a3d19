//! Version negotiation
//!
//! Decides, for one shared dependency requirement, whether an already
//! registered provider is reused or the requesting container's own provider
//! is registered. Pure and synchronous: the caller holds the scope lock for
//! the whole decision.
//!
//! Rules, in order:
//! 1. no entry for the name: register the offer as the sole provider
//! 2. a locked singleton always wins; if its version misses the requested
//!    range that is a version-shadowing event, not an error
//! 3. otherwise the first satisfying provider in registration order is reused,
//!    preferring one that is already loaded
//! 4. nothing satisfies: append the offer
//!
//! A singleton requirement locks whichever provider it resolves to.

use semver::Version;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::federation::registry::manifest::SharedDependencyRequirement;
use crate::federation::scope::{LoaderThunk, Provider, ScopeEntry};

/// Outcome of negotiating one requirement
#[derive(Debug, Clone)]
pub enum ProviderDecision {
    /// Use a provider someone else registered
    ReuseExisting(Arc<Provider>),
    /// The requesting container's provider was registered
    RegisterNew(Arc<Provider>),
}

impl ProviderDecision {
    /// Provider to load or reuse
    pub fn provider(&self) -> &Arc<Provider> {
        match self {
            ProviderDecision::ReuseExisting(p) | ProviderDecision::RegisterNew(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, ProviderDecision::RegisterNew(_))
    }
}

/// A singleton lock forced reuse of a version outside the requested range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionShadowingEvent {
    pub name: String,
    pub requested_range: String,
    pub requested_by: String,
    pub locked_version: Version,
    pub locked_by: String,
}

/// Decision plus the diagnostics it produced
#[derive(Debug, Clone)]
pub struct Negotiation {
    pub decision: ProviderDecision,
    pub shadowing: Option<VersionShadowingEvent>,
}

/// Negotiate `requirement` against the scope `entries`
pub fn negotiate(
    entries: &mut HashMap<String, ScopeEntry>,
    requirement: &SharedDependencyRequirement,
    container_id: &str,
    thunk: LoaderThunk,
) -> Negotiation {
    let entry = entries
        .entry(requirement.name.clone())
        .or_insert_with(|| ScopeEntry::new(requirement.name.clone()));

    if entry.providers.is_empty() {
        let provider = entry.register(requirement, container_id, thunk);
        if requirement.singleton {
            entry.singleton = Some(Arc::clone(&provider));
        }
        debug!(
            "Registered first provider {}@{} from {}",
            requirement.name, provider.version, container_id
        );
        return Negotiation {
            decision: ProviderDecision::RegisterNew(provider),
            shadowing: None,
        };
    }

    if let Some(locked) = entry.singleton.clone() {
        let shadowing = if requirement.version_range.satisfies(&locked.version) {
            None
        } else {
            warn!(
                "Version shadowing: {} requested {}@{} but singleton {} (from {}) is locked",
                container_id,
                requirement.name,
                requirement.version_range,
                locked.version,
                locked.registered_by
            );
            Some(VersionShadowingEvent {
                name: requirement.name.clone(),
                requested_range: requirement.version_range.to_string(),
                requested_by: container_id.to_string(),
                locked_version: locked.version.clone(),
                locked_by: locked.registered_by.clone(),
            })
        };
        return Negotiation {
            decision: ProviderDecision::ReuseExisting(locked),
            shadowing,
        };
    }

    let satisfying: Vec<&Arc<Provider>> = entry
        .providers
        .iter()
        .filter(|p| requirement.version_range.satisfies(&p.version))
        .collect();
    let chosen = satisfying
        .iter()
        .find(|p| p.is_loaded())
        .or_else(|| satisfying.first())
        .map(|p| Arc::clone(p));

    let decision = match chosen {
        Some(provider) => {
            debug!(
                "{} reuses {}@{} for range {}",
                container_id, requirement.name, provider.version, requirement.version_range
            );
            ProviderDecision::ReuseExisting(provider)
        }
        None => {
            let provider = entry.register(requirement, container_id, thunk);
            debug!(
                "No provider of {} satisfies {}, registered {} from {}",
                requirement.name, requirement.version_range, provider.version, container_id
            );
            ProviderDecision::RegisterNew(provider)
        }
    };

    if requirement.singleton {
        entry.singleton = Some(Arc::clone(decision.provider()));
    }

    Negotiation {
        decision,
        shadowing: None,
    }
}
