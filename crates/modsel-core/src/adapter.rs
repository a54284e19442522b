use std::collections::BTreeSet;
use std::fmt;

use modsel_registry::{DependencyResolver, ModuleId, ModuleRegistry, Resolution};

/// The two questions the selection logic asks of a dependency resolver.
pub struct ResolverAdapter {
    resolver: Box<dyn DependencyResolver>,
}

impl fmt::Debug for ResolverAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverAdapter").finish_non_exhaustive()
    }
}

impl ResolverAdapter {
    pub fn new(resolver: impl DependencyResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Resolve exactly the explicit modules and what they require.
    pub fn resolve_set(&self, registry: &ModuleRegistry, explicit: &BTreeSet<ModuleId>) -> Resolution {
        self.resolver.resolve(registry, explicit)
    }

    /// Would `candidate` still resolve alongside `baseline`?
    pub fn resolve_with_candidate(
        &self,
        registry: &ModuleRegistry,
        candidate: &ModuleId,
        baseline: &BTreeSet<ModuleId>,
    ) -> Resolution {
        let mut roots = baseline.clone();
        roots.insert(candidate.clone());
        self.resolver.resolve(registry, &roots)
    }
}
