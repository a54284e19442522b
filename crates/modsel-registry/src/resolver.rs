use std::collections::{BTreeMap, BTreeSet};

use crate::{Dependency, ModuleId, ModuleRegistry, ModuleVersion, VersionRange};

/// Outcome of a dependency resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    success: bool,
    modules: Vec<ModuleVersion>,
}

impl Resolution {
    pub fn success(modules: Vec<ModuleVersion>) -> Self {
        Self {
            success: true,
            modules,
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Chosen module versions; empty when resolution failed.
    pub fn modules(&self) -> &[ModuleVersion] {
        &self.modules
    }

    pub fn into_modules(self) -> Vec<ModuleVersion> {
        self.modules
    }
}

/// Builds a consistent activation set from a module registry.
pub trait DependencyResolver: Send + Sync {
    /// Resolve `roots` plus every transitive dependency they require, choosing
    /// only versions present in `registry`.
    fn resolve(&self, registry: &ModuleRegistry, roots: &BTreeSet<ModuleId>) -> Resolution;
}

const DEFAULT_MAX_STEPS: usize = 10_000;

/// Depth-first resolver that prefers the latest version of every module and
/// backtracks on conflicts.
///
/// The search gives up after a fixed number of steps and reports failure, so
/// pathological registries cannot stall the caller.
#[derive(Debug, Clone, Copy)]
pub struct RegistryResolver {
    max_steps: usize,
}

impl Default for RegistryResolver {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[derive(Debug, Clone)]
struct Requirement {
    id: ModuleId,
    range: Option<VersionRange>,
}

impl Requirement {
    fn root(id: ModuleId) -> Self {
        Self { id, range: None }
    }

    fn dependency(dep: &Dependency) -> Self {
        Self {
            id: dep.id.clone(),
            range: Some(dep.range()),
        }
    }

    fn accepts(&self, module: &ModuleVersion) -> bool {
        self.range
            .as_ref()
            .map(|range| range.contains(&module.version))
            .unwrap_or(true)
    }
}

/// A module whose version is still open, with the alternatives left to try.
struct Choice {
    id: ModuleId,
    /// Requirements still pending when this choice was opened.
    rest: Vec<Requirement>,
    candidates: Vec<ModuleVersion>,
    next: usize,
}

struct Search<'a> {
    registry: &'a ModuleRegistry,
    chosen: BTreeMap<ModuleId, ModuleVersion>,
    choices: Vec<Choice>,
    steps: usize,
    max_steps: usize,
}

impl RegistryResolver {
    pub fn with_max_steps(max_steps: usize) -> Self {
        Self { max_steps }
    }
}

impl DependencyResolver for RegistryResolver {
    fn resolve(&self, registry: &ModuleRegistry, roots: &BTreeSet<ModuleId>) -> Resolution {
        let mut search = Search {
            registry,
            chosen: BTreeMap::new(),
            choices: Vec::new(),
            steps: 0,
            max_steps: self.max_steps,
        };
        // The stack pops from the back, so push in reverse to visit roots in order.
        let pending: Vec<_> = roots.iter().rev().cloned().map(Requirement::root).collect();
        if search.run(pending) {
            Resolution::success(search.chosen.into_values().collect())
        } else {
            if search.steps > search.max_steps {
                tracing::warn!(
                    roots = roots.len(),
                    "dependency resolution exceeded {} steps",
                    search.max_steps
                );
            }
            Resolution::failure()
        }
    }
}

impl Search<'_> {
    /// Depth-first search driven by an explicit stack of choices, so deep or
    /// wide dependency graphs cost heap rather than call stack.
    fn run(&mut self, mut pending: Vec<Requirement>) -> bool {
        loop {
            self.steps += 1;
            if self.steps > self.max_steps {
                return false;
            }
            let satisfied = match pending.pop() {
                None => {
                    if self.optional_constraints_hold() {
                        return true;
                    }
                    false
                }
                Some(requirement) => match self.chosen.get(&requirement.id) {
                    Some(existing) => requirement.accepts(existing),
                    None => {
                        let candidates = self
                            .registry
                            .versions(&requirement.id)
                            .rev()
                            .filter(|candidate| requirement.accepts(candidate))
                            .cloned()
                            .collect();
                        self.choices.push(Choice {
                            id: requirement.id,
                            rest: std::mem::take(&mut pending),
                            candidates,
                            next: 0,
                        });
                        match self.next_candidate() {
                            Some(next) => {
                                pending = next;
                                continue;
                            }
                            None => return false,
                        }
                    }
                },
            };
            if !satisfied {
                match self.next_candidate() {
                    Some(next) => pending = next,
                    None => return false,
                }
            }
        }
    }

    /// Move to the next untried candidate of the innermost open choice,
    /// unwinding exhausted choices. Returns the requirements to continue with.
    fn next_candidate(&mut self) -> Option<Vec<Requirement>> {
        while let Some(choice) = self.choices.last_mut() {
            self.chosen.remove(&choice.id);
            if let Some(candidate) = choice.candidates.get(choice.next).cloned() {
                choice.next += 1;
                let mut pending = choice.rest.clone();
                pending.extend(
                    candidate
                        .required_dependencies()
                        .map(Requirement::dependency),
                );
                self.chosen.insert(choice.id.clone(), candidate);
                return Some(pending);
            }
            self.choices.pop();
        }
        None
    }

    /// Optional dependencies only constrain modules that ended up in the set
    /// for some other reason.
    fn optional_constraints_hold(&self) -> bool {
        self.chosen.values().all(|module| {
            module
                .dependencies
                .iter()
                .filter(|dep| dep.optional)
                .all(|dep| match self.chosen.get(&dep.id) {
                    Some(chosen) => dep.is_satisfied_by(&chosen.version),
                    None => true,
                })
        })
    }
}
