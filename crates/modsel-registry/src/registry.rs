use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::{ModuleId, ModuleVersion};

/// Where an installed module version came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Shipped inside the application; never listed for selection.
    Builtin,
    /// Loaded from an archive or directory on disk.
    Installed(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModule {
    pub module: ModuleVersion,
    pub origin: ModuleOrigin,
}

impl RegisteredModule {
    pub fn is_builtin(&self) -> bool {
        matches!(self.origin, ModuleOrigin::Builtin)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            ModuleOrigin::Installed(path) => Some(path),
            ModuleOrigin::Builtin => None,
        }
    }
}

/// Every locally available module version, keyed by id then version.
///
/// This is the universe the dependency resolver chooses from.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, BTreeMap<Version, RegisteredModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module version. Returns `false` if that exact version was
    /// already known, in which case the existing record is replaced.
    pub fn add(&mut self, module: ModuleVersion, origin: ModuleOrigin) -> bool {
        let versions = self.modules.entry(module.id.clone()).or_default();
        let version = module.version.clone();
        versions
            .insert(version, RegisteredModule { module, origin })
            .is_none()
    }

    pub fn latest(&self, id: &ModuleId) -> Option<&RegisteredModule> {
        self.modules
            .get(id)
            .and_then(|versions| versions.values().next_back())
    }

    pub fn get(&self, id: &ModuleId, version: &Version) -> Option<&RegisteredModule> {
        self.modules.get(id).and_then(|versions| versions.get(version))
    }

    /// Versions of `id`, oldest first.
    pub fn versions(&self, id: &ModuleId) -> impl DoubleEndedIterator<Item = &ModuleVersion> {
        self.modules
            .get(id)
            .into_iter()
            .flat_map(|versions| versions.values().map(|registered| &registered.module))
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.modules.keys()
    }

    /// Latest version of every module that is not built in.
    pub fn latest_installed(&self) -> impl Iterator<Item = &RegisteredModule> {
        self.modules
            .values()
            .filter_map(|versions| versions.values().next_back())
            .filter(|registered| !registered.is_builtin())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
