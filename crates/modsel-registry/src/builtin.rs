use semver::Version;

use crate::{ModuleId, ModuleOrigin, ModuleRegistry, ModuleVersion};

struct BuiltinModule {
    id: &'static str,
    name: &'static str,
    description: &'static str,
}

const BUILTIN_MODULES: &[BuiltinModule] = &[BuiltinModule {
    id: "engine",
    name: "Engine",
    description: "Core engine module shipped with the application",
}];

/// Id of the module every other module implicitly builds on.
pub fn engine_id() -> ModuleId {
    ModuleId::new(BUILTIN_MODULES[0].id)
}

/// Modules compiled into the application, all carrying the application version.
pub fn builtin_modules(version: &Version) -> Vec<ModuleVersion> {
    BUILTIN_MODULES
        .iter()
        .map(|builtin| {
            ModuleVersion::new(builtin.id, version.clone())
                .with_display_name(builtin.name)
                .with_description(builtin.description)
        })
        .collect()
}

impl ModuleRegistry {
    /// Registry seeded with the built-in modules.
    pub fn with_builtins(version: &Version) -> Self {
        let mut registry = Self::new();
        for module in builtin_modules(version) {
            registry.add(module, ModuleOrigin::Builtin);
        }
        registry
    }
}
