use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Result};

use modsel_registry::{scan_modules, ManifestLoader, ModuleRegistry, ScanConfig, Version};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directories searched for installed modules, in addition to the default.
    pub module_dirs: Vec<PathBuf>,
    /// Skip the per-user module directory.
    pub skip_default_dir: bool,
    /// Version the built-in modules report.
    pub engine_version: Version,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            module_dirs: Vec::new(),
            skip_default_dir: false,
            engine_version: Version::new(0, 1, 0),
        }
    }
}

/// Build the local registry: built-ins plus everything found on disk.
pub fn load_registry(options: &ScanOptions) -> Result<ModuleRegistry> {
    let mut config = ScanConfig::default();
    if options.skip_default_dir {
        config.roots.clear();
    }
    let mut seen: HashSet<PathBuf> = config.roots.iter().cloned().collect();
    for dir in &options.module_dirs {
        if !dir.is_dir() {
            bail!("module directory {} does not exist", dir.display());
        }
        if seen.insert(dir.clone()) {
            config.roots.push(dir.clone());
        }
    }

    let report = scan_modules(&config, &ManifestLoader);
    let failed = report.failures.len();
    let mut registry = ModuleRegistry::with_builtins(&options.engine_version);
    let added = report.register_into(&mut registry);
    tracing::info!(added, failed, roots = config.roots.len(), "scanned module directories");
    Ok(registry)
}
