use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{parse_manifest, ModuleOrigin, ModuleRegistry, ModuleVersion};

/// File names a module manifest may use, in lookup order.
pub const MANIFEST_NAMES: &[&str] = &["module.txt", "module.json"];

const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("manifest is missing `{0}`")]
    MissingField(&'static str),
    #[error("invalid version `{value}`: {source}")]
    Version {
        value: String,
        #[source]
        source: semver::Error,
    },
    #[error("no module manifest found in {}", .0.display())]
    NoManifest(PathBuf),
}

/// Turns a module artifact on disk into its version descriptor.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModuleVersion, LoadError>;
}

/// Reads `module.txt` from module directories, `.jar`/`.zip` archives, or a
/// bare manifest file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestLoader;

impl ModuleLoader for ManifestLoader {
    fn load(&self, path: &Path) -> Result<ModuleVersion, LoadError> {
        let raw = if path.is_dir() {
            find_directory_manifest(path)?
        } else if is_archive(path) {
            find_archive_manifest(path)?
        } else {
            Some(fs::read_to_string(path)?)
        };
        let raw = raw.ok_or_else(|| LoadError::NoManifest(path.to_path_buf()))?;
        parse_manifest(&raw)
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn find_directory_manifest(dir: &Path) -> Result<Option<String>, std::io::Error> {
    for name in MANIFEST_NAMES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return fs::read_to_string(candidate).map(Some);
        }
    }
    Ok(None)
}

fn find_archive_manifest(path: &Path) -> Result<Option<String>, LoadError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    for name in MANIFEST_NAMES {
        match archive.by_name(name) {
            Ok(mut entry) => {
                let mut raw = String::new();
                entry.read_to_string(&mut raw)?;
                return Ok(Some(raw));
            }
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(None)
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub roots: Vec<PathBuf>,
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: default_module_dir().into_iter().collect(),
            max_depth: 1,
        }
    }
}

/// Per-user directory downloaded modules are installed into.
pub fn default_module_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("Modsel").join("modules"))
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub modules: Vec<(ModuleVersion, PathBuf)>,
    pub failures: Vec<(PathBuf, LoadError)>,
}

impl ScanReport {
    /// Add every discovered module to `registry`, returning how many were new.
    pub fn register_into(self, registry: &mut ModuleRegistry) -> usize {
        self.modules
            .into_iter()
            .filter(|(module, path)| {
                registry.add(module.clone(), ModuleOrigin::Installed(path.clone()))
            })
            .count()
    }
}

/// Walk the configured roots and load every module candidate found.
///
/// Candidates that fail to load are collected in [`ScanReport::failures`]
/// rather than aborting the scan.
pub fn scan_modules<L: ModuleLoader + ?Sized>(config: &ScanConfig, loader: &L) -> ScanReport {
    let mut report = ScanReport::default();

    for root in &config.roots {
        if !root.exists() {
            continue;
        }
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(config.max_depth)
            .sort_by_file_name()
            .into_iter();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(io) = err.io_error() {
                        tracing::debug!("skipping entry while scanning {}: {}", root.display(), io);
                    }
                    continue;
                }
            };
            let path = entry.path();
            if !is_candidate(path) {
                continue;
            }
            match loader.load(path) {
                Ok(module) => report.modules.push((module, path.to_path_buf())),
                Err(err) => {
                    tracing::warn!("could not load module at {}: {}", path.display(), err);
                    report.failures.push((path.to_path_buf(), err));
                }
            }
        }
    }

    report
}

fn is_candidate(path: &Path) -> bool {
    if path.is_file() {
        is_archive(path)
    } else if path.is_dir() {
        MANIFEST_NAMES.iter().any(|name| path.join(name).is_file())
    } else {
        false
    }
}
