use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{LoadError, ModuleId};

/// One version of a module together with its display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub id: ModuleId,
    pub version: Version,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Where the remote catalog says this version can be downloaded from.
    #[serde(default)]
    pub download_url: Option<String>,
}

impl ModuleVersion {
    pub fn new(id: impl Into<ModuleId>, version: Version) -> Self {
        let id = id.into();
        Self {
            display_name: id.as_str().to_string(),
            id,
            version,
            description: String::new(),
            dependencies: Vec::new(),
            download_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn is_newer_than(&self, other: &ModuleVersion) -> bool {
        self.version > other.version
    }

    pub fn required_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|dep| !dep.optional)
    }
}

/// A dependency declared by a module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: ModuleId,
    pub min_version: Version,
    /// Exclusive upper bound. When absent the next breaking version applies.
    #[serde(default)]
    pub max_version: Option<Version>,
    #[serde(default)]
    pub optional: bool,
}

impl Dependency {
    pub fn new(id: impl Into<ModuleId>, min_version: Version) -> Self {
        Self {
            id: id.into(),
            min_version,
            max_version: None,
            optional: false,
        }
    }

    pub fn with_max_version(mut self, max_version: Version) -> Self {
        self.max_version = Some(max_version);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn range(&self) -> VersionRange {
        let upper = self
            .max_version
            .clone()
            .unwrap_or_else(|| next_breaking(&self.min_version));
        VersionRange::new(self.min_version.clone(), upper)
    }

    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.range().contains(version)
    }
}

/// Half-open version interval `[lower, upper)`.
///
/// Pre-release suffixes are ignored when testing membership, so a
/// `1.2.0-SNAPSHOT` build satisfies a `1.2.0` lower bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    lower: Version,
    upper: Version,
}

impl VersionRange {
    pub fn new(lower: Version, upper: Version) -> Self {
        Self { lower, upper }
    }

    pub fn lower(&self) -> &Version {
        &self.lower
    }

    pub fn upper(&self) -> &Version {
        &self.upper
    }

    pub fn contains(&self, version: &Version) -> bool {
        let release = Version::new(version.major, version.minor, version.patch);
        release >= self.lower && release < self.upper
    }
}

fn next_breaking(version: &Version) -> Version {
    if version.major == 0 {
        Version::new(0, version.minor + 1, 0)
    } else {
        Version::new(version.major + 1, 0, 0)
    }
}

/// Text that is either plain or keyed by language.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DisplayText {
    Plain(String),
    Translated(BTreeMap<String, String>),
}

impl DisplayText {
    fn into_text(self) -> String {
        match self {
            DisplayText::Plain(text) => text,
            DisplayText::Translated(mut map) => map
                .remove("en")
                .or_else(|| map.into_values().next())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDependency {
    id: String,
    #[serde(default)]
    min_version: Option<String>,
    #[serde(default)]
    max_version: Option<String>,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    id: Option<String>,
    version: Option<String>,
    display_name: Option<DisplayText>,
    description: Option<DisplayText>,
    #[serde(default)]
    dependencies: Vec<ManifestDependency>,
    download_uri: Option<String>,
}

impl ManifestFile {
    fn into_module(self) -> Result<ModuleVersion, LoadError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(LoadError::MissingField("id"))?;
        let version = parse_version(self.version.as_deref().ok_or(LoadError::MissingField("version"))?)?;
        let mut module = ModuleVersion::new(id, version);
        if let Some(name) = self.display_name {
            let name = name.into_text();
            if !name.is_empty() {
                module.display_name = name;
            }
        }
        if let Some(description) = self.description {
            module.description = description.into_text();
        }
        for dep in self.dependencies {
            let min_version = match dep.min_version.as_deref() {
                Some(raw) => parse_version(raw)?,
                None => Version::new(0, 0, 0),
            };
            let max_version = dep.max_version.as_deref().map(parse_version).transpose()?;
            module.dependencies.push(Dependency {
                id: ModuleId::new(dep.id),
                min_version,
                max_version,
                optional: dep.optional,
            });
        }
        module.download_url = self.download_uri;
        Ok(module)
    }
}

fn parse_version(raw: &str) -> Result<Version, LoadError> {
    Version::parse(raw.trim()).map_err(|source| LoadError::Version {
        value: raw.to_string(),
        source,
    })
}

/// Parse a single module manifest (`module.txt`).
pub fn parse_manifest(raw: &str) -> Result<ModuleVersion, LoadError> {
    let manifest: ManifestFile = serde_json::from_str(raw)?;
    manifest.into_module()
}

/// Parse the module list served by a master server.
///
/// Entries that fail to convert are skipped with a debug log; a list that is
/// not a JSON array of manifests is an error.
pub fn parse_module_list(raw: &str) -> Result<Vec<ModuleVersion>, LoadError> {
    let manifests: Vec<ManifestFile> = serde_json::from_str(raw)?;
    let mut modules = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        match manifest.into_module() {
            Ok(module) => modules.push(module),
            Err(err) => tracing::debug!(%err, "skipping malformed remote module entry"),
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_upper_bound_is_next_breaking_version() {
        let dep = Dependency::new("Core", Version::new(1, 2, 0));
        assert!(dep.is_satisfied_by(&Version::new(1, 9, 3)));
        assert!(!dep.is_satisfied_by(&Version::new(2, 0, 0)));
        assert!(!dep.is_satisfied_by(&Version::new(1, 1, 9)));

        let early = Dependency::new("Core", Version::new(0, 3, 1));
        assert!(early.is_satisfied_by(&Version::new(0, 3, 7)));
        assert!(!early.is_satisfied_by(&Version::new(0, 4, 0)));
    }

    #[test]
    fn snapshot_builds_satisfy_their_release_bound() {
        let dep = Dependency::new("Core", Version::new(1, 2, 0));
        assert!(dep.is_satisfied_by(&Version::parse("1.2.0-SNAPSHOT").unwrap()));
    }

    #[test]
    fn manifest_parses_dependencies_and_translated_names() {
        let raw = serde_json::json!({
            "id": "Pathfinding",
            "version": "2.1.0",
            "displayName": { "en": "Pathfinding", "de": "Wegfindung" },
            "description": "A* over the block grid",
            "dependencies": [
                { "id": "Core", "minVersion": "1.0.0" },
                { "id": "Behaviors", "minVersion": "0.2.0", "maxVersion": "0.5.0", "optional": true }
            ],
            "downloadUri": "https://example.org/Pathfinding-2.1.0.jar"
        })
        .to_string();
        let module = parse_manifest(&raw).unwrap();
        assert_eq!(module.id, ModuleId::new("pathfinding"));
        assert_eq!(module.display_name, "Pathfinding");
        assert_eq!(module.dependencies.len(), 2);
        assert_eq!(module.required_dependencies().count(), 1);
        assert_eq!(
            module.dependencies[1].range().upper(),
            &Version::new(0, 5, 0)
        );
        assert_eq!(
            module.download_url.as_deref(),
            Some("https://example.org/Pathfinding-2.1.0.jar")
        );
    }

    #[test]
    fn manifest_without_version_is_rejected() {
        let err = parse_manifest(r#"{ "id": "Broken" }"#).unwrap_err();
        assert!(matches!(err, LoadError::MissingField("version")));
    }

    #[test]
    fn module_list_skips_malformed_entries() {
        let raw = r#"[
            { "id": "A", "version": "1.0.0" },
            { "id": "B", "version": "not-a-version" },
            { "id": "C", "version": "0.1.0", "displayName": "Charlie" }
        ]"#;
        let modules = parse_module_list(raw).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "Charlie"]);
    }
}
