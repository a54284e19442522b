use std::fmt;

use crate::CatalogEntry;

/// How an entry presents itself to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleStatus {
    /// The protected gameplay module.
    ActiveGameplay,
    /// Explicitly activated and resolved.
    Activated,
    /// Resolved only because something else needs it.
    Dependency,
    /// Known remotely but not installed.
    NotPresent,
    /// Installed and would resolve if activated.
    Available,
    /// Installed but activating it would break resolution.
    Incompatible,
}

impl ModuleStatus {
    pub fn of(entry: &CatalogEntry, protected: bool) -> Self {
        if protected {
            ModuleStatus::ActiveGameplay
        } else if entry.is_selected() && entry.is_explicit() {
            ModuleStatus::Activated
        } else if entry.is_selected() {
            ModuleStatus::Dependency
        } else if !entry.is_present() {
            ModuleStatus::NotPresent
        } else if entry.is_valid_to_select() {
            ModuleStatus::Available
        } else {
            ModuleStatus::Incompatible
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModuleStatus::ActiveGameplay => "Active gameplay",
            ModuleStatus::Activated => "Activated",
            ModuleStatus::Dependency => "Dependency",
            ModuleStatus::NotPresent => "Not present",
            ModuleStatus::Available => "Available",
            ModuleStatus::Incompatible => "Incompatible or unresolved dependencies",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transfer the user can start for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    Download,
    Update,
}

impl DownloadAction {
    pub fn for_entry(entry: &CatalogEntry) -> Option<Self> {
        if entry.can_download() {
            Some(DownloadAction::Download)
        } else if entry.can_update() {
            Some(DownloadAction::Update)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DownloadAction::Download => "Download",
            DownloadAction::Update => "Update",
        }
    }
}

#[cfg(test)]
mod tests {
    use modsel_registry::{ModuleId, ModuleVersion, Version};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Catalog;

    #[test]
    fn remote_only_entries_are_not_present_and_downloadable() {
        let mut catalog = Catalog::new();
        catalog.upsert_remote(ModuleVersion::new("Remote", Version::new(1, 0, 0)));
        let entry = catalog.get(&ModuleId::new("Remote")).unwrap();
        assert_eq!(ModuleStatus::of(entry, false), ModuleStatus::NotPresent);
        assert_eq!(DownloadAction::for_entry(entry), Some(DownloadAction::Download));
    }

    #[test]
    fn installed_entries_offer_updates_only_when_newer_online() {
        let mut catalog = Catalog::new();
        catalog.upsert_local(ModuleVersion::new("Local", Version::new(1, 0, 0)));
        let id = ModuleId::new("Local");
        let entry = catalog.get(&id).unwrap();
        assert_eq!(ModuleStatus::of(entry, false), ModuleStatus::Available);
        assert_eq!(ModuleStatus::of(entry, true).to_string(), "Active gameplay");
        assert_eq!(DownloadAction::for_entry(entry), None);

        catalog.upsert_remote(ModuleVersion::new("Local", Version::new(1, 1, 0)));
        let entry = catalog.get(&id).unwrap();
        assert_eq!(DownloadAction::for_entry(entry), Some(DownloadAction::Update));
    }
}
