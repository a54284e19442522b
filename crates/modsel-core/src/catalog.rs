use std::collections::{BTreeSet, HashMap};

use modsel_registry::{ModuleId, ModuleVersion};

/// Everything known about one module during a selection session.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    id: ModuleId,
    latest_local: Option<ModuleVersion>,
    online: Option<ModuleVersion>,
    resolved: Option<ModuleVersion>,
    explicit: bool,
    valid_to_select: bool,
}

impl CatalogEntry {
    fn new(id: ModuleId) -> Self {
        Self {
            id,
            latest_local: None,
            online: None,
            resolved: None,
            explicit: false,
            valid_to_select: true,
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Most recent version installed on disk.
    pub fn latest_local(&self) -> Option<&ModuleVersion> {
        self.latest_local.as_ref()
    }

    /// Latest version advertised by the remote catalog.
    pub fn online(&self) -> Option<&ModuleVersion> {
        self.online.as_ref()
    }

    /// Version chosen by the last successful resolution.
    pub fn resolved(&self) -> Option<&ModuleVersion> {
        self.resolved.as_ref()
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn is_valid_to_select(&self) -> bool {
        self.valid_to_select
    }

    /// Descriptor to show for this entry: resolved, then local, then online.
    pub fn metadata(&self) -> Option<&ModuleVersion> {
        self.resolved
            .as_ref()
            .or(self.latest_local.as_ref())
            .or(self.online.as_ref())
    }

    /// Name the entry is listed and ordered under.
    pub fn display_name(&self) -> &str {
        self.sort_name()
    }

    pub fn is_present(&self) -> bool {
        self.latest_local.is_some()
    }

    pub fn is_selected(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn can_download(&self) -> bool {
        !self.is_present()
    }

    pub fn can_update(&self) -> bool {
        match (&self.latest_local, &self.online) {
            (Some(local), Some(online)) => online.is_newer_than(local),
            _ => false,
        }
    }

    /// Key the catalog order is maintained by. Only changes through upserts.
    fn sort_name(&self) -> &str {
        self.latest_local
            .as_ref()
            .or(self.online.as_ref())
            .map(|module| module.display_name.as_str())
            .unwrap_or_else(|| self.id.as_str())
    }

    pub(crate) fn set_explicit(&mut self, explicit: bool) {
        self.explicit = explicit;
    }

    pub(crate) fn set_valid_to_select(&mut self, valid: bool) {
        self.valid_to_select = valid;
    }

    pub(crate) fn set_resolved(&mut self, resolved: Option<ModuleVersion>) {
        self.resolved = resolved;
    }
}

/// What an upsert did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was created.
    Inserted,
    /// An existing entry took the new descriptor.
    Updated,
    /// The descriptor was not newer than what the entry already had.
    Unchanged,
    /// The module is on the exclusion list.
    Excluded,
}

/// Modules never taken from the remote list.
pub fn default_exclusions() -> BTreeSet<ModuleId> {
    ["engine", "engine-test"]
        .into_iter()
        .map(ModuleId::from)
        .collect()
}

/// All catalog entries, plus their order by display name.
///
/// `order` holds exactly the keys of `entries`, sorted by case-sensitive
/// display name; equal names keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<ModuleId, CatalogEntry>,
    order: Vec<ModuleId>,
    excluded: BTreeSet<ModuleId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exclusions(excluded: impl IntoIterator<Item = ModuleId>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn get(&self, id: &ModuleId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ModuleId) -> Option<&mut CatalogEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_excluded(&self, id: &ModuleId) -> bool {
        self.excluded.contains(id)
    }

    /// Ids in display order.
    pub fn ids(&self) -> &[ModuleId] {
        &self.order
    }

    /// Entries in display order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut CatalogEntry> {
        self.entries.values_mut()
    }

    /// Record a locally installed version, creating the entry if needed.
    pub fn upsert_local(&mut self, module: ModuleVersion) -> MergeOutcome {
        let id = module.id.clone();
        match self.entries.get_mut(&id) {
            Some(entry) => {
                if entry.latest_local.as_ref() == Some(&module) {
                    return MergeOutcome::Unchanged;
                }
                let before = entry.sort_name().to_string();
                entry.latest_local = Some(module);
                if entry.sort_name() != before {
                    self.reposition(&id);
                }
                MergeOutcome::Updated
            }
            None => {
                let mut entry = CatalogEntry::new(id);
                entry.latest_local = Some(module);
                self.insert_sorted(entry);
                MergeOutcome::Inserted
            }
        }
    }

    /// Record a version advertised remotely. Only newer versions replace the
    /// current online descriptor. Entries created here start out not valid to
    /// select, since nothing remote-only can be resolved.
    pub fn upsert_remote(&mut self, module: ModuleVersion) -> MergeOutcome {
        if self.is_excluded(&module.id) {
            return MergeOutcome::Excluded;
        }
        let id = module.id.clone();
        match self.entries.get_mut(&id) {
            Some(entry) => {
                let newer = entry
                    .online
                    .as_ref()
                    .map(|online| module.is_newer_than(online))
                    .unwrap_or(true);
                if !newer {
                    return MergeOutcome::Unchanged;
                }
                let before = entry.sort_name().to_string();
                entry.online = Some(module);
                if entry.sort_name() != before {
                    self.reposition(&id);
                }
                MergeOutcome::Updated
            }
            None => {
                let mut entry = CatalogEntry::new(id);
                entry.online = Some(module);
                entry.valid_to_select = false;
                self.insert_sorted(entry);
                MergeOutcome::Inserted
            }
        }
    }

    fn insertion_point(&self, name: &str) -> usize {
        let entries = &self.entries;
        self.order.partition_point(|other| {
            entries
                .get(other)
                .map(|entry| entry.sort_name() <= name)
                .unwrap_or(true)
        })
    }

    fn insert_sorted(&mut self, entry: CatalogEntry) {
        let position = self.insertion_point(entry.sort_name());
        self.order.insert(position, entry.id.clone());
        self.entries.insert(entry.id.clone(), entry);
    }

    fn reposition(&mut self, id: &ModuleId) {
        if let Some(current) = self.order.iter().position(|other| other == id) {
            let moved = self.order.remove(current);
            let name = match self.entries.get(id) {
                Some(entry) => entry.sort_name().to_string(),
                None => return,
            };
            let position = self.insertion_point(&name);
            self.order.insert(position, moved);
        }
    }
}
