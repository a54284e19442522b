use std::collections::BTreeSet;
use std::path::PathBuf;

use modsel_registry::{
    default_module_dir, DependencyResolver, ModuleId, ModuleOrigin, ModuleRegistry,
    ModuleSelection, ModuleVersion,
};

use crate::adapter::ResolverAdapter;
use crate::catalog::{default_exclusions, Catalog, CatalogEntry, MergeOutcome};
use crate::download::{discard, DownloadCoordinator, DownloadHandle, DownloadOutcome, DownloadRequest};
use crate::error::InstallError;
use crate::remote::RemoteIngestor;
use crate::status::ModuleStatus;

/// Inputs a selection session starts from.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Module that stays active no matter what.
    pub gameplay_module: Option<ModuleId>,
    pub default_generator_module: Option<ModuleId>,
    /// Modules explicitly activated when the session opens.
    pub initial_selection: BTreeSet<ModuleId>,
    /// Ids never taken from the remote list.
    pub excluded: BTreeSet<ModuleId>,
    /// Where downloaded modules are written.
    pub install_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gameplay_module: None,
            default_generator_module: None,
            initial_selection: BTreeSet::new(),
            excluded: default_exclusions(),
            install_dir: default_module_dir().unwrap_or_else(|| PathBuf::from("modules")),
        }
    }
}

impl SessionConfig {
    pub fn from_selection(selection: &ModuleSelection) -> Self {
        Self {
            gameplay_module: selection.gameplay_module.clone(),
            default_generator_module: selection.default_generator_module.clone(),
            initial_selection: selection.modules.clone(),
            ..Self::default()
        }
    }

    pub fn with_install_dir(mut self, install_dir: impl Into<PathBuf>) -> Self {
        self.install_dir = install_dir.into();
        self
    }
}

/// What a closed session hands back for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Modules the user explicitly activated and that resolved.
    pub explicit: BTreeSet<ModuleId>,
    /// False only when the default generator module is listed but no longer
    /// active. Built-in or unknown generator modules are kept.
    pub default_generator_selected: bool,
}

/// Owns the catalog and keeps selection state consistent with the resolver.
///
/// Every mutation goes through `&mut self`; background work only publishes
/// results which are applied through [`poll_remote`](Self::poll_remote) and
/// [`poll_download`](Self::poll_download).
#[derive(Debug)]
pub struct SelectionSession {
    config: SessionConfig,
    registry: ModuleRegistry,
    catalog: Catalog,
    resolver: ResolverAdapter,
    resolution_ok: bool,
}

impl SelectionSession {
    pub fn open(
        config: SessionConfig,
        registry: ModuleRegistry,
        resolver: impl DependencyResolver + 'static,
    ) -> Self {
        let mut catalog = Catalog::with_exclusions(config.excluded.iter().cloned());
        for registered in registry.latest_installed() {
            catalog.upsert_local(registered.module.clone());
        }
        for id in &config.initial_selection {
            match catalog.get_mut(id) {
                Some(entry) => entry.set_explicit(true),
                None => tracing::debug!(module = %id, "ignoring selection of unknown module"),
            }
        }
        tracing::info!(
            modules = catalog.len(),
            selected = config.initial_selection.len(),
            "opened module selection session"
        );

        let mut session = Self {
            config,
            registry,
            catalog,
            resolver: ResolverAdapter::new(resolver),
            resolution_ok: true,
        };
        session.refresh();
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn entry(&self, id: &ModuleId) -> Option<&CatalogEntry> {
        self.catalog.get(id)
    }

    /// Did the last refresh resolve the explicit set?
    pub fn resolution_succeeded(&self) -> bool {
        self.resolution_ok
    }

    pub fn explicit_ids(&self) -> BTreeSet<ModuleId> {
        self.catalog
            .iter()
            .filter(|entry| entry.is_explicit())
            .map(|entry| entry.id().clone())
            .collect()
    }

    pub fn is_protected(&self, id: &ModuleId) -> bool {
        self.config.gameplay_module.as_ref() == Some(id)
    }

    pub fn status(&self, id: &ModuleId) -> Option<ModuleStatus> {
        self.catalog
            .get(id)
            .map(|entry| ModuleStatus::of(entry, self.is_protected(id)))
    }

    /// Re-resolve the explicit set and recompute every entry's validity.
    pub fn refresh(&mut self) {
        let explicit = self.explicit_ids();
        let resolution = self.resolver.resolve_set(&self.registry, &explicit);

        for entry in self.catalog.entries_mut() {
            entry.set_resolved(None);
        }
        self.resolution_ok = resolution.is_success();
        let mut resolved = 0;
        if resolution.is_success() {
            for module in resolution.into_modules() {
                match self.catalog.get_mut(&module.id) {
                    Some(entry) if entry.is_present() => {
                        entry.set_resolved(Some(module));
                        resolved += 1;
                    }
                    Some(_) => tracing::debug!(
                        module = %module.id,
                        "resolver chose a module that is not installed"
                    ),
                    None => {}
                }
            }
        }
        self.update_validity(&explicit);
        tracing::debug!(
            explicit = explicit.len(),
            resolved,
            success = self.resolution_ok,
            "refreshed module selection"
        );
    }

    /// Recompute validity only, keeping the resolved set as it is.
    pub fn revalidate(&mut self) {
        let explicit = self.explicit_ids();
        self.update_validity(&explicit);
    }

    fn update_validity(&mut self, explicit: &BTreeSet<ModuleId>) {
        let Self {
            catalog,
            registry,
            resolver,
            ..
        } = self;
        for entry in catalog.entries_mut() {
            if entry.is_selected() {
                entry.set_valid_to_select(true);
                continue;
            }
            let valid = resolver
                .resolve_with_candidate(registry, entry.id(), explicit)
                .is_success();
            entry.set_valid_to_select(valid);
        }
    }

    /// Activate a module. Returns false when nothing changed.
    pub fn select(&mut self, id: &ModuleId) -> bool {
        let Some(entry) = self.catalog.get_mut(id) else {
            return false;
        };
        if !entry.is_valid_to_select() || entry.is_explicit() {
            return false;
        }
        entry.set_explicit(true);
        self.refresh();
        true
    }

    /// Deactivate an explicitly activated module. The gameplay module is
    /// never deactivated.
    pub fn deselect(&mut self, id: &ModuleId) -> bool {
        if self.is_protected(id) {
            return false;
        }
        let Some(entry) = self.catalog.get_mut(id) else {
            return false;
        };
        if !entry.is_explicit() {
            return false;
        }
        entry.set_explicit(false);
        self.refresh();
        true
    }

    /// Deactivate everything except the gameplay module, with one refresh.
    /// Returns how many modules were deactivated.
    pub fn disable_all(&mut self) -> usize {
        let protected = self.config.gameplay_module.clone();
        let mut cleared = 0;
        for entry in self.catalog.entries_mut() {
            if entry.is_explicit() && protected.as_ref() != Some(entry.id()) {
                entry.set_explicit(false);
                cleared += 1;
            }
        }
        if cleared > 0 {
            self.refresh();
        }
        cleared
    }

    pub fn can_toggle(&self, id: &ModuleId) -> bool {
        match self.catalog.get(id) {
            Some(entry) => {
                entry.is_present()
                    && !self.is_protected(id)
                    && (entry.is_selected() || entry.is_valid_to_select())
            }
            None => false,
        }
    }

    /// Deselect an activated module, otherwise try to select it.
    pub fn toggle(&mut self, id: &ModuleId) -> bool {
        let Some(entry) = self.catalog.get(id) else {
            return false;
        };
        if entry.is_selected() && entry.is_explicit() {
            self.deselect(id)
        } else {
            self.select(id)
        }
    }

    pub fn merge_remote(&mut self, module: ModuleVersion) -> MergeOutcome {
        self.catalog.upsert_remote(module)
    }

    /// Merge whatever the remote feed produced since the last poll.
    pub fn poll_remote(&mut self, ingestor: &mut RemoteIngestor) -> usize {
        let inserted = ingestor.poll(&mut self.catalog);
        if inserted > 0 {
            tracing::debug!(inserted, "merged remote modules");
        }
        inserted
    }

    /// Start downloading the online version of `id`.
    pub fn start_download(
        &self,
        id: &ModuleId,
        coordinator: &DownloadCoordinator,
    ) -> Result<DownloadHandle, InstallError> {
        let entry = self
            .catalog
            .get(id)
            .ok_or_else(|| InstallError::UnknownModule(id.clone()))?;
        let online = entry
            .online()
            .ok_or_else(|| InstallError::NotOnline(id.clone()))?;
        let request = DownloadRequest::for_online(online, &self.config.install_dir)?;
        coordinator.start(request)
    }

    /// Install a finished download, or report why it failed.
    pub fn apply_download(&mut self, outcome: DownloadOutcome) -> Result<ModuleId, InstallError> {
        let installed = outcome.result?;
        Ok(self.install(installed.module, installed.path))
    }

    /// Apply the download's outcome if it has arrived.
    ///
    /// An outcome that arrives after the handle was cancelled is discarded.
    pub fn poll_download(
        &mut self,
        handle: &mut DownloadHandle,
    ) -> Option<Result<ModuleId, InstallError>> {
        let outcome = handle.try_outcome()?;
        if handle.is_cancelled() {
            if let Ok(installed) = &outcome.result {
                discard(&installed.path);
            }
            return Some(Err(InstallError::Cancelled(outcome.id)));
        }
        Some(self.apply_download(outcome))
    }

    /// Record a module that is now on disk and recheck what can be selected.
    pub fn install(&mut self, module: ModuleVersion, path: PathBuf) -> ModuleId {
        let id = module.id.clone();
        tracing::info!(module = %id, version = %module.version, path = %path.display(), "installed module");
        self.registry
            .add(module.clone(), ModuleOrigin::Installed(path));
        self.catalog.upsert_local(module);
        self.revalidate();
        id
    }

    /// Finish the session.
    pub fn close(&self) -> SessionOutcome {
        let explicit = self
            .catalog
            .iter()
            .filter(|entry| entry.is_explicit() && entry.is_selected())
            .map(|entry| entry.id().clone())
            .collect();
        // Only a listed module that ended up unselected resets the generator.
        let default_generator_selected = self
            .config
            .default_generator_module
            .as_ref()
            .and_then(|id| self.catalog.get(id))
            .map_or(true, CatalogEntry::is_selected);
        SessionOutcome {
            explicit,
            default_generator_selected,
        }
    }
}

#[cfg(test)]
mod tests {
    use modsel_registry::{Dependency, RegistryResolver, Version};
    use pretty_assertions::assert_eq;

    use super::*;

    fn v(major: u64) -> Version {
        Version::new(major, 0, 0)
    }

    fn installed(registry: &mut ModuleRegistry, module: ModuleVersion) {
        let path = PathBuf::from(format!("/mods/{}.jar", module.id));
        registry.add(module, ModuleOrigin::Installed(path));
    }

    /// A, B depends on A, Broken depends on something missing.
    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::with_builtins(&v(5));
        installed(&mut registry, ModuleVersion::new("A", v(1)).with_display_name("Alpha"));
        installed(
            &mut registry,
            ModuleVersion::new("B", v(1))
                .with_display_name("Bravo")
                .with_dependency(Dependency::new("A", v(1))),
        );
        installed(
            &mut registry,
            ModuleVersion::new("Broken", v(1)).with_dependency(Dependency::new("Missing", v(1))),
        );
        registry
    }

    fn session(config: SessionConfig) -> SelectionSession {
        SelectionSession::open(config, registry(), RegistryResolver::default())
    }

    fn id(name: &str) -> ModuleId {
        ModuleId::new(name)
    }

    fn selected(session: &SelectionSession) -> Vec<String> {
        session
            .catalog()
            .iter()
            .filter(|entry| entry.is_selected())
            .map(|entry| entry.id().to_string())
            .collect()
    }

    fn assert_consistent(session: &SelectionSession) {
        let explicit = session.explicit_ids();
        for entry in session.catalog().iter() {
            if entry.is_selected() {
                assert!(entry.is_present(), "{} selected but absent", entry.id());
                assert!(entry.is_valid_to_select());
            } else {
                let probe = session
                    .resolver
                    .resolve_with_candidate(session.registry(), entry.id(), &explicit);
                assert_eq!(entry.is_valid_to_select(), probe.is_success(), "{}", entry.id());
            }
        }
    }

    #[test]
    fn open_populates_catalog_without_builtins() {
        let session = session(SessionConfig::default());
        let ids: Vec<_> = session.catalog().ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["A", "B", "Broken"]);
        assert!(selected(&session).is_empty());
        assert!(!session.entry(&id("Broken")).unwrap().is_valid_to_select());
        assert_consistent(&session);
    }

    #[test]
    fn selecting_pulls_in_dependencies() {
        let mut session = session(SessionConfig::default());
        assert!(session.select(&id("B")));
        assert_eq!(selected(&session), vec!["A", "B"]);
        assert!(!session.entry(&id("A")).unwrap().is_explicit());
        assert_eq!(session.status(&id("A")), Some(ModuleStatus::Dependency));
        assert_eq!(session.status(&id("B")), Some(ModuleStatus::Activated));
        assert_consistent(&session);
    }

    #[test]
    fn select_is_idempotent_and_rejects_invalid() {
        let mut session = session(SessionConfig::default());
        assert!(session.select(&id("A")));
        assert!(!session.select(&id("A")));
        assert!(!session.select(&id("Broken")));
        assert!(!session.select(&id("Nope")));
        assert_eq!(selected(&session), vec!["A"]);
    }

    #[test]
    fn deselecting_the_only_root_clears_selection() {
        let config = SessionConfig {
            initial_selection: [id("A")].into_iter().collect(),
            ..SessionConfig::default()
        };
        let mut session = session(config);
        assert_eq!(selected(&session), vec!["A"]);
        assert!(!session.deselect(&id("B")));
        assert!(session.deselect(&id("A")));
        assert!(selected(&session).is_empty());
        assert_consistent(&session);
    }

    #[test]
    fn deselected_module_stays_as_dependency() {
        let config = SessionConfig {
            initial_selection: [id("A"), id("B")].into_iter().collect(),
            ..SessionConfig::default()
        };
        let mut session = session(config);
        assert!(session.deselect(&id("A")));
        assert_eq!(selected(&session), vec!["A", "B"]);
        assert_eq!(session.status(&id("A")), Some(ModuleStatus::Dependency));
        assert!(!session.deselect(&id("A")));
        assert_consistent(&session);
    }

    #[test]
    fn protected_module_cannot_be_deselected() {
        let config = SessionConfig {
            gameplay_module: Some(id("A")),
            initial_selection: [id("A"), id("B")].into_iter().collect(),
            ..SessionConfig::default()
        };
        let mut session = session(config);
        assert!(!session.deselect(&id("A")));
        assert!(session.entry(&id("A")).unwrap().is_explicit());
        assert!(!session.can_toggle(&id("A")));
        assert_eq!(session.status(&id("A")), Some(ModuleStatus::ActiveGameplay));

        assert_eq!(session.disable_all(), 1);
        assert_eq!(selected(&session), vec!["A"]);
        assert!(session.entry(&id("A")).unwrap().is_explicit());
        assert_consistent(&session);
    }

    #[test]
    fn toggle_flips_selection() {
        let mut session = session(SessionConfig::default());
        assert!(session.can_toggle(&id("B")));
        assert!(session.toggle(&id("B")));
        assert_eq!(selected(&session), vec!["A", "B"]);
        assert!(session.toggle(&id("B")));
        assert!(selected(&session).is_empty());
        assert!(!session.can_toggle(&id("Broken")));
        assert!(!session.toggle(&id("Broken")));
    }

    #[test]
    fn close_reports_explicit_and_generator() {
        let config = SessionConfig {
            default_generator_module: Some(id("A")),
            initial_selection: [id("B"), id("Unknown")].into_iter().collect(),
            ..SessionConfig::default()
        };
        let mut session = session(config);
        let outcome = session.close();
        assert_eq!(outcome.explicit, [id("B")].into_iter().collect());
        assert!(outcome.default_generator_selected);

        session.disable_all();
        let outcome = session.close();
        assert!(outcome.explicit.is_empty());
        assert!(!outcome.default_generator_selected);
    }

    #[test]
    fn remote_modules_are_listed_but_not_selectable() {
        let mut session = session(SessionConfig::default());
        assert_eq!(
            session.merge_remote(ModuleVersion::new("C", v(2)).with_display_name("Charlie")),
            MergeOutcome::Inserted
        );
        let names: Vec<_> = session.catalog().iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Broken", "Charlie"]);
        let entry = session.entry(&id("C")).unwrap();
        assert!(entry.can_download());
        assert_eq!(session.status(&id("C")), Some(ModuleStatus::NotPresent));
        assert!(!session.select(&id("C")));
        assert_eq!(session.merge_remote(ModuleVersion::new("engine", v(9))), MergeOutcome::Excluded);
    }

    #[test]
    fn install_makes_remote_module_selectable() {
        let mut session = session(SessionConfig::default());
        session.merge_remote(ModuleVersion::new("C", v(2)).with_dependency(Dependency::new("A", v(1))));
        let installed = session.install(
            ModuleVersion::new("C", v(2)).with_dependency(Dependency::new("A", v(1))),
            PathBuf::from("/mods/C-2.0.0.jar"),
        );
        assert_eq!(installed, id("C"));
        let entry = session.entry(&id("C")).unwrap();
        assert_eq!(entry.latest_local().unwrap().version, v(2));
        assert!(!entry.can_update());
        assert!(entry.is_valid_to_select());
        assert!(session.registry().contains(&id("C")));
        assert!(session.select(&id("C")));
        assert_eq!(selected(&session), vec!["A", "C"]);
        assert_consistent(&session);
    }

    struct NoFetch;

    impl crate::ArtifactFetcher for NoFetch {
        fn fetch(
            &self,
            url: &str,
            _destination: &std::path::Path,
            _on_progress: &mut dyn FnMut(f32),
            _cancel: &crate::CancelToken,
        ) -> Result<PathBuf, crate::FetchError> {
            panic!("unexpected fetch of {url}");
        }
    }

    #[test]
    fn download_requires_online_location() {
        let session = session(SessionConfig::default());
        let coordinator = DownloadCoordinator::new(NoFetch, modsel_registry::ManifestLoader);
        assert!(matches!(
            session.start_download(&id("A"), &coordinator),
            Err(InstallError::NotOnline(_))
        ));
        assert!(matches!(
            session.start_download(&id("Zed"), &coordinator),
            Err(InstallError::UnknownModule(_))
        ));
    }

    #[test]
    fn unlisted_generator_module_is_kept() {
        let config = SessionConfig {
            default_generator_module: Some(modsel_registry::engine_id()),
            ..SessionConfig::default()
        };
        let opened = session(config);
        assert!(opened.entry(&modsel_registry::engine_id()).is_none());
        assert!(opened.close().default_generator_selected);

        let config = SessionConfig {
            default_generator_module: Some(id("NotInstalled")),
            ..SessionConfig::default()
        };
        assert!(session(config).close().default_generator_selected);
    }

    #[test]
    fn listing_name_ignores_older_resolved_version() {
        let mut registry = ModuleRegistry::new();
        installed(&mut registry, ModuleVersion::new("A", v(1)).with_display_name("Aardvark"));
        installed(&mut registry, ModuleVersion::new("A", v(2)).with_display_name("Zulu"));
        installed(
            &mut registry,
            ModuleVersion::new("B", v(1))
                .with_display_name("Bravo")
                .with_dependency(Dependency::new("A", v(1)).with_max_version(v(2))),
        );
        let mut session =
            SelectionSession::open(SessionConfig::default(), registry, RegistryResolver::default());
        assert!(session.select(&id("B")));

        let a = session.entry(&id("A")).unwrap();
        assert_eq!(a.resolved().unwrap().version, v(1));
        assert_eq!(a.metadata().unwrap().display_name, "Aardvark");
        assert_eq!(a.display_name(), "Zulu");
        let names: Vec<_> = session.catalog().iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["Bravo", "Zulu"]);
    }

    /// Writes a bare manifest for whatever module is requested.
    struct ManifestFetcher;

    impl crate::ArtifactFetcher for ManifestFetcher {
        fn fetch(
            &self,
            _url: &str,
            destination: &std::path::Path,
            _on_progress: &mut dyn FnMut(f32),
            _cancel: &crate::CancelToken,
        ) -> Result<PathBuf, crate::FetchError> {
            std::fs::write(destination, r#"{ "id": "C", "version": "2.0.0" }"#)?;
            Ok(destination.to_path_buf())
        }
    }

    /// Holds the worker inside `load` until the test lets it go.
    struct GatedLoader {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl modsel_registry::ModuleLoader for GatedLoader {
        fn load(
            &self,
            path: &std::path::Path,
        ) -> Result<ModuleVersion, modsel_registry::LoadError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            modsel_registry::parse_manifest(&std::fs::read_to_string(path)?)
        }
    }

    #[test]
    fn cancelling_after_the_transfer_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(SessionConfig::default().with_install_dir(dir.path()));
        session.merge_remote(
            ModuleVersion::new("C", v(2)).with_download_url("https://modules.example/C-2.0.0.jar"),
        );
        let registry_size = session.registry().len();

        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let coordinator = DownloadCoordinator::new(
            ManifestFetcher,
            GatedLoader {
                entered: entered_tx,
                release: release_rx,
            },
        );
        let mut handle = session.start_download(&id("C"), &coordinator).unwrap();
        entered_rx.recv().unwrap();
        handle.cancel();
        release_tx.send(()).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let result = loop {
            if let Some(result) = session.poll_download(&mut handle) {
                break result;
            }
            assert!(std::time::Instant::now() < deadline, "download never reported");
            std::thread::sleep(std::time::Duration::from_millis(2));
        };

        assert!(matches!(result, Err(InstallError::Cancelled(_))));
        assert!(!dir.path().join("C-2.0.0.jar").exists());
        let c = session.entry(&id("C")).unwrap();
        assert!(!c.is_present());
        assert!(c.can_download());
        assert!(!session.registry().contains(&id("C")));
        assert_eq!(session.registry().len(), registry_size);
    }
}
