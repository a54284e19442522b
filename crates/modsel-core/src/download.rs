use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, SendError, TryRecvError};
use modsel_registry::{ModuleId, ModuleLoader, ModuleVersion, Version};

use crate::error::{FetchError, InstallError};

/// Shared flag a caller flips to abandon a running transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Moves a remote artifact to a local path.
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `url` into `destination`, reporting progress as a fraction in
    /// `0.0..=1.0`. Implementations check `cancel` regularly and must not leave
    /// a partial file at `destination`.
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<PathBuf, FetchError>;
}

/// File name an online module is stored under once downloaded.
pub fn artifact_file_name(module: &ModuleVersion) -> String {
    format!("{}-{}.jar", module.id, module.version)
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// The online descriptor being installed.
    pub module: ModuleVersion,
    pub url: String,
    pub destination: PathBuf,
}

impl DownloadRequest {
    /// Build a request for an online descriptor, installing into `install_dir`.
    pub fn for_online(module: &ModuleVersion, install_dir: &Path) -> Result<Self, InstallError> {
        let url = module
            .download_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| InstallError::NoDownloadLocation {
                id: module.id.clone(),
                version: module.version.clone(),
            })?;
        Ok(Self {
            module: module.clone(),
            url,
            destination: install_dir.join(artifact_file_name(module)),
        })
    }
}

/// A downloaded and successfully loaded module, ready to be installed.
#[derive(Debug, Clone)]
pub struct InstalledArtifact {
    pub module: ModuleVersion,
    pub path: PathBuf,
}

/// Result of one download, handed back to the session owner.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub id: ModuleId,
    pub version: Version,
    pub result: Result<InstalledArtifact, InstallError>,
}

/// Runs fetch-then-load jobs on background threads.
#[derive(Clone)]
pub struct DownloadCoordinator {
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: Arc<dyn ModuleLoader>,
}

impl fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCoordinator").finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    pub fn new(
        fetcher: impl ArtifactFetcher + 'static,
        loader: impl ModuleLoader + 'static,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            loader: Arc::new(loader),
        }
    }

    pub fn start(&self, request: DownloadRequest) -> Result<DownloadHandle, InstallError> {
        let id = request.module.id.clone();
        let version = request.module.version.clone();
        let progress = Arc::new(AtomicU32::new(0f32.to_bits()));
        let cancel = CancelToken::new();
        let (tx, rx) = bounded(1);

        let fetcher = Arc::clone(&self.fetcher);
        let loader = Arc::clone(&self.loader);
        let worker_progress = Arc::clone(&progress);
        let worker_cancel = cancel.clone();
        tracing::info!(module = %id, %version, url = %request.url, "starting module download");
        thread::Builder::new()
            .name(format!("modsel-download-{id}"))
            .spawn(move || {
                let result = run_download(
                    fetcher.as_ref(),
                    loader.as_ref(),
                    &request,
                    &worker_progress,
                    &worker_cancel,
                );
                match &result {
                    Ok(installed) => tracing::info!(
                        module = %installed.module.id,
                        path = %installed.path.display(),
                        "module download finished"
                    ),
                    Err(InstallError::Cancelled(id)) => {
                        tracing::debug!(module = %id, "module download cancelled")
                    }
                    Err(err) => tracing::warn!("{err}"),
                }
                let outcome = DownloadOutcome {
                    id: request.module.id.clone(),
                    version: request.module.version.clone(),
                    result,
                };
                if let Err(SendError(outcome)) = tx.send(outcome) {
                    // The handle is gone, so nobody will install this artifact.
                    if let Ok(installed) = &outcome.result {
                        discard(&installed.path);
                    }
                }
            })
            .map_err(InstallError::Spawn)?;

        Ok(DownloadHandle {
            id,
            version,
            progress,
            cancel,
            outcome: rx,
            finished: false,
        })
    }
}

fn run_download(
    fetcher: &dyn ArtifactFetcher,
    loader: &dyn ModuleLoader,
    request: &DownloadRequest,
    progress: &AtomicU32,
    cancel: &CancelToken,
) -> Result<InstalledArtifact, InstallError> {
    let id = &request.module.id;
    let version = &request.module.version;
    let fetch_error = |source: FetchError| match source {
        FetchError::Cancelled => InstallError::Cancelled(id.clone()),
        source => InstallError::Fetch {
            id: id.clone(),
            version: version.clone(),
            source,
        },
    };

    if let Some(parent) = request.destination.parent() {
        fs::create_dir_all(parent).map_err(|err| fetch_error(err.into()))?;
    }
    let mut report = |fraction: f32| {
        progress.store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    };
    let path = fetcher
        .fetch(&request.url, &request.destination, &mut report, cancel)
        .map_err(fetch_error)?;

    if cancel.is_cancelled() {
        discard(&path);
        return Err(InstallError::Cancelled(id.clone()));
    }
    let module = match loader.load(&path) {
        Ok(module) => module,
        Err(source) => {
            discard(&path);
            return Err(InstallError::Load {
                id: id.clone(),
                version: version.clone(),
                source,
            });
        }
    };
    if module.id != *id {
        discard(&path);
        return Err(InstallError::UnexpectedModule {
            expected: id.clone(),
            found: module.id,
        });
    }
    Ok(InstalledArtifact { module, path })
}

pub(crate) fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), %err, "could not remove discarded artifact");
    }
}

/// Caller side of a running download.
///
/// Dropping the handle cancels the transfer.
#[derive(Debug)]
pub struct DownloadHandle {
    id: ModuleId,
    version: Version,
    progress: Arc<AtomicU32>,
    cancel: CancelToken,
    outcome: Receiver<DownloadOutcome>,
    finished: bool,
}

impl DownloadHandle {
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Fraction of the transfer completed so far.
    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Relaxed))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Take the outcome if the worker has reported. Yields at most once.
    pub fn try_outcome(&mut self) -> Option<DownloadOutcome> {
        if self.finished {
            return None;
        }
        match self.outcome.try_recv() {
            Ok(outcome) => {
                self.finished = true;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Some(self.worker_exited())
            }
        }
    }

    /// Block until the worker reports.
    pub fn wait(&mut self) -> Option<DownloadOutcome> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.outcome.recv().unwrap_or_else(|_| self.worker_exited()))
    }

    fn worker_exited(&self) -> DownloadOutcome {
        DownloadOutcome {
            id: self.id.clone(),
            version: self.version.clone(),
            result: Err(InstallError::WorkerExited(self.id.clone())),
        }
    }
}

impl Drop for DownloadHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}
