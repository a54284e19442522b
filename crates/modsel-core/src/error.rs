use modsel_registry::{LoadError, ModuleId, Version};
use thiserror::Error;

/// Errors raised while transferring an artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed module list: {0}")]
    MalformedList(#[from] LoadError),
    #[error("transfer cancelled")]
    Cancelled,
}

/// Errors that abandon a download and leave the catalog untouched.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),
    #[error("module {0} is not available online")]
    NotOnline(ModuleId),
    #[error("module '{id}:{version}' has no download location")]
    NoDownloadLocation { id: ModuleId, version: Version },
    #[error("failed to start download worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("could not download module '{id}:{version}': {source}")]
    Fetch {
        id: ModuleId,
        version: Version,
        #[source]
        source: FetchError,
    },
    #[error("could not load module '{id}:{version}': {source}")]
    Load {
        id: ModuleId,
        version: Version,
        #[source]
        source: LoadError,
    },
    #[error("artifact downloaded for {expected} contains module {found}")]
    UnexpectedModule { expected: ModuleId, found: ModuleId },
    #[error("download of {0} was cancelled")]
    Cancelled(ModuleId),
    #[error("download worker for {0} exited without reporting")]
    WorkerExited(ModuleId),
}
