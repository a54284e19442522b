//! Selection state for Modsel: the module catalog, the session that keeps it
//! consistent with dependency resolution, and the background collaborators
//! feeding it remote listings and downloads.

mod adapter;
mod catalog;
mod download;
mod error;
mod http;
mod remote;
mod session;
mod status;

pub use adapter::ResolverAdapter;
pub use catalog::{default_exclusions, Catalog, CatalogEntry, MergeOutcome};
pub use download::{
    artifact_file_name, ArtifactFetcher, CancelToken, DownloadCoordinator, DownloadHandle,
    DownloadOutcome, DownloadRequest, InstalledArtifact,
};
pub use error::{FetchError, InstallError};
pub use http::{module_list_url, HttpArtifactFetcher, MasterServerClient};
pub use remote::{spawn_remote_fetch, ModuleListSource, RemoteFeed, RemoteIngestor};
pub use session::{SelectionSession, SessionConfig, SessionOutcome};
pub use status::{DownloadAction, ModuleStatus};
