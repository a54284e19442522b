use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use modsel_registry::{parse_module_list, ModuleVersion};
use reqwest::blocking::Client;

use crate::download::{ArtifactFetcher, CancelToken};
use crate::error::FetchError;
use crate::remote::ModuleListSource;

const USER_AGENT: &str = concat!("modsel/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_SIZE: usize = 64 * 1024;

fn client(timeout: Option<Duration>) -> Result<Client, FetchError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()?)
}

/// Downloads module archives over HTTP.
///
/// Only the connection is timed; the transfer itself runs until it completes
/// or is cancelled.
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: client(None)?,
        })
    }
}

impl ArtifactFetcher for HttpArtifactFetcher {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        on_progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<PathBuf, FetchError> {
        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let total = response.content_length();
        stream_to_file(&mut response, total, destination, on_progress, cancel)?;
        Ok(destination.to_path_buf())
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Copy `source` into `destination` through a `.part` file that is renamed
/// once complete and removed on any failure.
pub(crate) fn stream_to_file(
    source: &mut dyn Read,
    total: Option<u64>,
    destination: &Path,
    on_progress: &mut dyn FnMut(f32),
    cancel: &CancelToken,
) -> Result<(), FetchError> {
    let partial = partial_path(destination);
    let copied = copy_with_progress(source, total, &partial, on_progress, cancel);
    if let Err(err) = copied {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    fs::rename(&partial, destination)?;
    on_progress(1.0);
    Ok(())
}

fn copy_with_progress(
    source: &mut dyn Read,
    total: Option<u64>,
    partial: &Path,
    on_progress: &mut dyn FnMut(f32),
    cancel: &CancelToken,
) -> Result<(), FetchError> {
    let mut file = File::create(partial)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let read = source.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])?;
        received += read as u64;
        if let Some(total) = total.filter(|total| *total > 0) {
            on_progress((received as f64 / total as f64).min(1.0) as f32);
        }
    }
    file.sync_all()?;
    Ok(())
}

/// Fetches the module list a master server publishes.
#[derive(Debug, Clone)]
pub struct MasterServerClient {
    client: Client,
    url: String,
}

impl MasterServerClient {
    pub fn new(master_server: &str) -> Result<Self, FetchError> {
        Ok(Self {
            client: client(Some(LIST_TIMEOUT))?,
            url: module_list_url(master_server),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ModuleListSource for MasterServerClient {
    fn fetch_modules(&self) -> Result<Vec<ModuleVersion>, FetchError> {
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.text()?;
        Ok(parse_module_list(&body)?)
    }
}

/// `{server}/modules/list/latest`, assuming `http://` when no scheme is given.
pub fn module_list_url(master_server: &str) -> String {
    let server = master_server.trim().trim_end_matches('/');
    if server.contains("://") {
        format!("{server}/modules/list/latest")
    } else {
        format!("http://{server}/modules/list/latest")
    }
}
