//! Artifact downloads into the cache.
//!
//! Files are streamed into a `.part` temp file beside the destination and
//! renamed into place only once complete, so an interrupted or cancelled
//! download never leaves a truncated artifact at its cache path.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::io::transport::{Cancelled, FetchError, RequestGuard, Transport, TransportError};

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<FetchError> for DownloadError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Transport(t) => Self::Transport(t),
            FetchError::Cancelled(c) => Self::Cancelled(c),
        }
    }
}

/// A file that landed in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Request for a download operation
pub struct DownloadRequest<'a> {
    pub transport: &'a dyn Transport,
    pub guard: &'a RequestGuard,
    pub url: &'a str,
    pub dest: &'a Path,
}

impl<'a> DownloadRequest<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        guard: &'a RequestGuard,
        url: &'a str,
        dest: &'a Path,
    ) -> Self {
        Self {
            transport,
            guard,
            url,
            dest,
        }
    }

    /// Download to `dest`. `Ok(None)` means the endpoint does not have the file.
    pub async fn execute(self) -> Result<Option<StoredFile>, DownloadError> {
        let dir = self
            .dest
            .parent()
            .ok_or_else(|| std::io::Error::other("destination has no parent directory"))?;
        tokio::fs::create_dir_all(dir).await?;

        // Removed on drop unless persisted.
        let partial = tempfile::Builder::new()
            .prefix(".rdep-")
            .suffix(".part")
            .tempfile_in(dir)?
            .into_temp_path();

        let written = self
            .guard
            .run_download(self.url, &partial, self.transport.download(self.url, &partial))
            .await?;
        let Some(size) = written else {
            return Ok(None);
        };

        let sha256 = hash_file(partial.to_path_buf()).await?;
        partial.persist(self.dest).map_err(|e| e.error)?;

        Ok(Some(StoredFile {
            path: self.dest.to_path_buf(),
            size,
            sha256,
        }))
    }
}

/// SHA-256 of a file, computed on a blocking thread.
pub async fn hash_file(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut hasher = Sha256::new();
        let mut file = std::fs::File::open(&path)?;
        let mut buffer = [0u8; 8192];
        loop {
            let count = file.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
        Ok::<String, std::io::Error>(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::HttpTransport;
    use mockito::Server;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn guard() -> RequestGuard {
        RequestGuard::new(CancellationToken::new(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_download_persists_and_hashes() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/a.jar")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g/a/1.0/a-1.0.jar");
        let transport = HttpTransport::new().unwrap();
        let guard = guard();
        let url = format!("{}/a.jar", server.url());

        let stored = DownloadRequest::new(&transport, &guard, &url, &dest)
            .execute()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(
            stored.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_missing_leaves_no_files() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/gone.jar")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.jar");
        let transport = HttpTransport::new().unwrap();
        let guard = guard();
        let url = format!("{}/gone.jar", server.url());

        let stored = DownloadRequest::new(&transport, &guard, &url, &dest)
            .execute()
            .await
            .unwrap();
        assert!(stored.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.jar");
        let transport = HttpTransport::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let guard = RequestGuard::new(token, Duration::from_secs(10));

        let err = DownloadRequest::new(&transport, &guard, "http://127.0.0.1:9/a.jar", &dest)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
