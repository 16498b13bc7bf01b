//! Repository transport: how descriptors, metadata and artifacts are fetched.
//!
//! The resolver only sees the [`Transport`] trait. [`HttpTransport`] is the
//! production implementation over `reqwest`.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Failure talking to one repository endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// The server answered with an unexpected status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Connection, TLS or protocol failure.
    #[error("request to {url} failed: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying error text.
        message: String,
    },

    /// Local write failure while streaming a download.
    #[error("IO error while fetching {url}: {source}")]
    Io {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// The caller cancelled the operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A guarded transport call either fails on the wire or is cancelled.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The endpoint failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The caller cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// A fetched document (descriptor or metadata).
#[derive(Debug, Clone)]
pub struct Resource {
    /// Response body.
    pub body: Bytes,
    /// `Last-Modified` of the response, if the server sent one.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Resource {
    /// The body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Headers of a resource probed without downloading it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceInfo {
    /// `Content-Length`, if known.
    pub size: Option<u64>,
    /// `Last-Modified`, if known.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Outbound repository protocol.
///
/// Every method returns `Ok(None)` when the endpoint does not have the
/// resource, and `Err` for anything else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a small document into memory.
    async fn fetch(&self, url: &str) -> Result<Option<Resource>, TransportError>;

    /// Check a resource exists without downloading it.
    async fn exists(&self, url: &str) -> Result<Option<ResourceInfo>, TransportError>;

    /// Stream a resource into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<Option<u64>, TransportError>;
}

/// Applies the caller's timeout and cancellation token to transport calls.
#[derive(Debug, Clone)]
pub struct RequestGuard {
    cancel: CancellationToken,
    timeout: Duration,
}

impl RequestGuard {
    /// Create a guard.
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Whether the caller has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut`, failing with a timeout or cancellation if either happens first.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] on cancellation,
    /// [`TransportError::Timeout`] on timeout, or the future's own error.
    pub async fn run<T, Fut>(&self, url: &str, fut: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled(Cancelled));
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(FetchError::Cancelled(Cancelled)),
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner.map_err(FetchError::Transport),
                Err(_) => Err(FetchError::Transport(TransportError::Timeout {
                    url: url.to_string(),
                })),
            },
        }
    }
}

impl RequestGuard {
    /// Run a download that streams into `dest`.
    ///
    /// Unlike [`RequestGuard::run`] the timeout is an idle timeout: the call
    /// fails only once `dest` has not grown for a whole timeout period, so a
    /// large artifact on a slow but live connection still completes.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] on cancellation,
    /// [`TransportError::Timeout`] when the transfer stalls, or the future's
    /// own error.
    pub async fn run_download<T, Fut>(&self, url: &str, dest: &Path, fut: Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, TransportError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled(Cancelled));
        }
        let stalled = async {
            let mut seen = 0;
            loop {
                tokio::time::sleep(self.timeout).await;
                let len = tokio::fs::metadata(dest).await.map_or(0, |m| m.len());
                if len == seen {
                    break;
                }
                seen = len;
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(FetchError::Cancelled(Cancelled)),
            res = fut => res.map_err(FetchError::Transport),
            () = stalled => {
                tracing::debug!("No progress on {url} for {:?}", self.timeout);
                Err(FetchError::Transport(TransportError::Timeout {
                    url: url.to_string(),
                }))
            }
        }
    }
}

/// HTTP(S) transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport with the crate's user agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_user_agent(crate::USER_AGENT)
    }

    /// Build a transport with a custom user agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the TLS backend cannot be initialized.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, TransportError> {
        Client::builder()
            .user_agent(user_agent)
            .build()
            .map(Self::from_client)
            .map_err(|e| TransportError::Network {
                url: String::new(),
                message: e.to_string(),
            })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn is_missing(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::GONE
}

fn network_error(url: &str, e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)?
        .to_str()
        .ok()
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

impl HttpTransport {
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Option<reqwest::Response>, TransportError> {
        let resp = request.send().await.map_err(|e| network_error(url, &e))?;
        let status = resp.status();
        if is_missing(status) {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(Some(resp))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Option<Resource>, TransportError> {
        let Some(resp) = self.send(self.client.get(url), url).await? else {
            return Ok(None);
        };
        let last_modified = last_modified(resp.headers());
        let body = resp.bytes().await.map_err(|e| network_error(url, &e))?;
        Ok(Some(Resource {
            body,
            last_modified,
        }))
    }

    async fn exists(&self, url: &str) -> Result<Option<ResourceInfo>, TransportError> {
        let Some(resp) = self.send(self.client.head(url), url).await? else {
            return Ok(None);
        };
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Ok(Some(ResourceInfo {
            size,
            last_modified: last_modified(resp.headers()),
        }))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<Option<u64>, TransportError> {
        let Some(resp) = self.send(self.client.get(url), url).await? else {
            return Ok(None);
        };
        let io_err = |source| TransportError::Io {
            url: url.to_string(),
            source,
        };

        let mut file = File::create(dest).await.map_err(io_err)?;
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network_error(url, &e))?;
            file.write_all(&chunk).await.map_err(io_err)?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(io_err)?;
        tracing::trace!(
            "Fetched {} ({downloaded} bytes)",
            crate::paths::filename_from_url(url)
        );
        Ok(Some(downloaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_fetch_found_and_missing() {
        let mut server = Server::new_async().await;
        let _found = server
            .mock("GET", "/g/a/1.0/a-1.0.pom")
            .with_status(200)
            .with_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
            .with_body("<project/>")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/g/b/1.0/b-1.0.pom")
            .with_status(404)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let found = transport
            .fetch(&format!("{}/g/a/1.0/a-1.0.pom", server.url()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text(), "<project/>");
        assert_eq!(
            found.last_modified.unwrap().to_rfc3339(),
            "2015-10-21T07:28:00+00:00"
        );

        let missing = transport
            .fetch(&format!("{}/g/b/1.0/b-1.0.pom", server.url()))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/broken")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .fetch(&format!("{}/broken", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/g/a/1.0/a-1.0.jar")
            .with_status(200)
            .with_body(vec![7u8; 4096])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a-1.0.jar");
        let transport = HttpTransport::new().unwrap();
        let written = transport
            .download(&format!("{}/g/a/1.0/a-1.0.jar", server.url()), &dest)
            .await
            .unwrap();
        assert_eq!(written, Some(4096));
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let guard = RequestGuard::new(CancellationToken::new(), Duration::from_millis(20));
        let result: Result<(), _> = guard
            .run("slow://x", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(FetchError::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_download_guard_allows_slow_progress() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.jar");
        let guard = RequestGuard::new(CancellationToken::new(), Duration::from_millis(60));

        // Ten writes 20ms apart: well past the timeout in total, never idle for it.
        let written = guard
            .run_download("slow://a.jar", &dest, async {
                let mut file = File::create(&dest).await.unwrap();
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    file.write_all(b"chunk").await.unwrap();
                    file.flush().await.unwrap();
                }
                Ok(50u64)
            })
            .await
            .unwrap();
        assert_eq!(written, 50);
    }

    #[tokio::test]
    async fn test_download_guard_times_out_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stuck.jar");
        let guard = RequestGuard::new(CancellationToken::new(), Duration::from_millis(30));

        let result: Result<u64, _> = guard
            .run_download("stuck://a.jar", &dest, async {
                tokio::fs::write(&dest, b"half").await.unwrap();
                std::future::pending::<Result<u64, TransportError>>().await
            })
            .await;
        assert!(matches!(
            result,
            Err(FetchError::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_guard_cancels() {
        let token = CancellationToken::new();
        let guard = RequestGuard::new(token.clone(), Duration::from_secs(5));
        token.cancel();
        let result: Result<(), _> = guard.run("x", async { Ok(()) }).await;
        assert!(matches!(result, Err(FetchError::Cancelled(_))));
    }
}
