//! Download transport
//!
//! Abstracts HTTP so the fetcher can be driven by in-process fakes in tests.
//! - `Transport`: streaming download into a caller-provided sink
//! - `HttpTransport`: blocking `reqwest` client for production

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Result of a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadInfo {
    /// Bytes written to the sink
    pub bytes: u64,
    /// `Content-Length` announced by the server, if any
    pub content_length: Option<u64>,
}

/// Transport for artifact downloads.
pub trait Transport: Send + Sync {
    /// Stream the body at `url` into `sink`.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<DownloadInfo, TransportError>;

    /// Fetch a small text resource (release feeds, catalogs).
    fn get_text(&self, url: &str) -> Result<String, TransportError>;
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("writing download of {url} failed: {source}")]
    Sink {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid request for {url}: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    ///
    /// Connection problems, timeouts, 5xx, 408 and 429 are transient; other
    /// statuses and local write failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::Connection { .. } | TransportError::Timeout { .. } => true,
            TransportError::Sink { .. } | TransportError::Request { .. } => false,
        }
    }
}

/// Copy buffer size for streaming downloads.
const CHUNK_SIZE: usize = 64 * 1024;

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build a client with the given connect and overall request timeouts.
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ij-devkit/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn send(&self, url: &str) -> Result<reqwest::blocking::Response, TransportError> {
        debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<DownloadInfo, TransportError> {
        let mut response = self.send(url)?;
        let content_length = response.content_length();

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes = 0u64;
        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(TransportError::Connection {
                        url: url.to_string(),
                        message: e.to_string(),
                    })
                }
            };
            sink.write_all(&buf[..n]).map_err(|source| TransportError::Sink {
                url: url.to_string(),
                source,
            })?;
            bytes += n as u64;
        }
        sink.flush().map_err(|source| TransportError::Sink {
            url: url.to_string(),
            source,
        })?;

        Ok(DownloadInfo {
            bytes,
            content_length,
        })
    }

    fn get_text(&self, url: &str) -> Result<String, TransportError> {
        self.send(url)?
            .text()
            .map_err(|e| map_reqwest_error(url, e))
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if e.is_builder() {
        TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else if let Some(status) = e.status() {
        TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        TransportError::Connection {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            url: "https://example.com/a.zip".to_string(),
            status: code,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
        assert!(TransportError::Timeout { url: "u".into() }.is_transient());
        assert!(TransportError::Connection {
            url: "u".into(),
            message: "reset".into()
        }
        .is_transient());
        assert!(!TransportError::Sink {
            url: "u".into(),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        }
        .is_transient());
    }

    #[test]
    fn test_error_names_url() {
        assert_eq!(status(404).to_string(), "HTTP 404 from https://example.com/a.zip");
    }
}
