//! Remote originals over HTTP(S).
//!
//! [`HttpSource`] streams a URL's body with a blocking `reqwest` client,
//! reporting `Content-Length` as the stream length and `Last-Modified` as the
//! modification time. [`RoutingSource`] picks the right provider per location
//! so the rest of the pipeline can take any mix of files and URLs.

use super::backend::{ByteSource, FileSource, PictureError, SourceStream};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::LAST_MODIFIED;
use std::io;
use std::time::{Duration, SystemTime};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether `location` is an `http://` or `https://` URL.
pub fn is_remote(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Parse an HTTP date such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

fn http_error(location: &str, err: reqwest::Error) -> PictureError {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else if err.status() == Some(StatusCode::NOT_FOUND) {
        io::ErrorKind::NotFound
    } else {
        io::ErrorKind::Other
    };
    PictureError::Io(io::Error::new(kind, format!("{location}: {err}")))
}

/// Serves `http://` and `https://` originals.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, PictureError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PictureError::Io(io::Error::other(e.to_string())))?;
        Ok(Self { client })
    }
}

impl ByteSource for HttpSource {
    fn open(&self, location: &str) -> Result<SourceStream, PictureError> {
        let response = self
            .client
            .get(location)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(location, e))?;
        Ok(SourceStream {
            length: response.content_length(),
            reader: Box::new(response),
        })
    }

    fn modified(&self, location: &str) -> Result<SystemTime, PictureError> {
        let response = self
            .client
            .head(location)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(location, e))?;
        response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .ok_or_else(|| {
                PictureError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{location} has no usable Last-Modified header"),
                ))
            })
    }
}

/// Sends URLs to [`HttpSource`] and everything else to [`FileSource`].
#[derive(Debug, Clone)]
pub struct RoutingSource {
    files: FileSource,
    http: HttpSource,
}

impl RoutingSource {
    pub fn new() -> Result<Self, PictureError> {
        Ok(Self {
            files: FileSource::new(),
            http: HttpSource::new()?,
        })
    }

    fn route(&self, location: &str) -> &dyn ByteSource {
        if is_remote(location) {
            &self.http
        } else {
            &self.files
        }
    }
}

impl ByteSource for RoutingSource {
    fn open(&self, location: &str) -> Result<SourceStream, PictureError> {
        self.route(location).open(location)
    }

    fn modified(&self, location: &str) -> Result<SystemTime, PictureError> {
        self.route(location).modified(location)
    }
}
