//! Contracts of the services the tracker talks to.
//!
//! The catalog, the image store and the errors collector live outside this
//! crate; implementations are expected to be safe under concurrent calls
//! from every worker of the pool.

use crate::helm::worker::JobError;
use crate::model::{Package, PackageIdentity};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not read response body: {0}")]
    ReadingResponse(String),
}

#[derive(Error, Debug)]
pub enum PackageManagerError {
    #[error("package rejected: {0}")]
    Rejected(String),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
#[error("could not save image: {0}")]
pub struct ImageStoreError(pub String);

/// Single-attempt HTTP GET.
///
/// Non-2xx responses are returned as responses, not errors; only transport
/// failures are errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<http::Response<Vec<u8>>, HttpClientError>;
}

/// Catalog persistence for packages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Inserts or updates the given package version.
    async fn register(&self, pkg: &Package) -> Result<(), PackageManagerError>;

    /// Removes the package version identified by `identity`.
    async fn unregister(&self, identity: &PackageIdentity) -> Result<(), PackageManagerError>;
}

/// Binary image storage. Returns the id the image can be served by.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save_image(&self, data: &[u8]) -> Result<String, ImageStoreError>;
}

/// Sink for non-benign job failures, keyed by repository id.
#[cfg_attr(test, automock)]
pub trait ErrorsCollector: Send + Sync {
    fn append(&self, repository_id: &str, err: JobError);
}
