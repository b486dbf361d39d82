//! S3-style object client contract.
//!
//! The backend only needs these primitives. Ranges are inclusive on both
//! ends, matching the HTTP `Range` header the service sees.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::ops::RangeInclusive;
use std::time::SystemTime;
use thiserror::Error;

use crate::error::VfsError;

/// Errors reported by an object client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The key, bucket or upload does not exist (404 / NoSuchKey / NoSuchUpload).
    #[error("no such object: {0}")]
    NotFound(String),

    /// The service rejected the request.
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// The requested range starts past the end of the object (416).
    pub fn is_invalid_range(&self) -> bool {
        matches!(self, ClientError::Service { code, .. } if code == "InvalidRange")
    }

    /// Nothing left to read at the requested range: the object is gone or
    /// shrank below the range start.
    pub fn is_unreadable_range(&self) -> bool {
        self.is_not_found() || self.is_invalid_range()
    }
}

impl From<ClientError> for VfsError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound(key) => VfsError::NotFound(key),
            other => VfsError::Backend(other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Streaming response body.
pub type BodyStream = BoxStream<'static, ClientResult<Bytes>>;

/// Object metadata from HEAD or LIST.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: SystemTime,
    pub content_type: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Only filled when a delimiter was given.
    pub common_prefixes: Vec<String>,
    /// Continuation token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

/// A finished part, as passed back to `complete_multipart_upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based.
    pub part_number: u32,
    pub etag: String,
}

/// The object-storage primitives the backend is built on.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    async fn head_object(&self, key: &str) -> ClientResult<ObjectMeta>;

    /// Fetch an object, optionally only an inclusive byte range of it.
    async fn get_object(&self, key: &str, range: Option<RangeInclusive<u64>>)
        -> ClientResult<BodyStream>;

    async fn put_object(&self, key: &str, body: Bytes, content_type: Option<&str>)
        -> ClientResult<()>;

    /// Deleting a missing key succeeds, as on S3.
    async fn delete_object(&self, key: &str) -> ClientResult<()>;

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> ClientResult<ListPage>;

    async fn copy_object(&self, source_key: &str, dest_key: &str) -> ClientResult<()>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str) -> ClientResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ClientResult<CompletedPart>;

    /// Server-side copy of a byte range of `source_key` into a part.
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source_key: &str,
        range: RangeInclusive<u64>,
    ) -> ClientResult<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ClientResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> ClientResult<()>;
}
