//! Object-store file handle and the streaming multipart writer.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;

use super::client::{CompletedPart, ObjectClient};
use crate::error::{VfsError, VfsResult};
use crate::ops::{byte_stream, ByteStream, FileHandle};
use crate::path::VfsPath;
use crate::types::{check_signal, AbortSignal, ReadOptions, WriteOptions};

/// Accumulates bytes into fixed-size parts of one multipart upload.
///
/// Parts are numbered from 1 in the order they are added, whether
/// uploaded or copied server-side. Every part but the last is exactly
/// `part_size` bytes, and the buffer never holds more than one part.
struct PartWriter<'a> {
    client: &'a dyn ObjectClient,
    key: &'a str,
    upload_id: &'a str,
    part_size: usize,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
}

impl<'a> PartWriter<'a> {
    fn new(client: &'a dyn ObjectClient, key: &'a str, upload_id: &'a str, part_size: usize) -> Self {
        Self {
            client,
            key,
            upload_id,
            part_size,
            buffer: BytesMut::with_capacity(part_size),
            parts: Vec::new(),
        }
    }

    fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }

    /// Copy `[start, start + part_size)` of the existing object as the next part.
    async fn copy_part(&mut self, start: u64) -> VfsResult<()> {
        let end = start + self.part_size as u64 - 1;
        let part = self
            .client
            .upload_part_copy(
                self.key,
                self.upload_id,
                self.next_part_number(),
                self.key,
                start..=end,
            )
            .await?;
        self.parts.push(part);
        Ok(())
    }

    async fn push(&mut self, mut chunk: Bytes) -> VfsResult<()> {
        while !chunk.is_empty() {
            let room = self.part_size - self.buffer.len();
            let take = room.min(chunk.len());
            self.buffer.extend_from_slice(&chunk.split_to(take));
            if self.buffer.len() == self.part_size {
                self.flush().await?;
            }
        }
        Ok(())
    }

    async fn push_zeros(&mut self, mut count: u64, signal: Option<&AbortSignal>) -> VfsResult<()> {
        while count > 0 {
            check_signal(signal)?;
            let room = (self.part_size - self.buffer.len()) as u64;
            let take = room.min(count) as usize;
            self.buffer.resize(self.buffer.len() + take, 0);
            count -= take as u64;
            if self.buffer.len() == self.part_size {
                self.flush().await?;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> VfsResult<()> {
        let body = self.buffer.split().freeze();
        let part_number = self.next_part_number();
        let bytes = body.len();
        let part = self
            .client
            .upload_part(self.key, self.upload_id, part_number, body)
            .await?;
        tracing::debug!(key = self.key, part_number, bytes, "uploaded part");
        self.parts.push(part);
        Ok(())
    }

    /// Upload whatever is buffered and return the part list. An upload
    /// with no parts at all gets one empty part.
    async fn finish(mut self) -> VfsResult<Vec<CompletedPart>> {
        if !self.buffer.is_empty() || self.parts.is_empty() {
            self.flush().await?;
        }
        Ok(self.parts)
    }
}

/// Handle on one key of an [`ObjectStoreBackend`](super::ObjectStoreBackend).
///
/// Each `write_from` is one multipart upload. If it fails the upload is
/// aborted and the object keeps its previous content.
pub struct ObjectStoreHandle {
    client: Arc<dyn ObjectClient>,
    key: String,
    path: VfsPath,
    size: u64,
    part_size: usize,
    pending_upload: Option<String>,
}

impl std::fmt::Debug for ObjectStoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreHandle")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("pending_upload", &self.pending_upload)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreHandle {
    pub(crate) fn new(
        client: Arc<dyn ObjectClient>,
        key: String,
        path: VfsPath,
        size: u64,
        part_size: usize,
    ) -> Self {
        Self {
            client,
            key,
            path,
            size,
            part_size,
            pending_upload: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current size of the stored object, 0 if it does not exist.
    async fn remote_size(&self) -> VfsResult<u64> {
        match self.client.head_object(&self.key).await {
            Ok(meta) => Ok(meta.size),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Fill and complete `upload_id`. Returns the new object size and the
    /// number of bytes taken from `data`.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %self.key, start = options.start))]
    async fn upload(
        &self,
        upload_id: &str,
        mut data: ByteStream<'_>,
        options: &WriteOptions,
    ) -> VfsResult<(u64, u64)> {
        let signal = options.signal.as_ref();
        let offset = options.start;
        let part_size = self.part_size as u64;
        let mut writer = PartWriter::new(self.client.as_ref(), &self.key, upload_id, self.part_size);

        if offset > 0 {
            let preserved = offset.min(self.remote_size().await?);

            // Whole parts of the prefix are copied server-side.
            let whole_parts = preserved / part_size;
            for index in 0..whole_parts {
                check_signal(signal)?;
                writer.copy_part(index * part_size).await?;
            }

            // The remainder is too small to copy as a part; download it.
            let tail_start = whole_parts * part_size;
            if preserved > tail_start {
                let mut body = self
                    .client
                    .get_object(&self.key, Some(tail_start..=preserved - 1))
                    .await?;
                while let Some(chunk) = body.next().await {
                    check_signal(signal)?;
                    writer.push(chunk?).await?;
                }
            }

            writer.push_zeros(offset - preserved, signal).await?;
        }

        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            check_signal(signal)?;
            let chunk = chunk?;
            written += chunk.len() as u64;
            writer.push(chunk).await?;
        }
        check_signal(signal)?;

        let parts = writer.finish().await?;
        self.client
            .complete_multipart_upload(&self.key, upload_id, &parts)
            .await?;
        tracing::debug!(parts = parts.len(), written, "completed upload");
        Ok((offset + written, written))
    }

    async fn abort_upload(&self, upload_id: &str) {
        if let Err(e) = self.client.abort_multipart_upload(&self.key, upload_id).await {
            tracing::warn!(key = %self.key, upload_id, error = %e, "failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl FileHandle for ObjectStoreHandle {
    fn path(&self) -> &VfsPath {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_stream(&self, options: ReadOptions) -> ByteStream<'_> {
        byte_stream(try_stream! {
            if let Some((start, end)) = options.clamp(self.size) {
                let body = match self.client.get_object(&self.key, Some(start..=end - 1)).await {
                    // Removed or truncated since open.
                    Err(e) if e.is_unreadable_range() => None,
                    other => Some(other.map_err(VfsError::from)?),
                };
                if let Some(mut body) = body {
                    while let Some(chunk) = body.next().await {
                        check_signal(options.signal.as_ref())?;
                        yield chunk.map_err(VfsError::from)?;
                    }
                }
            }
        })
    }

    async fn write_from(&mut self, data: ByteStream<'_>, options: WriteOptions) -> VfsResult<u64> {
        let upload_id = self.client.create_multipart_upload(&self.key).await?;
        self.pending_upload = Some(upload_id.clone());

        let result = self.upload(&upload_id, data, &options).await;
        if let Err(err) = &result {
            tracing::debug!(key = %self.key, error = %err, "write failed, aborting upload");
            self.abort_upload(&upload_id).await;
        }
        self.pending_upload = None;

        let (size, written) = result?;
        self.size = size;
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8], position: u64) -> VfsResult<usize> {
        if buf.is_empty() || position >= self.size {
            return Ok(0);
        }
        let end = (position + buf.len() as u64).min(self.size);
        let mut body = match self.client.get_object(&self.key, Some(position..=end - 1)).await {
            Ok(body) => body,
            Err(e) if e.is_unreadable_range() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut filled = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let take = chunk.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
            if filled == buf.len() {
                break;
            }
        }
        Ok(filled)
    }

    async fn close(&mut self) -> VfsResult<()> {
        if let Some(upload_id) = self.pending_upload.take() {
            self.abort_upload(&upload_id).await;
        }
        Ok(())
    }
}

impl Drop for ObjectStoreHandle {
    fn drop(&mut self) {
        if let Some(upload_id) = &self.pending_upload {
            tracing::warn!(key = %self.key, %upload_id, "handle dropped with an upload in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ClientError, MemoryObjectClient, ObjectStoreBackend, ObjectStoreOptions};
    use super::*;
    use crate::ops::{collect_bytes, once_bytes, FilesApi};

    fn backend(part_size: usize) -> (Arc<MemoryObjectClient>, ObjectStoreBackend) {
        let client = Arc::new(MemoryObjectClient::new().with_min_part_size(part_size));
        let fs = ObjectStoreBackend::new(
            client.clone(),
            ObjectStoreOptions::default().with_part_size(part_size),
        );
        (client, fs)
    }

    #[tokio::test]
    async fn test_overwrite_from_offset_copies_whole_parts() {
        let (client, fs) = backend(4);
        client.insert("f", &b"abcdefghij"[..], None);
        client.reset_counters();

        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();
        let written = handle
            .write_from(once_bytes(&b"XY"[..]), WriteOptions::at(9))
            .await
            .unwrap();
        handle.close().await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(handle.size(), 11);
        assert_eq!(client.object("f").unwrap(), &b"abcdefghiXY"[..]);

        let counters = client.counters();
        assert_eq!(counters.upload_part_copy, 2);
        // Only the partial tail "i" was downloaded.
        assert_eq!(counters.bytes_downloaded, 1);
        assert_eq!(client.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_offset_past_end_zero_fills() {
        let (client, fs) = backend(4);
        client.insert("f", &b"ab"[..], None);

        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();
        handle
            .write_from(once_bytes(&b"Z"[..]), WriteOptions::at(6))
            .await
            .unwrap();
        assert_eq!(client.object("f").unwrap(), &b"ab\0\0\0\0Z"[..]);
    }

    #[tokio::test]
    async fn test_empty_write_creates_empty_object() {
        let (client, fs) = backend(4);
        let mut handle = fs.open(&VfsPath::new("/empty")).await.unwrap();
        let written = handle
            .write_from(once_bytes(Bytes::new()), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(client.object("empty").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_and_keeps_old_content() {
        let (client, fs) = backend(4);
        client.insert("f", &b"original"[..], None);
        client.fail_upload_parts_from(2);

        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();
        let err = handle
            .write_from(once_bytes(&b"0123456789"[..]), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Backend(_)));
        assert_eq!(client.pending_uploads(), 0);
        assert_eq!(client.counters().abort_multipart_upload, 1);
        assert_eq!(client.object("f").unwrap(), &b"original"[..]);
        assert_eq!(handle.size(), 8);
    }

    #[tokio::test]
    async fn test_abort_signal_aborts_upload() {
        let (client, fs) = backend(4);
        let signal = AbortSignal::new();
        signal.cancel();

        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();
        let err = handle
            .write_from(
                once_bytes(&b"data"[..]),
                WriteOptions::default().with_signal(signal),
            )
            .await
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(client.pending_uploads(), 0);
        assert!(client.object("f").is_none());
    }

    #[tokio::test]
    async fn test_ranged_read_and_missing_object() {
        let (client, fs) = backend(4);
        client.insert("f", &b"0123456789"[..], None);
        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();

        let data = collect_bytes(handle.read_stream(ReadOptions::range(3, 7)))
            .await
            .unwrap();
        assert_eq!(&data[..], b"3456");

        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf, 8).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");

        client.delete_object("f").await.unwrap();
        let data = collect_bytes(handle.read_stream(ReadOptions::default()))
            .await
            .unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_read_after_object_shrank() {
        let (client, fs) = backend(4);
        client.insert("f", &b"0123456789"[..], None);
        let mut handle = fs.open(&VfsPath::new("/f")).await.unwrap();
        client.insert("f", &b"012"[..], None);

        let data = collect_bytes(handle.read_stream(ReadOptions::range(5, 10)))
            .await
            .unwrap();
        assert!(data.is_empty());

        let mut buf = [0u8; 4];
        assert_eq!(handle.read(&mut buf, 5).await.unwrap(), 0);
        // A range still starting inside the object comes back short.
        assert_eq!(handle.read(&mut buf, 1).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"12");
    }

    #[test]
    fn test_unreadable_range_classification() {
        assert!(ClientError::service("InvalidRange", "416").is_unreadable_range());
        assert!(ClientError::NotFound("k".into()).is_unreadable_range());
        assert!(!ClientError::service("SlowDown", "503").is_unreadable_range());
    }
}
