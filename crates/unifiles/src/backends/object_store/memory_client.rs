//! In-process object client.
//!
//! Behaves like an S3 bucket for the operations the backend uses,
//! including the part-size floor on every part but the last, and counts
//! calls so tests can see how much data crossed the "network".

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::{Bound, RangeInclusive};
use std::time::SystemTime;

use super::client::{
    BodyStream, ClientError, ClientResult, CompletedPart, ListPage, ObjectClient, ObjectMeta,
};

/// Body chunk size for `get_object`.
const BODY_CHUNK: usize = 8 * 1024;

/// Default page size for `list_objects`, as on S3.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Call and traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCounters {
    pub get_object: usize,
    pub bytes_downloaded: u64,
    pub put_object: usize,
    pub list_objects: usize,
    pub create_multipart_upload: usize,
    pub upload_part: usize,
    pub upload_part_copy: usize,
    pub complete_multipart_upload: usize,
    pub abort_multipart_upload: usize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: SystemTime,
    content_type: Option<String>,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    counters: ClientCounters,
    fail_parts_from: Option<u32>,
}

/// Object client backed by an in-memory bucket.
#[derive(Debug)]
pub struct MemoryObjectClient {
    state: Mutex<State>,
    min_part_size: usize,
    page_size: usize,
}

impl Default for MemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectClient {
    /// A bucket with no part-size floor and S3's default page size.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            min_part_size: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Reject completion when any part but the last is smaller than `size`.
    pub fn with_min_part_size(mut self, size: usize) -> Self {
        self.min_part_size = size;
        self
    }

    /// Cap the number of entries per listing page.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Fail every `upload_part` whose part number is `part_number` or above.
    pub fn fail_upload_parts_from(&self, part_number: u32) {
        self.state.lock().fail_parts_from = Some(part_number);
    }

    pub fn clear_failures(&self) {
        self.state.lock().fail_parts_from = None;
    }

    pub fn counters(&self) -> ClientCounters {
        self.state.lock().counters.clone()
    }

    pub fn reset_counters(&self) {
        self.state.lock().counters = ClientCounters::default();
    }

    /// Multipart uploads neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Raw object content, bypassing counters.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).map(|o| o.data.clone())
    }

    /// All stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Store an object directly, bypassing counters.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, content_type: Option<&str>) {
        self.state.lock().objects.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                last_modified: SystemTime::now(),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    fn meta(key: &str, object: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: object.data.len() as u64,
            last_modified: object.last_modified,
            content_type: object.content_type.clone(),
        }
    }

    fn slice(data: &Bytes, range: &RangeInclusive<u64>) -> ClientResult<Bytes> {
        let len = data.len() as u64;
        let (start, end) = (*range.start(), *range.end());
        if start > end || start >= len {
            return Err(ClientError::service(
                "InvalidRange",
                format!("bytes={start}-{end} not satisfiable for length {len}"),
            ));
        }
        let end = end.min(len - 1);
        Ok(data.slice(start as usize..=end as usize))
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    async fn head_object(&self, key: &str) -> ClientResult<ObjectMeta> {
        let state = self.state.lock();
        state
            .objects
            .get(key)
            .map(|object| Self::meta(key, object))
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn get_object(
        &self,
        key: &str,
        range: Option<RangeInclusive<u64>>,
    ) -> ClientResult<BodyStream> {
        let mut state = self.state.lock();
        let data = state
            .objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| ClientError::NotFound(key.to_string()))?;
        let body = match range {
            Some(range) => Self::slice(&data, &range)?,
            None => data,
        };
        state.counters.get_object += 1;
        state.counters.bytes_downloaded += body.len() as u64;

        let chunks: Vec<ClientResult<Bytes>> = (0..body.len())
            .step_by(BODY_CHUNK)
            .map(|offset| Ok(body.slice(offset..(offset + BODY_CHUNK).min(body.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.counters.put_object += 1;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                last_modified: SystemTime::now(),
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> ClientResult<()> {
        self.state.lock().objects.remove(key);
        Ok(())
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> ClientResult<ListPage> {
        let mut state = self.state.lock();
        state.counters.list_objects += 1;

        let lower = match &continuation {
            Some(token) => Bound::Excluded(token.as_str()),
            None => Bound::Included(prefix),
        };
        let mut page = ListPage::default();
        let mut prefixes = BTreeSet::new();
        let mut last_key = None;
        let mut count = 0;

        for (key, object) in state
            .objects
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            if count == self.page_size {
                page.next_token = last_key.clone();
                break;
            }
            last_key = Some(key.clone());
            let rest = &key[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|idx| idx + d.len())) {
                Some(end) => {
                    if prefixes.insert(format!("{prefix}{}", &rest[..end])) {
                        count += 1;
                    }
                }
                None => {
                    page.objects.push(Self::meta(key, object));
                    count += 1;
                }
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        Ok(page)
    }

    async fn copy_object(&self, source_key: &str, dest_key: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        let mut object = state
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(source_key.to_string()))?;
        object.last_modified = SystemTime::now();
        state.objects.insert(dest_key.to_string(), object);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> ClientResult<String> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.counters.create_multipart_upload += 1;
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> ClientResult<CompletedPart> {
        let mut state = self.state.lock();
        state.counters.upload_part += 1;
        if state.fail_parts_from.is_some_and(|n| part_number >= n) {
            return Err(ClientError::service("InternalError", "injected part failure"));
        }
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| ClientError::NotFound(upload_id.to_string()))?;
        upload.parts.insert(part_number, body);
        Ok(CompletedPart {
            part_number,
            etag: format!("\"{upload_id}-{part_number}\""),
        })
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source_key: &str,
        range: RangeInclusive<u64>,
    ) -> ClientResult<CompletedPart> {
        let mut state = self.state.lock();
        state.counters.upload_part_copy += 1;
        let source = state
            .objects
            .get(source_key)
            .map(|o| o.data.clone())
            .ok_or_else(|| ClientError::NotFound(source_key.to_string()))?;
        let body = Self::slice(&source, &range)?;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| ClientError::NotFound(upload_id.to_string()))?;
        upload.parts.insert(part_number, body);
        Ok(CompletedPart {
            part_number,
            etag: format!("\"{upload_id}-{part_number}-copy\""),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.counters.complete_multipart_upload += 1;
        if parts.is_empty() {
            return Err(ClientError::service("MalformedXML", "no parts given"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(ClientError::service("InvalidPartOrder", "parts out of order"));
        }

        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| ClientError::NotFound(upload_id.to_string()))?;
        let mut content = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                ClientError::service("InvalidPart", format!("part {} missing", part.part_number))
            })?;
            let is_last = index + 1 == parts.len();
            if !is_last && body.len() < self.min_part_size {
                return Err(ClientError::service(
                    "EntityTooSmall",
                    format!("part {} is {} bytes", part.part_number, body.len()),
                ));
            }
            content.extend_from_slice(body);
        }

        state.uploads.remove(upload_id);
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: content.freeze(),
                last_modified: SystemTime::now(),
                content_type: None,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.counters.abort_multipart_upload += 1;
        if !state.uploads.get(upload_id).is_some_and(|u| u.key == key) {
            return Err(ClientError::NotFound(upload_id.to_string()));
        }
        state.uploads.remove(upload_id);
        Ok(())
    }
}
