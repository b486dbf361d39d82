//! Object-store streaming writes, observed through the in-memory client's
//! counters.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use unifiles::{
    AbortSignal, ByteStream, Files, MemoryObjectClient, ObjectStoreBackend, ObjectStoreOptions,
    ReadOptions, VfsResult, WriteOptions, collect_bytes,
};

const PART: usize = 16;

fn setup() -> (Arc<MemoryObjectClient>, Files) {
    let client = Arc::new(MemoryObjectClient::new().with_min_part_size(PART));
    let backend = ObjectStoreBackend::new(
        client.clone(),
        ObjectStoreOptions::default().with_part_size(PART),
    );
    (client, Files::new(backend))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn chunked(data: &[u8], chunk: usize) -> ByteStream<'static> {
    let chunks: Vec<VfsResult<Bytes>> = data
        .chunks(chunk)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

#[tokio::test]
async fn test_one_byte_over_threshold_makes_two_parts() {
    let (client, files) = setup();
    let data = pattern(PART + 1);

    files.write("/obj", data.clone()).await.unwrap();

    let counters = client.counters();
    assert_eq!(counters.upload_part, 2);
    assert_eq!(counters.complete_multipart_upload, 1);
    assert_eq!(client.object("obj").unwrap(), data);
}

#[tokio::test]
async fn test_exact_threshold_makes_one_part() {
    let (client, files) = setup();
    files.write("/obj", pattern(PART)).await.unwrap();
    assert_eq!(client.counters().upload_part, 1);
}

#[tokio::test]
async fn test_empty_payload_uploads_one_empty_part() {
    let (client, files) = setup();
    files.write("/empty", Bytes::new()).await.unwrap();

    assert_eq!(client.counters().upload_part, 1);
    assert_eq!(client.object("empty").unwrap().len(), 0);
    assert_eq!(files.stats("/empty").await.unwrap().unwrap().size, 0);
}

#[tokio::test]
async fn test_small_chunks_are_regrouped_into_full_parts() {
    let (client, files) = setup();
    let data = pattern(70);

    let written = files
        .write_stream("/obj", chunked(&data, 7), WriteOptions::default())
        .await
        .unwrap();

    assert_eq!(written, 70);
    // 4 full parts plus a 6-byte tail; completion enforces the floor.
    assert_eq!(client.counters().upload_part, 5);
    assert_eq!(client.object("obj").unwrap(), data);
}

#[tokio::test]
async fn test_overwrite_copies_preserved_range_server_side() {
    let (client, files) = setup();
    let original = pattern(5 * PART + 3);
    client.insert("obj", original.clone(), None);
    client.reset_counters();

    let offset = 3 * PART + 2;
    let new_data = b"replacement tail".to_vec();
    let mut handle = files.open("/obj").await.unwrap();
    handle
        .write_from(chunked(&new_data, 5), WriteOptions::at(offset as u64))
        .await
        .unwrap();
    handle.close().await.unwrap();

    let stored = client.object("obj").unwrap();
    assert_eq!(&stored[..offset], &original[..offset]);
    assert_eq!(&stored[offset..], &new_data[..]);
    assert_eq!(handle.size(), (offset + new_data.len()) as u64);

    let counters = client.counters();
    assert_eq!(counters.upload_part_copy, 3);
    // Only the 2 preserved bytes past the last whole part were fetched.
    assert_eq!(counters.bytes_downloaded, 2);
}

#[tokio::test]
async fn test_append_to_large_object_downloads_only_the_tail() {
    let (client, files) = setup();
    let original = pattern(4 * PART + 5);
    client.insert("log", original.clone(), None);
    client.reset_counters();

    files
        .append("/log", unifiles::once_bytes("more"), None)
        .await
        .unwrap();

    let counters = client.counters();
    assert_eq!(counters.upload_part_copy, 4);
    assert_eq!(counters.bytes_downloaded, 5);
    let stored = client.object("log").unwrap();
    assert_eq!(&stored[..original.len()], &original[..]);
    assert_eq!(&stored[original.len()..], b"more");
}

#[tokio::test]
async fn test_sparse_write_pads_across_parts() {
    let (client, files) = setup();
    client.insert("sparse", &b"0123456789"[..], None);

    let mut handle = files.open("/sparse").await.unwrap();
    handle
        .write_from(unifiles::once_bytes("end"), WriteOptions::at(40))
        .await
        .unwrap();
    handle.close().await.unwrap();

    let stored = client.object("sparse").unwrap();
    assert_eq!(stored.len(), 43);
    assert_eq!(&stored[..10], b"0123456789");
    assert!(stored[10..40].iter().all(|&b| b == 0));
    assert_eq!(&stored[40..], b"end");
    // 43 bytes in 16-byte parts.
    assert_eq!(client.counters().upload_part, 3);
}

#[tokio::test]
async fn test_sparse_write_on_missing_object() {
    let (client, files) = setup();
    let mut handle = files.open("/fresh").await.unwrap();
    handle
        .write_from(unifiles::once_bytes("x"), WriteOptions::at(20))
        .await
        .unwrap();
    handle.close().await.unwrap();

    let stored = client.object("fresh").unwrap();
    assert_eq!(stored.len(), 21);
    assert!(stored[..20].iter().all(|&b| b == 0));
    assert_eq!(client.counters().upload_part_copy, 0);
}

#[tokio::test]
async fn test_failed_part_aborts_upload() {
    let (client, files) = setup();
    files.write("/obj", "previous").await.unwrap();
    client.fail_upload_parts_from(2);

    let err = files.write("/obj", pattern(3 * PART)).await.unwrap_err();
    assert!(err.to_string().contains("injected"), "{err}");

    assert_eq!(client.pending_uploads(), 0);
    assert_eq!(client.counters().abort_multipart_upload, 1);
    assert_eq!(files.read_to_string("/obj").await.unwrap(), "previous");
}

#[tokio::test]
async fn test_cancellation_mid_stream_aborts_upload() {
    let (client, files) = setup();
    let signal = AbortSignal::new();
    let trigger = signal.clone();

    let data = pattern(4 * PART);
    let mut seen = 0;
    let source = chunked(&data, PART)
        .inspect(move |_| {
            seen += 1;
            if seen == 2 {
                trigger.cancel();
            }
        })
        .boxed();

    let err = files
        .write_stream("/obj", source, WriteOptions::default().with_signal(signal))
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(client.pending_uploads(), 0);
    assert!(client.object("obj").is_none());
}

#[tokio::test]
async fn test_close_aborts_upload_left_in_flight() {
    let (client, files) = setup();
    let mut handle = files.open("/stuck").await.unwrap();

    let source = stream::iter(vec![Ok(Bytes::from_static(b"abc"))])
        .chain(stream::pending())
        .boxed();
    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        handle.write_from(source, WriteOptions::default()),
    )
    .await;
    assert!(timed_out.is_err());
    assert_eq!(client.pending_uploads(), 1);

    handle.close().await.unwrap();
    assert_eq!(client.pending_uploads(), 0);
    handle.close().await.unwrap();
}

#[tokio::test]
async fn test_range_read_is_one_request() {
    let (client, files) = setup();
    client.insert("big", pattern(1000), None);
    client.reset_counters();

    let data = collect_bytes(files.read("/big", ReadOptions::range(100, 300)))
        .await
        .unwrap();
    assert_eq!(&data[..], &pattern(1000)[100..300]);

    let counters = client.counters();
    assert_eq!(counters.get_object, 1);
    assert_eq!(counters.bytes_downloaded, 200);
}
