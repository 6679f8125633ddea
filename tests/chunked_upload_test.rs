//! Integration tests for the chunked uploader against a recording store.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use proptest::prelude::*;
    use rbv::upload::{
        ChunkedUploader, CommitInfo, UploadCursor, UploadPhase, UploadPlan, UploadProgress,
        UploadTransport, CHUNK_SIZE, MAX_OBJECT_SIZE,
    };
    use rbv::Error;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Upload { path: String, len: usize },
        Start { len: usize },
        Append { offset: u64, len: usize },
        Finish { offset: u64, len: usize, path: String },
    }

    /// In-memory store that checks offsets the way the real one does.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        received: Mutex<Vec<u8>>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn received(&self) -> Vec<u8> {
            self.received.lock().unwrap().clone()
        }

        fn accept(&self, cursor: &UploadCursor, data: &[u8]) -> rbv::Result<()> {
            let mut received = self.received.lock().unwrap();
            if cursor.offset != received.len() as u64 || cursor.session_id != "session-1" {
                return Err(Error::Config(format!(
                    "incorrect_offset: expected {}, got {}",
                    received.len(),
                    cursor.offset
                )));
            }
            received.extend_from_slice(data);
            Ok(())
        }
    }

    #[async_trait]
    impl UploadTransport for RecordingStore {
        async fn upload(&self, commit: &CommitInfo, data: Bytes) -> rbv::Result<()> {
            self.received.lock().unwrap().extend_from_slice(&data);
            self.calls.lock().unwrap().push(Call::Upload {
                path: commit.path.clone(),
                len: data.len(),
            });
            Ok(())
        }

        async fn start_session(&self, data: Bytes) -> rbv::Result<String> {
            self.received.lock().unwrap().extend_from_slice(&data);
            self.calls
                .lock()
                .unwrap()
                .push(Call::Start { len: data.len() });
            Ok("session-1".to_string())
        }

        async fn append(&self, cursor: &UploadCursor, data: Bytes) -> rbv::Result<()> {
            self.accept(cursor, &data)?;
            self.calls.lock().unwrap().push(Call::Append {
                offset: cursor.offset,
                len: data.len(),
            });
            Ok(())
        }

        async fn finish(
            &self,
            cursor: &UploadCursor,
            commit: &CommitInfo,
            data: Bytes,
        ) -> rbv::Result<()> {
            self.accept(cursor, &data)?;
            self.calls.lock().unwrap().push(Call::Finish {
                offset: cursor.offset,
                len: data.len(),
                path: commit.path.clone(),
            });
            Ok(())
        }
    }

    fn payload(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    async fn upload(
        size: usize,
        chunk: u64,
    ) -> (Arc<RecordingStore>, Vec<UploadProgress>, rbv::Result<()>) {
        let store = Arc::new(RecordingStore::default());
        let uploader = ChunkedUploader::new(store.clone()).with_chunk_size(chunk);
        let data = payload(size);
        let mut progress = Vec::new();
        let result = uploader
            .upload(&data[..], size as u64, "/out/show.mp3", |p| progress.push(p.clone()))
            .await;
        (store, progress, result)
    }

    #[tokio::test]
    async fn test_exactly_one_chunk_is_single_shot() {
        let (store, progress, result) = upload(1024, 1024).await;
        result.unwrap();
        assert_eq!(
            store.calls(),
            vec![Call::Upload {
                path: "/out/show.mp3".to_string(),
                len: 1024
            }]
        );
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].phase, UploadPhase::Committed);
        assert_eq!(progress[0].percent(), 100);
    }

    #[tokio::test]
    async fn test_empty_stream_is_single_shot() {
        let (store, _progress, result) = upload(0, 1024).await;
        result.unwrap();
        assert_eq!(
            store.calls(),
            vec![Call::Upload {
                path: "/out/show.mp3".to_string(),
                len: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_one_byte_over_finishes_with_one_byte() {
        let (store, _progress, result) = upload(1025, 1024).await;
        result.unwrap();
        assert_eq!(
            store.calls(),
            vec![
                Call::Start { len: 1024 },
                Call::Finish {
                    offset: 1024,
                    len: 1,
                    path: "/out/show.mp3".to_string()
                },
            ]
        );
        assert_eq!(store.received(), payload(1025));
    }

    #[tokio::test]
    async fn test_exact_multiple_finishes_with_full_chunk() {
        let (store, progress, result) = upload(3 * 1024, 1024).await;
        result.unwrap();
        assert_eq!(
            store.calls(),
            vec![
                Call::Start { len: 1024 },
                Call::Append {
                    offset: 1024,
                    len: 1024
                },
                Call::Finish {
                    offset: 2048,
                    len: 1024,
                    path: "/out/show.mp3".to_string()
                },
            ]
        );
        let percents: Vec<u64> = progress.iter().map(|p| p.percent()).collect();
        assert_eq!(percents, vec![33, 67, 100]);
        assert_eq!(progress.last().unwrap().phase, UploadPhase::Finished);
    }

    #[tokio::test]
    async fn test_size_limit_checked_before_any_call() {
        for (size, chunk) in [(600usize, 1024u64), (600, 100)] {
            let uploader = ChunkedUploader::new(RecordingStore::default())
                .with_chunk_size(chunk)
                .with_max_object_size(500);
            let data = payload(size);
            let result = uploader
                .upload(&data[..], size as u64, "/out/big.mp3", |_| {})
                .await;
            match result {
                Err(Error::SizeLimitExceeded {
                    remote_path,
                    size: reported,
                    limit,
                }) => {
                    assert_eq!(remote_path, "/out/big.mp3");
                    assert_eq!(reported, size as u64);
                    assert_eq!(limit, 500);
                }
                other => panic!("Expected SizeLimitExceeded, got {:?}", other),
            }
            assert!(uploader.transport().calls().is_empty());
        }
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(CHUNK_SIZE, 4 * 1024 * 1024);
        assert_eq!(MAX_OBJECT_SIZE, 157_286_400);
        let uploader = ChunkedUploader::new(RecordingStore::default());
        assert_eq!(uploader.chunk_size(), CHUNK_SIZE);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_call_sequence_matches_plan(size in 0usize..4000, chunk in 1u64..600) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (store, progress, result) = runtime.block_on(upload(size, chunk));
            prop_assert!(result.is_ok());

            let calls = store.calls();
            let plan = UploadPlan::for_size(size as u64, chunk);
            prop_assert_eq!(calls.len() as u64, plan.calls());
            prop_assert_eq!(store.received(), payload(size));

            match plan {
                UploadPlan::Single => {
                    prop_assert!(size as u64 <= chunk);
                    let is_upload = matches!(calls[0], Call::Upload { .. });
                    prop_assert!(is_upload);
                }
                UploadPlan::Session { appends, last_chunk } => {
                    let expected_appends = (size as u64).div_ceil(chunk) - 2;
                    prop_assert_eq!(appends, expected_appends);
                    let appended = calls
                        .iter()
                        .filter(|c| matches!(c, Call::Append { .. }))
                        .count() as u64;
                    prop_assert_eq!(appended, expected_appends);
                    let is_start = matches!(calls[0], Call::Start { .. });
                    prop_assert!(is_start);
                    match calls.last() {
                        Some(Call::Finish { offset, len, .. }) => {
                            prop_assert_eq!(*len as u64, last_chunk);
                            prop_assert_eq!(*offset, size as u64 - last_chunk);
                        }
                        other => prop_assert!(false, "last call was {:?}", other),
                    }
                }
            }

            let last = progress.last().cloned();
            prop_assert_eq!(last.map(|p| p.percent()), Some(100));
            let percents: Vec<u64> = progress.iter().map(|p| p.percent()).collect();
            prop_assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
