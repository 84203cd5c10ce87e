// HLS Segment Scheduler: bounded pool that fetches, decrypts and persists segments.

use crate::hls::HlsDownloaderError;
use crate::hls::config::{HlsConfig, IvPolicy};
use crate::hls::decryption::{EncryptionKey, KeyResolver, decrypt_segment, segment_iv};
use crate::hls::events::{EpisodeEvent, OnEpisodeEvent};
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::segment::{Segment, SegmentResult, SegmentStatus};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct WorkerOutput {
    index: usize,
    attempts: u32,
    result: Result<(PathBuf, u64), HlsDownloaderError>,
}

// Everything a worker needs to take one segment from URI to plaintext file.
struct SegmentWorker {
    segment_fetcher: Arc<dyn SegmentDownloader>,
    key_resolver: Arc<KeyResolver>,
    iv_policy: IvPolicy,
    max_attempts: u32,
    retry_delay_base: Duration,
    work_dir: PathBuf,
    on_event: Option<OnEpisodeEvent>,
}

impl SegmentWorker {
    fn emit(&self, event: EpisodeEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }

    async fn fetch_and_decrypt(
        &self,
        segment: &Segment,
        key: Option<&EncryptionKey>,
        iv: &[u8; 16],
    ) -> Result<Vec<u8>, HlsDownloaderError> {
        let data = self.segment_fetcher.download_segment(segment).await?;
        match key {
            Some(key) => decrypt_segment(&data, key, iv),
            None => Ok(data.to_vec()),
        }
    }

    async fn attempt_segment(&self, segment: &Segment) -> (u32, Result<(PathBuf, u64), HlsDownloaderError>) {
        // Key failures are structural and fail the job without retrying.
        let key = match self.key_resolver.resolve_for(segment.key.as_ref()).await {
            Ok(key) => key,
            Err(e) => return (0, Err(e)),
        };
        let iv = segment_iv(segment, self.iv_policy);
        let max_attempts = self.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_and_decrypt(segment, key.as_ref(), &iv).await {
                Ok(plaintext) => {
                    let path = self.work_dir.join(segment.file_name());
                    let len = plaintext.len() as u64;
                    let written = tokio::fs::write(&path, plaintext)
                        .await
                        .map(|_| (path, len))
                        .map_err(HlsDownloaderError::from);
                    return (attempt, written);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(index = segment.index, attempt, error = %e, "Segment attempt failed, retrying");
                    self.emit(EpisodeEvent::SegmentRetrying {
                        index: segment.index,
                        attempt,
                        reason: e.to_string(),
                    });
                    let delay = self
                        .retry_delay_base
                        .saturating_mul(2_u32.saturating_pow(attempt - 1));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) if e.is_retryable() => {
                    return (
                        attempt,
                        Err(HlsDownloaderError::SegmentExhausted {
                            index: segment.index,
                            attempts: attempt,
                            reason: e.to_string(),
                        }),
                    );
                }
                Err(e) => return (attempt, Err(e)),
            }
        }
    }

    async fn process(self: Arc<Self>, segment: Segment) -> WorkerOutput {
        let (attempts, result) = self.attempt_segment(&segment).await;
        WorkerOutput {
            index: segment.index,
            attempts,
            result,
        }
    }
}

pub struct SegmentScheduler {
    config: Arc<HlsConfig>,
    worker: Arc<SegmentWorker>,
    cancel: CancellationToken,
}

impl SegmentScheduler {
    pub fn new(
        config: Arc<HlsConfig>,
        segment_fetcher: Arc<dyn SegmentDownloader>,
        key_resolver: Arc<KeyResolver>,
        work_dir: PathBuf,
        on_event: Option<OnEpisodeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let worker = Arc::new(SegmentWorker {
            segment_fetcher,
            key_resolver,
            iv_policy: config.decryption_config.iv_policy,
            max_attempts: config.fetcher_config.max_segment_attempts,
            retry_delay_base: config.fetcher_config.segment_retry_delay_base,
            work_dir,
            on_event,
        });
        Self {
            config,
            worker,
            cancel,
        }
    }

    /// Runs every segment to `Decrypted` or `Failed`. After the first failure
    /// (or cancellation) no new segment is started; in-flight ones finish
    /// before the error is returned.
    pub async fn run(&self, segments: &[Segment]) -> Result<Vec<SegmentResult>, HlsDownloaderError> {
        if let Some((position, segment)) = segments
            .iter()
            .enumerate()
            .find(|(position, segment)| segment.index != *position)
        {
            return Err(HlsDownloaderError::ParseError(format!(
                "Segment at position {position} carries index {}",
                segment.index
            )));
        }

        let concurrency = self.config.scheduler_config.download_concurrency.max(1);
        let mut results: Vec<SegmentResult> = segments
            .iter()
            .map(|s| SegmentResult::pending(s.index))
            .collect();
        let mut queue = segments.iter();
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<HlsDownloaderError> = None;
        let mut cancelled = false;

        info!(total = segments.len(), concurrency, "Segment pool started");

        loop {
            while first_error.is_none() && !cancelled && in_flight.len() < concurrency {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let Some(segment) = queue.next() else {
                    break;
                };
                results[segment.index].status = SegmentStatus::Downloading;
                in_flight.push(Arc::clone(&self.worker).process(segment.clone()));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !cancelled => {
                    warn!(in_flight = in_flight.len(), "Cancellation requested, draining segment pool");
                    cancelled = true;
                }

                Some(output) = in_flight.next() => {
                    let entry = &mut results[output.index];
                    entry.attempts = output.attempts;
                    match output.result {
                        Ok((path, bytes)) => {
                            entry.status = SegmentStatus::Decrypted;
                            entry.path = Some(path);
                            entry.bytes = bytes;
                            self.worker.emit(EpisodeEvent::SegmentCompleted {
                                index: output.index,
                                bytes,
                            });
                        }
                        Err(e) => {
                            entry.status = SegmentStatus::Failed;
                            error!(index = output.index, attempts = output.attempts, error = %e, "Segment failed");
                            self.worker.emit(EpisodeEvent::SegmentFailed {
                                index: output.index,
                                reason: e.to_string(),
                            });
                            if first_error.is_none() {
                                if !in_flight.is_empty() {
                                    info!(in_flight = in_flight.len(), "Draining in-flight segments after failure");
                                }
                                first_error = Some(e);
                            }
                        }
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancelled {
            return Err(HlsDownloaderError::Cancelled);
        }
        info!(total = results.len(), "Segment pool finished");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::decryption::KeySource;
    use crate::hls::error::NetworkErrorKind;
    use crate::hls::segment::KeyContext;
    use aes::Aes128;
    use async_trait::async_trait;
    use bytes::Bytes;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    const KEY: [u8; 16] = [0x42; 16];

    #[derive(Default)]
    struct MockDownloader {
        // Remaining failures per index; u32::MAX fails forever.
        failures: Mutex<HashMap<usize, u32>>,
        encrypt: bool,
        delay: Duration,
        started: AtomicUsize,
        completed: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockDownloader {
        fn failing(mut self, index: usize, times: u32) -> Self {
            self.failures.get_mut().insert(index, times);
            self
        }

        fn payload(index: usize) -> Vec<u8> {
            format!("segment-{index}").into_bytes()
        }
    }

    #[async_trait]
    impl SegmentDownloader for MockDownloader {
        async fn download_segment(&self, segment: &Segment) -> Result<Bytes, HlsDownloaderError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let should_fail = {
                let mut failures = self.failures.lock();
                match failures.get_mut(&segment.index) {
                    Some(remaining) if *remaining > 0 => {
                        if *remaining != u32::MAX {
                            *remaining -= 1;
                        }
                        true
                    }
                    _ => false,
                }
            };
            if should_fail {
                return Err(HlsDownloaderError::NetworkError {
                    url: segment.uri.to_string(),
                    kind: NetworkErrorKind::Status(503),
                });
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            let plain = Self::payload(segment.index);
            if self.encrypt {
                let cipher = cbc::Encryptor::<Aes128>::new_from_slices(&KEY, &[0u8; 16]).unwrap();
                Ok(Bytes::from(cipher.encrypt_padded_vec_mut::<Pkcs7>(&plain)))
            } else {
                Ok(Bytes::from(plain))
            }
        }
    }

    struct StaticKey {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl KeySource for StaticKey {
        async fn fetch_key(&self, uri: &Url) -> Result<Bytes, HlsDownloaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HlsDownloaderError::KeyFetchError {
                    uri: uri.to_string(),
                    reason: "access denied".into(),
                });
            }
            Ok(Bytes::copy_from_slice(&KEY))
        }
    }

    fn segments(n: usize, encrypted: bool) -> Vec<Segment> {
        (0..n)
            .map(|index| Segment {
                index,
                uri: Url::parse(&format!("https://cdn.example/seg{index}.ts")).unwrap(),
                key: encrypted.then(|| KeyContext {
                    uri: Url::parse("https://cdn.example/key.bin").unwrap(),
                    iv: None,
                }),
                media_sequence: index as u64,
                duration: 4.0,
            })
            .collect()
    }

    fn config(concurrency: usize) -> Arc<HlsConfig> {
        let mut config = HlsConfig::default();
        config.scheduler_config.download_concurrency = concurrency;
        config.fetcher_config.max_segment_attempts = 3;
        config.fetcher_config.segment_retry_delay_base = Duration::ZERO;
        Arc::new(config)
    }

    struct Harness {
        downloader: Arc<MockDownloader>,
        keys: Arc<StaticKey>,
        events: Arc<Mutex<Vec<EpisodeEvent>>>,
        dir: tempfile::TempDir,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(downloader: MockDownloader, key_fails: bool) -> Self {
            Self {
                downloader: Arc::new(downloader),
                keys: Arc::new(StaticKey {
                    calls: AtomicUsize::new(0),
                    fail: key_fails,
                }),
                events: Arc::new(Mutex::new(Vec::new())),
                dir: tempfile::tempdir().unwrap(),
                cancel: CancellationToken::new(),
            }
        }

        fn scheduler(&self, config: Arc<HlsConfig>) -> SegmentScheduler {
            let events = Arc::clone(&self.events);
            SegmentScheduler::new(
                config,
                self.downloader.clone(),
                Arc::new(KeyResolver::new(self.keys.clone())),
                self.dir.path().to_path_buf(),
                Some(Arc::new(move |event: EpisodeEvent| events.lock().push(event))),
                self.cancel.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let harness = Harness::new(
            MockDownloader {
                delay: Duration::from_millis(20),
                ..Default::default()
            },
            false,
        );
        let results = harness
            .scheduler(config(3))
            .run(&segments(20, false))
            .await
            .unwrap();

        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|r| r.status == SegmentStatus::Decrypted));
        let peak = harness.downloader.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2);

        for result in &results {
            let content = std::fs::read(result.path.as_ref().unwrap()).unwrap();
            assert_eq!(content, MockDownloader::payload(result.index));
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let harness = Harness::new(MockDownloader::default().failing(2, 2), false);
        let results = harness
            .scheduler(config(2))
            .run(&segments(4, false))
            .await
            .unwrap();

        assert_eq!(results[2].status, SegmentStatus::Decrypted);
        assert_eq!(results[2].attempts, 3);
        assert_eq!(results[0].attempts, 1);
        let retries = harness
            .events
            .lock()
            .iter()
            .filter(|e| matches!(e, EpisodeEvent::SegmentRetrying { index: 2, .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_stops_dispatch() {
        let harness = Harness::new(MockDownloader::default().failing(1, u32::MAX), false);
        let err = harness
            .scheduler(config(1))
            .run(&segments(5, false))
            .await
            .unwrap_err();

        match err {
            HlsDownloaderError::SegmentExhausted { index, attempts, .. } => {
                assert_eq!(index, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Segment 0 once, segment 1 three times, nothing after.
        assert_eq!(harness.downloader.started.load(Ordering::SeqCst), 4);
        assert!(
            harness
                .events
                .lock()
                .iter()
                .any(|e| matches!(e, EpisodeEvent::SegmentFailed { index: 1, .. }))
        );
    }

    #[tokio::test]
    async fn test_in_flight_siblings_drain_after_failure() {
        let harness = Harness::new(
            MockDownloader {
                delay: Duration::from_millis(50),
                ..Default::default()
            }
            .failing(0, u32::MAX),
            false,
        );
        let err = harness
            .scheduler(config(2))
            .run(&segments(6, false))
            .await
            .unwrap_err();

        assert!(matches!(err, HlsDownloaderError::SegmentExhausted { index: 0, .. }));
        // Segment 1 was already running and finished; segments 2.. never started.
        assert_eq!(harness.downloader.completed.load(Ordering::SeqCst), 1);
        assert!(harness.dir.path().join("segment_000001.ts").exists());
        assert!(!harness.dir.path().join("segment_000002.ts").exists());
    }

    #[tokio::test]
    async fn test_encrypted_segments_are_decrypted_with_one_key_fetch() {
        let harness = Harness::new(
            MockDownloader {
                encrypt: true,
                ..Default::default()
            },
            false,
        );
        let results = harness
            .scheduler(config(4))
            .run(&segments(8, true))
            .await
            .unwrap();

        for result in &results {
            let content = std::fs::read(result.path.as_ref().unwrap()).unwrap();
            assert_eq!(content, MockDownloader::payload(result.index));
        }
        assert_eq!(harness.keys.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_failure_is_not_retried() {
        let harness = Harness::new(MockDownloader::default(), true);
        let err = harness
            .scheduler(config(2))
            .run(&segments(3, true))
            .await
            .unwrap_err();

        assert!(matches!(err, HlsDownloaderError::KeyFetchError { .. }));
        assert_eq!(harness.keys.calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.downloader.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_pool_starts_nothing() {
        let harness = Harness::new(MockDownloader::default(), false);
        harness.cancel.cancel();
        let err = harness
            .scheduler(config(2))
            .run(&segments(3, false))
            .await
            .unwrap_err();

        assert!(matches!(err, HlsDownloaderError::Cancelled));
        assert_eq!(harness.downloader.started.load(Ordering::SeqCst), 0);
    }
}
