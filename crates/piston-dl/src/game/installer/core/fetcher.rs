use crate::game::installer::config::EngineConfig;
use crate::game::installer::error::{FetchError, InstallError, InstallResult};
use crate::utils::hash::digest_matches;
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{create_dir_all, File};
use tokio::io::AsyncWriteExt;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Inclusive byte range for partial requests; `end: None` reads to EOF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Run control seen by a transfer.
///
/// Requests, body reads and retry backoff are all raced against
/// `cancelled()`. Retries wait on `ready()` before going back to the network.
pub trait TransferControl: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Resolves once the transfer is cancelled
    fn cancelled(&self) -> BoxFuture<'_, ()>;

    /// Resolves when new requests may be sent: `false` if cancelled instead
    fn ready(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}

/// Control for transfers that can't be cancelled
pub struct Uncancellable;

impl TransferControl for Uncancellable {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(std::future::pending())
    }
}

/// Retried HTTP GET into memory or onto disk.
///
/// Every failed attempt (status >= 400, transport error, integrity mismatch)
/// is retried with the same request up to `retries` more times, waiting
/// `retry_delay * attempt` (at most 30s) in between.
#[derive(Clone)]
pub struct ContentFetcher {
    client: Client,
    retries: u32,
    retry_delay: Duration,
}

impl ContentFetcher {
    pub fn new(config: &EngineConfig) -> InstallResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.concurrency.max(1))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                InstallError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self::with_client(
            client,
            config.fetch_retries,
            config.retry_delay(),
        ))
    }

    pub fn with_client(client: Client, retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            retries,
            retry_delay,
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        url: &str,
        control: &dyn TransferControl,
        mut attempt_fn: F,
    ) -> InstallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = InstallResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            // A paused run sends nothing new, retries included
            if attempt > 0 && !control.ready().await {
                return Err(cancelled(url));
            }

            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "Fetch failed (attempt {}/{}): {}. Retrying {}",
                        attempt,
                        self.retries + 1,
                        e,
                        url
                    );
                    if !self.retry_delay.is_zero() {
                        let delay = (self.retry_delay * attempt).min(MAX_RETRY_DELAY);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = control.cancelled() => return Err(cancelled(url)),
                        }
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        log::error!(
                            "Fetch of {} failed after {} attempts: {}",
                            url,
                            attempt + 1,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn send(&self, url: &str, range: Option<ByteRange>) -> InstallResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        Ok(response)
    }

    /// Fetch a whole body (or the requested range) into memory.
    /// With `expected_sha1` set the body must hash to it.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        range: Option<ByteRange>,
        expected_sha1: Option<&str>,
    ) -> InstallResult<Vec<u8>> {
        log::debug!("Downloading to memory: {} (range: {:?})", url, range);
        self.with_retries(url, &Uncancellable, || async {
            let response = self.send(url, range).await?;
            let content_length = response.content_length();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::transport(url, e))?;

            check_length(url, content_length, bytes.len() as u64);

            if let Some(expected) = expected_sha1 {
                let computed = crate::utils::hash::sha1_hex(&bytes);
                if !digest_matches(&computed, expected) {
                    return Err(InstallError::Integrity {
                        url: url.to_string(),
                        expected: expected.to_string(),
                        actual: computed,
                    });
                }
            }

            Ok(bytes.to_vec())
        })
        .await
    }

    /// Fetch and deserialize a JSON document
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> InstallResult<T> {
        let bytes = self.fetch_bytes(url, None, None).await?;
        serde_json::from_slice(&bytes).map_err(|e| InstallError::json(url, e))
    }

    /// Stream a file to `path`.
    ///
    /// Data lands in `<name>.part` and is renamed into place once complete
    /// and verified, so an aborted transfer never leaves a file at `path`.
    /// `on_progress` receives the bytes received so far in the current
    /// attempt. Returns the number of bytes written.
    pub async fn fetch_to_path(
        &self,
        url: &str,
        path: &Path,
        expected_sha1: Option<&str>,
        control: &dyn TransferControl,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> InstallResult<u64> {
        log::debug!("Downloading: {} -> {:?}", url, path);

        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .await
                .map_err(|e| InstallError::io(parent, e))?;
        }

        self.with_retries(url, control, || {
            self.stream_once(url, path, expected_sha1, control, on_progress)
        })
        .await
    }

    async fn stream_once(
        &self,
        url: &str,
        path: &Path,
        expected_sha1: Option<&str>,
        control: &dyn TransferControl,
        on_progress: &(dyn Fn(u64) + Send + Sync),
    ) -> InstallResult<u64> {
        if control.is_cancelled() {
            return Err(cancelled(url));
        }

        let start = Instant::now();
        let response = tokio::select! {
            response = self.send(url, None) => response?,
            _ = control.cancelled() => {
                log::debug!("Request cancelled: {}", url);
                return Err(cancelled(url));
            }
        };
        let content_length = response.content_length();

        let tmp_path = part_path(path);
        let mut file = File::create(&tmp_path)
            .await
            .map_err(|e| InstallError::io(&tmp_path, e))?;
        let mut downloaded: u64 = 0;
        let mut hasher = Sha1::new();
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = control.cancelled() => {
                    drop(file);
                    discard(&tmp_path).await;
                    log::debug!("Download cancelled: {:?}", path);
                    return Err(cancelled(url));
                }
            };
            let Some(chunk_result) = next else {
                break;
            };

            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    discard(&tmp_path).await;
                    return Err(FetchError::transport(url, e).into());
                }
            };

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                discard(&tmp_path).await;
                return Err(InstallError::io(&tmp_path, e));
            }
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            on_progress(downloaded);
        }

        let flushed = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = flushed {
            discard(&tmp_path).await;
            return Err(InstallError::io(&tmp_path, e));
        }

        check_length(url, content_length, downloaded);

        if let Some(expected) = expected_sha1 {
            let computed = format!("{:x}", hasher.finalize());
            if !digest_matches(&computed, expected) {
                discard(&tmp_path).await;
                return Err(InstallError::Integrity {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual: computed,
                });
            }
        }

        // A stop that landed after the last chunk still must not publish the file
        if control.is_cancelled() {
            discard(&tmp_path).await;
            return Err(cancelled(url));
        }

        replace_file(&tmp_path, path).await?;

        let secs = start.elapsed().as_secs_f64();
        log::debug!(
            "Download stats: url={}, size={} bytes, time={:.2}s, throughput={:.2} MB/s",
            url,
            downloaded,
            secs,
            (downloaded as f64 / 1024.0 / 1024.0) / secs.max(0.001)
        );

        Ok(downloaded)
    }
}

fn cancelled(url: &str) -> InstallError {
    FetchError::Cancelled {
        url: url.to_string(),
    }
    .into()
}

/// Tolerant length check: a short or long body is logged, not rejected
fn check_length(url: &str, content_length: Option<u64>, received: u64) {
    if let Some(expected) = content_length {
        if expected != received {
            log::warn!(
                "Content-Length mismatch for {}: header said {} bytes, received {}",
                url,
                expected,
                received
            );
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let tmp_name = format!(
        "{}.part",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
    );
    path.with_file_name(tmp_name)
}

async fn discard(tmp_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove partial file {:?}: {}", tmp_path, e);
        }
    }
}

/// Move a finished download over any stale file at `path`
async fn replace_file(tmp_path: &Path, path: &Path) -> InstallResult<()> {
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        let mut perms = metadata.permissions();
        if perms.readonly() {
            log::debug!("Removing read-only attribute before overwriting: {:?}", path);
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            if let Err(e) = tokio::fs::set_permissions(path, perms).await {
                log::warn!("Failed to remove read-only attribute: {} - {}", e, path.display());
            }
        }
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| InstallError::io(path, e))
}
