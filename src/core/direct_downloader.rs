use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

const CHUNK_TIMEOUT: Duration = Duration::from_secs(45);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const CHUNK_SIZE: u64 = 10 * 1024 * 1024;
const CHUNK_THRESHOLD: u64 = 10 * 1024 * 1024;
const MAX_PARALLEL: usize = 8;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {host}")]
    Http { status: u16, host: String },
    #[error("server returned HTML instead of media")]
    HtmlInsteadOfMedia,
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("server ignored the range request")]
    RangeUnsupported,
    #[error("invalid playlist: {0}")]
    Playlist(String),
    #[error("no data received for {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("write error (disk full?): {0}")]
    Write(#[source] std::io::Error),
    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Errors that retrying the same request will not fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Http { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            Self::HtmlInsteadOfMedia | Self::Write(_) | Self::Cancelled => true,
            _ => false,
        }
    }

    pub fn http(status: reqwest::StatusCode, url: &str) -> Self {
        Self::Http {
            status: status.as_u16(),
            host: host_of(url),
        }
    }
}

/// reqwest errors carry the request URL, which may hold a signed token.
impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.without_url())
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

struct ProbeResult {
    content_length: Option<u64>,
    accept_ranges: bool,
}

/// Downloads `url` into `output` through a `.part` sibling, renamed only after
/// the size has been verified. Returns the final size.
pub async fn download_direct(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    headers: HeaderMap,
    progress_tx: mpsc::Sender<f64>,
    cancel: &CancellationToken,
) -> Result<u64, FetchError> {
    let mut last_err = None;

    for attempt in 0..MAX_RETRIES {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        if attempt > 0 {
            let base = 1000 * (attempt as u64);
            let jitter = rand::random::<u64>() % (base / 2 + 1);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }

        match download_attempt(client, url, output, &progress_tx, &headers, cancel).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                if e.is_fatal() {
                    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
                    return Err(e);
                }
                tracing::warn!(
                    "[direct] attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_RETRIES,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    let _ = tokio::fs::remove_file(&part_path_for(output)).await;
    Err(last_err.unwrap_or(FetchError::Timeout(CHUNK_TIMEOUT)))
}

pub fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

async fn probe_url(client: &reqwest::Client, url: &str, headers: &HeaderMap) -> ProbeResult {
    let request = client.head(url).headers(headers.clone());
    match tokio::time::timeout(Duration::from_secs(15), request.send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => {
            let content_length = resp.content_length();
            let accept_ranges = resp
                .headers()
                .get("accept-ranges")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.contains("bytes"))
                .unwrap_or(false);
            ProbeResult {
                content_length,
                accept_ranges,
            }
        }
        _ => ProbeResult {
            content_length: None,
            accept_ranges: false,
        },
    }
}

async fn download_attempt(
    client: &reqwest::Client,
    url: &str,
    output: &Path,
    progress_tx: &mpsc::Sender<f64>,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<u64, FetchError> {
    let part_path = part_path_for(output);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(FetchError::Write)?;
    }

    let probe = probe_url(client, url, headers).await;

    let chunked_total = probe
        .content_length
        .filter(|s| probe.accept_ranges && *s > CHUNK_THRESHOLD);

    if let Some(total) = chunked_total {
        let _ = tokio::fs::remove_file(&part_path).await;
        if let Err(chunked_err) =
            download_chunked(client, url, &part_path, total, progress_tx, headers, cancel).await
        {
            if chunked_err.is_fatal() {
                return Err(chunked_err);
            }
            let _ = tokio::fs::remove_file(&part_path).await;
            tracing::warn!("[direct] chunked failed, falling back: {}", chunked_err);
            download_single_stream(
                client, url, &part_path, 0, probe.content_length, progress_tx, headers, cancel,
            )
            .await?;
        }
    } else {
        let existing = match tokio::fs::metadata(&part_path).await {
            Ok(m) if m.len() > 0 && probe.accept_ranges => m.len(),
            _ => 0,
        };
        download_single_stream(
            client, url, &part_path, existing, probe.content_length, progress_tx, headers, cancel,
        )
        .await?;
    }

    let actual = tokio::fs::metadata(&part_path)
        .await
        .map_err(FetchError::Write)?
        .len();
    if let Some(expected) = probe.content_length {
        if expected > 0 && actual != expected {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::SizeMismatch { expected, actual });
        }
    }

    tokio::fs::rename(&part_path, output)
        .await
        .map_err(FetchError::Write)?;
    let _ = progress_tx.send(100.0).await;

    Ok(actual)
}

async fn download_chunked(
    client: &reqwest::Client,
    url: &str,
    part_path: &Path,
    total_size: u64,
    progress_tx: &mpsc::Sender<f64>,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let file = tokio::fs::File::create(part_path)
        .await
        .map_err(FetchError::Write)?;
    file.set_len(total_size).await.map_err(FetchError::Write)?;
    drop(file);

    let num_chunks = total_size.div_ceil(CHUNK_SIZE);
    let downloaded = Arc::new(AtomicU64::new(0));
    let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL));
    let cancel_token = cancel.child_token();

    let mut join_set = tokio::task::JoinSet::new();
    for i in 0..num_chunks {
        let start = i * CHUNK_SIZE;
        let end = ((i + 1) * CHUNK_SIZE).min(total_size) - 1;
        let client = client.clone();
        let url = url.to_string();
        let path = part_path.to_owned();
        let sem = semaphore.clone();
        let dl = downloaded.clone();
        let ptx = progress_tx.clone();
        let ct = cancel_token.clone();
        let hdrs = headers.clone();

        join_set.spawn(async move {
            let _permit = sem.acquire().await.map_err(|_| FetchError::Cancelled)?;
            if ct.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let range = ChunkRange {
                start,
                end,
                total_size,
            };
            download_chunk(&client, &url, &path, range, &dl, &ptx, hdrs, &ct).await
        });
    }

    while let Some(result) = join_set.join_next().await {
        if cancel_token.is_cancelled() {
            join_set.abort_all();
            return Err(FetchError::Cancelled);
        }
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                join_set.abort_all();
                return Err(FetchError::Write(std::io::Error::other(format!(
                    "chunk task failed: {:?}",
                    e
                ))));
            }
        }
    }

    Ok(())
}

#[derive(Clone, Copy)]
struct ChunkRange {
    start: u64,
    end: u64,
    total_size: u64,
}

#[allow(clippy::too_many_arguments)]
async fn download_chunk(
    client: &reqwest::Client,
    url: &str,
    part_path: &Path,
    range: ChunkRange,
    downloaded: &AtomicU64,
    progress_tx: &mpsc::Sender<f64>,
    headers: HeaderMap,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let request = client
        .get(url)
        .headers(headers)
        .header("Range", format!("bytes={}-{}", range.start, range.end));

    let response = tokio::time::timeout(CONNECT_TIMEOUT, request.send())
        .await
        .map_err(|_| FetchError::Timeout(CONNECT_TIMEOUT))??;

    let status = response.status();
    if status != reqwest::StatusCode::PARTIAL_CONTENT {
        if status.is_success() {
            return Err(FetchError::RangeUnsupported);
        }
        return Err(FetchError::http(status, url));
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(part_path)
        .await
        .map_err(FetchError::Write)?;
    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(FetchError::Write)?;

    let expected_size = range.end - range.start + 1;
    let mut chunk_written: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match tokio::time::timeout(CHUNK_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(data))) => {
                file.write_all(&data).await.map_err(FetchError::Write)?;
                chunk_written += data.len() as u64;
                let total_dl =
                    downloaded.fetch_add(data.len() as u64, Ordering::Relaxed) + data.len() as u64;
                let percent = (total_dl as f64 / range.total_size as f64) * 100.0;
                let _ = progress_tx.send(percent.min(99.9)).await;
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => break,
            Err(_) => return Err(FetchError::Timeout(CHUNK_TIMEOUT)),
        }
    }

    if chunk_written != expected_size {
        return Err(FetchError::SizeMismatch {
            expected: expected_size,
            actual: chunk_written,
        });
    }

    file.flush().await.map_err(FetchError::Write)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn download_single_stream(
    client: &reqwest::Client,
    url: &str,
    part_path: &Path,
    existing_bytes: u64,
    total_size: Option<u64>,
    progress_tx: &mpsc::Sender<f64>,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let mut request = client.get(url).headers(headers.clone());

    if existing_bytes > 0 {
        if let Some(total) = total_size {
            if existing_bytes >= total {
                return Ok(());
            }
        }
        request = request.header("Range", format!("bytes={}-", existing_bytes));
    }

    let response = tokio::time::timeout(CONNECT_TIMEOUT, request.send())
        .await
        .map_err(|_| FetchError::Timeout(CONNECT_TIMEOUT))??;

    let mut offset = 0u64;
    if existing_bytes > 0 && response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
        offset = existing_bytes;
    } else if response.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
        let _ = tokio::fs::remove_file(part_path).await;
        return Err(FetchError::RangeUnsupported);
    } else if !response.status().is_success() {
        return Err(FetchError::http(response.status(), url));
    }

    let is_html = response
        .headers()
        .get("content-type")
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| ct.contains("text/html"))
        .unwrap_or(false);
    if is_html {
        return Err(FetchError::HtmlInsteadOfMedia);
    }

    let file = if offset > 0 {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(part_path)
            .await
    } else {
        tokio::fs::File::create(part_path).await
    }
    .map_err(FetchError::Write)?;

    let mut file = tokio::io::BufWriter::with_capacity(256 * 1024, file);
    let mut downloaded = offset;
    let mut stream = response.bytes_stream();

    loop {
        if cancel.is_cancelled() {
            file.flush().await.map_err(FetchError::Write)?;
            return Err(FetchError::Cancelled);
        }

        match tokio::time::timeout(CHUNK_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                file.write_all(&chunk).await.map_err(FetchError::Write)?;
                downloaded += chunk.len() as u64;

                let percent = match total_size {
                    Some(total) if total > 0 => (downloaded as f64 / total as f64) * 100.0,
                    _ => ((downloaded as f64 / (downloaded as f64 + 500_000.0)) * 100.0).min(95.0),
                };
                let _ = progress_tx.send(percent).await;
            }
            Ok(Some(Err(e))) => {
                file.flush().await.map_err(FetchError::Write)?;
                return Err(e.into());
            }
            Ok(None) => break,
            Err(_) => {
                file.flush().await.map_err(FetchError::Write)?;
                return Err(FetchError::Timeout(CHUNK_TIMEOUT));
            }
        }
    }

    file.flush().await.map_err(FetchError::Write)?;
    Ok(())
}
