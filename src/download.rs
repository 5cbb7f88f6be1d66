//! Streaming downloads with byte-level progress.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{BootError, Result};
use crate::progress::StageReporter;
use crate::utils::format_bytes;

/// Indeterminate downloads report once per this many bytes.
const INDETERMINATE_REPORT_STEP: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("bootkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BootError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// The destination's parent directory must already exist. Any failure,
    /// cancellation included, removes the partially written file before the
    /// error is returned. There is no retry here.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(BootError::precondition("Download directory", parent));
            }
        }

        tracing::info!("Downloading {} -> {}", url, dest.display());
        let result = self.fetch(url, dest, reporter, cancel).await;

        match &result {
            Ok(bytes) => tracing::info!("Downloaded {} ({})", dest.display(), format_bytes(*bytes)),
            Err(e) => {
                tracing::warn!("Download of {} failed: {}", url, e);
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Could not remove partial file {}: {}", dest.display(), rm);
                    }
                }
            }
        }

        result
    }

    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        reporter: &StageReporter,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BootError::network(url, "cancelled")),
            response = self.client.get(url).send() => {
                response.map_err(|e| BootError::network(url, e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(BootError::network(url, format!("server answered {}", status)));
        }

        let total = response.content_length().filter(|t| *t > 0);
        match total {
            Some(t) => tracing::debug!("Content length: {}", format_bytes(t)),
            None => tracing::debug!("Content length unknown"),
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_percent: Option<u8> = None;
        let mut next_indeterminate_report = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BootError::network(url, "cancelled")),
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| BootError::network(url, e.to_string()))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            match total {
                Some(t) => {
                    let percent = percent_of(received, t);
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        reporter.downloading(Some(percent), format!("Downloading... {}%", percent));
                    }
                }
                None => {
                    if received >= next_indeterminate_report {
                        next_indeterminate_report = received + INDETERMINATE_REPORT_STEP;
                        reporter.downloading(None, format!("Downloading... {}", format_bytes(received)));
                    }
                }
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(t) = total {
            if received < t {
                return Err(BootError::network(
                    url,
                    format!("transfer ended early ({} of {} bytes)", received, t),
                ));
            }
        }

        Ok(received)
    }
}

/// Reject an artifact smaller than `min_bytes`, deleting it.
///
/// Mirrors that fail often answer 200 with an HTML error page; a size floor
/// catches those before extraction or execution.
pub async fn ensure_min_size(path: &Path, min_bytes: u64, artifact: &str) -> Result<u64> {
    let size = tokio::fs::metadata(path).await?.len();
    if size < min_bytes {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Could not remove rejected {}: {}", path.display(), e);
        }
        return Err(BootError::integrity(
            artifact,
            format!(
                "{} is smaller than the expected minimum of {}",
                format_bytes(size),
                format_bytes(min_bytes)
            ),
        ));
    }
    Ok(size)
}

/// floor(received / total * 100), capped at 100.
fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (received.saturating_mul(100) / total).min(100) as u8
}
