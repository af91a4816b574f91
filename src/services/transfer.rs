use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::Url;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::{LauncherError, Result};
use crate::services::path_resolver::PathResolver;
use crate::services::version_ledger::VersionLedger;

const DEFAULT_EXTENSION: &str = "zip";
const CONNECT_TIMEOUT_SECS: u64 = 6;
const INSTANT_SPEED_WINDOW: Duration = Duration::from_millis(500);

/// Everything that can happen to one transfer, in order of occurrence.
/// Each receiver belongs to exactly one download id; consumers never see
/// events from another transfer on their channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferEvent {
    Started {
        filename: String,
    },
    Progress {
        progress: i32,
        speed: f64,
        downloaded: u64,
        total: u64,
    },
    Paused,
    Resumed,
    Completed {
        filename: String,
    },
    Failed {
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferControl {
    Running,
    Paused,
    Cancelled,
}

struct TransferHandle {
    control: watch::Sender<TransferControl>,
}

/// What a caller needs to hand over to start one transfer. Name and
/// version are optional; when both are present the version ledger is
/// updated after the file lands.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub download_id: String,
    pub url: String,
    pub tool_id: String,
    pub extension: Option<String>,
    pub tool_name: Option<String>,
    pub tool_version: Option<String>,
}

enum TransferOutcome {
    Completed,
    Cancelled,
}

/// Streams tool payloads to disk with cooperative pause, resume and
/// cancel. Files are written to a `.part` sibling and renamed into place
/// only on completion, so an interrupted transfer never leaves a
/// half-written payload behind.
#[derive(Clone)]
pub struct TransferController {
    client: reqwest::Client,
    paths: PathResolver,
    ledger: VersionLedger,
    registry: Arc<Mutex<HashMap<String, TransferHandle>>>,
}

impl TransferController {
    /// No overall request timeout here: large payloads legitimately take
    /// minutes. Only the connect phase is bounded.
    pub fn new(paths: PathResolver, ledger: VersionLedger) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        TransferController {
            client,
            paths,
            ledger,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a transfer is currently registered under this id.
    pub fn is_active(&self, download_id: &str) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.contains_key(download_id))
            .unwrap_or(false)
    }

    /// Starts a transfer and returns its event stream. Fails fast when the
    /// id is already in use or the registry lock is poisoned.
    pub fn start(&self, request: TransferRequest) -> Result<mpsc::UnboundedReceiver<TransferEvent>> {
        let TransferRequest {
            download_id,
            url,
            tool_id,
            extension,
            tool_name,
            tool_version,
        } = request;

        let extension = extension
            .filter(|ext| !ext.trim().is_empty())
            .or_else(|| extension_from_url(&url))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let filename = format!("{}.{}", tool_id, extension);
        let dir = self.paths.tool_dir(&tool_id);
        let target_path = dir.join(&filename);
        let temp_path = dir.join(format!("{}.part", filename));

        let (control_tx, control_rx) = watch::channel(TransferControl::Running);
        {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| LauncherError::Config("Transfer registry lock poisoned".to_string()))?;
            if registry.contains_key(&download_id) {
                return Err(LauncherError::Config(format!(
                    "Transfer {} is already active",
                    download_id
                )));
            }
            registry.insert(download_id.clone(), TransferHandle { control: control_tx });
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let ledger = self.ledger.clone();
        let registry = Arc::clone(&self.registry);
        let id = download_id.clone();

        tokio::spawn(async move {
            info!("Transfer {} started for tool {} from {}", id, tool_id, url);
            let outcome = run_transfer(
                &client,
                &url,
                &filename,
                &temp_path,
                &target_path,
                control_rx,
                &events_tx,
            )
            .await;

            match outcome {
                Ok(TransferOutcome::Completed) => {
                    if let (Some(name), Some(version)) = (&tool_name, &tool_version) {
                        if let Err(e) = ledger.write(&tool_id, name, version) {
                            warn!("Transfer {} finished but version record failed: {}", id, e);
                        }
                    }
                    let _ = events_tx.send(TransferEvent::Completed { filename });
                    info!("Transfer {} completed", id);
                }
                Ok(TransferOutcome::Cancelled) => {
                    debug!("Transfer {} cancelled", id);
                }
                Err(e) => {
                    warn!("Transfer {} failed: {}", id, e);
                    fs::remove_file(&temp_path).await.ok();
                    let _ = events_tx.send(TransferEvent::Failed {
                        message: e.to_string(),
                    });
                }
            }

            if let Ok(mut registry) = registry.lock() {
                registry.remove(&id);
            }
        });

        Ok(events_rx)
    }

    /// Requests a pause. Returns false when the transfer is unknown or not
    /// currently running.
    pub fn pause(&self, download_id: &str) -> bool {
        let registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(_) => return false,
        };
        match registry.get(download_id) {
            Some(handle) if *handle.control.borrow() == TransferControl::Running => {
                handle.control.send(TransferControl::Paused).is_ok()
            }
            _ => false,
        }
    }

    /// Requests a resume. Returns false when the transfer is unknown or not
    /// currently paused.
    pub fn resume(&self, download_id: &str) -> bool {
        let registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(_) => return false,
        };
        match registry.get(download_id) {
            Some(handle) if *handle.control.borrow() == TransferControl::Paused => {
                handle.control.send(TransferControl::Running).is_ok()
            }
            _ => false,
        }
    }

    /// Cancels a transfer and forgets it immediately. A second cancel for
    /// the same id returns false.
    pub fn cancel(&self, download_id: &str) -> bool {
        let handle = match self.registry.lock() {
            Ok(mut registry) => registry.remove(download_id),
            Err(_) => return false,
        };
        match handle {
            Some(handle) => {
                handle.control.send(TransferControl::Cancelled).ok();
                true
            }
            None => false,
        }
    }
}

async fn run_transfer(
    client: &reqwest::Client,
    url: &str,
    filename: &str,
    temp_path: &Path,
    target_path: &Path,
    mut control: watch::Receiver<TransferControl>,
    events: &mpsc::UnboundedSender<TransferEvent>,
) -> Result<TransferOutcome> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(LauncherError::Http(format!(
            "Download failed with status {}",
            status
        )));
    }
    let total = response.content_length().unwrap_or(0);

    let _ = events.send(TransferEvent::Started {
        filename: filename.to_string(),
    });

    let mut file = fs::File::create(temp_path).await?;
    let mut stream = response.bytes_stream();
    let mut transferred: u64 = 0;
    let mut meter = SpeedMeter::new(Instant::now());

    loop {
        let state = *control.borrow_and_update();
        match state {
            TransferControl::Cancelled => {
                drop(file);
                fs::remove_file(temp_path).await.ok();
                return Ok(TransferOutcome::Cancelled);
            }
            TransferControl::Paused => {
                let _ = events.send(TransferEvent::Paused);
                loop {
                    if control.changed().await.is_err() {
                        drop(file);
                        fs::remove_file(temp_path).await.ok();
                        return Ok(TransferOutcome::Cancelled);
                    }
                    let state = *control.borrow_and_update();
                    match state {
                        TransferControl::Running => {
                            let _ = events.send(TransferEvent::Resumed);
                            meter.reset_window(Instant::now(), transferred);
                            break;
                        }
                        TransferControl::Cancelled => {
                            drop(file);
                            fs::remove_file(temp_path).await.ok();
                            return Ok(TransferOutcome::Cancelled);
                        }
                        TransferControl::Paused => continue,
                    }
                }
            }
            TransferControl::Running => {
                tokio::select! {
                    changed = control.changed() => {
                        if changed.is_err() {
                            drop(file);
                            fs::remove_file(temp_path).await.ok();
                            return Ok(TransferOutcome::Cancelled);
                        }
                        // Re-check the new control state at the top of the loop.
                        continue;
                    }
                    chunk = stream.next() => {
                        match chunk {
                            None => break,
                            Some(Err(e)) => return Err(e.into()),
                            Some(Ok(bytes)) => {
                                file.write_all(&bytes).await?;
                                transferred += bytes.len() as u64;
                                let progress = if total > 0 {
                                    ((transferred as f64 / total as f64) * 100.0).round() as i32
                                } else {
                                    0
                                };
                                let speed = meter.sample(Instant::now(), transferred);
                                let _ = events.send(TransferEvent::Progress {
                                    progress,
                                    speed,
                                    downloaded: transferred,
                                    total,
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, target_path).await?;
    Ok(TransferOutcome::Completed)
}

/// Bytes-per-second estimate. The cumulative average smooths out the first
/// half second; once a full sampling window has elapsed the instantaneous
/// rate over that window takes over, so pauses and stalls show up quickly.
/// The window is anchored at the last consumed window, not the last event,
/// so bursts of rapid chunks still roll over to the windowed rate instead
/// of reporting the lifetime average forever.
struct SpeedMeter {
    started_at: Instant,
    window_started_at: Instant,
    window_start_bytes: u64,
}

impl SpeedMeter {
    fn new(now: Instant) -> Self {
        SpeedMeter {
            started_at: now,
            window_started_at: now,
            window_start_bytes: 0,
        }
    }

    /// Restarts the sampling window, e.g. after a resume, so pause time is
    /// not counted against the rate.
    fn reset_window(&mut self, now: Instant, transferred: u64) {
        self.window_started_at = now;
        self.window_start_bytes = transferred;
    }

    fn sample(&mut self, now: Instant, transferred: u64) -> f64 {
        let window = now.duration_since(self.window_started_at);
        let speed = if window >= INSTANT_SPEED_WINDOW {
            let delta = transferred.saturating_sub(self.window_start_bytes) as f64;
            let speed = delta / window.as_secs_f64();
            self.reset_window(now, transferred);
            speed
        } else {
            let elapsed = now.duration_since(self.started_at).as_secs_f64();
            if elapsed > 0.0 {
                transferred as f64 / elapsed
            } else {
                0.0
            }
        };
        speed.max(0.0)
    }
}

/// Extracts a usable file extension from the last path segment of a URL.
/// Query strings and fragments are ignored; anything that is not plain
/// ASCII alphanumeric is rejected so the caller falls back to the default.
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
