use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::{LauncherError, Result};
use crate::models::{DownloadStatus, DownloadTask, RemoteTool, ToolState};
use crate::services::tool_files::ToolFileStore;
use crate::services::transfer::{TransferController, TransferEvent, TransferRequest};
use crate::services::version_ledger::VersionLedger;

/// Owns the task table callers poll for download state and keeps it in
/// step with transfer events. One consumer task per download applies the
/// events; a task that was cancelled or dismissed simply stops matching,
/// so late events from a dying transfer fall on the floor.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    transfer: TransferController,
    ledger: VersionLedger,
    files: ToolFileStore,
    tasks: Arc<Mutex<HashMap<String, DownloadTask>>>,
}

impl DownloadOrchestrator {
    pub fn new(transfer: TransferController, ledger: VersionLedger, files: ToolFileStore) -> Self {
        DownloadOrchestrator {
            transfer,
            ledger,
            files,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allocate_id(tasks: &HashMap<String, DownloadTask>) -> String {
        let base = Utc::now().timestamp_millis().to_string();
        if !tasks.contains_key(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !tasks.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Kicks off a download for a catalog entry and returns the new task
    /// id. Rejected when the entry has no download URL or the tool already
    /// has a live download.
    pub fn start_download(&self, tool: &RemoteTool) -> Result<String> {
        let tool_id = tool.tool_id();
        let url = tool.download_url.clone().ok_or_else(|| {
            LauncherError::Config(format!("Tool {} has no download URL", tool.name))
        })?;

        let id = {
            let mut tasks = self
                .tasks
                .lock()
                .map_err(|_| LauncherError::Config("Task table lock poisoned".to_string()))?;
            let already_active = tasks
                .values()
                .any(|task| task.tool_id == tool_id && task.status.is_active());
            if already_active {
                return Err(LauncherError::Config(format!(
                    "Tool {} is already downloading",
                    tool.name
                )));
            }
            let id = Self::allocate_id(&tasks);
            tasks.insert(
                id.clone(),
                DownloadTask {
                    id: id.clone(),
                    tool_id: tool_id.clone(),
                    url: url.clone(),
                    status: DownloadStatus::Downloading,
                    progress: 0,
                    speed: 0.0,
                    downloaded: 0,
                    total: 0,
                    error: None,
                },
            );
            id
        };

        let request = TransferRequest {
            download_id: id.clone(),
            url,
            tool_id,
            extension: None,
            tool_name: Some(tool.name.clone()),
            tool_version: Some(tool.version.clone()),
        };
        let mut events = match self.transfer.start(request) {
            Ok(events) => events,
            Err(e) => {
                if let Ok(mut tasks) = self.tasks.lock() {
                    tasks.remove(&id);
                }
                return Err(e);
            }
        };

        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                apply_event(&tasks, &task_id, event);
            }
        });

        debug!("Download {} started", id);
        Ok(id)
    }

    pub fn pause_download(&self, id: &str) -> bool {
        self.transfer.pause(id)
    }

    pub fn resume_download(&self, id: &str) -> bool {
        self.transfer.resume(id)
    }

    /// Drops the task right away and tells the transfer to stop. The
    /// caller never waits for the transfer to acknowledge.
    pub fn cancel_download(&self, id: &str) -> bool {
        let removed = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(id))
            .is_some();
        let signalled = self.transfer.cancel(id);
        removed || signalled
    }

    /// Removes a finished or failed task from the table. Live downloads
    /// must be cancelled instead.
    pub fn dismiss(&self, id: &str) -> bool {
        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return false,
        };
        match tasks.get(id) {
            Some(task) if !task.status.is_active() => {
                tasks.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every known task.
    pub fn downloads(&self) -> Vec<DownloadTask> {
        self.tasks
            .lock()
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn task(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.lock().ok().and_then(|tasks| tasks.get(id).cloned())
    }

    /// Derives the install state for a catalog entry from the files on
    /// disk and the version ledger.
    pub fn tool_state(&self, tool: &RemoteTool) -> ToolState {
        let tool_id = tool.tool_id();
        if !self.files.check_file_exists(&tool_id, None) {
            return ToolState::NotDownloaded;
        }
        if self.ledger.needs_update(&tool_id, &tool.version) {
            ToolState::NeedUpdate
        } else {
            ToolState::Downloaded
        }
    }
}

fn apply_event(tasks: &Arc<Mutex<HashMap<String, DownloadTask>>>, id: &str, event: TransferEvent) {
    let mut tasks = match tasks.lock() {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!("Task table lock poisoned, dropping event: {}", e);
            return;
        }
    };
    // A missing entry means the task was cancelled or dismissed; the
    // event is stale and ignored.
    let Some(task) = tasks.get_mut(id) else {
        return;
    };
    match event {
        TransferEvent::Started { .. } => {
            task.status = DownloadStatus::Downloading;
        }
        TransferEvent::Progress {
            progress,
            speed,
            downloaded,
            total,
        } => {
            task.progress = progress;
            task.speed = speed;
            task.downloaded = downloaded;
            task.total = total;
        }
        TransferEvent::Paused => {
            task.status = DownloadStatus::Paused;
            task.speed = 0.0;
        }
        TransferEvent::Resumed => {
            task.status = DownloadStatus::Downloading;
        }
        TransferEvent::Completed { .. } => {
            task.status = DownloadStatus::Completed;
            task.progress = 100;
            task.speed = 0.0;
        }
        TransferEvent::Failed { message } => {
            task.status = DownloadStatus::Error;
            task.speed = 0.0;
            task.error = Some(message);
        }
    }
}
