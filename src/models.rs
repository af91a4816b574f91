use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sidecar schema revision written into every `info.json`.
pub const API_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloading,
    Paused,
    Completed,
    Error,
}

impl DownloadStatus {
    pub fn is_active(self) -> bool {
        matches!(self, DownloadStatus::Downloading | DownloadStatus::Paused)
    }
}

/// Transient, orchestrator-owned view of one in-flight download. Mutated
/// only by transfer events; removed on cancel or explicit dismissal.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub id: String,
    pub tool_id: String,
    pub url: String,
    pub status: DownloadStatus,
    pub progress: i32,
    pub speed: f64,
    pub downloaded: u64,
    pub total: u64,
    pub error: Option<String>,
}

/// Persistent per-tool version record, one `info.json` per tool directory.
/// Field names stay camelCase so sidecars written by older releases of the
/// launcher parse unchanged.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolVersionInfo {
    pub tool_id: String,
    pub version: String,
    pub tool_name: String,
    pub download_date: DateTime<Utc>,
    pub api_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolAuthor {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// One entry of the remote tool catalog.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub id: i64,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub downloads: Option<i64>,
    #[serde(default)]
    pub author: Option<ToolAuthor>,
    #[serde(default)]
    pub release_date: Option<String>,
}

impl RemoteTool {
    pub fn tool_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalToolFile {
    pub filename: String,
    pub tool_id: String,
    pub extension: String,
}

/// Per-tool UI affordance derived from the local file listing, the version
/// ledger, and the remote catalog entry.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    NotDownloaded,
    Downloaded,
    NeedUpdate,
}
