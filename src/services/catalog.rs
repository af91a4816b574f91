use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{LauncherError, Result};
use crate::models::RemoteTool;

pub const DEFAULT_API_BASE: &str = "https://7th.rhythmdoctor.top/api";

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Deserialize, Default)]
struct ToolListData {
    tools: Vec<RemoteTool>,
}

#[derive(Deserialize, Default)]
struct DownloadCountData {
    current_downloads: i64,
}

/// Read side of the remote tool catalog plus the download-count bump.
/// Catalog responses come wrapped in a `{success, message, data}` envelope.
#[derive(Clone)]
pub struct ToolCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl ToolCatalog {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(6))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        ToolCatalog { client, base_url }
    }

    /// Fetches the full tool list. An unsuccessful envelope maps to an
    /// HTTP error carrying the server's message.
    pub async fn fetch_tools(&self) -> Result<Vec<RemoteTool>> {
        let url = format!("{}/tools/get_tools.php", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::Http(format!(
                "Tool catalog returned status {}",
                status
            )));
        }
        let envelope: ApiEnvelope<ToolListData> = response.json().await?;
        if !envelope.success {
            return Err(LauncherError::Http(
                envelope
                    .message
                    .unwrap_or_else(|| "Tool catalog reported failure".to_string()),
            ));
        }
        let tools = envelope.data.map(|data| data.tools).unwrap_or_default();
        debug!("Fetched {} catalog entries", tools.len());
        Ok(tools)
    }

    /// Bumps the server-side download counter for a tool. Best effort: any
    /// failure is logged and reported as `None`, never as an error.
    pub async fn bump_download_count(&self, tool_id: &str) -> Option<i64> {
        let url = format!("{}/tools/update_downloadsnum.php", self.base_url);
        let result = self
            .client
            .post(&url)
            .json(&json!({ "tool_id": tool_id }))
            .send()
            .await;
        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(
                    "Download count bump for tool {} returned status {}",
                    tool_id,
                    response.status()
                );
                return None;
            }
            Err(e) => {
                warn!("Download count bump for tool {} failed: {}", tool_id, e);
                return None;
            }
        };
        match response.json::<ApiEnvelope<DownloadCountData>>().await {
            Ok(envelope) if envelope.success => {
                envelope.data.map(|data| data.current_downloads)
            }
            Ok(envelope) => {
                warn!(
                    "Download count bump for tool {} rejected: {}",
                    tool_id,
                    envelope.message.unwrap_or_default()
                );
                None
            }
            Err(e) => {
                warn!("Download count response for tool {} unreadable: {}", tool_id, e);
                None
            }
        }
    }
}
