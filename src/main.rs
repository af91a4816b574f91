use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use adofai_tools_launcher::errors::{LauncherError, Result};
use adofai_tools_launcher::models::{DownloadStatus, RemoteTool, ToolState};
use adofai_tools_launcher::services::catalog::DEFAULT_API_BASE;
use adofai_tools_launcher::{logging, AppState};

#[derive(Parser)]
#[command(name = "adofai-tools", about = "Downloader and launcher for ADOFAI community tools")]
struct Cli {
    /// Override the catalog API base URL.
    #[arg(long, env = "ADOFAI_TOOLS_API_URL", default_value = DEFAULT_API_BASE)]
    api_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum ListFilter {
    All,
    Downloaded,
    NotDownloaded,
}

#[derive(Subcommand)]
enum Command {
    /// List catalog tools with their local install state.
    List {
        #[arg(long, value_enum, default_value = "all")]
        filter: ListFilter,
        /// Only show tools whose name or description matches.
        #[arg(long)]
        search: Option<String>,
    },
    /// Download a tool and wait for it to finish.
    Download {
        tool_id: i64,
    },
    /// Re-download a tool, replacing the installed files.
    Update {
        tool_id: i64,
    },
    /// Open a tool's folder in the file manager.
    Open {
        tool_id: i64,
    },
    /// Open a tool's documentation page in the browser.
    Docs {
        tool_id: i64,
    },
    /// Delete a tool's files. With --extension only that file is removed.
    Delete {
        tool_id: i64,
        #[arg(long)]
        extension: Option<String>,
    },
    /// Show or change the download directory.
    Path {
        #[arg(long, conflicts_with = "reset")]
        set: Option<String>,
        #[arg(long)]
        reset: bool,
    },
    /// Show locally recorded tool versions.
    Versions,
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| LauncherError::Config("Cannot locate home directory".to_string()))
}

async fn find_tool(state: &AppState, tool_id: i64) -> Result<RemoteTool> {
    let tools = state.catalog.fetch_tools().await?;
    tools
        .into_iter()
        .find(|tool| tool.id == tool_id)
        .ok_or_else(|| LauncherError::NotFound(format!("Tool {} is not in the catalog", tool_id)))
}

async fn run_download(state: &AppState, tool: &RemoteTool) -> Result<()> {
    let id = state.downloads.start_download(tool)?;
    state.catalog.bump_download_count(&tool.tool_id()).await;

    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let Some(task) = state.downloads.task(&id) else {
            println!("Download cancelled");
            return Ok(());
        };
        match task.status {
            DownloadStatus::Downloading | DownloadStatus::Paused => {
                if task.total > 0 {
                    print!(
                        "\r{:3}%  {:>10}  {}/{} bytes   ",
                        task.progress,
                        format_speed(task.speed),
                        task.downloaded,
                        task.total
                    );
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                }
            }
            DownloadStatus::Completed => {
                println!("\nDownloaded {} {}", tool.name, tool.version);
                return Ok(());
            }
            DownloadStatus::Error => {
                let message = task.error.unwrap_or_else(|| "unknown error".to_string());
                return Err(LauncherError::Http(message));
            }
        }
    }
}

fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec >= 1_048_576.0 {
        format!("{:.1} MB/s", bytes_per_sec / 1_048_576.0)
    } else if bytes_per_sec >= 1024.0 {
        format!("{:.1} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

fn state_label(state: ToolState) -> &'static str {
    match state {
        ToolState::NotDownloaded => "not downloaded",
        ToolState::Downloaded => "downloaded",
        ToolState::NeedUpdate => "update available",
    }
}

async fn run(cli: Cli) -> Result<()> {
    let home = home_dir()?;
    let state = AppState::new(home, cli.api_url);

    match cli.command {
        Command::List { filter, search } => {
            let tools = state.catalog.fetch_tools().await?;
            let needle = search.map(|s| s.to_lowercase());
            for tool in tools {
                if let Some(needle) = &needle {
                    let description = tool.description.clone().unwrap_or_default();
                    if !tool.name.to_lowercase().contains(needle)
                        && !description.to_lowercase().contains(needle)
                    {
                        continue;
                    }
                }
                let tool_state = state.downloads.tool_state(&tool);
                let keep = match filter {
                    ListFilter::All => true,
                    ListFilter::Downloaded => tool_state != ToolState::NotDownloaded,
                    ListFilter::NotDownloaded => tool_state == ToolState::NotDownloaded,
                };
                if keep {
                    println!(
                        "{:>6}  {:<30} {:<10} {}",
                        tool.id,
                        tool.name,
                        tool.version,
                        state_label(tool_state)
                    );
                }
            }
        }
        Command::Download { tool_id } => {
            let tool = find_tool(&state, tool_id).await?;
            run_download(&state, &tool).await?;
        }
        Command::Update { tool_id } => {
            let tool = find_tool(&state, tool_id).await?;
            let id = tool.tool_id();
            if !state.files.delete_tool(&id) {
                warn!("No existing files for tool {}, downloading fresh", id);
            }
            run_download(&state, &tool).await?;
        }
        Command::Open { tool_id } => {
            if !state.files.open_tool_folder(&tool_id.to_string()) {
                return Err(LauncherError::NotFound(format!(
                    "Tool {} has no downloaded files",
                    tool_id
                )));
            }
        }
        Command::Docs { tool_id } => {
            let tool = find_tool(&state, tool_id).await?;
            let url = tool.documentation.ok_or_else(|| {
                LauncherError::NotFound(format!("Tool {} has no documentation link", tool.name))
            })?;
            if !adofai_tools_launcher::utils::shell::open_url(&url) {
                return Err(LauncherError::Config(format!("Could not open {}", url)));
            }
        }
        Command::Delete { tool_id, extension } => {
            let id = tool_id.to_string();
            let deleted = match extension {
                Some(ext) => state.files.delete_tool_file(&id, &ext),
                None => state.files.delete_tool(&id),
            };
            if deleted {
                println!("Deleted tool {}", id);
            } else {
                return Err(LauncherError::NotFound(format!(
                    "Nothing to delete for tool {}",
                    id
                )));
            }
        }
        Command::Path { set, reset } => {
            if reset {
                let base = state.paths.reset_path()?;
                println!("Download path reset to {}", base.display());
            } else if let Some(path) = set {
                let base = state.paths.set_path(&path)?;
                println!("Download path set to {}", base.display());
            } else {
                println!("{}", state.paths.base_path().display());
            }
        }
        Command::Versions => {
            let mut records: Vec<_> = state.ledger.list_all().into_values().collect();
            records.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
            for info in records {
                println!(
                    "{:>6}  {:<30} {:<10} {}",
                    info.tool_id,
                    info.tool_name,
                    info.version,
                    info.download_date.format("%Y-%m-%d")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_dir = std::env::var("ADOFAI_TOOLS_LOG_DIR")
        .map(PathBuf::from)
        .ok()
        .or_else(|| home_dir().ok().map(|home| home.join(".adofai-tools").join("logs")));
    if let Some(log_dir) = log_dir {
        if let Err(e) = logging::init(&log_dir) {
            eprintln!("Logging setup failed: {}", e);
        }
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
