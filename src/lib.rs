pub mod errors;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

use std::path::PathBuf;

use services::catalog::ToolCatalog;
use services::orchestrator::DownloadOrchestrator;
use services::path_resolver::PathResolver;
use services::tool_files::ToolFileStore;
use services::transfer::TransferController;
use services::version_ledger::VersionLedger;

/// Everything the launcher front ends talk to, wired together once at
/// startup. Cloning is cheap; all services share state through `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub catalog: ToolCatalog,
    pub paths: PathResolver,
    pub ledger: VersionLedger,
    pub files: ToolFileStore,
    pub downloads: DownloadOrchestrator,
}

impl AppState {
    pub fn new(home_dir: PathBuf, api_base_url: String) -> Self {
        let paths = PathResolver::new(home_dir);
        let ledger = VersionLedger::new(paths.clone());
        let files = ToolFileStore::new(paths.clone());
        let transfer = TransferController::new(paths.clone(), ledger.clone());
        let downloads = DownloadOrchestrator::new(transfer, ledger.clone(), files.clone());
        AppState {
            catalog: ToolCatalog::new(api_base_url),
            paths,
            ledger,
            files,
            downloads,
        }
    }
}
